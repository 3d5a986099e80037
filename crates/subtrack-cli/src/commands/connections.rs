//! Bank connection command implementations

use anyhow::Result;
use chrono::Utc;
use subtrack_core::bank::BankProvider;
use subtrack_core::db::Database;
use subtrack_core::models::{BankConnection, ConnectionStatus};
use subtrack_core::sync::{complete_connection, link_connection, sync_connection};
use subtrack_server::{DEFAULT_REDIRECT_URL, REDIRECT_URL_ENV};

use super::{parse_date_flag, require_user, CLI_ACTOR};

/// Look up a connection that belongs to the given user
fn require_connection(db: &Database, user_id: i64, id: i64) -> Result<BankConnection> {
    db.get_connection(id)?
        .filter(|c| c.user_id == user_id)
        .ok_or_else(|| anyhow::anyhow!("Connection not found for user {}: {}", user_id, id))
}

pub fn cmd_connections_list(db: &Database, user_id: i64) -> Result<()> {
    require_user(db, user_id)?;
    let connections = db.list_connections(Some(user_id))?;

    if connections.is_empty() {
        println!("No bank connections. Run:");
        println!(
            "  subtrack connections --user {} link --institution <ID>",
            user_id
        );
        return Ok(());
    }

    println!();
    println!("🏦 Bank Connections");
    println!("   ─────────────────────────────────────────────────────────────");
    for conn in connections {
        let icon = match conn.status {
            ConnectionStatus::Linked => "🔗",
            ConnectionStatus::Pending => "⏳",
            _ => "⚠️ ",
        };
        println!(
            "   {} {:>4} │ {:12} │ {:24} │ {:8} │ synced {}",
            icon,
            conn.id,
            conn.provider,
            conn.institution_id,
            conn.status.as_str(),
            conn.last_synced_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string())
        );
    }

    Ok(())
}

pub async fn cmd_connections_link<P: BankProvider + ?Sized>(
    db: &Database,
    bank: &P,
    user_id: i64,
    institution: &str,
    redirect_url: Option<&str>,
) -> Result<()> {
    let redirect_url = match redirect_url {
        Some(url) => url.to_string(),
        None => std::env::var(REDIRECT_URL_ENV).unwrap_or_else(|_| DEFAULT_REDIRECT_URL.to_string()),
    };

    let started = link_connection(db, bank, user_id, institution, &redirect_url, Utc::now()).await?;
    db.log_audit(
        CLI_ACTOR,
        "link",
        Some("connection"),
        Some(started.connection_id),
        Some(&format!("institution={}", institution.trim())),
    )?;

    println!("🔗 Connection {} created via {}", started.connection_id, bank.name());
    println!();
    println!("   Open this link to authorize access:");
    println!("   {}", started.link);
    println!();
    println!(
        "   Then run: subtrack connections --user {} complete {}",
        user_id, started.connection_id
    );

    Ok(())
}

pub async fn cmd_connections_complete<P: BankProvider + ?Sized>(
    db: &Database,
    bank: &P,
    user_id: i64,
    id: i64,
) -> Result<()> {
    require_connection(db, user_id, id)?;

    let completed = complete_connection(db, bank, id).await?;
    db.log_audit(
        CLI_ACTOR,
        "complete",
        Some("connection"),
        Some(id),
        Some(&format!("status={}", completed.connection.status)),
    )?;

    match completed.connection.status {
        ConnectionStatus::Linked => {
            println!(
                "✅ Connection {} linked to account {}",
                id,
                completed.connection.account_id.as_deref().unwrap_or("?")
            );
            for extra in &completed.additional_connections {
                println!("   Additional account linked as connection {}", extra);
            }
        }
        ConnectionStatus::Pending => {
            println!("⏳ Authorization not finished yet. Open the link and try again.");
        }
        other => {
            println!("⚠️  Connection {} is {}", id, other);
        }
    }

    Ok(())
}

pub async fn cmd_connections_sync<P: BankProvider + ?Sized>(
    db: &Database,
    bank: &P,
    user_id: i64,
    id: i64,
    since: Option<&str>,
) -> Result<()> {
    require_connection(db, user_id, id)?;
    let since = since.map(|s| parse_date_flag(s, "--since")).transpose()?;

    println!("🔄 Syncing connection {}...", id);
    let result = sync_connection(db, bank, id, since, Utc::now()).await?;
    db.log_audit(
        CLI_ACTOR,
        "sync",
        Some("connection"),
        Some(id),
        Some(&format!(
            "fetched={}, inserted={}",
            result.fetched, result.inserted
        )),
    )?;

    println!("   Fetched:    {}", result.fetched);
    println!("   New:        {}", result.inserted);
    println!("   Duplicates: {}", result.duplicates);
    Ok(())
}

pub fn cmd_connections_delete(db: &Database, user_id: i64, id: i64) -> Result<()> {
    require_connection(db, user_id, id)?;

    db.delete_connection(id)?;
    db.log_audit(CLI_ACTOR, "delete", Some("connection"), Some(id), None)?;

    println!("🗑️  Deleted connection {} (transactions kept)", id);
    Ok(())
}
