//! Bank connection lifecycle
//!
//! Linking is two steps: `link_connection` hands back the bank's
//! authorization link, and `complete_connection` picks up the granted
//! accounts once the user returns. `sync_connection` pulls booked
//! transactions into the shared ingestion path.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::bank::{BankProvider, RequisitionState};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::import::ingest_transactions;
use crate::models::{BankConnection, ConnectionStatus};

/// Days re-fetched before the last sync to pick up late bookings
const SYNC_OVERLAP_DAYS: i64 = 7;

/// A pending connection and where the user must go to authorize it
#[derive(Debug, Clone, Serialize)]
pub struct LinkStarted {
    pub connection_id: i64,
    pub link: String,
}

/// Result of checking an authorization
#[derive(Debug, Clone, Serialize)]
pub struct LinkCompleted {
    pub connection: BankConnection,
    /// Connections created for extra accounts granted in the same flow
    pub additional_connections: Vec<i64>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncResult {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

fn load_connection(db: &Database, connection_id: i64) -> Result<BankConnection> {
    db.get_connection(connection_id)?
        .ok_or_else(|| Error::NotFound(format!("Connection {}", connection_id)))
}

fn check_provider<P: BankProvider + ?Sized>(client: &P, connection: &BankConnection) -> Result<()> {
    if connection.provider != client.name() {
        return Err(Error::Conflict(format!(
            "Connection {} belongs to provider {}, not {}",
            connection.id,
            connection.provider,
            client.name()
        )));
    }
    Ok(())
}

/// Start linking a bank account for a user
pub async fn link_connection<P: BankProvider + ?Sized>(
    db: &Database,
    client: &P,
    user_id: i64,
    institution_id: &str,
    redirect_url: &str,
    now: DateTime<Utc>,
) -> Result<LinkStarted> {
    if db.get_user(user_id)?.is_none() {
        return Err(Error::NotFound(format!("User {}", user_id)));
    }
    let institution_id = institution_id.trim();
    if institution_id.is_empty() {
        return Err(Error::InvalidData("institution_id is required".to_string()));
    }

    let reference = format!("subtrack-{}-{}", user_id, now.timestamp_millis());
    let authorization = client
        .create_authorization(institution_id, redirect_url, &reference)
        .await?;
    let connection_id = db.create_connection(
        user_id,
        client.name(),
        institution_id,
        Some(&authorization.requisition_id),
    )?;

    info!(
        "Started {} link for user {} at {} (connection {})",
        client.name(),
        user_id,
        institution_id,
        connection_id
    );
    Ok(LinkStarted {
        connection_id,
        link: authorization.link,
    })
}

/// Check the authorization and record the granted accounts
///
/// The first new account goes on this connection; any others get their own
/// linked connection. Accounts the user already linked are skipped.
pub async fn complete_connection<P: BankProvider + ?Sized>(
    db: &Database,
    client: &P,
    connection_id: i64,
) -> Result<LinkCompleted> {
    let connection = load_connection(db, connection_id)?;
    check_provider(client, &connection)?;
    if connection.status == ConnectionStatus::Linked {
        return Ok(LinkCompleted {
            connection,
            additional_connections: Vec::new(),
        });
    }
    let requisition_id = connection.requisition_id.clone().ok_or_else(|| {
        Error::Conflict(format!("Connection {} has no requisition", connection_id))
    })?;

    let status = client.requisition_status(&requisition_id).await?;
    let mut additional_connections = Vec::new();

    match status.state {
        RequisitionState::Pending => {}
        RequisitionState::Expired => {
            db.set_connection_status(connection_id, ConnectionStatus::Expired)?
        }
        RequisitionState::Rejected | RequisitionState::Suspended => {
            db.set_connection_status(connection_id, ConnectionStatus::Revoked)?
        }
        RequisitionState::Linked => {
            let known: Vec<String> = db
                .list_connections(Some(connection.user_id))?
                .into_iter()
                .filter_map(|c| c.account_id)
                .collect();
            let mut fresh = status.accounts.iter().filter(|a| !known.contains(a));

            match fresh.next() {
                None if status.accounts.is_empty() => {
                    warn!("Requisition {} linked without accounts", requisition_id);
                    db.set_connection_status(connection_id, ConnectionStatus::Error)?;
                }
                None => {
                    return Err(Error::Conflict(format!(
                        "All accounts from requisition {} are already linked",
                        requisition_id
                    )));
                }
                Some(first) => {
                    db.mark_connection_linked(connection_id, first)?;
                    for account in fresh {
                        let extra = db.create_connection(
                            connection.user_id,
                            &connection.provider,
                            &connection.institution_id,
                            Some(&requisition_id),
                        )?;
                        db.mark_connection_linked(extra, account)?;
                        additional_connections.push(extra);
                    }
                    info!(
                        "Linked connection {} ({} extra accounts)",
                        connection_id,
                        additional_connections.len()
                    );
                }
            }
        }
    }

    Ok(LinkCompleted {
        connection: load_connection(db, connection_id)?,
        additional_connections,
    })
}

/// Fetch booked transactions for a linked connection and ingest them
///
/// Without `since`, fetches from a week before the last sync, or the full
/// history the provider allows on the first sync.
pub async fn sync_connection<P: BankProvider + ?Sized>(
    db: &Database,
    client: &P,
    connection_id: i64,
    since: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> Result<SyncResult> {
    let connection = load_connection(db, connection_id)?;
    check_provider(client, &connection)?;
    let account_id = match (&connection.status, &connection.account_id) {
        (ConnectionStatus::Linked, Some(account)) => account.clone(),
        _ => {
            return Err(Error::Conflict(format!(
                "Connection {} is {}, not linked",
                connection_id, connection.status
            )))
        }
    };

    let since = since.or_else(|| {
        connection
            .last_synced_at
            .map(|at| at.date_naive() - Duration::days(SYNC_OVERLAP_DAYS))
    });
    let transactions = client.fetch_transactions(&account_id, since).await?;
    let stats = ingest_transactions(db, connection.user_id, Some(connection_id), &transactions)?;
    db.mark_connection_synced(connection_id, now)?;

    info!(
        "Synced connection {}: {} fetched, {} new",
        connection_id, stats.received, stats.inserted
    );
    Ok(SyncResult {
        fetched: stats.received,
        inserted: stats.inserted,
        duplicates: stats.duplicates,
    })
}
