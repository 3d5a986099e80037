//! SubTrack CLI - Subscription tracker
//!
//! Usage:
//!   subtrack init                            Initialize database
//!   subtrack users add --email a@b.c         Create a user
//!   subtrack import --user 1 --file CSV      Import a bank statement
//!   subtrack scan --user 1                   Detect recurring charges
//!   subtrack serve --port 3000               Start web server

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt),
        Commands::Users { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(UsersAction::List) => commands::cmd_users_list(&db),
                Some(UsersAction::Add { email, name }) => {
                    commands::cmd_users_add(&db, &email, name.as_deref())
                }
                Some(UsersAction::Show { id }) => commands::cmd_users_show(&db, id),
                Some(UsersAction::Delete { id }) => commands::cmd_users_delete(&db, id),
                Some(UsersAction::Plan {
                    id,
                    plan,
                    status,
                    expires,
                }) => commands::cmd_users_plan(&db, id, &plan, status.as_deref(), expires.as_deref()),
            }
        }
        Commands::Import {
            user,
            file,
            currency,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_import(&db, user, &file, &currency)
        }
        Commands::Scan { user, config } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_scan(&db, user, config.as_deref())
        }
        Commands::Subscriptions { user, action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_subscriptions_list(&db, user, None),
                Some(SubscriptionsAction::List { status }) => {
                    commands::cmd_subscriptions_list(&db, user, status.as_deref())
                }
                Some(SubscriptionsAction::Add {
                    merchant,
                    cost,
                    currency,
                    cycle,
                    next,
                }) => commands::cmd_subscriptions_add(
                    &db,
                    user,
                    &merchant,
                    cost,
                    &currency,
                    &cycle,
                    next.as_deref(),
                ),
                Some(SubscriptionsAction::Cancel { id, date }) => {
                    commands::cmd_subscriptions_cancel(&db, user, id, date.as_deref())
                }
                Some(SubscriptionsAction::Exclude { id }) => {
                    commands::cmd_subscriptions_exclude(&db, user, id)
                }
                Some(SubscriptionsAction::Reactivate { id }) => {
                    commands::cmd_subscriptions_reactivate(&db, user, id)
                }
                Some(SubscriptionsAction::Delete { id }) => {
                    commands::cmd_subscriptions_delete(&db, user, id)
                }
            }
        }
        Commands::Dashboard { user } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_dashboard(&db, user)
        }
        Commands::Connections { user, action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(ConnectionsAction::List) => commands::cmd_connections_list(&db, user),
                Some(ConnectionsAction::Delete { id }) => {
                    commands::cmd_connections_delete(&db, user, id)
                }
                Some(ConnectionsAction::Link {
                    institution,
                    redirect_url,
                }) => {
                    let bank = commands::require_bank()?;
                    commands::cmd_connections_link(
                        &db,
                        &bank,
                        user,
                        &institution,
                        redirect_url.as_deref(),
                    )
                    .await
                }
                Some(ConnectionsAction::Complete { id }) => {
                    let bank = commands::require_bank()?;
                    commands::cmd_connections_complete(&db, &bank, user, id).await
                }
                Some(ConnectionsAction::Sync { id, since }) => {
                    let bank = commands::require_bank()?;
                    commands::cmd_connections_sync(&db, &bank, user, id, since.as_deref()).await
                }
            }
        }
        Commands::Payments { user, action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(PaymentsAction::List) => commands::cmd_payments_list(&db, user),
                Some(PaymentsAction::Record {
                    reference,
                    plan,
                    amount,
                    currency,
                }) => commands::cmd_payments_record(&db, user, &reference, &plan, amount, &currency),
                Some(PaymentsAction::Complete { reference }) => {
                    commands::cmd_payments_complete(&db, user, &reference)
                }
            }
        }
        Commands::Doctor { fix } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_doctor(&db, fix)
        }
        Commands::Prune {
            user,
            dry_run,
            config,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_prune(&db, user, dry_run, config.as_deref())
        }
        Commands::Audit { limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_audit(&db, limit)
        }
        Commands::Serve {
            port,
            host,
            static_dir,
            allowed_origins,
            config,
        } => {
            commands::cmd_serve(
                &cli.db,
                &host,
                port,
                cli.no_encrypt,
                static_dir.as_deref(),
                allowed_origins,
                config.as_deref(),
            )
            .await
        }
    }
}
