//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `connections` - Bank connection commands (list, link, complete, sync, delete)
//! - `core` - Core commands (init, scan) and shared utilities (open_db)
//! - `import` - CSV statement import
//! - `maintenance` - Doctor, prune and audit log commands
//! - `payments` - Plan purchase commands
//! - `serve` - Web server command
//! - `status` - Status and dashboard commands
//! - `subscriptions` - Subscription management commands
//! - `users` - User and plan management commands

pub mod connections;
pub mod core;
pub mod import;
pub mod maintenance;
pub mod payments;
pub mod serve;
pub mod status;
pub mod subscriptions;
pub mod users;

// Re-export command functions for main.rs
pub use connections::*;
pub use core::*;
pub use import::*;
pub use maintenance::*;
pub use payments::*;
pub use serve::*;
pub use status::*;
pub use subscriptions::*;
pub use users::*;

/// Actor recorded in the audit log for CLI mutations
pub const CLI_ACTOR: &str = "cli";

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Parse a YYYY-MM-DD flag value
pub fn parse_date_flag(value: &str, flag: &str) -> anyhow::Result<chrono::NaiveDate> {
    use anyhow::Context;

    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid {} format (use YYYY-MM-DD)", flag))
}
