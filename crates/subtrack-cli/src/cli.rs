//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// SubTrack - Find the subscriptions hiding in your bank statements
#[derive(Parser)]
#[command(name = "subtrack")]
#[command(about = "Self-hosted subscription tracker", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "subtrack.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set SUBTRACK_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Show database status (encryption, size, counts)
    Status,

    /// Manage users (list, add, show, delete, plan)
    Users {
        #[command(subcommand)]
        action: Option<UsersAction>,
    },

    /// Import a CSV bank statement for a user
    Import {
        /// User ID
        #[arg(short, long)]
        user: i64,

        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,

        /// Currency for rows without a currency column
        #[arg(long, default_value = "EUR")]
        currency: String,
    },

    /// Run recurrence detection for a user
    Scan {
        /// User ID
        #[arg(short, long)]
        user: i64,

        /// Detection config TOML (defaults to the user override, then built-in)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Manage a user's subscriptions
    Subscriptions {
        /// User ID
        #[arg(short, long)]
        user: i64,

        #[command(subcommand)]
        action: Option<SubscriptionsAction>,
    },

    /// Show a user's dashboard summary
    Dashboard {
        /// User ID
        #[arg(short, long)]
        user: i64,
    },

    /// Manage a user's bank connections
    Connections {
        /// User ID
        #[arg(short, long)]
        user: i64,

        #[command(subcommand)]
        action: Option<ConnectionsAction>,
    },

    /// Manage a user's plan purchases
    Payments {
        /// User ID
        #[arg(short, long)]
        user: i64,

        #[command(subcommand)]
        action: Option<PaymentsAction>,
    },

    /// Check database consistency
    Doctor {
        /// Reset scans left running by an interrupted process
        #[arg(long)]
        fix: bool,
    },

    /// Remove detected subscriptions the current rules reject
    Prune {
        /// User ID
        #[arg(short, long)]
        user: i64,

        /// Show what would be removed without deleting
        #[arg(long)]
        dry_run: bool,

        /// Detection config TOML (defaults to the user override, then built-in)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the audit log
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory containing static files to serve (e.g., ui/out)
        #[arg(long)]
        static_dir: Option<PathBuf>,

        /// Allowed CORS origin (repeatable)
        #[arg(long = "allow-origin")]
        allowed_origins: Vec<String>,

        /// Detection config TOML (defaults to the user override, then built-in)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum UsersAction {
    /// List users
    List,

    /// Create a user on the free plan
    Add {
        /// Email address (stored lowercased)
        #[arg(long)]
        email: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Show a user
    Show {
        /// User ID
        id: i64,
    },

    /// Delete a user and everything they own
    Delete {
        /// User ID
        id: i64,
    },

    /// Set a user's plan directly
    Plan {
        /// User ID
        id: i64,

        /// Plan: free, one_time, recurring
        plan: String,

        /// Billing status: none, active, past_due, cancelled (default depends on plan)
        #[arg(long)]
        status: Option<String>,

        /// Plan expiry (YYYY-MM-DD)
        #[arg(long)]
        expires: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SubscriptionsAction {
    /// List subscriptions
    List {
        /// Filter by status: active, cancelled, excluded
        #[arg(long)]
        status: Option<String>,
    },

    /// Add a subscription by hand
    Add {
        /// Merchant name
        #[arg(long)]
        merchant: String,

        /// Cost per charge (positive)
        #[arg(long)]
        cost: f64,

        /// Currency code
        #[arg(long, default_value = "EUR")]
        currency: String,

        /// Billing cycle: daily, weekly, monthly, yearly
        #[arg(long, default_value = "monthly")]
        cycle: String,

        /// Next billing date (YYYY-MM-DD)
        #[arg(long)]
        next: Option<String>,
    },

    /// Mark a subscription as cancelled
    Cancel {
        /// Subscription ID
        id: i64,
        /// Custom cancellation date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,
    },

    /// Mark as not a subscription (excluded from future scans)
    Exclude {
        /// Subscription ID
        id: i64,
    },

    /// Return a cancelled or excluded subscription to active
    Reactivate {
        /// Subscription ID
        id: i64,
    },

    /// Delete a subscription
    Delete {
        /// Subscription ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ConnectionsAction {
    /// List bank connections
    List,

    /// Start linking a bank account (prints the authorization link)
    Link {
        /// Institution ID at the bank provider
        #[arg(long)]
        institution: String,

        /// Where the bank sends the user after authorization
        #[arg(long)]
        redirect_url: Option<String>,
    },

    /// Finish linking after the user authorized access
    Complete {
        /// Connection ID
        id: i64,
    },

    /// Pull new transactions from the bank
    Sync {
        /// Connection ID
        id: i64,

        /// Fetch from this date instead of the last sync (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
    },

    /// Delete a connection (its transactions are kept)
    Delete {
        /// Connection ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum PaymentsAction {
    /// List payments
    List,

    /// Record a pending purchase
    Record {
        /// Reference at the payment provider
        #[arg(long)]
        reference: String,

        /// Plan purchased: one_time, recurring
        #[arg(long)]
        plan: String,

        /// Amount paid
        #[arg(long)]
        amount: f64,

        /// Currency code
        #[arg(long, default_value = "EUR")]
        currency: String,
    },

    /// Confirm a payment and grant its plan
    Complete {
        /// Reference at the payment provider
        reference: String,
    },
}
