//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod audit;
pub mod connections;
pub mod health;
pub mod maintenance;
pub mod payments;
pub mod scans;
pub mod subscriptions;
pub mod transactions;
pub mod users;

// Re-export all handlers for use in router
pub use audit::*;
pub use connections::*;
pub use health::*;
pub use maintenance::*;
pub use payments::*;
pub use scans::*;
pub use subscriptions::*;
pub use transactions::*;
pub use users::*;
