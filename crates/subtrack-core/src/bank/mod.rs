//! Bank-data aggregation providers
//!
//! A provider issues an authorization link the user follows at their bank,
//! reports which accounts the user granted, and returns booked transactions
//! for those accounts.
//!
//! Implementations:
//! - [`GoCardlessProvider`] - GoCardless Bank Account Data (Nordigen) v2 API
//! - [`MockProvider`] - deterministic in-memory provider for tests and demos

mod gocardless;
mod mock;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::NewBankTransaction;

pub use gocardless::GoCardlessProvider;
pub use mock::MockProvider;

/// Environment variable selecting the provider
pub const BANK_PROVIDER_ENV: &str = "BANK_PROVIDER";

/// Link the user must open to grant access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub link: String,
    /// Provider-side reference used to finish linking
    pub requisition_id: String,
}

/// Where an authorization flow stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequisitionState {
    /// User has not finished at the bank
    Pending,
    Linked,
    Expired,
    Rejected,
    Suspended,
}

impl RequisitionState {
    /// Map a GoCardless requisition status code
    pub fn from_code(code: &str) -> Self {
        match code {
            "LN" => Self::Linked,
            "EX" => Self::Expired,
            "RJ" => Self::Rejected,
            "SU" => Self::Suspended,
            // CR, GC, UA, SA, GA: still in progress
            _ => Self::Pending,
        }
    }
}

/// Authorization state plus the accounts granted so far
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequisitionStatus {
    pub state: RequisitionState,
    pub accounts: Vec<String>,
}

/// Operations every bank provider supports
#[async_trait]
pub trait BankProvider: Send + Sync {
    /// Short provider name stored on connections and scans
    fn name(&self) -> &str;

    /// Start an authorization flow for an institution
    async fn create_authorization(
        &self,
        institution_id: &str,
        redirect_url: &str,
        reference: &str,
    ) -> Result<Authorization>;

    /// Check an authorization flow
    async fn requisition_status(&self, requisition_id: &str) -> Result<RequisitionStatus>;

    /// Booked transactions for an account, optionally from a date on
    async fn fetch_transactions(
        &self,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<NewBankTransaction>>;

    /// Whether the provider is reachable and the credentials work
    async fn health_check(&self) -> bool;
}

/// Concrete bank client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone, Debug)]
pub enum BankClient {
    GoCardless(GoCardlessProvider),
    Mock(MockProvider),
}

impl BankClient {
    /// Create a bank client from environment variables
    ///
    /// Checks `BANK_PROVIDER`:
    /// - `gocardless` (default): needs GOCARDLESS_SECRET_ID and GOCARDLESS_SECRET_KEY
    /// - `mock`: demo data, no network
    ///
    /// Returns None if the required environment variables are not set.
    pub fn from_env() -> Option<Self> {
        let provider =
            std::env::var(BANK_PROVIDER_ENV).unwrap_or_else(|_| "gocardless".to_string());

        match provider.to_lowercase().as_str() {
            "gocardless" | "nordigen" => GoCardlessProvider::from_env().map(BankClient::GoCardless),
            "mock" => Some(BankClient::Mock(MockProvider::demo())),
            _ => {
                tracing::warn!(provider = %provider, "Unknown BANK_PROVIDER, falling back to gocardless");
                GoCardlessProvider::from_env().map(BankClient::GoCardless)
            }
        }
    }

    pub fn mock(provider: MockProvider) -> Self {
        BankClient::Mock(provider)
    }
}

#[async_trait]
impl BankProvider for BankClient {
    fn name(&self) -> &str {
        match self {
            BankClient::GoCardless(p) => p.name(),
            BankClient::Mock(p) => p.name(),
        }
    }

    async fn create_authorization(
        &self,
        institution_id: &str,
        redirect_url: &str,
        reference: &str,
    ) -> Result<Authorization> {
        match self {
            BankClient::GoCardless(p) => {
                p.create_authorization(institution_id, redirect_url, reference)
                    .await
            }
            BankClient::Mock(p) => {
                p.create_authorization(institution_id, redirect_url, reference)
                    .await
            }
        }
    }

    async fn requisition_status(&self, requisition_id: &str) -> Result<RequisitionStatus> {
        match self {
            BankClient::GoCardless(p) => p.requisition_status(requisition_id).await,
            BankClient::Mock(p) => p.requisition_status(requisition_id).await,
        }
    }

    async fn fetch_transactions(
        &self,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<NewBankTransaction>> {
        match self {
            BankClient::GoCardless(p) => p.fetch_transactions(account_id, since).await,
            BankClient::Mock(p) => p.fetch_transactions(account_id, since).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            BankClient::GoCardless(p) => p.health_check().await,
            BankClient::Mock(p) => p.health_check().await,
        }
    }
}
