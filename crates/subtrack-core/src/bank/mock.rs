//! In-memory bank provider
//!
//! Every requisition links immediately to the configured accounts.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Months, NaiveDate, Utc};

use super::{Authorization, BankProvider, RequisitionState, RequisitionStatus};
use crate::error::{Error, Result};
use crate::models::NewBankTransaction;

#[derive(Clone, Debug, Default)]
pub struct MockProvider {
    accounts: Arc<BTreeMap<String, Vec<NewBankTransaction>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account with a fixed transaction history
    pub fn with_account(mut self, account_id: &str, transactions: Vec<NewBankTransaction>) -> Self {
        Arc::make_mut(&mut self.accounts).insert(account_id.to_string(), transactions);
        self
    }

    /// One account with six months of typical charges ending today
    pub fn demo() -> Self {
        let today = Utc::now().date_naive();
        let mut transactions = Vec::new();

        for months_back in 0..6u32 {
            let Some(month) = today.checked_sub_months(Months::new(months_back)) else {
                continue;
            };
            transactions.push(demo_tx("NETFLIX.COM", -15.99, month, months_back));
            transactions.push(demo_tx("Spotify AB", -9.99, month - Duration::days(3), months_back));
            transactions.push(demo_tx("REWE Markt", -42.17 - months_back as f64, month, months_back));
            transactions.push(demo_tx("ACME Payroll", 2500.0, month - Duration::days(1), months_back));
        }

        Self::new().with_account("demo-account", transactions)
    }

    pub fn account_ids(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }
}

fn demo_tx(merchant: &str, amount: f64, date: NaiveDate, seq: u32) -> NewBankTransaction {
    NewBankTransaction {
        merchant_name: merchant.to_string(),
        description: None,
        amount,
        booking_date: date,
        currency: "EUR".to_string(),
        external_id: Some(format!("demo-{}-{}", merchant.to_lowercase().replace(' ', "-"), seq)),
    }
}

#[async_trait]
impl BankProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_authorization(
        &self,
        institution_id: &str,
        redirect_url: &str,
        reference: &str,
    ) -> Result<Authorization> {
        Ok(Authorization {
            link: format!("{}?ref={}&institution={}", redirect_url, reference, institution_id),
            requisition_id: format!("mock-req-{}", reference),
        })
    }

    async fn requisition_status(&self, requisition_id: &str) -> Result<RequisitionStatus> {
        if !requisition_id.starts_with("mock-req-") {
            return Err(Error::Provider(format!(
                "404 Not found: unknown requisition {}",
                requisition_id
            )));
        }
        Ok(RequisitionStatus {
            state: RequisitionState::Linked,
            accounts: self.account_ids(),
        })
    }

    async fn fetch_transactions(
        &self,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<NewBankTransaction>> {
        let transactions = self.accounts.get(account_id).ok_or_else(|| {
            Error::Provider(format!("404 Not found: unknown account {}", account_id))
        })?;
        Ok(transactions
            .iter()
            .filter(|t| since.map_or(true, |d| t.booking_date >= d))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_links_configured_accounts() {
        let provider = MockProvider::new().with_account("acc-1", vec![]);
        let auth = provider
            .create_authorization("BANK_X", "http://localhost/cb", "ref-1")
            .await
            .unwrap();
        let status = provider.requisition_status(&auth.requisition_id).await.unwrap();
        assert_eq!(status.state, RequisitionState::Linked);
        assert_eq!(status.accounts, vec!["acc-1".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_filters_since() {
        let provider = MockProvider::demo();
        let all = provider.fetch_transactions("demo-account", None).await.unwrap();
        let cutoff = Utc::now().date_naive() - Duration::days(40);
        let recent = provider
            .fetch_transactions("demo-account", Some(cutoff))
            .await
            .unwrap();
        assert_eq!(all.len(), 24);
        assert!(recent.len() < all.len());
        assert!(recent.iter().all(|t| t.booking_date >= cutoff));
        assert!(provider.fetch_transactions("nope", None).await.is_err());
    }
}
