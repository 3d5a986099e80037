//! GoCardless Bank Account Data client
//!
//! Speaks the v2 REST API: token exchange, end-user agreements,
//! requisitions and account transactions. Access tokens are cached and
//! refreshed shortly before they expire.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Authorization, BankProvider, RequisitionState, RequisitionStatus};
use crate::error::{Error, Result};
use crate::import::parse_amount;
use crate::models::NewBankTransaction;

pub const DEFAULT_BASE_URL: &str = "https://bankaccountdata.gocardless.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Refresh tokens this long before the provider says they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const MAX_HISTORICAL_DAYS: u32 = 730;
const ACCESS_VALID_FOR_DAYS: u32 = 90;

struct CachedToken {
    access: String,
    expires_at: Instant,
}

/// GoCardless Bank Account Data provider
#[derive(Clone)]
pub struct GoCardlessProvider {
    http_client: Client,
    base_url: String,
    secret_id: String,
    secret_key: String,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl fmt::Debug for GoCardlessProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoCardlessProvider")
            .field("base_url", &self.base_url)
            .field("secret_id", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    secret_id: &'a str,
    secret_key: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access: String,
    access_expires: u64,
}

#[derive(Serialize)]
struct AgreementRequest<'a> {
    institution_id: &'a str,
    max_historical_days: u32,
    access_valid_for_days: u32,
    access_scope: [&'a str; 3],
}

#[derive(Deserialize)]
struct AgreementResponse {
    id: String,
}

#[derive(Serialize)]
struct RequisitionRequest<'a> {
    redirect: &'a str,
    institution_id: &'a str,
    reference: &'a str,
    agreement: &'a str,
}

#[derive(Deserialize)]
struct RequisitionResponse {
    id: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    accounts: Vec<String>,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    transactions: TransactionBuckets,
}

#[derive(Deserialize)]
struct TransactionBuckets {
    #[serde(default)]
    booked: Vec<ProviderTransaction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderTransaction {
    transaction_id: Option<String>,
    internal_transaction_id: Option<String>,
    booking_date: Option<String>,
    value_date: Option<String>,
    transaction_amount: TransactionAmount,
    creditor_name: Option<String>,
    debtor_name: Option<String>,
    remittance_information_unstructured: Option<String>,
    #[serde(default)]
    remittance_information_unstructured_array: Vec<String>,
}

#[derive(Deserialize)]
struct TransactionAmount {
    amount: String,
    currency: String,
}

#[derive(Deserialize)]
struct ProviderError {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl ProviderTransaction {
    /// Counterparty name, falling back to the remittance text
    fn merchant_name(&self) -> String {
        [
            self.creditor_name.as_deref(),
            self.debtor_name.as_deref(),
            self.remittance_information_unstructured.as_deref(),
            self.remittance_information_unstructured_array
                .first()
                .map(String::as_str),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string()
    }

    fn into_new_transaction(self) -> Result<NewBankTransaction> {
        let date = self
            .booking_date
            .as_deref()
            .or(self.value_date.as_deref())
            .ok_or_else(|| Error::Provider("transaction without booking date".to_string()))?;
        let booking_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| Error::Provider(format!("invalid booking date {}: {}", date, e)))?;
        let amount = parse_amount(&self.transaction_amount.amount)?;
        let merchant_name = self.merchant_name();
        let description = self
            .remittance_information_unstructured
            .clone()
            .filter(|d| d.trim() != merchant_name);

        Ok(NewBankTransaction {
            merchant_name,
            description,
            amount,
            booking_date,
            currency: self.transaction_amount.currency.to_uppercase(),
            external_id: self.transaction_id.or(self.internal_transaction_id),
        })
    }
}

impl GoCardlessProvider {
    pub fn new(base_url: &str, secret_id: &str, secret_key: &str) -> Self {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    /// Create from environment variables
    ///
    /// Needs GOCARDLESS_SECRET_ID and GOCARDLESS_SECRET_KEY; GOCARDLESS_BASE_URL
    /// overrides the production endpoint.
    pub fn from_env() -> Option<Self> {
        let secret_id = std::env::var("GOCARDLESS_SECRET_ID").ok()?;
        let secret_key = std::env::var("GOCARDLESS_SECRET_KEY").ok()?;
        let base_url =
            std::env::var("GOCARDLESS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Some(Self::new(&base_url, &secret_id, &secret_key))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let response = self
            .http_client
            .post(format!("{}/api/v2/token/new/", self.base_url))
            .json(&TokenRequest {
                secret_id: &self.secret_id,
                secret_key: &self.secret_key,
            })
            .send()
            .await?;
        let token: TokenResponse = check_response(response).await?.json().await?;
        debug!("Obtained GoCardless access token ({}s)", token.access_expires);

        let lifetime = Duration::from_secs(token.access_expires).saturating_sub(TOKEN_REFRESH_MARGIN);
        Ok(CachedToken {
            access: token.access,
            expires_at: Instant::now() + lifetime,
        })
    }

    async fn access_token(&self, force_refresh: bool) -> Result<String> {
        let mut guard = self.token.lock().await;
        if !force_refresh {
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.access.clone());
                }
            }
        }
        let token = self.fetch_token().await?;
        let access = token.access.clone();
        *guard = Some(token);
        Ok(access)
    }

    /// Send an authenticated request, retrying once with a fresh token on 401
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let token = self.access_token(false).await?;
        let response = build(&self.http_client).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_response(response).await;
        }

        warn!("GoCardless rejected cached token, refreshing");
        let token = self.access_token(true).await?;
        let response = build(&self.http_client).bearer_auth(&token).send().await?;
        check_response(response).await
    }
}

/// Turn a non-success response into a provider error carrying only the
/// status and the provider's summary
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: Option<ProviderError> = response.json().await.ok();
    let (summary, detail) = body
        .map(|b| (b.summary.unwrap_or_default(), b.detail.unwrap_or_default()))
        .unwrap_or_default();
    Err(Error::Provider(format!(
        "{} {}: {}",
        status.as_u16(),
        summary,
        detail
    )))
}

#[async_trait]
impl BankProvider for GoCardlessProvider {
    fn name(&self) -> &str {
        "gocardless"
    }

    async fn create_authorization(
        &self,
        institution_id: &str,
        redirect_url: &str,
        reference: &str,
    ) -> Result<Authorization> {
        let agreement_url = format!("{}/api/v2/agreements/enduser/", self.base_url);
        let agreement: AgreementResponse = self
            .send(|client| {
                client.post(&agreement_url).json(&AgreementRequest {
                    institution_id,
                    max_historical_days: MAX_HISTORICAL_DAYS,
                    access_valid_for_days: ACCESS_VALID_FOR_DAYS,
                    access_scope: ["balances", "details", "transactions"],
                })
            })
            .await?
            .json()
            .await?;

        let requisition_url = format!("{}/api/v2/requisitions/", self.base_url);
        let requisition: RequisitionResponse = self
            .send(|client| {
                client.post(&requisition_url).json(&RequisitionRequest {
                    redirect: redirect_url,
                    institution_id,
                    reference,
                    agreement: &agreement.id,
                })
            })
            .await?
            .json()
            .await?;

        let link = requisition
            .link
            .ok_or_else(|| Error::Provider("requisition without link".to_string()))?;
        debug!(
            "Created requisition {} for institution {}",
            requisition.id, institution_id
        );
        Ok(Authorization {
            link,
            requisition_id: requisition.id,
        })
    }

    async fn requisition_status(&self, requisition_id: &str) -> Result<RequisitionStatus> {
        let url = format!("{}/api/v2/requisitions/{}/", self.base_url, requisition_id);
        let requisition: RequisitionResponse =
            self.send(|client| client.get(&url)).await?.json().await?;

        let state = requisition
            .status
            .as_deref()
            .map(RequisitionState::from_code)
            .unwrap_or(RequisitionState::Pending);
        Ok(RequisitionStatus {
            state,
            accounts: requisition.accounts,
        })
    }

    async fn fetch_transactions(
        &self,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<NewBankTransaction>> {
        let mut url = format!(
            "{}/api/v2/accounts/{}/transactions/",
            self.base_url, account_id
        );
        if let Some(date) = since {
            url.push_str(&format!("?date_from={}", date.format("%Y-%m-%d")));
        }

        let body: TransactionsResponse = self.send(|client| client.get(&url)).await?.json().await?;
        let transactions = body
            .transactions
            .booked
            .into_iter()
            .map(ProviderTransaction::into_new_transaction)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Fetched {} booked transactions for account {}",
            transactions.len(),
            account_id
        );
        Ok(transactions)
    }

    async fn health_check(&self) -> bool {
        self.access_token(false).await.is_ok()
    }
}
