//! Domain models for SubTrack

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A user's billing tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// One lifetime scan
    Free,
    /// Paid single scan window
    OneTime,
    /// Paid recurring plan
    Recurring,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::OneTime => "one_time",
            Self::Recurring => "recurring",
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "one_time" | "onetime" | "one-time" => Ok(Self::OneTime),
            "recurring" | "pro" => Ok(Self::Recurring),
            _ => Err(format!("Unknown plan: {}", s)),
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing state of a paid plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    None,
    Active,
    PastDue,
    Cancelled,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for BillingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "active" => Ok(Self::Active),
            "past_due" | "pastdue" => Ok(Self::PastDue),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown billing status: {}", s)),
        }
    }
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub plan: Plan,
    pub billing_status: BillingStatus,
    pub plan_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the user currently has paid access
    ///
    /// Derived from plan, billing status and expiry; never stored.
    pub fn is_pro(&self, now: DateTime<Utc>) -> bool {
        self.plan != Plan::Free
            && self.billing_status == BillingStatus::Active
            && self.plan_expires_at.map_or(true, |exp| exp > now)
    }
}

/// Subscription billing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Unknown,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::Unknown => "unknown",
        }
    }

    /// Classify a gap between two charges, in days
    pub fn from_interval(days: i64) -> Self {
        match days {
            0..=2 => Self::Daily,
            5..=9 => Self::Weekly,
            25..=35 => Self::Monthly,
            350..=380 => Self::Yearly,
            _ => Self::Unknown,
        }
    }

    /// Multiplier that converts one charge into a monthly amount
    pub fn monthly_factor(&self) -> f64 {
        match self {
            Self::Daily => 30.44,
            Self::Weekly => 4.33,
            Self::Monthly | Self::Unknown => 1.0,
            Self::Yearly => 1.0 / 12.0,
        }
    }

    /// The charge date following `date`
    ///
    /// Month arithmetic clamps to the end of shorter months (Jan 31 -> Feb 28).
    pub fn advance(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.advance_n(date, 1)
    }

    /// The `n`th charge date after `date`
    pub fn advance_n(&self, date: NaiveDate, n: u32) -> Option<NaiveDate> {
        match self {
            Self::Daily => date.checked_add_signed(Duration::days(n as i64)),
            Self::Weekly => date.checked_add_signed(Duration::days(7 * n as i64)),
            Self::Monthly => date.checked_add_months(Months::new(n)),
            Self::Yearly => date.checked_add_months(Months::new(12 * n)),
            Self::Unknown => None,
        }
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" | "annual" | "annually" => Ok(Self::Yearly),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown billing cycle: {}", s)),
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    /// User marked as "not a subscription" - excluded from detection
    Excluded,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Excluded => "excluded",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "excluded" => Ok(Self::Excluded),
            _ => Err(format!("Unknown subscription status: {}", s)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a subscription row came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionSource {
    Detected,
    Manual,
}

impl SubscriptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for SubscriptionSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "detected" => Ok(Self::Detected),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown subscription source: {}", s)),
        }
    }
}

/// A recurring payment, detected or entered by hand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    /// Display name
    pub merchant: String,
    /// Normalized grouping key, unique per user
    pub merchant_key: String,
    /// Signed charge amount, always negative
    pub amount: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub next_billing_date: Option<NaiveDate>,
    pub confidence: f64,
    pub provider: Option<String>,
    pub source: SubscriptionSource,
    /// The scan that last produced or confirmed this subscription
    pub scan_id: Option<i64>,
    pub first_seen: Option<NaiveDate>,
    pub last_seen: Option<NaiveDate>,
    pub cancelled_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Positive magnitude of a single charge
    pub fn cost(&self) -> f64 {
        -self.amount
    }

    pub fn monthly_cost(&self) -> f64 {
        self.cost() * self.billing_cycle.monthly_factor()
    }
}

/// Input for a hand-entered subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewManualSubscription {
    pub merchant: String,
    /// Positive cost per charge; stored as a negative amount
    pub cost: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_cycle")]
    pub billing_cycle: BillingCycle,
    pub next_billing_date: Option<NaiveDate>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_cycle() -> BillingCycle {
    BillingCycle::Monthly
}

/// Currency assumed when a source does not carry one
pub const DEFAULT_CURRENCY: &str = "EUR";

/// Output of the recurrence heuristic for one merchant group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedSubscription {
    pub merchant: String,
    pub merchant_key: String,
    /// Signed modal amount (negative)
    pub amount: f64,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub next_billing_date: Option<NaiveDate>,
    pub confidence: f64,
    /// Number of charges carrying the modal amount
    pub occurrences: usize,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
}

/// A raw bank transaction, immutable once ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: i64,
    pub user_id: i64,
    pub connection_id: Option<i64>,
    pub merchant_name: String,
    pub description: Option<String>,
    /// Negative for expenses, positive for income
    pub amount: f64,
    pub booking_date: NaiveDate,
    pub currency: String,
    pub external_id: Option<String>,
    pub import_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A transaction ready to be ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBankTransaction {
    pub merchant_name: String,
    pub description: Option<String>,
    pub amount: f64,
    pub booking_date: NaiveDate,
    pub currency: String,
    pub external_id: Option<String>,
}

impl NewBankTransaction {
    /// Deduplication hash over the identifying fields
    pub fn import_hash(&self) -> String {
        crate::import::generate_hash(
            &self.booking_date,
            &self.merchant_name,
            self.amount,
            &self.currency,
            self.external_id.as_deref(),
        )
    }
}

/// Bank connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Authorization link issued, user has not finished
    Pending,
    Linked,
    Expired,
    Revoked,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Linked => "linked",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "linked" => Ok(Self::Linked),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown connection status: {}", s)),
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A linked external bank account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConnection {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub institution_id: String,
    /// Provider-side reference for the authorization flow
    pub requisition_id: Option<String>,
    /// Provider account id once linked
    pub account_id: Option<String>,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Scan run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown scan status: {}", s)),
        }
    }
}

/// One run of recurrence detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankScan {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub subscriptions_found: i64,
    pub transactions_scanned: i64,
    pub error_message: Option<String>,
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(format!("Unknown payment status: {}", s)),
        }
    }
}

/// Billing audit trail entry for a plan purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    /// Checkout session or invoice id at the payment provider
    pub provider_reference: String,
    pub plan: Plan,
    pub amount: f64,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Totals for a single currency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrencyTotal {
    pub currency: String,
    pub monthly: f64,
    pub yearly: f64,
}

/// A charge expected soon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingBilling {
    pub subscription_id: i64,
    pub merchant: String,
    pub cost: f64,
    pub currency: String,
    pub date: NaiveDate,
}

/// Dashboard summary for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub user_id: i64,
    pub plan: Plan,
    pub is_pro: bool,
    pub active_subscriptions: i64,
    pub cancelled_subscriptions: i64,
    pub totals: Vec<CurrencyTotal>,
    pub upcoming: Vec<UpcomingBilling>,
    pub linked_connections: i64,
    pub last_scan: Option<BankScan>,
}
