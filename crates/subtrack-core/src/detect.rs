//! Recurrence detection
//!
//! Groups a user's raw bank transactions by merchant and infers recurring
//! charges:
//! - the most frequent absolute amount in each group is the candidate charge
//! - income, out-of-range amounts and blacklisted merchants are rejected
//! - the billing cycle comes from the median gap between charges
//!
//! [`detect_recurring`] is pure. [`RecurrenceDetector`] runs it for a user,
//! records the scan and persists the results.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DetectionConfig;
use crate::db::{Database, UpsertOutcome};
use crate::error::{Error, Result};
use crate::models::{
    BankTransaction, BillingCycle, DetectedSubscription, SubscriptionSource, SubscriptionStatus,
};
use crate::plans::PlanManager;

/// Charges needed for the occurrence part of the confidence score to max out
const FULL_CONFIDENCE_OCCURRENCES: f64 = 6.0;

/// Upper bound on cycle steps when rolling a billing date forward
const MAX_CYCLE_STEPS: u32 = 20_000;

/// Normalize a merchant descriptor into a grouping key
///
/// Uppercases, turns `*` and `#` into spaces, drops reference numbers
/// (tokens carrying four or more consecutive digits) and collapses
/// whitespace. Every remaining word is kept, so contracts that share a
/// prefix ("... MOBILE", "... INTERNET") stay apart.
pub fn normalize_merchant(name: &str) -> String {
    static REFERENCE: OnceLock<Regex> = OnceLock::new();
    let reference =
        REFERENCE.get_or_init(|| Regex::new(r"\b[A-Z]*\d{4,}[A-Z0-9]*\b").expect("valid regex"));

    let upper = name.to_uppercase().replace(['*', '#'], " ");
    let stripped = reference.replace_all(&upper, " ");

    let key = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if key.is_empty() {
        // Descriptor was nothing but a reference number
        upper.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        key
    }
}

/// A positive or zero signed amount is money coming in
pub fn is_income(amount: f64) -> bool {
    amount >= 0.0
}

/// Whether an absolute charge amount lies inside the configured range (inclusive)
pub fn amount_in_range(amount: f64, config: &DetectionConfig) -> bool {
    let amount = amount.abs();
    amount >= config.min_amount && amount <= config.max_amount
}

/// Case-insensitive substring match against the blacklist
pub fn is_blacklisted(merchant: &str, blacklist: &[String]) -> bool {
    let merchant = merchant.to_uppercase();
    blacklist
        .iter()
        .filter(|entry| !entry.trim().is_empty())
        .any(|entry| merchant.contains(&entry.to_uppercase()))
}

/// Median of a set of day gaps
fn median(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) as f64 / 2.0)
    } else {
        Some(sorted[mid] as f64)
    }
}

/// Infer the billing cycle from day gaps between consecutive charges
pub fn infer_billing_cycle(gaps: &[i64]) -> BillingCycle {
    match median(gaps) {
        Some(m) => BillingCycle::from_interval(m.round() as i64),
        None => BillingCycle::Unknown,
    }
}

/// First charge date strictly after `as_of`, stepping from `last_charge`
pub fn next_billing_date(
    last_charge: NaiveDate,
    cycle: BillingCycle,
    as_of: NaiveDate,
) -> Option<NaiveDate> {
    // Step from the original date each time so month-end clamping does not drift
    (1..=MAX_CYCLE_STEPS)
        .map_while(|n| cycle.advance_n(last_charge, n))
        .find(|d| *d > as_of)
}

/// True when the expected charge after `last_seen` is overdue past the grace period
pub fn is_lapsed(
    last_seen: NaiveDate,
    cycle: BillingCycle,
    as_of: NaiveDate,
    config: &DetectionConfig,
) -> bool {
    match (cycle.advance(last_seen), config.lapse_grace.for_cycle(cycle)) {
        (Some(expected), Some(grace)) => expected + Duration::days(grace) < as_of,
        _ => false,
    }
}

fn to_cents(amount: f64) -> i64 {
    (amount.abs() * 100.0).round() as i64
}

/// Score a candidate group between 0 and 1
///
/// Half the score is how dominant the modal amount is in the group, 40% is
/// how many gaps match the inferred cycle, and the rest rewards history.
pub fn confidence_score(
    modal_count: usize,
    group_size: usize,
    gaps: &[i64],
    cycle: BillingCycle,
) -> f64 {
    if group_size == 0 {
        return 0.0;
    }
    let share = modal_count as f64 / group_size as f64;
    let regularity = if cycle == BillingCycle::Unknown || gaps.is_empty() {
        0.0
    } else {
        let matching = gaps
            .iter()
            .filter(|g| BillingCycle::from_interval(**g) == cycle)
            .count();
        matching as f64 / gaps.len() as f64
    };
    let history = (modal_count as f64 / FULL_CONFIDENCE_OCCURRENCES).min(1.0);

    let score = 0.5 * share + 0.4 * regularity + 0.1 * history;
    (score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Most common display name in a group; ties go to the most recent
fn display_name(group: &[&BankTransaction]) -> String {
    let mut counts: HashMap<&str, (usize, NaiveDate)> = HashMap::new();
    for tx in group {
        let name = tx.merchant_name.trim();
        let entry = counts.entry(name).or_insert((0, tx.booking_date));
        entry.0 += 1;
        entry.1 = entry.1.max(tx.booking_date);
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(name, _)| name.to_string())
        .unwrap_or_default()
}

/// Evaluate one merchant group
fn evaluate_group(
    key: &str,
    group: &[&BankTransaction],
    config: &DetectionConfig,
    as_of: NaiveDate,
) -> Option<DetectedSubscription> {
    if group.len() < config.min_occurrences {
        return None;
    }

    // Modal absolute amount: count, then most recent occurrence, then larger amount
    let mut buckets: HashMap<i64, (usize, NaiveDate)> = HashMap::new();
    for tx in group {
        let entry = buckets
            .entry(to_cents(tx.amount))
            .or_insert((0, tx.booking_date));
        entry.0 += 1;
        entry.1 = entry.1.max(tx.booking_date);
    }
    let (modal_cents, (modal_count, _)) = buckets
        .into_iter()
        .max_by(|(ca, a), (cb, b)| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(ca.cmp(cb)))?;

    let mut modal: Vec<&BankTransaction> = group
        .iter()
        .copied()
        .filter(|tx| to_cents(tx.amount) == modal_cents)
        .collect();
    modal.sort_by_key(|tx| (tx.booking_date, tx.id));

    let latest = *modal.last()?;
    let merchant = display_name(group);

    if is_income(latest.amount) {
        debug!("{}: modal amount {} is income, skipping", key, latest.amount);
        return None;
    }
    if !amount_in_range(latest.amount, config) {
        debug!("{}: amount {} outside range, skipping", key, latest.amount);
        return None;
    }
    if is_blacklisted(key, &config.blacklist) || is_blacklisted(&merchant, &config.blacklist) {
        debug!("{}: blacklisted merchant, skipping", key);
        return None;
    }

    let gaps: Vec<i64> = modal
        .windows(2)
        .map(|w| (w[1].booking_date - w[0].booking_date).num_days())
        .collect();
    let cycle = infer_billing_cycle(&gaps);
    let confidence = confidence_score(modal_count, group.len(), &gaps, cycle);

    if confidence < config.min_confidence {
        debug!(
            "{}: confidence {:.2} below threshold {:.2}, skipping",
            key, confidence, config.min_confidence
        );
        return None;
    }

    let first = modal.first()?;
    Some(DetectedSubscription {
        merchant,
        merchant_key: key.to_string(),
        amount: -(modal_cents as f64) / 100.0,
        currency: latest.currency.clone(),
        billing_cycle: cycle,
        next_billing_date: next_billing_date(latest.booking_date, cycle, as_of),
        confidence,
        occurrences: modal_count,
        first_seen: first.booking_date,
        last_seen: latest.booking_date,
    })
}

/// Run the recurrence heuristic over one user's transactions
///
/// Results are ordered by merchant key.
pub fn detect_recurring(
    transactions: &[BankTransaction],
    config: &DetectionConfig,
    as_of: NaiveDate,
) -> Vec<DetectedSubscription> {
    let mut groups: HashMap<String, Vec<&BankTransaction>> = HashMap::new();
    for tx in transactions {
        groups
            .entry(normalize_merchant(&tx.merchant_name))
            .or_default()
            .push(tx);
    }

    let mut detected: Vec<DetectedSubscription> = groups
        .iter()
        .filter_map(|(key, group)| evaluate_group(key, group, config, as_of))
        .collect();
    detected.sort_by(|a, b| a.merchant_key.cmp(&b.merchant_key));
    detected
}

/// Results of one scan run
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_id: i64,
    pub transactions_scanned: usize,
    /// Candidates the heuristic produced
    pub detected: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Candidates the user excluded or entered manually
    pub skipped: usize,
    /// Active subscriptions cancelled because charges stopped
    pub lapsed: usize,
    /// Active subscriptions linked to this scan
    pub subscriptions_found: usize,
}

/// Runs detection for a user and persists the results
pub struct RecurrenceDetector<'a> {
    db: &'a Database,
    config: DetectionConfig,
}

impl<'a> RecurrenceDetector<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            config: DetectionConfig::default(),
        }
    }

    pub fn with_config(db: &'a Database, config: DetectionConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Scan a user's transactions, recording the run in `bank_scans`
    ///
    /// The plan check happens before the scan row is created, so a refused
    /// scan leaves no trace. Any later failure marks the scan failed.
    pub fn run_scan(
        &self,
        user_id: i64,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;
        let completed = self.db.count_completed_scans(user_id)?;
        PlanManager::check_scan_allowed(&user, completed, now)?;

        let scan_id = self.db.start_scan(user_id, provider)?;
        info!("Scan {} started for user {}", scan_id, user_id);

        match self.scan(user_id, scan_id, provider, now.date_naive()) {
            Ok(outcome) => {
                self.db.complete_scan(
                    scan_id,
                    outcome.subscriptions_found as i64,
                    outcome.transactions_scanned as i64,
                )?;
                info!(
                    "Scan {} completed: {} subscriptions ({} new, {} lapsed) from {} transactions",
                    scan_id,
                    outcome.subscriptions_found,
                    outcome.inserted,
                    outcome.lapsed,
                    outcome.transactions_scanned
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!("Scan {} failed: {}", scan_id, e);
                self.db.fail_scan(scan_id, &e.to_string())?;
                Err(e)
            }
        }
    }

    fn scan(
        &self,
        user_id: i64,
        scan_id: i64,
        provider: &str,
        as_of: NaiveDate,
    ) -> Result<ScanOutcome> {
        let transactions = self.db.list_bank_transactions(user_id, None, None)?;
        let detected = detect_recurring(&transactions, &self.config, as_of);

        let mut outcome = ScanOutcome {
            scan_id,
            transactions_scanned: transactions.len(),
            detected: detected.len(),
            ..Default::default()
        };

        for candidate in &detected {
            if self.db.is_merchant_excluded(user_id, &candidate.merchant_key)? {
                outcome.skipped += 1;
                continue;
            }
            match self
                .db
                .upsert_detected_subscription(user_id, Some(scan_id), provider, candidate)?
            {
                UpsertOutcome::Inserted(_) => outcome.inserted += 1,
                UpsertOutcome::Updated(_) => outcome.updated += 1,
                UpsertOutcome::Skipped => outcome.skipped += 1,
            }
        }

        outcome.lapsed = self.cancel_lapsed(user_id, as_of)?;
        outcome.subscriptions_found = self
            .db
            .list_scan_subscriptions(scan_id)?
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active)
            .count();

        Ok(outcome)
    }

    /// Cancel detected subscriptions whose charges have stopped
    fn cancel_lapsed(&self, user_id: i64, as_of: NaiveDate) -> Result<usize> {
        let active = self
            .db
            .list_subscriptions(user_id, Some(SubscriptionStatus::Active))?;

        let mut lapsed = 0;
        for sub in active
            .iter()
            .filter(|s| s.source == SubscriptionSource::Detected)
        {
            let Some(last_seen) = sub.last_seen else {
                continue;
            };
            if is_lapsed(last_seen, sub.billing_cycle, as_of, &self.config) {
                debug!("{}: no charge since {}, cancelling", sub.merchant, last_seen);
                self.db.cancel_subscription(sub.id, as_of)?;
                lapsed += 1;
            }
        }
        Ok(lapsed)
    }
}
