//! Plan rules
//!
//! The plan lives in one place, the user row. Everything else (pro access,
//! whether a scan may run) is derived here from plan, billing status and
//! expiry.

use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{BillingStatus, Plan, User};

/// Completed scans included in the free plan
pub const FREE_SCAN_LIMIT: i64 = 1;

/// Length of the one-time scan window
pub const ONE_TIME_DAYS: i64 = 30;

/// Days a past-due recurring plan keeps working after expiry
pub const PAST_DUE_GRACE_DAYS: i64 = 7;

/// Plan fields to write after a purchase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanChange {
    pub plan: Plan,
    pub billing_status: BillingStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct PlanManager;

impl PlanManager {
    /// The plan the user is entitled to right now
    ///
    /// Expired or unpaid plans evaluate as free.
    pub fn effective_plan(user: &User, now: DateTime<Utc>) -> Plan {
        let not_expired = |grace_days: i64| {
            user.plan_expires_at
                .map_or(true, |exp| exp + Duration::days(grace_days) > now)
        };

        match (user.plan, user.billing_status) {
            (Plan::Free, _) => Plan::Free,
            (Plan::OneTime, BillingStatus::Active) if not_expired(0) => Plan::OneTime,
            (Plan::Recurring, BillingStatus::Active) if not_expired(0) => Plan::Recurring,
            (Plan::Recurring, BillingStatus::PastDue) if not_expired(PAST_DUE_GRACE_DAYS) => {
                Plan::Recurring
            }
            _ => Plan::Free,
        }
    }

    /// Refuse a scan the user's plan does not cover
    pub fn check_scan_allowed(user: &User, completed_scans: i64, now: DateTime<Utc>) -> Result<()> {
        match Self::effective_plan(user, now) {
            Plan::Free if completed_scans >= FREE_SCAN_LIMIT => {
                let reason = if user.plan == Plan::Free {
                    "The free plan includes one scan. Upgrade to scan again.".to_string()
                } else {
                    format!(
                        "Your {} plan is no longer active and the free scan has been used.",
                        user.plan
                    )
                };
                Err(Error::PlanLimit(reason))
            }
            _ => Ok(()),
        }
    }

    /// Compute the plan fields after buying `purchased`
    ///
    /// Never downgrades an active recurring plan. Renewals extend from the
    /// current expiry when it is still in the future.
    pub fn apply_purchase(user: &User, purchased: Plan, now: DateTime<Utc>) -> PlanChange {
        let current = Self::effective_plan(user, now);
        let base = match user.plan_expires_at {
            Some(exp) if current == purchased && exp > now => exp,
            _ => now,
        };

        match purchased {
            Plan::Free => PlanChange {
                plan: Plan::Free,
                billing_status: BillingStatus::None,
                expires_at: None,
            },
            Plan::OneTime if current == Plan::Recurring => PlanChange {
                plan: Plan::Recurring,
                billing_status: user.billing_status,
                expires_at: user.plan_expires_at,
            },
            Plan::OneTime => PlanChange {
                plan: Plan::OneTime,
                billing_status: BillingStatus::Active,
                expires_at: Some(base + Duration::days(ONE_TIME_DAYS)),
            },
            Plan::Recurring => PlanChange {
                plan: Plan::Recurring,
                billing_status: BillingStatus::Active,
                expires_at: Some(
                    base.checked_add_months(Months::new(1))
                        .unwrap_or(base + Duration::days(31)),
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn user(plan: Plan, status: BillingStatus, expires: Option<DateTime<Utc>>) -> User {
        User {
            id: 1,
            email: "u@example.com".to_string(),
            name: None,
            plan,
            billing_status: status,
            plan_expires_at: expires,
            created_at: now(),
        }
    }

    #[test]
    fn test_free_plan_allows_single_scan() {
        let u = user(Plan::Free, BillingStatus::None, None);
        assert!(PlanManager::check_scan_allowed(&u, 0, now()).is_ok());
        assert!(matches!(
            PlanManager::check_scan_allowed(&u, 1, now()),
            Err(Error::PlanLimit(_))
        ));
        assert!(!u.is_pro(now()));
    }

    #[test]
    fn test_one_time_window() {
        let active = user(
            Plan::OneTime,
            BillingStatus::Active,
            Some(now() + Duration::days(3)),
        );
        assert!(PlanManager::check_scan_allowed(&active, 5, now()).is_ok());
        assert!(active.is_pro(now()));

        let expired = user(
            Plan::OneTime,
            BillingStatus::Active,
            Some(now() - Duration::days(1)),
        );
        assert_eq!(PlanManager::effective_plan(&expired, now()), Plan::Free);
        assert!(PlanManager::check_scan_allowed(&expired, 2, now()).is_err());
        assert!(!expired.is_pro(now()));
    }

    #[test]
    fn test_recurring_past_due_grace() {
        let in_grace = user(
            Plan::Recurring,
            BillingStatus::PastDue,
            Some(now() - Duration::days(3)),
        );
        assert_eq!(PlanManager::effective_plan(&in_grace, now()), Plan::Recurring);

        let lapsed = user(
            Plan::Recurring,
            BillingStatus::PastDue,
            Some(now() - Duration::days(10)),
        );
        assert_eq!(PlanManager::effective_plan(&lapsed, now()), Plan::Free);

        let cancelled = user(Plan::Recurring, BillingStatus::Cancelled, None);
        assert_eq!(PlanManager::effective_plan(&cancelled, now()), Plan::Free);
    }

    #[test]
    fn test_apply_one_time_purchase() {
        let u = user(Plan::Free, BillingStatus::None, None);
        let change = PlanManager::apply_purchase(&u, Plan::OneTime, now());
        assert_eq!(change.plan, Plan::OneTime);
        assert_eq!(change.billing_status, BillingStatus::Active);
        assert_eq!(change.expires_at, Some(now() + Duration::days(ONE_TIME_DAYS)));
    }

    #[test]
    fn test_recurring_renewal_extends_from_expiry() {
        let expiry = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        let u = user(Plan::Recurring, BillingStatus::Active, Some(expiry));
        let change = PlanManager::apply_purchase(&u, Plan::Recurring, now());
        assert_eq!(
            change.expires_at,
            Some(Utc.with_ymd_and_hms(2024, 7, 20, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_one_time_does_not_downgrade_recurring() {
        let expiry = now() + Duration::days(10);
        let u = user(Plan::Recurring, BillingStatus::Active, Some(expiry));
        let change = PlanManager::apply_purchase(&u, Plan::OneTime, now());
        assert_eq!(change.plan, Plan::Recurring);
        assert_eq!(change.expires_at, Some(expiry));
    }
}
