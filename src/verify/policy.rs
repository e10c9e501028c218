//! Eligibility Policy
//!
//! The pure admit/reject decision over a profile snapshot. Thresholds come
//! from configuration; the policy itself has no I/O, no clock, and no
//! failure mode: anything missing or unreadable is simply ineligible.

use super::profile::ProfileSnapshot;
use chrono::{DateTime, Months, Utc};

/// Configured admission thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityThresholds {
    /// Account must be at least this many whole calendar months old
    pub min_account_age_months: u32,
    /// Public repository count must strictly exceed this
    pub min_public_repos: u64,
    /// Yearly contribution count must strictly exceed this
    pub min_contributions: u64,
}

impl Default for EligibilityThresholds {
    fn default() -> Self {
        Self {
            min_account_age_months: 3,
            min_public_repos: 5,
            min_contributions: 300,
        }
    }
}

/// Why a snapshot failed the policy (logged and shown to the member)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    /// A required attribute was absent or unreadable
    MissingData,
    AccountTooYoung,
    NotEnoughRepos,
    NotEnoughContributions,
}

/// Policy verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Decide admission for a snapshot at the given instant.
///
/// Account age is measured in whole calendar months UTC, not a fixed day
/// count: the cutoff is the evaluation instant rolled back by the configured
/// months with the day-of-month clamped, so three months before July 31st is
/// April 30th. The age check is inclusive; the repo and contribution checks
/// are strictly greater-than.
pub fn evaluate(
    snapshot: &ProfileSnapshot,
    now: DateTime<Utc>,
    thresholds: &EligibilityThresholds,
) -> Eligibility {
    let Some(created_raw) = snapshot.account_created_at.as_deref() else {
        return Eligibility::Ineligible(IneligibleReason::MissingData);
    };
    let Ok(created) = DateTime::parse_from_rfc3339(created_raw.trim()) else {
        return Eligibility::Ineligible(IneligibleReason::MissingData);
    };
    let created = created.with_timezone(&Utc);

    let Some(cutoff) = now.checked_sub_months(Months::new(thresholds.min_account_age_months))
    else {
        return Eligibility::Ineligible(IneligibleReason::AccountTooYoung);
    };
    if created > cutoff {
        return Eligibility::Ineligible(IneligibleReason::AccountTooYoung);
    }

    let Some(repos) = snapshot.public_repos else {
        return Eligibility::Ineligible(IneligibleReason::MissingData);
    };
    if repos <= thresholds.min_public_repos {
        return Eligibility::Ineligible(IneligibleReason::NotEnoughRepos);
    }

    let Some(contributions_raw) = snapshot.contributions_last_year.as_deref() else {
        return Eligibility::Ineligible(IneligibleReason::MissingData);
    };
    let Ok(contributions) = contributions_raw.trim().parse::<u64>() else {
        return Eligibility::Ineligible(IneligibleReason::MissingData);
    };
    if contributions <= thresholds.min_contributions {
        return Eligibility::Ineligible(IneligibleReason::NotEnoughContributions);
    }

    Eligibility::Eligible
}
