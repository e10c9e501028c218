//! Property-based tests for the eligibility policy
//!
//! Tests for:
//! - Totality: evaluation never panics, whatever the profile looks like
//! - Fail-closed: absent or unreadable attributes never admit
//! - Strictness: count thresholds are exclusive bounds
//! - Monotonicity: aging an account never revokes eligibility

use super::policy::{evaluate, Eligibility, EligibilityThresholds};
use super::profile::ProfileSnapshot;
use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use proptest::prelude::*;

// Fixed evaluation instant, mid-month to keep month arithmetic plain
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
}

fn snapshot(
    created_at: Option<String>,
    repos: Option<u64>,
    contributions: Option<String>,
) -> ProfileSnapshot {
    ProfileSnapshot {
        account_created_at: created_at,
        public_repos: repos,
        contributions_last_year: contributions,
    }
}

proptest! {
    /// Property test: Totality
    /// Any combination of raw profile attributes evaluates without panicking,
    /// and garbage input always lands on the ineligible side
    #[test]
    fn prop_evaluation_is_total(
        created_at in prop::option::of(".*"),
        repos in prop::option::of(any::<u64>()),
        contributions in prop::option::of(".*"),
    ) {
        let created_parses = created_at
            .as_deref()
            .map(|s| DateTime::parse_from_rfc3339(s.trim()).is_ok())
            .unwrap_or(false);

        let result = evaluate(
            &snapshot(created_at, repos, contributions),
            now(),
            &EligibilityThresholds::default(),
        );

        if !created_parses {
            prop_assert!(!result.is_eligible(), "unparsable creation date admitted");
        }
    }

    /// Property test: Fail-closed on missing data
    /// A snapshot missing any required attribute is never eligible
    #[test]
    fn prop_missing_attributes_never_admit(
        has_created in any::<bool>(),
        has_repos in any::<bool>(),
        has_contributions in any::<bool>(),
        repos in 6u64..1000,
        contributions in 301u64..10_000,
    ) {
        // All present would pass; drop at least one field.
        if has_created && has_repos && has_contributions {
            return Ok(());
        }

        let created = now() - Duration::days(365);
        let result = evaluate(
            &snapshot(
                has_created.then(|| created.to_rfc3339()),
                has_repos.then_some(repos),
                has_contributions.then(|| contributions.to_string()),
            ),
            now(),
            &EligibilityThresholds::default(),
        );
        prop_assert!(!result.is_eligible());
    }

    /// Property test: Strict count thresholds
    /// Counts at or below the threshold reject; above it, both counts admit
    #[test]
    fn prop_count_thresholds_are_exclusive(
        min_repos in 0u64..100,
        min_contributions in 0u64..1000,
        repos_over in 1u64..50,
        contributions_over in 1u64..500,
    ) {
        let thresholds = EligibilityThresholds {
            min_account_age_months: 3,
            min_public_repos: min_repos,
            min_contributions,
        };
        let created = (now() - Duration::days(365)).to_rfc3339();

        let at_threshold = evaluate(
            &snapshot(Some(created.clone()), Some(min_repos), Some(min_contributions.to_string())),
            now(),
            &thresholds,
        );
        prop_assert!(!at_threshold.is_eligible(), "count equal to threshold admitted");

        let above = evaluate(
            &snapshot(
                Some(created),
                Some(min_repos + repos_over),
                Some((min_contributions + contributions_over).to_string()),
            ),
            now(),
            &thresholds,
        );
        prop_assert_eq!(above, Eligibility::Eligible);
    }

    /// Property test: Tenure monotonicity
    /// If an account is old enough, any older creation date is also eligible
    #[test]
    fn prop_aging_never_revokes(
        days_old in 0i64..2000,
        extra_days in 1i64..1000,
    ) {
        let thresholds = EligibilityThresholds::default();
        let passing_counts = |created: DateTime<Utc>| {
            evaluate(
                &snapshot(Some(created.to_rfc3339()), Some(10), Some("400".to_string())),
                now(),
                &thresholds,
            )
        };

        let younger = passing_counts(now() - Duration::days(days_old));
        let older = passing_counts(now() - Duration::days(days_old + extra_days));

        if younger.is_eligible() {
            prop_assert!(older.is_eligible(), "older account lost eligibility");
        }
    }

    /// Property test: Month threshold
    /// Whole-month ages split exactly at the configured minimum
    #[test]
    fn prop_month_boundary(months_old in 0u32..48) {
        let created = now().checked_sub_months(Months::new(months_old)).unwrap();
        let result = evaluate(
            &snapshot(Some(created.to_rfc3339()), Some(10), Some("400".to_string())),
            now(),
            &EligibilityThresholds::default(),
        );
        prop_assert_eq!(result.is_eligible(), months_old >= 3);
    }

    /// Property test: Non-numeric contribution claims never admit
    #[test]
    fn prop_unreadable_contributions_reject(text in "[^0-9]*") {
        let created = (now() - Duration::days(365)).to_rfc3339();
        let result = evaluate(
            &snapshot(Some(created), Some(10), Some(text)),
            now(),
            &EligibilityThresholds::default(),
        );
        prop_assert!(!result.is_eligible());
    }
}
