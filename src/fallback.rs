//! Allowance-aware adjustments to a comparison.
//!
//! A regression approved in the sample release suppresses triage
//! compensation. A regression approved in the base release pins the base
//! to the figures recorded before that regression, so a test that was
//! already accepted as worse is not flagged again once the comparison
//! window moves to the next release.

use crate::allowance::{AllowanceRecord, AllowanceResolver};
use crate::release::ReleaseResolver;
use crate::stats::Counts;
use crate::triage::TriageResolver;
use crate::types::TestIdentity;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allowances {
    /// Approved for the sample release.
    pub approved: Option<AllowanceRecord>,
    /// Approved for the base release; only consulted without multi-release analysis.
    pub base_regression: Option<AllowanceRecord>,
}

pub fn resolve_allowances(
    resolver: &dyn AllowanceResolver,
    identity: &TestIdentity,
    sample_release: &str,
    base_release: &str,
    include_multi_release_analysis: bool,
) -> Allowances {
    let approved = resolver.lookup(sample_release, &identity.variants, &identity.test_id);
    let base_regression = if include_multi_release_analysis {
        None
    } else {
        resolver.lookup(base_release, &identity.variants, &identity.test_id)
    };
    Allowances {
        approved,
        base_regression,
    }
}

/// Triage compensation, or zero when the sample regression is approved or
/// the lookup fails.
pub async fn resolve_compensation(
    triage: &dyn TriageResolver,
    identity: &TestIdentity,
    approved: Option<&AllowanceRecord>,
) -> u64 {
    if approved.is_some() {
        return 0;
    }
    match triage.triaged_incidents_for(identity).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(
                "[FALLBACK] triage lookup failed for {}, assuming no compensation: {}",
                identity.test_id,
                e
            );
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBase {
    pub totals: Counts,
    pub release: String,
    pub rebaselined: bool,
}

/// Replaces the computed base with the base regression's previous figures
/// when those were better than what the base window now shows.
///
/// Both pass rates use the same flake policy. If the predecessor release
/// cannot be named the computed base is kept.
pub fn rebaseline(
    base_regression: Option<&AllowanceRecord>,
    computed: Counts,
    base_release: &str,
    flake_as_failure: bool,
    releases: &dyn ReleaseResolver,
) -> ResolvedBase {
    let unchanged = ResolvedBase {
        totals: computed,
        release: base_release.to_string(),
        rebaselined: false,
    };

    let Some(regression) = base_regression else {
        return unchanged;
    };
    if regression.previous_pass_percentage(flake_as_failure)
        <= computed.policy_pass_rate(flake_as_failure)
    {
        return unchanged;
    }

    match releases.previous_release(base_release) {
        Ok(previous) => {
            let totals = regression.previous_counts();
            tracing::info!(
                "[FALLBACK] base regression previous pass percentage overrides base stats. Release: {}, Successes: {}, Flakes: {}, Failures: {}",
                previous,
                totals.success,
                totals.flake,
                totals.failure
            );
            ResolvedBase {
                totals,
                release: previous,
                rebaselined: true,
            }
        }
        Err(e) => {
            tracing::error!(
                "[FALLBACK] failed to determine the previous release for base regression on {}: {}",
                base_release,
                e
            );
            unchanged
        }
    }
}
