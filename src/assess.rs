//! Boundary to the aggregate status classifier.
//!
//! The engine gathers the evidence and hands it over; the rules that turn
//! evidence into a [`crate::types::ReportStatus`] live with the implementor.

use chrono::{DateTime, Utc};

use crate::allowance::AllowanceRecord;
use crate::stats::Counts;
use crate::triage::OpenRegression;
use crate::types::AggregateStats;

/// Evidence for one test/variant comparison.
#[derive(Debug, Clone)]
pub struct AssessmentInput<'a> {
    pub required_confidence: u32,
    pub flake_as_failure: bool,
    pub sample: Counts,
    /// Base totals after any allowance re-baselining.
    pub base: Counts,
    /// Regression approved for the sample release, if any.
    pub approved_regression: Option<&'a AllowanceRecord>,
    pub open_regression: Option<&'a OpenRegression>,
    /// Failures attributed to triaged incidents. Zero when a regression is approved.
    pub resolved_issue_compensation: u64,
    pub base_release: &'a str,
    pub base_start: Option<DateTime<Utc>>,
    pub base_end: Option<DateTime<Utc>>,
}

pub trait StatusAssessor: Send + Sync {
    fn assess(&self, input: &AssessmentInput<'_>) -> AggregateStats;
}
