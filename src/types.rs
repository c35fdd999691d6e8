use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::cache::CacheOptions;

/// Variant name → value, e.g. `{"Platform": "aws", "Network": "ovn"}`.
pub type Variants = BTreeMap<String, String>;

/// Job name → outcome rows for that job within one release window.
pub type JobRunGroup = HashMap<String, Vec<JobRunRow>>;

// ── Request ─────────────────────────────────────────────────────────

/// A named release and the time window its runs are drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseWindow {
    pub release: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReleaseWindow {
    pub fn new(release: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            release: release.into(),
            start,
            end,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestScope {
    pub component: String,
    pub capability: String,
    pub test_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantOptions {
    /// The exact variant combination the report is for.
    pub requested_variants: Variants,
    /// Variant names the rows are grouped by; each must be in `requested_variants`.
    pub db_group_by: BTreeSet<String>,
    /// Variant groups compared across differing values instead of matched exactly.
    #[serde(default)]
    pub variant_cross_compare: Vec<String>,
    /// Values allowed on the sample side for each cross-compared group.
    #[serde(default)]
    pub compare_variants: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedOptions {
    /// Required confidence as an integer percentage.
    pub confidence: u32,
    pub flake_as_failure: bool,
    pub include_multi_release_analysis: bool,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            confidence: 95,
            flake_as_failure: false,
            include_multi_release_analysis: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub base_release: ReleaseWindow,
    #[serde(default)]
    pub base_override_release: Option<ReleaseWindow>,
    pub sample_release: ReleaseWindow,
    pub test: TestScope,
    pub variants: VariantOptions,
    #[serde(default)]
    pub advanced: AdvancedOptions,
    /// Per-request cache policy; the engine's configured policy when absent.
    #[serde(default)]
    pub cache: Option<CacheOptions>,
}

impl RequestOptions {
    /// The override window, only when it names a release other than the base.
    pub fn distinct_base_override(&self) -> Option<&ReleaseWindow> {
        self.base_override_release
            .as_ref()
            .filter(|o| !o.release.is_empty() && o.release != self.base_release.release)
    }

    pub fn identity(&self) -> TestIdentity {
        TestIdentity {
            component: self.test.component.clone(),
            capability: self.test.capability.clone(),
            test_id: self.test.test_id.clone(),
            variants: self.variants.requested_variants.clone(),
        }
    }
}

// ── Rows ────────────────────────────────────────────────────────────

/// Identifies a report row (test) and column (variant combination).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestIdentity {
    pub component: String,
    pub capability: String,
    pub test_id: String,
    pub variants: Variants,
}

/// Aggregated outcome of one test within one CI job run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunRow {
    pub total_count: u64,
    pub success_count: u64,
    pub flake_count: u64,
    /// Storage path of the run's junit artifact.
    pub file_path: String,
    #[serde(default)]
    pub jira_component: Option<String>,
    #[serde(default)]
    pub jira_component_id: Option<i64>,
}

impl JobRunRow {
    /// Runs that neither passed nor flaked. Never negative.
    pub fn failure_count(&self) -> u64 {
        self.total_count
            .saturating_sub(self.success_count)
            .saturating_sub(self.flake_count)
    }
}

// ── Stats ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TestStats {
    pub success_rate: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub flake_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunStats {
    pub test_stats: TestStats,
    pub job_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub job_name: String,
    pub base_stats: TestStats,
    pub sample_stats: TestStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base_job_run_stats: Vec<JobRunStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_job_run_stats: Vec<JobRunStats>,
    pub significant: bool,
}

/// Classification produced by the status assessor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    ExtremeRegression,
    SignificantRegression,
    ExtremeTriagedRegression,
    SignificantTriagedRegression,
    MissingSample,
    #[default]
    NotSignificant,
    MissingBasis,
    MissingBasisAndSample,
    SignificantImprovement,
}

impl ReportStatus {
    pub fn is_regression(&self) -> bool {
        matches!(
            self,
            ReportStatus::ExtremeRegression
                | ReportStatus::SignificantRegression
                | ReportStatus::ExtremeTriagedRegression
                | ReportStatus::SignificantTriagedRegression
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseStats {
    pub release: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub stats: TestStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub report_status: ReportStatus,
    pub required_confidence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fisher_exact: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explanations: Vec<String>,
    pub sample_stats: TestStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_stats: Option<BaseStats>,
}

// ── Report ──────────────────────────────────────────────────────────

/// The non-override comparison, kept alongside an override report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideContext {
    pub stats: AggregateStats,
    pub job_stats: Vec<JobStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub identity: TestIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jira_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jira_component_id: Option<i64>,
    pub stats: AggregateStats,
    pub job_stats: Vec<JobStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_override_report: Option<OverrideContext>,
}
