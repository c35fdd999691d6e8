use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use readiness::allowance::AllowanceRecord;
use readiness::assess::{AssessmentInput, StatusAssessor};
use readiness::error::{ReadinessError, Result};
use readiness::release::ReleaseResolver;
use readiness::stats::{compare, Counts};
use readiness::triage::{OpenRegression, RegressionStore, TriageResolver};
use readiness::types::{
    AdvancedOptions, AggregateStats, BaseStats, JobRunGroup, JobRunRow, ReleaseWindow, ReportStatus,
    RequestOptions, TestIdentity, TestScope, VariantOptions, Variants,
};
use readiness::{Bucket, Collaborators, RowQuery, RowSource};
use tokio_util::sync::CancellationToken;

#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn window(release: &str) -> ReleaseWindow {
    ReleaseWindow::new(
        release,
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 28, 0, 0, 0).unwrap(),
    )
}

#[allow(dead_code)]
pub fn variants(pairs: &[(&str, &str)]) -> Variants {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn request(test_id: &str) -> RequestOptions {
    RequestOptions {
        base_release: window("4.15"),
        base_override_release: None,
        sample_release: window("4.16"),
        test: TestScope {
            component: "Networking / router".into(),
            capability: "Routes".into(),
            test_id: test_id.into(),
        },
        variants: VariantOptions {
            requested_variants: variants(&[("Platform", "aws"), ("Network", "ovn")]),
            db_group_by: ["Platform".to_string(), "Network".to_string()]
                .into_iter()
                .collect(),
            ..Default::default()
        },
        advanced: AdvancedOptions::default(),
        cache: None,
    }
}

pub fn row(total: u64, success: u64, flake: u64) -> JobRunRow {
    JobRunRow {
        total_count: total,
        success_count: success,
        flake_count: flake,
        file_path: "logs/periodic-ci-e2e-aws-ovn/1790000000000/artifacts/e2e/junit.xml".into(),
        ..Default::default()
    }
}

pub fn group(entries: Vec<(&str, Vec<JobRunRow>)>) -> JobRunGroup {
    entries
        .into_iter()
        .map(|(job, rows)| (job.to_string(), rows))
        .collect()
}

// ── Row source ──────────────────────────────────────────────────────

/// Serves canned groups per bucket and records which buckets were queried.
#[derive(Default)]
pub struct FakeRowSource {
    groups: HashMap<Bucket, JobRunGroup>,
    failures: HashMap<Bucket, String>,
    cancel_after: Option<(Bucket, CancellationToken)>,
    calls: Mutex<Vec<Bucket>>,
}

#[allow(dead_code)]
impl FakeRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, bucket: Bucket, group: JobRunGroup) -> Self {
        self.groups.insert(bucket, group);
        self
    }

    pub fn failing(mut self, bucket: Bucket, message: &str) -> Self {
        self.failures.insert(bucket, message.to_string());
        self
    }

    /// Cancels `token` once `bucket` has been queried.
    pub fn cancelling_after(mut self, bucket: Bucket, token: CancellationToken) -> Self {
        self.cancel_after = Some((bucket, token));
        self
    }

    pub fn calls(&self) -> Vec<Bucket> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowSource for FakeRowSource {
    async fn query(&self, query: &RowQuery) -> Result<JobRunGroup> {
        self.calls.lock().unwrap().push(query.bucket);
        if let Some((bucket, token)) = &self.cancel_after {
            if *bucket == query.bucket {
                token.cancel();
            }
        }
        if let Some(message) = self.failures.get(&query.bucket) {
            return Err(ReadinessError::RowSource {
                bucket: query.bucket.to_string(),
                message: message.clone(),
            });
        }
        Ok(self.groups.get(&query.bucket).cloned().unwrap_or_default())
    }
}

// ── Assessor ────────────────────────────────────────────────────────

/// Owned copy of what the assessor was asked to judge.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessed {
    pub required_confidence: u32,
    pub sample: Counts,
    pub base: Counts,
    pub base_release: String,
    pub approved_regression: Option<String>,
    pub open_regression: Option<i64>,
    pub compensation: u64,
}

/// Flags a significant drop in aggregate pass rate and records every call.
#[derive(Default)]
pub struct RecordingAssessor {
    calls: Mutex<Vec<Assessed>>,
}

#[allow(dead_code)]
impl RecordingAssessor {
    pub fn calls(&self) -> Vec<Assessed> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last(&self) -> Assessed {
        self.calls().pop().expect("assessor was never called")
    }
}

impl StatusAssessor for RecordingAssessor {
    fn assess(&self, input: &AssessmentInput<'_>) -> AggregateStats {
        self.calls.lock().unwrap().push(Assessed {
            required_confidence: input.required_confidence,
            sample: input.sample,
            base: input.base,
            base_release: input.base_release.to_string(),
            approved_regression: input.approved_regression.map(|r| r.release.clone()),
            open_regression: input.open_regression.map(|r| r.id),
            compensation: input.resolved_issue_compensation,
        });

        let comparison = compare(
            &input.sample,
            &input.base,
            input.flake_as_failure,
            input.required_confidence,
        );
        let report_status = if input.sample.total() == 0 {
            ReportStatus::MissingSample
        } else if comparison.significant
            && input.sample.policy_pass_rate(input.flake_as_failure)
                < input.base.policy_pass_rate(input.flake_as_failure)
        {
            ReportStatus::SignificantRegression
        } else {
            ReportStatus::NotSignificant
        };

        AggregateStats {
            report_status,
            required_confidence: input.required_confidence,
            fisher_exact: Some(comparison.p_value),
            explanations: Vec::new(),
            sample_stats: input.sample.to_test_stats(),
            base_stats: Some(BaseStats {
                release: input.base_release.to_string(),
                start: input.base_start,
                end: input.base_end,
                stats: input.base.to_test_stats(),
            }),
        }
    }
}

// ── Other collaborators ─────────────────────────────────────────────

pub struct FixedTriage(pub u64);

#[async_trait]
impl TriageResolver for FixedTriage {
    async fn triaged_incidents_for(&self, _identity: &TestIdentity) -> Result<u64> {
        Ok(self.0)
    }
}

#[allow(dead_code)]
pub struct BrokenReleases;

impl ReleaseResolver for BrokenReleases {
    fn previous_release(&self, release: &str) -> Result<String> {
        Err(ReadinessError::ReleaseParse(release.to_string()))
    }
}

#[derive(Default)]
pub struct FakeRegressionStore {
    pub regressions: Vec<OpenRegression>,
    pub fail: bool,
}

#[async_trait]
impl RegressionStore for FakeRegressionStore {
    async fn list_current_regressions(&self) -> Result<Vec<OpenRegression>> {
        if self.fail {
            return Err(ReadinessError::RegressionStore("connection refused".into()));
        }
        Ok(self.regressions.clone())
    }
}

#[allow(dead_code)]
pub fn allowance(release: &str, test_id: &str, variants: Variants) -> AllowanceRecord {
    AllowanceRecord {
        release: release.to_string(),
        test_id: test_id.to_string(),
        variant: readiness::allowance::VariantSet { variants },
        ..Default::default()
    }
}

pub fn collaborators(
    source: Arc<FakeRowSource>,
    assessor: Arc<RecordingAssessor>,
) -> Collaborators {
    Collaborators {
        triage: Arc::new(FixedTriage(0)),
        ..Collaborators::new(source, assessor)
    }
}
