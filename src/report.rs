//! Folds row groups into per-job and aggregate evidence.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::allowance::AllowanceRecord;
use crate::assess::{AssessmentInput, StatusAssessor};
use crate::config::EngineConfig;
use crate::fallback;
use crate::release::ReleaseResolver;
use crate::stats::{compare, Counts};
use crate::triage::OpenRegression;
use crate::types::{
    JobRunGroup, JobRunRow, JobRunStats, JobStats, ReleaseWindow, Report, TestIdentity,
};

const ARTIFACTS_MARKER: &str = "/artifacts/";

/// One comparison to assemble: a base window with its rows against the sample rows.
#[derive(Debug, Clone)]
pub struct AssemblyInput<'a> {
    pub identity: &'a TestIdentity,
    pub base_window: &'a ReleaseWindow,
    pub base_rows: &'a JobRunGroup,
    pub sample_rows: &'a JobRunGroup,
    pub approved_regression: Option<&'a AllowanceRecord>,
    /// Allowance approved for `base_window`'s release, if one applies.
    pub base_regression: Option<&'a AllowanceRecord>,
    pub open_regression: Option<&'a OpenRegression>,
    pub resolved_issue_compensation: u64,
    pub confidence: u32,
    pub flake_as_failure: bool,
}

#[derive(Default)]
struct JobAccumulator {
    base: Counts,
    sample: Counts,
    base_runs: Vec<JobRunStats>,
    sample_runs: Vec<JobRunStats>,
}

/// First non-empty Jira component and component id seen wins.
#[derive(Debug, Default, PartialEq)]
struct JiraAttribution {
    component: Option<String>,
    component_id: Option<i64>,
}

impl JiraAttribution {
    fn observe(&mut self, job: &str, row: &JobRunRow) {
        if let Some(candidate) = row.jira_component.as_deref().filter(|c| !c.is_empty()) {
            match &self.component {
                None => self.component = Some(candidate.to_string()),
                Some(current) if current != candidate => tracing::debug!(
                    "[TEST-DETAILS] ignoring jira component {:?} from {}, keeping {:?}",
                    candidate,
                    job,
                    current
                ),
                Some(_) => {}
            }
        }
        if let Some(candidate) = row.jira_component_id {
            match self.component_id {
                None => self.component_id = Some(candidate),
                Some(current) if current != candidate => tracing::debug!(
                    "[TEST-DETAILS] ignoring jira component id {} from {}, keeping {}",
                    candidate,
                    job,
                    current
                ),
                Some(_) => {}
            }
        }
    }
}

pub struct ReportAssembler {
    viewer_base: String,
    releases: Arc<dyn ReleaseResolver>,
    assessor: Arc<dyn StatusAssessor>,
}

impl ReportAssembler {
    pub fn new(
        config: &EngineConfig,
        releases: Arc<dyn ReleaseResolver>,
        assessor: Arc<dyn StatusAssessor>,
    ) -> Self {
        Self {
            viewer_base: config.viewer_base(),
            releases,
            assessor,
        }
    }

    /// Link to a run in the job viewer. Paths without an artifacts segment
    /// link to the bucket root.
    pub fn job_url(&self, file_path: &str) -> String {
        match file_path.split_once(ARTIFACTS_MARKER) {
            Some((run_path, _)) => format!("{}{}", self.viewer_base, run_path),
            None => self.viewer_base.clone(),
        }
    }

    fn job_run_stats(&self, row: &JobRunRow) -> JobRunStats {
        JobRunStats {
            test_stats: Counts::from_row(row).to_test_stats(),
            job_url: self.job_url(&row.file_path),
        }
    }

    fn fold_rows(
        &self,
        job: &str,
        rows: &[JobRunRow],
        totals: &mut Counts,
        runs: &mut Vec<JobRunStats>,
        jira: &mut JiraAttribution,
    ) {
        for row in rows {
            jira.observe(job, row);
            totals.add(Counts::from_row(row));
            runs.push(self.job_run_stats(row));
        }
    }

    /// Builds the report for one comparison. `generated_at` and the override
    /// context are left for the caller.
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> Report {
        let mut jobs: BTreeMap<String, JobAccumulator> = BTreeMap::new();
        let mut consumed: HashSet<&str> = HashSet::new();
        let mut jira = JiraAttribution::default();

        let mut base_jobs: Vec<&String> = input.base_rows.keys().collect();
        base_jobs.sort();
        for job in base_jobs {
            let mut acc = JobAccumulator::default();
            self.fold_rows(
                job,
                &input.base_rows[job],
                &mut acc.base,
                &mut acc.base_runs,
                &mut jira,
            );
            if let Some(sample_rows) = input.sample_rows.get(job) {
                self.fold_rows(job, sample_rows, &mut acc.sample, &mut acc.sample_runs, &mut jira);
                consumed.insert(job.as_str());
            }
            jobs.insert(job.clone(), acc);
        }

        let mut sample_only: Vec<&String> = input
            .sample_rows
            .keys()
            .filter(|job| !consumed.contains(job.as_str()))
            .collect();
        sample_only.sort();
        for job in sample_only {
            let mut acc = JobAccumulator::default();
            self.fold_rows(
                job,
                &input.sample_rows[job],
                &mut acc.sample,
                &mut acc.sample_runs,
                &mut jira,
            );
            jobs.insert(job.clone(), acc);
        }

        let mut base_totals = Counts::default();
        let mut sample_totals = Counts::default();
        let job_stats: Vec<JobStats> = jobs
            .into_iter()
            .map(|(job_name, acc)| {
                base_totals.add(acc.base);
                sample_totals.add(acc.sample);
                let comparison =
                    compare(&acc.sample, &acc.base, input.flake_as_failure, input.confidence);
                JobStats {
                    job_name,
                    base_stats: acc.base.to_test_stats(),
                    sample_stats: acc.sample.to_test_stats(),
                    base_job_run_stats: acc.base_runs,
                    sample_job_run_stats: acc.sample_runs,
                    significant: comparison.significant,
                }
            })
            .collect();

        let resolved = fallback::rebaseline(
            input.base_regression,
            base_totals,
            &input.base_window.release,
            input.flake_as_failure,
            self.releases.as_ref(),
        );

        let stats = self.assessor.assess(&AssessmentInput {
            required_confidence: input.confidence,
            flake_as_failure: input.flake_as_failure,
            sample: sample_totals,
            base: resolved.totals,
            approved_regression: input.approved_regression,
            open_regression: input.open_regression,
            resolved_issue_compensation: input.resolved_issue_compensation,
            base_release: &resolved.release,
            base_start: Some(input.base_window.start),
            base_end: Some(input.base_window.end),
        });

        Report {
            identity: input.identity.clone(),
            jira_component: jira.component,
            jira_component_id: jira.component_id,
            stats,
            job_stats,
            generated_at: None,
            base_override_report: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::MinorReleaseResolver;
    use crate::types::{AggregateStats, BaseStats};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Echoes its input back so tests can see what was passed.
    #[derive(Default)]
    struct EchoAssessor {
        seen: Mutex<Vec<(Counts, Counts, String, u64)>>,
    }

    impl StatusAssessor for EchoAssessor {
        fn assess(&self, input: &AssessmentInput<'_>) -> AggregateStats {
            self.seen.lock().unwrap().push((
                input.sample,
                input.base,
                input.base_release.to_string(),
                input.resolved_issue_compensation,
            ));
            AggregateStats {
                required_confidence: input.required_confidence,
                sample_stats: input.sample.to_test_stats(),
                base_stats: Some(BaseStats {
                    release: input.base_release.to_string(),
                    start: input.base_start,
                    end: input.base_end,
                    stats: input.base.to_test_stats(),
                }),
                ..Default::default()
            }
        }
    }

    fn row(total: u64, success: u64, flake: u64) -> JobRunRow {
        JobRunRow {
            total_count: total,
            success_count: success,
            flake_count: flake,
            file_path: "logs/periodic-e2e-aws/1790/artifacts/e2e/junit.xml".into(),
            ..Default::default()
        }
    }

    fn jira_row(component: Option<&str>, id: Option<i64>) -> JobRunRow {
        JobRunRow {
            jira_component: component.map(String::from),
            jira_component_id: id,
            ..row(1, 1, 0)
        }
    }

    fn group(entries: Vec<(&str, Vec<JobRunRow>)>) -> JobRunGroup {
        entries
            .into_iter()
            .map(|(job, rows)| (job.to_string(), rows))
            .collect()
    }

    fn base_window() -> ReleaseWindow {
        ReleaseWindow::new(
            "4.15",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
        )
    }

    fn assembler(assessor: Arc<EchoAssessor>) -> ReportAssembler {
        ReportAssembler::new(&EngineConfig::default(), Arc::new(MinorReleaseResolver), assessor)
    }

    fn input<'a>(
        identity: &'a TestIdentity,
        window: &'a ReleaseWindow,
        base: &'a JobRunGroup,
        sample: &'a JobRunGroup,
    ) -> AssemblyInput<'a> {
        AssemblyInput {
            identity,
            base_window: window,
            base_rows: base,
            sample_rows: sample,
            approved_regression: None,
            base_regression: None,
            open_regression: None,
            resolved_issue_compensation: 0,
            confidence: 95,
            flake_as_failure: false,
        }
    }

    #[test]
    fn job_url_uses_prefix_before_artifacts() {
        let a = assembler(Arc::new(EchoAssessor::default()));
        assert_eq!(
            a.job_url("logs/job/123/artifacts/e2e/junit.xml"),
            "https://prow.ci.openshift.org/view/gs/test-platform-results/logs/job/123"
        );
        assert_eq!(
            a.job_url("logs/job/123/junit.xml"),
            "https://prow.ci.openshift.org/view/gs/test-platform-results/"
        );
    }

    #[test]
    fn merges_jobs_from_both_sides_in_name_order() {
        let assessor = Arc::new(EchoAssessor::default());
        let a = assembler(assessor.clone());
        let base = group(vec![
            ("job-c", vec![row(10, 10, 0)]),
            ("job-a", vec![row(10, 9, 0), row(5, 5, 0)]),
        ]);
        let sample = group(vec![
            ("job-b", vec![row(4, 2, 1)]),
            ("job-a", vec![row(10, 8, 1)]),
        ]);
        let identity = TestIdentity::default();
        let window = base_window();

        let report = a.assemble(&input(&identity, &window, &base, &sample));

        let names: Vec<&str> = report.job_stats.iter().map(|j| j.job_name.as_str()).collect();
        assert_eq!(names, vec!["job-a", "job-b", "job-c"]);

        let job_a = &report.job_stats[0];
        assert_eq!(job_a.base_stats.success_count, 14);
        assert_eq!(job_a.base_stats.failure_count, 1);
        assert_eq!(job_a.base_job_run_stats.len(), 2);
        assert_eq!(job_a.sample_job_run_stats.len(), 1);

        let job_b = &report.job_stats[1];
        assert_eq!(job_b.base_stats.success_count, 0);
        assert!(job_b.base_job_run_stats.is_empty());
        assert_eq!(job_b.sample_stats.flake_count, 1);
        assert!(!job_b.significant);

        let seen = assessor.seen.lock().unwrap();
        let (sample_totals, base_totals, release, _) = &seen[0];
        assert_eq!(*sample_totals, Counts::new(10, 2, 2));
        assert_eq!(*base_totals, Counts::new(24, 1, 0));
        assert_eq!(release, "4.15");
    }

    #[test]
    fn per_job_significance_uses_fisher_test() {
        let a = assembler(Arc::new(EchoAssessor::default()));
        let base = group(vec![("job", vec![row(100, 100, 0)])]);
        let regressed = group(vec![("job", vec![row(100, 90, 0)])]);
        let steady = group(vec![("job", vec![row(100, 99, 0)])]);
        let identity = TestIdentity::default();
        let window = base_window();

        let report = a.assemble(&input(&identity, &window, &base, &regressed));
        assert!(report.job_stats[0].significant);

        let report = a.assemble(&input(&identity, &window, &base, &steady));
        assert!(!report.job_stats[0].significant);
    }

    #[test]
    fn five_percent_job_failures_are_significant() {
        let a = assembler(Arc::new(EchoAssessor::default()));
        let base = group(vec![("job", vec![row(100, 100, 0)])]);
        let sample = group(vec![("job", vec![row(100, 95, 0)])]);
        let identity = TestIdentity::default();
        let window = base_window();

        let report = a.assemble(&input(&identity, &window, &base, &sample));

        assert!(report.job_stats[0].significant);
    }

    #[test]
    fn job_that_improves_on_base_is_not_significant() {
        let a = assembler(Arc::new(EchoAssessor::default()));
        let base = group(vec![("job", vec![row(100, 90, 0)])]);
        let sample = group(vec![("job", vec![row(100, 100, 0)])]);
        let identity = TestIdentity::default();
        let window = base_window();

        let report = a.assemble(&input(&identity, &window, &base, &sample));

        assert!(!report.job_stats[0].significant);
    }

    #[test]
    fn flake_policy_changes_significance_not_display() {
        let a = assembler(Arc::new(EchoAssessor::default()));
        let base = group(vec![("job", vec![row(100, 100, 0)])]);
        let sample = group(vec![("job", vec![row(100, 88, 12)])]);
        let identity = TestIdentity::default();
        let window = base_window();

        let lenient = a.assemble(&input(&identity, &window, &base, &sample));
        let mut strict_input = input(&identity, &window, &base, &sample);
        strict_input.flake_as_failure = true;
        let strict = a.assemble(&strict_input);

        assert!(!lenient.job_stats[0].significant);
        assert!(strict.job_stats[0].significant);
        assert_eq!(lenient.job_stats[0].sample_stats, strict.job_stats[0].sample_stats);
        assert_eq!(strict.job_stats[0].sample_stats.failure_count, 0);
        assert_eq!(strict.job_stats[0].sample_stats.success_rate, 1.0);
    }

    #[test]
    fn jira_attribution_prefers_first_non_empty_in_visit_order() {
        let a = assembler(Arc::new(EchoAssessor::default()));
        let base = group(vec![
            ("job-b", vec![jira_row(Some("Etcd"), Some(7))]),
            ("job-a", vec![jira_row(Some(""), None), jira_row(None, Some(3))]),
        ]);
        let sample = group(vec![
            ("job-a", vec![jira_row(Some("Networking"), Some(9))]),
            ("job-0", vec![jira_row(Some("Storage"), Some(1))]),
        ]);
        let identity = TestIdentity::default();
        let window = base_window();

        let report = a.assemble(&input(&identity, &window, &base, &sample));

        // job-a base rows, then job-a sample rows, then job-b; sample-only job-0 last.
        assert_eq!(report.jira_component.as_deref(), Some("Networking"));
        assert_eq!(report.jira_component_id, Some(3));
    }

    #[test]
    fn base_regression_rebaselines_totals() {
        let assessor = Arc::new(EchoAssessor::default());
        let a = assembler(assessor.clone());
        let base = group(vec![("job", vec![row(100, 80, 0)])]);
        let sample = group(vec![("job", vec![row(100, 78, 0)])]);
        let regression = AllowanceRecord {
            release: "4.15".into(),
            previous_successes: 98,
            previous_failures: 2,
            ..Default::default()
        };
        let identity = TestIdentity::default();
        let window = base_window();
        let mut assembly = input(&identity, &window, &base, &sample);
        assembly.base_regression = Some(&regression);

        let report = a.assemble(&assembly);

        let base_stats = report.stats.base_stats.unwrap();
        assert_eq!(base_stats.release, "4.14");
        assert_eq!(base_stats.stats.success_count, 98);
        assert_eq!(base_stats.stats.failure_count, 2);
        // Per-job figures are never rebaselined.
        assert_eq!(report.job_stats[0].base_stats.success_count, 80);
    }

    #[test]
    fn empty_groups_produce_empty_report() {
        let assessor = Arc::new(EchoAssessor::default());
        let a = assembler(assessor.clone());
        let empty = JobRunGroup::new();
        let identity = TestIdentity::default();
        let window = base_window();

        let report = a.assemble(&input(&identity, &window, &empty, &empty));

        assert!(report.job_stats.is_empty());
        assert_eq!(report.jira_component, None);
        assert_eq!(report.stats.sample_stats.success_rate, 0.0);
    }
}
