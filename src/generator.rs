//! Top-level test details report generation.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::acquisition::AcquisitionOrchestrator;
use crate::allowance::{AllowanceResolver, StaticAllowances};
use crate::assess::StatusAssessor;
use crate::cache::{cache_key, get_or_generate, CacheLayer, CacheOptions, NoCache};
use crate::config::EngineConfig;
use crate::error::{ErrorList, ReadinessError, Result};
use crate::fallback::{resolve_allowances, resolve_compensation};
use crate::release::{MinorReleaseResolver, ReleaseResolver};
use crate::report::{AssemblyInput, ReportAssembler};
use crate::source::RowSource;
use crate::triage::{
    filter_for_release, find_for_identity, NoRegressions, NoTriage, RegressionStore,
    TriageResolver,
};
use crate::types::{
    AdvancedOptions, OverrideContext, ReleaseWindow, Report, RequestOptions, TestScope,
    VariantOptions,
};

pub const REPORT_CACHE_PREFIX: &str = "TestDetailsReport~";

/// External capabilities the generator calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub row_source: Arc<dyn RowSource>,
    pub cache: Arc<dyn CacheLayer>,
    pub allowances: Arc<dyn AllowanceResolver>,
    pub triage: Arc<dyn TriageResolver>,
    pub releases: Arc<dyn ReleaseResolver>,
    pub assessor: Arc<dyn StatusAssessor>,
    pub regressions: Arc<dyn RegressionStore>,
}

impl Collaborators {
    /// Rows and assessment are required; everything else starts empty and
    /// uncached.
    pub fn new(row_source: Arc<dyn RowSource>, assessor: Arc<dyn StatusAssessor>) -> Self {
        Self {
            row_source,
            cache: Arc::new(NoCache),
            allowances: Arc::new(StaticAllowances::new()),
            triage: Arc::new(NoTriage),
            releases: Arc::new(MinorReleaseResolver),
            assessor,
            regressions: Arc::new(NoRegressions),
        }
    }
}

/// Everything that decides the content of a finished report.
#[derive(Serialize)]
struct ReportKey<'a> {
    prow_url: &'a str,
    gcs_bucket: &'a str,
    base_release: &'a ReleaseWindow,
    base_override_release: Option<&'a ReleaseWindow>,
    sample_release: &'a ReleaseWindow,
    test: &'a TestScope,
    variants: &'a VariantOptions,
    advanced: &'a AdvancedOptions,
}

pub struct TestDetailsReportGenerator {
    request: RequestOptions,
    config: EngineConfig,
    /// The request's cache policy, or the configured one when it has none.
    cache: CacheOptions,
    collaborators: Collaborators,
    acquisition: AcquisitionOrchestrator,
    assembler: ReportAssembler,
}

impl TestDetailsReportGenerator {
    /// Fails with [`ReadinessError::Config`] when `config` is unusable.
    pub fn new(
        config: EngineConfig,
        request: RequestOptions,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let cache = request.cache.clone().unwrap_or_else(|| config.cache.clone());
        let acquisition = AcquisitionOrchestrator::new(
            collaborators.row_source.clone(),
            collaborators.cache.clone(),
        );
        let assembler = ReportAssembler::new(
            &config,
            collaborators.releases.clone(),
            collaborators.assessor.clone(),
        );
        Ok(Self {
            request,
            config,
            cache,
            collaborators,
            acquisition,
            assembler,
        })
    }

    pub fn request(&self) -> &RequestOptions {
        &self.request
    }

    /// Request checks that run before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.request.test.test_id.is_empty() {
            return Err(ReadinessError::MissingTestId);
        }
        for name in &self.request.variants.db_group_by {
            if !self.request.variants.requested_variants.contains_key(name) {
                return Err(ReadinessError::MissingGroupByVariant(name.clone()));
            }
        }
        if self.request.advanced.confidence > 100 {
            return Err(ReadinessError::InvalidConfidence(
                self.request.advanced.confidence,
            ));
        }
        Ok(())
    }

    /// Builds the report without the report-level cache.
    ///
    /// With a distinct base-override release the returned report compares
    /// against the override, and the comparison against the regular base
    /// is attached as `base_override_report`.
    pub async fn generate(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<Report, ErrorList> {
        self.validate()?;

        let started = Instant::now();
        let rows = self
            .acquisition
            .acquire(&self.request, &self.cache, cancel)
            .await?;
        tracing::info!(
            "[TEST-DETAILS] acquired rows for {} in {:?} with {} sample and {} base job(s)",
            self.request.test.test_id,
            started.elapsed(),
            rows.sample.len(),
            rows.base.len()
        );
        let generated_at = Utc::now();

        let open_regressions = filter_for_release(
            self.collaborators.regressions.list_current_regressions().await?,
            &self.request.sample_release.release,
        );

        let identity = self.request.identity();
        let open_regression = find_for_identity(&open_regressions, &identity);
        let advanced = &self.request.advanced;
        let sample_release = &self.request.sample_release.release;

        let allowances = resolve_allowances(
            self.collaborators.allowances.as_ref(),
            &identity,
            sample_release,
            &self.request.base_release.release,
            advanced.include_multi_release_analysis,
        );
        let compensation = resolve_compensation(
            self.collaborators.triage.as_ref(),
            &identity,
            allowances.approved.as_ref(),
        )
        .await;

        let mut report = self.assembler.assemble(&AssemblyInput {
            identity: &identity,
            base_window: &self.request.base_release,
            base_rows: &rows.base,
            sample_rows: &rows.sample,
            approved_regression: allowances.approved.as_ref(),
            base_regression: allowances.base_regression.as_ref(),
            open_regression,
            resolved_issue_compensation: compensation,
            confidence: advanced.confidence,
            flake_as_failure: advanced.flake_as_failure,
        });
        report.generated_at = Some(generated_at);

        let (Some(override_window), Some(override_rows)) =
            (self.request.distinct_base_override(), rows.base_override.as_ref())
        else {
            return Ok(report);
        };

        let override_allowances = resolve_allowances(
            self.collaborators.allowances.as_ref(),
            &identity,
            sample_release,
            &override_window.release,
            advanced.include_multi_release_analysis,
        );
        let mut override_report = self.assembler.assemble(&AssemblyInput {
            identity: &identity,
            base_window: override_window,
            base_rows: override_rows,
            sample_rows: &rows.sample,
            approved_regression: override_allowances.approved.as_ref(),
            base_regression: override_allowances.base_regression.as_ref(),
            open_regression,
            resolved_issue_compensation: compensation,
            confidence: advanced.confidence,
            flake_as_failure: advanced.flake_as_failure,
        });
        override_report.generated_at = Some(generated_at);
        override_report.base_override_report = Some(OverrideContext {
            stats: report.stats,
            job_stats: report.job_stats,
        });
        tracing::debug!(
            "[TEST-DETAILS] returning override report against {}",
            override_window.release
        );
        Ok(override_report)
    }

    /// Cached entry point. A report whose generation was cancelled is
    /// returned as [`ReadinessError::Cancelled`] and never stored.
    pub async fn get_test_details(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<Report, ErrorList> {
        self.validate()?;

        let key = cache_key(
            REPORT_CACHE_PREFIX,
            &ReportKey {
                prow_url: &self.config.prow_url,
                gcs_bucket: &self.config.gcs_bucket,
                base_release: &self.request.base_release,
                base_override_release: self.request.base_override_release.as_ref(),
                sample_release: &self.request.sample_release,
                test: &self.request.test,
                variants: &self.request.variants,
                advanced: &self.request.advanced,
            },
        )?;

        let mut failed: Option<ErrorList> = None;
        let outcome = get_or_generate(
            self.collaborators.cache.as_ref(),
            &self.cache,
            &key,
            async {
                match self.generate(cancel).await {
                    Ok(_) if cancel.is_cancelled() => Err(ReadinessError::Cancelled),
                    Ok(report) => Ok(report),
                    Err(errors) => {
                        let first = errors
                            .iter()
                            .next()
                            .cloned()
                            .unwrap_or(ReadinessError::Cancelled);
                        failed = Some(errors);
                        Err(first)
                    }
                }
            },
        )
        .await;

        match outcome {
            Ok(report) => Ok(report),
            Err(e) => Err(failed.unwrap_or_else(|| ErrorList::from(e))),
        }
    }
}
