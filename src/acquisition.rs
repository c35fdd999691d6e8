//! Concurrent row acquisition for the base, base-override and sample buckets.
//!
//! One task per bucket, each owning its own result slot. Handles are joined
//! in a fixed order so errors always read base-override, base, sample.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{cache_key, get_or_generate, CacheLayer, CacheOptions};
use crate::error::{ErrorList, ReadinessError, Result};
use crate::source::{cross_compare_filter, Bucket, CrossCompareFilter, RowQuery, RowSource};
use crate::types::{JobRunGroup, ReleaseWindow, RequestOptions, TestScope, Variants};

/// Row groups for each requested bucket. A bucket skipped by cancellation is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquiredRows {
    /// Present only when a distinct override release was requested.
    pub base_override: Option<JobRunGroup>,
    pub base: JobRunGroup,
    pub sample: JobRunGroup,
}

/// Everything that decides which rows a bucket fetch returns.
#[derive(Serialize)]
struct FetchKey<'a> {
    window: &'a ReleaseWindow,
    base_release: &'a ReleaseWindow,
    base_override_release: Option<&'a ReleaseWindow>,
    sample_release: &'a ReleaseWindow,
    test: &'a TestScope,
    requested_variants: &'a Variants,
    db_group_by: &'a BTreeSet<String>,
    variant_cross_compare: &'a [String],
    compare_variants: &'a BTreeMap<String, Vec<String>>,
}

struct FetchPlan {
    query: RowQuery,
    key: Result<String>,
}

/// Sample rows are restricted by the cross-compare filter; those groups are
/// dropped from its exact-match variants. Base rows match exactly.
fn row_query(request: &RequestOptions, bucket: Bucket, window: &ReleaseWindow) -> RowQuery {
    let opts = &request.variants;
    let (variants, cross_compare) = match bucket {
        Bucket::Sample => {
            let variants = opts
                .requested_variants
                .iter()
                .filter(|(name, _)| !opts.variant_cross_compare.contains(*name))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let filter = cross_compare_filter(&opts.variant_cross_compare, &opts.compare_variants);
            (variants, filter)
        }
        Bucket::Base | Bucket::BaseOverride => (
            opts.requested_variants.clone(),
            CrossCompareFilter::default(),
        ),
    };
    RowQuery {
        bucket,
        window: window.clone(),
        test: request.test.clone(),
        variants,
        cross_compare,
    }
}

fn fetch_plan(request: &RequestOptions, bucket: Bucket, window: &ReleaseWindow) -> FetchPlan {
    let key = cache_key(
        bucket.cache_prefix(),
        &FetchKey {
            window,
            base_release: &request.base_release,
            base_override_release: request.base_override_release.as_ref(),
            sample_release: &request.sample_release,
            test: &request.test,
            requested_variants: &request.variants.requested_variants,
            db_group_by: &request.variants.db_group_by,
            variant_cross_compare: &request.variants.variant_cross_compare,
            compare_variants: &request.variants.compare_variants,
        },
    );
    FetchPlan {
        query: row_query(request, bucket, window),
        key,
    }
}

pub struct AcquisitionOrchestrator {
    rows: Arc<dyn RowSource>,
    cache: Arc<dyn CacheLayer>,
}

impl AcquisitionOrchestrator {
    pub fn new(rows: Arc<dyn RowSource>, cache: Arc<dyn CacheLayer>) -> Self {
        Self { rows, cache }
    }

    /// Fetches every bucket the request needs and waits for all of them.
    ///
    /// Any fetch error voids the result; the returned list holds every error
    /// in bucket order.
    pub async fn acquire(
        &self,
        request: &RequestOptions,
        options: &CacheOptions,
        cancel: &CancellationToken,
    ) -> std::result::Result<AcquiredRows, ErrorList> {
        let override_handle = request.distinct_base_override().map(|window| {
            self.spawn_fetch(
                fetch_plan(request, Bucket::BaseOverride, window),
                options,
                cancel,
            )
        });
        let base_handle = self.spawn_fetch(
            fetch_plan(request, Bucket::Base, &request.base_release),
            options,
            cancel,
        );
        let sample_handle = self.spawn_fetch(
            fetch_plan(request, Bucket::Sample, &request.sample_release),
            options,
            cancel,
        );

        let mut errors = ErrorList::default();
        let base_override = match override_handle {
            Some(handle) => Some(join_fetch(Bucket::BaseOverride, handle, &mut errors).await),
            None => None,
        };
        let base = join_fetch(Bucket::Base, base_handle, &mut errors).await;
        let sample = join_fetch(Bucket::Sample, sample_handle, &mut errors).await;

        if !errors.is_empty() {
            tracing::warn!("[ACQUIRE] {} fetch error(s): {}", errors.len(), errors);
            return Err(errors);
        }
        Ok(AcquiredRows {
            base_override,
            base,
            sample,
        })
    }

    fn spawn_fetch(
        &self,
        plan: FetchPlan,
        options: &CacheOptions,
        cancel: &CancellationToken,
    ) -> JoinHandle<Result<Option<JobRunGroup>>> {
        let rows = self.rows.clone();
        let cache = self.cache.clone();
        let options = options.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let FetchPlan { query, key } = plan;
            let bucket = query.bucket;
            if cancel.is_cancelled() {
                tracing::info!("[ACQUIRE] {} fetch skipped, request cancelled", bucket);
                return Ok(None);
            }
            let key = key?;
            tracing::debug!(
                "[ACQUIRE] {} fetch release={} key={}",
                bucket,
                query.window.release,
                key
            );
            let group: JobRunGroup = get_or_generate(cache.as_ref(), &options, &key, async move {
                rows.query(&query).await
            })
            .await?;
            tracing::debug!("[ACQUIRE] {} fetched {} job(s)", bucket, group.len());
            Ok(Some(group))
        })
    }
}

async fn join_fetch(
    bucket: Bucket,
    handle: JoinHandle<Result<Option<JobRunGroup>>>,
    errors: &mut ErrorList,
) -> JobRunGroup {
    match handle.await {
        Ok(Ok(group)) => group.unwrap_or_default(),
        Ok(Err(e)) => {
            errors.0.push(e);
            JobRunGroup::new()
        }
        Err(e) => {
            tracing::warn!("[ACQUIRE] {} join error: {}", bucket, e);
            errors.0.push(ReadinessError::TaskJoin {
                bucket: bucket.to_string(),
                message: e.to_string(),
            });
            JobRunGroup::new()
        }
    }
}
