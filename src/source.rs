//! Boundary to the warehouse holding per-run test outcomes.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{JobRunGroup, ReleaseWindow, TestScope, Variants};

/// Which side of the comparison a row group feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    BaseOverride,
    Base,
    Sample,
}

impl Bucket {
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            Bucket::BaseOverride | Bucket::Base => "BaseJobRunTestStatus~",
            Bucket::Sample => "SampleJobRunTestStatus~",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bucket::BaseOverride => "base-override",
            Bucket::Base => "base",
            Bucket::Sample => "sample",
        };
        f.write_str(name)
    }
}

/// A named array parameter bound into the row query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub values: Vec<String>,
}

/// Extra predicate restricting cross-compared variant groups to allowed values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossCompareFilter {
    /// Conjunction fragment, each clause starting with ` AND `. Empty when unused.
    pub where_clause: String,
    pub params: Vec<QueryParam>,
}

impl CrossCompareFilter {
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Strips everything but ASCII letters, digits and `_` so a variant group
/// name can be embedded in an identifier.
pub fn cleanse(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Builds the predicate for `cross_compare` groups, in sorted group order.
/// Groups with no configured values are skipped.
pub fn cross_compare_filter(
    cross_compare: &[String],
    variant_groups: &BTreeMap<String, Vec<String>>,
) -> CrossCompareFilter {
    let mut filter = CrossCompareFilter::default();
    if variant_groups.is_empty() {
        return filter;
    }

    let mut groups: Vec<&String> = cross_compare.iter().collect();
    groups.sort();
    groups.dedup();

    for group in groups {
        let Some(values) = variant_groups.get(group) else {
            continue;
        };
        if values.is_empty() {
            continue;
        }
        let group = cleanse(group);
        let param_name = format!("CrossVariants{}", group);
        filter.where_clause.push_str(&format!(
            " AND jv_{}.variant_value IN UNNEST(@{})",
            group, param_name
        ));
        filter.params.push(QueryParam {
            name: param_name,
            values: values.clone(),
        });
    }
    filter
}

/// Everything a [`RowSource`] needs to fetch one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowQuery {
    pub bucket: Bucket,
    pub window: ReleaseWindow,
    pub test: TestScope,
    /// Variants every returned row must match exactly.
    pub variants: Variants,
    pub cross_compare: CrossCompareFilter,
}

/// Executes row queries against job-run test outcome data.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Returns rows grouped by job name. No rows is an empty map, not an error.
    async fn query(&self, query: &RowQuery) -> Result<JobRunGroup>;
}
