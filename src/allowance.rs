//! Approved ("intentional") regressions.
//!
//! An allowance records that a test was allowed to regress in a release,
//! together with the pass figures it had before the regression. Records are
//! read-only here; they are produced by separate tooling as one JSON list
//! per release.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stats::{policy_pass_rate, Counts};
use crate::types::Variants;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSet {
    #[serde(default)]
    pub variants: Variants,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllowanceRecord {
    /// Release the regression was approved for. Not stored in the file; set on load.
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub jira_component: String,
    #[serde(rename = "TestID")]
    pub test_id: String,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub jira_bug: String,
    #[serde(default)]
    pub reason_to_allow_instead_of_fix: String,
    #[serde(rename = "variant", default)]
    pub variant: VariantSet,
    #[serde(default)]
    pub previous_successes: u64,
    #[serde(default)]
    pub previous_failures: u64,
    #[serde(default)]
    pub previous_flakes: u64,
    #[serde(default)]
    pub regressed_successes: u64,
    #[serde(default)]
    pub regressed_failures: u64,
    #[serde(default)]
    pub regressed_flakes: u64,
}

impl AllowanceRecord {
    /// Counts from the window before the regression was approved.
    pub fn previous_counts(&self) -> Counts {
        Counts::new(
            self.previous_successes,
            self.previous_failures,
            self.previous_flakes,
        )
    }

    /// Counts observed in the regressed window; the approved threshold.
    pub fn regressed_counts(&self) -> Counts {
        Counts::new(
            self.regressed_successes,
            self.regressed_failures,
            self.regressed_flakes,
        )
    }

    pub fn previous_pass_percentage(&self, flake_as_failure: bool) -> f64 {
        policy_pass_rate(
            self.previous_successes,
            self.previous_failures,
            self.previous_flakes,
            flake_as_failure,
        )
    }

    pub fn regressed_pass_percentage(&self, flake_as_failure: bool) -> f64 {
        policy_pass_rate(
            self.regressed_successes,
            self.regressed_failures,
            self.regressed_flakes,
            flake_as_failure,
        )
    }
}

/// Looks up approved regressions by release, variant set and test id.
pub trait AllowanceResolver: Send + Sync {
    fn lookup(&self, release: &str, variants: &Variants, test_id: &str) -> Option<AllowanceRecord>;
}

type AllowanceKey = (String, String, String);

fn variant_key(variants: &Variants) -> String {
    variants
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// In-memory allowances, loaded from the per-release JSON lists.
#[derive(Debug, Default, Clone)]
pub struct StaticAllowances {
    records: HashMap<AllowanceKey, AllowanceRecord>,
}

impl StaticAllowances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one record. A later record for the same release, variants and
    /// test replaces the earlier one.
    pub fn insert(&mut self, record: AllowanceRecord) {
        let key = (
            record.release.clone(),
            variant_key(&record.variant.variants),
            record.test_id.clone(),
        );
        if self.records.insert(key, record).is_some() {
            tracing::warn!("[ALLOWANCE] duplicate allowance replaced an earlier record");
        }
    }

    /// Parses a JSON list of records approved for `release`.
    pub fn load_json(&mut self, release: &str, json: &str) -> Result<usize> {
        let records: Vec<AllowanceRecord> = serde_json::from_str(json)?;
        let count = records.len();
        for mut record in records {
            record.release = release.to_string();
            self.insert(record);
        }
        tracing::debug!("[ALLOWANCE] loaded {} record(s) for {}", count, release);
        Ok(count)
    }

    pub fn load_file(&mut self, release: &str, path: &Path) -> Result<usize> {
        let data = std::fs::read_to_string(path)?;
        self.load_json(release, &data)
    }

    pub fn from_json(release: &str, json: &str) -> Result<Self> {
        let mut allowances = Self::new();
        allowances.load_json(release, json)?;
        Ok(allowances)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AllowanceResolver for StaticAllowances {
    fn lookup(&self, release: &str, variants: &Variants, test_id: &str) -> Option<AllowanceRecord> {
        let key = (release.to_string(), variant_key(variants), test_id.to_string());
        self.records.get(&key).cloned()
    }
}
