//! Triage and open-regression lookups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{TestIdentity, Variants};

/// Reports how many failures of a test are explained by triaged incidents.
#[async_trait]
pub trait TriageResolver: Send + Sync {
    async fn triaged_incidents_for(&self, identity: &TestIdentity) -> Result<u64>;
}

/// No triage data: compensation is always zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTriage;

#[async_trait]
impl TriageResolver for NoTriage {
    async fn triaged_incidents_for(&self, _identity: &TestIdentity) -> Result<u64> {
        Ok(0)
    }
}

/// A regression currently tracked as open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRegression {
    pub id: i64,
    pub release: String,
    pub test_id: String,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub variants: Variants,
    pub opened: DateTime<Utc>,
    #[serde(default)]
    pub closed: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RegressionStore: Send + Sync {
    async fn list_current_regressions(&self) -> Result<Vec<OpenRegression>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRegressions;

#[async_trait]
impl RegressionStore for NoRegressions {
    async fn list_current_regressions(&self) -> Result<Vec<OpenRegression>> {
        Ok(Vec::new())
    }
}

pub fn filter_for_release(regressions: Vec<OpenRegression>, release: &str) -> Vec<OpenRegression> {
    regressions
        .into_iter()
        .filter(|r| r.release == release)
        .collect()
}

/// The open regression for exactly this test and variant combination.
pub fn find_for_identity<'a>(
    regressions: &'a [OpenRegression],
    identity: &TestIdentity,
) -> Option<&'a OpenRegression> {
    regressions
        .iter()
        .find(|r| {
            r.closed.is_none()
                && r.test_id == identity.test_id
                && r.variants == identity.variants
        })
}
