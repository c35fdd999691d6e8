use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cache::CacheOptions;
use crate::error::{ReadinessError, Result};

pub const DEFAULT_PROW_URL: &str = "https://prow.ci.openshift.org";
pub const DEFAULT_GCS_BUCKET: &str = "test-platform-results";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the job viewer; run links are built under `<prow_url>/view/gs/`.
    pub prow_url: String,
    /// Storage bucket holding job artifacts.
    pub gcs_bucket: String,
    /// Cache policy for requests that carry none of their own.
    #[serde(default)]
    pub cache: CacheOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prow_url: DEFAULT_PROW_URL.to_string(),
            gcs_bucket: DEFAULT_GCS_BUCKET.to_string(),
            cache: CacheOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `path` when it exists, otherwise build from
    /// `READINESS_PROW_URL`, `READINESS_GCS_BUCKET` and
    /// `READINESS_CACHE_TTL_SECS`, falling back to built-in defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<EngineConfig>(&content) {
                    Ok(config) => {
                        tracing::info!(
                            "Loaded engine config from {}: prow_url={}, gcs_bucket={}",
                            path.display(),
                            config.prow_url,
                            config.gcs_bucket
                        );
                        return config;
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to parse {}: {}, using defaults",
                            path.display(),
                            e
                        );
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read {}: {}, using defaults", path.display(), e);
                }
            }
        }

        let prow_url = std::env::var("READINESS_PROW_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROW_URL.to_string());
        let gcs_bucket = std::env::var("READINESS_GCS_BUCKET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GCS_BUCKET.to_string());

        let mut cache = CacheOptions::default();
        if let Ok(raw) = std::env::var("READINESS_CACHE_TTL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(ttl) => cache.ttl_secs = ttl,
                Err(e) => tracing::warn!(
                    "Ignoring READINESS_CACHE_TTL_SECS={:?}: {}",
                    raw,
                    e
                ),
            }
        }

        EngineConfig {
            prow_url: prow_url.trim_end_matches('/').to_string(),
            gcs_bucket,
            cache,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.prow_url.trim().is_empty() {
            return Err(ReadinessError::Config("prow_url must not be empty".to_string()));
        }
        if self.gcs_bucket.trim().is_empty() {
            return Err(ReadinessError::Config(
                "gcs_bucket must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Prefix shared by every run link: `<prow_url>/view/gs/<bucket>/`.
    pub fn viewer_base(&self) -> String {
        format!("{}/view/gs/{}/", self.prow_url, self.gcs_bucket)
    }
}
