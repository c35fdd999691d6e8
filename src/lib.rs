//! Regression evidence for a single CI test.
//!
//! Compares a test's pass/fail record in a sample release window against a
//! base window (and optionally a base-override window), job by job and in
//! aggregate, and hands the aggregate evidence to a pluggable assessor.

pub mod acquisition;
pub mod allowance;
pub mod assess;
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod generator;
pub mod release;
pub mod report;
pub mod source;
pub mod stats;
pub mod triage;
pub mod types;

pub use assess::{AssessmentInput, StatusAssessor};
pub use cache::{CacheLayer, CacheOptions, MemoryCache};
pub use config::EngineConfig;
pub use error::{ErrorList, ReadinessError, Result};
pub use generator::{Collaborators, TestDetailsReportGenerator};
pub use source::{Bucket, RowQuery, RowSource};
pub use types::*;
