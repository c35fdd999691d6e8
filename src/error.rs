use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadinessError {
    #[error("test_id has to be defined for test details")]
    MissingTestId,

    #[error("all dbGroupBy variants have to be defined for test details: {0} is missing")]
    MissingGroupByVariant(String),

    #[error("confidence must be in [0, 100], got {0}")]
    InvalidConfidence(u32),

    #[error("row source error ({bucket}): {message}")]
    RowSource { bucket: String, message: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("fetch task for {bucket} failed to join: {message}")]
    TaskJoin { bucket: String, message: String },

    #[error("cannot parse release {0:?}")]
    ReleaseParse(String),

    #[error("triage lookup failed: {0}")]
    Triage(String),

    #[error("regression store error: {0}")]
    RegressionStore(String),

    #[error("report generation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, ReadinessError>;

impl From<std::io::Error> for ReadinessError {
    fn from(e: std::io::Error) -> Self {
        ReadinessError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ReadinessError {
    fn from(e: serde_json::Error) -> Self {
        ReadinessError::Json(e.to_string())
    }
}

impl ReadinessError {
    /// True for errors raised by request validation, before any I/O happens.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ReadinessError::MissingTestId
                | ReadinessError::MissingGroupByVariant(_)
                | ReadinessError::InvalidConfidence(_)
        )
    }
}

/// Every error collected while generating one report, in a fixed order.
#[derive(Error, Debug, Clone, PartialEq, Default)]
#[error("{}", join_messages(.0))]
pub struct ErrorList(pub Vec<ReadinessError>);

fn join_messages(errors: &[ReadinessError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ErrorList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReadinessError> {
        self.0.iter()
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }
}

impl From<ReadinessError> for ErrorList {
    fn from(e: ReadinessError) -> Self {
        ErrorList(vec![e])
    }
}

impl IntoIterator for ErrorList {
    type Item = ReadinessError;
    type IntoIter = std::vec::IntoIter<ReadinessError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_flagged() {
        assert!(ReadinessError::MissingTestId.is_validation());
        assert!(ReadinessError::MissingGroupByVariant("Platform".into()).is_validation());
        assert!(!ReadinessError::Cache("boom".into()).is_validation());
    }

    #[test]
    fn error_list_joins_messages_in_order() {
        let errs = ErrorList(vec![
            ReadinessError::Cache("first".into()),
            ReadinessError::Triage("second".into()),
        ]);
        assert_eq!(
            errs.to_string(),
            "cache error: first; triage lookup failed: second"
        );
    }

    #[test]
    fn single_error_converts_to_one_element_list() {
        let errs: ErrorList = ReadinessError::MissingTestId.into();
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn json_error_converts() {
        let err: ReadinessError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ReadinessError::Json(_)));
    }
}
