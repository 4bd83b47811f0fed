/// Problems with the output configuration, detected before or at the first
/// record that needs the offending piece.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid output command '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
    #[error("invalid event selection '{spec}': {reason}")]
    InvalidSelectEvents { spec: String, reason: String },
    #[error("event selection '{spec}' names path '{path}' unknown to process {process}")]
    UnknownPath {
        spec: String,
        path: String,
        process: String,
    },
    #[error("event selection '{spec}' needs trigger results from process {process}, none found")]
    MissingTriggerResults { spec: String, process: String },
    #[error("event selection '{spec}' matches trigger results of several processes: {candidates:?}")]
    AmbiguousTriggerResults {
        spec: String,
        candidates: Vec<String>,
    },
    #[error("two equivalent branches selected for output: {first} and {second}; drop one of them")]
    DuplicateOutputSelection { first: String, second: String },
}

/// Failures reported by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("corrupt output file {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("{operation} called out of order: {reason}")]
    Ordering {
        operation: &'static str,
        reason: String,
    },
    #[error("storage backend failure: {0}")]
    Backend(#[from] BackendError),
}

impl OutputError {
    pub(crate) fn ordering(operation: &'static str, reason: impl Into<String>) -> Self {
        OutputError::Ordering {
            operation,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OutputError>;
