use std::path::PathBuf;

/// Failures surfaced by the prediction cache and the remote summary service.
///
/// `Clone` because one in-flight fetch result is handed to every caller that
/// joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Transport failure or non-2xx response from the risk summary service
    #[error("risk summary fetch failed: {0}")]
    Fetch(String),

    /// Malformed remote payload
    #[error("malformed risk summary: {0}")]
    Parse(String),

    /// Nothing cached and nothing fetchable
    #[error("no student risk data available: {cause}")]
    NoData { cause: Box<CacheError> },
}

impl CacheError {
    pub fn no_data(cause: CacheError) -> Self {
        match cause {
            already @ CacheError::NoData { .. } => already,
            other => CacheError::NoData {
                cause: Box::new(other),
            },
        }
    }
}

/// Failures reading or clearing the persisted prediction store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored payload could not be decoded
    #[error("corrupt persisted data under '{key}': {message}")]
    Corrupt { key: String, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }
}
