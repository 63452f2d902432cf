use thiserror::Error;

/// Error taxonomy of the hub core.
///
/// `Validation`, `Ineligible`, `NotFound` and `Conflict` surface to the
/// caller before any persistence happens. Once a scan row exists, failures
/// are recorded on the scan itself (`FailScan`) rather than raised back,
/// because the original caller may no longer be connected.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// A soft outcome, not a system error: the package/module/container is
    /// administratively or structurally excluded from scanning.
    #[error("{0}")]
    Ineligible(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Unpack/diff/load failure; always attributable to a specific scan.
    #[error("pipeline failure: {0}")]
    Pipeline(String),

    /// Opaque failure from the external job system.
    #[error("broker failure: {0}")]
    Broker(String),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<scanhub_model::ModelError> for HubError {
    fn from(err: scanhub_model::ModelError) -> Self {
        HubError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
