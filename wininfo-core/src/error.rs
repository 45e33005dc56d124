use thiserror::Error;

#[derive(Error, Debug)]
pub enum InfoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A single candidate check failed. Callers treat this as absence.
    #[error("Probe failed for {path}: {message}")]
    Probe { path: String, message: String },

    /// The whole registry enumeration failed.
    #[error("Registry access failed: {0}")]
    RegistryAccess(String),

    /// The external locator exited non-zero or produced malformed output.
    #[error("External locator failed: {0}")]
    ExternalLocator(String),

    #[error("Watch subscription failed: {0}")]
    WatchSubscription(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InfoError {
    pub fn probe(path: impl AsRef<std::path::Path>, message: impl Into<String>) -> Self {
        InfoError::Probe {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InfoError>;
