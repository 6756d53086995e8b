use std::path::PathBuf;
use thiserror::Error;

/// Failure modes of registry construction and classification.
#[derive(Error, Debug)]
pub enum CascadeError {
    /// An artifact is missing, unreadable or disagrees with its catalog.
    /// Raised only while the registry is being built.
    #[error("Failed to load model {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// The router picked something the catalog does not contain
    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    /// Input bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// A classifier failed while evaluating a tensor
    #[error("Model evaluation failed: {0}")]
    ModelEvaluation(String),

    /// A catalog was built with missing or duplicated entries
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),
}

impl CascadeError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CascadeError::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the caller supplied bad input, as opposed to a server-side fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, CascadeError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
