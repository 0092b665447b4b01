//! Error types shared by every Warp crate.

use thiserror::Error;

/// Errors surfaced by dataset evaluation, SQL backends and mutations.
///
/// Expression-level failures never reach this type: they stay
/// [`crate::Value::Invalid`] until a boolean or numeric coercion is
/// required. Cancellation is not an error either; cancelled work reports
/// an empty successful result.
#[derive(Debug, Error)]
pub enum WarpError {
    /// A column reference did not resolve against a schema.
    #[error("schema error: {0}")]
    Schema(String),

    /// A SQL or stream backend reported an error.
    #[error("backend error: {0}")]
    Backend(String),

    /// An expression produced a value outside its argument domain.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// A mutation was attempted that `can_perform_mutation` rejects.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Serialization of a persisted expression or aggregation failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error from a backend driver.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WarpError {
    /// A duplicate of this error for delivery to multiple waiters of a
    /// shared result. Wrapped driver errors are not cloneable and
    /// collapse to their message.
    #[must_use]
    pub fn cloned(&self) -> Self {
        match self {
            Self::Schema(message) => Self::Schema(message.clone()),
            Self::Backend(message) => Self::Backend(message.clone()),
            Self::Evaluation(message) => Self::Evaluation(message.clone()),
            Self::Contract(message) => Self::Contract(message.clone()),
            Self::Serialization(error) => Self::Backend(error.to_string()),
            Self::Io(error) => Self::Backend(error.to_string()),
        }
    }
}

/// Result type alias used throughout Warp.
pub type Result<T> = std::result::Result<T, WarpError>;
