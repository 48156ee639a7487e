//! Declaration-emitter errors

use thiserror::Error;

pub type DeclResult<T> = Result<T, DeclError>;

#[derive(Debug, Error)]
pub enum DeclError {
    #[error("Invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Failed to decode comparability summary: {0}")]
    BadComparabilitySummary(#[from] bincode::Error),

    #[error("Type resolution failed: {0}")]
    Type(#[from] weft_types::TypeError),
}
