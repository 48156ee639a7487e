//! Type resolution errors

use thiserror::Error;

pub type TypeResult<T> = Result<T, TypeError>;

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("Unknown type: {name}")]
    UnknownType { name: String },

    #[error("Malformed type name `{name}`: {reason}")]
    MalformedName { name: String, reason: String },

    #[error("Arity mismatch for {name}: expected {expected} generic arguments, got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Type-ref index {index} out of range")]
    BadTypeRef { index: u32 },

    #[error("Generic parameter has no constraints: {name}")]
    UnconstrainedParameter { name: String },
}
