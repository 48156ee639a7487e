//! Instrumentation errors
//!
//! Structural problems in a method body are fatal for that method and
//! propagate; the driver decides whether to abort the module. A module
//! that was already instrumented aborts the whole run.

use thiserror::Error;
use weft_bytecode::{DecodeError, ModuleError, VerifyError};
use weft_types::TypeError;

pub type InstrumentResult<T> = Result<T, InstrumentError>;

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("Module load failed: {0}")]
    Load(#[from] ModuleError),

    #[error("Module already instrumented (marker type present)")]
    AlreadyInstrumented,

    #[error("Code decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Branch target {target:#x} does not fall on an instruction boundary")]
    BadBranchTarget { target: u32 },

    #[error("Exception region boundary {offset:#x} does not fall on an instruction boundary")]
    BadRegionBoundary { offset: u32 },

    #[error("Label {0} was never bound")]
    UnboundLabel(u32),

    #[error("Method body is empty")]
    EmptyBody,

    #[error("Rewritten module failed verification: {0}")]
    Verify(#[from] VerifyError),

    #[error("Type resolution failed: {0}")]
    Type(#[from] TypeError),

    #[error("Declaration printing failed: {0}")]
    Decl(#[from] weft_decls::DeclError),

    #[error("Debug info absent but required for comparability analysis")]
    DebugInfoRequired,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
