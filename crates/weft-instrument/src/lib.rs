//! Bytecode rewriting engine for the Weft instrumenter.
//!
//! Given a loaded `.wfm` module, this crate plans every instrumentable
//! method, prints its program-point declarations through [`weft_decls`],
//! and rewrites each body so the runtime visitor observes entry, a
//! single unified exit, and exceptional exits. The rewritten module is
//! branded with a marker type and re-verified before it is handed back.

pub mod driver;
pub mod error;
pub mod labels;
pub mod options;
pub mod rewriter;
pub mod visitor;

pub use driver::{instrument_file, instrument_module, InstrumentOutcome};
pub use error::{InstrumentError, InstrumentResult};
pub use labels::{Arg, Assembled, CodeBuffer, Label};
pub use options::InstrumentOptions;
pub use rewriter::{return_offsets, MethodRewriter, MethodShape, ThrownType, STACK_HEADROOM};
pub use visitor::{append_marker, is_instrumented, VisitorRefs, MARKER_TYPE, VISITOR_TYPE};
