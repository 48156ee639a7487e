//! Instrumentation options

use std::path::PathBuf;
use weft_decls::PrintOptions;

/// Everything the driver needs beyond the target module itself.
///
/// Pattern fields hold raw regex source; they are compiled when the
/// declaration printer is built so a bad pattern fails the run up front.
#[derive(Debug, Clone)]
pub struct InstrumentOptions {
    /// Maximum field-nesting depth in declarations
    pub nesting_depth: u32,
    /// Program points matching this pattern are omitted
    pub ppt_omit: Option<String>,
    /// When present, only matching program points are emitted
    pub ppt_select: Option<String>,
    /// Variables matching this pattern are omitted
    pub var_omit: Option<String>,
    /// Purity file listing side-effect-free methods
    pub purity_file: Option<PathBuf>,
    /// Comparability summary from a prior dynamic-comparability run
    pub comparability_file: Option<PathBuf>,
    /// Record every invocation up to this count, then sample
    pub sample_start: i32,
    /// Print declarations without rewriting any bytecode
    pub decls_only: bool,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            nesting_depth: PrintOptions::DEFAULT_NESTING_DEPTH,
            ppt_omit: None,
            ppt_select: None,
            var_omit: None,
            purity_file: None,
            comparability_file: None,
            sample_start: 0,
            decls_only: false,
        }
    }
}
