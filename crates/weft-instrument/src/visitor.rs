//! Runtime visitor linkage
//!
//! The rewritten code calls into `weft.runtime.Visitor`, the black-box
//! runtime component that snapshots variable values and writes trace
//! records. This module appends the method refs those calls target, plus
//! the marker type that brands a module as already instrumented.

use weft_bytecode::{type_flags, MethodRef, Module, TypeDef};

/// Qualified name of the runtime visitor type
pub const VISITOR_TYPE: &str = "weft.runtime.Visitor";

/// Marker type appended to instrumented modules
pub const MARKER_TYPE: &str = "weft.runtime.Instrumented";

/// Method refs into the runtime visitor, installed once per module
#[derive(Debug, Clone, Copy)]
pub struct VisitorRefs {
    /// `invocation_nonce(ppt_id, policy) -> nonce`; a negative nonce
    /// signals that this invocation is sampled out
    pub invocation_nonce: u32,
    /// `enter(nonce, ppt_id)`
    pub enter: u32,
    /// `exit(nonce, ppt_id)`
    pub exit: u32,
    /// `exceptional_exit(nonce, ppt_id)`
    pub exceptional_exit: u32,
    /// `acquire()`: take the trace-writer lock, or signal skip
    pub acquire: u32,
    /// `release()`: release the trace-writer lock
    pub release: u32,
}

impl VisitorRefs {
    /// Append the visitor method refs to a module
    pub fn install(module: &mut Module) -> Self {
        let owner = module.add_plain_type_ref(VISITOR_TYPE);
        let add = |module: &mut Module, name: &str, param_count: u16, returns_value: bool| {
            let name = module.intern_string(name);
            module.add_method_ref(MethodRef {
                owner,
                name,
                param_count,
                returns_value,
                is_static: true,
            })
        };
        Self {
            invocation_nonce: add(module, "invocation_nonce", 2, true),
            enter: add(module, "enter", 2, false),
            exit: add(module, "exit", 2, false),
            exceptional_exit: add(module, "exceptional_exit", 2, false),
            acquire: add(module, "acquire", 0, false),
            release: add(module, "release", 0, false),
        }
    }
}

/// Whether the module carries the already-instrumented marker
pub fn is_instrumented(module: &Module) -> bool {
    module.find_type(MARKER_TYPE).is_some()
}

/// Append the already-instrumented marker type
pub fn append_marker(module: &mut Module) {
    if is_instrumented(module) {
        return;
    }
    let name = module.intern_string(MARKER_TYPE);
    let mut marker = TypeDef::new(name);
    marker.flags = type_flags::SEALED | type_flags::SYNTHETIC;
    module.types.push(marker);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_dedups_refs() {
        let mut module = Module::new("test".to_string());
        let first = VisitorRefs::install(&mut module);
        let second = VisitorRefs::install(&mut module);
        assert_eq!(first.enter, second.enter);
        assert_eq!(first.release, second.release);
        assert_eq!(module.method_refs.len(), 6);
    }

    #[test]
    fn test_marker_round_trip() {
        let mut module = Module::new("test".to_string());
        assert!(!is_instrumented(&module));
        append_marker(&mut module);
        assert!(is_instrumented(&module));
        append_marker(&mut module);
        assert_eq!(module.types.len(), 1);
    }
}
