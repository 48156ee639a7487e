//! Variable declaration records
//!
//! One [`VariableRecord`] per declared variable, written as a block in
//! the order-sensitive decls output. Records are built during a single
//! traversal pass and never mutated after emission.

use crate::flags::VarFlags;
use std::fmt::Write;

/// Coarse value-format category used by the trace consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepType {
    Boolean,
    Int,
    Double,
    /// Java-style string token, kept for consumer compatibility
    String,
    /// Opaque reference identity
    Hashcode,
}

impl RepType {
    /// The exact output token
    pub fn token(self) -> &'static str {
        match self {
            RepType::Boolean => "boolean",
            RepType::Int => "int",
            RepType::Double => "double",
            RepType::String => "java.lang.String",
            RepType::Hashcode => "hashcode",
        }
    }
}

/// Kind of a declared variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Instance or static field reached through an enclosing variable
    Field,
    /// Derived value (pure-method result, `GetType()`, `toString`)
    Function,
    /// Element sequence of a list, set, map or array
    Array,
    /// Top-level variable (`this`, a parameter)
    Variable,
    /// Method return value
    Return,
}

impl VarKind {
    /// The exact output token
    pub fn token(self) -> &'static str {
        match self {
            VarKind::Field => "field",
            VarKind::Function => "function",
            VarKind::Array => "array",
            VarKind::Variable => "variable",
            VarKind::Return => "return",
        }
    }
}

/// Reference from a variable or program point to a parent program point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    /// Parent program-point name
    pub ppt: String,
    /// Relation id shared between the ppt header and its variables
    pub relation: u32,
    /// Name the variable carries at the parent, when it differs
    pub var: Option<String>,
}

impl ParentRef {
    /// Parent reference without a variable-name mapping
    pub fn new(ppt: impl Into<String>, relation: u32) -> Self {
        Self {
            ppt: ppt.into(),
            relation,
            var: None,
        }
    }
}

/// One emitted variable declaration
#[derive(Debug, Clone)]
pub struct VariableRecord {
    /// Full dotted/bracketed name path
    pub name: String,
    /// Variable kind
    pub kind: VarKind,
    /// Relative name within the enclosing variable (field or method name)
    pub relative_name: Option<String>,
    /// Name of the enclosing variable, when nested
    pub enclosing_var: Option<String>,
    /// Whether this record is a sequence of elements
    pub is_array: bool,
    /// Declared-type string
    pub dec_type: String,
    /// Coarse output category
    pub rep_type: RepType,
    /// Flag set
    pub flags: VarFlags,
    /// Comparability group id
    pub comparability: i32,
    /// Element comparability group id, sequences only
    pub element_comparability: Option<i32>,
    /// Parent program-point references
    pub parents: Vec<ParentRef>,
}

impl VariableRecord {
    /// Append this record's block to the output
    pub fn write(&self, out: &mut String) {
        let _ = writeln!(out, "variable {}", self.name);
        match &self.relative_name {
            Some(rel) => {
                let _ = writeln!(out, "  var-kind {} {}", self.kind.token(), rel);
            }
            None => {
                let _ = writeln!(out, "  var-kind {}", self.kind.token());
            }
        }
        if let Some(enclosing) = &self.enclosing_var {
            let _ = writeln!(out, "  enclosing-var {enclosing}");
        }
        if self.is_array {
            let _ = writeln!(out, "  array 1");
        }
        let suffix = if self.is_array { "[]" } else { "" };
        let _ = writeln!(out, "  dec-type {}{suffix}", self.dec_type);
        let _ = writeln!(out, "  rep-type {}{suffix}", self.rep_type.token());
        if !self.flags.is_empty() {
            let _ = writeln!(out, "  flags {}", self.flags);
        }
        match self.element_comparability {
            Some(element) => {
                let _ = writeln!(out, "  comparability {}[{element}]", self.comparability);
            }
            None => {
                let _ = writeln!(out, "  comparability {}", self.comparability);
            }
        }
        for parent in &self.parents {
            match &parent.var {
                Some(var) => {
                    let _ = writeln!(out, "  parent {} {} {var}", parent.ppt, parent.relation);
                }
                None => {
                    let _ = writeln!(out, "  parent {} {}", parent.ppt, parent.relation);
                }
            }
        }
    }
}
