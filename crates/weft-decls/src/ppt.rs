//! Program points
//!
//! A program point names a place where a variable snapshot is recorded:
//! a method entry, a method exit (one per return site, disambiguated by
//! an offset suffix), an object instance, or a class's static state.

use crate::record::ParentRef;
use std::fmt::Write;

/// Suffix separating the location name from the ppt kind tag
pub const PPT_SEPARATOR: &str = ":::";

/// Relation id linking a method ppt to its type's object ppt
pub const OBJECT_RELATION: u32 = 1;

/// Relation id linking an object ppt to its class ppt
pub const CLASS_RELATION: u32 = 2;

/// Program-point kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PptKind {
    /// Method entry
    Enter,
    /// One method exit site
    Subexit,
    /// Object-instance invariant point
    Object,
    /// Class-static invariant point
    Class,
}

impl PptKind {
    /// The exact output token
    pub fn token(self) -> &'static str {
        match self {
            PptKind::Enter => "enter",
            PptKind::Subexit => "subexit",
            PptKind::Object => "object",
            PptKind::Class => "class",
        }
    }
}

/// A named program point with its parent linkage
#[derive(Debug, Clone)]
pub struct ProgramPoint {
    /// Full ppt name, including the kind suffix
    pub name: String,
    /// Kind
    pub kind: PptKind,
    /// Parent program points
    pub parents: Vec<ParentRef>,
}

impl ProgramPoint {
    /// Append the ppt header lines (preceded by a blank line) to the output
    pub fn write_header(&self, out: &mut String) {
        let _ = writeln!(out);
        let _ = writeln!(out, "ppt {}", self.name);
        let _ = writeln!(out, "ppt-type {}", self.kind.token());
        for parent in &self.parents {
            match &parent.var {
                Some(var) => {
                    let _ = writeln!(out, "parent {} {} {var}", parent.ppt, parent.relation);
                }
                None => {
                    let _ = writeln!(out, "parent {} {}", parent.ppt, parent.relation);
                }
            }
        }
    }
}

/// `Ns.Type:::OBJECT`
pub fn object_ppt_name(type_name: &str) -> String {
    format!("{type_name}{PPT_SEPARATOR}OBJECT")
}

/// `Ns.Type:::CLASS`
pub fn class_ppt_name(type_name: &str) -> String {
    format!("{type_name}{PPT_SEPARATOR}CLASS")
}

/// `Ns.Type.Method(a.Type,b.Type):::ENTER`
pub fn enter_ppt_name(method_signature: &str) -> String {
    format!("{method_signature}{PPT_SEPARATOR}ENTER")
}

/// `Ns.Type.Method(a.Type,b.Type):::EXIT<id>`
pub fn exit_ppt_name(method_signature: &str, exit_id: u32) -> String {
    format!("{method_signature}{PPT_SEPARATOR}EXIT{exit_id}")
}

/// Build the `Ns.Type.Method(paramTypes)` signature part of a method ppt
/// name from the owner's qualified name and the parameter type names.
pub fn method_signature(type_name: &str, method_name: &str, param_types: &[String]) -> String {
    format!("{type_name}.{method_name}({})", param_types.join(","))
}
