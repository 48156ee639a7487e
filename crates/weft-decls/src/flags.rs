//! Variable flag bitset
//!
//! Flags annotate a declared variable for the trace consumer. They print
//! as space-separated tokens on the `flags` line of a variable block, in
//! a fixed order so output is deterministic.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Flag set for one declared variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VarFlags(u32);

impl VarFlags {
    /// Variable synthesized by the instrumenter, not declared in source
    pub const SYNTHETIC: VarFlags = VarFlags(1 << 0);
    /// Holds a type name (the `GetType()` synthetic)
    pub const CLASSNAME: VarFlags = VarFlags(1 << 1);
    /// Holds a string rendering (the `toString` synthetic)
    pub const TO_STRING: VarFlags = VarFlags(1 << 2);
    /// Method parameter
    pub const IS_PARAM: VarFlags = VarFlags(1 << 3);
    /// Sequence with no duplicate elements (sets, map keys)
    pub const NO_DUPS: VarFlags = VarFlags(1 << 4);
    /// Sequence whose element order is not significant
    pub const NOT_ORDERED: VarFlags = VarFlags(1 << 5);
    /// Backed by a property accessor rather than a field
    pub const IS_PROPERTY: VarFlags = VarFlags(1 << 6);
    /// Enumeration-valued
    pub const IS_ENUM: VarFlags = VarFlags(1 << 7);
    /// The reference never changes after construction
    pub const REF_IMMUTABLE: VarFlags = VarFlags(1 << 8);
    /// The referenced value never changes after construction
    pub const VAL_IMMUTABLE: VarFlags = VarFlags(1 << 9);

    /// Empty flag set
    pub fn empty() -> Self {
        VarFlags(0)
    }

    /// Whether every flag in `other` is set
    pub fn contains(self, other: VarFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// This set minus the flags in `other`
    pub fn without(self, other: VarFlags) -> VarFlags {
        VarFlags(self.0 & !other.0)
    }

    /// Immutability flags a child variable inherits from its parent.
    ///
    /// A child keeps reference-immutability only if the parent had it and
    /// the field is const or readonly; it keeps value-immutability only
    /// if, additionally, the field's own type is immutable. Everything
    /// else in the parent's set is dropped. Losing a property here zeroes
    /// it for all descendants, since the child becomes their parent.
    pub fn propagate_immutability(
        parent: VarFlags,
        is_const: bool,
        is_readonly: bool,
        field_type_immutable: bool,
    ) -> VarFlags {
        let binding_fixed = is_const || is_readonly;
        let mut child = VarFlags::empty();
        if parent.contains(VarFlags::REF_IMMUTABLE) && binding_fixed {
            child |= VarFlags::REF_IMMUTABLE;
        }
        if parent.contains(VarFlags::VAL_IMMUTABLE)
            && (is_const || (is_readonly && field_type_immutable))
        {
            child |= VarFlags::VAL_IMMUTABLE;
        }
        child
    }

    fn tokens(self) -> impl Iterator<Item = &'static str> {
        const NAMED: [(VarFlags, &str); 10] = [
            (VarFlags::SYNTHETIC, "synthetic"),
            (VarFlags::CLASSNAME, "classname"),
            (VarFlags::TO_STRING, "to_string"),
            (VarFlags::IS_PARAM, "is_param"),
            (VarFlags::NO_DUPS, "no_dups"),
            (VarFlags::NOT_ORDERED, "not_ordered"),
            (VarFlags::IS_PROPERTY, "is_property"),
            (VarFlags::IS_ENUM, "is_enum"),
            (VarFlags::REF_IMMUTABLE, "is_reference_immutable"),
            (VarFlags::VAL_IMMUTABLE, "is_value_immutable"),
        ];
        NAMED
            .into_iter()
            .filter_map(move |(flag, token)| self.contains(flag).then_some(token))
    }
}

impl BitOr for VarFlags {
    type Output = VarFlags;

    fn bitor(self, rhs: VarFlags) -> VarFlags {
        VarFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for VarFlags {
    fn bitor_assign(&mut self, rhs: VarFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for VarFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in self.tokens() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(token)?;
            first = false;
        }
        Ok(())
    }
}
