//! Declaration model and printer for the Weft instrumenter.
//!
//! Defines the variable records, flag bitset and program points of the
//! decls output format, and the [`DeclPrinter`] that walks runtime types
//! and emits order-sensitive declaration blocks. Purity files and
//! comparability summaries are the two external inputs consumed here.

pub mod comparability;
pub mod error;
pub mod flags;
pub mod ppt;
pub mod printer;
pub mod purity;
pub mod record;

pub use comparability::{
    ComparabilityProvider, ComparabilitySummary, FixedComparability, PptGroups,
    SummaryComparability, FIXED_GROUP,
};
pub use error::{DeclError, DeclResult};
pub use flags::VarFlags;
pub use ppt::{PptKind, ProgramPoint, CLASS_RELATION, OBJECT_RELATION, PPT_SEPARATOR};
pub use printer::{rep_type_of, DeclPrinter, PrintOptions, TypeContext};
pub use purity::PurityStore;
pub use record::{ParentRef, RepType, VarKind, VariableRecord};
