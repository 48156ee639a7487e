//! Runtime type model for the Weft instrumenter.
//!
//! Builds a [`TypeTable`] from module metadata, classifies types for the
//! declaration emitter, and resolves qualified type names in both
//! directions. The table owns all storage; the classifier and resolver
//! keep only their memos and borrow the table per call, so the three can
//! be held and used side by side.

pub mod classify;
pub mod error;
pub mod resolve;
pub mod table;
pub mod ty;

pub use classify::TypeClassifier;
pub use error::{TypeError, TypeResult};
pub use resolve::{load_module_types, TypeNameResolver};
pub use table::{CoreTypes, TypeTable};
pub use ty::{
    FieldInfo, MethodInfo, ParamInfo, PropertyInfo, TypeDeclaration, TypeId, TypeInfo, TypeKind,
};
