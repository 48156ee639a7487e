//! Core type definitions for the runtime type table

use std::fmt;

/// Unique identifier for a type in the type table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    /// Raw index value
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Structural kind of a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Built-in primitive (int, float, bool, string)
    Primitive,
    /// Plain class
    Class,
    /// Interface
    Interface,
    /// Tagged variant (enum-with-payload)
    Variant,
    /// Array
    Array,
    /// Generic parameter bounded by one or more constraints
    GenericParam,
}

/// Field of a runtime type
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeId,
    /// Static field
    pub is_static: bool,
    /// Only assignable in a constructor
    pub is_readonly: bool,
    /// Compile-time constant
    pub is_const: bool,
    /// Generated by the compiler
    pub is_synthesized: bool,
    /// Backs an auto-generated event
    pub is_event_backing: bool,
    /// Publicly visible
    pub is_public: bool,
}

/// Parameter of a runtime method
#[derive(Debug, Clone)]
pub struct ParamInfo {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub ty: TypeId,
}

/// Method of a runtime type
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// Method name
    pub name: String,
    /// Parameters, excluding the implicit receiver
    pub params: Vec<ParamInfo>,
    /// Return type, `None` for void
    pub return_ty: Option<TypeId>,
    /// Static method
    pub is_static: bool,
    /// Constructor
    pub is_ctor: bool,
    /// Generated by the compiler
    pub is_synthetic: bool,
}

/// Property of a runtime type
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    /// Property name
    pub name: String,
    /// Property type
    pub ty: TypeId,
    /// Whether the property exposes a setter
    pub has_setter: bool,
}

/// One resolved runtime type
#[derive(Debug, Clone)]
pub struct TypeInfo {
    /// Fully qualified display name, including generic arguments and
    /// array suffixes (e.g. `sys.collections.List`1[sys.Int32][]`)
    pub qualified_name: String,
    /// Namespace portion of the name
    pub namespace: String,
    /// Structural kind
    pub kind: TypeKind,
    /// Sealed types cannot be subclassed
    pub sealed: bool,
    /// Base type
    pub base: Option<TypeId>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeId>,
    /// Declared fields
    pub fields: Vec<FieldInfo>,
    /// Declared properties
    pub properties: Vec<PropertyInfo>,
    /// Declared methods
    pub methods: Vec<MethodInfo>,
    /// Element type for arrays and instantiated collections
    pub element: Option<TypeId>,
    /// Array dimensions (0 for non-arrays; values above 1 are recorded but
    /// unsupported by the declaration consumer)
    pub dims: u8,
    /// Generic parameters of a definition (GenericParam type ids)
    pub generic_params: Vec<TypeId>,
    /// The open definition this instantiation came from
    pub generic_def: Option<TypeId>,
    /// Generic arguments of an instantiation
    pub generic_args: Vec<TypeId>,
    /// Constraints, for GenericParam kinds (always non-empty there)
    pub constraints: Vec<TypeId>,
}

impl TypeInfo {
    /// Create a bare named type with a kind
    pub fn named(qualified_name: &str, kind: TypeKind) -> Self {
        let namespace = qualified_name
            .rsplit_once('.')
            .map(|(ns, _)| ns.to_string())
            .unwrap_or_default();
        Self {
            qualified_name: qualified_name.to_string(),
            namespace,
            kind,
            sealed: false,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            element: None,
            dims: 0,
            generic_params: Vec::new(),
            generic_def: None,
            generic_args: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Whether this type lives in the core runtime namespace
    pub fn is_core_runtime(&self) -> bool {
        self.namespace == "sys" || self.namespace.starts_with("sys.")
    }

    /// Instance (non-static) fields, in declaration order
    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|f| !f.is_static)
    }

    /// Static fields, in declaration order
    pub fn static_fields(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|f| f.is_static)
    }

    /// First declared method with the given name
    pub fn find_method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Either a single resolved type or the ordered constraint list of a
/// multi-constraint generic parameter.
///
/// Exactly one form is populated by construction; the list form is
/// non-empty. Call sites pattern-match rather than probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDeclaration {
    /// One resolved type
    Single(TypeId),
    /// Two or more generic-parameter constraints, in declaration order
    Constraints(Vec<TypeId>),
}

impl TypeDeclaration {
    /// Build from a constraint list, collapsing singletons to `Single`
    pub fn from_constraints(constraints: Vec<TypeId>) -> Option<Self> {
        match constraints.len() {
            0 => None,
            1 => Some(TypeDeclaration::Single(constraints[0])),
            _ => Some(TypeDeclaration::Constraints(constraints)),
        }
    }

    /// The single type, if this declaration is in single form
    pub fn single(&self) -> Option<TypeId> {
        match self {
            TypeDeclaration::Single(id) => Some(*id),
            TypeDeclaration::Constraints(_) => None,
        }
    }

    /// All types covered by the declaration, in order
    pub fn types(&self) -> &[TypeId] {
        match self {
            TypeDeclaration::Single(id) => std::slice::from_ref(id),
            TypeDeclaration::Constraints(list) => list,
        }
    }

    /// The representative type used when one must be chosen: the single
    /// type, or the first constraint.
    pub fn representative(&self) -> TypeId {
        self.types()[0]
    }
}
