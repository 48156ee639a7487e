//! Runtime type table
//!
//! The table is an arena of resolved [`TypeInfo`] records addressed by
//! [`TypeId`]. It owns the built-in core runtime types (`sys` and
//! `sys.collections`) and supports on-demand instantiation of generic
//! definitions and array types. All caches are instance state; nothing is
//! process-global, so independent instrumenter instances stay isolated.

use crate::error::{TypeError, TypeResult};
use crate::ty::{FieldInfo, TypeId, TypeInfo, TypeKind};
use rustc_hash::FxHashMap;

/// Well-known core runtime types, resolved once at table construction
#[derive(Debug, Clone, Copy)]
pub struct CoreTypes {
    pub object: TypeId,
    pub int32: TypeId,
    pub int64: TypeId,
    pub float64: TypeId,
    pub boolean: TypeId,
    pub string: TypeId,
    pub exception: TypeId,
    /// Thrown when a thread is torn down; exits caused by it are not
    /// instrumented to avoid double-counting
    pub thread_interrupt: TypeId,
}

/// Arena of resolved runtime types
#[derive(Debug)]
pub struct TypeTable {
    infos: Vec<TypeInfo>,
    by_name: FxHashMap<String, TypeId>,
    /// Well-known core types
    pub core: CoreTypes,
}

impl TypeTable {
    /// Create a table pre-populated with the core runtime types
    pub fn new() -> Self {
        let mut table = Self {
            infos: Vec::new(),
            by_name: FxHashMap::default(),
            core: CoreTypes {
                object: TypeId(0),
                int32: TypeId(0),
                int64: TypeId(0),
                float64: TypeId(0),
                boolean: TypeId(0),
                string: TypeId(0),
                exception: TypeId(0),
                thread_interrupt: TypeId(0),
            },
        };
        table.install_core();
        table
    }

    fn install_core(&mut self) {
        let object = self.intern(TypeInfo::named("sys.Object", TypeKind::Class));

        let primitive = |table: &mut Self, name: &str| {
            let mut info = TypeInfo::named(name, TypeKind::Primitive);
            info.sealed = true;
            info.base = Some(object);
            table.intern(info)
        };
        let int32 = primitive(self, "sys.Int32");
        let int64 = primitive(self, "sys.Int64");
        let float64 = primitive(self, "sys.Float64");
        let boolean = primitive(self, "sys.Bool");
        let string = primitive(self, "sys.String");

        let mut exception_info = TypeInfo::named("sys.Exception", TypeKind::Class);
        exception_info.base = Some(object);
        let exception = self.intern(exception_info);

        let mut interrupt_info = TypeInfo::named("sys.ThreadInterruptException", TypeKind::Class);
        interrupt_info.base = Some(exception);
        let thread_interrupt = self.intern(interrupt_info);

        // Collection interfaces and their canonical implementations
        let ilist = self.declare_generic("sys.collections.IList`1", TypeKind::Interface, 1, object);
        let iset = self.declare_generic("sys.collections.ISet`1", TypeKind::Interface, 1, object);
        let imap = self.declare_generic("sys.collections.IMap`2", TypeKind::Interface, 2, object);

        let list = self.declare_generic("sys.collections.List`1", TypeKind::Class, 1, object);
        self.infos[list.index()].interfaces.push(ilist);
        let set = self.declare_generic("sys.collections.HashSet`1", TypeKind::Class, 1, object);
        self.infos[set.index()].interfaces.push(iset);
        let map = self.declare_generic("sys.collections.HashMap`2", TypeKind::Class, 2, object);
        self.infos[map.index()].interfaces.push(imap);
        self.declare_generic("sys.collections.Entry`2", TypeKind::Class, 2, object);

        self.core = CoreTypes {
            object,
            int32,
            int64,
            float64,
            boolean,
            string,
            exception,
            thread_interrupt,
        };
    }

    fn declare_generic(
        &mut self,
        name: &str,
        kind: TypeKind,
        arity: usize,
        object: TypeId,
    ) -> TypeId {
        let mut info = TypeInfo::named(name, kind);
        info.base = Some(object);
        let id = self.intern(info);
        let param_names = ["T", "U", "V", "W"];
        let mut params = Vec::with_capacity(arity);
        for param_name in param_names.iter().take(arity) {
            let mut param = TypeInfo::named(&format!("{name}!{param_name}"), TypeKind::GenericParam);
            param.constraints = vec![object];
            params.push(self.intern(param));
        }
        self.infos[id.index()].generic_params = params;
        id
    }

    /// Number of types in the table
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether the table is empty (never true in practice)
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Get a type by id
    pub fn get(&self, id: TypeId) -> &TypeInfo {
        &self.infos[id.index()]
    }

    /// Get a type mutably by id
    pub fn get_mut(&mut self, id: TypeId) -> &mut TypeInfo {
        &mut self.infos[id.index()]
    }

    /// Look up a type by its fully qualified display name
    pub fn lookup(&self, qualified_name: &str) -> Option<TypeId> {
        self.by_name.get(qualified_name).copied()
    }

    /// Intern a type info, deduplicating by qualified name
    pub fn intern(&mut self, info: TypeInfo) -> TypeId {
        if let Some(&id) = self.by_name.get(&info.qualified_name) {
            return id;
        }
        let id = TypeId(self.infos.len() as u32);
        self.by_name.insert(info.qualified_name.clone(), id);
        self.infos.push(info);
        id
    }

    /// Declare a named class-like type if it does not already exist
    pub fn declare(&mut self, qualified_name: &str, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.by_name.get(qualified_name) {
            return id;
        }
        let mut info = TypeInfo::named(qualified_name, kind);
        info.base = Some(self.core.object);
        self.intern(info)
    }

    /// The array type over `element` with the given number of dimensions
    pub fn array_of(&mut self, element: TypeId, dims: u8) -> TypeId {
        let mut name = self.get(element).qualified_name.clone();
        for _ in 0..dims {
            name.push_str("[]");
        }
        if let Some(&id) = self.by_name.get(&name) {
            return id;
        }
        let mut info = TypeInfo::named(&name, TypeKind::Array);
        info.namespace = self.get(element).namespace.clone();
        info.sealed = true;
        info.base = Some(self.core.object);
        info.element = Some(element);
        info.dims = dims;
        self.intern(info)
    }

    /// Instantiate a generic definition with concrete arguments
    pub fn instantiate(&mut self, def: TypeId, args: &[TypeId]) -> TypeResult<TypeId> {
        let def_info = self.get(def).clone();
        if def_info.generic_params.len() != args.len() {
            return Err(TypeError::ArityMismatch {
                name: def_info.qualified_name.clone(),
                expected: def_info.generic_params.len(),
                got: args.len(),
            });
        }
        if args.is_empty() {
            return Ok(def);
        }

        let mut name = def_info.qualified_name.clone();
        name.push('[');
        for (i, &arg) in args.iter().enumerate() {
            if i > 0 {
                name.push(',');
            }
            name.push_str(&self.get(arg).qualified_name);
        }
        name.push(']');
        if let Some(&id) = self.by_name.get(&name) {
            return Ok(id);
        }

        let subst: FxHashMap<TypeId, TypeId> = def_info
            .generic_params
            .iter()
            .copied()
            .zip(args.iter().copied())
            .collect();

        // Reserve the slot before substituting members so self-referential
        // definitions terminate
        let mut shell = TypeInfo::named(&name, def_info.kind);
        shell.namespace = def_info.namespace.clone();
        shell.sealed = def_info.sealed;
        shell.generic_def = Some(def);
        shell.generic_args = args.to_vec();
        let id = self.intern(shell);

        let base = match def_info.base {
            Some(b) => Some(self.substitute(b, &subst)?),
            None => None,
        };
        let mut interfaces = Vec::with_capacity(def_info.interfaces.len());
        for &iface in &def_info.interfaces {
            interfaces.push(self.substitute(iface, &subst)?);
        }
        let mut fields = Vec::with_capacity(def_info.fields.len());
        for field in &def_info.fields {
            let mut f = field.clone();
            f.ty = self.substitute(field.ty, &subst)?;
            fields.push(f);
        }
        let mut properties = Vec::with_capacity(def_info.properties.len());
        for prop in &def_info.properties {
            let mut p = prop.clone();
            p.ty = self.substitute(prop.ty, &subst)?;
            properties.push(p);
        }
        let mut methods = Vec::with_capacity(def_info.methods.len());
        for method in &def_info.methods {
            let mut m = method.clone();
            for param in &mut m.params {
                param.ty = self.substitute(param.ty, &subst)?;
            }
            m.return_ty = match m.return_ty {
                Some(r) => Some(self.substitute(r, &subst)?),
                None => None,
            };
            methods.push(m);
        }
        let element = self.collection_element(&def_info.qualified_name, args)?;

        let info = self.get_mut(id);
        info.base = base;
        info.interfaces = interfaces;
        info.fields = fields;
        info.properties = properties;
        info.methods = methods;
        info.element = element;
        Ok(id)
    }

    /// Element type exposed by a known collection instantiation
    fn collection_element(&mut self, def_name: &str, args: &[TypeId]) -> TypeResult<Option<TypeId>> {
        Ok(match def_name {
            "sys.collections.List`1"
            | "sys.collections.IList`1"
            | "sys.collections.HashSet`1"
            | "sys.collections.ISet`1" => Some(args[0]),
            "sys.collections.HashMap`2" | "sys.collections.IMap`2" => {
                let entry = self
                    .lookup("sys.collections.Entry`2")
                    .ok_or_else(|| TypeError::UnknownType {
                        name: "sys.collections.Entry`2".to_string(),
                    })?;
                Some(self.instantiate(entry, args)?)
            }
            _ => None,
        })
    }

    fn substitute(&mut self, ty: TypeId, subst: &FxHashMap<TypeId, TypeId>) -> TypeResult<TypeId> {
        if let Some(&mapped) = subst.get(&ty) {
            return Ok(mapped);
        }
        let info = self.get(ty).clone();
        match info.kind {
            TypeKind::Array => {
                let element = info.element.expect("array has element");
                let new_element = self.substitute(element, subst)?;
                if new_element == element {
                    Ok(ty)
                } else {
                    Ok(self.array_of(new_element, info.dims))
                }
            }
            _ if info.generic_def.is_some() => {
                let def = info.generic_def.expect("checked");
                let mut changed = false;
                let mut new_args = Vec::with_capacity(info.generic_args.len());
                for &arg in &info.generic_args {
                    let new_arg = self.substitute(arg, subst)?;
                    changed |= new_arg != arg;
                    new_args.push(new_arg);
                }
                if changed {
                    self.instantiate(def, &new_args)
                } else {
                    Ok(ty)
                }
            }
            _ => Ok(ty),
        }
    }

    /// Whether `a` is `b` or a subtype of `b` (base chain plus interfaces)
    pub fn is_subtype_of(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let info = self.get(a);
        if let Some(base) = info.base {
            if self.is_subtype_of(base, b) {
                return true;
            }
        }
        info.interfaces.iter().any(|&i| self.is_subtype_of(i, b))
    }

    /// Convenience builder used by the driver: add a field to a type
    pub fn add_field(&mut self, ty: TypeId, field: FieldInfo) {
        self.get_mut(ty).fields.push(field);
    }

    /// Iterate all type ids
    pub fn ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.infos.len() as u32).map(TypeId)
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_types_present() {
        let table = TypeTable::new();
        assert_eq!(table.get(table.core.int32).qualified_name, "sys.Int32");
        assert_eq!(table.get(table.core.string).qualified_name, "sys.String");
        assert!(table.lookup("sys.collections.List`1").is_some());
        assert!(table.is_subtype_of(table.core.thread_interrupt, table.core.exception));
    }

    #[test]
    fn test_array_interning() {
        let mut table = TypeTable::new();
        let int32 = table.core.int32;
        let a = table.array_of(int32, 1);
        let b = table.array_of(int32, 1);
        assert_eq!(a, b);
        assert_eq!(table.get(a).qualified_name, "sys.Int32[]");
        assert_eq!(table.get(a).element, Some(int32));

        let two = table.array_of(int32, 2);
        assert_eq!(table.get(two).qualified_name, "sys.Int32[][]");
        assert_eq!(table.get(two).dims, 2);
    }

    #[test]
    fn test_list_instantiation() {
        let mut table = TypeTable::new();
        let list_def = table.lookup("sys.collections.List`1").unwrap();
        let int32 = table.core.int32;
        let list_int = table.instantiate(list_def, &[int32]).unwrap();
        let info = table.get(list_int);
        assert_eq!(info.qualified_name, "sys.collections.List`1[sys.Int32]");
        assert_eq!(info.element, Some(int32));
        assert_eq!(info.generic_def, Some(list_def));

        // Idempotent
        let again = table.instantiate(list_def, &[int32]).unwrap();
        assert_eq!(list_int, again);
    }

    #[test]
    fn test_map_instantiation_elements_are_entries() {
        let mut table = TypeTable::new();
        let map_def = table.lookup("sys.collections.HashMap`2").unwrap();
        let k = table.core.string;
        let v = table.core.int32;
        let map = table.instantiate(map_def, &[k, v]).unwrap();
        let element = table.get(map).element.unwrap();
        assert_eq!(
            table.get(element).qualified_name,
            "sys.collections.Entry`2[sys.String,sys.Int32]"
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let mut table = TypeTable::new();
        let list_def = table.lookup("sys.collections.List`1").unwrap();
        let int32 = table.core.int32;
        let result = table.instantiate(list_def, &[int32, int32]);
        assert!(matches!(result, Err(TypeError::ArityMismatch { .. })));
    }

    #[test]
    fn test_interface_substitution() {
        let mut table = TypeTable::new();
        let list_def = table.lookup("sys.collections.List`1").unwrap();
        let ilist_def = table.lookup("sys.collections.IList`1").unwrap();
        let int32 = table.core.int32;
        let list_int = table.instantiate(list_def, &[int32]).unwrap();
        assert!(table.is_subtype_of(list_int, ilist_def));
    }
}
