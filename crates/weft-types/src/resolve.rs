//! Bidirectional type-name resolution
//!
//! Maps portable type references and qualified-name strings to runtime
//! [`TypeId`]s and back, memoized in both directions. The name grammar:
//!
//! - generic definitions carry a backtick arity suffix: `m.Pair`2`
//! - instantiations bracket their arguments: `m.Pair`2[sys.Int32,sys.String]`
//! - arrays append `[]` per dimension: `sys.Int32[][]`
//! - a generic parameter with two or more constraints is brace-delimited
//!   and pipe-separated: `{m.Readable|m.Writable}`; a single-constraint
//!   parameter resolves transparently to that constraint's name
//!
//! When a name fails to resolve because of its embedded generic-argument
//! brackets, the caller may retry with the bracketed list stripped; this
//! is a deliberate degradation for partially-resolvable metadata and is
//! reported through `tracing`.

use crate::error::{TypeError, TypeResult};
use crate::table::TypeTable;
use crate::ty::{
    FieldInfo, MethodInfo, ParamInfo, PropertyInfo, TypeDeclaration, TypeId, TypeInfo, TypeKind,
};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use weft_bytecode::{field_flags, method_flags, type_flags, Module};

/// Memoizing bidirectional resolver
#[derive(Debug, Default)]
pub struct TypeNameResolver {
    name_memo: FxHashMap<String, TypeDeclaration>,
    id_memo: FxHashMap<TypeId, String>,
}

impl TypeNameResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a qualified name to a runtime type declaration
    pub fn resolve_name(
        &mut self,
        table: &mut TypeTable,
        name: &str,
    ) -> TypeResult<TypeDeclaration> {
        if let Some(decl) = self.name_memo.get(name) {
            return Ok(decl.clone());
        }
        let decl = self.resolve_uncached(table, name)?;
        self.name_memo.insert(name.to_string(), decl.clone());
        Ok(decl)
    }

    /// Resolve a qualified name, retrying once with the generic-argument
    /// brackets stripped when the full name fails.
    ///
    /// Returns the declaration and whether the degraded retry was used.
    pub fn resolve_name_with_fallback(
        &mut self,
        table: &mut TypeTable,
        name: &str,
    ) -> TypeResult<(TypeDeclaration, bool)> {
        match self.resolve_name(table, name) {
            Ok(decl) => Ok((decl, false)),
            Err(first_error) => {
                let stripped = strip_generic_arguments(name);
                if stripped == name {
                    return Err(first_error);
                }
                let decl = self.resolve_name(table, &stripped)?;
                warn!(
                    full = name,
                    stripped = stripped.as_str(),
                    "type name resolved only after stripping generic arguments: {first_error}"
                );
                Ok((decl, true))
            }
        }
    }

    /// Qualified display name for a runtime type.
    ///
    /// Generic parameters serialize to their single constraint's name, or
    /// to the `{A|B}` union form when multiply constrained.
    pub fn qualified_name(&mut self, table: &TypeTable, ty: TypeId) -> String {
        if let Some(name) = self.id_memo.get(&ty) {
            return name.clone();
        }
        let info = table.get(ty);
        let name = if info.kind == TypeKind::GenericParam {
            match info.constraints.len() {
                1 => table.get(info.constraints[0]).qualified_name.clone(),
                _ => {
                    let parts: Vec<&str> = info
                        .constraints
                        .iter()
                        .map(|&c| table.get(c).qualified_name.as_str())
                        .collect();
                    format!("{{{}}}", parts.join("|"))
                }
            }
        } else {
            info.qualified_name.clone()
        };
        self.id_memo.insert(ty, name.clone());
        name
    }

    /// Qualified name of a portable type ref, built without touching the
    /// type table. Multi-constraint generic parameters encode as `{A|B}`.
    pub fn ref_name(&self, module: &Module, ref_index: u32) -> TypeResult<String> {
        let type_ref = module
            .type_refs
            .get(ref_index as usize)
            .ok_or(TypeError::BadTypeRef { index: ref_index })?;

        let mut name = if !type_ref.constraints.is_empty() {
            let mut parts = Vec::with_capacity(type_ref.constraints.len());
            for &c in &type_ref.constraints {
                parts.push(self.ref_name(module, c)?);
            }
            if parts.len() == 1 {
                parts.pop().expect("one part")
            } else {
                format!("{{{}}}", parts.join("|"))
            }
        } else {
            let base = module.string(type_ref.name).to_string();
            if type_ref.args.is_empty() {
                base
            } else {
                let mut args = Vec::with_capacity(type_ref.args.len());
                for &a in &type_ref.args {
                    args.push(self.ref_name(module, a)?);
                }
                format!("{base}[{}]", args.join(","))
            }
        };
        for _ in 0..type_ref.dims {
            name.push_str("[]");
        }
        Ok(name)
    }

    /// Resolve a portable type ref to a runtime type declaration
    pub fn resolve_ref(
        &mut self,
        table: &mut TypeTable,
        module: &Module,
        ref_index: u32,
    ) -> TypeResult<TypeDeclaration> {
        let name = self.ref_name(module, ref_index)?;
        self.resolve_name(table, &name)
    }

    fn resolve_uncached(
        &mut self,
        table: &mut TypeTable,
        name: &str,
    ) -> TypeResult<TypeDeclaration> {
        let (stem, dims) = split_array_suffix(name);

        if let Some(inner) = stem.strip_prefix('{') {
            let inner = inner
                .strip_suffix('}')
                .ok_or_else(|| malformed(name, "unterminated constraint list"))?;
            if dims > 0 {
                return Err(malformed(name, "array of a constrained parameter"));
            }
            let mut constraints = Vec::new();
            for part in split_top_level(inner, '|') {
                let part = part.trim();
                if part.is_empty() {
                    return Err(malformed(name, "empty constraint"));
                }
                let decl = self.resolve_name(table, part)?;
                constraints.push(decl.representative());
            }
            return TypeDeclaration::from_constraints(constraints)
                .ok_or_else(|| malformed(name, "empty constraint list"));
        }

        let id = self.resolve_single(table, stem, name)?;
        let id = if dims > 0 {
            table.array_of(id, dims)
        } else {
            id
        };
        Ok(TypeDeclaration::Single(id))
    }

    fn resolve_single(
        &mut self,
        table: &mut TypeTable,
        stem: &str,
        full_name: &str,
    ) -> TypeResult<TypeId> {
        let (base, args) = split_generic_arguments(stem, full_name)?;
        if base.is_empty() {
            return Err(malformed(full_name, "empty type name"));
        }

        if args.is_empty() {
            if let Some(id) = table.lookup(base) {
                return Ok(id);
            }
            // Metadata may reference types from modules we have not
            // loaded; declare them as opaque classes
            debug!(name = base, "declaring opaque external type");
            return Ok(table.declare(base, TypeKind::Class));
        }

        let def = table
            .lookup(base)
            .ok_or_else(|| TypeError::UnknownType {
                name: base.to_string(),
            })?;
        let mut arg_ids = Vec::with_capacity(args.len());
        for arg in &args {
            let decl = self.resolve_name(table, arg)?;
            arg_ids.push(decl.representative());
        }
        table.instantiate(def, &arg_ids)
    }
}

/// Load a module's type definitions into the table.
///
/// Two phases: declare every definition by name, then resolve member and
/// hierarchy refs, so definitions may reference each other in any order.
pub fn load_module_types(
    table: &mut TypeTable,
    resolver: &mut TypeNameResolver,
    module: &Module,
) -> TypeResult<()> {
    let mut declared = Vec::with_capacity(module.types.len());
    for type_def in &module.types {
        let name = module.string(type_def.name);
        let kind = if type_def.has_flag(type_flags::INTERFACE) {
            TypeKind::Interface
        } else if type_def.has_flag(type_flags::VARIANT) {
            TypeKind::Variant
        } else {
            TypeKind::Class
        };
        let id = table.declare(name, kind);
        table.get_mut(id).kind = kind;
        table.get_mut(id).sealed = type_def.has_flag(type_flags::SEALED);
        declared.push(id);
    }

    for (type_def, &id) in module.types.iter().zip(&declared) {
        let type_name = module.string(type_def.name).to_string();

        // Generic parameters, with their constraint lists
        let mut params = Vec::with_capacity(type_def.generic_params.len());
        for gp in &type_def.generic_params {
            let param_name = format!("{type_name}!{}", module.string(gp.name));
            let mut constraints = Vec::with_capacity(gp.constraints.len());
            for &c in &gp.constraints {
                let decl = resolver.resolve_ref(table, module, c)?;
                constraints.push(decl.representative());
            }
            if constraints.is_empty() {
                constraints.push(table.core.object);
            }
            let mut info = TypeInfo::named(&param_name, TypeKind::GenericParam);
            info.constraints = constraints;
            params.push(table.intern(info));
        }

        let base = match type_def.base {
            Some(b) => Some(resolver.resolve_ref(table, module, b)?.representative()),
            None => Some(table.core.object),
        };
        let mut interfaces = Vec::with_capacity(type_def.interfaces.len());
        for &i in &type_def.interfaces {
            interfaces.push(resolver.resolve_ref(table, module, i)?.representative());
        }
        let mut fields = Vec::with_capacity(type_def.fields.len());
        for field in &type_def.fields {
            let field_ty = resolver.resolve_ref(table, module, field.ty)?.representative();
            fields.push(FieldInfo {
                name: module.string(field.name).to_string(),
                ty: field_ty,
                is_static: field.has_flag(field_flags::STATIC),
                is_readonly: field.has_flag(field_flags::READONLY),
                is_const: field.has_flag(field_flags::CONST),
                is_synthesized: field.has_flag(field_flags::SYNTHESIZED),
                is_event_backing: field.has_flag(field_flags::EVENT_BACKING),
                is_public: field.has_flag(field_flags::PUBLIC),
            });
        }
        let mut properties = Vec::with_capacity(type_def.properties.len());
        for prop in &type_def.properties {
            let prop_ty = resolver.resolve_ref(table, module, prop.ty)?.representative();
            properties.push(PropertyInfo {
                name: module.string(prop.name).to_string(),
                ty: prop_ty,
                has_setter: prop.has_setter,
            });
        }

        let mut methods = Vec::with_capacity(type_def.methods.len());
        for method in &type_def.methods {
            let mut method_params = Vec::with_capacity(method.params.len());
            for param in &method.params {
                let param_ty = resolver.resolve_ref(table, module, param.ty)?.representative();
                method_params.push(ParamInfo {
                    name: module.string(param.name).to_string(),
                    ty: param_ty,
                });
            }
            let return_ty = match method.return_type {
                Some(r) => Some(resolver.resolve_ref(table, module, r)?.representative()),
                None => None,
            };
            methods.push(MethodInfo {
                name: module.string(method.name).to_string(),
                params: method_params,
                return_ty,
                is_static: method.has_flag(method_flags::STATIC),
                is_ctor: method.has_flag(method_flags::CTOR),
                is_synthetic: method.has_flag(method_flags::SYNTHETIC),
            });
        }

        let info = table.get_mut(id);
        info.generic_params = params;
        info.base = base;
        info.interfaces = interfaces;
        info.fields = fields;
        info.properties = properties;
        info.methods = methods;
    }
    Ok(())
}

fn malformed(name: &str, reason: &str) -> TypeError {
    TypeError::MalformedName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Split trailing `[]` array suffixes off a name
fn split_array_suffix(name: &str) -> (&str, u8) {
    let mut stem = name;
    let mut dims = 0u8;
    while let Some(rest) = stem.strip_suffix("[]") {
        stem = rest;
        dims = dims.saturating_add(1);
    }
    (stem, dims)
}

/// Split `base[arg,arg]` into the base name and raw argument strings
fn split_generic_arguments<'a>(
    stem: &'a str,
    full_name: &str,
) -> TypeResult<(&'a str, Vec<String>)> {
    let open = match find_top_level(stem, '[') {
        Some(pos) => pos,
        None => {
            if stem.contains(']') {
                return Err(malformed(full_name, "unbalanced brackets"));
            }
            return Ok((stem, Vec::new()));
        }
    };
    let inner = stem[open..]
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| malformed(full_name, "unbalanced brackets"))?;
    let args: Vec<String> = split_top_level(inner, ',')
        .into_iter()
        .map(|s| s.trim().to_string())
        .collect();
    if args.iter().any(|a| a.is_empty()) {
        return Err(malformed(full_name, "empty generic argument"));
    }
    Ok((&stem[..open], args))
}

/// Strip the outermost bracketed generic-argument list, keeping array
/// suffixes. `m.Pair`2[A,B][]` becomes `m.Pair`2[]`.
fn strip_generic_arguments(name: &str) -> String {
    let (stem, dims) = split_array_suffix(name);
    let stripped = match find_top_level(stem, '[') {
        Some(open) => &stem[..open],
        None => stem,
    };
    let mut result = stripped.to_string();
    for _ in 0..dims {
        result.push_str("[]");
    }
    result
}

fn find_top_level(s: &str, needle: char) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '{' if c == needle && depth == 0 => return Some(i),
            '[' | '{' => depth += 1,
            ']' | '}' => depth -= 1,
            _ if c == needle && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_top_level(s: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '{' => depth += 1,
            ']' | '}' => depth -= 1,
            _ if c == separator && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_primitive() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let decl = resolver.resolve_name(&mut table, "sys.Int32").unwrap();
        assert_eq!(decl, TypeDeclaration::Single(table.core.int32));
    }

    #[test]
    fn test_resolve_array() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let decl = resolver.resolve_name(&mut table, "sys.Int32[]").unwrap();
        let id = decl.single().unwrap();
        assert_eq!(table.get(id).element, Some(table.core.int32));
        assert_eq!(table.get(id).dims, 1);
    }

    #[test]
    fn test_resolve_generic_instantiation() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let decl = resolver
            .resolve_name(&mut table, "sys.collections.List`1[sys.Int32]")
            .unwrap();
        let id = decl.single().unwrap();
        assert_eq!(
            table.get(id).qualified_name,
            "sys.collections.List`1[sys.Int32]"
        );
    }

    #[test]
    fn test_resolve_nested_generics() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let decl = resolver
            .resolve_name(
                &mut table,
                "sys.collections.List`1[sys.collections.List`1[sys.String]]",
            )
            .unwrap();
        let outer = decl.single().unwrap();
        let inner = table.get(outer).element.unwrap();
        assert_eq!(
            table.get(inner).qualified_name,
            "sys.collections.List`1[sys.String]"
        );
    }

    #[test]
    fn test_multi_constraint_union() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let readable = table.declare("m.Readable", TypeKind::Interface);
        let writable = table.declare("m.Writable", TypeKind::Interface);
        let decl = resolver
            .resolve_name(&mut table, "{m.Readable|m.Writable}")
            .unwrap();
        assert_eq!(decl, TypeDeclaration::Constraints(vec![readable, writable]));
    }

    #[test]
    fn test_round_trip_qualified_names() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let list = resolver
            .resolve_name(&mut table, "sys.collections.List`1[sys.Int32]")
            .unwrap()
            .single()
            .unwrap();
        let arr = table.array_of(table.core.float64, 1);

        for ty in [table.core.int32, table.core.string, list, arr] {
            let name = resolver.qualified_name(&table, ty);
            let decl = resolver.resolve_name(&mut table, &name).unwrap();
            assert_eq!(decl.single(), Some(ty), "round trip failed for {name}");
        }
    }

    #[test]
    fn test_generic_param_serializes_to_union() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let readable = table.declare("m.Readable", TypeKind::Interface);
        let writable = table.declare("m.Writable", TypeKind::Interface);
        let mut param = TypeInfo::named("m.Holder`1!T", TypeKind::GenericParam);
        param.constraints = vec![readable, writable];
        let param_id = table.intern(param);

        let name = resolver.qualified_name(&table, param_id);
        assert_eq!(name, "{m.Readable|m.Writable}");

        // Single-constraint parameters resolve transparently
        let mut single = TypeInfo::named("m.Holder`1!U", TypeKind::GenericParam);
        single.constraints = vec![readable];
        let single_id = table.intern(single);
        assert_eq!(resolver.qualified_name(&table, single_id), "m.Readable");
    }

    #[test]
    fn test_fallback_strips_generic_arguments() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        // Wrong arity forces the full name to fail
        let (decl, degraded) = resolver
            .resolve_name_with_fallback(
                &mut table,
                "sys.collections.List`1[sys.Int32,sys.Int32]",
            )
            .unwrap();
        assert!(degraded);
        let id = decl.single().unwrap();
        assert_eq!(table.get(id).qualified_name, "sys.collections.List`1");
    }

    #[test]
    fn test_fallback_not_taken_without_brackets() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let result = resolver.resolve_name_with_fallback(&mut table, "{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_names_rejected() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        for bad in ["m.Pair`2[sys.Int32", "{m.A|}", "[]", "m.Pair`2[,]"] {
            assert!(
                resolver.resolve_name(&mut table, bad).is_err(),
                "expected {bad} to be rejected"
            );
        }
    }

    #[test]
    fn test_unknown_plain_type_declared_opaque() {
        let mut table = TypeTable::new();
        let mut resolver = TypeNameResolver::new();
        let decl = resolver.resolve_name(&mut table, "extlib.Widget").unwrap();
        let id = decl.single().unwrap();
        assert_eq!(table.get(id).qualified_name, "extlib.Widget");
        assert_eq!(table.get(id).kind, TypeKind::Class);
    }
}
