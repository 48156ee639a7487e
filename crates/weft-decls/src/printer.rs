//! Declaration printing
//!
//! Walks variable types recursively and emits the order-sensitive decls
//! output: a header block, then one block per program point, then one
//! block per declared variable. The traversal respects the nesting-depth
//! limit, omit/select patterns, per-ppt dedup, collection flattening one
//! level deep, and synthesized pseudo-variables (type-of, to-string,
//! pure-method results, list-element and linked-list-spine expansions).

use crate::comparability::ComparabilityProvider;
use crate::error::{DeclError, DeclResult};
use crate::flags::VarFlags;
use crate::ppt::{
    self, PptKind, ProgramPoint, CLASS_RELATION, OBJECT_RELATION,
};
use crate::purity::PurityStore;
use crate::record::{ParentRef, RepType, VarKind, VariableRecord};
use regex::Regex;
use rustc_hash::FxHashSet;
use std::fmt::Write as _;
use tracing::{debug, warn};
use weft_types::{MethodInfo, TypeClassifier, TypeId, TypeKind, TypeNameResolver, TypeTable};

/// Constant sentinel fields skipped to avoid noise in the output
const WELL_KNOWN_CONSTANTS: [&str; 6] = [
    "MinValue",
    "MaxValue",
    "Epsilon",
    "NaN",
    "PositiveInfinity",
    "NegativeInfinity",
];

/// Borrowed type-model state threaded through a printing pass
pub struct TypeContext<'a> {
    pub table: &'a TypeTable,
    pub classifier: &'a mut TypeClassifier,
    pub resolver: &'a mut TypeNameResolver,
}

/// User-configurable printing options
#[derive(Debug, Default)]
pub struct PrintOptions {
    /// Maximum field-nesting depth (0 declares only top-level variables)
    pub nesting_depth: u32,
    /// Program points matching this pattern are not printed
    pub ppt_omit: Option<Regex>,
    /// When present, only program points matching this pattern are printed
    pub ppt_select: Option<Regex>,
    /// Variables matching this pattern are not printed
    pub var_omit: Option<Regex>,
}

impl PrintOptions {
    /// Default nesting depth when the user gives none
    pub const DEFAULT_NESTING_DEPTH: u32 = 2;

    /// Compile options from raw pattern strings
    pub fn compile(
        nesting_depth: u32,
        ppt_omit: Option<&str>,
        ppt_select: Option<&str>,
        var_omit: Option<&str>,
    ) -> DeclResult<Self> {
        let compile = |pattern: Option<&str>| -> DeclResult<Option<Regex>> {
            match pattern {
                Some(p) => Regex::new(p).map(Some).map_err(|source| {
                    DeclError::InvalidPattern {
                        pattern: p.to_string(),
                        source,
                    }
                }),
                None => Ok(None),
            }
        };
        Ok(Self {
            nesting_depth,
            ppt_omit: compile(ppt_omit)?,
            ppt_select: compile(ppt_select)?,
            var_omit: compile(var_omit)?,
        })
    }
}

/// Prints declaration blocks for program points.
///
/// The per-ppt seen-set clears exactly at program-point boundaries; the
/// static-fields seen-set is global for the printer's lifetime, so a
/// static is declared at the first program point that reaches it.
pub struct DeclPrinter<'a> {
    options: PrintOptions,
    purity: &'a PurityStore,
    comparability: &'a dyn ComparabilityProvider,
    seen: FxHashSet<String>,
    statics_seen: FxHashSet<String>,
}

impl<'a> DeclPrinter<'a> {
    pub fn new(
        options: PrintOptions,
        purity: &'a PurityStore,
        comparability: &'a dyn ComparabilityProvider,
    ) -> Self {
        Self {
            options,
            purity,
            comparability,
            seen: FxHashSet::default(),
            statics_seen: FxHashSet::default(),
        }
    }

    /// Header block preceding all program points
    pub fn write_header(&self, out: &mut String) {
        let mode = if self.comparability.is_implicit() {
            "implicit"
        } else {
            "none"
        };
        let _ = writeln!(out, "decl-version 2.0");
        let _ = writeln!(out, "var-comparability {mode}");
        let _ = writeln!(out, "input-language weft");
    }

    /// Whether a program point passes the select/omit patterns
    pub fn should_print_ppt(&self, name: &str) -> bool {
        if let Some(select) = &self.options.ppt_select {
            if !select.is_match(name) {
                return false;
            }
        }
        if let Some(omit) = &self.options.ppt_omit {
            if omit.is_match(name) {
                return false;
            }
        }
        true
    }

    /// Object-instance program point for a type
    pub fn print_object_ppt(&mut self, cx: &mut TypeContext<'_>, out: &mut String, ty: TypeId) {
        let type_name = cx.resolver.qualified_name(cx.table, ty);
        let name = ppt::object_ppt_name(&type_name);
        if !self.should_print_ppt(&name) {
            return;
        }
        let has_statics = cx.table.get(ty).static_fields().next().is_some();
        let parents = if has_statics {
            vec![ParentRef::new(ppt::class_ppt_name(&type_name), CLASS_RELATION)]
        } else {
            Vec::new()
        };
        self.begin_ppt(out, &name, PptKind::Object, &parents);

        let mut this_flags = VarFlags::IS_PARAM | VarFlags::REF_IMMUTABLE;
        if cx.classifier.is_immutable(cx.table, ty) {
            this_flags |= VarFlags::VAL_IMMUTABLE;
        }
        self.declare(
            cx, out, &name, "this", ty, VarKind::Variable, None, None, this_flags, 0, &[],
        );
    }

    /// Class-static program point; prints nothing when the type declares
    /// no static fields. Returns whether a block was written.
    pub fn print_class_ppt(
        &mut self,
        cx: &mut TypeContext<'_>,
        out: &mut String,
        ty: TypeId,
    ) -> bool {
        if cx.table.get(ty).static_fields().next().is_none() {
            return false;
        }
        let type_name = cx.resolver.qualified_name(cx.table, ty);
        let name = ppt::class_ppt_name(&type_name);
        if !self.should_print_ppt(&name) {
            return false;
        }
        self.begin_ppt(out, &name, PptKind::Class, &[]);
        self.declare_static_fields(cx, out, &name, ty, 0, &[]);
        true
    }

    /// Method-entry program point. Returns the ppt name when printed.
    pub fn print_enter_ppt(
        &mut self,
        cx: &mut TypeContext<'_>,
        out: &mut String,
        owner: TypeId,
        method: &MethodInfo,
    ) -> Option<String> {
        let signature = self.method_signature(cx, owner, method);
        let name = ppt::enter_ppt_name(&signature);
        if !self.should_print_ppt(&name) {
            return None;
        }
        let parents = self.method_parents(cx, owner, method);
        self.begin_ppt(out, &name, PptKind::Enter, &parents);
        self.declare_receiver_and_params(cx, out, &name, owner, method, &parents);
        Some(name)
    }

    /// One method-exit program point. Returns the ppt name when printed.
    pub fn print_exit_ppt(
        &mut self,
        cx: &mut TypeContext<'_>,
        out: &mut String,
        owner: TypeId,
        method: &MethodInfo,
        exit_id: u32,
    ) -> Option<String> {
        let signature = self.method_signature(cx, owner, method);
        let name = ppt::exit_ppt_name(&signature, exit_id);
        if !self.should_print_ppt(&name) {
            return None;
        }
        let parents = self.method_parents(cx, owner, method);
        self.begin_ppt(out, &name, PptKind::Subexit, &parents);
        self.declare_receiver_and_params(cx, out, &name, owner, method, &parents);

        if let Some(return_ty) = method.return_ty {
            self.declare(
                cx, out, &name, "return", return_ty, VarKind::Return, None, None,
                VarFlags::empty(), 0, &[],
            );
        }
        // Placeholder paired with the exceptional-exit runtime records
        let exception_name = cx
            .resolver
            .qualified_name(cx.table, cx.table.core.exception);
        self.emit_leaf(
            out, &name, "exception", VarKind::Variable, None, None, &exception_name,
            RepType::Hashcode, VarFlags::SYNTHETIC, &[],
        );
        Some(name)
    }

    fn method_signature(
        &mut self,
        cx: &mut TypeContext<'_>,
        owner: TypeId,
        method: &MethodInfo,
    ) -> String {
        let type_name = cx.resolver.qualified_name(cx.table, owner);
        let param_types: Vec<String> = method
            .params
            .iter()
            .map(|p| cx.resolver.qualified_name(cx.table, p.ty))
            .collect();
        ppt::method_signature(&type_name, &method.name, &param_types)
    }

    fn method_parents(
        &mut self,
        cx: &mut TypeContext<'_>,
        owner: TypeId,
        method: &MethodInfo,
    ) -> Vec<ParentRef> {
        if method.is_static || method.is_ctor {
            return Vec::new();
        }
        let type_name = cx.resolver.qualified_name(cx.table, owner);
        vec![ParentRef::new(
            ppt::object_ppt_name(&type_name),
            OBJECT_RELATION,
        )]
    }

    fn declare_receiver_and_params(
        &mut self,
        cx: &mut TypeContext<'_>,
        out: &mut String,
        ppt_name: &str,
        owner: TypeId,
        method: &MethodInfo,
        parents: &[ParentRef],
    ) {
        if !method.is_static && !method.is_ctor {
            self.declare(
                cx, out, ppt_name, "this", owner, VarKind::Variable, None, None,
                VarFlags::IS_PARAM | VarFlags::REF_IMMUTABLE, 0, parents,
            );
        }
        for param in &method.params {
            self.declare(
                cx, out, ppt_name, &param.name, param.ty, VarKind::Variable, None, None,
                VarFlags::IS_PARAM, 0, &[],
            );
        }
    }

    fn begin_ppt(&mut self, out: &mut String, name: &str, kind: PptKind, parents: &[ParentRef]) {
        // The per-ppt dedup set clears exactly here; a stale entry would
        // silently drop declarations at the next program point
        self.seen.clear();
        ProgramPoint {
            name: name.to_string(),
            kind,
            parents: parents.to_vec(),
        }
        .write_header(out);
    }

    /// Declare one variable and, depending on its classification, its
    /// children. The traversal order is significant and deterministic.
    #[allow(clippy::too_many_arguments)]
    fn declare(
        &mut self,
        cx: &mut TypeContext<'_>,
        out: &mut String,
        ppt_name: &str,
        name: &str,
        ty: TypeId,
        kind: VarKind,
        relative_name: Option<&str>,
        enclosing: Option<&str>,
        mut flags: VarFlags,
        depth: u32,
        parents: &[ParentRef],
    ) {
        if depth > self.options.nesting_depth {
            return;
        }
        if self.is_var_omitted(name) {
            return;
        }
        if !self.seen.insert(name.to_string()) {
            return;
        }
        let info = cx.table.get(ty);
        if info.kind == TypeKind::Array && info.dims > 1 {
            warn!(
                var = name,
                ty = info.qualified_name.as_str(),
                "skipping multi-dimensional array, unsupported by the output format"
            );
            return;
        }
        if cx.classifier.is_variant(cx.table, ty) {
            flags |= VarFlags::IS_ENUM;
        }

        let dec_type = cx.resolver.qualified_name(cx.table, ty);
        VariableRecord {
            name: name.to_string(),
            kind,
            relative_name: relative_name.map(str::to_string),
            enclosing_var: enclosing.map(str::to_string),
            is_array: false,
            dec_type,
            rep_type: rep_type_of(cx.table, ty),
            flags,
            comparability: self.comparability.compare_group(ppt_name, name),
            element_comparability: None,
            parents: parents.to_vec(),
        }
        .write(out);

        // To-string and classname synthetics are leaves
        if flags.contains(VarFlags::TO_STRING) || flags.contains(VarFlags::CLASSNAME) {
            return;
        }

        if cx.classifier.is_list(cx.table, ty) {
            self.declare_sequence(cx, out, ppt_name, name, ty, flags, depth, parents);
            return;
        }
        self.declare_object_children(cx, out, ppt_name, name, ty, flags, depth, parents);
    }

    /// The `name[..]` element sequence of a list, set, map or array, and
    /// one level of the element type's fields. Sequences of sequences are
    /// not expanded; the output format cannot represent them.
    #[allow(clippy::too_many_arguments)]
    fn declare_sequence(
        &mut self,
        cx: &mut TypeContext<'_>,
        out: &mut String,
        ppt_name: &str,
        name: &str,
        ty: TypeId,
        parent_flags: VarFlags,
        depth: u32,
        parents: &[ParentRef],
    ) {
        // The element sequence is itself a child
        if depth + 1 > self.options.nesting_depth {
            return;
        }
        let element = match cx.classifier.element_type(cx.table, ty) {
            Some(element) => element,
            None => return,
        };
        let element_info = cx.table.get(element);
        if element_info.kind == TypeKind::Array && element_info.dims > 1 {
            warn!(var = name, "skipping multi-dimensional element sequence");
            return;
        }

        let mut seq_flags = VarFlags::SYNTHETIC;
        if cx.classifier.is_set(cx.table, ty) || cx.classifier.is_map(cx.table, ty) {
            seq_flags |= VarFlags::NO_DUPS | VarFlags::NOT_ORDERED;
        }
        seq_flags |= parent_flags.without(
            VarFlags::IS_PARAM | VarFlags::IS_PROPERTY | VarFlags::IS_ENUM,
        );

        let seq_name = format!("{name}[..]");
        if self.is_var_omitted(&seq_name) || !self.seen.insert(seq_name.clone()) {
            return;
        }
        let element_name = cx.resolver.qualified_name(cx.table, element);
        VariableRecord {
            name: seq_name.clone(),
            kind: VarKind::Array,
            relative_name: None,
            enclosing_var: Some(name.to_string()),
            is_array: true,
            dec_type: element_name,
            rep_type: rep_type_of(cx.table, element),
            flags: seq_flags,
            comparability: self.comparability.compare_group(ppt_name, &seq_name),
            element_comparability: Some(self.comparability.element_group(ppt_name, &seq_name)),
            parents: parents.to_vec(),
        }
        .write(out);

        // One level of element fields, counted at the sequence's depth,
        // skipping nested sequences
        if depth + 1 > self.options.nesting_depth {
            return;
        }
        if cx.classifier.is_list(cx.table, element) {
            debug!(var = seq_name.as_str(), "not expanding nested sequence");
            return;
        }
        let element_fields = sorted_instance_fields(cx.table, element);
        for field_name in element_fields {
            let info = cx.table.get(element);
            let field = match info.fields.iter().find(|f| f.name == field_name) {
                Some(field) => field,
                None => continue,
            };
            let field_ty = field.ty;
            if self.skip_field(cx.table, field_name.as_str(), field_ty, field.is_const) {
                continue;
            }
            if cx.classifier.is_list(cx.table, field_ty) {
                continue;
            }
            let child_name = format!("{seq_name}.{field_name}");
            if self.is_var_omitted(&child_name) || !self.seen.insert(child_name.clone()) {
                continue;
            }
            let field_type_name = cx.resolver.qualified_name(cx.table, field_ty);
            VariableRecord {
                name: child_name.clone(),
                kind: VarKind::Field,
                relative_name: Some(field_name.clone()),
                enclosing_var: Some(seq_name.clone()),
                is_array: true,
                dec_type: field_type_name,
                rep_type: rep_type_of(cx.table, field_ty),
                flags: VarFlags::empty(),
                comparability: self.comparability.compare_group(ppt_name, &child_name),
                element_comparability: Some(
                    self.comparability.element_group(ppt_name, &child_name),
                ),
                parents: parents.to_vec(),
            }
            .write(out);
        }
    }

    /// Children of a plain object variable: instance fields, properties,
    /// not-yet-seen statics, the type-of and to-string synthetics, pure
    /// methods and the linked-list spine.
    #[allow(clippy::too_many_arguments)]
    fn declare_object_children(
        &mut self,
        cx: &mut TypeContext<'_>,
        out: &mut String,
        ppt_name: &str,
        name: &str,
        ty: TypeId,
        flags: VarFlags,
        depth: u32,
        parents: &[ParentRef],
    ) {
        // Everything below is one level deeper than the variable itself
        if depth + 1 > self.options.nesting_depth {
            return;
        }
        for field_name in sorted_instance_fields(cx.table, ty) {
            let info = cx.table.get(ty);
            let field = match info.fields.iter().find(|f| f.name == field_name) {
                Some(field) => field,
                None => continue,
            };
            let (field_ty, is_const, is_readonly) = (field.ty, field.is_const, field.is_readonly);
            if self.skip_field(cx.table, &field_name, field_ty, is_const) {
                continue;
            }
            let field_type_immutable = cx.classifier.is_immutable(cx.table, field_ty);
            let child_flags =
                VarFlags::propagate_immutability(flags, is_const, is_readonly, field_type_immutable);
            let child_name = format!("{name}.{field_name}");
            self.declare(
                cx, out, ppt_name, &child_name, field_ty, VarKind::Field,
                Some(&field_name), Some(name), child_flags, depth + 1, parents,
            );
        }

        let property_names: Vec<String> = {
            let mut names: Vec<String> =
                cx.table.get(ty).properties.iter().map(|p| p.name.clone()).collect();
            names.sort();
            names
        };
        for property_name in property_names {
            let info = cx.table.get(ty);
            let property = match info.properties.iter().find(|p| p.name == property_name) {
                Some(property) => property,
                None => continue,
            };
            let (property_ty, has_setter) = (property.ty, property.has_setter);
            let mut child_flags = VarFlags::IS_PROPERTY;
            if !has_setter {
                child_flags |= VarFlags::propagate_immutability(flags, false, true, false);
            }
            let child_name = format!("{name}.{property_name}");
            self.declare(
                cx, out, ppt_name, &child_name, property_ty, VarKind::Field,
                Some(&property_name), Some(name), child_flags, depth + 1, parents,
            );
        }

        self.declare_static_fields(cx, out, ppt_name, ty, depth, parents);

        if !cx.table.get(ty).sealed {
            let type_name = format!("{name}.GetType()");
            self.emit_leaf(
                out, ppt_name, &type_name, VarKind::Function, Some("GetType()"), Some(name),
                "sys.Type", RepType::String, VarFlags::SYNTHETIC | VarFlags::CLASSNAME, parents,
            );
        }

        if ty == cx.table.core.string {
            let string_name = format!("{name}.toString");
            self.emit_leaf(
                out, ppt_name, &string_name, VarKind::Function, Some("toString"), Some(name),
                "sys.String", RepType::String, VarFlags::SYNTHETIC | VarFlags::TO_STRING, parents,
            );
        }

        for method_name in self.purity.pure_methods(cx.table, ty) {
            let method = find_method_in_hierarchy(cx.table, ty, &method_name);
            let (params_empty, return_ty) = match method {
                Some(m) => (m.params.is_empty(), m.return_ty),
                None => {
                    warn!(
                        ty = cx.table.get(ty).qualified_name.as_str(),
                        method = method_name.as_str(),
                        "pure method not found on type, skipping"
                    );
                    continue;
                }
            };
            if !params_empty {
                warn!(
                    method = method_name.as_str(),
                    "pure method takes parameters, skipping"
                );
                continue;
            }
            let return_ty = match return_ty {
                Some(r) => r,
                None => continue,
            };
            let child_name = format!("{name}.{method_name}()");
            let relative = format!("{method_name}()");
            self.declare(
                cx, out, ppt_name, &child_name, return_ty, VarKind::Function,
                Some(&relative), Some(name), VarFlags::SYNTHETIC, depth + 1, parents,
            );
        }

        if cx.classifier.is_linked_list(cx.table, ty) {
            let spine_name = format!("{name}[..]");
            if !self.is_var_omitted(&spine_name) && self.seen.insert(spine_name.clone()) {
                let type_name = cx.resolver.qualified_name(cx.table, ty);
                VariableRecord {
                    name: spine_name.clone(),
                    kind: VarKind::Array,
                    relative_name: None,
                    enclosing_var: Some(name.to_string()),
                    is_array: true,
                    dec_type: type_name,
                    rep_type: RepType::Hashcode,
                    flags: VarFlags::SYNTHETIC,
                    comparability: self.comparability.compare_group(ppt_name, &spine_name),
                    element_comparability: Some(
                        self.comparability.element_group(ppt_name, &spine_name),
                    ),
                    parents: parents.to_vec(),
                }
                .write(out);
            }
        }
    }

    /// Static fields not yet declared anywhere in this printing run
    fn declare_static_fields(
        &mut self,
        cx: &mut TypeContext<'_>,
        out: &mut String,
        ppt_name: &str,
        ty: TypeId,
        depth: u32,
        parents: &[ParentRef],
    ) {
        let type_name = cx.resolver.qualified_name(cx.table, ty);
        let static_names: Vec<String> = {
            let mut names: Vec<String> = cx
                .table
                .get(ty)
                .static_fields()
                .map(|f| f.name.clone())
                .collect();
            names.sort();
            names
        };
        for field_name in static_names {
            let info = cx.table.get(ty);
            let field = match info.fields.iter().find(|f| f.is_static && f.name == field_name) {
                Some(field) => field,
                None => continue,
            };
            let (field_ty, is_const) = (field.ty, field.is_const);
            if self.skip_field(cx.table, &field_name, field_ty, is_const) {
                continue;
            }
            let full_name = format!("{type_name}.{field_name}");
            if !self.statics_seen.insert(full_name.clone()) {
                continue;
            }
            self.declare(
                cx, out, ppt_name, &full_name, field_ty, VarKind::Variable, None, None,
                VarFlags::empty(), depth + 1, parents,
            );
        }
    }

    /// Field-level skip policy: compiler-synthesized fields, event
    /// backing stores, well-known constant sentinels, and fields whose
    /// own type matches the variable omit pattern.
    fn skip_field(
        &self,
        table: &TypeTable,
        field_name: &str,
        field_ty: TypeId,
        is_const: bool,
    ) -> bool {
        if is_const && WELL_KNOWN_CONSTANTS.contains(&field_name) {
            return true;
        }
        if let Some(omit) = &self.options.var_omit {
            let field_type_name = &table.get(field_ty).qualified_name;
            if omit.is_match(field_type_name) {
                return true;
            }
        }
        false
    }

    fn is_var_omitted(&self, name: &str) -> bool {
        self.options
            .var_omit
            .as_ref()
            .is_some_and(|omit| omit.is_match(name))
    }

    /// Write a leaf synthetic record with an explicit declared-type string
    #[allow(clippy::too_many_arguments)]
    fn emit_leaf(
        &mut self,
        out: &mut String,
        ppt_name: &str,
        name: &str,
        kind: VarKind,
        relative_name: Option<&str>,
        enclosing: Option<&str>,
        dec_type: &str,
        rep_type: RepType,
        flags: VarFlags,
        parents: &[ParentRef],
    ) {
        if self.is_var_omitted(name) || !self.seen.insert(name.to_string()) {
            return;
        }
        VariableRecord {
            name: name.to_string(),
            kind,
            relative_name: relative_name.map(str::to_string),
            enclosing_var: enclosing.map(str::to_string),
            is_array: false,
            dec_type: dec_type.to_string(),
            rep_type,
            flags,
            comparability: self.comparability.compare_group(ppt_name, name),
            element_comparability: None,
            parents: parents.to_vec(),
        }
        .write(out);
    }
}

/// Coarse output category for a declared type
pub fn rep_type_of(table: &TypeTable, ty: TypeId) -> RepType {
    let core = &table.core;
    if ty == core.boolean {
        RepType::Boolean
    } else if ty == core.int32 || ty == core.int64 {
        RepType::Int
    } else if ty == core.float64 {
        RepType::Double
    } else {
        RepType::Hashcode
    }
}

fn sorted_instance_fields(table: &TypeTable, ty: TypeId) -> Vec<String> {
    let info = table.get(ty);
    let mut names: Vec<String> = info
        .instance_fields()
        .filter(|f| !f.is_synthesized && !f.is_event_backing)
        .map(|f| f.name.clone())
        .collect();
    names.sort();
    names
}

fn find_method_in_hierarchy<'t>(
    table: &'t TypeTable,
    ty: TypeId,
    name: &str,
) -> Option<&'t MethodInfo> {
    let mut current = Some(ty);
    while let Some(id) = current {
        let info = table.get(id);
        if let Some(method) = info.find_method(name) {
            return Some(method);
        }
        current = info.base;
    }
    None
}
