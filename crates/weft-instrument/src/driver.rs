//! Module-level instrumentation driver
//!
//! Orchestrates one module's run: load, plan, print declarations,
//! rewrite method bodies, brand the module, and verify the result.
//! Planning is a separate pass so the declaration printer and the
//! rewriter each see a settled type model.

use crate::error::{InstrumentError, InstrumentResult};
use crate::options::InstrumentOptions;
use crate::rewriter::{return_offsets, MethodRewriter, MethodShape, ThrownType};
use crate::visitor::{append_marker, is_instrumented, VisitorRefs};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use weft_bytecode::{decode_instructions, method_flags, type_flags, verify_module, Module};
use weft_decls::{
    ppt, ComparabilityProvider, DeclPrinter, FixedComparability, PrintOptions, PurityStore,
    SummaryComparability, TypeContext,
};
use weft_types::{
    load_module_types, MethodInfo, TypeClassifier, TypeDeclaration, TypeId, TypeNameResolver,
    TypeTable,
};

/// Result of instrumenting one module
#[derive(Debug)]
pub struct InstrumentOutcome {
    /// The rewritten module (untouched when declarations-only)
    pub module: Module,
    /// Declaration text for every program point in the module
    pub decls: String,
    /// Number of types that produced declarations
    pub types_declared: usize,
    /// Number of method bodies rewritten
    pub methods_instrumented: usize,
}

struct MethodPlan {
    type_index: usize,
    method_index: usize,
    signature: String,
    exit_ids: Vec<u32>,
    is_ctor: bool,
    return_type: Option<u32>,
    thrown: Vec<ThrownType>,
    info: MethodInfo,
}

struct TypePlan {
    owner: TypeId,
    methods: Vec<MethodPlan>,
}

/// Instrument a `.wfm` file on disk
pub fn instrument_file(
    path: &Path,
    options: &InstrumentOptions,
) -> InstrumentResult<InstrumentOutcome> {
    let bytes = fs::read(path)?;
    let module = Module::decode(&bytes)?;
    info!(path = %path.display(), module = %module.metadata.name, "loaded module");
    instrument_module(module, options)
}

/// Instrument an in-memory module
pub fn instrument_module(
    mut module: Module,
    options: &InstrumentOptions,
) -> InstrumentResult<InstrumentOutcome> {
    if is_instrumented(&module) {
        return Err(InstrumentError::AlreadyInstrumented);
    }
    if !module.has_debug_info() {
        if options.comparability_file.is_some() {
            return Err(InstrumentError::DebugInfoRequired);
        }
        warn!(
            module = %module.metadata.name,
            "module has no debug info; line mappings will be absent"
        );
    }

    let mut table = TypeTable::new();
    let mut resolver = TypeNameResolver::new();
    let mut classifier = TypeClassifier::new();
    load_module_types(&mut table, &mut resolver, &module)?;

    let plans = plan_methods(&mut table, &mut resolver, &module)?;

    let purity = match &options.purity_file {
        Some(path) => PurityStore::parse(&fs::read_to_string(path)?),
        None => PurityStore::new(),
    };
    let comparability: Box<dyn ComparabilityProvider> = match &options.comparability_file {
        Some(path) => Box::new(SummaryComparability::from_bytes(&fs::read(path)?)?),
        None => Box::new(FixedComparability),
    };
    let print_options = PrintOptions::compile(
        options.nesting_depth,
        options.ppt_omit.as_deref(),
        options.ppt_select.as_deref(),
        options.var_omit.as_deref(),
    )?;

    let mut printer = DeclPrinter::new(print_options, &purity, comparability.as_ref());
    let mut decls = String::new();
    printer.write_header(&mut decls);

    let mut cx = TypeContext {
        table: &table,
        classifier: &mut classifier,
        resolver: &mut resolver,
    };
    for plan in &plans {
        printer.print_class_ppt(&mut cx, &mut decls, plan.owner);
        printer.print_object_ppt(&mut cx, &mut decls, plan.owner);
        for method in &plan.methods {
            printer.print_enter_ppt(&mut cx, &mut decls, plan.owner, &method.info);
            for &exit_id in &method.exit_ids {
                printer.print_exit_ppt(&mut cx, &mut decls, plan.owner, &method.info, exit_id);
            }
        }
    }
    let types_declared = plans.len();

    if options.decls_only {
        return Ok(InstrumentOutcome {
            module,
            decls,
            types_declared,
            methods_instrumented: 0,
        });
    }

    let visitor = VisitorRefs::install(&mut module);
    let mut methods_instrumented = 0usize;
    for plan in &plans {
        for method in &plan.methods {
            let ppt_id = module.intern_string(&method.signature);
            let shape = MethodShape {
                is_ctor: method.is_ctor,
                returns_value: method.return_type.is_some(),
                return_type: method.return_type,
                ppt_id,
                sample_policy: options.sample_start,
                thrown: method.thrown.clone(),
            };
            let body = module.types[method.type_index].methods[method.method_index]
                .body
                .clone()
                .expect("planned method has a body");
            debug!(signature = %method.signature, "rewriting method");
            let rewriter = MethodRewriter::new(&mut module, &table, visitor);
            let rewritten = rewriter.rewrite(&body, &shape)?;
            module.types[method.type_index].methods[method.method_index].body = Some(rewritten);
            methods_instrumented += 1;
        }
    }

    append_marker(&mut module);
    verify_module(&module)?;
    info!(
        module = %module.metadata.name,
        types = types_declared,
        methods = methods_instrumented,
        "instrumentation complete"
    );

    Ok(InstrumentOutcome {
        module,
        decls,
        types_declared,
        methods_instrumented,
    })
}

/// Collect the per-method facts both the printer and the rewriter need.
///
/// Synthetic types and methods are skipped, as are bodies the compiler
/// never produced (abstract and interface methods).
fn plan_methods(
    table: &mut TypeTable,
    resolver: &mut TypeNameResolver,
    module: &Module,
) -> InstrumentResult<Vec<TypePlan>> {
    let mut plans = Vec::new();
    for (type_index, type_def) in module.types.iter().enumerate() {
        if type_def.has_flag(type_flags::SYNTHETIC) {
            continue;
        }
        let type_name = module.string(type_def.name).to_string();
        let owner = match resolver.resolve_name(table, &type_name)? {
            TypeDeclaration::Single(id) => id,
            TypeDeclaration::Constraints(_) => continue,
        };
        let info_methods = table.get(owner).methods.clone();

        let mut methods = Vec::new();
        for (method_index, method_def) in type_def.methods.iter().enumerate() {
            if method_def.has_flag(method_flags::SYNTHETIC)
                || method_def.has_flag(method_flags::ABSTRACT)
            {
                continue;
            }
            let body = match &method_def.body {
                Some(body) if !body.code.is_empty() => body,
                _ => continue,
            };
            let info = info_methods[method_index].clone();

            let param_types: Vec<String> = info
                .params
                .iter()
                .map(|p| resolver.qualified_name(table, p.ty))
                .collect();
            let qualified_owner = resolver.qualified_name(table, owner);
            let signature = ppt::method_signature(&qualified_owner, &info.name, &param_types);

            let mut thrown = Vec::with_capacity(method_def.thrown.len());
            for &type_ref in &method_def.thrown {
                let decl = resolver.resolve_ref(table, module, type_ref)?;
                thrown.push(ThrownType {
                    type_ref,
                    ty: decl.representative(),
                });
            }

            let instrs = decode_instructions(&body.code)?;
            methods.push(MethodPlan {
                type_index,
                method_index,
                signature,
                exit_ids: return_offsets(&instrs),
                is_ctor: info.is_ctor,
                return_type: method_def.return_type,
                thrown,
                info,
            });
        }
        plans.push(TypePlan { owner, methods });
    }
    Ok(plans)
}
