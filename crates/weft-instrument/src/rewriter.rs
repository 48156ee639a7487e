//! Method-body rewriting
//!
//! Takes an immutable method body and produces a new one with
//! instrumentation inserted at entry, at a single unified exit, and at
//! an exception handler wrapping the whole body. Original control flow
//! is preserved: every branch is relabeled into the new code, exception
//! regions are carried over, and sequence points follow the
//! instructions they annotated.
//!
//! The rewrite proceeds through a fixed sequence of states; a structural
//! problem at any point aborts the method with no partial body
//! committed.

use crate::error::{InstrumentError, InstrumentResult};
use crate::labels::{Arg, CodeBuffer, Label};
use crate::visitor::VisitorRefs;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;
use weft_bytecode::{
    decode_instructions, ExceptionRegion, HandlerKind, Instr, LocalDef, MethodBody, Module, Opcode,
};
use weft_types::{TypeId, TypeTable};

/// Extra evaluation-stack slots reserved for instrumentation sequences.
/// The injected sequences never recurse, so a small constant suffices.
pub const STACK_HEADROOM: u16 = 4;

/// Rewrite progress states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RewriteState {
    Unstarted,
    EntryEmitted,
    BodyRewritten,
    ExitNormalized,
    Finalized,
}

/// A declared thrown-exception type, pre-resolved by the driver
#[derive(Debug, Clone, Copy)]
pub struct ThrownType {
    /// Type-ref index in the module
    pub type_ref: u32,
    /// Resolved runtime type, for subtype ordering
    pub ty: TypeId,
}

/// Per-method facts the rewriter needs beyond the body itself
#[derive(Debug)]
pub struct MethodShape {
    /// Constructor bodies keep their base-call prologue outside the try
    pub is_ctor: bool,
    /// Whether the method returns a value
    pub returns_value: bool,
    /// Type-ref of the return type, when one exists
    pub return_type: Option<u32>,
    /// Constant-pool index of the ppt signature string
    pub ppt_id: u32,
    /// Sampling policy argument passed to the nonce call
    pub sample_policy: i32,
    /// Declared thrown-exception types
    pub thrown: Vec<ThrownType>,
}

/// Rewrites one method body
pub struct MethodRewriter<'a> {
    module: &'a mut Module,
    table: &'a TypeTable,
    visitor: VisitorRefs,
    state: RewriteState,
}

/// Where compiler-synthesized early-return jumps converge
#[derive(Debug, Clone, Copy)]
struct ReturnAnchor {
    /// First offset of the return epilogue; original code at or after
    /// this offset is replaced by the unified exit
    offset: u32,
    /// Local slot of the `load-then-return` epilogue pattern, reused as
    /// the shared return local
    epilogue_slot: Option<u16>,
    /// Source line of the final return, carried to the unified exit
    line: Option<u32>,
}

impl<'a> MethodRewriter<'a> {
    pub fn new(module: &'a mut Module, table: &'a TypeTable, visitor: VisitorRefs) -> Self {
        Self {
            module,
            table,
            visitor,
            state: RewriteState::Unstarted,
        }
    }

    /// Rewrite a method body. Fails only on structural inconsistency;
    /// the input body is never mutated.
    pub fn rewrite(
        mut self,
        body: &MethodBody,
        shape: &MethodShape,
    ) -> InstrumentResult<MethodBody> {
        let instrs = decode_instructions(&body.code)?;
        if instrs.is_empty() {
            return Err(InstrumentError::EmptyBody);
        }
        let code_len = body.code.len() as u32;
        let boundaries: FxHashSet<u32> = instrs.iter().map(|i| i.offset).collect();
        let line_at: FxHashMap<u32, u32> = body
            .sequence_points
            .iter()
            .map(|sp| (sp.offset, sp.line))
            .collect();

        let anchor = locate_return_anchor(&instrs, code_len, &line_at);
        trace!(anchor = anchor.offset, "located return anchor");

        // Locals: the originals, then the nonce, the stored exception,
        // and (unless the epilogue slot is reused) the shared return local
        let mut locals = body.locals.clone();
        let int32_ref = self.module.add_plain_type_ref("sys.Int32");
        let exception_ref = self.module.add_plain_type_ref("sys.Exception");
        let interrupt_ref = self
            .module
            .add_plain_type_ref("sys.ThreadInterruptException");
        let nonce_slot = push_local(self.module, &mut locals, "$nonce", int32_ref);
        let exc_slot = push_local(self.module, &mut locals, "$exc", exception_ref);
        let ret_slot = if !shape.returns_value {
            None
        } else if let Some(slot) = anchor.epilogue_slot {
            Some(slot)
        } else {
            let ty = shape.return_type.unwrap_or(int32_ref);
            Some(push_local(self.module, &mut locals, "$ret", ty))
        };

        let mut buffer = CodeBuffer::new();
        let offset_labels: FxHashMap<u32, Label> = instrs
            .iter()
            .map(|i| (i.offset, buffer.fresh_label()))
            .collect();
        let l_skip_entry = buffer.fresh_label();
        let l_body_start = buffer.fresh_label();
        let l_try_end = buffer.fresh_label();
        let l_handler_start = buffer.fresh_label();
        let l_handler_end = buffer.fresh_label();
        let l_common_exit = buffer.fresh_label();
        let l_rethrow = buffer.fresh_label();

        self.advance(RewriteState::Unstarted, RewriteState::EntryEmitted);
        self.emit_entry(&mut buffer, shape, nonce_slot, l_skip_entry);

        self.advance(RewriteState::EntryEmitted, RewriteState::BodyRewritten);
        self.emit_body(
            &mut buffer,
            &instrs,
            &boundaries,
            &line_at,
            &offset_labels,
            anchor,
            shape,
            ret_slot,
            l_body_start,
            l_common_exit,
        )?;
        buffer.bind(l_try_end);

        self.advance(RewriteState::BodyRewritten, RewriteState::ExitNormalized);
        self.emit_handler(
            &mut buffer,
            shape,
            nonce_slot,
            exc_slot,
            interrupt_ref,
            l_handler_start,
            l_handler_end,
            l_rethrow,
        );
        self.emit_unified_exit(
            &mut buffer,
            shape,
            nonce_slot,
            ret_slot,
            anchor.line,
            l_common_exit,
        );

        self.advance(RewriteState::ExitNormalized, RewriteState::Finalized);
        let assembled = buffer.assemble()?;

        let mut regions = Vec::with_capacity(body.regions.len() + 1);
        for region in &body.regions {
            let map = |offset: u32| -> InstrumentResult<u32> {
                if offset >= anchor.offset {
                    return assembled.offset_of(l_try_end);
                }
                let label = offset_labels
                    .get(&offset)
                    .copied()
                    .ok_or(InstrumentError::BadRegionBoundary { offset })?;
                assembled.offset_of(label)
            };
            regions.push(ExceptionRegion {
                try_start: map(region.try_start)?,
                try_end: map(region.try_end)?,
                handler_start: map(region.handler_start)?,
                handler_end: map(region.handler_end)?,
                kind: region.kind,
                catch_type: region.catch_type,
            });
        }
        regions.push(ExceptionRegion {
            try_start: assembled.offset_of(l_body_start)?,
            try_end: assembled.offset_of(l_try_end)?,
            handler_start: assembled.offset_of(l_handler_start)?,
            handler_end: assembled.offset_of(l_handler_end)?,
            kind: HandlerKind::Catch,
            catch_type: Some(exception_ref),
        });

        Ok(MethodBody {
            max_stack: body.max_stack.saturating_add(STACK_HEADROOM),
            locals,
            code: assembled.code,
            regions,
            sequence_points: assembled.sequence_points,
        })
    }

    fn advance(&mut self, from: RewriteState, to: RewriteState) {
        debug_assert_eq!(self.state, from);
        self.state = to;
    }

    /// Nonce allocation and the entry visit, with a skip branch taken
    /// when the nonce signals this invocation is sampled out
    fn emit_entry(
        &mut self,
        buffer: &mut CodeBuffer,
        shape: &MethodShape,
        nonce_slot: u16,
        l_skip_entry: Label,
    ) {
        buffer.push(Opcode::ConstI32, Arg::I32(shape.ppt_id as i32));
        buffer.push(Opcode::ConstI32, Arg::I32(shape.sample_policy));
        buffer.push(Opcode::Call, Arg::U32(self.visitor.invocation_nonce));
        buffer.push(Opcode::StoreLocal, Arg::Slot(nonce_slot));
        buffer.push(Opcode::LoadLocal, Arg::Slot(nonce_slot));
        buffer.push(Opcode::ConstI32, Arg::I32(0));
        buffer.push(Opcode::Lt, Arg::None);
        buffer.branch(Opcode::BranchTrue, l_skip_entry);
        buffer.push(Opcode::Call, Arg::U32(self.visitor.acquire));
        buffer.push(Opcode::LoadLocal, Arg::Slot(nonce_slot));
        buffer.push(Opcode::ConstI32, Arg::I32(shape.ppt_id as i32));
        buffer.push(Opcode::Call, Arg::U32(self.visitor.enter));
        buffer.push(Opcode::Call, Arg::U32(self.visitor.release));
        buffer.bind(l_skip_entry);
    }

    /// Re-emit the original body with relabeled branches, returns routed
    /// to the common exit, and the epilogue at the anchor absorbed
    #[allow(clippy::too_many_arguments)]
    fn emit_body(
        &mut self,
        buffer: &mut CodeBuffer,
        instrs: &[Instr],
        boundaries: &FxHashSet<u32>,
        line_at: &FxHashMap<u32, u32>,
        offset_labels: &FxHashMap<u32, Label>,
        anchor: ReturnAnchor,
        shape: &MethodShape,
        ret_slot: Option<u16>,
        l_body_start: Label,
        l_common_exit: Label,
    ) -> InstrumentResult<()> {
        let try_start_index = if shape.is_ctor {
            // The base-constructor call cannot sit inside a try region
            instrs
                .iter()
                .position(|i| matches!(i.opcode, Opcode::Call | Opcode::CallVirt))
                .map(|i| i + 1)
                .unwrap_or(0)
        } else {
            0
        };

        let mut body_start_bound = false;
        let mut index = 0;
        while index < instrs.len() {
            let instr = &instrs[index];
            if instr.offset >= anchor.offset {
                break;
            }
            if index == try_start_index {
                buffer.bind(l_body_start);
                body_start_bound = true;
            }
            buffer.bind(offset_labels[&instr.offset]);
            let line = line_at.get(&instr.offset).copied();

            // A store immediately followed by a jump into the return
            // epilogue is a compiler-synthesized early return; route the
            // value into the shared return local instead so it is not
            // double-stored
            if shape.returns_value && instr.opcode == Opcode::StoreLocal {
                if let Some(next) = instrs.get(index + 1) {
                    let jumps_to_epilogue = next.opcode == Opcode::Jump
                        && next.operand.as_target().is_some_and(|t| t >= anchor.offset);
                    if jumps_to_epilogue {
                        let slot = ret_slot.expect("return local for value-returning method");
                        buffer.push_at_line(Opcode::StoreLocal, Arg::Slot(slot), line);
                        buffer.bind(offset_labels[&next.offset]);
                        buffer.branch(Opcode::Leave, l_common_exit);
                        index += 2;
                        continue;
                    }
                }
            }

            match instr.opcode {
                Opcode::Ret => {
                    if let Some(slot) = ret_slot {
                        buffer.push_at_line(Opcode::StoreLocal, Arg::Slot(slot), line);
                    }
                    buffer.branch(Opcode::Leave, l_common_exit);
                }
                opcode if opcode.is_branch() => {
                    let target = instr
                        .operand
                        .as_target()
                        .ok_or(InstrumentError::BadBranchTarget { target: 0 })?;
                    if target >= anchor.offset {
                        buffer.push_at_line(opcode, Arg::Target(l_common_exit), line);
                    } else if boundaries.contains(&target) {
                        buffer.push_at_line(opcode, Arg::Target(offset_labels[&target]), line);
                    } else {
                        return Err(InstrumentError::BadBranchTarget { target });
                    }
                }
                opcode => {
                    buffer.push_at_line(opcode, Arg::from_operand(instr.operand), line);
                }
            }
            index += 1;
        }

        if !body_start_bound {
            // The whole body was prologue or epilogue; the try region
            // still wraps the bridge below so it is never empty
            buffer.bind(l_body_start);
        }

        // Bridge the fall-through into the absorbed epilogue. When the
        // epilogue loaded a local we reuse that slot, so the value is
        // already in place; otherwise it is still on the stack.
        if let Some(slot) = ret_slot {
            if anchor.epilogue_slot.is_none() {
                buffer.push(Opcode::StoreLocal, Arg::Slot(slot));
            }
        }
        buffer.branch(Opcode::Leave, l_common_exit);
        Ok(())
    }

    /// Whole-body catch handler: a thread-interrupt skip, one typed
    /// check per declared thrown type ordered so no check precedes a
    /// subclass's check, a catch-all, then rethrow
    #[allow(clippy::too_many_arguments)]
    fn emit_handler(
        &mut self,
        buffer: &mut CodeBuffer,
        shape: &MethodShape,
        nonce_slot: u16,
        exc_slot: u16,
        interrupt_ref: u32,
        l_handler_start: Label,
        l_handler_end: Label,
        l_rethrow: Label,
    ) {
        buffer.bind(l_handler_start);
        buffer.push(Opcode::StoreLocal, Arg::Slot(exc_slot));

        // Thread teardown exits are not instrumented; the runtime counts
        // them through its own teardown hook
        buffer.push(Opcode::LoadLocal, Arg::Slot(exc_slot));
        buffer.push(Opcode::IsInstance, Arg::U32(interrupt_ref));
        buffer.branch(Opcode::BranchTrue, l_rethrow);

        let ordered = sort_subclass_first(self.table, &shape.thrown);
        for thrown in ordered {
            let l_next = buffer.fresh_label();
            buffer.push(Opcode::LoadLocal, Arg::Slot(exc_slot));
            buffer.push(Opcode::IsInstance, Arg::U32(thrown.type_ref));
            buffer.branch(Opcode::BranchFalse, l_next);
            buffer.push(Opcode::LoadLocal, Arg::Slot(nonce_slot));
            buffer.push(Opcode::ConstI32, Arg::I32(shape.ppt_id as i32));
            buffer.push(Opcode::Call, Arg::U32(self.visitor.exceptional_exit));
            buffer.branch(Opcode::Jump, l_rethrow);
            buffer.bind(l_next);
        }

        // Catch-all for undeclared exception types
        buffer.push(Opcode::LoadLocal, Arg::Slot(nonce_slot));
        buffer.push(Opcode::ConstI32, Arg::I32(shape.ppt_id as i32));
        buffer.push(Opcode::Call, Arg::U32(self.visitor.exceptional_exit));

        buffer.bind(l_rethrow);
        buffer.push(Opcode::LoadLocal, Arg::Slot(exc_slot));
        buffer.push(Opcode::Rethrow, Arg::None);
        buffer.bind(l_handler_end);
    }

    /// The single point where exit instrumentation fires, followed by
    /// the one real return instruction
    fn emit_unified_exit(
        &mut self,
        buffer: &mut CodeBuffer,
        shape: &MethodShape,
        nonce_slot: u16,
        ret_slot: Option<u16>,
        line: Option<u32>,
        l_common_exit: Label,
    ) {
        buffer.bind(l_common_exit);
        buffer.push(Opcode::Call, Arg::U32(self.visitor.acquire));
        buffer.push(Opcode::LoadLocal, Arg::Slot(nonce_slot));
        buffer.push(Opcode::ConstI32, Arg::I32(shape.ppt_id as i32));
        buffer.push(Opcode::Call, Arg::U32(self.visitor.exit));
        buffer.push(Opcode::Call, Arg::U32(self.visitor.release));
        if let Some(slot) = ret_slot {
            buffer.push(Opcode::LoadLocal, Arg::Slot(slot));
        }
        buffer.push_at_line(Opcode::Ret, Arg::None, line);
    }
}

/// Offsets of the original return instructions, used as exit-ppt ids
pub fn return_offsets(instrs: &[Instr]) -> Vec<u32> {
    instrs
        .iter()
        .filter(|i| i.opcode == Opcode::Ret)
        .map(|i| i.offset)
        .collect()
}

/// Walk backward from the end, skipping trailing no-ops, to the final
/// return epilogue. A `load-local; ret` tail marks where synthesized
/// early-return jumps converge.
fn locate_return_anchor(
    instrs: &[Instr],
    code_len: u32,
    line_at: &FxHashMap<u32, u32>,
) -> ReturnAnchor {
    let last = match instrs.iter().rposition(|i| i.opcode != Opcode::Nop) {
        Some(index) => index,
        None => {
            return ReturnAnchor {
                offset: code_len,
                epilogue_slot: None,
                line: None,
            }
        }
    };
    if instrs[last].opcode != Opcode::Ret {
        // No final return (the method ends in a throw); nothing to absorb
        return ReturnAnchor {
            offset: code_len,
            epilogue_slot: None,
            line: None,
        };
    }
    let line = line_at.get(&instrs[last].offset).copied();
    if last > 0 && instrs[last - 1].opcode == Opcode::LoadLocal {
        ReturnAnchor {
            offset: instrs[last - 1].offset,
            epilogue_slot: instrs[last - 1].operand.as_slot(),
            line,
        }
    } else {
        ReturnAnchor {
            offset: instrs[last].offset,
            epilogue_slot: None,
            line,
        }
    }
}

/// Insertion sort by subclass relation: each type is inserted before
/// the first earlier entry it is a subtype of.
fn sort_subclass_first(table: &TypeTable, thrown: &[ThrownType]) -> Vec<ThrownType> {
    let mut sorted: Vec<ThrownType> = Vec::with_capacity(thrown.len());
    for &thrown_type in thrown {
        let position = sorted
            .iter()
            .position(|earlier| table.is_subtype_of(thrown_type.ty, earlier.ty))
            .unwrap_or(sorted.len());
        sorted.insert(position, thrown_type);
    }
    sorted
}

fn push_local(module: &mut Module, locals: &mut Vec<LocalDef>, name: &str, ty: u32) -> u16 {
    let slot = locals.len() as u16;
    let name = module.intern_string(name);
    locals.push(LocalDef { name, ty });
    slot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::VisitorRefs;
    use weft_bytecode::{BytecodeWriter, Operand};
    use weft_types::TypeKind;

    fn shape(returns_value: bool) -> MethodShape {
        MethodShape {
            is_ctor: false,
            returns_value,
            return_type: None,
            ppt_id: 0,
            sample_policy: 0,
            thrown: Vec::new(),
        }
    }

    fn rewrite(body: &MethodBody, shape: &MethodShape) -> InstrumentResult<(MethodBody, Module)> {
        let mut module = Module::new("test".to_string());
        let visitor = VisitorRefs::install(&mut module);
        let table = TypeTable::new();
        let rewriter = MethodRewriter::new(&mut module, &table, visitor);
        let body = rewriter.rewrite(body, shape)?;
        Ok((body, module))
    }

    fn body_from(code: Vec<u8>, max_stack: u16) -> MethodBody {
        MethodBody {
            max_stack,
            locals: Vec::new(),
            code,
            regions: Vec::new(),
            sequence_points: Vec::new(),
        }
    }

    #[test]
    fn test_anchor_skips_trailing_nops() {
        let mut writer = BytecodeWriter::new();
        writer.emit_ret();
        writer.emit_nop();
        writer.emit_nop();
        let instrs = decode_instructions(writer.buffer()).unwrap();
        let anchor = locate_return_anchor(&instrs, 3, &FxHashMap::default());
        assert_eq!(anchor.offset, 0);
        assert_eq!(anchor.epilogue_slot, None);
    }

    #[test]
    fn test_anchor_absorbs_load_ret_epilogue() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(1); // 0
        writer.emit_store_local(0); // 5
        writer.emit_load_local(0); // 8
        writer.emit_ret(); // 11
        let instrs = decode_instructions(writer.buffer()).unwrap();
        let anchor = locate_return_anchor(&instrs, 12, &FxHashMap::default());
        assert_eq!(anchor.offset, 8);
        assert_eq!(anchor.epilogue_slot, Some(0));
    }

    #[test]
    fn test_subclass_checks_precede_superclass_checks() {
        let mut table = TypeTable::new();
        let base = table.declare("m.BaseError", TypeKind::Class);
        table.get_mut(base).base = Some(table.core.exception);
        let derived = table.declare("m.DerivedError", TypeKind::Class);
        table.get_mut(derived).base = Some(base);
        let other = table.declare("m.OtherError", TypeKind::Class);
        table.get_mut(other).base = Some(table.core.exception);

        let thrown = [
            ThrownType { type_ref: 0, ty: base },
            ThrownType { type_ref: 1, ty: other },
            ThrownType { type_ref: 2, ty: derived },
        ];
        let ordered = sort_subclass_first(&table, &thrown);
        let position = |ty: TypeId| ordered.iter().position(|t| t.ty == ty).unwrap();
        assert!(position(derived) < position(base));
        for (i, earlier) in ordered.iter().enumerate() {
            for later in &ordered[i + 1..] {
                assert!(
                    !table.is_subtype_of(later.ty, earlier.ty),
                    "a supertype check precedes its subtype's"
                );
            }
        }
    }

    #[test]
    fn test_rewritten_body_verifies() {
        // int method: const 7; store 0; load 0; ret
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(7);
        writer.emit_store_local(0);
        writer.emit_load_local(0);
        writer.emit_ret();
        let mut body = body_from(writer.into_bytes(), 1);
        body.locals.push(LocalDef { name: 0, ty: 0 });

        let mut test_shape = shape(true);
        test_shape.return_type = Some(0);
        let (rewritten, module) = rewrite(&body, &test_shape).unwrap();

        assert_eq!(rewritten.regions.len(), 1);
        assert_eq!(rewritten.regions[0].kind, HandlerKind::Catch);
        assert_eq!(rewritten.max_stack, 1 + STACK_HEADROOM);

        let method = weft_bytecode::MethodDef {
            name: 0,
            flags: weft_bytecode::method_flags::STATIC,
            params: Vec::new(),
            return_type: Some(0),
            thrown: Vec::new(),
            body: None,
        };
        weft_bytecode::verify_body(&module, &method, &rewritten).unwrap();
    }

    #[test]
    fn test_exactly_one_ret_remains() {
        // Two returns: branch-dependent early return plus final return
        let mut writer = BytecodeWriter::new();
        writer.emit_opcode(Opcode::ConstTrue); // 0
        let patch = writer.offset() + 1;
        writer.emit_instr(&Instr::new(Opcode::BranchFalse, Operand::U32(0))); // 1
        writer.emit_const_i32(1); // 6
        writer.emit_ret(); // 11
        writer.patch_u32(patch, writer.offset() as u32);
        writer.emit_const_i32(2); // 12
        writer.emit_ret(); // 17
        let body = body_from(writer.into_bytes(), 1);

        let (rewritten, _module) = rewrite(&body, &shape(true)).unwrap();
        let instrs = decode_instructions(&rewritten.code).unwrap();
        let rets = instrs.iter().filter(|i| i.opcode == Opcode::Ret).count();
        assert_eq!(rets, 1, "returns were not unified");
        let leaves = instrs.iter().filter(|i| i.opcode == Opcode::Leave).count();
        assert!(leaves >= 2, "original returns should leave to the common exit");
    }

    #[test]
    fn test_exit_instrumentation_fires_once_per_path() {
        let mut writer = BytecodeWriter::new();
        writer.emit_ret();
        let body = body_from(writer.into_bytes(), 0);
        let (rewritten, module) = rewrite(&body, &shape(false)).unwrap();

        let visitor_exit = module
            .method_refs
            .iter()
            .position(|r| module.string(r.name) == "exit")
            .unwrap() as u32;
        let instrs = decode_instructions(&rewritten.code).unwrap();
        let exit_calls = instrs
            .iter()
            .filter(|i| {
                i.opcode == Opcode::Call && i.operand == Operand::U32(visitor_exit)
            })
            .count();
        assert_eq!(exit_calls, 1, "exit instrumentation must have one call site");
    }

    #[test]
    fn test_empty_body_rejected() {
        let body = body_from(Vec::new(), 0);
        assert!(matches!(
            rewrite(&body, &shape(false)),
            Err(InstrumentError::EmptyBody)
        ));
    }

    #[test]
    fn test_branch_to_garbage_rejected() {
        let mut writer = BytecodeWriter::new();
        writer.emit_jump(3); // middle of the jump's own operand
        writer.emit_ret();
        let body = body_from(writer.into_bytes(), 0);
        assert!(matches!(
            rewrite(&body, &shape(false)),
            Err(InstrumentError::BadBranchTarget { target: 3 })
        ));
    }

    #[test]
    fn test_original_region_carried_over() {
        // try { nop } catch { pop; jump exit } ; exit: ret
        let mut writer = BytecodeWriter::new();
        writer.emit_nop(); // 0
        let skip = writer.offset() + 1;
        writer.emit_jump(0); // 1
        writer.emit_opcode(Opcode::Pop); // 6
        let join = writer.offset() + 1;
        writer.emit_jump(0); // 7
        let exit = writer.offset() as u32; // 12
        writer.patch_u32(skip, exit);
        writer.patch_u32(join, exit);
        writer.emit_ret(); // 12
        let mut body = body_from(writer.into_bytes(), 1);
        let exception_ref = 0;
        body.regions.push(ExceptionRegion {
            try_start: 0,
            try_end: 1,
            handler_start: 6,
            handler_end: 12,
            kind: HandlerKind::Catch,
            catch_type: Some(exception_ref),
        });

        let (rewritten, _module) = rewrite(&body, &shape(false)).unwrap();
        assert_eq!(rewritten.regions.len(), 2);
        let outer = &rewritten.regions[1];
        let inner = &rewritten.regions[0];
        assert!(outer.try_start <= inner.try_start);
        assert!(inner.handler_end <= outer.try_end);
    }

    #[test]
    fn test_sequence_points_preserved() {
        let mut writer = BytecodeWriter::new();
        writer.emit_nop(); // 0
        writer.emit_const_i32(3); // 1
        writer.emit_opcode(Opcode::Pop); // 6
        writer.emit_ret(); // 7
        let mut body = body_from(writer.into_bytes(), 1);
        body.sequence_points.push(weft_bytecode::SequencePoint { offset: 1, line: 10 });
        body.sequence_points.push(weft_bytecode::SequencePoint { offset: 7, line: 12 });

        let (rewritten, _module) = rewrite(&body, &shape(false)).unwrap();
        let lines: Vec<u32> = rewritten.sequence_points.iter().map(|sp| sp.line).collect();
        assert!(lines.contains(&10));
        // The final return's line follows it to the unified exit
        assert!(lines.contains(&12));
    }
}
