//! Structural verification of method bodies
//!
//! The verifier is the rewriter's precondition and post-pass: branch
//! targets must land on instruction boundaries, exception regions must
//! nest without partial overlap and align to instruction boundaries,
//! operand indices must be in range, every body must end in a terminator,
//! and the evaluation stack must stay consistent and within `max_stack`.

use crate::encoder::{decode_instructions, Instr, Operand};
use crate::module::{HandlerKind, MethodBody, MethodDef, Module};
use crate::opcode::Opcode;
use rustc_hash::{FxHashMap, FxHashSet};

/// Structural verification errors
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] crate::encoder::DecodeError),

    /// Branch to a non-existent offset
    #[error("Invalid branch target {target} at offset {offset}")]
    InvalidBranchTarget { target: u32, offset: u32 },

    /// Constant pool reference out of range
    #[error("Invalid constant pool reference {index} at offset {offset}")]
    InvalidConstantRef { index: u32, offset: u32 },

    /// Type/method/field ref out of range
    #[error("Invalid {table} reference {index} at offset {offset}")]
    InvalidTableRef {
        table: &'static str,
        index: u32,
        offset: u32,
    },

    /// Local slot out of range
    #[error("Invalid local slot {index} (max {max}) at offset {offset}")]
    InvalidLocalSlot { index: u16, max: usize, offset: u32 },

    /// Argument slot out of range
    #[error("Invalid argument slot {index} (max {max}) at offset {offset}")]
    InvalidArgSlot { index: u16, max: usize, offset: u32 },

    /// Exception region boundary not on an instruction boundary
    #[error("Exception region boundary {offset} is not an instruction boundary")]
    MisalignedRegion { offset: u32 },

    /// Regions partially overlap
    #[error("Exception regions partially overlap: [{a_start}, {a_end}) and [{b_start}, {b_end})")]
    OverlappingRegions {
        a_start: u32,
        a_end: u32,
        b_start: u32,
        b_end: u32,
    },

    /// Catch region without a caught type
    #[error("Catch handler at {handler_start} has no caught type")]
    CatchWithoutType { handler_start: u32 },

    /// Empty or inverted region range
    #[error("Exception region has an empty or inverted range [{start}, {end})")]
    EmptyRegion { start: u32, end: u32 },

    /// Stack underflow
    #[error("Stack underflow at offset {0}")]
    StackUnderflow(u32),

    /// Stack depth exceeds declared maximum
    #[error("Stack depth {depth} exceeds max_stack {max} at offset {offset}")]
    StackOverflow { depth: u32, max: u16, offset: u32 },

    /// Inconsistent stack depth at a join point
    #[error("Inconsistent stack depth at offset {offset}: {expected} vs {actual}")]
    InconsistentStack {
        offset: u32,
        expected: u32,
        actual: u32,
    },

    /// Execution falls off the end of the body
    #[error("Execution falls off end of method at offset {0}")]
    FallOffEnd(u32),

    /// Module-level validation error
    #[error("Module validation error: {0}")]
    ModuleValidation(String),
}

/// Verify every method body in a module
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    module.validate().map_err(VerifyError::ModuleValidation)?;
    for type_def in &module.types {
        for method in &type_def.methods {
            if let Some(body) = &method.body {
                verify_body(module, method, body)?;
            }
        }
    }
    Ok(())
}

/// Verify a single method body
pub fn verify_body(module: &Module, method: &MethodDef, body: &MethodBody) -> Result<(), VerifyError> {
    if body.code.is_empty() {
        return Ok(());
    }

    let instructions = decode_instructions(&body.code)?;
    let boundaries: FxHashSet<u32> = instructions.iter().map(|i| i.offset).collect();
    let end = body.code.len() as u32;

    verify_branch_targets(&instructions, &boundaries)?;
    verify_operand_refs(module, method, body, &instructions)?;
    verify_regions(body, &boundaries, end)?;

    // The last instruction must not fall through
    let last = instructions.last().expect("non-empty body");
    if !last.opcode.is_terminator() {
        return Err(VerifyError::FallOffEnd(last.offset));
    }

    verify_stack_depth(module, method, body, &instructions)?;
    Ok(())
}

fn verify_branch_targets(
    instructions: &[Instr],
    boundaries: &FxHashSet<u32>,
) -> Result<(), VerifyError> {
    for instr in instructions {
        if instr.opcode.is_branch() {
            let target = instr.operand.as_target().unwrap_or(u32::MAX);
            if !boundaries.contains(&target) {
                return Err(VerifyError::InvalidBranchTarget {
                    target,
                    offset: instr.offset,
                });
            }
        }
    }
    Ok(())
}

fn verify_operand_refs(
    module: &Module,
    method: &MethodDef,
    body: &MethodBody,
    instructions: &[Instr],
) -> Result<(), VerifyError> {
    // Instance methods address `this` as argument slot 0
    let arg_count = method.params.len() + if method.is_instance() { 1 } else { 0 };

    for instr in instructions {
        match (instr.opcode, instr.operand) {
            (Opcode::ConstStr, Operand::U32(index)) => {
                if module.constants.get_string(index).is_none() {
                    return Err(VerifyError::InvalidConstantRef {
                        index,
                        offset: instr.offset,
                    });
                }
            }
            (Opcode::LoadLocal | Opcode::StoreLocal, Operand::Slot(index)) => {
                if index as usize >= body.locals.len() {
                    return Err(VerifyError::InvalidLocalSlot {
                        index,
                        max: body.locals.len(),
                        offset: instr.offset,
                    });
                }
            }
            (Opcode::LoadArg | Opcode::StoreArg, Operand::Slot(index)) => {
                if index as usize >= arg_count {
                    return Err(VerifyError::InvalidArgSlot {
                        index,
                        max: arg_count,
                        offset: instr.offset,
                    });
                }
            }
            (
                Opcode::LoadField | Opcode::StoreField | Opcode::LoadStatic | Opcode::StoreStatic,
                Operand::U32(index),
            ) => {
                if index as usize >= module.field_refs.len() {
                    return Err(VerifyError::InvalidTableRef {
                        table: "field",
                        index,
                        offset: instr.offset,
                    });
                }
            }
            (Opcode::Call | Opcode::CallVirt | Opcode::NewObject, Operand::U32(index)) => {
                if index as usize >= module.method_refs.len() {
                    return Err(VerifyError::InvalidTableRef {
                        table: "method",
                        index,
                        offset: instr.offset,
                    });
                }
            }
            (Opcode::IsInstance | Opcode::NewArray, Operand::U32(index)) => {
                if index as usize >= module.type_refs.len() {
                    return Err(VerifyError::InvalidTableRef {
                        table: "type",
                        index,
                        offset: instr.offset,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn verify_regions(
    body: &MethodBody,
    boundaries: &FxHashSet<u32>,
    end: u32,
) -> Result<(), VerifyError> {
    for region in &body.regions {
        if region.try_start >= region.try_end {
            return Err(VerifyError::EmptyRegion {
                start: region.try_start,
                end: region.try_end,
            });
        }
        if region.handler_start >= region.handler_end {
            return Err(VerifyError::EmptyRegion {
                start: region.handler_start,
                end: region.handler_end,
            });
        }
        for offset in [
            region.try_start,
            region.try_end,
            region.handler_start,
            region.handler_end,
        ] {
            // An exclusive end may sit one past the last instruction
            if offset != end && !boundaries.contains(&offset) {
                return Err(VerifyError::MisalignedRegion { offset });
            }
        }
        if region.kind == HandlerKind::Catch && region.catch_type.is_none() {
            return Err(VerifyError::CatchWithoutType {
                handler_start: region.handler_start,
            });
        }
    }

    // Try ranges may nest but never partially overlap
    for (i, a) in body.regions.iter().enumerate() {
        for b in body.regions.iter().skip(i + 1) {
            let disjoint = a.try_end <= b.try_start || b.try_end <= a.try_start;
            let a_in_b = b.try_start <= a.try_start && a.try_end <= b.try_end;
            let b_in_a = a.try_start <= b.try_start && b.try_end <= a.try_end;
            if !(disjoint || a_in_b || b_in_a) {
                return Err(VerifyError::OverlappingRegions {
                    a_start: a.try_start,
                    a_end: a.try_end,
                    b_start: b.try_start,
                    b_end: b.try_end,
                });
            }
        }
    }
    Ok(())
}

fn verify_stack_depth(
    module: &Module,
    method: &MethodDef,
    body: &MethodBody,
    instructions: &[Instr],
) -> Result<(), VerifyError> {
    let index_of: FxHashMap<u32, usize> = instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.offset, i))
        .collect();

    let mut depth_at: FxHashMap<usize, u32> = FxHashMap::default();
    let mut worklist: Vec<(usize, u32)> = vec![(0, 0)];

    // A handler begins with the exception object (or nothing for finally)
    for region in &body.regions {
        if let Some(&idx) = index_of.get(&region.handler_start) {
            let entry_depth = match region.kind {
                HandlerKind::Finally => 0,
                _ => 1,
            };
            worklist.push((idx, entry_depth));
        }
    }

    while let Some((idx, depth)) = worklist.pop() {
        if let Some(&known) = depth_at.get(&idx) {
            if known != depth {
                return Err(VerifyError::InconsistentStack {
                    offset: instructions[idx].offset,
                    expected: known,
                    actual: depth,
                });
            }
            continue;
        }
        depth_at.insert(idx, depth);

        let instr = &instructions[idx];
        let next_depth = apply_stack_effect(module, method, instr, depth)?;
        if next_depth > body.max_stack as u32 {
            return Err(VerifyError::StackOverflow {
                depth: next_depth,
                max: body.max_stack,
                offset: instr.offset,
            });
        }

        if instr.opcode.is_branch() {
            let target = instr.operand.as_target().unwrap_or(u32::MAX);
            let target_idx = *index_of.get(&target).ok_or(VerifyError::InvalidBranchTarget {
                target,
                offset: instr.offset,
            })?;
            worklist.push((target_idx, next_depth));
        }
        let falls_through = !instr.opcode.is_terminator();
        if falls_through && idx + 1 < instructions.len() {
            worklist.push((idx + 1, next_depth));
        }
    }
    Ok(())
}

fn apply_stack_effect(
    module: &Module,
    method: &MethodDef,
    instr: &Instr,
    depth: u32,
) -> Result<u32, VerifyError> {
    let delta: i64 = match instr.opcode {
        Opcode::Call | Opcode::CallVirt => {
            let index = match instr.operand {
                Operand::U32(i) => i,
                _ => 0,
            };
            let method_ref = &module.method_refs[index as usize];
            -(method_ref.pops() as i64) + if method_ref.returns_value { 1 } else { 0 }
        }
        Opcode::NewObject => {
            let index = match instr.operand {
                Operand::U32(i) => i,
                _ => 0,
            };
            let method_ref = &module.method_refs[index as usize];
            -(method_ref.param_count as i64) + 1
        }
        Opcode::Ret => {
            if method.return_type.is_some() {
                -1
            } else {
                0
            }
        }
        op => op.stack_delta().unwrap_or(0) as i64,
    };

    let next = depth as i64 + delta;
    if next < 0 {
        return Err(VerifyError::StackUnderflow(instr.offset));
    }
    Ok(next as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BytecodeWriter;
    use crate::module::{
        field_flags, ExceptionRegion, FieldDef, LocalDef, MethodBody, MethodDef, Module, TypeDef,
    };

    fn module_with_body(body: MethodBody, return_type: Option<u32>) -> Module {
        let mut module = Module::new("test".to_string());
        let t = module.intern_string("m.T");
        let name = module.intern_string("M");
        let mut ty = TypeDef::new(t);
        ty.methods.push(MethodDef {
            name,
            flags: crate::module::method_flags::STATIC,
            params: Vec::new(),
            return_type,
            thrown: Vec::new(),
            body: Some(body),
        });
        module.types.push(ty);
        module
    }

    #[test]
    fn test_valid_straight_line_body() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(1);
        writer.emit_const_i32(2);
        writer.emit_opcode(Opcode::Add);
        writer.emit_ret();

        let module = module_with_body(
            MethodBody {
                max_stack: 2,
                locals: Vec::new(),
                code: writer.into_bytes(),
                regions: Vec::new(),
                sequence_points: Vec::new(),
            },
            Some(0),
        );
        assert!(verify_module(&module).is_ok());
    }

    #[test]
    fn test_branch_to_invalid_offset() {
        let mut writer = BytecodeWriter::new();
        writer.emit_jump(3); // lands in the middle of the jump operand
        writer.emit_ret();

        let module = module_with_body(
            MethodBody {
                max_stack: 1,
                locals: Vec::new(),
                code: writer.into_bytes(),
                regions: Vec::new(),
                sequence_points: Vec::new(),
            },
            None,
        );
        let result = verify_module(&module);
        assert!(matches!(
            result,
            Err(VerifyError::InvalidBranchTarget { target: 3, .. })
        ));
    }

    #[test]
    fn test_fall_off_end() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(1);
        writer.emit_opcode(Opcode::Pop);

        let module = module_with_body(
            MethodBody {
                max_stack: 1,
                locals: Vec::new(),
                code: writer.into_bytes(),
                regions: Vec::new(),
                sequence_points: Vec::new(),
            },
            None,
        );
        assert!(matches!(
            verify_module(&module),
            Err(VerifyError::FallOffEnd(_))
        ));
    }

    #[test]
    fn test_stack_underflow() {
        let mut writer = BytecodeWriter::new();
        writer.emit_opcode(Opcode::Pop);
        writer.emit_ret();

        let module = module_with_body(
            MethodBody {
                max_stack: 1,
                locals: Vec::new(),
                code: writer.into_bytes(),
                regions: Vec::new(),
                sequence_points: Vec::new(),
            },
            None,
        );
        assert!(matches!(
            verify_module(&module),
            Err(VerifyError::StackUnderflow(_))
        ));
    }

    #[test]
    fn test_local_slot_out_of_range() {
        let mut writer = BytecodeWriter::new();
        writer.emit_const_i32(1);
        writer.emit_store_local(2); // only one local declared
        writer.emit_ret();

        let mut module = Module::new("test".to_string());
        let int_ref = module.add_plain_type_ref("sys.Int32");
        let local_name = module.intern_string("tmp");
        let body = MethodBody {
            max_stack: 1,
            locals: vec![LocalDef {
                name: local_name,
                ty: int_ref,
            }],
            code: writer.into_bytes(),
            regions: Vec::new(),
            sequence_points: Vec::new(),
        };
        let t = module.intern_string("m.T");
        let name = module.intern_string("M");
        let mut ty = TypeDef::new(t);
        ty.methods.push(MethodDef {
            name,
            flags: crate::module::method_flags::STATIC,
            params: Vec::new(),
            return_type: None,
            thrown: Vec::new(),
            body: Some(body),
        });
        module.types.push(ty);

        assert!(matches!(
            verify_module(&module),
            Err(VerifyError::InvalidLocalSlot { index: 2, .. })
        ));
    }

    #[test]
    fn test_partially_overlapping_regions_rejected() {
        let mut writer = BytecodeWriter::new();
        writer.emit_nop(); // 0
        writer.emit_nop(); // 1
        writer.emit_nop(); // 2
        writer.emit_nop(); // 3
        writer.emit_ret(); // 4

        let mut module = Module::new("test".to_string());
        let exc = module.add_plain_type_ref("sys.Exception");
        let body = MethodBody {
            max_stack: 1,
            locals: Vec::new(),
            code: writer.into_bytes(),
            regions: vec![
                ExceptionRegion {
                    try_start: 0,
                    try_end: 2,
                    handler_start: 3,
                    handler_end: 4,
                    kind: HandlerKind::Catch,
                    catch_type: Some(exc),
                },
                ExceptionRegion {
                    try_start: 1,
                    try_end: 3,
                    handler_start: 3,
                    handler_end: 4,
                    kind: HandlerKind::Catch,
                    catch_type: Some(exc),
                },
            ],
            sequence_points: Vec::new(),
        };
        let t = module.intern_string("m.T");
        let name = module.intern_string("M");
        let mut ty = TypeDef::new(t);
        ty.methods.push(MethodDef {
            name,
            flags: crate::module::method_flags::STATIC,
            params: Vec::new(),
            return_type: None,
            thrown: Vec::new(),
            body: Some(body),
        });
        module.types.push(ty);

        assert!(matches!(
            verify_module(&module),
            Err(VerifyError::OverlappingRegions { .. })
        ));
    }

    #[test]
    fn test_nested_regions_accepted() {
        // nop(0) jump(1)->12 | handler: pop(6) jump(7)->12 | ret(12)
        let mut writer = BytecodeWriter::new();
        writer.emit_nop();
        writer.emit_jump(12);
        writer.emit_opcode(Opcode::Pop);
        writer.emit_jump(12);
        writer.emit_ret();
        let code = writer.into_bytes();

        let mut module = Module::new("test".to_string());
        let exc = module.add_plain_type_ref("sys.Exception");
        let body = MethodBody {
            max_stack: 1,
            locals: Vec::new(),
            code,
            regions: vec![
                ExceptionRegion {
                    try_start: 0,
                    try_end: 6,
                    handler_start: 6,
                    handler_end: 12,
                    kind: HandlerKind::Catch,
                    catch_type: Some(exc),
                },
                ExceptionRegion {
                    try_start: 0,
                    try_end: 1,
                    handler_start: 6,
                    handler_end: 12,
                    kind: HandlerKind::Catch,
                    catch_type: Some(exc),
                },
            ],
            sequence_points: Vec::new(),
        };
        let t = module.intern_string("m.T");
        let name = module.intern_string("M");
        let mut ty = TypeDef::new(t);
        ty.methods.push(MethodDef {
            name,
            flags: crate::module::method_flags::STATIC,
            params: Vec::new(),
            return_type: None,
            thrown: Vec::new(),
            body: Some(body),
        });
        module.types.push(ty);

        assert!(verify_module(&module).is_ok());
    }

    #[test]
    fn test_catch_without_type_rejected() {
        let mut writer = BytecodeWriter::new();
        writer.emit_nop();
        writer.emit_ret();

        let mut module = Module::new("test".to_string());
        let body = MethodBody {
            max_stack: 1,
            locals: Vec::new(),
            code: writer.into_bytes(),
            regions: vec![ExceptionRegion {
                try_start: 0,
                try_end: 1,
                handler_start: 1,
                handler_end: 2,
                kind: HandlerKind::Catch,
                catch_type: None,
            }],
            sequence_points: Vec::new(),
        };
        let t = module.intern_string("m.T");
        let name = module.intern_string("M");
        let mut ty = TypeDef::new(t);
        ty.methods.push(MethodDef {
            name,
            flags: crate::module::method_flags::STATIC,
            params: Vec::new(),
            return_type: None,
            thrown: Vec::new(),
            body: Some(body),
        });
        module.types.push(ty);

        assert!(matches!(
            verify_module(&module),
            Err(VerifyError::CatchWithoutType { .. })
        ));
    }

    #[test]
    fn test_field_ref_out_of_range() {
        let mut writer = BytecodeWriter::new();
        writer.emit_load_arg(0);
        writer.emit_opcode(Opcode::LoadField);
        writer.emit_u32(5); // no field refs exist
        writer.emit_opcode(Opcode::Pop);
        writer.emit_ret();

        let mut module = Module::new("test".to_string());
        let int_ref = module.add_plain_type_ref("sys.Int32");
        let t = module.intern_string("m.T");
        let name = module.intern_string("M");
        let f = module.intern_string("f");
        let mut ty = TypeDef::new(t);
        ty.fields.push(FieldDef {
            name: f,
            ty: int_ref,
            flags: field_flags::PUBLIC,
        });
        ty.methods.push(MethodDef {
            name,
            flags: 0,
            params: Vec::new(),
            return_type: None,
            thrown: Vec::new(),
            body: Some(MethodBody {
                max_stack: 1,
                locals: Vec::new(),
                code: writer.into_bytes(),
                regions: Vec::new(),
                sequence_points: Vec::new(),
            }),
        });
        module.types.push(ty);

        assert!(matches!(
            verify_module(&module),
            Err(VerifyError::InvalidTableRef { table: "field", .. })
        ));
    }
}
