//! End-to-end checks that rewriting preserves what a method computes.
//!
//! A small integer interpreter executes method bodies directly; calls
//! into the runtime visitor are stubbed and recorded so tests can assert
//! on the visit sequence as well as the result.

use rustc_hash::FxHashMap;
use weft_bytecode::{
    decode_instructions, method_flags, BytecodeWriter, MethodBody, MethodDef, Module, Opcode,
    Operand, ParamDef, TypeDef,
};
use weft_instrument::{instrument_module, InstrumentOptions};

/// Recorded visitor calls, in execution order
#[derive(Debug, Default)]
struct Trace {
    events: Vec<String>,
}

/// Execute a method body over i32 values. Exceptions are not modeled;
/// the bodies under test never throw.
fn run(module: &Module, body: &MethodBody, args: &[i32], trace: &mut Trace) -> Option<i32> {
    let instrs = decode_instructions(&body.code).unwrap();
    let index_of: FxHashMap<u32, usize> = instrs
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.offset, i))
        .collect();

    let mut stack: Vec<i32> = Vec::new();
    let mut locals = vec![0i32; body.locals.len()];
    let mut pc = 0usize;
    loop {
        let instr = &instrs[pc];
        let mut jump_to: Option<u32> = None;
        match (instr.opcode, instr.operand) {
            (Opcode::Nop, _) => {}
            (Opcode::Pop, _) => {
                stack.pop().unwrap();
            }
            (Opcode::ConstTrue, _) => stack.push(1),
            (Opcode::ConstFalse, _) => stack.push(0),
            (Opcode::ConstI32, Operand::I32(value)) => stack.push(value),
            (Opcode::LoadLocal, Operand::Slot(slot)) => stack.push(locals[slot as usize]),
            (Opcode::StoreLocal, Operand::Slot(slot)) => {
                locals[slot as usize] = stack.pop().unwrap()
            }
            (Opcode::LoadArg, Operand::Slot(slot)) => stack.push(args[slot as usize]),
            (Opcode::Add, _) => binary(&mut stack, |a, b| a + b),
            (Opcode::Sub, _) => binary(&mut stack, |a, b| a - b),
            (Opcode::Mul, _) => binary(&mut stack, |a, b| a * b),
            (Opcode::Eq, _) => binary(&mut stack, |a, b| (a == b) as i32),
            (Opcode::Lt, _) => binary(&mut stack, |a, b| (a < b) as i32),
            (Opcode::Le, _) => binary(&mut stack, |a, b| (a <= b) as i32),
            (Opcode::Gt, _) => binary(&mut stack, |a, b| (a > b) as i32),
            (Opcode::Jump | Opcode::Leave, Operand::U32(target)) => jump_to = Some(target),
            (Opcode::BranchTrue, Operand::U32(target)) => {
                if stack.pop().unwrap() != 0 {
                    jump_to = Some(target);
                }
            }
            (Opcode::BranchFalse, Operand::U32(target)) => {
                if stack.pop().unwrap() == 0 {
                    jump_to = Some(target);
                }
            }
            (Opcode::Call, Operand::U32(index)) => {
                call_visitor(module, index, &mut stack, trace);
            }
            (Opcode::Ret, _) => return stack.pop(),
            other => panic!("interpreter does not support {other:?}"),
        }
        match jump_to {
            Some(target) => pc = index_of[&target],
            None => pc += 1,
        }
    }
}

fn binary(stack: &mut Vec<i32>, op: impl Fn(i32, i32) -> i32) {
    let b = stack.pop().unwrap();
    let a = stack.pop().unwrap();
    stack.push(op(a, b));
}

/// Stub of `weft.runtime.Visitor`: applies the declared stack effect and
/// records the call. The nonce stub never samples out.
fn call_visitor(module: &Module, index: u32, stack: &mut Vec<i32>, trace: &mut Trace) {
    let method_ref = &module.method_refs[index as usize];
    let name = module.string(method_ref.name).to_string();
    for _ in 0..method_ref.param_count {
        stack.pop().unwrap();
    }
    if method_ref.returns_value {
        assert_eq!(name, "invocation_nonce");
        stack.push(0);
    }
    trace.events.push(name);
}

fn module_with_method(
    params: usize,
    locals: usize,
    max_stack: u16,
    code: Vec<u8>,
) -> Module {
    let mut module = Module::new("t".to_string());
    let int_ref = module.add_plain_type_ref("sys.Int32");
    let type_name = module.intern_string("t.Math");
    let method_name = module.intern_string("F");

    let param_defs = (0..params)
        .map(|i| ParamDef {
            name: module.intern_string(&format!("p{i}")),
            ty: int_ref,
        })
        .collect();
    let local_defs = (0..locals)
        .map(|i| weft_bytecode::LocalDef {
            name: module.intern_string(&format!("l{i}")),
            ty: int_ref,
        })
        .collect();

    let mut ty = TypeDef::new(type_name);
    ty.methods.push(MethodDef {
        name: method_name,
        flags: method_flags::STATIC,
        params: param_defs,
        return_type: Some(int_ref),
        thrown: Vec::new(),
        body: Some(MethodBody {
            max_stack,
            locals: local_defs,
            code,
            regions: Vec::new(),
            sequence_points: Vec::new(),
        }),
    });
    module.types.push(ty);
    module
}

fn instrumented(module: Module) -> (Module, MethodBody) {
    let outcome = instrument_module(module, &InstrumentOptions::default()).unwrap();
    let body = outcome.module.types[0].methods[0].body.clone().unwrap();
    (outcome.module, body)
}

/// `max(a, b)`: branch picks which early return runs
fn max_method() -> Module {
    let mut w = BytecodeWriter::new();
    w.emit_load_arg(0); // 0
    w.emit_load_arg(1); // 3
    w.emit_opcode(Opcode::Lt); // 6
    let patch = w.offset() + 1;
    w.emit_instr(&weft_bytecode::Instr::new(Opcode::BranchTrue, Operand::U32(0))); // 7
    w.emit_load_arg(0); // 12
    w.emit_ret(); // 15
    w.patch_u32(patch, w.offset() as u32);
    w.emit_load_arg(1); // 16
    w.emit_ret(); // 19
    module_with_method(2, 0, 2, w.into_bytes())
}

/// `sum(n)`: counting loop with a backward jump and a shared epilogue
fn sum_method() -> Module {
    let mut w = BytecodeWriter::new();
    w.emit_const_i32(1);
    w.emit_store_local(0); // i = 1
    w.emit_const_i32(0);
    w.emit_store_local(1); // acc = 0
    let cond = w.offset() as u32;
    w.emit_load_local(0);
    w.emit_load_arg(0);
    w.emit_opcode(Opcode::Le);
    let exit_patch = w.offset() + 1;
    w.emit_instr(&weft_bytecode::Instr::new(Opcode::BranchFalse, Operand::U32(0)));
    w.emit_load_local(1);
    w.emit_load_local(0);
    w.emit_opcode(Opcode::Add);
    w.emit_store_local(1); // acc += i
    w.emit_load_local(0);
    w.emit_const_i32(1);
    w.emit_opcode(Opcode::Add);
    w.emit_store_local(0); // i += 1
    w.emit_jump(cond);
    w.patch_u32(exit_patch, w.offset() as u32);
    w.emit_load_local(1);
    w.emit_ret();
    module_with_method(1, 2, 2, w.into_bytes())
}

/// Both arms store into a temp and converge on a `load; ret` epilogue,
/// the shape debug builds emit for early returns
fn synthesized_return_method() -> Module {
    let mut w = BytecodeWriter::new();
    w.emit_load_arg(0);
    let else_patch = w.offset() + 1;
    w.emit_instr(&weft_bytecode::Instr::new(Opcode::BranchFalse, Operand::U32(0)));
    w.emit_const_i32(1);
    w.emit_store_local(0);
    let join_patch = w.offset() + 1;
    w.emit_jump(0);
    w.patch_u32(else_patch, w.offset() as u32);
    w.emit_const_i32(2);
    w.emit_store_local(0);
    let join = w.offset() as u32;
    w.patch_u32(join_patch, join);
    w.emit_load_local(0);
    w.emit_ret();
    module_with_method(1, 1, 1, w.into_bytes())
}

#[test]
fn test_branchy_method_same_result() {
    let module = max_method();
    let original = module.types[0].methods[0].body.clone().unwrap();
    let (rewritten_module, rewritten) = instrumented(module.clone());

    for args in [[3, 9], [9, 3], [4, 4], [-2, 0]] {
        let mut before = Trace::default();
        let mut after = Trace::default();
        let expected = run(&module, &original, &args, &mut before);
        let actual = run(&rewritten_module, &rewritten, &args, &mut after);
        assert_eq!(expected, actual, "result changed for args {args:?}");
        assert!(before.events.is_empty());
    }
}

#[test]
fn test_loop_method_same_result() {
    let module = sum_method();
    let original = module.types[0].methods[0].body.clone().unwrap();
    let (rewritten_module, rewritten) = instrumented(module.clone());

    for n in [0, 1, 5, 10] {
        let expected = run(&module, &original, &[n], &mut Trace::default());
        let actual = run(&rewritten_module, &rewritten, &[n], &mut Trace::default());
        assert_eq!(expected, actual, "result changed for n = {n}");
    }
    assert_eq!(
        run(&rewritten_module, &rewritten, &[5], &mut Trace::default()),
        Some(15)
    );
}

#[test]
fn test_every_path_visits_enter_then_exit_once() {
    let (module, body) = instrumented(max_method());
    for args in [[1, 2], [2, 1]] {
        let mut trace = Trace::default();
        run(&module, &body, &args, &mut trace);
        let enters = trace.events.iter().filter(|e| *e == "enter").count();
        let exits = trace.events.iter().filter(|e| *e == "exit").count();
        assert_eq!(enters, 1, "args {args:?}");
        assert_eq!(exits, 1, "args {args:?}");
        let enter_at = trace.events.iter().position(|e| e == "enter").unwrap();
        let exit_at = trace.events.iter().position(|e| e == "exit").unwrap();
        assert!(enter_at < exit_at);
    }
}

#[test]
fn test_trace_lock_brackets_each_visit() {
    let (module, body) = instrumented(max_method());
    let mut trace = Trace::default();
    run(&module, &body, &[1, 2], &mut trace);
    assert_eq!(
        trace.events,
        vec![
            "invocation_nonce",
            "acquire",
            "enter",
            "release",
            "acquire",
            "exit",
            "release"
        ]
    );
}

#[test]
fn test_synthesized_return_not_double_stored() {
    let module = synthesized_return_method();
    let original = module.types[0].methods[0].body.clone().unwrap();
    let (rewritten_module, rewritten) = instrumented(module.clone());

    for arg in [0, 1] {
        let expected = run(&module, &original, &[arg], &mut Trace::default());
        let actual = run(&rewritten_module, &rewritten, &[arg], &mut Trace::default());
        assert_eq!(expected, actual, "result changed for arg {arg}");
    }

    // The temp local doubles as the shared return local, so each arm
    // still stores exactly once
    let instrs = decode_instructions(&rewritten.code).unwrap();
    let stores_to_temp = instrs
        .iter()
        .filter(|i| i.opcode == Opcode::StoreLocal && i.operand == Operand::Slot(0))
        .count();
    assert_eq!(stores_to_temp, 2);
}
