//! Integration tests for the file-level pipeline behind the `weft` binary.

use std::fs;
use weft_bytecode::{
    method_flags, BytecodeWriter, MethodBody, MethodDef, Module, TypeDef,
};
use weft_instrument::{instrument_file, InstrumentError, InstrumentOptions};

fn sample_module_bytes() -> Vec<u8> {
    let mut module = Module::new("sample".to_string());
    let int_ref = module.add_plain_type_ref("sys.Int32");
    let type_name = module.intern_string("sample.Counter");
    let method_name = module.intern_string("Bump");

    let mut writer = BytecodeWriter::new();
    writer.emit_const_i32(1);
    writer.emit_ret();

    let mut ty = TypeDef::new(type_name);
    ty.methods.push(MethodDef {
        name: method_name,
        flags: method_flags::STATIC,
        params: Vec::new(),
        return_type: Some(int_ref),
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
    module.encode()
}

#[test]
fn test_instrument_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("sample.wfm");
    fs::write(&target, sample_module_bytes()).unwrap();

    let outcome = instrument_file(&target, &InstrumentOptions::default()).unwrap();
    assert_eq!(outcome.methods_instrumented, 1);
    assert!(outcome.decls.contains("sample.Counter.Bump():::ENTER"));

    // The encoded result must decode and still carry the marker
    let rewritten = dir.path().join("sample.instrumented.wfm");
    fs::write(&rewritten, outcome.module.encode()).unwrap();
    let decoded = Module::decode(&fs::read(&rewritten).unwrap()).unwrap();
    assert!(weft_instrument::is_instrumented(&decoded));
}

#[test]
fn test_decls_only_does_not_brand_module() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("sample.wfm");
    fs::write(&target, sample_module_bytes()).unwrap();

    let options = InstrumentOptions {
        decls_only: true,
        ..Default::default()
    };
    let outcome = instrument_file(&target, &options).unwrap();
    assert!(!weft_instrument::is_instrumented(&outcome.module));
    assert!(outcome.decls.starts_with("decl-version 2.0\n"));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.wfm");
    assert!(matches!(
        instrument_file(&missing, &InstrumentOptions::default()),
        Err(InstrumentError::Io(_))
    ));
}

#[test]
fn test_truncated_module_is_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("bad.wfm");
    let mut bytes = sample_module_bytes();
    bytes.truncate(bytes.len() / 2);
    fs::write(&target, bytes).unwrap();

    assert!(matches!(
        instrument_file(&target, &InstrumentOptions::default()),
        Err(InstrumentError::Load(_))
    ));
}
