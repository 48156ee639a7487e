//! Module format, instruction encoding and structural verification for
//! Weft binaries.
//!
//! This crate is the leaf of the instrumenter stack: it knows how to load
//! and save `.wfm` modules, decode method code into instruction lists, and
//! check the structural invariants the rewriter depends on. It knows
//! nothing about program points or declarations.

pub mod encoder;
pub mod module;
pub mod opcode;
pub mod verify;

pub use encoder::{
    decode_instructions, encode_instructions, BytecodeReader, BytecodeWriter, DecodeError, Instr,
    Operand,
};
pub use module::{
    field_flags, flags, method_flags, type_flags, ConstantPool, ExceptionRegion, FieldDef,
    FieldRef, GenericParamDef, HandlerKind, LocalDef, Metadata, MethodBody, MethodDef, MethodRef,
    Module, ModuleError, ParamDef, PropertyDef, SequencePoint, TypeDef, TypeRef, MAGIC, VERSION,
};
pub use opcode::{Opcode, OperandWidth};
pub use verify::{verify_body, verify_module, VerifyError};
