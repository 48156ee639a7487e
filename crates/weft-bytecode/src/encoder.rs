//! Instruction encoding and decoding utilities
//!
//! `BytecodeWriter`/`BytecodeReader` handle the raw little-endian byte
//! stream; `decode_instructions` lifts a code buffer into a list of
//! [`Instr`] values with byte offsets, which is the representation the
//! rewriter and verifier operate on.

use crate::opcode::{Opcode, OperandWidth};
use thiserror::Error;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid opcode
    #[error("Invalid opcode {0:#04x} at offset {1}")]
    InvalidOpcode(u8, usize),
}

/// Operand of a decoded instruction
///
/// The interpretation of `U32` values (pool index, ref index, absolute
/// branch target) is determined by the opcode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// 16-bit local/argument index
    Slot(u16),
    /// 32-bit signed literal
    I32(i32),
    /// 64-bit float literal
    F64(f64),
    /// 32-bit unsigned index or branch target
    U32(u32),
}

impl Operand {
    /// The branch target carried by this operand, if the opcode is a branch
    pub fn as_target(&self) -> Option<u32> {
        match self {
            Operand::U32(t) => Some(*t),
            _ => None,
        }
    }

    /// The slot index carried by this operand
    pub fn as_slot(&self) -> Option<u16> {
        match self {
            Operand::Slot(s) => Some(*s),
            _ => None,
        }
    }
}

/// One decoded instruction with its byte offset in the original stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instr {
    /// Byte offset of the opcode in the code buffer
    pub offset: u32,
    /// The opcode
    pub opcode: Opcode,
    /// Decoded operand
    pub operand: Operand,
}

impl Instr {
    /// Create an instruction with no meaningful offset (used when emitting)
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        Self {
            offset: 0,
            opcode,
            operand,
        }
    }

    /// Encoded size in bytes
    pub fn size(&self) -> u32 {
        self.opcode.encoded_size()
    }
}

/// Decode a code buffer into instructions.
///
/// Offsets in the result are monotonically increasing and match the byte
/// positions in `code`.
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instr>, DecodeError> {
    let mut reader = BytecodeReader::new(code);
    let mut instructions = Vec::new();
    while !reader.is_at_end() {
        let offset = reader.position() as u32;
        let byte = reader.read_u8()?;
        let opcode =
            Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset as usize))?;
        let operand = match opcode.operand_width() {
            OperandWidth::None => Operand::None,
            OperandWidth::Two => Operand::Slot(reader.read_u16()?),
            OperandWidth::Four => {
                if opcode == Opcode::ConstI32 {
                    Operand::I32(reader.read_i32()?)
                } else {
                    Operand::U32(reader.read_u32()?)
                }
            }
            OperandWidth::Eight => Operand::F64(reader.read_f64()?),
        };
        instructions.push(Instr {
            offset,
            opcode,
            operand,
        });
    }
    Ok(instructions)
}

/// Encode instructions back into a code buffer.
///
/// Instruction offsets are ignored; the instructions are laid out
/// back-to-back in order.
pub fn encode_instructions(instructions: &[Instr]) -> Vec<u8> {
    let mut writer = BytecodeWriter::new();
    for instr in instructions {
        writer.emit_instr(instr);
    }
    writer.into_bytes()
}

/// Bytecode writer for encoding instructions
pub struct BytecodeWriter {
    /// Internal buffer containing the bytecode
    pub(crate) buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new bytecode writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new bytecode writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the current bytecode buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytecode buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get the current offset (length of bytecode)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit signed integer (little-endian)
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer (little-endian)
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float (little-endian)
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed string
    pub fn emit_string(&mut self, value: &str) {
        self.emit_u32(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Patch a previously emitted u32 at the given offset
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ===== Instruction Emission =====

    /// Emit a full instruction (opcode plus operand)
    pub fn emit_instr(&mut self, instr: &Instr) {
        self.emit_u8(instr.opcode.to_u8());
        match instr.operand {
            Operand::None => {}
            Operand::Slot(s) => self.emit_u16(s),
            Operand::I32(v) => self.emit_i32(v),
            Operand::F64(v) => self.emit_f64(v),
            Operand::U32(v) => self.emit_u32(v),
        }
    }

    /// Emit an opcode without operands
    pub fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_u8(opcode.to_u8());
    }

    /// Emit NOP
    pub fn emit_nop(&mut self) {
        self.emit_opcode(Opcode::Nop);
    }

    /// Emit CONST_I32 with value
    pub fn emit_const_i32(&mut self, value: i32) {
        self.emit_opcode(Opcode::ConstI32);
        self.emit_i32(value);
    }

    /// Emit CONST_STR with constant pool index
    pub fn emit_const_str(&mut self, index: u32) {
        self.emit_opcode(Opcode::ConstStr);
        self.emit_u32(index);
    }

    /// Emit LOAD_LOCAL
    pub fn emit_load_local(&mut self, index: u16) {
        self.emit_opcode(Opcode::LoadLocal);
        self.emit_u16(index);
    }

    /// Emit STORE_LOCAL
    pub fn emit_store_local(&mut self, index: u16) {
        self.emit_opcode(Opcode::StoreLocal);
        self.emit_u16(index);
    }

    /// Emit LOAD_ARG
    pub fn emit_load_arg(&mut self, index: u16) {
        self.emit_opcode(Opcode::LoadArg);
        self.emit_u16(index);
    }

    /// Emit CALL with method-ref index
    pub fn emit_call(&mut self, method_ref: u32) {
        self.emit_opcode(Opcode::Call);
        self.emit_u32(method_ref);
    }

    /// Emit RET
    pub fn emit_ret(&mut self) {
        self.emit_opcode(Opcode::Ret);
    }

    /// Emit JUMP to an absolute byte offset
    pub fn emit_jump(&mut self, target: u32) {
        self.emit_opcode(Opcode::Jump);
        self.emit_u32(target);
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytecode reader for decoding
pub struct BytecodeReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a new reader over a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether all bytes have been consumed
    pub fn is_at_end(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.position >= self.data.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 32-bit signed integer (little-endian)
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 64-bit signed integer (little-endian)
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    /// Read a 64-bit float (little-endian)
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.position;
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Read a fixed number of raw bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DecodeError> {
        if self.position + count > self.data.len() {
            return Err(DecodeError::UnexpectedEnd(self.position));
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }
}
