//! Weft binary module format
//!
//! A `.wfm` module carries everything the instrumenter needs: a constant
//! pool, portable type/method/field reference tables, and type definitions
//! whose methods own their bodies (code, exception regions, locals, and
//! optional sequence points).
//!
//! Layout:
//! - Header: magic (4 bytes) + version (u32) + flags (u32) + checksum (u32)
//! - Constant pool
//! - Type-ref / method-ref / field-ref tables
//! - Type definitions
//! - Metadata

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Magic number for Weft bytecode files: "WEFT"
pub const MAGIC: [u8; 4] = *b"WEFT";

/// Current bytecode version
pub const VERSION: u32 = 1;

/// Module encoding/decoding errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected WEFT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Module flags
pub mod flags {
    /// Module has debug information (sequence points on method bodies)
    pub const HAS_DEBUG_INFO: u32 = 1 << 0;
}

/// Type definition flags
pub mod type_flags {
    /// Type cannot be subclassed
    pub const SEALED: u32 = 1 << 0;
    /// Type is an interface
    pub const INTERFACE: u32 = 1 << 1;
    /// Type was generated by the compiler
    pub const SYNTHETIC: u32 = 1 << 2;
    /// Type is a tagged variant (enum-with-payload)
    pub const VARIANT: u32 = 1 << 3;
}

/// Field definition flags
pub mod field_flags {
    /// Static field
    pub const STATIC: u32 = 1 << 0;
    /// Field is only assignable in a constructor
    pub const READONLY: u32 = 1 << 1;
    /// Compile-time constant
    pub const CONST: u32 = 1 << 2;
    /// Field was generated by the compiler
    pub const SYNTHESIZED: u32 = 1 << 3;
    /// Field backs an auto-generated event
    pub const EVENT_BACKING: u32 = 1 << 4;
    /// Publicly visible field
    pub const PUBLIC: u32 = 1 << 5;
}

/// Method definition flags
pub mod method_flags {
    /// Static method
    pub const STATIC: u32 = 1 << 0;
    /// Constructor
    pub const CTOR: u32 = 1 << 1;
    /// Method was generated by the compiler
    pub const SYNTHETIC: u32 = 1 << 2;
    /// Abstract method (no body)
    pub const ABSTRACT: u32 = 1 << 3;
}

/// Constant pool shared by a module
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// String constants
    pub strings: Vec<String>,
    /// Integer constants
    pub integers: Vec<i64>,
    /// Float constants
    pub floats: Vec<f64>,
    /// Intern index for strings (not serialized)
    string_index: FxHashMap<String, u32>,
}

impl ConstantPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string, deduplicating identical entries
    pub fn add_string(&mut self, value: &str) -> u32 {
        if let Some(&id) = self.string_index.get(value) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.string_index.insert(value.to_string(), id);
        id
    }

    /// Get a string by index
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.as_str())
    }

    /// Add an integer constant
    pub fn add_integer(&mut self, value: i64) -> u32 {
        let id = self.integers.len() as u32;
        self.integers.push(value);
        id
    }

    /// Add a float constant
    pub fn add_float(&mut self, value: f64) -> u32 {
        let id = self.floats.len() as u32;
        self.floats.push(value);
        id
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }
        writer.emit_u32(self.integers.len() as u32);
        for &i in &self.integers {
            writer.emit_i64(i);
        }
        writer.emit_u32(self.floats.len() as u32);
        for &f in &self.floats {
            writer.emit_f64(f);
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let string_count = reader.read_u32()? as usize;
        let mut strings = Vec::with_capacity(string_count);
        let mut string_index = FxHashMap::default();
        for i in 0..string_count {
            let s = reader.read_string()?;
            string_index.insert(s.clone(), i as u32);
            strings.push(s);
        }
        let int_count = reader.read_u32()? as usize;
        let mut integers = Vec::with_capacity(int_count);
        for _ in 0..int_count {
            integers.push(reader.read_i64()?);
        }
        let float_count = reader.read_u32()? as usize;
        let mut floats = Vec::with_capacity(float_count);
        for _ in 0..float_count {
            floats.push(reader.read_f64()?);
        }
        Ok(Self {
            strings,
            integers,
            floats,
            string_index,
        })
    }
}

/// Portable reference to a type, as stored in module metadata
///
/// A ref with non-empty `constraints` denotes a generic parameter; one or
/// more constraint refs bound it. `args` are generic arguments applied to
/// the named definition and `dims` counts array dimensions applied on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    /// Qualified name (string pool index), including the backtick arity
    /// suffix for generic definitions
    pub name: u32,
    /// Generic arguments (type-ref indices)
    pub args: Vec<u32>,
    /// Array dimensions applied to the instantiated type
    pub dims: u8,
    /// Constraints when this ref denotes a generic parameter
    pub constraints: Vec<u32>,
}

impl TypeRef {
    /// A plain named type ref
    pub fn plain(name: u32) -> Self {
        Self {
            name,
            args: Vec::new(),
            dims: 0,
            constraints: Vec::new(),
        }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.name);
        emit_u32_vec(writer, &self.args);
        writer.emit_u8(self.dims);
        emit_u32_vec(writer, &self.constraints);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_u32()?,
            args: read_u32_vec(reader)?,
            dims: reader.read_u8()?,
            constraints: read_u32_vec(reader)?,
        })
    }
}

/// Portable reference to a method
///
/// Carries enough signature shape (`param_count`, `returns_value`) for
/// stack-effect accounting without resolving the callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    /// Declaring type (type-ref index)
    pub owner: u32,
    /// Method name (string pool index)
    pub name: u32,
    /// Number of declared parameters, excluding any receiver
    pub param_count: u16,
    /// Whether the method pushes a return value
    pub returns_value: bool,
    /// Static methods take no receiver
    pub is_static: bool,
}

impl MethodRef {
    /// Values popped by a `Call`/`CallVirt` of this ref (receiver included)
    pub fn pops(&self) -> u32 {
        self.param_count as u32 + if self.is_static { 0 } else { 1 }
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.owner);
        writer.emit_u32(self.name);
        writer.emit_u16(self.param_count);
        writer.emit_u8(self.returns_value as u8);
        writer.emit_u8(self.is_static as u8);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        Ok(Self {
            owner: reader.read_u32()?,
            name: reader.read_u32()?,
            param_count: reader.read_u16()?,
            returns_value: reader.read_u8()? != 0,
            is_static: reader.read_u8()? != 0,
        })
    }
}

/// Portable reference to a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Declaring type (type-ref index)
    pub owner: u32,
    /// Field name (string pool index)
    pub name: u32,
}

impl FieldRef {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.owner);
        writer.emit_u32(self.name);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        Ok(Self {
            owner: reader.read_u32()?,
            name: reader.read_u32()?,
        })
    }
}

/// Generic parameter of a type definition
#[derive(Debug, Clone)]
pub struct GenericParamDef {
    /// Parameter name (string pool index)
    pub name: u32,
    /// Constraint type refs (one or more)
    pub constraints: Vec<u32>,
}

impl GenericParamDef {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.name);
        emit_u32_vec(writer, &self.constraints);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_u32()?,
            constraints: read_u32_vec(reader)?,
        })
    }
}

/// Field definition
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name (string pool index)
    pub name: u32,
    /// Field type (type-ref index)
    pub ty: u32,
    /// Field flags (see [`field_flags`])
    pub flags: u32,
}

impl FieldDef {
    /// Whether the flag bit is set
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.name);
        writer.emit_u32(self.ty);
        writer.emit_u32(self.flags);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_u32()?,
            ty: reader.read_u32()?,
            flags: reader.read_u32()?,
        })
    }
}

/// Property definition
#[derive(Debug, Clone)]
pub struct PropertyDef {
    /// Property name (string pool index)
    pub name: u32,
    /// Property type (type-ref index)
    pub ty: u32,
    /// Whether the property exposes a setter
    pub has_setter: bool,
}

impl PropertyDef {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.name);
        writer.emit_u32(self.ty);
        writer.emit_u8(self.has_setter as u8);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_u32()?,
            ty: reader.read_u32()?,
            has_setter: reader.read_u8()? != 0,
        })
    }
}

/// Parameter of a method definition
#[derive(Debug, Clone)]
pub struct ParamDef {
    /// Parameter name (string pool index)
    pub name: u32,
    /// Parameter type (type-ref index)
    pub ty: u32,
}

impl ParamDef {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.name);
        writer.emit_u32(self.ty);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_u32()?,
            ty: reader.read_u32()?,
        })
    }
}

/// Exception-handler kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Typed catch handler
    Catch,
    /// Filtered handler
    Filter,
    /// Fault handler (runs only on exceptional exit)
    Fault,
    /// Finally handler
    Finally,
}

impl HandlerKind {
    fn to_u8(self) -> u8 {
        match self {
            HandlerKind::Catch => 0,
            HandlerKind::Filter => 1,
            HandlerKind::Fault => 2,
            HandlerKind::Finally => 3,
        }
    }

    fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => HandlerKind::Catch,
            1 => HandlerKind::Filter,
            2 => HandlerKind::Fault,
            3 => HandlerKind::Finally,
            _ => return None,
        })
    }
}

/// Protected region of a method body
///
/// Offsets are byte offsets into the method's code. `try_end` and
/// `handler_end` are exclusive. Regions may nest but never partially
/// overlap, and every boundary must fall on an instruction boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Start of the protected range (inclusive)
    pub try_start: u32,
    /// End of the protected range (exclusive)
    pub try_end: u32,
    /// Start of the handler (inclusive)
    pub handler_start: u32,
    /// End of the handler (exclusive)
    pub handler_end: u32,
    /// Handler kind
    pub kind: HandlerKind,
    /// Caught type (type-ref index), present for catch handlers
    pub catch_type: Option<u32>,
}

impl ExceptionRegion {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.try_start);
        writer.emit_u32(self.try_end);
        writer.emit_u32(self.handler_start);
        writer.emit_u32(self.handler_end);
        writer.emit_u8(self.kind.to_u8());
        match self.catch_type {
            Some(ty) => {
                writer.emit_u8(1);
                writer.emit_u32(ty);
            }
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let try_start = reader.read_u32()?;
        let try_end = reader.read_u32()?;
        let handler_start = reader.read_u32()?;
        let handler_end = reader.read_u32()?;
        let kind_byte = reader.read_u8()?;
        let kind = HandlerKind::from_u8(kind_byte)
            .ok_or(DecodeError::InvalidOpcode(kind_byte, reader.position()))?;
        let catch_type = if reader.read_u8()? != 0 {
            Some(reader.read_u32()?)
        } else {
            None
        };
        Ok(Self {
            try_start,
            try_end,
            handler_start,
            handler_end,
            kind,
            catch_type,
        })
    }
}

/// Source mapping for one instruction offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    /// Byte offset into the method code
    pub offset: u32,
    /// One-based source line
    pub line: u32,
}

/// Local variable slot of a method body
#[derive(Debug, Clone)]
pub struct LocalDef {
    /// Local name (string pool index)
    pub name: u32,
    /// Local type (type-ref index)
    pub ty: u32,
}

/// Method body: code plus its exception regions and locals
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// Maximum evaluation-stack depth
    pub max_stack: u16,
    /// Local variable table
    pub locals: Vec<LocalDef>,
    /// Raw instruction bytes
    pub code: Vec<u8>,
    /// Exception regions
    pub regions: Vec<ExceptionRegion>,
    /// Sequence points (present only with debug info)
    pub sequence_points: Vec<SequencePoint>,
}

impl MethodBody {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u16(self.max_stack);
        writer.emit_u32(self.locals.len() as u32);
        for local in &self.locals {
            writer.emit_u32(local.name);
            writer.emit_u32(local.ty);
        }
        writer.emit_u32(self.code.len() as u32);
        writer.buffer.extend_from_slice(&self.code);
        writer.emit_u32(self.regions.len() as u32);
        for region in &self.regions {
            region.encode(writer);
        }
        writer.emit_u32(self.sequence_points.len() as u32);
        for sp in &self.sequence_points {
            writer.emit_u32(sp.offset);
            writer.emit_u32(sp.line);
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let max_stack = reader.read_u16()?;
        let local_count = reader.read_u32()? as usize;
        let mut locals = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            locals.push(LocalDef {
                name: reader.read_u32()?,
                ty: reader.read_u32()?,
            });
        }
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?.to_vec();
        let region_count = reader.read_u32()? as usize;
        let mut regions = Vec::with_capacity(region_count);
        for _ in 0..region_count {
            regions.push(ExceptionRegion::decode(reader)?);
        }
        let sp_count = reader.read_u32()? as usize;
        let mut sequence_points = Vec::with_capacity(sp_count);
        for _ in 0..sp_count {
            sequence_points.push(SequencePoint {
                offset: reader.read_u32()?,
                line: reader.read_u32()?,
            });
        }
        Ok(Self {
            max_stack,
            locals,
            code,
            regions,
            sequence_points,
        })
    }
}

/// Method definition
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Method name (string pool index)
    pub name: u32,
    /// Method flags (see [`method_flags`])
    pub flags: u32,
    /// Parameters, excluding the implicit receiver
    pub params: Vec<ParamDef>,
    /// Return type (type-ref index), `None` for void
    pub return_type: Option<u32>,
    /// Declared thrown-exception types (type-ref indices)
    pub thrown: Vec<u32>,
    /// Body, absent for abstract methods
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// Whether the flag bit is set
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Whether this is an instance method
    pub fn is_instance(&self) -> bool {
        !self.has_flag(method_flags::STATIC)
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.name);
        writer.emit_u32(self.flags);
        writer.emit_u32(self.params.len() as u32);
        for param in &self.params {
            param.encode(writer);
        }
        match self.return_type {
            Some(ty) => {
                writer.emit_u8(1);
                writer.emit_u32(ty);
            }
            None => writer.emit_u8(0),
        }
        emit_u32_vec(writer, &self.thrown);
        match &self.body {
            Some(body) => {
                writer.emit_u8(1);
                body.encode(writer);
            }
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let name = reader.read_u32()?;
        let flags = reader.read_u32()?;
        let param_count = reader.read_u32()? as usize;
        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            params.push(ParamDef::decode(reader)?);
        }
        let return_type = if reader.read_u8()? != 0 {
            Some(reader.read_u32()?)
        } else {
            None
        };
        let thrown = read_u32_vec(reader)?;
        let body = if reader.read_u8()? != 0 {
            Some(MethodBody::decode(reader)?)
        } else {
            None
        };
        Ok(Self {
            name,
            flags,
            params,
            return_type,
            thrown,
            body,
        })
    }
}

/// Type definition
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Qualified name (string pool index), including backtick arity
    pub name: u32,
    /// Type flags (see [`type_flags`])
    pub flags: u32,
    /// Base type (type-ref index)
    pub base: Option<u32>,
    /// Implemented interfaces (type-ref indices)
    pub interfaces: Vec<u32>,
    /// Generic parameters
    pub generic_params: Vec<GenericParamDef>,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Declared properties
    pub properties: Vec<PropertyDef>,
    /// Declared methods
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// Create an empty type definition with a name
    pub fn new(name: u32) -> Self {
        Self {
            name,
            flags: 0,
            base: None,
            interfaces: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Whether the flag bit is set
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.name);
        writer.emit_u32(self.flags);
        match self.base {
            Some(b) => {
                writer.emit_u8(1);
                writer.emit_u32(b);
            }
            None => writer.emit_u8(0),
        }
        emit_u32_vec(writer, &self.interfaces);
        writer.emit_u32(self.generic_params.len() as u32);
        for gp in &self.generic_params {
            gp.encode(writer);
        }
        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(writer);
        }
        writer.emit_u32(self.properties.len() as u32);
        for prop in &self.properties {
            prop.encode(writer);
        }
        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(writer);
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let name = reader.read_u32()?;
        let flags = reader.read_u32()?;
        let base = if reader.read_u8()? != 0 {
            Some(reader.read_u32()?)
        } else {
            None
        };
        let interfaces = read_u32_vec(reader)?;
        let gp_count = reader.read_u32()? as usize;
        let mut generic_params = Vec::with_capacity(gp_count);
        for _ in 0..gp_count {
            generic_params.push(GenericParamDef::decode(reader)?);
        }
        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(FieldDef::decode(reader)?);
        }
        let prop_count = reader.read_u32()? as usize;
        let mut properties = Vec::with_capacity(prop_count);
        for _ in 0..prop_count {
            properties.push(PropertyDef::decode(reader)?);
        }
        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(MethodDef::decode(reader)?);
        }
        Ok(Self {
            name,
            flags,
            base,
            interfaces,
            generic_params,
            fields,
            properties,
            methods,
        })
    }
}

/// Module metadata
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Module name
    pub name: String,
    /// Source file path
    pub source_file: Option<String>,
}

impl Metadata {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        match &self.source_file {
            Some(path) => {
                writer.emit_u8(1);
                writer.emit_string(path);
            }
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let source_file = if reader.read_u8()? != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };
        Ok(Self { name, source_file })
    }
}

/// A compiled Weft module
#[derive(Debug, Clone)]
pub struct Module {
    /// Magic number (must be "WEFT")
    pub magic: [u8; 4],
    /// Bytecode version
    pub version: u32,
    /// Module flags
    pub flags: u32,
    /// Constant pool
    pub constants: ConstantPool,
    /// Type-reference table
    pub type_refs: Vec<TypeRef>,
    /// Method-reference table
    pub method_refs: Vec<MethodRef>,
    /// Field-reference table
    pub field_refs: Vec<FieldRef>,
    /// Type definitions
    pub types: Vec<TypeDef>,
    /// Module metadata
    pub metadata: Metadata,
}

impl Module {
    /// Create a new empty module
    pub fn new(name: String) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            constants: ConstantPool::new(),
            type_refs: Vec::new(),
            method_refs: Vec::new(),
            field_refs: Vec::new(),
            types: Vec::new(),
            metadata: Metadata {
                name,
                source_file: None,
            },
        }
    }

    /// Whether the module carries debug information
    pub fn has_debug_info(&self) -> bool {
        self.flags & flags::HAS_DEBUG_INFO != 0
    }

    /// Look up a string in the constant pool, with a placeholder for bad indices
    pub fn string(&self, index: u32) -> &str {
        self.constants.get_string(index).unwrap_or("<bad-string>")
    }

    /// Intern a string into the constant pool
    pub fn intern_string(&mut self, value: &str) -> u32 {
        self.constants.add_string(value)
    }

    /// Add a type ref and return its index
    pub fn add_type_ref(&mut self, type_ref: TypeRef) -> u32 {
        if let Some(pos) = self.type_refs.iter().position(|r| *r == type_ref) {
            return pos as u32;
        }
        let id = self.type_refs.len() as u32;
        self.type_refs.push(type_ref);
        id
    }

    /// Add a plain type ref by qualified name
    pub fn add_plain_type_ref(&mut self, name: &str) -> u32 {
        let name_id = self.intern_string(name);
        self.add_type_ref(TypeRef::plain(name_id))
    }

    /// Add a method ref and return its index
    pub fn add_method_ref(&mut self, method_ref: MethodRef) -> u32 {
        if let Some(pos) = self.method_refs.iter().position(|r| *r == method_ref) {
            return pos as u32;
        }
        let id = self.method_refs.len() as u32;
        self.method_refs.push(method_ref);
        id
    }

    /// Find a type definition by qualified name
    pub fn find_type(&self, qualified_name: &str) -> Option<&TypeDef> {
        self.types
            .iter()
            .find(|t| self.string(t.name) == qualified_name)
    }

    /// Validate module header invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.magic != MAGIC {
            return Err("Invalid magic number".to_string());
        }
        if self.version != VERSION {
            return Err(format!("Unsupported version: {}", self.version));
        }
        Ok(())
    }

    /// Encode the module to binary format (.wfm)
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        // Header; checksum patched once the payload is written
        let header_start = writer.offset();
        writer.buffer.extend_from_slice(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);

        self.constants.encode(&mut writer);

        writer.emit_u32(self.type_refs.len() as u32);
        for type_ref in &self.type_refs {
            type_ref.encode(&mut writer);
        }
        writer.emit_u32(self.method_refs.len() as u32);
        for method_ref in &self.method_refs {
            method_ref.encode(&mut writer);
        }
        writer.emit_u32(self.field_refs.len() as u32);
        for field_ref in &self.field_refs {
            field_ref.encode(&mut writer);
        }

        writer.emit_u32(self.types.len() as u32);
        for type_def in &self.types {
            type_def.encode(&mut writer);
        }

        self.metadata.encode(&mut writer);

        // CRC32 of everything after the header
        let payload = &writer.buffer[header_start + 16..];
        let checksum = crc32fast::hash(payload);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode a module from binary format
    pub fn decode(data: &[u8]) -> Result<Self, ModuleError> {
        let mut reader = BytecodeReader::new(data);

        let magic_bytes = reader.read_bytes(4)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(magic_bytes);
        if magic != MAGIC {
            return Err(ModuleError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(ModuleError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let payload = &data[16..];
        let calculated_checksum = crc32fast::hash(payload);
        if stored_checksum != calculated_checksum {
            return Err(ModuleError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let constants = ConstantPool::decode(&mut reader)?;

        let type_ref_count = reader.read_u32()? as usize;
        let mut type_refs = Vec::with_capacity(type_ref_count);
        for _ in 0..type_ref_count {
            type_refs.push(TypeRef::decode(&mut reader)?);
        }
        let method_ref_count = reader.read_u32()? as usize;
        let mut method_refs = Vec::with_capacity(method_ref_count);
        for _ in 0..method_ref_count {
            method_refs.push(MethodRef::decode(&mut reader)?);
        }
        let field_ref_count = reader.read_u32()? as usize;
        let mut field_refs = Vec::with_capacity(field_ref_count);
        for _ in 0..field_ref_count {
            field_refs.push(FieldRef::decode(&mut reader)?);
        }

        let type_count = reader.read_u32()? as usize;
        let mut types = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            types.push(TypeDef::decode(&mut reader)?);
        }

        let metadata = Metadata::decode(&mut reader)?;

        Ok(Self {
            magic,
            version,
            flags,
            constants,
            type_refs,
            method_refs,
            field_refs,
            types,
            metadata,
        })
    }
}

fn emit_u32_vec(writer: &mut BytecodeWriter, values: &[u32]) {
    writer.emit_u32(values.len() as u32);
    for &v in values {
        writer.emit_u32(v);
    }
}

fn read_u32_vec(reader: &mut BytecodeReader) -> Result<Vec<u32>, DecodeError> {
    let count = reader.read_u32()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(reader.read_u32()?);
    }
    Ok(values)
}
