//! Instruction set of the Weft virtual machine
//!
//! All opcodes are single-byte instructions. Opcodes that take an operand
//! encode it immediately after the opcode byte, little-endian, with a fixed
//! width determined by the opcode.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Locals and arguments
//! - 0x20-0x2F: Arithmetic & comparison
//! - 0x40-0x4F: Field access
//! - 0x50-0x5F: Object & array operations
//! - 0x90-0x9F: Control flow
//! - 0xA0-0xAF: Calls & returns
//! - 0xE0-0xEF: Exception handling

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Push null constant
    ConstNull = 0x04,
    /// Push true constant
    ConstTrue = 0x05,
    /// Push false constant
    ConstFalse = 0x06,
    /// Push 32-bit integer constant (operand: i32)
    ConstI32 = 0x07,
    /// Push 64-bit float constant (operand: f64)
    ConstF64 = 0x08,
    /// Push string constant from pool (operand: u32 index)
    ConstStr = 0x09,

    // ===== Locals and Arguments (0x10-0x1F) =====
    /// Load local variable onto stack (operand: u16 index)
    LoadLocal = 0x10,
    /// Store top of stack to local variable (operand: u16 index)
    StoreLocal = 0x11,
    /// Load argument onto stack (operand: u16 index; 0 is `this` for instance methods)
    LoadArg = 0x12,
    /// Store top of stack to argument slot (operand: u16 index)
    StoreArg = 0x13,

    // ===== Arithmetic & Comparison (0x20-0x2F) =====
    /// Pop b, pop a, push a + b
    Add = 0x20,
    /// Pop b, pop a, push a - b
    Sub = 0x21,
    /// Pop b, pop a, push a * b
    Mul = 0x22,
    /// Pop b, pop a, push a / b
    Div = 0x23,
    /// Pop a, push -a
    Neg = 0x24,
    /// Pop b, pop a, push a == b
    Eq = 0x28,
    /// Pop b, pop a, push a != b
    Ne = 0x29,
    /// Pop b, pop a, push a < b
    Lt = 0x2A,
    /// Pop b, pop a, push a <= b
    Le = 0x2B,
    /// Pop b, pop a, push a > b
    Gt = 0x2C,
    /// Pop b, pop a, push a >= b
    Ge = 0x2D,
    /// Pop a, push !a
    Not = 0x2E,

    // ===== Field Access (0x40-0x4F) =====
    /// Pop object, push field value (operand: u32 field-ref index)
    LoadField = 0x40,
    /// Pop value, pop object, store field (operand: u32 field-ref index)
    StoreField = 0x41,
    /// Push static field value (operand: u32 field-ref index)
    LoadStatic = 0x42,
    /// Pop value, store static field (operand: u32 field-ref index)
    StoreStatic = 0x43,

    // ===== Object & Array Operations (0x50-0x5F) =====
    /// Allocate and construct an object (operand: u32 method-ref index of the constructor)
    NewObject = 0x50,
    /// Pop object, push whether it is an instance of a type (operand: u32 type-ref index)
    IsInstance = 0x51,
    /// Pop length, push new array (operand: u32 type-ref index of element type)
    NewArray = 0x52,
    /// Pop index, pop array, push element
    LoadElem = 0x53,
    /// Pop value, pop index, pop array, store element
    StoreElem = 0x54,
    /// Pop array, push its length
    ArrayLen = 0x55,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional jump (operand: u32 absolute byte offset)
    Jump = 0x90,
    /// Pop condition, jump if true (operand: u32 absolute byte offset)
    BranchTrue = 0x91,
    /// Pop condition, jump if false (operand: u32 absolute byte offset)
    BranchFalse = 0x92,
    /// Exit a protected region and jump (operand: u32 absolute byte offset)
    Leave = 0x93,

    // ===== Calls & Returns (0xA0-0xAF) =====
    /// Call a method (operand: u32 method-ref index)
    Call = 0xA0,
    /// Call a method with virtual dispatch (operand: u32 method-ref index)
    CallVirt = 0xA1,
    /// Return from the current method (value on stack if non-void)
    Ret = 0xA8,

    // ===== Exception Handling (0xE0-0xEF) =====
    /// Pop exception object and throw it
    Throw = 0xE0,
    /// Rethrow the exception being handled
    Rethrow = 0xE1,
    /// End a finally/fault handler
    EndFinally = 0xE2,
}

/// Width classes for opcode operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandWidth {
    /// No operand
    None,
    /// 16-bit operand (local/argument index)
    Two,
    /// 32-bit operand (pool index, ref index, branch target, i32 literal)
    Four,
    /// 64-bit operand (f64 literal)
    Eight,
}

impl Opcode {
    /// Convert the opcode to its byte representation
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert a byte to an opcode, if valid
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0x00 => Nop,
            0x01 => Pop,
            0x02 => Dup,
            0x04 => ConstNull,
            0x05 => ConstTrue,
            0x06 => ConstFalse,
            0x07 => ConstI32,
            0x08 => ConstF64,
            0x09 => ConstStr,
            0x10 => LoadLocal,
            0x11 => StoreLocal,
            0x12 => LoadArg,
            0x13 => StoreArg,
            0x20 => Add,
            0x21 => Sub,
            0x22 => Mul,
            0x23 => Div,
            0x24 => Neg,
            0x28 => Eq,
            0x29 => Ne,
            0x2A => Lt,
            0x2B => Le,
            0x2C => Gt,
            0x2D => Ge,
            0x2E => Not,
            0x40 => LoadField,
            0x41 => StoreField,
            0x42 => LoadStatic,
            0x43 => StoreStatic,
            0x50 => NewObject,
            0x51 => IsInstance,
            0x52 => NewArray,
            0x53 => LoadElem,
            0x54 => StoreElem,
            0x55 => ArrayLen,
            0x90 => Jump,
            0x91 => BranchTrue,
            0x92 => BranchFalse,
            0x93 => Leave,
            0xA0 => Call,
            0xA1 => CallVirt,
            0xA8 => Ret,
            0xE0 => Throw,
            0xE1 => Rethrow,
            0xE2 => EndFinally,
            _ => return None,
        })
    }

    /// Operand width of this opcode
    pub fn operand_width(self) -> OperandWidth {
        use Opcode::*;
        match self {
            LoadLocal | StoreLocal | LoadArg | StoreArg => OperandWidth::Two,
            ConstI32 | ConstStr | LoadField | StoreField | LoadStatic | StoreStatic
            | NewObject | IsInstance | NewArray | Jump | BranchTrue | BranchFalse | Leave
            | Call | CallVirt => OperandWidth::Four,
            ConstF64 => OperandWidth::Eight,
            _ => OperandWidth::None,
        }
    }

    /// Total encoded size of an instruction with this opcode, in bytes
    pub fn encoded_size(self) -> u32 {
        1 + match self.operand_width() {
            OperandWidth::None => 0,
            OperandWidth::Two => 2,
            OperandWidth::Four => 4,
            OperandWidth::Eight => 8,
        }
    }

    /// Whether this opcode transfers control unconditionally
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::Leave | Opcode::Ret | Opcode::Throw | Opcode::Rethrow
                | Opcode::EndFinally
        )
    }

    /// Whether this opcode carries a branch-target operand
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::BranchTrue | Opcode::BranchFalse | Opcode::Leave
        )
    }

    /// Human-readable mnemonic
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Nop => "nop",
            Pop => "pop",
            Dup => "dup",
            ConstNull => "const.null",
            ConstTrue => "const.true",
            ConstFalse => "const.false",
            ConstI32 => "const.i32",
            ConstF64 => "const.f64",
            ConstStr => "const.str",
            LoadLocal => "load.local",
            StoreLocal => "store.local",
            LoadArg => "load.arg",
            StoreArg => "store.arg",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Neg => "neg",
            Eq => "eq",
            Ne => "ne",
            Lt => "lt",
            Le => "le",
            Gt => "gt",
            Ge => "ge",
            Not => "not",
            LoadField => "load.field",
            StoreField => "store.field",
            LoadStatic => "load.static",
            StoreStatic => "store.static",
            NewObject => "new.object",
            IsInstance => "is.instance",
            NewArray => "new.array",
            LoadElem => "load.elem",
            StoreElem => "store.elem",
            ArrayLen => "array.len",
            Jump => "jump",
            BranchTrue => "branch.true",
            BranchFalse => "branch.false",
            Leave => "leave",
            Call => "call",
            CallVirt => "call.virt",
            Ret => "ret",
            Throw => "throw",
            Rethrow => "rethrow",
            EndFinally => "end.finally",
        }
    }

    /// Net stack effect of this opcode, excluding call/return effects.
    ///
    /// `Call`/`CallVirt`/`NewObject`/`Ret` depend on method signatures and are
    /// handled separately by the verifier.
    pub fn stack_delta(self) -> Option<i32> {
        use Opcode::*;
        Some(match self {
            Nop => 0,
            Pop => -1,
            Dup => 1,
            ConstNull | ConstTrue | ConstFalse | ConstI32 | ConstF64 | ConstStr => 1,
            LoadLocal | LoadArg => 1,
            StoreLocal | StoreArg => -1,
            Add | Sub | Mul | Div | Eq | Ne | Lt | Le | Gt | Ge => -1,
            Neg | Not => 0,
            LoadField => 0,
            StoreField => -2,
            LoadStatic => 1,
            StoreStatic => -1,
            IsInstance => 0,
            NewArray => 0,
            LoadElem => -1,
            StoreElem => -3,
            ArrayLen => 0,
            Jump | Leave => 0,
            BranchTrue | BranchFalse => -1,
            Throw | Rethrow => -1,
            EndFinally => 0,
            Call | CallVirt | NewObject | Ret => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for byte in 0..=0xFFu8 {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op.to_u8(), byte);
            }
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0xFF), None);
        assert_eq!(Opcode::from_u8(0x0F), None);
    }

    #[test]
    fn test_encoded_sizes() {
        assert_eq!(Opcode::Nop.encoded_size(), 1);
        assert_eq!(Opcode::LoadLocal.encoded_size(), 3);
        assert_eq!(Opcode::Call.encoded_size(), 5);
        assert_eq!(Opcode::ConstF64.encoded_size(), 9);
    }

    #[test]
    fn test_branch_classification() {
        assert!(Opcode::Jump.is_branch());
        assert!(Opcode::BranchFalse.is_branch());
        assert!(!Opcode::Ret.is_branch());
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::Rethrow.is_terminator());
        assert!(!Opcode::BranchTrue.is_terminator());
    }
}
