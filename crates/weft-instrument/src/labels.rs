//! Label-space code assembly
//!
//! Insertions shift byte offsets, so the rewriter never works in offset
//! space directly. It appends instructions whose branch operands are
//! [`Label`]s into a [`CodeBuffer`], binds labels at the positions
//! branches target, and assembles at the end. Assembly is two passes:
//! size every instruction and record label offsets, then encode with
//! targets resolved. Instruction sizes are fixed per opcode, so the
//! first pass needs no fixpoint.

use crate::error::{InstrumentError, InstrumentResult};
use rustc_hash::FxHashMap;
use weft_bytecode::{Opcode, Operand, SequencePoint};

/// Stable index into a [`CodeBuffer`]'s label space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) u32);

/// Instruction argument, with branch targets still symbolic
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    None,
    Slot(u16),
    I32(i32),
    F64(f64),
    U32(u32),
    Target(Label),
}

impl Arg {
    /// Lift a decoded operand; branch operands must be lifted to
    /// `Target` by the caller before pushing.
    pub fn from_operand(operand: Operand) -> Arg {
        match operand {
            Operand::None => Arg::None,
            Operand::Slot(slot) => Arg::Slot(slot),
            Operand::I32(value) => Arg::I32(value),
            Operand::F64(value) => Arg::F64(value),
            Operand::U32(value) => Arg::U32(value),
        }
    }
}

#[derive(Debug, Clone)]
enum Item {
    Bind(Label),
    Op {
        opcode: Opcode,
        arg: Arg,
        line: Option<u32>,
    },
}

/// Append-only instruction buffer with symbolic branch targets
#[derive(Debug, Default)]
pub struct CodeBuffer {
    items: Vec<Item>,
    next_label: u32,
}

/// Result of assembling a [`CodeBuffer`]
#[derive(Debug)]
pub struct Assembled {
    /// Encoded instruction bytes
    pub code: Vec<u8>,
    /// Sequence points carried through from pushed instructions
    pub sequence_points: Vec<SequencePoint>,
    offsets: FxHashMap<Label, u32>,
}

impl Assembled {
    /// Byte offset a label was bound at
    pub fn offset_of(&self, label: Label) -> InstrumentResult<u32> {
        self.offsets
            .get(&label)
            .copied()
            .ok_or(InstrumentError::UnboundLabel(label.0))
    }
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh unbound label
    pub fn fresh_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind a label at the current position
    pub fn bind(&mut self, label: Label) {
        self.items.push(Item::Bind(label));
    }

    /// Append an instruction
    pub fn push(&mut self, opcode: Opcode, arg: Arg) {
        self.items.push(Item::Op {
            opcode,
            arg,
            line: None,
        });
    }

    /// Append an instruction carrying a source line
    pub fn push_at_line(&mut self, opcode: Opcode, arg: Arg, line: Option<u32>) {
        self.items.push(Item::Op { opcode, arg, line });
    }

    /// Append a branch to a label
    pub fn branch(&mut self, opcode: Opcode, target: Label) {
        debug_assert!(opcode.is_branch());
        self.push(opcode, Arg::Target(target));
    }

    /// Resolve labels and encode
    pub fn assemble(&self) -> InstrumentResult<Assembled> {
        let mut offsets: FxHashMap<Label, u32> = FxHashMap::default();
        let mut offset = 0u32;
        for item in &self.items {
            match item {
                Item::Bind(label) => {
                    offsets.insert(*label, offset);
                }
                Item::Op { opcode, .. } => {
                    offset += opcode.encoded_size();
                }
            }
        }

        let mut code = Vec::with_capacity(offset as usize);
        let mut sequence_points = Vec::new();
        for item in &self.items {
            let (opcode, arg, line) = match item {
                Item::Bind(_) => continue,
                Item::Op { opcode, arg, line } => (*opcode, *arg, *line),
            };
            if let Some(line) = line {
                sequence_points.push(SequencePoint {
                    offset: code.len() as u32,
                    line,
                });
            }
            code.push(opcode.to_u8());
            match arg {
                Arg::None => {}
                Arg::Slot(slot) => code.extend_from_slice(&slot.to_le_bytes()),
                Arg::I32(value) => code.extend_from_slice(&value.to_le_bytes()),
                Arg::F64(value) => code.extend_from_slice(&value.to_le_bytes()),
                Arg::U32(value) => code.extend_from_slice(&value.to_le_bytes()),
                Arg::Target(label) => {
                    let target = offsets
                        .get(&label)
                        .copied()
                        .ok_or(InstrumentError::UnboundLabel(label.0))?;
                    code.extend_from_slice(&target.to_le_bytes());
                }
            }
        }
        Ok(Assembled {
            code,
            sequence_points,
            offsets,
        })
    }
}
