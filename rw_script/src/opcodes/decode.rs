use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ScriptError, Space};
use crate::globals::GlobalStore;
use crate::thread::{ScriptThread, LOCAL_SLOTS};

use super::{OpcodeSpec, OpcodeTable};

/// Opcode bit that inverts the condition result of the instruction.
pub const NEGATE_FLAG: u16 = 0x8000;

pub const TAG_END: u8 = 0x00;
pub const TAG_INT32: u8 = 0x01;
pub const TAG_GLOBAL: u8 = 0x02;
pub const TAG_LOCAL: u8 = 0x03;
pub const TAG_INT8: u8 = 0x04;
pub const TAG_INT16: u8 = 0x05;
pub const TAG_FLOAT: u8 = 0x06;
/// Tag bytes at or above this value start an untagged inline string.
pub const TEXT_THRESHOLD: u8 = 0x20;
/// Inline strings always occupy eight bytes.
pub const TEXT_LEN: usize = 8;

/// What an opcode expects in each fixed operand position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Integer literal, or a variable read as an integer.
    Int,
    /// Float literal, or a variable read as a float.
    Float,
    /// Variable reference the handler writes or reads itself.
    Var,
    /// Jump target; decoded like `Int`.
    Label,
    /// Eight byte inline string.
    Text,
}

impl OperandKind {
    pub fn describe(self) -> &'static str {
        match self {
            OperandKind::Int => "an integer",
            OperandKind::Float => "a float",
            OperandKind::Var => "a variable",
            OperandKind::Label => "a label",
            OperandKind::Text => "a string",
        }
    }
}

/// Handle to a resolved, bounds-checked variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    Global(u16),
    Local(u16),
}

/// A decoded operand as handlers see it.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Int(i32),
    Float(f32),
    Slot(SlotRef),
    Text(String),
}

enum Raw {
    End,
    Int(i32),
    Float(f32),
    Var(SlotRef),
    Text(String),
}

/// Result of decoding one instruction header and its operands.
pub(crate) struct Decoded {
    pub opcode: u16,
    pub negate: bool,
    pub spec: OpcodeSpec,
    pub next_pc: u32,
}

struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> CodeReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], ScriptError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.code.len())
            .ok_or_else(|| {
                ScriptError::out_of_range(Space::Code, self.pos as u32, self.code.len())
            })?;
        let code = self.code;
        let bytes = &code[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn peek(&self) -> Result<u8, ScriptError> {
        self.code
            .get(self.pos)
            .copied()
            .ok_or_else(|| ScriptError::out_of_range(Space::Code, self.pos as u32, self.code.len()))
    }

    fn u8(&mut self) -> Result<u8, ScriptError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ScriptError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn i16(&mut self) -> Result<i16, ScriptError> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    fn i32(&mut self) -> Result<i32, ScriptError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    fn f32(&mut self) -> Result<f32, ScriptError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    fn raw(&mut self, globals: &GlobalStore) -> Result<Raw, ScriptError> {
        let tag = self.peek()?;
        if tag >= TEXT_THRESHOLD {
            let bytes = self.take(TEXT_LEN)?;
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(TEXT_LEN);
            return Ok(Raw::Text(String::from_utf8_lossy(&bytes[..end]).into_owned()));
        }
        self.pos += 1;
        match tag {
            TAG_END => Ok(Raw::End),
            TAG_INT32 => Ok(Raw::Int(self.i32()?)),
            TAG_INT8 => Ok(Raw::Int(self.u8()? as i8 as i32)),
            TAG_INT16 => Ok(Raw::Int(self.i16()? as i32)),
            TAG_FLOAT => Ok(Raw::Float(self.f32()?)),
            TAG_GLOBAL => {
                let index = self.u16()?;
                if index as usize >= globals.len() {
                    return Err(ScriptError::out_of_range(
                        Space::Global,
                        index,
                        globals.len(),
                    ));
                }
                Ok(Raw::Var(SlotRef::Global(index)))
            }
            TAG_LOCAL => {
                let index = self.u16()?;
                if index as usize >= LOCAL_SLOTS {
                    return Err(ScriptError::out_of_range(Space::Local, index, LOCAL_SLOTS));
                }
                Ok(Raw::Var(SlotRef::Local(index)))
            }
            other => Err(ScriptError::InvalidOperand { tag: other }),
        }
    }
}

/// Decodes the instruction at the thread's program counter into `operands`.
///
/// Variable operands are bounds checked here; `Int`/`Float` positions that
/// name a variable are read immediately so handlers only see values.
pub(crate) fn decode(
    code: &[u8],
    table: &OpcodeTable,
    thread: &ScriptThread,
    globals: &GlobalStore,
    operands: &mut Vec<Operand>,
) -> Result<Decoded, ScriptError> {
    operands.clear();
    let mut reader = CodeReader {
        code,
        pos: thread.pc as usize,
    };
    let raw_opcode = reader.u16()?;
    let negate = raw_opcode & NEGATE_FLAG != 0;
    let opcode = raw_opcode & !NEGATE_FLAG;
    let spec = *table
        .get(opcode)
        .ok_or(ScriptError::UnknownOpcode { opcode })?;

    for (index, &kind) in spec.operands.iter().enumerate() {
        let raw = reader.raw(globals)?;
        let mismatch = || ScriptError::OperandMismatch {
            opcode,
            index,
            expected: kind.describe(),
        };
        let operand = match (kind, raw) {
            (OperandKind::Int | OperandKind::Label, Raw::Int(value)) => Operand::Int(value),
            (OperandKind::Int | OperandKind::Label, Raw::Var(slot)) => {
                Operand::Int(read_slot(thread, globals, slot).as_int())
            }
            (OperandKind::Float, Raw::Float(value)) => Operand::Float(value),
            (OperandKind::Float, Raw::Var(slot)) => {
                Operand::Float(read_slot(thread, globals, slot).as_float())
            }
            (OperandKind::Var, Raw::Var(slot)) => Operand::Slot(slot),
            (OperandKind::Text, Raw::Text(text)) => Operand::Text(text),
            _ => return Err(mismatch()),
        };
        operands.push(operand);
    }

    if spec.variadic {
        loop {
            let index = operands.len();
            match reader.raw(globals)? {
                Raw::End => break,
                Raw::Int(value) => operands.push(Operand::Int(value)),
                Raw::Float(value) => operands.push(Operand::Float(value)),
                Raw::Var(slot) => operands.push(Operand::Slot(slot)),
                Raw::Text(_) => {
                    return Err(ScriptError::OperandMismatch {
                        opcode,
                        index,
                        expected: "a numeric argument",
                    })
                }
            }
        }
    }

    Ok(Decoded {
        opcode,
        negate,
        spec,
        next_pc: reader.pos as u32,
    })
}

fn read_slot(thread: &ScriptThread, globals: &GlobalStore, slot: SlotRef) -> crate::globals::Slot {
    // Indices were validated while decoding the tag.
    match slot {
        SlotRef::Global(index) => globals.slots()[index as usize],
        SlotRef::Local(index) => thread.locals[index as usize],
    }
}
