use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::thread::ThreadId;

/// Storage spaces that operands and accessors can index into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    Global,
    Local,
    Code,
    Model,
    Mission,
}

impl Space {
    pub fn as_str(self) -> &'static str {
        match self {
            Space::Global => "global",
            Space::Local => "local",
            Space::Code => "code",
            Space::Model => "model",
            Space::Mission => "mission",
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure the VM can report, both thread-local and at the load/save
/// boundaries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("invalid script module: {0}")]
    InvalidModule(String),
    #[error("unknown entrypoint {0}")]
    UnknownEntrypoint(String),
    #[error("unknown opcode {opcode:#06x}")]
    UnknownOpcode { opcode: u16 },
    #[error("invalid operand tag {tag:#04x}")]
    InvalidOperand { tag: u8 },
    #[error("opcode {opcode:#06x} operand {index} expected {expected}")]
    OperandMismatch {
        opcode: u16,
        index: usize,
        expected: &'static str,
    },
    #[error("{space} index {index} out of range (limit {limit})")]
    OutOfRange {
        space: Space,
        index: i64,
        limit: usize,
    },
    #[error("call stack overflow (max depth {max})")]
    StackOverflow { max: usize },
    #[error("return with an empty call stack")]
    StackUnderflow,
    #[error("condition chain of {requested} exceeds the limit of {max}")]
    ConditionChainTooLong { requested: usize, max: usize },
    #[error("incompatible save data: {0}")]
    IncompatibleSaveData(String),
    #[error("corrupt save data: {0}")]
    CorruptSaveData(String),
    #[error("instruction budget of {budget} exhausted in a single tick")]
    InstructionBudgetExceeded { budget: u32 },
}

impl ScriptError {
    pub(crate) fn out_of_range(space: Space, index: impl Into<i64>, limit: usize) -> Self {
        ScriptError::OutOfRange {
            space,
            index: index.into(),
            limit,
        }
    }

    /// Stable short name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::InvalidModule(_) => "invalid_module",
            ScriptError::UnknownEntrypoint(_) => "unknown_entrypoint",
            ScriptError::UnknownOpcode { .. } => "unknown_opcode",
            ScriptError::InvalidOperand { .. } => "invalid_operand",
            ScriptError::OperandMismatch { .. } => "operand_mismatch",
            ScriptError::OutOfRange { .. } => "out_of_range",
            ScriptError::StackOverflow { .. } => "stack_overflow",
            ScriptError::StackUnderflow => "stack_underflow",
            ScriptError::ConditionChainTooLong { .. } => "condition_chain_too_long",
            ScriptError::IncompatibleSaveData(_) => "incompatible_save_data",
            ScriptError::CorruptSaveData(_) => "corrupt_save_data",
            ScriptError::InstructionBudgetExceeded { .. } => "instruction_budget_exceeded",
        }
    }
}

/// A thread-local error captured by the scheduler. The thread it names has
/// already been finished when this is reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadFault {
    pub thread: ThreadId,
    pub name: String,
    pub pc: u32,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip)]
    pub error: ScriptError,
}

impl ThreadFault {
    pub(crate) fn new(thread: ThreadId, name: String, pc: u32, error: ScriptError) -> Self {
        ThreadFault {
            thread,
            name,
            pc,
            kind: error.kind(),
            message: error.to_string(),
            error,
        }
    }
}
