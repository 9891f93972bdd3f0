//! Mission-script virtual machine.
//!
//! Loads compiled script images, runs their threads cooperatively once per
//! game frame and snapshots the whole VM for save games. World effects go
//! through the [`ScriptHost`] trait so the engine decides what a car or a
//! fade actually is.

pub mod builder;
mod error;
mod globals;
mod host;
mod machine;
mod module;
pub mod opcodes;
mod save;
mod thread;

pub use error::{ScriptError, Space, ThreadFault};
pub use globals::{GlobalStore, ScriptValue, Slot};
pub use host::{HostError, MessageKind, ModelRef, NullHost, ScriptHost};
pub use machine::{EntryRef, MachineConfig, ScriptMachine, TickSummary};
pub use module::{
    BytecodeModule, EntryKind, Entrypoint, DEFAULT_ENTRYPOINT, MODULE_MAGIC, MODULE_VERSION,
    NAME_LEN,
};
pub use opcodes::{Flow, OpContext, OpcodeSpec, OpcodeTable, OperandKind, Operands};
pub use thread::{
    CallStack, ChainMode, ConditionChain, ScriptThread, ThreadId, ThreadState, GENERAL_LOCALS,
    LOCAL_SLOTS, MAX_CALL_DEPTH, MAX_CHAIN_LENGTH, OR_CHAIN_BASE, TIMER_A, TIMER_B,
};
