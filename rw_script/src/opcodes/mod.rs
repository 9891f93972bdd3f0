//! Opcode registry and the per-instruction dispatch step.
//!
//! Handlers are plain functions stored in a dense table keyed by opcode id.
//! The table for the standard instruction set is built once per process;
//! titles with extra opcodes can start from [`OpcodeTable::standard`] and
//! register more before handing it to the machine.

mod arith;
mod control;
mod decode;
mod world;

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{ScriptError, Space};
use crate::globals::{GlobalStore, Slot};
use crate::host::{HostError, ModelRef, ScriptHost};
use crate::machine::MachineConfig;
use crate::module::BytecodeModule;
use crate::thread::{ScriptThread, ThreadId, GENERAL_LOCALS};

pub use decode::{
    Operand, OperandKind, SlotRef, NEGATE_FLAG, TAG_END, TAG_FLOAT, TAG_GLOBAL, TAG_INT16,
    TAG_INT32, TAG_INT8, TAG_LOCAL, TEXT_LEN, TEXT_THRESHOLD,
};

/// Opcode ids are 15 bits wide; bit 15 is the negate flag.
const TABLE_SIZE: usize = NEGATE_FLAG as usize;

/// Name given to threads started without an explicit `script_name`.
pub const UNNAMED_THREAD: &str = "noname";

/// What the dispatch loop should do after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop for this tick, stay runnable.
    Yield,
    /// Sleep for the given number of game milliseconds.
    Wait(u32),
    Terminate,
}

pub type Handler = fn(&mut OpContext<'_>, Operands<'_>) -> Result<Flow, ScriptError>;

#[derive(Clone, Copy)]
pub struct OpcodeSpec {
    pub name: &'static str,
    pub operands: &'static [OperandKind],
    /// Extra numeric arguments follow until an end tag.
    pub variadic: bool,
    pub handler: Handler,
}

impl OpcodeSpec {
    pub const fn new(name: &'static str, operands: &'static [OperandKind], handler: Handler) -> Self {
        OpcodeSpec {
            name,
            operands,
            variadic: false,
            handler,
        }
    }

    pub const fn variadic(
        name: &'static str,
        operands: &'static [OperandKind],
        handler: Handler,
    ) -> Self {
        OpcodeSpec {
            name,
            operands,
            variadic: true,
            handler,
        }
    }
}

impl std::fmt::Debug for OpcodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcodeSpec")
            .field("name", &self.name)
            .field("operands", &self.operands)
            .field("variadic", &self.variadic)
            .finish()
    }
}

#[derive(Clone)]
pub struct OpcodeTable {
    entries: Vec<Option<OpcodeSpec>>,
}

static STANDARD_OPCODES: Lazy<Arc<OpcodeTable>> = Lazy::new(|| {
    let mut table = OpcodeTable::empty();
    control::register(&mut table);
    arith::register(&mut table);
    world::register(&mut table);
    Arc::new(table)
});

impl OpcodeTable {
    pub fn empty() -> Self {
        OpcodeTable {
            entries: vec![None; TABLE_SIZE],
        }
    }

    /// Shared handle to the standard instruction set.
    pub fn standard() -> Arc<OpcodeTable> {
        Arc::clone(&STANDARD_OPCODES)
    }

    /// Registers `spec` under every id in `ids`, replacing earlier entries.
    /// Ids with the negate bit set are masked down to the plain opcode.
    pub fn register(&mut self, ids: &[u16], spec: OpcodeSpec) {
        for &id in ids {
            self.entries[(id & !NEGATE_FLAG) as usize] = Some(spec);
        }
    }

    pub fn get(&self, opcode: u16) -> Option<&OpcodeSpec> {
        self.entries.get(opcode as usize).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for OpcodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcodeTable")
            .field("registered", &self.len())
            .finish()
    }
}

/// Decoded operands of the instruction being executed.
#[derive(Debug, Clone, Copy)]
pub struct Operands<'a> {
    opcode: u16,
    values: &'a [Operand],
}

impl<'a> Operands<'a> {
    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &'a [Operand] {
        self.values
    }

    fn mismatch(&self, index: usize, expected: &'static str) -> ScriptError {
        ScriptError::OperandMismatch {
            opcode: self.opcode,
            index,
            expected,
        }
    }

    pub fn int(&self, index: usize) -> Result<i32, ScriptError> {
        match self.values.get(index) {
            Some(Operand::Int(value)) => Ok(*value),
            _ => Err(self.mismatch(index, OperandKind::Int.describe())),
        }
    }

    pub fn float(&self, index: usize) -> Result<f32, ScriptError> {
        match self.values.get(index) {
            Some(Operand::Float(value)) => Ok(*value),
            _ => Err(self.mismatch(index, OperandKind::Float.describe())),
        }
    }

    pub fn slot(&self, index: usize) -> Result<SlotRef, ScriptError> {
        match self.values.get(index) {
            Some(Operand::Slot(slot)) => Ok(*slot),
            _ => Err(self.mismatch(index, OperandKind::Var.describe())),
        }
    }

    pub fn text(&self, index: usize) -> Result<&'a str, ScriptError> {
        match self.values.get(index) {
            Some(Operand::Text(text)) => Ok(text.as_str()),
            _ => Err(self.mismatch(index, OperandKind::Text.describe())),
        }
    }

    pub fn position(&self, first: usize) -> Result<[f32; 3], ScriptError> {
        Ok([
            self.float(first)?,
            self.float(first + 1)?,
            self.float(first + 2)?,
        ])
    }
}

/// Deferred scheduler work produced while a thread runs.
#[derive(Debug)]
pub(crate) enum Request {
    Spawn(ScriptThread),
    Kill { name: String, issuer: ThreadId },
}

/// Everything a handler may touch while executing one instruction.
pub struct OpContext<'a> {
    pub(crate) thread: &'a mut ScriptThread,
    pub(crate) globals: &'a mut GlobalStore,
    pub(crate) module: &'a BytecodeModule,
    pub(crate) host: &'a mut dyn ScriptHost,
    pub(crate) config: &'a MachineConfig,
    pub(crate) requests: &'a mut Vec<Request>,
    pub(crate) next_id: &'a mut u32,
    pub(crate) clock: u64,
    pub(crate) negate: bool,
    pub(crate) instruction_pc: u32,
}

impl<'a> OpContext<'a> {
    pub fn thread(&self) -> &ScriptThread {
        self.thread
    }

    pub fn module(&self) -> &BytecodeModule {
        self.module
    }

    pub fn host(&mut self) -> &mut dyn ScriptHost {
        &mut *self.host
    }

    pub fn config(&self) -> &MachineConfig {
        self.config
    }

    /// Game time at the start of the current tick.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Offset of the instruction being executed.
    pub fn instruction_pc(&self) -> u32 {
        self.instruction_pc
    }

    pub fn read(&self, slot: SlotRef) -> Result<Slot, ScriptError> {
        match slot {
            SlotRef::Global(index) => self.globals.get(index as usize),
            SlotRef::Local(index) => self.thread.local(index as usize),
        }
    }

    pub fn write(&mut self, slot: SlotRef, value: Slot) -> Result<(), ScriptError> {
        match slot {
            SlotRef::Global(index) => self.globals.set(index as usize, value),
            SlotRef::Local(index) => self.thread.set_local(index as usize, value),
        }
    }

    /// Reports a condition result, honouring the negate bit and any open
    /// `andor` chain.
    pub fn set_condition(&mut self, flag: bool) {
        self.thread.update_condition(flag ^ self.negate);
    }

    pub(crate) fn condition_result(&self) -> bool {
        self.thread.condition_result
    }

    /// Translates a jump label into a module offset. Negative labels are
    /// relative to the thread's base address.
    pub fn resolve_label(&self, label: i32) -> Result<u32, ScriptError> {
        let target = if label >= 0 {
            Some(label as u32)
        } else {
            self.thread.base_address.checked_add(label.unsigned_abs())
        };
        match target {
            Some(offset) if self.module.contains(offset) => Ok(offset),
            _ => Err(ScriptError::out_of_range(
                Space::Code,
                label,
                self.module.code_len(),
            )),
        }
    }

    pub fn jump(&mut self, label: i32) -> Result<(), ScriptError> {
        self.thread.pc = self.resolve_label(label)?;
        Ok(())
    }

    /// Pushes the already advanced program counter and jumps.
    pub(crate) fn call(&mut self, label: i32) -> Result<(), ScriptError> {
        let target = self.resolve_label(label)?;
        self.thread.call_stack.push(self.thread.pc)?;
        self.thread.pc = target;
        Ok(())
    }

    pub(crate) fn ret(&mut self) -> Result<(), ScriptError> {
        self.thread.pc = self.thread.call_stack.pop()?;
        Ok(())
    }

    /// Queues a new thread; it joins the live set right after the current
    /// thread yields and runs later in the same tick.
    pub fn spawn(
        &mut self,
        offset: u32,
        base_address: u32,
        name: &str,
        is_mission: bool,
        args: &[Slot],
    ) -> Result<ThreadId, ScriptError> {
        if !self.module.contains(offset) {
            return Err(ScriptError::out_of_range(
                Space::Code,
                offset,
                self.module.code_len(),
            ));
        }
        if args.len() > GENERAL_LOCALS {
            return Err(ScriptError::out_of_range(
                Space::Local,
                args.len() as u32,
                GENERAL_LOCALS,
            ));
        }
        let id = ThreadId(*self.next_id);
        *self.next_id = self.next_id.wrapping_add(1);
        let mut thread = ScriptThread::new(id, name, offset, is_mission);
        thread.base_address = base_address;
        thread.locals[..args.len()].copy_from_slice(args);
        log::debug!(
            "script thread {} started {} at {offset:#06x} (by {})",
            id,
            thread.name(),
            self.thread.id
        );
        self.requests.push(Request::Spawn(thread));
        Ok(id)
    }

    pub(crate) fn kill_named(&mut self, name: &str) {
        self.requests.push(Request::Kill {
            name: name.to_string(),
            issuer: self.thread.id,
        });
    }

    /// Resolves a model operand: non-negative ids pass through, negative
    /// ids index the module's model-name table.
    pub fn model(&self, id: i32) -> Result<ModelRef<'a>, ScriptError> {
        if id >= 0 {
            return Ok(ModelRef::Id(id));
        }
        let module: &'a BytecodeModule = self.module;
        let index = id.unsigned_abs() as usize;
        module
            .model_name(index)
            .map(ModelRef::Named)
            .ok_or_else(|| ScriptError::out_of_range(Space::Model, id, module.models().len()))
    }

    /// Unwraps a collaborator result, logging failures so the script keeps
    /// running.
    pub fn host_result<T>(&self, result: Result<T, HostError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                log::warn!(
                    "script thread {} ({}) at {:#06x}: host call failed: {error}",
                    self.thread.id,
                    self.thread.name(),
                    self.instruction_pc
                );
                None
            }
        }
    }
}

/// Everything the dispatch step borrows from the machine.
pub(crate) struct Env<'a> {
    pub module: &'a BytecodeModule,
    pub opcodes: &'a OpcodeTable,
    pub globals: &'a mut GlobalStore,
    pub host: &'a mut dyn ScriptHost,
    pub config: &'a MachineConfig,
    pub requests: &'a mut Vec<Request>,
    pub next_id: &'a mut u32,
    pub clock: u64,
}

/// Decodes and executes the instruction at the thread's program counter.
pub(crate) fn execute(
    env: Env<'_>,
    thread: &mut ScriptThread,
    scratch: &mut Vec<Operand>,
) -> Result<Flow, ScriptError> {
    let instruction_pc = thread.pc;
    let decoded = decode::decode(env.module.code(), env.opcodes, thread, env.globals, scratch)?;
    thread.pc = decoded.next_pc;

    let mut context = OpContext {
        thread,
        globals: env.globals,
        module: env.module,
        host: env.host,
        config: env.config,
        requests: env.requests,
        next_id: env.next_id,
        clock: env.clock,
        negate: decoded.negate,
        instruction_pc,
    };
    let operands = Operands {
        opcode: decoded.opcode,
        values: scratch.as_slice(),
    };
    (decoded.spec.handler)(&mut context, operands)
}
