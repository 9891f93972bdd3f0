use std::fmt;

use serde::Serialize;

use crate::error::{ScriptError, Space};
use crate::globals::Slot;

/// General purpose locals every thread gets.
pub const GENERAL_LOCALS: usize = 16;
/// Local slot that counts up with game time.
pub const TIMER_A: usize = GENERAL_LOCALS;
/// Second self-incrementing timer.
pub const TIMER_B: usize = GENERAL_LOCALS + 1;
/// Size of every thread's locals bank, timers included.
pub const LOCAL_SLOTS: usize = GENERAL_LOCALS + 2;
/// Deepest gosub nesting a thread may reach.
pub const MAX_CALL_DEPTH: usize = 6;
/// Thread names are stored as fixed 8-byte fields.
pub const NAME_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    Running,
    Waiting,
    Finished,
}

impl ThreadState {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            ThreadState::Running => 0,
            ThreadState::Waiting => 1,
            ThreadState::Finished => 2,
        }
    }

    pub(crate) fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(ThreadState::Running),
            1 => Some(ThreadState::Waiting),
            2 => Some(ThreadState::Finished),
            _ => None,
        }
    }
}

/// How pending condition results fold into the thread's result flag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    #[default]
    Single,
    And,
    Or,
}

impl ChainMode {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            ChainMode::Single => 0,
            ChainMode::And => 1,
            ChainMode::Or => 2,
        }
    }

    pub(crate) fn from_byte(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChainMode::Single),
            1 => Some(ChainMode::And),
            2 => Some(ChainMode::Or),
            _ => None,
        }
    }
}

const ANDOR_OPCODE: u16 = 0x00D6;

/// `andor` operands below this value open AND chains, the rest OR chains.
pub const OR_CHAIN_BASE: i32 = 20;

/// Hard ceiling on any chain, whatever the configured limit.
pub const MAX_CHAIN_LENGTH: usize = u8::MAX as usize;

/// Condition bookkeeping between an `andor` and the branch that consumes it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConditionChain {
    pub mode: ChainMode,
    pub remaining: u8,
}

/// Fixed-depth stack of gosub return addresses.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CallStack {
    frames: Vec<u32>,
}

impl CallStack {
    pub fn push(&mut self, return_address: u32) -> Result<(), ScriptError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(ScriptError::StackOverflow {
                max: MAX_CALL_DEPTH,
            });
        }
        self.frames.push(return_address);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u32, ScriptError> {
        self.frames.pop().ok_or(ScriptError::StackUnderflow)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[u32] {
        &self.frames
    }

    pub(crate) fn from_frames(frames: Vec<u32>) -> Self {
        CallStack { frames }
    }
}

/// One cooperatively scheduled execution context.
///
/// Everything needed to resume at an instruction boundary lives here; the
/// bytecode and globals are reached through the machine that runs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptThread {
    pub(crate) id: ThreadId,
    pub(crate) name: [u8; NAME_BYTES],
    pub(crate) base_address: u32,
    pub(crate) pc: u32,
    pub(crate) call_stack: CallStack,
    pub(crate) locals: [Slot; LOCAL_SLOTS],
    pub(crate) wake_time: Option<u64>,
    pub(crate) chain: ConditionChain,
    pub(crate) condition_result: bool,
    pub(crate) is_mission: bool,
    pub(crate) state: ThreadState,
}

impl ScriptThread {
    pub(crate) fn new(id: ThreadId, name: &str, offset: u32, is_mission: bool) -> Self {
        let mut thread = ScriptThread {
            id,
            name: [0; NAME_BYTES],
            base_address: offset,
            pc: offset,
            call_stack: CallStack::default(),
            locals: [Slot::ZERO; LOCAL_SLOTS],
            wake_time: None,
            chain: ConditionChain::default(),
            condition_result: false,
            is_mission,
            state: ThreadState::Running,
        };
        thread.set_name(name);
        thread
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Name with the NUL padding stripped.
    pub fn name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_BYTES);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = [0; NAME_BYTES];
        for (dst, src) in self.name.iter_mut().zip(name.bytes()) {
            *dst = src.to_ascii_lowercase();
        }
    }

    pub(crate) fn name_matches(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name)
    }

    pub fn program_counter(&self) -> u32 {
        self.pc
    }

    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn locals(&self) -> &[Slot; LOCAL_SLOTS] {
        &self.locals
    }

    pub fn local(&self, index: usize) -> Result<Slot, ScriptError> {
        self.locals.get(index).copied().ok_or_else(|| {
            ScriptError::out_of_range(Space::Local, index as u32, LOCAL_SLOTS)
        })
    }

    pub(crate) fn set_local(&mut self, index: usize, value: Slot) -> Result<(), ScriptError> {
        match self.locals.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ScriptError::out_of_range(
                Space::Local,
                index as u32,
                LOCAL_SLOTS,
            )),
        }
    }

    pub fn wake_time(&self) -> Option<u64> {
        self.wake_time
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn is_mission(&self) -> bool {
        self.is_mission
    }

    pub fn condition_chain(&self) -> ConditionChain {
        self.chain
    }

    pub fn condition_result(&self) -> bool {
        self.condition_result
    }

    pub fn is_finished(&self) -> bool {
        self.state == ThreadState::Finished
    }

    /// Whether the scheduler should resume this thread at `clock`.
    pub(crate) fn is_runnable(&self, clock: u64) -> bool {
        match self.state {
            ThreadState::Running => true,
            ThreadState::Waiting => self.wake_time.map_or(true, |wake| wake <= clock),
            ThreadState::Finished => false,
        }
    }

    pub(crate) fn resume(&mut self) {
        if self.state == ThreadState::Waiting {
            self.state = ThreadState::Running;
            self.wake_time = None;
        }
    }

    pub(crate) fn wait_until(&mut self, wake_time: u64) {
        self.state = ThreadState::Waiting;
        self.wake_time = Some(wake_time);
    }

    pub(crate) fn finish(&mut self) {
        self.state = ThreadState::Finished;
        self.wake_time = None;
    }

    pub(crate) fn advance_timers(&mut self, delta_ms: u32) {
        for index in [TIMER_A, TIMER_B] {
            let value = self.locals[index].as_int().wrapping_add(delta_ms as i32);
            self.locals[index] = Slot::from_int(value);
        }
    }

    /// Starts a condition chain from an `andor` operand.
    pub(crate) fn open_chain(&mut self, operand: i32, max: usize) -> Result<(), ScriptError> {
        let (mode, count) = match operand {
            0 => (ChainMode::Single, 1),
            n if n > 0 && n < OR_CHAIN_BASE => (ChainMode::And, n as usize + 1),
            n if n >= OR_CHAIN_BASE => (ChainMode::Or, (n - OR_CHAIN_BASE) as usize + 1),
            _ => {
                return Err(ScriptError::OperandMismatch {
                    opcode: ANDOR_OPCODE,
                    index: 0,
                    expected: "a non-negative chain size",
                });
            }
        };
        // The pending count is a single byte in the thread record.
        let max = max.min(MAX_CHAIN_LENGTH);
        if count > max {
            return Err(ScriptError::ConditionChainTooLong {
                requested: count,
                max,
            });
        }
        match mode {
            ChainMode::Single => {
                self.chain = ConditionChain::default();
                self.condition_result = false;
            }
            ChainMode::And | ChainMode::Or => {
                self.chain = ConditionChain {
                    mode,
                    remaining: count as u8,
                };
                self.condition_result = mode == ChainMode::And;
            }
        }
        Ok(())
    }

    /// Folds one (already negated) condition result into the chain.
    pub(crate) fn update_condition(&mut self, flag: bool) {
        match self.chain.mode {
            ChainMode::Single => self.condition_result = flag,
            ChainMode::And => {
                self.condition_result &= flag;
                self.consume_chain_slot();
            }
            ChainMode::Or => {
                self.condition_result |= flag;
                self.consume_chain_slot();
            }
        }
    }

    fn consume_chain_slot(&mut self) {
        self.chain.remaining = self.chain.remaining.saturating_sub(1);
        if self.chain.remaining == 0 {
            self.chain.mode = ChainMode::Single;
        }
    }
}
