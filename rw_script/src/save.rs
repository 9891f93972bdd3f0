//! Byte-exact snapshot of the machine for save games.
//!
//! Only the VM payload lives here; framing it into a save file is the job of
//! the `rw_save` crate.

use std::collections::HashSet;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::BufMut;

use crate::error::ScriptError;
use crate::globals::{GlobalStore, Slot};
use crate::machine::ScriptMachine;
use crate::thread::{
    CallStack, ChainMode, ConditionChain, ScriptThread, ThreadId, ThreadState, LOCAL_SLOTS,
    MAX_CALL_DEPTH, NAME_BYTES,
};

impl ScriptMachine {
    /// Captures globals, clock and every thread in creation order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u32_le(self.globals.len() as u32);
        for slot in self.globals.slots() {
            out.put_u32_le(slot.raw());
        }

        out.put_u64_le(self.clock);
        out.put_u32_le(self.next_id);
        out.put_u32_le(LOCAL_SLOTS as u32);

        out.put_u32_le(self.threads.len() as u32);
        for thread in &self.threads {
            write_thread(&mut out, thread);
        }
        out
    }

    /// Restores a payload produced by [`ScriptMachine::serialize`] against
    /// the same module. Nothing is modified unless the whole payload is valid.
    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), ScriptError> {
        let mut cursor = Cursor::new(data);

        let global_count = read_u32(&mut cursor, "global count")? as usize;
        if global_count != self.globals.len() {
            return Err(ScriptError::IncompatibleSaveData(format!(
                "save holds {global_count} globals, module declares {}",
                self.globals.len()
            )));
        }
        let mut slots = Vec::with_capacity(global_count);
        for _ in 0..global_count {
            slots.push(Slot(read_u32(&mut cursor, "globals")?));
        }

        let clock = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated("game clock"))?;
        let next_id = read_u32(&mut cursor, "next thread id")?;
        let locals_len = read_u32(&mut cursor, "locals size")? as usize;
        if locals_len != LOCAL_SLOTS {
            return Err(ScriptError::IncompatibleSaveData(format!(
                "save uses {locals_len} locals per thread, expected {LOCAL_SLOTS}"
            )));
        }

        let thread_count = read_u32(&mut cursor, "thread count")?;
        let mut threads = Vec::new();
        let mut seen = HashSet::new();
        for _ in 0..thread_count {
            let thread = self.read_thread(&mut cursor)?;
            if !seen.insert(thread.id) {
                return Err(corrupt(format!("duplicate thread id {}", thread.id)));
            }
            threads.push(thread);
        }
        if let Some(highest) = threads.iter().map(|thread| thread.id.0).max() {
            if next_id <= highest {
                return Err(corrupt(format!(
                    "next thread id {next_id} would reuse live id {highest}"
                )));
            }
        }

        if (cursor.position() as usize) != data.len() {
            return Err(corrupt(format!(
                "{} trailing bytes",
                data.len() - cursor.position() as usize
            )));
        }

        self.globals = GlobalStore::from_slots(slots);
        self.threads = threads;
        self.clock = clock;
        self.next_id = next_id;
        log::debug!(
            "restored {} script threads at game time {clock}ms",
            self.threads.len()
        );
        Ok(())
    }

    fn read_thread(&self, cursor: &mut Cursor<&[u8]>) -> Result<ScriptThread, ScriptError> {
        let code_len = self.module.code_len();
        let id = ThreadId(read_u32(cursor, "thread id")?);
        let mut name = [0u8; NAME_BYTES];
        cursor
            .read_exact(&mut name)
            .map_err(|_| truncated("thread name"))?;
        let base_address = read_u32(cursor, "base address")?;
        let pc = read_u32(cursor, "program counter")?;
        let state = ThreadState::from_byte(read_u8(cursor, "thread state")?)
            .ok_or_else(|| corrupt(format!("thread {id} has an invalid state")))?;
        let has_wake = read_flag(cursor, "wake flag")?;
        let wake = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| truncated("wake time"))?;
        let is_mission = read_flag(cursor, "mission flag")?;

        let depth = read_u8(cursor, "call depth")? as usize;
        if depth > MAX_CALL_DEPTH {
            return Err(corrupt(format!(
                "thread {id} call depth {depth} exceeds {MAX_CALL_DEPTH}"
            )));
        }
        let mut frames = Vec::with_capacity(depth);
        for _ in 0..depth {
            let frame = read_u32(cursor, "return address")?;
            if frame as usize > code_len {
                return Err(corrupt(format!(
                    "thread {id} return address {frame:#06x} is outside the code"
                )));
            }
            frames.push(frame);
        }

        let mut locals = [Slot::ZERO; LOCAL_SLOTS];
        for local in locals.iter_mut() {
            *local = Slot(read_u32(cursor, "locals")?);
        }

        let mode = ChainMode::from_byte(read_u8(cursor, "chain mode")?)
            .ok_or_else(|| corrupt(format!("thread {id} has an invalid chain mode")))?;
        let remaining = read_u8(cursor, "chain length")?;
        let condition_result = read_flag(cursor, "condition result")?;

        if state != ThreadState::Finished && pc as usize >= code_len {
            return Err(corrupt(format!(
                "thread {id} program counter {pc:#06x} is outside the code"
            )));
        }
        if base_address as usize > code_len {
            return Err(corrupt(format!(
                "thread {id} base address {base_address:#06x} is outside the code"
            )));
        }

        Ok(ScriptThread {
            id,
            name,
            base_address,
            pc,
            call_stack: CallStack::from_frames(frames),
            locals,
            wake_time: has_wake.then_some(wake),
            chain: ConditionChain { mode, remaining },
            condition_result,
            is_mission,
            state,
        })
    }
}

fn write_thread(out: &mut Vec<u8>, thread: &ScriptThread) {
    out.put_u32_le(thread.id.0);
    out.put_slice(&thread.name);
    out.put_u32_le(thread.base_address);
    out.put_u32_le(thread.pc);
    out.put_u8(thread.state.as_byte());
    out.put_u8(u8::from(thread.wake_time.is_some()));
    out.put_u64_le(thread.wake_time.unwrap_or(0));
    out.put_u8(u8::from(thread.is_mission));
    let frames = thread.call_stack.frames();
    out.put_u8(frames.len() as u8);
    for frame in frames {
        out.put_u32_le(*frame);
    }
    for local in &thread.locals {
        out.put_u32_le(local.raw());
    }
    out.put_u8(thread.chain.mode.as_byte());
    out.put_u8(thread.chain.remaining);
    out.put_u8(u8::from(thread.condition_result));
}

fn corrupt(message: String) -> ScriptError {
    ScriptError::CorruptSaveData(message)
}

fn truncated(what: &str) -> ScriptError {
    corrupt(format!("truncated while reading {what}"))
}

fn read_u32(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<u32, ScriptError> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated(what))
}

fn read_u8(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<u8, ScriptError> {
    cursor.read_u8().map_err(|_| truncated(what))
}

fn read_flag(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<bool, ScriptError> {
    match read_u8(cursor, what)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(corrupt(format!("{what} byte {other} is not a boolean"))),
    }
}
