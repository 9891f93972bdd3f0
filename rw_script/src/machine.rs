use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ScriptError, ThreadFault};
use crate::globals::{GlobalStore, Slot};
use crate::host::ScriptHost;
use crate::module::{BytecodeModule, EntryKind, DEFAULT_ENTRYPOINT};
use crate::opcodes::{self, Env, Flow, Operand, OpcodeTable, Request, UNNAMED_THREAD};
use crate::thread::{ScriptThread, ThreadId};

/// Tunables that are limits rather than behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Longest `andor` chain a thread may open.
    pub max_condition_chain: usize,
    /// Instructions one thread may execute in a single tick before it is
    /// failed as runaway. `None` disables the check.
    pub instruction_budget: Option<u32>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            max_condition_chain: 8,
            instruction_budget: Some(100_000),
        }
    }
}

/// Where [`ScriptMachine::start_thread`] should begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRef {
    Name(String),
    Offset(u32),
}

impl From<&str> for EntryRef {
    fn from(name: &str) -> Self {
        EntryRef::Name(name.to_string())
    }
}

impl From<String> for EntryRef {
    fn from(name: String) -> Self {
        EntryRef::Name(name)
    }
}

impl From<u32> for EntryRef {
    fn from(offset: u32) -> Self {
        EntryRef::Offset(offset)
    }
}

/// What happened during one [`ScriptMachine::tick`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSummary {
    /// Game clock after the tick's delta was applied.
    pub clock: u64,
    pub threads_run: usize,
    pub instructions: u64,
    /// Threads removed at the end of the tick.
    pub finished: usize,
    pub faults: Vec<ThreadFault>,
}

/// Owns the globals and live threads for one loaded module and runs them
/// cooperatively, one tick per frame.
#[derive(Debug)]
pub struct ScriptMachine {
    pub(crate) module: Arc<BytecodeModule>,
    pub(crate) opcodes: Arc<OpcodeTable>,
    pub(crate) config: MachineConfig,
    pub(crate) globals: GlobalStore,
    pub(crate) threads: Vec<ScriptThread>,
    pub(crate) next_id: u32,
    pub(crate) clock: u64,
    scratch: Vec<Operand>,
    requests: Vec<Request>,
}

impl ScriptMachine {
    /// Creates an idle machine: zeroed globals, no threads.
    pub fn new(module: Arc<BytecodeModule>, config: MachineConfig) -> Self {
        ScriptMachine {
            globals: GlobalStore::new(module.global_slot_count()),
            module,
            opcodes: OpcodeTable::standard(),
            config,
            threads: Vec::new(),
            next_id: 1,
            clock: 0,
            scratch: Vec::new(),
            requests: Vec::new(),
        }
    }

    /// Replaces the instruction set, e.g. with a title-specific extension of
    /// [`OpcodeTable::standard`].
    pub fn with_opcodes(mut self, opcodes: Arc<OpcodeTable>) -> Self {
        self.opcodes = opcodes;
        self
    }

    /// Creates a machine and starts the root thread.
    pub fn boot(module: Arc<BytecodeModule>, config: MachineConfig) -> Result<Self, ScriptError> {
        let mut machine = ScriptMachine::new(Arc::clone(&module), config);
        machine.initialize(module)?;
        Ok(machine)
    }

    /// Resets the machine onto `module`: globals sized from the module header
    /// and zeroed, threads cleared, clock reset, root thread started at
    /// `main`.
    pub fn initialize(&mut self, module: Arc<BytecodeModule>) -> Result<ThreadId, ScriptError> {
        let entry = module.default_entrypoint().cloned().ok_or_else(|| {
            ScriptError::InvalidModule(format!("no `{DEFAULT_ENTRYPOINT}` entrypoint"))
        })?;

        if module.global_slot_count() == self.globals.len() {
            self.globals.reset();
        } else {
            self.globals = GlobalStore::new(module.global_slot_count());
        }
        self.module = module;
        self.threads.clear();
        self.requests.clear();
        self.next_id = 1;
        self.clock = 0;

        let id = self.push_thread(&entry.name, entry.offset, entry.kind == EntryKind::Mission);
        log::debug!(
            "script machine initialised: {} globals, root thread {} at {:#06x}",
            self.globals.len(),
            id,
            entry.offset
        );
        Ok(id)
    }

    /// Starts a thread at a named entrypoint or a raw code offset. It first
    /// runs on the next tick.
    pub fn start_thread(&mut self, entry: impl Into<EntryRef>) -> Result<ThreadId, ScriptError> {
        let (name, offset, is_mission) = match entry.into() {
            EntryRef::Name(name) => {
                let entry = self
                    .module
                    .entrypoint(&name)
                    .ok_or(ScriptError::UnknownEntrypoint(name.clone()))?;
                (entry.name.clone(), entry.offset, entry.kind == EntryKind::Mission)
            }
            EntryRef::Offset(offset) => {
                if !self.module.contains(offset) {
                    return Err(ScriptError::UnknownEntrypoint(format!("offset {offset:#06x}")));
                }
                (UNNAMED_THREAD.to_string(), offset, false)
            }
        };
        let id = self.push_thread(&name, offset, is_mission);
        log::debug!("script thread {id} started {name} at {offset:#06x}");
        Ok(id)
    }

    fn push_thread(&mut self, name: &str, offset: u32, is_mission: bool) -> ThreadId {
        let id = ThreadId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.threads
            .push(ScriptThread::new(id, name, offset, is_mission));
        id
    }

    /// Advances game time by `delta_ms` and runs every runnable thread until
    /// it yields.
    pub fn tick(&mut self, host: &mut dyn ScriptHost, delta_ms: u32) -> TickSummary {
        let ScriptMachine {
            module,
            opcodes: table,
            config,
            globals,
            threads,
            next_id,
            clock,
            scratch,
            requests,
        } = self;

        *clock = clock.saturating_add(u64::from(delta_ms));
        for thread in threads.iter_mut().filter(|thread| !thread.is_finished()) {
            thread.advance_timers(delta_ms);
        }

        let mut summary = TickSummary {
            clock: *clock,
            ..TickSummary::default()
        };

        // Threads spawned mid-tick are appended and picked up by this loop.
        let mut index = 0;
        while index < threads.len() {
            let thread = &mut threads[index];
            index += 1;
            if !thread.is_runnable(*clock) {
                continue;
            }
            thread.resume();
            summary.threads_run += 1;

            let mut executed: u32 = 0;
            loop {
                if !module.contains(thread.pc) {
                    log::debug!(
                        "script thread {} ({}) ran off the end of the code",
                        thread.id,
                        thread.name()
                    );
                    thread.finish();
                    break;
                }
                if let Some(budget) = config.instruction_budget {
                    if executed >= budget {
                        let pc = thread.pc;
                        let error = ScriptError::InstructionBudgetExceeded { budget };
                        fail(thread, pc, error, &mut summary);
                        break;
                    }
                }

                let instruction_pc = thread.pc;
                let env = Env {
                    module: &**module,
                    opcodes: &**table,
                    globals: &mut *globals,
                    host: &mut *host,
                    config: &*config,
                    requests: &mut *requests,
                    next_id: &mut *next_id,
                    clock: *clock,
                };
                executed += 1;
                match opcodes::execute(env, thread, scratch) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Yield) => break,
                    Ok(Flow::Wait(ms)) => {
                        thread.wait_until(clock.saturating_add(u64::from(ms)));
                        break;
                    }
                    Ok(Flow::Terminate) => {
                        thread.finish();
                        break;
                    }
                    Err(error) => {
                        fail(thread, instruction_pc, error, &mut summary);
                        break;
                    }
                }
            }
            summary.instructions += u64::from(executed);
            apply_requests(threads, requests);
        }

        let before = threads.len();
        threads.retain(|thread| !thread.is_finished());
        summary.finished = before - threads.len();
        summary
    }

    pub fn find_global(&self, offset: usize) -> Result<Slot, ScriptError> {
        self.globals.get(offset)
    }

    pub fn set_global(&mut self, offset: usize, value: impl Into<Slot>) -> Result<(), ScriptError> {
        self.globals.set(offset, value)
    }

    /// Removes one thread immediately. Returns false when no live thread has
    /// that id.
    pub fn kill_thread(&mut self, id: ThreadId) -> bool {
        let before = self.threads.len();
        self.threads.retain(|thread| thread.id != id);
        let killed = self.threads.len() != before;
        if killed {
            log::debug!("script thread {id} killed by the engine");
        }
        killed
    }

    /// Removes every thread with the given name, e.g. when a mission is
    /// aborted. Returns how many were removed.
    pub fn terminate_named(&mut self, name: &str) -> usize {
        let before = self.threads.len();
        self.threads.retain(|thread| !thread.name_matches(name));
        let removed = before - self.threads.len();
        if removed > 0 {
            log::debug!("terminated {removed} script thread(s) named {name}");
        }
        removed
    }

    pub fn threads(&self) -> &[ScriptThread] {
        &self.threads
    }

    pub fn thread(&self, id: ThreadId) -> Option<&ScriptThread> {
        self.threads.iter().find(|thread| thread.id == id)
    }

    /// Threads that have not finished.
    pub fn live_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|thread| !thread.is_finished())
            .count()
    }

    /// Game time in milliseconds.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn globals(&self) -> &GlobalStore {
        &self.globals
    }

    pub fn module(&self) -> &Arc<BytecodeModule> {
        &self.module
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }
}

fn fail(thread: &mut ScriptThread, pc: u32, error: ScriptError, summary: &mut TickSummary) {
    let name = thread.name();
    log::warn!(
        "script thread {} ({name}) failed at {pc:#06x}: {error}",
        thread.id
    );
    thread.finish();
    summary
        .faults
        .push(ThreadFault::new(thread.id, name, pc, error));
}

fn apply_requests(threads: &mut Vec<ScriptThread>, requests: &mut Vec<Request>) {
    for request in requests.drain(..) {
        match request {
            Request::Spawn(thread) => threads.push(thread),
            Request::Kill { name, issuer } => {
                for thread in threads
                    .iter_mut()
                    .filter(|thread| thread.id != issuer && !thread.is_finished())
                    .filter(|thread| thread.name_matches(&name))
                {
                    log::debug!(
                        "script thread {} ({name}) terminated by {issuer}",
                        thread.id
                    );
                    thread.finish();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Arg, ModuleBuilder, ScriptBuilder};
    use crate::error::Space;
    use crate::host::NullHost;
    use crate::thread::{ThreadState, TIMER_A};

    fn module_with(main: ScriptBuilder, slots: u32) -> Arc<BytecodeModule> {
        let mut builder = ModuleBuilder::new(slots);
        builder.script("main", main);
        Arc::new(builder.build_module().expect("test module builds"))
    }

    fn boot(main: ScriptBuilder, slots: u32) -> ScriptMachine {
        ScriptMachine::boot(module_with(main, slots), MachineConfig::default()).expect("machine boots")
    }

    #[test]
    fn boot_requires_main() {
        let mut other = ScriptBuilder::new();
        other.terminate();
        let mut builder = ModuleBuilder::new(1);
        builder.script("other", other);
        let module = Arc::new(builder.build_module().expect("module builds"));
        let err = ScriptMachine::boot(module, MachineConfig::default()).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidModule(_)));
    }

    #[test]
    fn runs_until_wait_then_resumes() {
        let mut main = ScriptBuilder::new();
        main.set_global_int(0, 1).wait(100).set_global_int(0, 2).terminate();
        let mut machine = boot(main, 1);
        let mut host = NullHost;

        let summary = machine.tick(&mut host, 16);
        assert_eq!(summary.threads_run, 1);
        assert_eq!(summary.instructions, 2);
        assert_eq!(machine.find_global(0).expect("global 0").as_int(), 1);
        assert_eq!(machine.threads()[0].state(), ThreadState::Waiting);
        assert_eq!(machine.threads()[0].wake_time(), Some(116));

        machine.tick(&mut host, 50);
        assert_eq!(machine.find_global(0).expect("global 0").as_int(), 1);

        let summary = machine.tick(&mut host, 50);
        assert_eq!(machine.find_global(0).expect("global 0").as_int(), 2);
        assert_eq!(summary.finished, 1);
        assert_eq!(machine.live_count(), 0);
    }

    #[test]
    fn wait_zero_yields_to_the_next_tick() {
        let mut main = ScriptBuilder::new();
        let top = main.new_label();
        main.bind(top).add_global_int(0, 1).wait(0).goto(top);
        let mut machine = boot(main, 1);
        let mut host = NullHost;
        for _ in 0..3 {
            machine.tick(&mut host, 16);
        }
        assert_eq!(machine.find_global(0).expect("global 0").as_int(), 3);
        assert_eq!(machine.threads()[0].state(), ThreadState::Running);
    }

    #[test]
    fn faults_only_finish_the_offending_thread() {
        let mut main = ScriptBuilder::new();
        let worker = main.new_label();
        main.start_new_script(worker, &[])
            .ret()
            .bind(worker)
            .add_global_int(0, 1)
            .wait(1000);
        let mut machine = boot(main, 1);

        let summary = machine.tick(&mut NullHost, 16);
        assert_eq!(summary.faults.len(), 1);
        let fault = &summary.faults[0];
        assert_eq!(fault.thread, ThreadId(1));
        assert_eq!(fault.error, ScriptError::StackUnderflow);
        assert_eq!(fault.kind, "stack_underflow");
        assert_eq!(machine.find_global(0).expect("global 0").as_int(), 1);
        assert_eq!(machine.live_count(), 1);
        assert_eq!(machine.threads()[0].id(), ThreadId(2));
    }

    #[test]
    fn runaway_thread_hits_the_budget() {
        let mut main = ScriptBuilder::new();
        let top = main.new_label();
        main.bind(top).goto(top);
        let config = MachineConfig {
            instruction_budget: Some(50),
            ..MachineConfig::default()
        };
        let mut machine =
            ScriptMachine::boot(module_with(main, 0), config).expect("machine boots");
        let summary = machine.tick(&mut NullHost, 16);
        assert_eq!(summary.instructions, 50);
        assert_eq!(
            summary.faults[0].error,
            ScriptError::InstructionBudgetExceeded { budget: 50 }
        );
        assert_eq!(machine.live_count(), 0);
    }

    #[test]
    fn running_off_the_end_finishes_quietly() {
        let mut main = ScriptBuilder::new();
        main.set_global_int(0, 7);
        let mut machine = boot(main, 1);
        let summary = machine.tick(&mut NullHost, 16);
        assert!(summary.faults.is_empty());
        assert_eq!(summary.finished, 1);
    }

    #[test]
    fn start_thread_by_name_and_offset() {
        let mut main = ScriptBuilder::new();
        main.wait(1000);
        let mut side = ScriptBuilder::new();
        side.set_global_int(0, 5).terminate();
        let mut builder = ModuleBuilder::new(1);
        builder.script("main", main).script("side", side);
        let module = Arc::new(builder.build_module().expect("module builds"));
        let side_offset = module.entrypoint("side").expect("side entry").offset;
        let mut machine =
            ScriptMachine::boot(module, MachineConfig::default()).expect("machine boots");

        let id = machine.start_thread("side").expect("side starts");
        assert_eq!(machine.thread(id).map(|thread| thread.name()), Some("side".into()));
        machine.start_thread(side_offset).expect("offset start");
        assert_eq!(machine.live_count(), 3);

        assert_eq!(
            machine.start_thread("missing"),
            Err(ScriptError::UnknownEntrypoint("missing".into()))
        );
        assert!(matches!(
            machine.start_thread(10_000u32),
            Err(ScriptError::UnknownEntrypoint(_))
        ));

        machine.tick(&mut NullHost, 16);
        assert_eq!(machine.find_global(0).expect("global 0").as_int(), 5);
        assert_eq!(machine.live_count(), 1);
    }

    #[test]
    fn global_accessors_are_bounds_checked() {
        let mut main = ScriptBuilder::new();
        main.terminate();
        let mut machine = boot(main, 2);
        machine.set_global(1, 2.5f32).expect("slot 1 writable");
        assert_eq!(machine.find_global(1).expect("slot 1").as_float(), 2.5);
        assert_eq!(
            machine.set_global(2, 1),
            Err(ScriptError::OutOfRange {
                space: Space::Global,
                index: 2,
                limit: 2
            })
        );
        assert!(machine.find_global(2).is_err());
    }

    #[test]
    fn engine_side_cancellation() {
        let mut main = ScriptBuilder::new();
        main.script_name("loop").wait(1000);
        let mut machine = boot(main, 0);
        machine.tick(&mut NullHost, 16);
        let extra = machine.start_thread("main").expect("second copy");

        assert!(machine.kill_thread(extra));
        assert!(!machine.kill_thread(extra));
        assert_eq!(machine.terminate_named("LOOP"), 1);
        assert_eq!(machine.live_count(), 0);
    }

    #[test]
    fn timers_count_up_for_live_threads() {
        let mut main = ScriptBuilder::new();
        main.wait(10_000);
        let mut machine = boot(main, 0);
        machine.tick(&mut NullHost, 16);
        machine.tick(&mut NullHost, 33);
        let timer = machine.threads()[0].local(TIMER_A).expect("timer a");
        assert_eq!(timer.as_int(), 49);
    }

    #[test]
    fn config_reads_partial_json() {
        let config: MachineConfig =
            serde_json::from_str(r#"{ "instruction_budget": null }"#).expect("config parses");
        assert_eq!(config.max_condition_chain, 8);
        assert_eq!(config.instruction_budget, None);
    }

    #[test]
    fn reinitialize_resets_state() {
        let mut main = ScriptBuilder::new();
        main.set_global_int(0, 9).op(0x0006, &[Arg::Local(0), Arg::Int(1)]).wait(500);
        let module = module_with(main, 1);
        let mut machine =
            ScriptMachine::boot(Arc::clone(&module), MachineConfig::default()).expect("boots");
        machine.tick(&mut NullHost, 16);
        let root = machine.initialize(module).expect("reinitialises");
        assert_eq!(root, ThreadId(1));
        assert_eq!(machine.clock(), 0);
        assert_eq!(machine.find_global(0).expect("global 0").as_int(), 0);
        assert_eq!(machine.threads().len(), 1);
    }
}
