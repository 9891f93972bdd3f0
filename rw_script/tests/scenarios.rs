use std::sync::Arc;

use rw_script::builder::{Arg, ModuleBuilder, ScriptBuilder};
use rw_script::{
    BytecodeModule, HostError, MachineConfig, MessageKind, ModelRef, NullHost, ScriptError,
    ScriptHost, ScriptMachine, Space, ThreadState, MAX_CHAIN_LENGTH, OR_CHAIN_BASE,
};

fn module(builder: &ModuleBuilder) -> Arc<BytecodeModule> {
    Arc::new(builder.build_module().expect("scenario module builds"))
}

fn boot(builder: &ModuleBuilder) -> ScriptMachine {
    ScriptMachine::boot(module(builder), MachineConfig::default()).expect("machine boots")
}

fn single(main: ScriptBuilder, slots: u32) -> ScriptMachine {
    let mut builder = ModuleBuilder::new(slots);
    builder.script("main", main);
    boot(&builder)
}

fn global_int(machine: &ScriptMachine, offset: usize) -> i32 {
    machine.find_global(offset).expect("global in range").as_int()
}

#[test]
fn main_sets_int_and_float_globals() {
    let mut main = ScriptBuilder::new();
    main.set_global_int(0, 1)
        .set_global_float(1, 2.5)
        .terminate();
    let mut machine = single(main, 4);

    let summary = machine.tick(&mut NullHost, 16);
    assert!(summary.faults.is_empty());
    assert_eq!(global_int(&machine, 0), 1);
    assert_eq!(machine.find_global(1).expect("global 1").as_float(), 2.5);
    assert_eq!(machine.threads().len(), 0);
}

#[test]
fn ticks_without_threads_leave_globals_alone() {
    let mut main = ScriptBuilder::new();
    main.set_global_int(2, -9).terminate();
    let mut machine = single(main, 4);
    machine.tick(&mut NullHost, 16);
    let snapshot = machine.globals().clone();

    for delta in [0, 1, 16, 33, 1000] {
        let summary = machine.tick(&mut NullHost, delta);
        assert_eq!(summary.threads_run, 0);
        assert_eq!(machine.globals(), &snapshot);
    }
}

#[test]
fn wait_resumes_on_first_tick_past_the_deadline() {
    let mut main = ScriptBuilder::new();
    main.wait(500).set_global_int(0, 1).terminate();
    let mut machine = single(main, 1);

    machine.tick(&mut NullHost, 0);
    let mut elapsed = 0;
    while global_int(&machine, 0) == 0 {
        machine.tick(&mut NullHost, 120);
        elapsed += 120;
        assert!(elapsed <= 600, "thread never resumed");
    }
    assert_eq!(elapsed, 600);
}

#[test]
fn spawned_thread_that_terminates_immediately() {
    let mut main = ScriptBuilder::new();
    let child = main.new_label();
    main.wait(0)
        .start_new_script(child, &[])
        .wait(1000)
        .bind(child)
        .terminate();
    let mut machine = single(main, 0);

    machine.tick(&mut NullHost, 16);
    let before = machine.live_count();
    let summary = machine.tick(&mut NullHost, 16);
    assert_eq!(summary.threads_run, 2);
    assert_eq!(summary.finished, 1);
    assert_eq!(machine.live_count(), before);
}

#[test]
fn over_long_condition_chain_fails_only_that_thread() {
    let mut main = ScriptBuilder::new();
    main.set_global_int(0, 4).andor(8).terminate();
    let mut worker = ScriptBuilder::new();
    worker.add_global_int(1, 1).wait(100);
    let mut builder = ModuleBuilder::new(2);
    builder.script("main", main).script("worker", worker);
    let mut machine = boot(&builder);
    let worker = machine.start_thread("worker").expect("worker starts");

    let summary = machine.tick(&mut NullHost, 16);
    assert_eq!(summary.faults.len(), 1);
    assert_eq!(
        summary.faults[0].error,
        ScriptError::ConditionChainTooLong {
            requested: 9,
            max: 8
        }
    );
    assert_eq!(global_int(&machine, 0), 4);
    assert_eq!(global_int(&machine, 1), 1);
    assert_eq!(machine.threads().len(), 1);
    assert_eq!(machine.threads()[0].id(), worker);
}

#[test]
fn raised_chain_limit_still_caps_at_a_byte() {
    let config = MachineConfig {
        max_condition_chain: 1000,
        ..MachineConfig::default()
    };

    let mut main = ScriptBuilder::new();
    let miss = main.new_label();
    main.set_global_int(0, 3).andor(OR_CHAIN_BASE + 254);
    for _ in 0..254 {
        main.op(0x0038, &[Arg::Global(0), Arg::Int8(4)]);
    }
    main.op(0x0038, &[Arg::Global(0), Arg::Int8(3)])
        .goto_if_false(miss)
        .set_global_int(1, 1)
        .bind(miss)
        .andor(OR_CHAIN_BASE + 299)
        .set_global_int(2, 1)
        .terminate();
    let mut builder = ModuleBuilder::new(3);
    builder.script("main", main);
    let mut machine = ScriptMachine::boot(module(&builder), config).expect("machine boots");

    let summary = machine.tick(&mut NullHost, 16);
    assert_eq!(global_int(&machine, 1), 1);
    assert_eq!(summary.faults.len(), 1);
    assert_eq!(
        summary.faults[0].error,
        ScriptError::ConditionChainTooLong {
            requested: 300,
            max: MAX_CHAIN_LENGTH
        }
    );
    assert_eq!(global_int(&machine, 2), 0);
}

#[test]
fn gosub_returns_to_the_following_instruction() {
    let mut main = ScriptBuilder::new();
    let sub = main.new_label();
    main.set_global_int(0, 5)
        .gosub(sub)
        .set_global_int(0, 1)
        .terminate()
        .bind(sub)
        .op(0x0004, &[Arg::Global(1), Arg::Global(0)])
        .set_global_int(2, 7)
        .ret();
    let mut machine = single(main, 3);

    let summary = machine.tick(&mut NullHost, 16);
    assert!(summary.faults.is_empty());
    assert_eq!(summary.instructions, 7);
    // The subroutine saw the value from before the call returned.
    assert_eq!(global_int(&machine, 1), 5);
    assert_eq!(global_int(&machine, 2), 7);
    assert_eq!(global_int(&machine, 0), 1);
}

#[test]
fn nested_calls_past_the_depth_limit_overflow() {
    let mut main = ScriptBuilder::new();
    let recurse = main.new_label();
    main.bind(recurse).add_global_int(0, 1).gosub(recurse);
    let mut machine = single(main, 1);
    let summary = machine.tick(&mut NullHost, 16);
    assert_eq!(
        summary.faults[0].error,
        ScriptError::StackOverflow { max: 6 }
    );
    assert_eq!(global_int(&machine, 0), 7);
}

fn two_thread_module() -> ModuleBuilder {
    let mut main = ScriptBuilder::new();
    let worker = main.new_label();
    let top = main.new_label();
    main.set_local_int(3, 42)
        .start_new_script(worker, &[Arg::Int(5), Arg::Float(1.5)])
        .bind(top)
        .add_global_int(0, 1)
        .wait(100)
        .goto(top)
        .bind(worker)
        .wait(500)
        .op(0x0004, &[Arg::Global(1), Arg::Local(0)])
        .terminate();
    let mut builder = ModuleBuilder::new(2);
    builder.script("main", main);
    builder
}

#[test]
fn save_and_restore_two_threads_is_deterministic() {
    let builder = two_thread_module();
    let mut original = boot(&builder);
    original.tick(&mut NullHost, 16);
    original.tick(&mut NullHost, 100);

    let waiting = original
        .threads()
        .iter()
        .find(|thread| thread.local(0).map(|slot| slot.as_int()) == Ok(5))
        .expect("worker is alive");
    assert_eq!(waiting.state(), ThreadState::Waiting);
    assert_eq!(waiting.wake_time(), Some(516));
    assert_eq!(waiting.local(1).expect("local 1").as_float(), 1.5);

    let data = original.serialize();
    let mut restored = boot(&builder);
    restored.deserialize(&data).expect("save restores");
    assert_eq!(restored.threads(), original.threads());
    assert_eq!(restored.globals(), original.globals());
    assert_eq!(restored.clock(), original.clock());

    for delta in [50, 100, 250, 16, 400] {
        let a = original.tick(&mut NullHost, delta);
        let b = restored.tick(&mut NullHost, delta);
        assert_eq!(a, b);
        assert_eq!(original.serialize(), restored.serialize());
    }
    assert_eq!(global_int(&restored, 1), 5);
}

#[test]
fn negated_conditions_invert_the_branch() {
    let mut main = ScriptBuilder::new();
    let skip = main.new_label();
    main.set_global_int(0, 5)
        .op_not(0x0038, &[Arg::Global(0), Arg::Int(5)])
        .goto_if_false(skip)
        .set_global_int(1, 99)
        .bind(skip)
        .terminate();
    let mut machine = single(main, 2);
    machine.tick(&mut NullHost, 16);
    assert_eq!(global_int(&machine, 1), 0);
}

#[test]
fn or_chain_passes_when_any_condition_holds() {
    let mut main = ScriptBuilder::new();
    let miss = main.new_label();
    main.set_global_int(0, 3)
        .andor(21)
        .op(0x0018, &[Arg::Global(0), Arg::Int(10)])
        .op(0x0038, &[Arg::Global(0), Arg::Int8(3)])
        .goto_if_false(miss)
        .set_global_int(1, 1)
        .bind(miss)
        .andor(1)
        .op(0x0028, &[Arg::Global(0), Arg::Int(3)])
        .op(0x0018, &[Arg::Global(0), Arg::Int(3)])
        .goto_if_true(miss)
        .set_global_int(2, 1)
        .terminate();
    let mut machine = single(main, 3);
    let summary = machine.tick(&mut NullHost, 16);
    assert!(summary.faults.is_empty());
    assert_eq!(global_int(&machine, 1), 1);
    assert_eq!(global_int(&machine, 2), 1);
}

#[test]
fn missions_use_labels_relative_to_their_base() {
    let mut main = ScriptBuilder::new();
    main.launch_mission(0).wait(1000);
    let mut mission = ScriptBuilder::relative();
    let top = mission.new_label();
    mission
        .script_name("intro")
        .bind(top)
        .add_global_int(0, 1)
        .op(0x0018, &[Arg::Global(0), Arg::Int(2)])
        .goto_if_false(top)
        .wait(1000);
    let mut builder = ModuleBuilder::new(1);
    builder.script("main", main).mission("intro", mission);
    let mut machine = boot(&builder);

    let summary = machine.tick(&mut NullHost, 16);
    assert!(summary.faults.is_empty());
    assert_eq!(global_int(&machine, 0), 3);
    let intro = machine
        .threads()
        .iter()
        .find(|thread| thread.is_mission())
        .expect("mission thread is alive");
    assert_eq!(intro.name(), "intro");
    assert!(intro.base_address() > 0);
}

#[test]
fn launching_a_missing_mission_faults() {
    let mut main = ScriptBuilder::new();
    main.launch_mission(3);
    let mut machine = single(main, 0);
    let summary = machine.tick(&mut NullHost, 16);
    assert!(matches!(
        summary.faults[0].error,
        ScriptError::OutOfRange {
            space: Space::Mission,
            index: 3,
            ..
        }
    ));
}

#[test]
fn terminate_by_name_spares_the_caller() {
    let mut main = ScriptBuilder::new();
    let worker = main.new_label();
    main.script_name("boss")
        .start_new_script(worker, &[])
        .start_new_script(worker, &[])
        .wait(100)
        .op(0x0459, &[Arg::Text("worker")])
        .wait(1000)
        .bind(worker)
        .script_name("worker")
        .wait(10_000);
    let mut machine = single(main, 0);

    machine.tick(&mut NullHost, 16);
    assert_eq!(machine.live_count(), 3);
    machine.tick(&mut NullHost, 100);
    assert_eq!(machine.live_count(), 1);
    assert_eq!(machine.threads()[0].name(), "boss");
}

#[test]
fn arithmetic_families_and_conversions() {
    let mut main = ScriptBuilder::new();
    main.set_global_int(0, 7)
        .op(0x0010, &[Arg::Global(0), Arg::Int(6)])
        .op(0x000C, &[Arg::Global(0), Arg::Int16(2)])
        .op(0x0014, &[Arg::Global(0), Arg::Int(5)])
        .set_global_float(1, 1.5)
        .op(0x0011, &[Arg::Global(1), Arg::Float(3.0)])
        .op(0x008C, &[Arg::Global(2), Arg::Global(1)])
        .op(0x008D, &[Arg::Global(3), Arg::Global(0)])
        .set_global_int(4, 9)
        .op(0x0014, &[Arg::Global(4), Arg::Int(0)])
        .terminate();
    let mut machine = single(main, 5);
    let summary = machine.tick(&mut NullHost, 16);
    assert!(summary.faults.is_empty());
    assert_eq!(global_int(&machine, 0), 8);
    assert_eq!(machine.find_global(1).expect("global 1").as_float(), 4.5);
    assert_eq!(global_int(&machine, 2), 4);
    assert_eq!(machine.find_global(3).expect("global 3").as_float(), 8.0);
    assert_eq!(global_int(&machine, 4), 0);
}

#[test]
fn unknown_opcode_and_bad_operands_fault() {
    let mut main = ScriptBuilder::new();
    main.op(0x0700, &[]);
    let mut machine = single(main, 0);
    let summary = machine.tick(&mut NullHost, 16);
    assert_eq!(
        summary.faults[0].error,
        ScriptError::UnknownOpcode { opcode: 0x0700 }
    );
    assert_eq!(summary.faults[0].pc, 0);

    let mut main = ScriptBuilder::new();
    main.wait(0).op(0x0005, &[Arg::Global(0), Arg::Int(1)]);
    let mut machine = single(main, 1);
    machine.tick(&mut NullHost, 16);
    let summary = machine.tick(&mut NullHost, 16);
    assert_eq!(summary.faults[0].kind, "operand_mismatch");
    assert_eq!(summary.faults[0].pc, 7);
}

#[derive(Default)]
struct Garage {
    spawned: Vec<(String, [f32; 3])>,
    messages: Vec<(MessageKind, String)>,
    wrecked: Vec<i32>,
}

impl ScriptHost for Garage {
    fn spawn_vehicle(&mut self, model: ModelRef<'_>, position: [f32; 3]) -> Result<i32, HostError> {
        self.spawned.push((model.to_string(), position));
        Ok(100 + self.spawned.len() as i32)
    }

    fn is_vehicle_wrecked(&mut self, handle: i32) -> Result<bool, HostError> {
        if handle < 0 {
            return Err(HostError::new("is_vehicle_wrecked", "no such vehicle"));
        }
        Ok(self.wrecked.contains(&handle))
    }

    fn time_of_day(&mut self) -> Result<(i32, i32), HostError> {
        Ok((21, 45))
    }

    fn display_message(
        &mut self,
        kind: MessageKind,
        key: &str,
        _duration_ms: i32,
        _style: i32,
    ) -> Result<(), HostError> {
        self.messages.push((kind, key.to_string()));
        Ok(())
    }
}

#[test]
fn world_opcodes_reach_the_host() {
    let mut builder = ModuleBuilder::new(5);
    let cheetah = builder.model("cheetah");
    let mut main = ScriptBuilder::new();
    let done = main.new_label();
    main.op(
        0x00A5,
        &[
            Arg::Int(cheetah),
            Arg::Float(1.0),
            Arg::Float(2.0),
            Arg::Float(3.0),
            Arg::Global(0),
        ],
    )
    .op(0x0119, &[Arg::Global(0)])
    .op(0x00BF, &[Arg::Global(1), Arg::Global(2)])
    .op(0x00BA, &[Arg::Text("INTRO"), Arg::Int(5000), Arg::Int(1)])
    .set_global_int(3, -1)
    .op(0x0119, &[Arg::Global(3)])
    .goto_if_true(done)
    .set_global_int(4, 1)
    .bind(done)
    .terminate();
    builder.script("main", main);
    let mut machine = boot(&builder);
    let mut host = Garage::default();

    let summary = machine.tick(&mut host, 16);
    assert!(summary.faults.is_empty());
    assert_eq!(host.spawned, vec![("cheetah".to_string(), [1.0, 2.0, 3.0])]);
    assert_eq!(global_int(&machine, 0), 101);
    assert_eq!(global_int(&machine, 1), 21);
    assert_eq!(global_int(&machine, 2), 45);
    assert_eq!(host.messages, vec![(MessageKind::Big, "INTRO".to_string())]);
    // The failed wreck query reads as false.
    assert_eq!(global_int(&machine, 4), 1);
}

#[test]
fn host_failures_leave_outputs_untouched() {
    let mut main = ScriptBuilder::new();
    main.set_global_int(0, -1)
        .op(
            0x00A5,
            &[
                Arg::Int(90),
                Arg::Float(0.0),
                Arg::Float(0.0),
                Arg::Float(0.0),
                Arg::Global(0),
            ],
        )
        .op(0x016A, &[Arg::Int(500), Arg::Int(1)])
        .set_global_int(1, 1)
        .terminate();
    let mut machine = single(main, 2);
    let summary = machine.tick(&mut NullHost, 16);
    assert!(summary.faults.is_empty());
    assert_eq!(global_int(&machine, 0), -1);
    assert_eq!(global_int(&machine, 1), 1);
}

#[test]
fn unknown_model_index_faults() {
    let mut main = ScriptBuilder::new();
    main.op(
        0x00A5,
        &[
            Arg::Int(-4),
            Arg::Float(0.0),
            Arg::Float(0.0),
            Arg::Float(0.0),
            Arg::Global(0),
        ],
    );
    let mut machine = single(main, 1);
    let summary = machine.tick(&mut NullHost, 16);
    assert!(matches!(
        summary.faults[0].error,
        ScriptError::OutOfRange {
            space: Space::Model,
            index: -4,
            ..
        }
    ));
}
