use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use log::{debug, info};
use rw_save::{decode_save, encode_save, SaveFile, SaveSummary, SectionKind};
use rw_script::{
    BytecodeModule, EntryKind, MachineConfig, ScriptMachine, ThreadFault, ThreadState,
};
use serde::Serialize;

use crate::cli::{DescribeArgs, RunArgs};
use crate::world_bridge::{RecordingHost, WorldState};

const DEFAULT_SAVE_LABEL: &str = "rw_engine session";

#[derive(Serialize)]
struct SessionReport<'a> {
    entrypoints: Vec<EntrypointReport<'a>>,
    clock_ms: u64,
    ticks: u32,
    instructions: u64,
    globals: Vec<i32>,
    threads: Vec<ThreadReport>,
    faults: &'a [ThreadFault],
    vehicles: usize,
    characters: usize,
}

#[derive(Serialize)]
struct EntrypointReport<'a> {
    name: &'a str,
    kind: EntryKind,
    offset: u32,
}

#[derive(Serialize)]
struct ThreadReport {
    id: u32,
    name: String,
    pc: u32,
    state: ThreadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    wake_time: Option<u64>,
    mission: bool,
    call_depth: usize,
}

pub fn execute(args: RunArgs) -> Result<()> {
    let RunArgs {
        script,
        ticks,
        tick_ms,
        config,
        start,
        load_save,
        write_save,
        save_label,
        report_json,
        events_json,
    } = args;

    let config = load_config(config.as_deref())?;
    let module = load_module(&script)?;

    let (mut machine, mut host) = match load_save.as_ref() {
        Some(path) => restore_session(module, config, path)?,
        None => {
            let machine = ScriptMachine::boot(module, config)
                .with_context(|| format!("booting {}", script.display()))?;
            (machine, RecordingHost::new())
        }
    };

    for name in &start {
        let id = machine
            .start_thread(name.as_str())
            .with_context(|| format!("starting entrypoint {name}"))?;
        info!("started {name} as thread {id}");
    }

    let mut instructions = 0u64;
    let mut faults = Vec::new();
    for frame in 0..ticks {
        let summary = machine.tick(&mut host, tick_ms);
        debug!(
            "frame {frame}: clock {} ran {} threads, {} instructions",
            summary.clock, summary.threads_run, summary.instructions
        );
        instructions += summary.instructions;
        for fault in summary.faults {
            eprintln!(
                "[rw_engine] warning: thread {} ({}) faulted at {:#x}: {}",
                fault.thread, fault.name, fault.pc, fault.message
            );
            faults.push(fault);
        }
    }
    println!(
        "Ran {ticks} frames: clock {} ms, {} live threads, {instructions} instructions",
        machine.clock(),
        machine.live_count()
    );

    if let Some(path) = write_save.as_ref() {
        let label = save_label.as_deref().unwrap_or(DEFAULT_SAVE_LABEL);
        let mut file = SaveFile::new(
            label,
            machine.clock(),
            Some(env!("CARGO_PKG_VERSION").to_string()),
        );
        file.insert_section(SectionKind::Scripts, machine.serialize());
        let world = serde_json::to_vec(host.world()).context("serializing world state")?;
        file.insert_section(SectionKind::World, world);
        let bytes = encode_save(&file).context("framing save file")?;
        fs::write(path, bytes).with_context(|| format!("writing save to {}", path.display()))?;
        println!("Saved game state to {}", path.display());
    }

    if let Some(path) = report_json.as_ref() {
        let report = build_report(&machine, &host, ticks, instructions, &faults);
        let json =
            serde_json::to_string_pretty(&report).context("serializing session report to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing session report to {}", path.display()))?;
        println!("Saved session report to {}", path.display());
    }

    if let Some(path) = events_json.as_ref() {
        let json = serde_json::to_string_pretty(host.events())
            .context("serializing host events to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing host events to {}", path.display()))?;
        println!("Saved host events to {}", path.display());
    }

    Ok(())
}

pub fn describe(args: DescribeArgs) -> Result<()> {
    let module = load_module(&args.script)?;

    println!(
        "{}: {} bytes of code, {} global slots",
        args.script.display(),
        module.code_len(),
        module.global_slot_count()
    );
    println!("Entrypoints:");
    for entry in module.entrypoints() {
        let kind = match entry.kind {
            EntryKind::Script => "script",
            EntryKind::Mission => "mission",
        };
        println!("  {:<24} {:<8} {:#06x}", entry.name, kind, entry.offset);
    }
    if module.models().len() > 1 {
        println!("Models:");
        for (index, name) in module.models().iter().enumerate().skip(1) {
            println!("  -{index:<4} {name}");
        }
    }

    if let Some(path) = args.load_save.as_ref() {
        let file = read_save(path)?;
        print_save_summary(path, &file.summary);
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<MachineConfig> {
    let Some(path) = path else {
        return Ok(MachineConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading machine config {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing machine config {}", path.display()))
}

fn load_module(path: &Path) -> Result<Arc<BytecodeModule>> {
    let bytes =
        fs::read(path).with_context(|| format!("reading script image {}", path.display()))?;
    let module = BytecodeModule::from_bytes(&bytes)
        .with_context(|| format!("parsing script image {}", path.display()))?;
    Ok(Arc::new(module))
}

fn read_save(path: &Path) -> Result<SaveFile> {
    let bytes = fs::read(path).with_context(|| format!("reading save {}", path.display()))?;
    decode_save(&bytes).with_context(|| format!("decoding save {}", path.display()))
}

fn restore_session(
    module: Arc<BytecodeModule>,
    config: MachineConfig,
    path: &Path,
) -> Result<(ScriptMachine, RecordingHost)> {
    let file = read_save(path)?;
    let mut machine = ScriptMachine::new(module, config);
    let scripts = file.section(SectionKind::Scripts)?;
    machine
        .deserialize(scripts)
        .with_context(|| format!("restoring scripts from {}", path.display()))?;

    let host = match file.section(SectionKind::World) {
        Ok(bytes) => {
            let world: WorldState = serde_json::from_slice(bytes)
                .with_context(|| format!("restoring world from {}", path.display()))?;
            RecordingHost::with_world(world)
        }
        Err(_) => {
            eprintln!(
                "[rw_engine] warning: {} has no world section; starting with an empty world",
                path.display()
            );
            RecordingHost::new()
        }
    };

    info!(
        "restored '{}' at {} ms with {} threads",
        file.summary.label,
        machine.clock(),
        machine.threads().len()
    );
    Ok((machine, host))
}

fn print_save_summary(path: &Path, summary: &SaveSummary) {
    println!("Save {}:", path.display());
    println!("  label: {}", summary.label);
    println!("  clock: {} ms", summary.game_clock_ms);
    if let Some(build) = summary.build.as_deref() {
        println!("  build: {build}");
    }
    let sections: Vec<String> = summary
        .sections
        .iter()
        .map(|kind| format!("{kind:?}"))
        .collect();
    println!("  sections: {}", sections.join(", "));
}

fn build_report<'a>(
    machine: &'a ScriptMachine,
    host: &RecordingHost,
    ticks: u32,
    instructions: u64,
    faults: &'a [ThreadFault],
) -> SessionReport<'a> {
    let entrypoints = machine
        .module()
        .entrypoints()
        .iter()
        .map(|entry| EntrypointReport {
            name: &entry.name,
            kind: entry.kind,
            offset: entry.offset,
        })
        .collect();
    let threads = machine
        .threads()
        .iter()
        .map(|thread| ThreadReport {
            id: thread.id().0,
            name: thread.name(),
            pc: thread.program_counter(),
            state: thread.state(),
            wake_time: thread.wake_time(),
            mission: thread.is_mission(),
            call_depth: thread.call_stack().depth(),
        })
        .collect();

    SessionReport {
        entrypoints,
        clock_ms: machine.clock(),
        ticks,
        instructions,
        globals: machine
            .globals()
            .slots()
            .iter()
            .map(|slot| slot.as_int())
            .collect(),
        threads,
        faults,
        vehicles: host.vehicle_count(),
        characters: host.character_count(),
    }
}
