use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Game-loop driver that runs compiled mission scripts headlessly",
    version
)]
pub struct Args {
    /// Compiled script image (RWSC)
    #[arg(long)]
    pub script: PathBuf,

    /// Print the module's entrypoints and model table, then exit
    #[arg(long)]
    pub describe: bool,

    /// Number of frames to simulate
    #[arg(long, default_value_t = 60)]
    pub ticks: u32,

    /// Game milliseconds per frame
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u32,

    /// Optional JSON file with machine limits (max_condition_chain, instruction_budget)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Extra entrypoints to start after boot or restore (repeatable)
    #[arg(long = "start", value_name = "NAME")]
    pub start: Vec<String>,

    /// Restore script and world state from a save file instead of booting
    #[arg(long)]
    pub load_save: Option<PathBuf>,

    /// Path to write a save file after the last tick
    #[arg(long)]
    pub write_save: Option<PathBuf>,

    /// Label stored in the save summary (requires --write-save)
    #[arg(long)]
    pub save_label: Option<String>,

    /// Path to write the globals/threads/faults report as JSON
    #[arg(long)]
    pub report_json: Option<PathBuf>,

    /// Path to write the host event log as JSON
    #[arg(long)]
    pub events_json: Option<PathBuf>,
}

#[derive(Debug)]
pub enum Command {
    Run(RunArgs),
    Describe(DescribeArgs),
}

#[derive(Debug)]
pub struct RunArgs {
    pub script: PathBuf,
    pub ticks: u32,
    pub tick_ms: u32,
    pub config: Option<PathBuf>,
    pub start: Vec<String>,
    pub load_save: Option<PathBuf>,
    pub write_save: Option<PathBuf>,
    pub save_label: Option<String>,
    pub report_json: Option<PathBuf>,
    pub events_json: Option<PathBuf>,
}

#[derive(Debug)]
pub struct DescribeArgs {
    pub script: PathBuf,
    pub load_save: Option<PathBuf>,
}

pub fn parse() -> Result<Command> {
    let args = Args::parse();
    args.into_command()
}

impl Args {
    fn into_command(self) -> Result<Command> {
        if self.save_label.is_some() && self.write_save.is_none() {
            bail!("--save-label requires --write-save");
        }
        if let (Some(load), Some(write)) = (self.load_save.as_ref(), self.write_save.as_ref()) {
            if load == write {
                bail!("--load-save and --write-save must name different files");
            }
        }

        if self.describe {
            if self.write_save.is_some() || self.report_json.is_some() || self.events_json.is_some()
            {
                eprintln!("[rw_engine] warning: output options are ignored with --describe");
            }
            return Ok(Command::Describe(DescribeArgs {
                script: self.script,
                load_save: self.load_save,
            }));
        }

        Ok(Command::Run(RunArgs {
            script: self.script,
            ticks: self.ticks,
            tick_ms: self.tick_ms,
            config: self.config,
            start: self.start,
            load_save: self.load_save,
            write_save: self.write_save,
            save_label: self.save_label,
            report_json: self.report_json,
            events_json: self.events_json,
        }))
    }
}
