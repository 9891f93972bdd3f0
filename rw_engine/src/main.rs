use anyhow::Result;

mod cli;
mod runtime;
mod world_bridge;

use cli::Command;

fn main() -> Result<()> {
    env_logger::init();

    match cli::parse()? {
        Command::Run(args) => runtime::execute(args),
        Command::Describe(args) => runtime::describe(args),
    }
}
