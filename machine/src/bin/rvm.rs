//! `rvm`: a thin command-line front end over [`rvm_machine::Machine`] for
//! running a configured machine, single-stepping it with a recorded access
//! log, and inspecting or persisting its state.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use rvm_machine::{HostError, LogType, Machine, MachineConfig};

#[derive(Debug, Parser)]
#[command(name = "rvm", about = "A deterministic RISC-V 64-bit machine core", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Runs a machine from a configuration file up to a target `mcycle`.
    Run {
        /// Path to a JSON-serialized `MachineConfig`.
        #[arg(long)]
        config: PathBuf,
        /// `mcycle` to run until.
        #[arg(long)]
        cycles: u64,
        /// Directory to persist the resulting machine to, if given.
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Single-steps a machine, recording and verifying each step's access log.
    Step {
        /// Path to a JSON-serialized `MachineConfig`.
        #[arg(long)]
        config: PathBuf,
        /// Number of steps to take.
        #[arg(long, default_value_t = 1)]
        count: u64,
        /// Also record annotations in each step's log.
        #[arg(long)]
        annotate: bool,
    },
    /// Builds a fresh machine from a configuration file and persists it.
    Store {
        /// Path to a JSON-serialized `MachineConfig`.
        #[arg(long)]
        config: PathBuf,
        /// Directory to persist the machine to.
        #[arg(long)]
        dir: PathBuf,
    },
    /// Loads a persisted machine and reports its root hash.
    Load {
        /// Directory a machine was previously stored to.
        #[arg(long)]
        dir: PathBuf,
    },
    /// Prints the Merkle root hash of a machine built from a configuration
    /// file, without running it.
    Hash {
        /// Path to a JSON-serialized `MachineConfig`.
        #[arg(long)]
        config: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<MachineConfig, HostError> {
    let file = std::fs::File::open(path).map_err(|err| HostError::io(path, err))?;
    serde_json::from_reader(file).map_err(|err| HostError::InvalidArgument(err.to_string()))
}

fn hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

fn run() -> Result<(), HostError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, cycles, store } => {
            let mut machine = Machine::new(load_config(&config)?)?;
            let reason = machine.run(cycles)?;
            machine.update_merkle_tree();
            println!("run stopped: {reason:?}, root={}", hex(&machine.get_root_hash()));
            if let Some(dir) = store {
                machine.store(&dir)?;
                println!("stored to {}", dir.display());
            }
        }
        Command::Step { config, count, annotate } => {
            let mut machine = Machine::new(load_config(&config)?)?;
            let log_type = if annotate { LogType::AccessesAndAnnotations } else { LogType::Accesses };
            for i in 0..count {
                let pre_root = machine.get_root_hash();
                let log = machine.step(log_type)?;
                machine.update_merkle_tree();
                let post_root = machine.get_root_hash();
                rvm_machine::verify_state_transition(pre_root, &log, post_root)
                    .map_err(|err| HostError::RuntimeError(err.to_string()))?;
                println!("step {i}: {} accesses, root={}", log.accesses.len(), hex(&post_root));
            }
        }
        Command::Store { config, dir } => {
            let machine = Machine::new(load_config(&config)?)?;
            machine.store(&dir)?;
            println!("stored to {}", dir.display());
        }
        Command::Load { dir } => {
            let machine = Machine::load(&dir)?;
            println!("root={}", hex(&machine.get_root_hash()));
        }
        Command::Hash { config } => {
            let machine = Machine::new(load_config(&config)?)?;
            println!("root={}", hex(&machine.get_root_hash()));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            eprintln!("rvm: {err}");
            ExitCode::FAILURE
        }
    }
}
