//! Public API for the rvm machine core: configuration, persistence, and the
//! [`Machine`] object that composes `rvm-core`, `rvm-merkle`,
//! `rvm-state-access`, `rvm-mmu`, `rvm-interp`, `rvm-devices` and
//! `rvm-verifier` behind one surface. See the `rvm` binary for a CLI over
//! this crate.

pub mod config;
mod error;
mod machine;
mod persist;

pub use config::{
    ClintConfig, DhdConfig, FlashDriveConfig, HtifConfig, MachineConfig, ProcessorConfig, RamConfig, RomConfig,
    RuntimeConfig, CLINT_START, DHD_START, HTIF_START, RAM_START, ROM_START,
};
pub use error::HostError;
pub use machine::{verify_access_log, verify_state_transition, AccessLog, Machine, RunBreak};

pub use rvm_merkle::{Hash, Proof};
pub use rvm_state_access::{ConsoleBackend, DehashResolver, LogType, NullConsole, NullResolver, StdConsole};
