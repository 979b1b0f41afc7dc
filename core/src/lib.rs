//! Architectural machine state for the rvm core.
//!
//! This crate owns the data, not the behaviour: register file, CSRs,
//! `iflags`, the load reservation, the PMA-backed address space and device
//! state. Instruction semantics live in `rvm-interp`; Merkle hashing lives
//! in `rvm-merkle`; all mutation of this state during execution is meant to
//! go through `rvm-state-access`, not directly.

pub mod csr;
pub mod iflags;
pub mod regs;
pub mod shadow;
pub mod state;

pub use csr::Csrs;
pub use iflags::{Iflags, PRV_M, PRV_S, PRV_U};
pub use regs::RegisterFile;
pub use state::{MachineState, ILRSC_NONE};
