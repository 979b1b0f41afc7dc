//! Register-mapped device state.
//!
//! Devices are modelled as plain data plus pure dispatch functions, not as
//! trait objects with hidden I/O. A device's `mmio_read`/`mmio_write` never
//! touches the outside world directly: where a real side effect is needed
//! (printing a console byte, halting the machine) the dispatch function
//! returns a [`ClintEffect`]/[`HtifEffect`] describing it, and the caller —
//! which differs between direct execution, logging and replay — decides
//! whether to actually perform it. This keeps the replay verifier
//! deterministic: replaying a logged step over stdout would otherwise
//! reprint console output that already happened once.

pub use rvm_hal::DeviceId;

mod clint;
mod dhd;
mod htif;

pub use clint::{ClintState, CLINT_LENGTH};
pub use dhd::{DhdEffect, DhdState, DHD_LENGTH};
pub use htif::{HtifEffect, HtifState, HTIF_LENGTH};

/// All device state reachable through the PMA table, grouped by tag.
#[derive(Debug, Clone, Default)]
pub struct Devices {
    /// Core-local interrupt timer.
    pub clint: ClintState,
    /// Host-target interface.
    pub htif: HtifState,
    /// Dehash oracle register bank.
    pub dhd: DhdState,
}

impl Devices {
    /// A fresh device bank with every register at its power-on value.
    pub fn new() -> Self {
        Self::default()
    }
}
