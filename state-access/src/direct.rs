//! The fast path: reads and writes land directly on [`MachineState`] with no
//! proof bookkeeping. Used by `run`, where only the final state matters.
//!
//! Registers, `pc`, CSRs, `iflags` and `ilrsc` are all addressed through the
//! shadow-state range rather than touched as raw struct fields, so this
//! variant and [`crate::logging::LoggingAccess`] share one read/write path
//! end to end — the only difference is whether that path also records a
//! proof.

use rvm_core::{shadow, Iflags, MachineState};

use crate::device::{ConsoleBackend, DehashResolver, NullConsole, NullResolver};
use crate::error::AccessError;
use crate::mem::{read_aligned, write_aligned};
use crate::StateAccess;

/// Direct state access over a borrowed [`MachineState`], with pluggable
/// console and dehash backends (defaulting to [`NullConsole`]/[`NullResolver`]
/// so a bare `run` never blocks on host I/O it wasn't given).
#[derive(Debug)]
pub struct DirectAccess<'a, C = NullConsole, D = NullResolver>
where
    C: ConsoleBackend,
    D: DehashResolver,
{
    state: &'a mut MachineState,
    console: C,
    resolver: D,
}

impl<'a> DirectAccess<'a, NullConsole, NullResolver> {
    /// Direct access with no console or dehash backend wired up.
    pub fn new(state: &'a mut MachineState) -> Self {
        Self { state, console: NullConsole, resolver: NullResolver }
    }
}

impl<'a, C, D> DirectAccess<'a, C, D>
where
    C: ConsoleBackend,
    D: DehashResolver,
{
    /// Direct access with explicit console/dehash backends.
    pub fn with_backends(state: &'a mut MachineState, console: C, resolver: D) -> Self {
        Self { state, console, resolver }
    }

    /// The underlying machine state, for callers that need to inspect it
    /// beyond the [`StateAccess`] surface (e.g. the Merkle/dirty-page API).
    pub fn state(&self) -> &MachineState {
        self.state
    }

    /// Mutable access to the underlying machine state.
    pub fn state_mut(&mut self) -> &mut MachineState {
        self.state
    }
}

impl<C, D> StateAccess for DirectAccess<'_, C, D>
where
    C: ConsoleBackend,
    D: DehashResolver,
{
    fn read_x(&mut self, reg: u8) -> u64 {
        self.read_memory(shadow::SHADOW_START + shadow::gpr_offset(reg), 3).unwrap_or(0)
    }

    fn write_x(&mut self, reg: u8, value: u64) {
        let _ = self.write_memory(shadow::SHADOW_START + shadow::gpr_offset(reg), 3, value);
    }

    fn read_pc(&mut self) -> u64 {
        self.read_memory(shadow::SHADOW_START + shadow::pc_offset(), 3).unwrap_or(0)
    }

    fn write_pc(&mut self, value: u64) {
        let _ = self.write_memory(shadow::SHADOW_START + shadow::pc_offset(), 3, value);
    }

    fn read_csr(&mut self, addr: u16) -> Result<u64, AccessError> {
        let offset = shadow::csr_offset(addr).ok_or(AccessError::NoSuchCsr { addr })?;
        self.read_memory(shadow::SHADOW_START + offset, 3)
    }

    fn write_csr(&mut self, addr: u16, value: u64) -> Result<(), AccessError> {
        let offset = shadow::csr_offset(addr).ok_or(AccessError::NoSuchCsr { addr })?;
        self.write_memory(shadow::SHADOW_START + offset, 3, value)
    }

    fn read_iflags(&mut self) -> Iflags {
        let word = self.read_memory(shadow::SHADOW_START + shadow::iflags_offset(), 3).unwrap_or(0);
        Iflags::unpack(word)
    }

    fn write_iflags(&mut self, iflags: Iflags) {
        let _ = self.write_memory(shadow::SHADOW_START + shadow::iflags_offset(), 3, iflags.pack());
    }

    fn read_ilrsc(&mut self) -> u64 {
        self.read_memory(shadow::SHADOW_START + shadow::ilrsc_offset(), 3).unwrap_or(rvm_core::ILRSC_NONE)
    }

    fn write_ilrsc(&mut self, value: u64) {
        let _ = self.write_memory(shadow::SHADOW_START + shadow::ilrsc_offset(), 3, value);
    }

    fn read_memory(&mut self, paddr: u64, log2_size: u32) -> Result<u64, AccessError> {
        read_aligned(self.state, paddr, log2_size).map(|(value, _)| value)
    }

    fn write_memory(&mut self, paddr: u64, log2_size: u32, value: u64) -> Result<(), AccessError> {
        write_aligned(self.state, paddr, log2_size, value, &mut self.console, &mut self.resolver).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_hal::{PmaEntry, PmaFlags, PmaTable};

    fn machine_with_ram() -> MachineState {
        let mut pma = PmaTable::new();
        pma.push(PmaEntry::memory(0x8000_0000, PmaFlags::ram(), vec![0u8; 0x1000]));
        MachineState::new(pma)
    }

    #[test]
    fn register_writes_are_immediate() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        access.write_x(5, 42);
        assert_eq!(access.read_x(5), 42);
        assert_eq!(access.read_x(0), 0);
        access.write_x(0, 99);
        assert_eq!(access.read_x(0), 0);
    }

    #[test]
    fn pc_round_trips() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        access.write_pc(0x8000_0004);
        assert_eq!(access.read_pc(), 0x8000_0004);
    }

    #[test]
    fn memory_round_trips_and_marks_dirty() {
        let mut state = machine_with_ram();
        {
            let mut access = DirectAccess::new(&mut state);
            access.write_memory(0x8000_0008, 3, 0xDEAD_BEEF).unwrap();
            assert_eq!(access.read_memory(0x8000_0008, 3).unwrap(), 0xDEAD_BEEF);
        }
        assert!(state.has_dirty_pages());
    }

    #[test]
    fn unmapped_memory_errors() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        assert!(access.read_memory(0x1234, 3).is_err());
    }
}
