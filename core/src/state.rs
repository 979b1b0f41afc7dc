//! The machine's architectural state: registers, CSRs, `iflags`, the load
//! reservation, the PMA-backed address space, and device state, plus the
//! dirty-page tracking the Merkle engine consumes on rehash.

use std::collections::HashSet;

use rvm_devices::Devices;
use rvm_hal::{DeviceId, PmaEntry, PmaFlags, PmaTable, PAGE_SIZE};

use crate::csr::Csrs;
use crate::iflags::Iflags;
use crate::regs::RegisterFile;
use crate::shadow::{SHADOW_LENGTH, SHADOW_START};

/// Sentinel `ilrsc` value meaning "no reservation held", matching the
/// reference emulator's use of an address no real PMA range can contain.
pub const ILRSC_NONE: u64 = u64::MAX;

/// The complete architectural state of one RISC-V hart plus its address
/// space and devices.
///
/// This is the object every [`StateAccess`](../../rvm_state_access/trait.StateAccess.html)
/// variant reads and writes through; it never branches on who is touching
/// it.
#[derive(Debug, Clone)]
pub struct MachineState {
    pub regs: RegisterFile,
    pub pc: u64,
    pub csrs: Csrs,
    pub iflags: Iflags,
    /// Address reserved by the last `lr.*`, or [`ILRSC_NONE`] when idle.
    pub ilrsc: u64,
    pub pma: PmaTable,
    pub devices: Devices,
    dirty_pages: HashSet<u64>,
}

impl MachineState {
    /// Builds a fresh machine state with default register/CSR values and
    /// the given PMA table, plus the shadow-state range registered
    /// automatically so callers never have to remember to wire it (and
    /// never could place guest RAM over it, since [`PmaTable::push`] panics
    /// on overlap). CLINT/HTIF/DHD ranges are board-specific and remain the
    /// caller's responsibility to add to `pma` before calling this.
    pub fn new(mut pma: PmaTable) -> Self {
        pma.push(PmaEntry::device(SHADOW_START, SHADOW_LENGTH, PmaFlags::device(), DeviceId::Shadow));
        Self {
            regs: RegisterFile::new(),
            pc: 0,
            csrs: Csrs::default(),
            iflags: Iflags::default(),
            ilrsc: ILRSC_NONE,
            pma,
            devices: Devices::new(),
            dirty_pages: HashSet::new(),
        }
    }

    /// Marks the page containing `paddr` dirty, to be rehashed on the next
    /// `update_merkle_tree`. `paddr` is a global physical address, not an
    /// offset within a PMA entry.
    pub fn mark_dirty(&mut self, paddr: u64) {
        self.dirty_pages.insert(paddr & !(PAGE_SIZE - 1));
    }

    /// Drains and returns the set of dirty page addresses accumulated since
    /// the last rehash, clearing the tracker.
    pub fn take_dirty_pages(&mut self) -> HashSet<u64> {
        std::mem::take(&mut self.dirty_pages)
    }

    /// Whether any page is currently marked dirty.
    pub fn has_dirty_pages(&self) -> bool {
        !self.dirty_pages.is_empty()
    }

    /// Sets the reservation at `paddr`'s containing granule, per the
    /// `lr.*`/`sc.*` state machine.
    pub fn set_reservation(&mut self, paddr: u64) {
        self.ilrsc = paddr;
    }

    /// Checks whether a reservation is held at `paddr` and, if so, clears it
    /// regardless of outcome (matching the `idle → reserved → idle`
    /// transition: every `sc.*`, successful or not, clears the reservation).
    pub fn take_reservation(&mut self, paddr: u64) -> bool {
        let held = self.ilrsc == paddr;
        self.ilrsc = ILRSC_NONE;
        held
    }

    /// Clears any held reservation, e.g. on trap entry/exit or privilege
    /// change.
    pub fn clear_reservation(&mut self) {
        self.ilrsc = ILRSC_NONE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_hal::PmaTable;

    #[test]
    fn fresh_state_has_no_reservation() {
        let state = MachineState::new(PmaTable::new());
        assert_eq!(state.ilrsc, ILRSC_NONE);
    }

    #[test]
    fn reservation_clears_on_any_sc() {
        let mut state = MachineState::new(PmaTable::new());
        state.set_reservation(0x1000);
        assert!(state.take_reservation(0x1000));
        assert_eq!(state.ilrsc, ILRSC_NONE);
        // A second sc to the same address now fails: no reservation held.
        state.set_reservation(0x1000);
        assert!(!state.take_reservation(0x2000));
        assert_eq!(state.ilrsc, ILRSC_NONE);
    }

    #[test]
    fn dirty_pages_drain_once() {
        let mut state = MachineState::new(PmaTable::new());
        state.mark_dirty(0x1234);
        state.mark_dirty(0x1290);
        let dirty = state.take_dirty_pages();
        assert_eq!(dirty.len(), 1); // same page
        assert!(!state.has_dirty_pages());
    }
}
