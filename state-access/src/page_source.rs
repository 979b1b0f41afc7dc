//! Bridges [`MachineState`] to the Merkle tree's [`PageSource`]: renders the
//! `PAGE_SIZE` bytes backing any page-aligned address, whichever PMA range
//! it falls in, including the shadow/CLINT/HTIF/DHD device ranges which
//! have no real byte storage and must be rendered on demand.

use rvm_core::{shadow, MachineState};
use rvm_devices::DeviceId;
use rvm_hal::{PmaKind, PAGE_SIZE};
use rvm_merkle::PageSource;

impl PageSource for MachineState {
    fn peek_page(&self, page_addr: u64) -> Option<Vec<u8>> {
        let entry = self.pma.find(page_addr, 1);
        if entry.is_sentinel() {
            return None;
        }
        match entry.kind() {
            PmaKind::Memory { data } => {
                let offset = (page_addr - entry.start()) as usize;
                let page = data.get(offset..offset + PAGE_SIZE as usize)?;
                if page.iter().all(|&b| b == 0) {
                    None
                } else {
                    Some(page.to_vec())
                }
            }
            PmaKind::Device(DeviceId::Shadow) => Some(shadow::peek_page(self)),
            PmaKind::Device(DeviceId::Clint) => Some(pad_to_page(self.devices.clint.peek_page())),
            PmaKind::Device(DeviceId::Htif) => Some(pad_to_page(self.devices.htif.peek_page())),
            PmaKind::Device(DeviceId::Dhd) => Some(pad_to_page(self.devices.dhd.peek_page())),
            PmaKind::Sentinel => None,
        }
    }
}

/// Device windows are exactly one page today, but pad defensively so a
/// narrower window never desyncs the tree's fixed page size.
fn pad_to_page(mut bytes: Vec<u8>) -> Vec<u8> {
    bytes.resize(PAGE_SIZE as usize, 0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_hal::{PmaEntry, PmaFlags, PmaTable};

    #[test]
    fn unmapped_page_is_none() {
        let state = MachineState::new(PmaTable::new());
        assert_eq!(state.peek_page(0x8000_0000), None);
    }

    #[test]
    fn shadow_page_reflects_pc() {
        let mut state = MachineState::new(PmaTable::new());
        state.pc = 0x42;
        let page = state.peek_page(shadow::SHADOW_START).unwrap();
        assert_eq!(u64::from_le_bytes(page[0..8].try_into().unwrap()), 0x42);
    }

    #[test]
    fn all_zero_ram_page_is_pristine() {
        let mut pma = PmaTable::new();
        pma.push(PmaEntry::memory(0x8000_0000, PmaFlags::ram(), vec![0u8; PAGE_SIZE as usize]));
        let state = MachineState::new(pma);
        assert_eq!(state.peek_page(0x8000_0000), None);
    }
}
