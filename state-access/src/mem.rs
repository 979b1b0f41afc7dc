//! Shared aligned-word read/write dispatch used by both the direct and
//! logging [`crate::StateAccess`] variants: locate the PMA entry covering an
//! address, then either slice host bytes or hand off to [`crate::device`].

use rvm_hal::{log2_size_to_bytes, PmaKind};

use rvm_core::MachineState;

use crate::device::{device_read, device_write, ConsoleBackend, DehashResolver};
use crate::error::AccessError;

/// Reads the `2^log2_size`-byte word at `paddr`, returning its value and the
/// raw little-endian bytes actually present (the latter is what logging
/// records; the former is what the interpreter consumes).
pub fn read_aligned(state: &MachineState, paddr: u64, log2_size: u32) -> Result<(u64, Vec<u8>), AccessError> {
    let size = log2_size_to_bytes(log2_size);
    let entry = state.pma.find(paddr, size);
    if entry.is_sentinel() {
        return Err(AccessError::Unmapped { paddr, size });
    }
    match entry.kind() {
        PmaKind::Memory { data } => {
            let offset = (paddr - entry.start()) as usize;
            let bytes = data[offset..offset + size as usize].to_vec();
            let mut padded = [0u8; 8];
            padded[..bytes.len()].copy_from_slice(&bytes);
            Ok((u64::from_le_bytes(padded), bytes))
        }
        PmaKind::Device(id) => {
            let offset = paddr - entry.start();
            let value = device_read(state, *id, offset, size)?;
            Ok((value, value.to_le_bytes()[..size as usize].to_vec()))
        }
        PmaKind::Sentinel => Err(AccessError::Unmapped { paddr, size }),
    }
}

/// Writes `value`'s low `2^log2_size` bytes at `paddr`, returning the raw
/// bytes actually written. Device writes may apply host-visible effects
/// (console output, halt, dehash resolution) through `console`/`resolver`.
pub fn write_aligned(
    state: &mut MachineState,
    paddr: u64,
    log2_size: u32,
    value: u64,
    console: &mut dyn ConsoleBackend,
    resolver: &mut dyn DehashResolver,
) -> Result<Vec<u8>, AccessError> {
    let size = log2_size_to_bytes(log2_size);
    let bytes = value.to_le_bytes()[..size as usize].to_vec();
    let entry = state.pma.find(paddr, size);
    if entry.is_sentinel() {
        return Err(AccessError::Unmapped { paddr, size });
    }
    let start = entry.start();
    let kind_is_device = matches!(entry.kind(), PmaKind::Device(_));

    if kind_is_device {
        let PmaKind::Device(id) = *state.pma.find(paddr, size).kind() else { unreachable!() };
        device_write(state, id, paddr - start, size, value, console, resolver)?;
    } else if let Some(entry) = state.pma.find_mut(paddr, size) {
        let offset = (paddr - start) as usize;
        if let Some(data) = entry.data_mut() {
            data[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
    }
    state.mark_dirty(paddr);
    Ok(bytes)
}
