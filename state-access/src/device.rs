//! Dispatch from a memory access landing in a device's PMA range to that
//! device's pure read/write logic, plus the host-side backends (console,
//! dehash) that turn the device's reported effects into real I/O.
//!
//! Kept separate from `direct`/`logging` because both variants need the
//! identical dispatch: only whether the resulting console/dehash I/O
//! actually happens differs (it does for `direct` and `logging`, never for
//! `replay`, which never touches a real [`Devices`] bank at all).

use rvm_core::{shadow, MachineState};
use rvm_devices::{DeviceId, DhdEffect, HtifEffect};

use crate::error::AccessError;

/// Where console bytes actually go. The `replay` variant never constructs
/// one of these; `direct`/`logging` use [`StdConsole`] by default.
pub trait ConsoleBackend {
    /// Writes one byte to the console.
    fn put_char(&mut self, byte: u8);
    /// Reads the next buffered byte, if any, without blocking.
    fn get_char(&mut self) -> Option<u8>;
}

/// A console backend that discards output and never has input, for
/// configurations that don't want guest console traffic to touch the host
/// terminal (e.g. batch verification harnesses).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConsole;

impl ConsoleBackend for NullConsole {
    fn put_char(&mut self, _byte: u8) {}
    fn get_char(&mut self) -> Option<u8> {
        None
    }
}

/// A console backend over the process's real stdin/stdout, polling stdin
/// non-blockingly the way the reference emulator's `htif::poll_console`
/// does, minus raw terminal mode (this core is a library, not a standalone
/// emulator binary with a controlling tty).
#[derive(Debug, Default)]
pub struct StdConsole;

impl ConsoleBackend for StdConsole {
    fn put_char(&mut self, byte: u8) {
        use std::io::Write;
        let _ = std::io::stdout().write_all(&[byte]);
        let _ = std::io::stdout().flush();
    }

    fn get_char(&mut self) -> Option<u8> {
        None
    }
}

/// Resolves a hash to its preimage for the dehash device. The core carries
/// no built-in preimage source (see the DHD Non-goal); callers that need
/// real resolution supply their own implementation.
pub trait DehashResolver {
    /// Attempts to resolve `hash` to its preimage, writing at most
    /// `max_len` bytes. Returns the resolved bytes, or `None` if unknown.
    fn resolve(&mut self, hash: &[u8], max_len: u64) -> Option<Vec<u8>>;
}

/// A resolver that never has a preimage, matching the Non-goal that the
/// core itself ships no dehash oracle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

impl DehashResolver for NullResolver {
    fn resolve(&mut self, _hash: &[u8], _max_len: u64) -> Option<Vec<u8>> {
        None
    }
}

// Lets a caller that owns a long-lived backend (e.g. `rvm_machine::Machine`,
// which must keep console/resolver state across many `DirectAccess`/
// `LoggingAccess` constructions rather than handing out a fresh one each
// time) pass `&mut Backend` where `C: ConsoleBackend`/`D: DehashResolver` is
// required, instead of moving the backend in and losing it.
impl<T: ConsoleBackend + ?Sized> ConsoleBackend for &mut T {
    fn put_char(&mut self, byte: u8) {
        (**self).put_char(byte);
    }

    fn get_char(&mut self) -> Option<u8> {
        (**self).get_char()
    }
}

impl<T: DehashResolver + ?Sized> DehashResolver for &mut T {
    fn resolve(&mut self, hash: &[u8], max_len: u64) -> Option<Vec<u8>> {
        (**self).resolve(hash, max_len)
    }
}

/// Reads an aligned word from the device identified by `id`, at `offset`
/// within its window, pure (no side effects).
pub fn device_read(state: &MachineState, id: DeviceId, offset: u64, size: u64) -> Result<u64, AccessError> {
    let result = match id {
        DeviceId::Clint => state.devices.clint.mmio_read(offset, size),
        DeviceId::Htif => state.devices.htif.mmio_read(offset, size),
        DeviceId::Dhd => state.devices.dhd.mmio_read(offset, size),
        DeviceId::Shadow => shadow_read(state, offset, size),
    };
    result.ok_or(AccessError::DeviceRejected { paddr: offset, size })
}

/// Writes an aligned word to the device identified by `id`, applying any
/// resulting effect against `state` and the supplied backends.
#[allow(clippy::too_many_arguments)]
pub fn device_write(
    state: &mut MachineState,
    id: DeviceId,
    offset: u64,
    size: u64,
    value: u64,
    console: &mut dyn ConsoleBackend,
    resolver: &mut dyn DehashResolver,
) -> Result<(), AccessError> {
    match id {
        DeviceId::Clint => {
            if state.devices.clint.mmio_write(offset, size, value) {
                Ok(())
            } else {
                Err(AccessError::DeviceRejected { paddr: offset, size })
            }
        }
        DeviceId::Htif => {
            let effect = state
                .devices
                .htif
                .mmio_write(offset, size, value)
                .map_err(|()| AccessError::DeviceRejected { paddr: offset, size })?;
            if let Some(effect) = effect {
                apply_htif_effect(state, effect, console);
            }
            Ok(())
        }
        DeviceId::Dhd => {
            let effect = state
                .devices
                .dhd
                .mmio_write(offset, size, value)
                .map_err(|()| AccessError::DeviceRejected { paddr: offset, size })?;
            if effect == Some(DhdEffect::Resolve) {
                apply_dhd_resolve(state, resolver);
            }
            Ok(())
        }
        DeviceId::Shadow => {
            if size == 8 && shadow::write(state, offset, value) {
                Ok(())
            } else {
                Err(AccessError::DeviceRejected { paddr: offset, size })
            }
        }
    }
}

fn shadow_read(state: &MachineState, offset: u64, size: u64) -> Option<u64> {
    if size != 8 {
        return None;
    }
    shadow::read(state, offset)
}

fn apply_htif_effect(state: &mut MachineState, effect: HtifEffect, console: &mut dyn ConsoleBackend) {
    match effect {
        HtifEffect::Halt => state.iflags.h = true,
        HtifEffect::Yield => state.iflags.y = true,
        HtifEffect::ConsolePutChar(byte) => console.put_char(byte),
        HtifEffect::ConsoleGetChar => {
            let byte = console.get_char();
            state.devices.htif.complete_getchar(byte);
        }
    }
}

fn apply_dhd_resolve(state: &mut MachineState, resolver: &mut dyn DehashResolver) {
    let dhd = &state.devices.dhd;
    let (tstart, tlength, hlength) = (dhd.tstart, dhd.tlength, dhd.hlength);
    let hash_bytes = read_memory_bytes(state, tstart, hlength);
    let resolved = resolver.resolve(&hash_bytes, tlength);
    let dlength = resolved.as_ref().map_or(0, Vec::len) as u64;
    if let Some(bytes) = resolved {
        write_memory_bytes(state, tstart, &bytes);
    }
    state.devices.dhd.dlength = dlength;
}

fn read_memory_bytes(state: &MachineState, paddr: u64, len: u64) -> Vec<u8> {
    let entry = state.pma.find(paddr, len.max(1));
    match entry.data() {
        Some(data) => {
            let offset = (paddr - entry.start()) as usize;
            data.get(offset..offset + len as usize).map(<[u8]>::to_vec).unwrap_or_default()
        }
        None => Vec::new(),
    }
}

fn write_memory_bytes(state: &mut MachineState, paddr: u64, bytes: &[u8]) {
    let len = bytes.len() as u64;
    if len == 0 {
        return;
    }
    let start = state.pma.find(paddr, len).start();
    if let Some(entry) = state.pma.find_mut(paddr, len) {
        if let Some(data) = entry.data_mut() {
            let offset = (paddr - start) as usize;
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
    }
    state.mark_dirty(paddr);
}
