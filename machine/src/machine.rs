//! The [`Machine`] struct: the public API's core object, binding a
//! [`MachineState`] and its [`MerkleTree`] together behind `run`/`step`,
//! persistence and the proof surface.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, info};

use rvm_core::MachineState;
use rvm_devices::{CLINT_LENGTH, DHD_LENGTH, HTIF_LENGTH};
use rvm_hal::{DeviceId, PmaEntry, PmaFlags, PmaTable, PAGE_SIZE};
use rvm_interp::CycleEffect;
use rvm_merkle::{Hash, MerkleTree, Proof};
use rvm_mmu::TlbSet;
use rvm_state_access::{
    ConsoleBackend, DehashResolver, DirectAccess, LogType, LoggingAccess, NullResolver, StateAccess, StdConsole,
};

use crate::config::{MachineConfig, CLINT_START, DHD_START, HTIF_START, ROM_START};
use crate::error::HostError;
use crate::persist;

pub use rvm_state_access::AccessLog;
pub use rvm_verifier::{verify_access_log, verify_state_transition};

/// Why [`Machine::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunBreak {
    /// `mcycle` reached the requested target with the machine still live.
    ReachedTarget,
    /// The machine executed a halt request (`iflags.H`).
    Halted,
    /// The machine executed a yield request (`iflags.Y`).
    Yielded,
}

/// A reserved region at the start of the ROM image for the NUL-terminated
/// `bootargs` string, ahead of whatever `image_filename` supplies.
const BOOTARGS_RESERVED: u64 = 0x100;

/// A complete, runnable RISC-V machine: architectural state, its Merkle
/// tree, a TLB for the unlogged `run` path, and the console/dehash backends
/// device writes are dispatched to.
///
/// Generic over its backends the same way [`DirectAccess`]/[`LoggingAccess`]
/// are, so a caller that needs a stateful console (one that buffers queued
/// input) or a real dehash resolver can supply one and keep it alive across
/// every `run`/`step` call, rather than handing out a fresh backend per call.
#[derive(Debug)]
pub struct Machine<C = StdConsole, D = NullResolver>
where
    C: ConsoleBackend,
    D: DehashResolver,
{
    config: MachineConfig,
    state: MachineState,
    tree: MerkleTree,
    tlb: TlbSet,
    console: C,
    resolver: D,
    snapshot: Option<Box<(MachineState, MerkleTree)>>,
}

impl Machine<StdConsole, NullResolver> {
    /// Builds a machine from `config` with the default console (real stdout,
    /// no stdin) and no dehash resolver.
    pub fn new(config: MachineConfig) -> Result<Self, HostError> {
        Self::with_backends(config, StdConsole, NullResolver)
    }

    /// Loads a previously [`Machine::store`]d machine from `dir`, with the
    /// default backends.
    pub fn load(dir: &Path) -> Result<Self, HostError> {
        Self::load_with_backends(dir, StdConsole, NullResolver)
    }
}

impl<C, D> Machine<C, D>
where
    C: ConsoleBackend,
    D: DehashResolver,
{
    /// Builds a machine from `config` with explicit console/dehash backends.
    pub fn with_backends(config: MachineConfig, console: C, resolver: D) -> Result<Self, HostError> {
        let state = build_state(&config, None)?;
        let mut tree = MerkleTree::new();
        tree.update(&all_pages(&state.pma), &state);
        info!("machine built: ram={} bytes, rom={} bytes, {} flash drive(s)", config.ram.length, config.rom.length, config.flash_drives.len());
        Ok(Self { config, state, tree, tlb: TlbSet::new(), console, resolver, snapshot: None })
    }

    /// Loads a previously [`Machine::store`]d machine from `dir`, with
    /// explicit console/dehash backends.
    pub fn load_with_backends(dir: &Path, console: C, resolver: D) -> Result<Self, HostError> {
        let manifest_path = dir.join(persist::MANIFEST_FILE);
        let file = std::fs::File::open(&manifest_path).map_err(|err| HostError::io(&manifest_path, err))?;
        let manifest: persist::Manifest =
            serde_json::from_reader(file).map_err(|err| HostError::RuntimeError(err.to_string()))?;

        let mut overrides = HashMap::new();
        for dump in &manifest.memory_dumps {
            let path = dir.join(&dump.file);
            let bytes = std::fs::read(&path).map_err(|err| HostError::io(&path, err))?;
            overrides.insert(dump.start, bytes);
        }

        let state = build_state(&manifest.config, Some(&overrides))?;
        let mut tree = MerkleTree::new();
        tree.update(&all_pages(&state.pma), &state);

        let expected = persist::hex_decode(&manifest.root_hash)
            .ok_or_else(|| HostError::RuntimeError("manifest root_hash is not valid hex".to_string()))?;
        if tree.root() != expected {
            return Err(HostError::RuntimeError("rehashed root does not match the persisted manifest".to_string()));
        }

        Ok(Self { config: manifest.config, state, tree, tlb: TlbSet::new(), console, resolver, snapshot: None })
    }

    /// Runs cycles until `mcycle` reaches `target_mcycle`, the machine
    /// halts, or it yields, with no proof bookkeeping. Returns which of
    /// those stopped it; after a [`RunBreak::Yielded`], the caller is
    /// expected to clear `iflags.Y` (e.g. via a CSR/iflags write) before
    /// calling `run` again, or it will return immediately with the same
    /// result.
    pub fn run(&mut self, target_mcycle: u64) -> Result<RunBreak, HostError> {
        loop {
            if self.state.iflags.h {
                return Ok(RunBreak::Halted);
            }
            if self.state.iflags.y {
                return Ok(RunBreak::Yielded);
            }
            if self.state.csrs.mcycle >= target_mcycle {
                return Ok(RunBreak::ReachedTarget);
            }
            sync_timer_interrupt(&mut self.state);
            let mut access = DirectAccess::with_backends(&mut self.state, &mut self.console, &mut self.resolver);
            let effect = rvm_interp::step_cycle(&mut access, &mut self.tlb)?;
            if effect == CycleEffect::Halted {
                return Ok(RunBreak::Halted);
            }
        }
    }

    /// Runs exactly one cycle with full Merkle-proof bookkeeping, returning
    /// the resulting [`AccessLog`]. The caller is responsible for calling
    /// [`Self::update_merkle_tree`] afterward to fold the step's writes into
    /// the tree the next `step`'s proofs are checked against.
    pub fn step(&mut self, log_type: LogType) -> Result<AccessLog, HostError> {
        sync_timer_interrupt(&mut self.state);
        let mut access =
            LoggingAccess::with_backends(&mut self.state, &self.tree, log_type, &mut self.console, &mut self.resolver);
        rvm_interp::step_cycle(&mut access, &mut self.tlb)?;
        Ok(access.into_log())
    }

    /// Reads general register `x[reg]`.
    pub fn read_x(&mut self, reg: u8) -> u64 {
        DirectAccess::with_backends(&mut self.state, &mut self.console, &mut self.resolver).read_x(reg)
    }

    /// Writes general register `x[reg]` (a write to `x0` is discarded).
    pub fn write_x(&mut self, reg: u8, value: u64) {
        DirectAccess::with_backends(&mut self.state, &mut self.console, &mut self.resolver).write_x(reg, value);
    }

    /// Reads the program counter.
    pub fn read_pc(&mut self) -> u64 {
        DirectAccess::with_backends(&mut self.state, &mut self.console, &mut self.resolver).read_pc()
    }

    /// Writes the program counter.
    pub fn write_pc(&mut self, value: u64) {
        DirectAccess::with_backends(&mut self.state, &mut self.console, &mut self.resolver).write_pc(value);
    }

    /// Reads a CSR by address.
    pub fn read_csr(&mut self, addr: u16) -> Result<u64, HostError> {
        Ok(DirectAccess::with_backends(&mut self.state, &mut self.console, &mut self.resolver).read_csr(addr)?)
    }

    /// Writes a CSR by address, WARL-masked on the way in.
    pub fn write_csr(&mut self, addr: u16, value: u64) -> Result<(), HostError> {
        Ok(DirectAccess::with_backends(&mut self.state, &mut self.console, &mut self.resolver).write_csr(addr, value)?)
    }

    /// Reads `len` bytes starting at `addr`. The whole range must lie within
    /// a single memory (RAM/ROM/flash) PMA entry.
    pub fn read_memory(&self, addr: u64, len: u64) -> Result<Vec<u8>, HostError> {
        let entry = self.state.pma.find(addr, len.max(1));
        if entry.is_sentinel() {
            return Err(HostError::OutOfRange(format!("no mapped range covers [{addr:#x}, +{len})")));
        }
        let data = entry
            .data()
            .ok_or_else(|| HostError::InvalidArgument(format!("[{addr:#x}, +{len}) is a device range, not memory")))?;
        let offset = (addr - entry.start()) as usize;
        Ok(data[offset..offset + len as usize].to_vec())
    }

    /// Writes `bytes` starting at `addr`, marking every touched page dirty.
    /// The whole range must lie within a single memory PMA entry.
    pub fn write_memory(&mut self, addr: u64, bytes: &[u8]) -> Result<(), HostError> {
        let len = bytes.len() as u64;
        if len == 0 {
            return Ok(());
        }
        let start = {
            let entry = self.state.pma.find(addr, len);
            if entry.is_sentinel() {
                return Err(HostError::OutOfRange(format!("no mapped range covers [{addr:#x}, +{len})")));
            }
            entry.start()
        };
        {
            let entry = self
                .state
                .pma
                .find_mut(addr, len)
                .ok_or_else(|| HostError::OutOfRange(format!("no mapped range covers [{addr:#x}, +{len})")))?;
            let data = entry
                .data_mut()
                .ok_or_else(|| HostError::InvalidArgument(format!("[{addr:#x}, +{len}) is a device range, not memory")))?;
            let offset = (addr - start) as usize;
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        let mut page = addr & !(PAGE_SIZE - 1);
        while page < addr + len {
            self.state.mark_dirty(page);
            page += PAGE_SIZE;
        }
        Ok(())
    }

    /// Rehashes every page dirtied since the last call into the Merkle tree.
    pub fn update_merkle_tree(&mut self) {
        let dirty = self.state.take_dirty_pages();
        self.tree.update(&dirty, &self.state);
    }

    /// The current Merkle root.
    pub fn get_root_hash(&self) -> Hash {
        self.tree.root()
    }

    /// An inclusion proof for the node at `(addr, log2_size)` against the
    /// current root.
    pub fn get_proof(&self, addr: u64, log2_size: u32) -> Proof {
        self.tree.proof(addr, log2_size, &self.state)
    }

    /// Rebuilds a fresh tree from scratch and checks it matches the one this
    /// machine has been incrementally maintaining, catching any bug in the
    /// incremental path that a round of `update`/`propagate` calls could
    /// otherwise hide.
    pub fn verify_merkle_tree(&self) -> bool {
        let mut fresh = MerkleTree::new();
        fresh.update(&all_pages(&self.state.pma), &self.state);
        fresh.root() == self.tree.root()
    }

    /// Whether every page touched since the last [`Self::update_merkle_tree`]
    /// has in fact been rehashed — i.e. no page remains dirty.
    pub fn verify_dirty_page_maps(&self) -> bool {
        !self.state.has_dirty_pages()
    }

    /// Saves the current `(state, tree)` pair so a later [`Self::rollback`]
    /// can restore it. Overwrites any previously held snapshot.
    pub fn snapshot(&mut self) {
        self.snapshot = Some(Box::new((self.state.clone(), self.tree.clone())));
    }

    /// Restores the `(state, tree)` pair saved by the most recent
    /// [`Self::snapshot`], without consuming it — calling `rollback` again
    /// returns to the same point. Errors if no snapshot has been taken.
    pub fn rollback(&mut self) -> Result<(), HostError> {
        let (state, tree) = self
            .snapshot
            .as_ref()
            .ok_or_else(|| HostError::RuntimeError("rollback called with no prior snapshot".to_string()))?
            .as_ref();
        self.state = state.clone();
        self.tree = tree.clone();
        self.tlb.flush_all();
        Ok(())
    }

    /// Replaces the image backing flash drive `index` with the contents of
    /// `image_filename`, which must be exactly the drive's configured
    /// length (no zero-padding, unlike initial configuration loading: a
    /// swap is expected to supply the whole drive).
    pub fn replace_flash_drive(&mut self, index: usize, image_filename: &Path) -> Result<(), HostError> {
        let drive = self
            .config
            .flash_drives
            .get(index)
            .ok_or_else(|| HostError::OutOfRange(format!("no flash drive at index {index}")))?
            .clone();
        let data = std::fs::read(image_filename).map_err(|err| HostError::io(image_filename, err))?;
        if data.len() as u64 != drive.length {
            return Err(HostError::LengthError(format!(
                "replacement image is {} bytes, drive {index} is configured for {} bytes",
                data.len(),
                drive.length
            )));
        }
        self.write_memory(drive.start, &data)?;
        self.config.flash_drives[index].image_filename = Some(image_filename.to_path_buf());
        Ok(())
    }

    /// Persists this machine's configuration, current Merkle root and every
    /// memory PMA's raw bytes to `dir`, creating it if necessary.
    pub fn store(&self, dir: &Path) -> Result<(), HostError> {
        std::fs::create_dir_all(dir).map_err(|err| HostError::io(dir, err))?;

        let mut memory_dumps = Vec::new();
        for entry in self.state.pma.entries() {
            let Some(data) = entry.data() else { continue };
            let filename = persist::dump_filename(entry.start());
            let path = dir.join(&filename);
            std::fs::write(&path, data).map_err(|err| HostError::io(&path, err))?;
            memory_dumps.push(persist::MemoryDump { start: entry.start(), file: filename });
        }

        let manifest = persist::Manifest {
            config: self.config.clone(),
            root_hash: persist::hex_encode(&self.tree.root()),
            memory_dumps,
        };
        let manifest_path = dir.join(persist::MANIFEST_FILE);
        let file = std::fs::File::create(&manifest_path).map_err(|err| HostError::io(&manifest_path, err))?;
        serde_json::to_writer_pretty(file, &manifest).map_err(|err| HostError::RuntimeError(err.to_string()))?;
        debug!("stored machine to {}", dir.display());
        Ok(())
    }
}

/// Sets `mip.MTIP` from the CLINT's comparison against `mcycle` (which
/// doubles as `mtime`). This bit is not reachable through
/// `StateAccess::write_csr` — its WARL mask deliberately excludes
/// `MIP_MTIP`/`MIP_MEIP`, since only the timer/interrupt-controller model,
/// not CSR writes, may set them — so the run/step loop syncs it directly.
fn sync_timer_interrupt(state: &mut MachineState) {
    use rvm_core::csr::MIP_MTIP;
    let pending = state.devices.clint.is_pending(state.csrs.mcycle);
    if pending {
        state.csrs.mip |= MIP_MTIP;
    } else {
        state.csrs.mip &= !MIP_MTIP;
    }
}

/// Checks that no two of `ranges` overlap, returning a [`HostError`] instead
/// of letting [`PmaTable::push`] panic on a caller's bad configuration.
fn check_no_overlap(ranges: &[(u64, u64, &str)]) -> Result<(), HostError> {
    for (i, &(a_start, a_len, a_name)) in ranges.iter().enumerate() {
        for &(b_start, b_len, b_name) in &ranges[i + 1..] {
            let (a_end, b_end) = (a_start + a_len, b_start + b_len);
            if a_start < b_end && b_start < a_end {
                return Err(HostError::DomainError(format!(
                    "{a_name} [{a_start:#x}, {a_end:#x}) overlaps {b_name} [{b_start:#x}, {b_end:#x})"
                )));
            }
        }
    }
    Ok(())
}

/// Reads `path` into a zero-padded buffer of exactly `length` bytes. `None`
/// yields all zeros. Errors if the file is larger than `length`.
fn load_image(path: &Option<PathBuf>, length: u64) -> Result<Vec<u8>, HostError> {
    let mut buffer = vec![0u8; length as usize];
    if let Some(path) = path {
        let data = std::fs::read(path).map_err(|err| HostError::io(path, err))?;
        if data.len() as u64 > length {
            return Err(HostError::LengthError(format!(
                "image {} is {} bytes, larger than its configured region of {} bytes",
                path.display(),
                data.len(),
                length
            )));
        }
        buffer[..data.len()].copy_from_slice(&data);
    }
    Ok(buffer)
}

/// Builds the ROM image: `bootargs` as a NUL-terminated string in the first
/// [`BOOTARGS_RESERVED`] bytes, `image_filename`'s content immediately after.
fn build_rom_bytes(rom: &crate::config::RomConfig) -> Result<Vec<u8>, HostError> {
    let mut buffer = vec![0u8; rom.length as usize];
    if let Some(bootargs) = &rom.bootargs {
        let bytes = bootargs.as_bytes();
        if bytes.len() as u64 + 1 > BOOTARGS_RESERVED {
            return Err(HostError::LengthError(format!(
                "bootargs is {} bytes, longer than the {BOOTARGS_RESERVED}-byte reserved region",
                bytes.len()
            )));
        }
        if BOOTARGS_RESERVED > rom.length {
            return Err(HostError::LengthError(format!(
                "rom is {} bytes, too small for the {BOOTARGS_RESERVED}-byte bootargs region",
                rom.length
            )));
        }
        buffer[..bytes.len()].copy_from_slice(bytes);
    }
    if let Some(path) = &rom.image_filename {
        let data = std::fs::read(path).map_err(|err| HostError::io(path, err))?;
        let remaining = rom.length.saturating_sub(BOOTARGS_RESERVED);
        if data.len() as u64 > remaining {
            return Err(HostError::LengthError(format!(
                "rom image {} is {} bytes, larger than the {remaining} bytes left after bootargs",
                path.display(),
                data.len()
            )));
        }
        let start = BOOTARGS_RESERVED as usize;
        buffer[start..start + data.len()].copy_from_slice(&data);
    }
    Ok(buffer)
}

/// Builds the PMA table for `config`. `overrides`, keyed by range start
/// address, substitutes exact persisted bytes in place of re-reading
/// `image_filename` from disk — used by [`Machine::load_with_backends`].
fn build_pma(config: &MachineConfig, overrides: Option<&HashMap<u64, Vec<u8>>>) -> Result<PmaTable, HostError> {
    if config.ram.length == 0 {
        return Err(HostError::InvalidArgument("ram.length must be nonzero".to_string()));
    }

    let mut ranges = vec![(crate::config::RAM_START, config.ram.length, "ram")];
    if config.rom.length > 0 {
        ranges.push((ROM_START, config.rom.length, "rom"));
    }
    for (i, drive) in config.flash_drives.iter().enumerate() {
        if drive.length == 0 {
            return Err(HostError::InvalidArgument(format!("flash drive {i} has zero length")));
        }
        ranges.push((drive.start, drive.length, "flash drive"));
    }
    ranges.push((CLINT_START, CLINT_LENGTH, "clint"));
    ranges.push((HTIF_START, HTIF_LENGTH, "htif"));
    ranges.push((DHD_START, DHD_LENGTH, "dhd"));
    check_no_overlap(&ranges)?;

    let mut pma = PmaTable::new();

    let ram_bytes = if let Some(bytes) = overrides.and_then(|o| o.get(&crate::config::RAM_START)) {
        bytes.clone()
    } else {
        load_image(&config.ram.image_filename, config.ram.length)?
    };
    pma.push(PmaEntry::memory(crate::config::RAM_START, PmaFlags::ram(), ram_bytes));

    if config.rom.length > 0 {
        let rom_bytes = if let Some(bytes) = overrides.and_then(|o| o.get(&ROM_START)) {
            bytes.clone()
        } else {
            build_rom_bytes(&config.rom)?
        };
        pma.push(PmaEntry::memory(ROM_START, PmaFlags::rom(), rom_bytes));
    }

    for drive in &config.flash_drives {
        let bytes = if let Some(bytes) = overrides.and_then(|o| o.get(&drive.start)) {
            bytes.clone()
        } else {
            load_image(&drive.image_filename, drive.length)?
        };
        let flags = if drive.shared { PmaFlags::ram() } else { PmaFlags::rom() };
        pma.push(PmaEntry::memory(drive.start, flags, bytes));
    }

    pma.push(PmaEntry::device(CLINT_START, CLINT_LENGTH, PmaFlags::device(), DeviceId::Clint));
    pma.push(PmaEntry::device(HTIF_START, HTIF_LENGTH, PmaFlags::device(), DeviceId::Htif));
    pma.push(PmaEntry::device(DHD_START, DHD_LENGTH, PmaFlags::device(), DeviceId::Dhd));

    Ok(pma)
}

/// Builds a complete [`MachineState`] from `config`: the PMA table, then
/// processor registers/CSRs/`pc`/privilege, then device register state.
fn build_state(config: &MachineConfig, overrides: Option<&HashMap<u64, Vec<u8>>>) -> Result<MachineState, HostError> {
    let pma = build_pma(config, overrides)?;
    let mut state = MachineState::new(pma);

    let (regs, csrs, iflags, pc) = config.processor.build();
    state.regs = regs;
    state.csrs = csrs;
    state.iflags = iflags;
    state.pc = pc;

    state.devices.clint.mtimecmp = config.clint.mtimecmp;
    config.htif.apply(&mut state.devices.htif);
    state.devices.dhd.tstart = config.dhd.tstart;
    state.devices.dhd.tlength = config.dhd.tlength;
    state.devices.dhd.dlength = config.dhd.dlength;
    state.devices.dhd.hlength = config.dhd.hlength;

    Ok(state)
}

/// Every `PAGE_SIZE`-aligned page address covered by any entry in `pma`, for
/// seeding a fresh [`MerkleTree`] or rebuilding one from scratch to verify
/// against.
fn all_pages(pma: &PmaTable) -> HashSet<u64> {
    let mut pages = HashSet::new();
    for entry in pma.entries() {
        let mut addr = entry.start() & !(PAGE_SIZE - 1);
        let end = entry.start() + entry.length();
        while addr < end {
            pages.insert(addr);
            addr += PAGE_SIZE;
        }
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HtifConfig, RamConfig};

    fn tiny_config() -> MachineConfig {
        MachineConfig {
            ram: RamConfig { length: PAGE_SIZE, image_filename: None },
            htif: HtifConfig { yield_progress: true, ..HtifConfig::default() },
            ..MachineConfig::default()
        }
    }

    #[test]
    fn fresh_machine_verifies_its_own_tree() {
        let machine = Machine::new(tiny_config()).unwrap();
        assert!(machine.verify_merkle_tree());
        assert!(machine.verify_dirty_page_maps());
    }

    #[test]
    fn register_round_trips() {
        let mut machine = Machine::new(tiny_config()).unwrap();
        machine.write_x(5, 0xABCD);
        assert_eq!(machine.read_x(5), 0xABCD);
        machine.write_x(0, 1);
        assert_eq!(machine.read_x(0), 0);
    }

    #[test]
    fn memory_write_marks_dirty_until_updated() {
        let mut machine = Machine::new(tiny_config()).unwrap();
        machine.write_memory(crate::config::RAM_START, &[1, 2, 3, 4]).unwrap();
        assert!(!machine.verify_dirty_page_maps());
        machine.update_merkle_tree();
        assert!(machine.verify_dirty_page_maps());
        assert!(machine.verify_merkle_tree());
    }

    #[test]
    fn read_memory_rejects_device_range() {
        let machine = Machine::new(tiny_config()).unwrap();
        assert!(machine.read_memory(CLINT_START, 8).is_err());
    }

    #[test]
    fn snapshot_and_rollback_restores_root() {
        let mut machine = Machine::new(tiny_config()).unwrap();
        machine.snapshot();
        machine.write_memory(crate::config::RAM_START, &[0xFF; 8]).unwrap();
        machine.update_merkle_tree();
        let dirtied_root = machine.get_root_hash();
        machine.rollback().unwrap();
        assert_ne!(machine.get_root_hash(), dirtied_root);
        assert!(machine.verify_merkle_tree());
    }

    #[test]
    fn store_then_load_round_trips_by_root_hash() {
        let dir = std::env::temp_dir().join(format!("rvm-machine-test-{:p}", &0u8));
        let mut machine = Machine::new(tiny_config()).unwrap();
        machine.write_memory(crate::config::RAM_START, &[7; 8]).unwrap();
        machine.update_merkle_tree();
        let root = machine.get_root_hash();

        machine.store(&dir).unwrap();
        let loaded = Machine::load(&dir).unwrap();
        assert_eq!(loaded.get_root_hash(), root);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn overlapping_flash_drive_is_rejected_before_the_pma_table_would_panic() {
        let mut config = tiny_config();
        config.flash_drives.push(crate::config::FlashDriveConfig {
            start: crate::config::RAM_START,
            length: 0x1000,
            shared: false,
            image_filename: None,
        });
        assert!(matches!(Machine::new(config), Err(HostError::DomainError(_))));
    }

    #[test]
    fn run_reaches_target_cycle_on_a_nop_loop() {
        let mut machine = Machine::new(tiny_config()).unwrap();
        let nop: u32 = 0b0010011; // addi x0, x0, 0
        let mut program = Vec::new();
        for _ in 0..8 {
            program.extend_from_slice(&nop.to_le_bytes());
        }
        machine.write_memory(crate::config::RAM_START, &program).unwrap();

        let result = machine.run(4).unwrap();
        assert_eq!(result, RunBreak::ReachedTarget);
        assert_eq!(machine.read_x(0), 0);
    }

    #[test]
    fn run_halts_on_an_htif_halt_request() {
        let mut machine = Machine::new(tiny_config()).unwrap();

        // lui x1, HTIF_START >> 12 (HTIF_START's low 12 bits are zero).
        let lui = ((HTIF_START >> 12) as u32) << 12 | (1 << 7) | 0b0110111;
        // addi x2, x0, 1
        let addi = (1u32 << 20) | (2 << 7) | 0b0010011;
        // sd x2, 0(x1): device 0, cmd 0, payload 1 -> halt request.
        let sd = (2u32 << 20) | (1 << 15) | (0b011 << 12) | 0b0100011;

        let mut program = Vec::new();
        for inst in [lui, addi, sd] {
            program.extend_from_slice(&inst.to_le_bytes());
        }
        machine.write_memory(crate::config::RAM_START, &program).unwrap();

        let result = machine.run(1000).unwrap();
        assert_eq!(result, RunBreak::Halted);
        assert_eq!(machine.read_x(1), HTIF_START);
        assert_eq!(machine.read_x(2), 1);
    }
}
