//! Machine configuration: the serializable record a [`crate::Machine`] is
//! built from, mirroring the reference emulator's `machine_config` plus the
//! runtime-only knobs that never affect the hashed state (`runtime_config`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use rvm_core::csr::Csrs;
use rvm_core::{Iflags, RegisterFile, PRV_M};

/// Physical address ROM is mapped at. Chosen just above the shadow-state
/// page so a zero-length ROM configuration never collides with it.
pub const ROM_START: u64 = 0x1000;
/// Physical address RAM is mapped at, matching the base address this core's
/// tests and fixtures already assume throughout.
pub const RAM_START: u64 = 0x8000_0000;
/// Physical address the CLINT is mapped at.
pub const CLINT_START: u64 = 0x0200_0000;
/// Physical address the HTIF is mapped at.
pub const HTIF_START: u64 = 0x0300_0000;
/// Physical address the DHD is mapped at.
pub const DHD_START: u64 = 0x0400_0000;

/// Initial general-register and CSR values, plus the starting privilege and
/// program counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Initial `x[0..32]`. `x[0]` is ignored: it always reads as zero.
    pub x: [u64; 32],
    /// Initial program counter.
    pub pc: u64,
    /// Initial privilege mode (one of [`rvm_core::PRV_U`]/[`rvm_core::PRV_S`]/[`rvm_core::PRV_M`]).
    pub prv: u8,
    pub mvendorid: u64,
    pub marchid: u64,
    pub mimpid: u64,
    pub mcycle: u64,
    pub minstret: u64,
    pub mstatus: u64,
    pub mtvec: u64,
    pub mscratch: u64,
    pub mepc: u64,
    pub mcause: u64,
    pub mtval: u64,
    pub misa: u64,
    pub mie: u64,
    pub mip: u64,
    pub medeleg: u64,
    pub mideleg: u64,
    pub mcounteren: u64,
    pub stvec: u64,
    pub sscratch: u64,
    pub sepc: u64,
    pub scause: u64,
    pub stval: u64,
    pub satp: u64,
    pub scounteren: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        let csrs = Csrs::default();
        Self {
            x: [0; 32],
            pc: RAM_START,
            prv: PRV_M,
            mvendorid: csrs.mvendorid,
            marchid: csrs.marchid,
            mimpid: csrs.mimpid,
            mcycle: csrs.mcycle,
            minstret: csrs.minstret,
            mstatus: csrs.mstatus,
            mtvec: csrs.mtvec,
            mscratch: csrs.mscratch,
            mepc: csrs.mepc,
            mcause: csrs.mcause,
            mtval: csrs.mtval,
            misa: csrs.misa,
            mie: csrs.mie,
            mip: csrs.mip,
            medeleg: csrs.medeleg,
            mideleg: csrs.mideleg,
            mcounteren: csrs.mcounteren,
            stvec: csrs.stvec,
            sscratch: csrs.sscratch,
            sepc: csrs.sepc,
            scause: csrs.scause,
            stval: csrs.stval,
            satp: csrs.satp,
            scounteren: csrs.scounteren,
        }
    }
}

impl ProcessorConfig {
    /// Builds the [`RegisterFile`]/[`Csrs`]/[`Iflags`] triple this config
    /// describes, for seeding a fresh [`rvm_core::MachineState`].
    pub fn build(&self) -> (RegisterFile, Csrs, Iflags, u64) {
        let mut regs = RegisterFile::new();
        for (i, value) in self.x.iter().enumerate() {
            regs.write(i as u8, *value);
        }
        let csrs = Csrs {
            mvendorid: self.mvendorid,
            marchid: self.marchid,
            mimpid: self.mimpid,
            mcycle: self.mcycle,
            minstret: self.minstret,
            mstatus: self.mstatus,
            mtvec: self.mtvec,
            mscratch: self.mscratch,
            mepc: self.mepc,
            mcause: self.mcause,
            mtval: self.mtval,
            misa: self.misa,
            mie: self.mie,
            mip: self.mip,
            medeleg: self.medeleg,
            mideleg: self.mideleg,
            mcounteren: self.mcounteren,
            stvec: self.stvec,
            sscratch: self.sscratch,
            sepc: self.sepc,
            scause: self.scause,
            stval: self.stval,
            satp: self.satp,
            scounteren: self.scounteren,
        };
        let iflags = Iflags { prv: self.prv, y: false, h: false };
        (regs, csrs, iflags, self.pc)
    }
}

/// RAM: a single contiguous, writable region starting at [`RAM_START`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamConfig {
    /// Length in bytes. Must be nonzero for [`crate::Machine::new`] to succeed.
    pub length: u64,
    /// Path to a raw binary image loaded at the start of RAM, zero-padded
    /// (or truncated, with a warning) to `length`. `None` means all zeros.
    pub image_filename: Option<PathBuf>,
}

/// ROM: a single contiguous, read-only region starting at [`ROM_START`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RomConfig {
    /// Length in bytes.
    pub length: u64,
    /// Path to a raw binary image, analogous to [`RamConfig::image_filename`].
    pub image_filename: Option<PathBuf>,
    /// Boot argument string, written as a NUL-terminated ASCII blob at the
    /// very start of the ROM image (ahead of whatever `image_filename`
    /// supplies), mirroring the reference emulator's practice of passing
    /// the kernel command line through the boot ROM rather than a register.
    pub bootargs: Option<String>,
}

/// One flash drive: an additional memory-backed region outside RAM/ROM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashDriveConfig {
    /// Physical start address. Caller-chosen; must not overlap any other
    /// configured range.
    pub start: u64,
    /// Length in bytes.
    pub length: u64,
    /// Writable (`true`) or read-only (`false`).
    pub shared: bool,
    /// Path to a raw binary image, analogous to [`RamConfig::image_filename`].
    pub image_filename: Option<PathBuf>,
}

/// CLINT initial register state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClintConfig {
    /// Initial `mtimecmp`.
    pub mtimecmp: u64,
}

impl Default for ClintConfig {
    fn default() -> Self {
        Self { mtimecmp: u64::MAX }
    }
}

/// HTIF initial register state and capability bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtifConfig {
    /// Initial `tohost`.
    pub tohost: u64,
    /// Initial `fromhost`.
    pub fromhost: u64,
    /// Whether `htif_getchar` is honoured; off by default so a headless
    /// verification run never blocks waiting on console input.
    pub console_getchar: bool,
    /// Whether yield-progress requests are honoured.
    pub yield_progress: bool,
    /// Whether yield-rollup requests are honoured.
    pub yield_rollup: bool,
}

impl Default for HtifConfig {
    fn default() -> Self {
        Self { tohost: 0, fromhost: 0, console_getchar: false, yield_progress: false, yield_rollup: false }
    }
}

impl HtifConfig {
    const fn yield_enabled(&self) -> bool {
        self.yield_progress || self.yield_rollup
    }
}

/// DHD initial register state. Resolution of a hash to its preimage is the
/// Non-goal this device leaves to the caller; this only seeds the registers
/// guest code reads back after a request, per [`rvm_devices::DhdState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhdConfig {
    pub tstart: u64,
    pub tlength: u64,
    pub dlength: u64,
    pub hlength: u64,
}

/// Knobs that affect how the machine runs but never the hashed architectural
/// state itself — changing these must never change `get_root_hash()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Physical address of a pending dehash request's source buffer, for a
    /// caller-supplied resolver to consult; this core carries no built-in
    /// preimage source (see [`DhdConfig`]'s doc comment).
    pub dhd_source_address: Option<u64>,
    /// A hint for how much work [`rvm_merkle::MerkleTree::update`] may
    /// parallelize across dirty pages. Currently advisory only: the tree's
    /// rehash is a single-threaded `HashMap` walk (see `DESIGN.md`), so this
    /// is accepted and stored but does not yet change how rehashing runs.
    pub merkle_update_parallelism: Option<usize>,
}

/// The complete, serializable description of a machine, independent of any
/// running [`crate::Machine`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    pub processor: ProcessorConfig,
    pub ram: RamConfig,
    pub rom: RomConfig,
    #[serde(default)]
    pub flash_drives: Vec<FlashDriveConfig>,
    pub clint: ClintConfig,
    pub htif: HtifConfig,
    pub dhd: DhdConfig,
    pub runtime: RuntimeConfig,
}

impl HtifConfig {
    pub(crate) fn apply(&self, htif: &mut rvm_devices::HtifState) {
        htif.tohost = self.tohost;
        htif.fromhost = self.fromhost;
        htif.yield_enabled = self.yield_enabled();
    }
}
