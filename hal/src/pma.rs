//! The Physical Memory Attribute table.
//!
//! Mirrors the reference emulator's `pma_entry`/`find_pma_entry`: a short,
//! sorted list of disjoint ranges, each either host memory (RAM/ROM/flash) or
//! a register-mapped device, terminated by a zero-length sentinel. Lookup is
//! a linear scan — in practice there are a handful of entries, so this beats
//! any fancier structure and keeps the overflow-safe range test in one place.

use bitflags::bitflags;

bitflags! {
    /// Per-range access permissions, mirroring `pma_entry::flags` in the
    /// reference implementation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PmaFlags: u8 {
        /// Readable by CPU loads.
        const R = 0b0000_0001;
        /// Writable by CPU stores.
        const W = 0b0000_0010;
        /// Executable (instruction fetch allowed).
        const X = 0b0000_0100;
        /// Idempotent reads: a read has no side effect and may be cached
        /// or speculated freely (true for RAM/ROM, false for devices).
        const IR = 0b0000_1000;
        /// Idempotent writes (true for RAM, false for devices).
        const IW = 0b0001_0000;
    }
}

impl PmaFlags {
    /// Flags for a writable RAM range: R | W | X | IR | IW.
    pub const fn ram() -> Self {
        Self::R.union(Self::W).union(Self::X).union(Self::IR).union(Self::IW)
    }

    /// Flags for a read-only ROM/flash range: R | X | IR.
    pub const fn rom() -> Self {
        Self::R.union(Self::X).union(Self::IR)
    }

    /// Flags for a register-mapped device: R | W, neither idempotent.
    pub const fn device() -> Self {
        Self::R.union(Self::W)
    }
}

/// Identifies which device backs a non-memory PMA range. The range's byte
/// content is never stored directly; reads/writes are dispatched by whatever
/// layer owns the device state (see the `devices` crate), keyed by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceId {
    /// Core-local interrupt timer (`mtimecmp`/`mtime`).
    Clint,
    /// Host-target interface (console, halt, yield).
    Htif,
    /// Dehash device (hash-preimage oracle register bank).
    Dhd,
    /// The shadow-state range: GPRs, `pc`, CSRs and `iflags`/`ilrsc`
    /// rendered as memory so the Merkle tree can hash them like any other
    /// byte range.
    Shadow,
}

/// What a PMA range is backed by.
#[derive(Debug, Clone)]
pub enum PmaKind {
    /// Host-backed bytes: RAM (mutable) or ROM/flash (immutable once loaded).
    Memory {
        /// Raw bytes backing the range, `length` bytes long.
        data: Vec<u8>,
    },
    /// A register-mapped device; no bytes are stored here.
    Device(DeviceId),
    /// The zero-length terminator entry, matching `find_pma_entry`'s
    /// fallback when no range matches.
    Sentinel,
}

/// One entry in the PMA table: a `[start, start+length)` range with
/// permissions and a backing.
#[derive(Debug, Clone)]
pub struct PmaEntry {
    start: u64,
    length: u64,
    flags: PmaFlags,
    kind: PmaKind,
}

impl PmaEntry {
    /// Builds a RAM/ROM entry backed by `data`, whose length defines the
    /// range's length. `data.len()` must be nonzero and need not be a power
    /// of two, but callers conventionally align to [`crate::PAGE_SIZE`].
    pub fn memory(start: u64, flags: PmaFlags, data: Vec<u8>) -> Self {
        let length = data.len() as u64;
        assert!(length > 0, "memory PMA entry must have nonzero length");
        Self { start, length, flags, kind: PmaKind::Memory { data } }
    }

    /// Builds a device entry spanning `[start, start+length)`.
    pub fn device(start: u64, length: u64, flags: PmaFlags, id: DeviceId) -> Self {
        assert!(length > 0, "device PMA entry must have nonzero length");
        Self { start, length, flags, kind: PmaKind::Device(id) }
    }

    /// Start physical address of this range.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// Length in bytes of this range.
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Access permissions for this range.
    pub const fn flags(&self) -> PmaFlags {
        self.flags
    }

    /// The range's backing.
    pub const fn kind(&self) -> &PmaKind {
        &self.kind
    }

    /// True for the zero-length sentinel returned when no range matches.
    pub const fn is_sentinel(&self) -> bool {
        matches!(self.kind, PmaKind::Sentinel)
    }

    /// Host bytes backing this range, if it is memory.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.kind {
            PmaKind::Memory { data } => Some(data),
            _ => None,
        }
    }

    /// Mutable host bytes backing this range, if it is memory.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.kind {
            PmaKind::Memory { data } => Some(data),
            _ => None,
        }
    }

    /// Whether `[paddr, paddr+size)` lies entirely within this range, using
    /// the same overflow-safe comparison as the reference implementation's
    /// `find_pma_entry`: `paddr >= start && paddr - start <= length - size`.
    pub const fn contains(&self, paddr: u64, size: u64) -> bool {
        if self.length < size {
            return false;
        }
        paddr >= self.start && paddr - self.start <= self.length - size
    }
}

/// The machine's physical address map: a sorted, disjoint list of ranges.
#[derive(Debug, Clone, Default)]
pub struct PmaTable {
    entries: Vec<PmaEntry>,
}

impl PmaTable {
    /// An empty table (every address is unmapped).
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers a range. Panics (at construction time, not at runtime) if it
    /// overlaps an already-registered range — this is a configuration error,
    /// not a recoverable machine fault.
    pub fn push(&mut self, entry: PmaEntry) {
        for existing in &self.entries {
            let (a_start, a_end) = (entry.start, entry.start + entry.length);
            let (b_start, b_end) = (existing.start, existing.start + existing.length);
            assert!(
                a_end <= b_start || b_end <= a_start,
                "PMA range [{a_start:#x}, {a_end:#x}) overlaps existing range [{b_start:#x}, {b_end:#x})"
            );
        }
        self.entries.push(entry);
        self.entries.sort_by_key(PmaEntry::start);
    }

    /// Finds the entry containing `[paddr, paddr+size)`, or the sentinel if
    /// none matches (mirrors `find_pma_entry` always returning a valid,
    /// possibly-sentinel, reference).
    pub fn find(&self, paddr: u64, size: u64) -> &PmaEntry {
        self.entries
            .iter()
            .find(|e| e.contains(paddr, size))
            .unwrap_or(&SENTINEL)
    }

    /// Mutable version of [`Self::find`]; returns `None` for unmapped
    /// addresses since the sentinel cannot be handed out as `&mut`.
    pub fn find_mut(&mut self, paddr: u64, size: u64) -> Option<&mut PmaEntry> {
        self.entries.iter_mut().find(|e| e.contains(paddr, size))
    }

    /// All registered entries, in ascending address order.
    pub fn entries(&self) -> &[PmaEntry] {
        &self.entries
    }
}

// A single process-wide sentinel so `find` can hand back a reference
// without allocating one per lookup. Immutable, carries no device identity.
static SENTINEL: PmaEntry = PmaEntry {
    start: 0,
    length: 0,
    flags: PmaFlags::empty(),
    kind: PmaKind::Sentinel,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_exact_range() {
        let mut table = PmaTable::new();
        table.push(PmaEntry::memory(0x8000_0000, PmaFlags::ram(), vec![0u8; 4096]));
        let e = table.find(0x8000_0010, 8);
        assert!(!e.is_sentinel());
        assert_eq!(e.start(), 0x8000_0000);
    }

    #[test]
    fn misses_return_sentinel() {
        let table = PmaTable::new();
        assert!(table.find(0x1234, 8).is_sentinel());
    }

    #[test]
    fn rejects_straddling_access() {
        let mut table = PmaTable::new();
        table.push(PmaEntry::memory(0x1000, PmaFlags::ram(), vec![0u8; 16]));
        // Last valid 8-byte word starts at offset 8; offset 12 would run off
        // the end of the 16-byte range.
        assert!(table.find(0x1000 + 12, 8).is_sentinel());
        assert!(!table.find(0x1000 + 8, 8).is_sentinel());
    }

    #[test]
    fn device_range_has_no_bytes() {
        let mut table = PmaTable::new();
        table.push(PmaEntry::device(0x4000_0000, 0x1000, PmaFlags::device(), DeviceId::Htif));
        let e = table.find(0x4000_0008, 8);
        assert!(matches!(e.kind(), PmaKind::Device(DeviceId::Htif)));
        assert!(e.data().is_none());
    }

    #[test]
    #[should_panic(expected = "overlaps")]
    fn overlapping_ranges_panic() {
        let mut table = PmaTable::new();
        table.push(PmaEntry::memory(0x1000, PmaFlags::ram(), vec![0u8; 0x1000]));
        table.push(PmaEntry::memory(0x1800, PmaFlags::ram(), vec![0u8; 0x1000]));
    }
}
