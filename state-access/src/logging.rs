//! The `step` path: every access is additionally recorded as a
//! Merkle-proved [`AccessRecord`] against one frozen pre-step root, per the
//! verifier's requirement that a whole step's proofs be checked against a
//! single `pre_root` rather than an evolving one.
//!
//! Proof consistency across repeated touches to the same page within one
//! step (near-guaranteed here, since the entire shadow-state range — every
//! register, `pc`, every CSR — lives on one page) is maintained by
//! snapshotting a page's bytes the first time the step touches it and
//! serving every later proof in the same step from that frozen snapshot,
//! never from the (by-then-mutated) live state.

use std::collections::HashMap;

use rvm_core::{shadow, Iflags, MachineState};
use rvm_hal::PAGE_SIZE;
use rvm_merkle::{MerkleTree, PageSource};

use crate::device::{ConsoleBackend, DehashResolver, NullConsole, NullResolver};
use crate::error::AccessError;
use crate::log::{AccessKind, AccessLog, AccessRecord, Annotation, LogType};
use crate::mem::{read_aligned, write_aligned};
use crate::StateAccess;

/// A [`PageSource`] over a frozen set of per-step page snapshots, so proofs
/// generated partway through a step never see later-in-step mutations.
struct FrozenPages<'a> {
    snapshots: &'a HashMap<u64, Option<Vec<u8>>>,
}

impl PageSource for FrozenPages<'_> {
    fn peek_page(&self, page_addr: u64) -> Option<Vec<u8>> {
        self.snapshots.get(&page_addr).cloned().flatten()
    }
}

/// Logging state access over a borrowed [`MachineState`] and the
/// [`MerkleTree`] as it stood before this step began (never mutated here;
/// the caller rehashes dirty pages into it only after the step completes).
#[derive(Debug)]
pub struct LoggingAccess<'a, C = NullConsole, D = NullResolver>
where
    C: ConsoleBackend,
    D: DehashResolver,
{
    state: &'a mut MachineState,
    tree: &'a MerkleTree,
    console: C,
    resolver: D,
    snapshots: HashMap<u64, Option<Vec<u8>>>,
    log: AccessLog,
    log_type: LogType,
    open_scopes: usize,
}

impl<'a> LoggingAccess<'a, NullConsole, NullResolver> {
    /// Logging access with no console or dehash backend wired up.
    pub fn new(state: &'a mut MachineState, tree: &'a MerkleTree, log_type: LogType) -> Self {
        Self {
            state,
            tree,
            console: NullConsole,
            resolver: NullResolver,
            snapshots: HashMap::new(),
            log: AccessLog::new(),
            log_type,
            open_scopes: 0,
        }
    }
}

impl<'a, C, D> LoggingAccess<'a, C, D>
where
    C: ConsoleBackend,
    D: DehashResolver,
{
    /// Logging access with explicit console/dehash backends.
    pub fn with_backends(
        state: &'a mut MachineState,
        tree: &'a MerkleTree,
        log_type: LogType,
        console: C,
        resolver: D,
    ) -> Self {
        Self {
            state,
            tree,
            console,
            resolver,
            snapshots: HashMap::new(),
            log: AccessLog::new(),
            log_type,
            open_scopes: 0,
        }
    }

    /// Consumes this access, returning the accumulated log. The pre-step
    /// root every proof in it was checked against is `self.tree.root()`
    /// before the step (callers should capture that separately if needed,
    /// since the tree itself is never mutated by this type).
    pub fn into_log(self) -> AccessLog {
        self.log
    }

    fn ensure_cached(&mut self, page_addr: u64) {
        self.snapshots.entry(page_addr).or_insert_with(|| self.state.peek_page(page_addr));
    }

    fn record(&mut self, kind: AccessKind, paddr: u64, log2_size: u32, read_data: Vec<u8>, written_data: Option<Vec<u8>>) {
        let page_addr = paddr & !(PAGE_SIZE - 1);
        self.ensure_cached(page_addr);
        let proof = self.tree.proof(paddr, log2_size, &FrozenPages { snapshots: &self.snapshots });
        self.log.accesses.push(AccessRecord { kind, address: proof.address, log2_size, read_data, written_data, proof });
    }

    fn logged_read(&mut self, paddr: u64, log2_size: u32) -> Result<u64, AccessError> {
        let (value, bytes) = read_aligned(self.state, paddr, log2_size)?;
        self.record(AccessKind::Read, paddr, log2_size, bytes, None);
        Ok(value)
    }

    fn logged_write(&mut self, paddr: u64, log2_size: u32, value: u64) -> Result<(), AccessError> {
        let (_, pre_bytes) = read_aligned(self.state, paddr, log2_size)?;
        // Snapshot the page before mutating it: if this is the page's first
        // touch this step, `record`'s own `ensure_cached` would otherwise
        // cache post-write bytes and the proof would no longer fold against
        // the step's pre-state root.
        self.ensure_cached(paddr & !(PAGE_SIZE - 1));
        let written = write_aligned(self.state, paddr, log2_size, value, &mut self.console, &mut self.resolver)?;
        self.record(AccessKind::Write, paddr, log2_size, pre_bytes, Some(written));
        Ok(())
    }
}

impl<C, D> StateAccess for LoggingAccess<'_, C, D>
where
    C: ConsoleBackend,
    D: DehashResolver,
{
    fn read_x(&mut self, reg: u8) -> u64 {
        self.logged_read(shadow::SHADOW_START + shadow::gpr_offset(reg), 3).unwrap_or(0)
    }

    fn write_x(&mut self, reg: u8, value: u64) {
        let _ = self.logged_write(shadow::SHADOW_START + shadow::gpr_offset(reg), 3, value);
    }

    fn read_pc(&mut self) -> u64 {
        self.logged_read(shadow::SHADOW_START + shadow::pc_offset(), 3).unwrap_or(0)
    }

    fn write_pc(&mut self, value: u64) {
        let _ = self.logged_write(shadow::SHADOW_START + shadow::pc_offset(), 3, value);
    }

    fn read_csr(&mut self, addr: u16) -> Result<u64, AccessError> {
        let offset = shadow::csr_offset(addr).ok_or(AccessError::NoSuchCsr { addr })?;
        self.logged_read(shadow::SHADOW_START + offset, 3)
    }

    fn write_csr(&mut self, addr: u16, value: u64) -> Result<(), AccessError> {
        let offset = shadow::csr_offset(addr).ok_or(AccessError::NoSuchCsr { addr })?;
        self.logged_write(shadow::SHADOW_START + offset, 3, value)
    }

    fn read_iflags(&mut self) -> Iflags {
        let word = self.logged_read(shadow::SHADOW_START + shadow::iflags_offset(), 3).unwrap_or(0);
        Iflags::unpack(word)
    }

    fn write_iflags(&mut self, iflags: Iflags) {
        let _ = self.logged_write(shadow::SHADOW_START + shadow::iflags_offset(), 3, iflags.pack());
    }

    fn read_ilrsc(&mut self) -> u64 {
        self.logged_read(shadow::SHADOW_START + shadow::ilrsc_offset(), 3).unwrap_or(rvm_core::ILRSC_NONE)
    }

    fn write_ilrsc(&mut self, value: u64) {
        let _ = self.logged_write(shadow::SHADOW_START + shadow::ilrsc_offset(), 3, value);
    }

    fn read_memory(&mut self, paddr: u64, log2_size: u32) -> Result<u64, AccessError> {
        self.logged_read(paddr, log2_size)
    }

    fn write_memory(&mut self, paddr: u64, log2_size: u32, value: u64) -> Result<(), AccessError> {
        self.logged_write(paddr, log2_size, value)
    }

    fn push_bracket(&mut self, text: &str) {
        if self.log_type == LogType::AccessesAndAnnotations {
            self.log.annotations.push((self.log.accesses.len(), Annotation::BeginScope(text.to_string())));
            self.open_scopes += 1;
        }
    }

    fn pop_bracket(&mut self) {
        if self.log_type == LogType::AccessesAndAnnotations && self.open_scopes > 0 {
            self.log.annotations.push((self.log.accesses.len(), Annotation::EndScope));
            self.open_scopes -= 1;
        }
    }

    fn note(&mut self, text: &str) {
        if self.log_type == LogType::AccessesAndAnnotations {
            self.log.annotations.push((self.log.accesses.len(), Annotation::Note(text.to_string())));
        }
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
    fn logged_writes_produce_verifying_proofs() {
        let mut state = machine_with_ram();
        let tree = MerkleTree::new();
        let mut access = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        access.write_x(3, 42);
        access.write_pc(0x8000_0000);
        let log = access.into_log();
        assert_eq!(log.accesses.len(), 2);
        for record in &log.accesses {
            assert!(record.proof.verify());
            assert_eq!(record.proof.root_hash, tree.root());
        }
    }

    #[test]
    fn repeated_touch_to_same_page_stays_consistent() {
        let mut state = machine_with_ram();
        let tree = MerkleTree::new();
        let mut access = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        access.write_x(1, 10);
        access.write_x(2, 20);
        let pc = access.read_pc();
        assert_eq!(pc, 0);
        let log = access.into_log();
        assert!(log.accesses.iter().all(|r| r.proof.root_hash == tree.root()));
    }

    #[test]
    fn annotations_only_recorded_when_requested() {
        let mut state = machine_with_ram();
        let tree = MerkleTree::new();
        let mut access = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        access.push_bracket("scope");
        access.note("hi");
        access.pop_bracket();
        assert!(access.into_log().annotations.is_empty());
    }
}
