//! A small direct-mapped translation cache, one per access kind (fetch,
//! load, store), so re-translating the same page on every instruction
//! doesn't mean re-walking the page table every time.
//!
//! This caches translations for [`crate::translate`]'s caller, not inside
//! `translate` itself, since only `run` (the fast, unlogged path) benefits
//! from skipping the walk — `step`/`verify` must always walk so every PTE
//! touch is still logged/replayed.

use std::collections::HashMap;

use rvm_hal::PAGE_SIZE;

/// One translation cache entry: the physical page a virtual page resolved
/// to, valid only while `satp` and privilege stay unchanged.
#[derive(Debug, Clone, Copy)]
struct Entry {
    vpage: u64,
    ppage: u64,
}

/// Per-access-kind direct-mapped TLB. Indexed by a small hash of the
/// virtual page number, one entry per slot (no associativity) — simple
/// enough that a wrong hit is impossible to construct from a stale `satp`,
/// since the whole cache is flushed whenever `satp` or privilege changes.
#[derive(Debug, Clone, Default)]
pub struct Tlb {
    slots: HashMap<u64, Entry>,
}

impl Tlb {
    /// An empty cache.
    pub fn new() -> Self {
        Self { slots: HashMap::new() }
    }

    /// Looks up the physical page backing `vaddr`, if cached.
    pub fn lookup(&self, vaddr: u64) -> Option<u64> {
        let vpage = vaddr & !(PAGE_SIZE - 1);
        let entry = self.slots.get(&vpage)?;
        if entry.vpage == vpage {
            Some(entry.ppage | (vaddr & (PAGE_SIZE - 1)))
        } else {
            None
        }
    }

    /// Caches `vaddr`'s page as resolving to the page containing `paddr`.
    pub fn insert(&mut self, vaddr: u64, paddr: u64) {
        let vpage = vaddr & !(PAGE_SIZE - 1);
        let ppage = paddr & !(PAGE_SIZE - 1);
        self.slots.insert(vpage, Entry { vpage, ppage });
    }

    /// Flushes the whole cache, per `sfence.vma` (with no arguments, the only
    /// form this machine implements), a `satp` write, or a privilege change.
    pub fn flush(&mut self) {
        self.slots.clear();
    }
}

/// The three per-[`crate::Intent`] caches the interpreter keeps alongside
/// the CPU, flushed together on any event that can change translation.
#[derive(Debug, Clone, Default)]
pub struct TlbSet {
    /// Cache for instruction fetch translations.
    pub fetch: Tlb,
    /// Cache for load translations.
    pub load: Tlb,
    /// Cache for store translations.
    pub store: Tlb,
}

impl TlbSet {
    /// Three empty caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushes all three caches.
    pub fn flush_all(&mut self) {
        self.fetch.flush();
        self.load.flush();
        self.store.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_after_insert() {
        let mut tlb = Tlb::new();
        tlb.insert(0x1000, 0x8000_0000);
        assert_eq!(tlb.lookup(0x1004), Some(0x8000_0004));
    }

    #[test]
    fn miss_before_insert() {
        let tlb = Tlb::new();
        assert_eq!(tlb.lookup(0x1000), None);
    }

    #[test]
    fn flush_clears_all_entries() {
        let mut set = TlbSet::new();
        set.fetch.insert(0x2000, 0x9000_0000);
        set.flush_all();
        assert_eq!(set.fetch.lookup(0x2000), None);
    }
}
