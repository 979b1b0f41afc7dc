//! Stateless verification of one step's [`AccessLog`], independent of any
//! real machine.
//!
//! Two checks, matching the two things a dishonest prover could lie about:
//!
//! - [`verify_access_log`] — every record's proof is internally consistent
//!   (it verifies, and the whole log anchors to one shared root). This alone
//!   catches a log with a forged read or a proof against the wrong tree.
//! - [`verify_state_transition`] — additionally replays the log through
//!   [`rvm_interp::step_cycle`] and checks that the writes it produced,
//!   folded up through each write's own pre-state proof, land on the
//!   claimed `post_root`. This catches a prover that played back a log
//!   whose proofs check out individually but whose claimed outcome (the
//!   new root) does not match what actually executing the step would
//!   produce.

use std::collections::HashMap;

use thiserror::Error;

use rvm_merkle::hash::{hash_leaf, merge};
use rvm_merkle::Hash;
use rvm_mmu::TlbSet;
use rvm_state_access::{AccessError, AccessKind, AccessLog, ReplayAccess};

/// Why a log or a claimed state transition failed to verify.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Access record `index`'s own proof does not fold up to its claimed root.
    #[error("access record {index} carries a proof that does not verify")]
    ProofInvalid {
        /// Index into [`AccessLog::accesses`].
        index: usize,
    },
    /// Not every record in the log anchors to the same root.
    #[error("access record {index} claims a different root than the rest of the log")]
    InconsistentRoot {
        /// Index into [`AccessLog::accesses`].
        index: usize,
    },
    /// A write record is missing the bytes it claims to have written.
    #[error("write record {index} has no written_data")]
    MissingWrittenData {
        /// Index into [`AccessLog::accesses`].
        index: usize,
    },
    /// Replaying the log against the interpreter diverged from it: a wrong
    /// kind/address/size, a wrong written value, or a proof that failed
    /// against the claimed pre-root.
    #[error("replay diverged from the log: {0}")]
    ReplayFailed(#[from] AccessError),
    /// The interpreter stopped reading or writing state before every record
    /// in the log was consumed, or consumed fewer records than the log holds.
    #[error("the log was not exactly consumed by one interpreter step")]
    IncompleteLog,
    /// The root recomputed from the log's writes does not match the root the
    /// prover claimed the step produced.
    #[error("claimed post-root does not match the root recomputed from the log")]
    RootMismatch {
        /// What the prover claimed.
        expected: Hash,
        /// What replaying the log's writes actually produces.
        actual: Hash,
    },
}

/// Checks every record in `log` independently: its proof folds up to its own
/// claimed root, and every record shares the same root (a step's proofs must
/// all anchor to one frozen pre-step snapshot, never an evolving one).
///
/// This does not know or care what the claimed pre/post roots are — it only
/// rules out a log that is internally inconsistent. Pair with
/// [`verify_state_transition`] to additionally check the claimed state
/// transition itself.
pub fn verify_access_log(log: &AccessLog) -> Result<(), VerifyError> {
    let mut shared_root = None;
    for (index, record) in log.accesses.iter().enumerate() {
        if !record.proof.verify() {
            return Err(VerifyError::ProofInvalid { index });
        }
        match shared_root {
            None => shared_root = Some(record.proof.root_hash),
            Some(root) if root == record.proof.root_hash => {}
            Some(_) => return Err(VerifyError::InconsistentRoot { index }),
        }
    }
    Ok(())
}

/// Replays `log` against the claimed `pre_root` through exactly one
/// [`rvm_interp::step_cycle`], then folds every write it produced into a
/// running root and checks it lands on `post_root`.
///
/// Folding a single write is exactly [`rvm_merkle::Proof::fold_with`]: swap
/// in the new leaf hash and walk the proof's own siblings up to the root.
/// Multiple writes in one step commonly share a page — every shadow-state
/// register, `pc` and every CSR all live on the same page, so a typical
/// instruction's `pc` write and register write are siblings under it — so
/// this folds writes in log order while remembering every node hash it has
/// already recomputed, and prefers that remembered hash over a write's own
/// (pre-step) sibling whenever the sibling's subtree was itself touched by
/// an earlier write in the same step. A write whose siblings were never
/// touched this step falls back to its own proof's sibling, unchanged.
pub fn verify_state_transition(pre_root: Hash, log: &AccessLog, post_root: Hash) -> Result<(), VerifyError> {
    verify_access_log(log)?;
    for (index, record) in log.accesses.iter().enumerate() {
        if record.proof.root_hash != pre_root {
            return Err(VerifyError::InconsistentRoot { index });
        }
    }

    let mut replay = ReplayAccess::new(log, pre_root);
    let mut tlb = TlbSet::new();
    rvm_interp::step_cycle(&mut replay, &mut tlb)?;
    if let Some(err) = replay.failure() {
        return Err(VerifyError::ReplayFailed(err.clone()));
    }
    if !replay.is_complete() {
        return Err(VerifyError::IncompleteLog);
    }

    let mut known: HashMap<(u64, u32), Hash> = HashMap::new();
    let mut root = pre_root;
    for (index, record) in log.accesses.iter().enumerate() {
        if record.kind != AccessKind::Write {
            continue;
        }
        let written = record.written_data.as_ref().ok_or(VerifyError::MissingWrittenData { index })?;

        let mut addr = record.address;
        let mut log2 = record.log2_size;
        let mut hash = hash_node_from_bytes(written, log2);
        known.insert((addr, log2), hash);

        for sibling in &record.proof.siblings {
            let higher = log2 + 1;
            let parent_start = align_down(addr, higher);
            let is_left = addr == parent_start;
            let sibling_start = if is_left { parent_start | bit(log2) } else { parent_start };
            let sibling_hash = known.get(&(sibling_start, log2)).copied().unwrap_or(*sibling);
            hash = if is_left { merge(&hash, &sibling_hash) } else { merge(&sibling_hash, &hash) };
            addr = parent_start;
            log2 = higher;
            known.insert((addr, log2), hash);
        }
        root = hash;
    }

    if root == post_root {
        Ok(())
    } else {
        Err(VerifyError::RootMismatch { expected: post_root, actual: root })
    }
}

/// Hashes `bytes` (exactly `2^log2_size` of them) into the node hash at that
/// level: a single leaf hash at `log2_size == 3`, or a small merge tree over
/// the constituent leaves above that — the same reduction
/// [`rvm_merkle::tree`]'s page hashing uses, generalized to less than a full
/// page.
fn hash_node_from_bytes(bytes: &[u8], log2_size: u32) -> Hash {
    let mut level: Vec<Hash> = bytes.chunks_exact(8).map(hash_leaf).collect();
    while level.len() > 1 {
        level = level.chunks(2).map(|pair| merge(&pair[0], &pair[1])).collect();
    }
    level[0]
}

const fn bit(log2_size: u32) -> u64 {
    if log2_size >= 64 {
        0
    } else {
        1u64 << log2_size
    }
}

const fn align_down(addr: u64, log2_size: u32) -> u64 {
    addr & !(bit(log2_size).wrapping_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_core::csr::MINSTRET;
    use rvm_core::MachineState;
    use rvm_hal::{PmaEntry, PmaFlags, PmaTable};
    use rvm_merkle::{MerkleTree, PageSource};
    use rvm_state_access::{DirectAccess, LogType, LoggingAccess};

    fn machine_with_addi() -> MachineState {
        // addi x1, x0, 5
        let inst: u32 = (5u32 << 20) | (0 << 15) | (0b000 << 12) | (1 << 7) | 0b0010011;
        let mut bytes = inst.to_le_bytes().to_vec();
        bytes.resize(0x1000, 0);
        let mut pma = PmaTable::new();
        pma.push(PmaEntry::memory(0x8000_0000, PmaFlags::ram(), bytes));
        let mut state = MachineState::new(pma);
        state.pc = 0x8000_0000;
        state
    }

    #[test]
    fn well_formed_log_verifies_as_a_transition() {
        let mut state = machine_with_addi();
        let tree = MerkleTree::new();
        let pre_root = tree.root();
        let mut access = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        let mut tlb = TlbSet::new();
        rvm_interp::step_cycle(&mut access, &mut tlb).unwrap();
        let log = access.into_log();

        verify_access_log(&log).unwrap();

        // Recompute the real post-root by applying the log's own writes
        // through an independent run against a fresh machine, then rehashing.
        let mut direct_state = machine_with_addi();
        let mut direct_tlb = TlbSet::new();
        {
            let mut direct = DirectAccess::new(&mut direct_state);
            rvm_interp::step_cycle(&mut direct, &mut direct_tlb).unwrap();
        }
        let mut post_tree = MerkleTree::new();
        let dirty = direct_state.take_dirty_pages();
        post_tree.update(&dirty, &direct_state);
        let post_root = post_tree.root();

        verify_state_transition(pre_root, &log, post_root).unwrap();
    }

    #[test]
    fn tampered_written_value_fails_transition_check() {
        let mut state = machine_with_addi();
        let tree = MerkleTree::new();
        let pre_root = tree.root();
        let mut access = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        let mut tlb = TlbSet::new();
        rvm_interp::step_cycle(&mut access, &mut tlb).unwrap();
        let mut log = access.into_log();

        let write = log.accesses.iter_mut().find(|r| r.kind == AccessKind::Write).unwrap();
        write.written_data = Some(vec![0xFF; 8]);

        let err = verify_state_transition(pre_root, &log, pre_root).unwrap_err();
        assert!(matches!(err, VerifyError::ReplayFailed(_)));
    }

    #[test]
    fn wrong_claimed_post_root_is_rejected() {
        let mut state = machine_with_addi();
        let tree = MerkleTree::new();
        let pre_root = tree.root();
        let mut access = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        let mut tlb = TlbSet::new();
        rvm_interp::step_cycle(&mut access, &mut tlb).unwrap();
        let log = access.into_log();

        let bogus_root = [0xCDu8; 32];
        let err = verify_state_transition(pre_root, &log, bogus_root).unwrap_err();
        assert!(matches!(err, VerifyError::RootMismatch { .. }));
    }

    #[test]
    fn minstret_is_among_the_logged_writes() {
        let mut state = machine_with_addi();
        let tree = MerkleTree::new();
        let mut access = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        let mut tlb = TlbSet::new();
        rvm_interp::step_cycle(&mut access, &mut tlb).unwrap();
        let log = access.into_log();
        let csr_offset = rvm_core::shadow::csr_offset(MINSTRET).unwrap();
        let addr = rvm_core::shadow::SHADOW_START + csr_offset;
        assert!(log.accesses.iter().any(|r| r.address == addr && r.kind == AccessKind::Write));
    }
}
