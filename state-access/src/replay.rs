//! The `verify` path: state is reconstructed entirely from a previously
//! recorded [`AccessLog`] and the claimed pre-step root. No real
//! [`MachineState`]/devices are touched — every access is checked against
//! the log's own proof and served from the log's own recorded bytes.
//!
//! This is what makes verification independent of re-running the step on
//! real memory: a verifier that only has the log and the two claimed roots
//! can still catch a prover that lied about any single access.

use rvm_core::Iflags;
use rvm_merkle::Hash;

use crate::error::AccessError;
use crate::log::{AccessKind, AccessLog, AccessRecord};
use crate::StateAccess;

/// Replays one step's [`AccessLog`] against a claimed pre-step root, serving
/// every read/write from the log in order and verifying each entry's proof
/// as it is consumed.
#[derive(Debug)]
pub struct ReplayAccess<'a> {
    log: &'a AccessLog,
    pre_root: Hash,
    cursor: usize,
    failure: Option<AccessError>,
}

impl<'a> ReplayAccess<'a> {
    /// Begins a replay of `log` against the claimed `pre_root`.
    pub const fn new(log: &'a AccessLog, pre_root: Hash) -> Self {
        Self { log, pre_root, cursor: 0, failure: None }
    }

    /// The first error encountered, if any. The interpreter loop driving
    /// this access should check this after each instruction and abort the
    /// replay immediately on `Some`.
    pub fn failure(&self) -> Option<&AccessError> {
        self.failure.as_ref()
    }

    /// Every entry in the log was consumed and no entry failed verification.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.cursor == self.log.accesses.len()
    }

    fn take(&mut self, kind: AccessKind, addr: u64, log2_size: u32) -> Option<&AccessRecord> {
        if self.failure.is_some() {
            return None;
        }
        let Some(record) = self.log.accesses.get(self.cursor) else {
            self.failure = Some(AccessError::ReplayExhausted);
            return None;
        };
        if record.kind != kind || record.log2_size != log2_size || record.address != addr {
            self.failure = Some(AccessError::ReplayMismatch(format!(
                "expected {kind:?} at {addr:#x} (log2_size {log2_size}), log has {:?} at {:#x} (log2_size {})",
                record.kind, record.address, record.log2_size
            )));
            return None;
        }
        if record.proof.root_hash != self.pre_root || !record.proof.verify() {
            self.failure = Some(AccessError::ReplayMismatch(format!(
                "access at {addr:#x} carries a proof that does not verify against the claimed pre-root"
            )));
            return None;
        }
        self.cursor += 1;
        self.log.accesses.get(self.cursor - 1)
    }

    fn read_word(&mut self, addr: u64, log2_size: u32) -> u64 {
        let Some(record) = self.take(AccessKind::Read, addr, log2_size) else { return 0 };
        bytes_to_word(&record.read_data)
    }

    fn write_word(&mut self, addr: u64, log2_size: u32, value: u64) {
        let size = (1usize << log2_size).min(8);
        let expected = value.to_le_bytes();
        let Some(record) = self.take(AccessKind::Write, addr, log2_size) else { return };
        let matches = record.written_data.as_deref().is_some_and(|w| w == &expected[..size]);
        if !matches {
            self.failure = Some(AccessError::ReplayMismatch(format!(
                "write at {addr:#x} diverges from the logged written value"
            )));
        }
    }
}

fn bytes_to_word(bytes: &[u8]) -> u64 {
    let mut padded = [0u8; 8];
    padded[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(padded)
}

/// Shadow-state addresses used for register/CSR/pc/iflags/ilrsc accesses,
/// matching the same addressing [`crate::direct::DirectAccess`] and
/// [`crate::logging::LoggingAccess`] use.
mod addr {
    use rvm_core::shadow;

    pub fn gpr(reg: u8) -> u64 {
        shadow::SHADOW_START + shadow::gpr_offset(reg)
    }
    pub fn pc() -> u64 {
        shadow::SHADOW_START + shadow::pc_offset()
    }
    pub fn csr(a: u16) -> Option<u64> {
        shadow::csr_offset(a).map(|o| shadow::SHADOW_START + o)
    }
    pub fn iflags() -> u64 {
        shadow::SHADOW_START + shadow::iflags_offset()
    }
    pub fn ilrsc() -> u64 {
        shadow::SHADOW_START + shadow::ilrsc_offset()
    }
}

impl StateAccess for ReplayAccess<'_> {
    fn read_x(&mut self, reg: u8) -> u64 {
        self.read_word(addr::gpr(reg), 3)
    }

    fn write_x(&mut self, reg: u8, value: u64) {
        self.write_word(addr::gpr(reg), 3, value);
    }

    fn read_pc(&mut self) -> u64 {
        self.read_word(addr::pc(), 3)
    }

    fn write_pc(&mut self, value: u64) {
        self.write_word(addr::pc(), 3, value);
    }

    fn read_csr(&mut self, csr_addr: u16) -> Result<u64, AccessError> {
        let a = addr::csr(csr_addr).ok_or(AccessError::NoSuchCsr { addr: csr_addr })?;
        Ok(self.read_word(a, 3))
    }

    fn write_csr(&mut self, csr_addr: u16, value: u64) -> Result<(), AccessError> {
        let a = addr::csr(csr_addr).ok_or(AccessError::NoSuchCsr { addr: csr_addr })?;
        self.write_word(a, 3, value);
        Ok(())
    }

    fn read_iflags(&mut self) -> Iflags {
        Iflags::unpack(self.read_word(addr::iflags(), 3))
    }

    fn write_iflags(&mut self, iflags: Iflags) {
        self.write_word(addr::iflags(), 3, iflags.pack());
    }

    fn read_ilrsc(&mut self) -> u64 {
        self.read_word(addr::ilrsc(), 3)
    }

    fn write_ilrsc(&mut self, value: u64) {
        self.write_word(addr::ilrsc(), 3, value);
    }

    fn read_memory(&mut self, paddr: u64, log2_size: u32) -> Result<u64, AccessError> {
        let value = self.read_word(paddr, log2_size);
        match self.failure.clone() {
            Some(e) => Err(e),
            None => Ok(value),
        }
    }

    fn write_memory(&mut self, paddr: u64, log2_size: u32, value: u64) -> Result<(), AccessError> {
        self.write_word(paddr, log2_size, value);
        match self.failure.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogType;
    use crate::logging::LoggingAccess;
    use rvm_core::MachineState;
    use rvm_hal::PmaTable;
    use rvm_merkle::MerkleTree;

    #[test]
    fn replay_accepts_a_well_formed_log() {
        let mut state = MachineState::new(PmaTable::new());
        let tree = MerkleTree::new();
        let pre_root = tree.root();
        let mut logger = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        logger.write_x(1, 99);
        let x1 = logger.read_x(1);
        let log = logger.into_log();

        let mut replay = ReplayAccess::new(&log, pre_root);
        replay.write_x(1, 99);
        assert_eq!(replay.read_x(1), x1);
        assert!(replay.failure().is_none());
        assert!(replay.is_complete());
    }

    #[test]
    fn replay_rejects_a_wrong_written_value() {
        let mut state = MachineState::new(PmaTable::new());
        let tree = MerkleTree::new();
        let pre_root = tree.root();
        let mut logger = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        logger.write_x(1, 99);
        let log = logger.into_log();

        let mut replay = ReplayAccess::new(&log, pre_root);
        replay.write_x(1, 100); // diverges from the logged 99
        assert!(replay.failure().is_some());
    }

    #[test]
    fn replay_rejects_a_proof_against_the_wrong_root() {
        let mut state = MachineState::new(PmaTable::new());
        let tree = MerkleTree::new();
        let mut logger = LoggingAccess::new(&mut state, &tree, LogType::Accesses);
        logger.write_x(1, 99);
        let log = logger.into_log();

        let wrong_root = [0xAAu8; 32];
        let mut replay = ReplayAccess::new(&log, wrong_root);
        replay.write_x(1, 99);
        assert!(replay.failure().is_some());
    }
}
