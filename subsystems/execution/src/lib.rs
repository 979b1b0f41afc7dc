//! Fetch/decode/execute, CSR semantics, trap delivery and atomics.
//!
//! This crate is generic over [`rvm_state_access::StateAccess`]: the same
//! [`step_cycle`] drives `run` (via `DirectAccess`), `step` (via
//! `LoggingAccess`) and `verify` (via `ReplayAccess`) without branching on
//! which one it was handed.

pub mod decode;
pub mod execute;
pub mod trap;

pub use decode::{decode, Decoded};
pub use execute::{execute, fetch, Outcome};
pub use trap::{deliver_interrupt, deliver_trap, pending_interrupt, Exception, Interrupt, Trap};

use rvm_core::csr::{MCYCLE, MINSTRET};
use rvm_state_access::{AccessError, StateAccess};

/// What a single [`step_cycle`] call did, for the caller's retirement /
/// halt-detection bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEffect {
    /// An instruction retired normally.
    Retired,
    /// The machine is halted (`iflags.H`); no instruction was fetched.
    Halted,
    /// `wfi` executed with no interrupt pending.
    WaitingForInterrupt,
    /// A pending interrupt was taken; no instruction was fetched this cycle.
    InterruptTaken,
    /// Fetch, decode or execute raised a trap, now delivered.
    Trapped,
}

/// Runs one machine cycle: halt check, pending-interrupt delivery, then
/// fetch/decode/execute of a single instruction. Always advances `mcycle`;
/// advances `minstret` only when an instruction actually retires, per the
/// RISC-V retirement-counter semantics (`minstret` does not count trapped
/// or interrupt-preempted cycles).
pub fn step_cycle<A: StateAccess>(access: &mut A, tlb: &mut rvm_mmu::TlbSet) -> Result<CycleEffect, AccessError> {
    let iflags = access.read_iflags();
    if iflags.h {
        return Ok(CycleEffect::Halted);
    }

    let mcycle = access.read_csr(MCYCLE)?;
    access.write_csr(MCYCLE, mcycle.wrapping_add(1))?;

    if let Some(interrupt) = pending_interrupt(access, iflags.prv)? {
        let new_prv = deliver_interrupt(access, iflags.prv, interrupt)?;
        let mut next = iflags;
        next.prv = new_prv;
        access.write_iflags(next);
        tlb.flush_all();
        return Ok(CycleEffect::InterruptTaken);
    }

    let mut privilege = iflags.prv;
    let pc = access.read_pc();

    let outcome = (|| -> Result<Outcome, Trap> {
        let word = fetch(access, tlb, privilege, pc)?;
        let decoded = decode::decode(word).ok_or(Trap::new(Exception::IllegalInstruction, 0))?;
        execute::execute(access, tlb, &mut privilege, pc, decoded)
    })();

    match outcome {
        Ok(Outcome::Continue) => {
            if privilege != iflags.prv {
                let mut next = iflags;
                next.prv = privilege;
                access.write_iflags(next);
                tlb.flush_all();
            }
            let minstret = access.read_csr(MINSTRET)?;
            access.write_csr(MINSTRET, minstret.wrapping_add(1))?;
            Ok(CycleEffect::Retired)
        }
        Ok(Outcome::WaitForInterrupt) => Ok(CycleEffect::WaitingForInterrupt),
        Err(trap) => {
            let new_prv = deliver_trap(access, iflags.prv, trap)?;
            let mut next = iflags;
            next.prv = new_prv;
            access.write_iflags(next);
            tlb.flush_all();
            Ok(CycleEffect::Trapped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_core::csr::{MEPC, MSTATUS, MTVEC};
    use rvm_core::MachineState;
    use rvm_hal::{PmaEntry, PmaFlags, PmaTable};
    use rvm_state_access::DirectAccess;

    fn machine_with_program(words: &[u32]) -> MachineState {
        let mut bytes = Vec::with_capacity(words.len() * 4 + 4096);
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        bytes.resize(4096, 0);
        let mut pma = PmaTable::new();
        pma.push(PmaEntry::memory(0x8000_0000, PmaFlags::ram(), bytes));
        let mut state = MachineState::new(pma);
        state.pc = 0x8000_0000;
        state
    }

    #[test]
    fn addi_instruction_retires_and_advances_pc() {
        // addi x1, x0, 5
        let inst = (5u32 << 20) | (0 << 15) | (0b000 << 12) | (1 << 7) | 0b0010011;
        let mut state = machine_with_program(&[inst]);
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = rvm_mmu::TlbSet::new();
        let effect = step_cycle(&mut access, &mut tlb).unwrap();
        assert_eq!(effect, CycleEffect::Retired);
        assert_eq!(access.read_x(1), 5);
        assert_eq!(access.read_pc(), 0x8000_0004);
        assert_eq!(access.read_csr(MINSTRET).unwrap(), 1);
        assert_eq!(access.read_csr(MCYCLE).unwrap(), 2); // mcycle resets to 1, this cycle bumps it once
    }

    #[test]
    fn illegal_instruction_traps_without_retiring() {
        let mut state = machine_with_program(&[0]); // all-zero word: illegal
        let mut access = DirectAccess::new(&mut state);
        access.write_csr(MTVEC, 0x8000_1000).unwrap();
        let mut tlb = rvm_mmu::TlbSet::new();
        let effect = step_cycle(&mut access, &mut tlb).unwrap();
        assert_eq!(effect, CycleEffect::Trapped);
        assert_eq!(access.read_pc(), 0x8000_1000);
        assert_eq!(access.read_csr(MEPC).unwrap(), 0x8000_0000);
        assert_eq!(access.read_csr(MINSTRET).unwrap(), 0);
    }

    #[test]
    fn halted_machine_does_nothing() {
        let mut state = machine_with_program(&[0]);
        let mut access = DirectAccess::new(&mut state);
        let mut iflags = access.read_iflags();
        iflags.h = true;
        access.write_iflags(iflags);
        let mut tlb = rvm_mmu::TlbSet::new();
        let effect = step_cycle(&mut access, &mut tlb).unwrap();
        assert_eq!(effect, CycleEffect::Halted);
        assert_eq!(access.read_csr(MCYCLE).unwrap(), 1); // halt check precedes the mcycle bump
    }

    #[test]
    fn mret_restores_previous_privilege() {
        // mret
        let inst = 0b0011000_00010_00000_000_00000_1110011u32;
        let mut state = machine_with_program(&[inst]);
        let mut access = DirectAccess::new(&mut state);
        access.write_csr(MSTATUS, rvm_core::csr::MSTATUS_MPIE).unwrap();
        let mut tlb = rvm_mmu::TlbSet::new();
        let effect = step_cycle(&mut access, &mut tlb).unwrap();
        assert_eq!(effect, CycleEffect::Retired);
        let iflags = access.read_iflags();
        assert_eq!(iflags.prv, rvm_core::PRV_U);
    }
}
