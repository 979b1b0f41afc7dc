//! Trap delivery: exception/interrupt cause encoding and the
//! `medeleg`/`mideleg`-routed handoff into M-mode or S-mode.

use rvm_core::csr::{MCAUSE, MEDELEG, MEPC, MIDELEG, MIE, MIP, MSTATUS, MTVAL, MTVEC};
use rvm_core::csr::{
    MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP, MSTATUS_MPP_SHIFT, MSTATUS_SIE, MSTATUS_SPIE, MSTATUS_SPP,
};
use rvm_core::csr::{MIP_MEIP, MIP_MSIP, MIP_MTIP, MIP_SEIP, MIP_SSIP, MIP_STIP};
use rvm_core::csr::{SCAUSE, SEPC, STVAL, STVEC};
use rvm_core::{PRV_M, PRV_S, PRV_U};
use rvm_state_access::{AccessError, StateAccess};

/// Exception cause codes (bit 63 clear), per the RISC-V privileged
/// architecture's `mcause`/`scause` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    InstructionAddressMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreAddressMisaligned,
    StoreAccessFault,
    EcallFromU,
    EcallFromS,
    EcallFromM,
    InstructionPageFault,
    LoadPageFault,
    StorePageFault,
}

impl Exception {
    const fn code(self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreAddressMisaligned => 6,
            Self::StoreAccessFault => 7,
            Self::EcallFromU => 8,
            Self::EcallFromS => 9,
            Self::EcallFromM => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StorePageFault => 15,
        }
    }
}

/// Interrupt cause codes (bit 63 set conceptually; tracked separately from
/// [`Exception`] here and OR'd with the high bit when written to `mcause`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    SupervisorSoftware,
    MachineSoftware,
    SupervisorTimer,
    MachineTimer,
    SupervisorExternal,
    MachineExternal,
}

impl Interrupt {
    const fn code(self) -> u64 {
        match self {
            Self::SupervisorSoftware => 1,
            Self::MachineSoftware => 3,
            Self::SupervisorTimer => 5,
            Self::MachineTimer => 7,
            Self::SupervisorExternal => 9,
            Self::MachineExternal => 11,
        }
    }

    const fn mip_bit(self) -> u64 {
        match self {
            Self::SupervisorSoftware => MIP_SSIP,
            Self::MachineSoftware => MIP_MSIP,
            Self::SupervisorTimer => MIP_STIP,
            Self::MachineTimer => MIP_MTIP,
            Self::SupervisorExternal => MIP_SEIP,
            Self::MachineExternal => MIP_MEIP,
        }
    }
}

/// A reason execution traps, carrying whatever value becomes `mtval`/`stval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trap {
    pub exception: Exception,
    pub tval: u64,
}

impl Trap {
    pub const fn new(exception: Exception, tval: u64) -> Self {
        Self { exception, tval }
    }
}

impl From<AccessError> for Trap {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Unmapped { paddr, .. } | AccessError::DeviceRejected { paddr, .. } => {
                Trap::new(Exception::LoadAccessFault, paddr)
            }
            AccessError::NoSuchCsr { .. } => Trap::new(Exception::IllegalInstruction, 0),
            AccessError::ReplayMismatch(_) | AccessError::ReplayExhausted => {
                Trap::new(Exception::IllegalInstruction, 0)
            }
        }
    }
}

/// Scans `mip & mie` (machine bits) and `mip & mie & mideleg` (delegated to
/// S) for the highest-priority pending, enabled interrupt, honoring the
/// current privilege and `mstatus.{M,S}IE` global-enable bits exactly as the
/// privileged spec's interrupt-priority table requires (machine external >
/// machine software > machine timer > supervisor external > supervisor
/// software > supervisor timer).
pub fn pending_interrupt<A: StateAccess>(access: &mut A, privilege: u8) -> Result<Option<Interrupt>, AccessError> {
    let mip = access.read_csr(MIP)?;
    let mie = access.read_csr(MIE)?;
    let mideleg = access.read_csr(MIDELEG)?;
    let mstatus = access.read_csr(MSTATUS)?;

    let pending = mip & mie;
    if pending == 0 {
        return Ok(None);
    }

    let m_global_enabled = privilege < PRV_M || mstatus & MSTATUS_MIE != 0;
    let s_global_enabled = privilege < PRV_S || (privilege == PRV_S && mstatus & MSTATUS_SIE != 0);

    const ORDER: [(u64, Interrupt); 6] = [
        (MIP_MEIP, Interrupt::MachineExternal),
        (MIP_MSIP, Interrupt::MachineSoftware),
        (MIP_MTIP, Interrupt::MachineTimer),
        (MIP_SEIP, Interrupt::SupervisorExternal),
        (MIP_SSIP, Interrupt::SupervisorSoftware),
        (MIP_STIP, Interrupt::SupervisorTimer),
    ];

    for (bit, kind) in ORDER {
        if pending & bit == 0 {
            continue;
        }
        let delegated = mideleg & bit != 0;
        let enabled = if delegated { s_global_enabled } else { m_global_enabled };
        if enabled {
            return Ok(Some(kind));
        }
    }
    Ok(None)
}

/// Delivers `trap` (or, via [`deliver_interrupt`], a pending interrupt),
/// routing through `medeleg`/`mideleg` to S-mode when delegated and the
/// current privilege is U or S, otherwise to M-mode. Updates `mstatus`'s
/// interrupt-enable/previous-privilege stack and sets `pc` to the handler per
/// `mtvec`/`stvec`'s direct/vectored mode bit.
pub fn deliver_trap<A: StateAccess>(access: &mut A, privilege: u8, trap: Trap) -> Result<u8, AccessError> {
    let cause = trap.exception.code();
    let medeleg = access.read_csr(MEDELEG)?;
    deliver(access, privilege, cause, trap.tval, medeleg & (1 << cause) != 0)
}

/// Delivers a pending interrupt, as found by [`pending_interrupt`].
pub fn deliver_interrupt<A: StateAccess>(access: &mut A, privilege: u8, interrupt: Interrupt) -> Result<u8, AccessError> {
    let cause = (1u64 << 63) | interrupt.code();
    let mideleg = access.read_csr(MIDELEG)?;
    deliver(access, privilege, cause, 0, mideleg & interrupt.mip_bit() != 0 && privilege != PRV_M)
}

fn deliver<A: StateAccess>(
    access: &mut A,
    privilege: u8,
    cause: u64,
    tval: u64,
    to_supervisor: bool,
) -> Result<u8, AccessError> {
    let pc = access.read_pc();
    if to_supervisor && privilege != PRV_M {
        let mut mstatus = access.read_csr(MSTATUS)?;
        let sie = mstatus & MSTATUS_SIE != 0;
        mstatus = (mstatus & !MSTATUS_SPIE) | (if sie { MSTATUS_SPIE } else { 0 });
        mstatus &= !MSTATUS_SIE;
        mstatus = (mstatus & !MSTATUS_SPP) | (if privilege == PRV_U { 0 } else { MSTATUS_SPP });
        access.write_csr(MSTATUS, mstatus)?;
        access.write_csr(SEPC, pc)?;
        access.write_csr(SCAUSE, cause)?;
        access.write_csr(STVAL, tval)?;
        let stvec = access.read_csr(STVEC)?;
        access.write_pc(trap_target(stvec, cause));
        Ok(PRV_S)
    } else {
        let mut mstatus = access.read_csr(MSTATUS)?;
        let mie = mstatus & MSTATUS_MIE != 0;
        mstatus = (mstatus & !MSTATUS_MPIE) | (if mie { MSTATUS_MPIE } else { 0 });
        mstatus &= !MSTATUS_MIE;
        mstatus = (mstatus & !MSTATUS_MPP) | ((privilege as u64) << MSTATUS_MPP_SHIFT);
        access.write_csr(MSTATUS, mstatus)?;
        access.write_csr(MEPC, pc)?;
        access.write_csr(MCAUSE, cause)?;
        access.write_csr(MTVAL, tval)?;
        let mtvec = access.read_csr(MTVEC)?;
        access.write_pc(trap_target(mtvec, cause));
        Ok(PRV_M)
    }
}

fn trap_target(tvec: u64, cause: u64) -> u64 {
    let base = tvec & !0b11;
    let vectored = tvec & 0b11 == 1;
    let is_interrupt = cause >> 63 == 1;
    if vectored && is_interrupt {
        base + 4 * (cause & !(1 << 63))
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_core::MachineState;
    use rvm_hal::PmaTable;
    use rvm_state_access::DirectAccess;

    #[test]
    fn ecall_from_u_traps_to_m_by_default() {
        let mut state = MachineState::new(PmaTable::new());
        let mut access = DirectAccess::new(&mut state);
        access.write_pc(0x1000);
        let prv = deliver_trap(&mut access, PRV_U, Trap::new(Exception::EcallFromU, 0)).unwrap();
        assert_eq!(prv, PRV_M);
        assert_eq!(access.read_csr(MEPC).unwrap(), 0x1000);
        assert_eq!(access.read_csr(MCAUSE).unwrap(), Exception::EcallFromU.code());
    }

    #[test]
    fn delegated_exception_traps_to_s() {
        let mut state = MachineState::new(PmaTable::new());
        let mut access = DirectAccess::new(&mut state);
        access.write_csr(MEDELEG, 1 << Exception::EcallFromU.code()).unwrap();
        access.write_pc(0x2000);
        let prv = deliver_trap(&mut access, PRV_U, Trap::new(Exception::EcallFromU, 0)).unwrap();
        assert_eq!(prv, PRV_S);
        assert_eq!(access.read_csr(SEPC).unwrap(), 0x2000);
    }

    #[test]
    fn vectored_mtvec_offsets_by_cause_for_interrupts() {
        let mut state = MachineState::new(PmaTable::new());
        let mut access = DirectAccess::new(&mut state);
        access.write_csr(MTVEC, 0x8000_0001).unwrap(); // vectored, base 0x8000_0000
        let prv = deliver_interrupt(&mut access, PRV_M, Interrupt::MachineTimer).unwrap();
        assert_eq!(prv, PRV_M);
        assert_eq!(access.read_pc(), 0x8000_0000 + 4 * Interrupt::MachineTimer.code());
    }

    #[test]
    fn no_pending_interrupt_when_globally_disabled() {
        let mut state = MachineState::new(PmaTable::new());
        let mut access = DirectAccess::new(&mut state);
        access.write_csr(MIE, MIP_MTIP).unwrap();
        access.write_csr(MIP, MIP_MTIP).unwrap();
        // mstatus.MIE left clear: machine mode with global interrupts off.
        assert_eq!(pending_interrupt(&mut access, PRV_M).unwrap(), None);
    }
}
