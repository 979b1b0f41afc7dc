//! Sv39/Sv48 page-table walk, anchored in `satp`.
//!
//! Every PTE fetch and every accessed/dirty-bit update goes through the
//! caller's [`StateAccess`], exactly like any other physical memory access —
//! so a `step()` walking a page table produces Merkle-proved log entries for
//! the page-table bytes it touched, and `verify()` can replay a trap-causing
//! walk with no special-casing.

use rvm_core::csr::{SATP_MODE_SHIFT, SATP_MODE_SV39, SATP_MODE_SV48, SATP_PPN_MASK};
use rvm_core::{PRV_M, PRV_S, PRV_U};
use rvm_state_access::StateAccess;
use thiserror::Error;

const PTE_V: u64 = 1 << 0;
const PTE_R: u64 = 1 << 1;
const PTE_W: u64 = 1 << 2;
const PTE_X: u64 = 1 << 3;
const PTE_U: u64 = 1 << 4;
const PTE_A: u64 = 1 << 6;
const PTE_D: u64 = 1 << 7;
const PTE_PPN_SHIFT: u32 = 10;
const PTE_SIZE: u64 = 8;

const PAGE_OFFSET_BITS: u32 = 12;

/// What kind of access is being translated, for permission checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Instruction fetch.
    Fetch,
    /// Load.
    Load,
    /// Store (or the store half of an AMO/`sc.*`).
    Store,
}

/// Why a translation failed. The interpreter turns this into the matching
/// instruction/load/store page-fault trap, with `mtval` set to the
/// requesting virtual address.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TranslationFault {
    /// The virtual address's upper bits are not a valid sign extension of
    /// the mode's VA width.
    #[error("virtual address is not canonical for the active translation mode")]
    NonCanonicalAddress,
    /// No valid leaf PTE was found, or a reserved encoding (`W=1,R=0`) was
    /// hit along the way.
    #[error("page fault walking the page table")]
    PageFault,
    /// A valid leaf PTE was found but its permission bits don't allow the
    /// requested access.
    #[error("permission denied by page table entry")]
    PermissionDenied,
    /// A superpage PTE's low PPN bits were nonzero (misaligned superpage).
    #[error("misaligned superpage mapping")]
    MisalignedSuperpage,
    /// The underlying physical memory access (the PTE fetch itself) failed,
    /// e.g. the PTE address isn't backed by any PMA range.
    #[error("page table entry fetch is unmapped")]
    PteUnmapped,
}

/// Translation mode selected by `satp.MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Bare,
    Sv39,
    Sv48,
}

impl Mode {
    fn from_satp(satp: u64) -> Self {
        match (satp >> SATP_MODE_SHIFT) & 0xF {
            SATP_MODE_SV39 => Self::Sv39,
            SATP_MODE_SV48 => Self::Sv48,
            _ => Self::Bare,
        }
    }

    const fn levels(self) -> u32 {
        match self {
            Self::Bare => 0,
            Self::Sv39 => 3,
            Self::Sv48 => 4,
        }
    }

    const fn va_bits(self) -> u32 {
        match self {
            Self::Bare => 64,
            Self::Sv39 => 39,
            Self::Sv48 => 48,
        }
    }
}

/// Parameters governing permission checks, supplied by the interpreter from
/// the current `mstatus`/privilege rather than re-derived here (keeping the
/// walker decoupled from CSR layout).
#[derive(Debug, Clone, Copy)]
pub struct TranslationContext {
    /// Current privilege level ([`PRV_U`], [`PRV_S`] or [`PRV_M`]).
    pub privilege: u8,
    /// `mstatus.SUM`: supervisor may access `U`-mapped pages.
    pub sum: bool,
    /// `mstatus.MXR`: loads may read executable-but-not-readable pages.
    pub mxr: bool,
}

/// Translates `vaddr` to a physical address under `satp`, walking the page
/// table through `access` (so every PTE read, and every accessed/dirty-bit
/// update, is itself a logged/replayed state access).
pub fn translate<A: StateAccess>(
    access: &mut A,
    satp: u64,
    vaddr: u64,
    intent: Intent,
    ctx: TranslationContext,
) -> Result<u64, TranslationFault> {
    if ctx.privilege == PRV_M {
        return Ok(vaddr);
    }

    let mode = Mode::from_satp(satp);
    if mode == Mode::Bare {
        return Ok(vaddr);
    }

    if !is_canonical(vaddr, mode.va_bits()) {
        return Err(TranslationFault::NonCanonicalAddress);
    }

    let mut ppn = satp & SATP_PPN_MASK;
    let mut level = mode.levels();

    loop {
        level -= 1;
        let vpn = vpn_at_level(vaddr, level);
        let pte_addr = (ppn << PAGE_OFFSET_BITS) + vpn * PTE_SIZE;
        let pte = access.read_memory(pte_addr, 3).map_err(|_| TranslationFault::PteUnmapped)?;

        if pte & PTE_V == 0 || (pte & PTE_W != 0 && pte & PTE_R == 0) {
            return Err(TranslationFault::PageFault);
        }

        let is_leaf = pte & (PTE_R | PTE_X) != 0;
        if !is_leaf {
            if level == 0 {
                return Err(TranslationFault::PageFault);
            }
            ppn = (pte >> PTE_PPN_SHIFT) & ((1u64 << 44) - 1);
            continue;
        }

        check_permissions(pte, intent, ctx)?;

        let leaf_ppn = (pte >> PTE_PPN_SHIFT) & ((1u64 << 44) - 1);
        if level > 0 {
            let low_mask = (1u64 << (9 * level)) - 1;
            if leaf_ppn & low_mask != 0 {
                return Err(TranslationFault::MisalignedSuperpage);
            }
        }

        maybe_update_ad_bits(access, pte_addr, pte, intent);

        let page_offset = vaddr & ((1u64 << (PAGE_OFFSET_BITS + 9 * level)) - 1);
        let frame = (leaf_ppn << PAGE_OFFSET_BITS) & !((1u64 << (PAGE_OFFSET_BITS + 9 * level)) - 1);
        return Ok(frame | page_offset);
    }
}

fn check_permissions(pte: u64, intent: Intent, ctx: TranslationContext) -> Result<(), TranslationFault> {
    let user_page = pte & PTE_U != 0;
    match ctx.privilege {
        PRV_U if !user_page => return Err(TranslationFault::PermissionDenied),
        PRV_S if user_page && !ctx.sum => return Err(TranslationFault::PermissionDenied),
        _ => {}
    }

    let allowed = match intent {
        Intent::Fetch => pte & PTE_X != 0,
        Intent::Load => pte & PTE_R != 0 || (ctx.mxr && pte & PTE_X != 0),
        Intent::Store => pte & PTE_W != 0,
    };
    if allowed {
        Ok(())
    } else {
        Err(TranslationFault::PermissionDenied)
    }
}

fn maybe_update_ad_bits<A: StateAccess>(access: &mut A, pte_addr: u64, pte: u64, intent: Intent) {
    let mut updated = pte;
    if pte & PTE_A == 0 {
        updated |= PTE_A;
    }
    if intent == Intent::Store && pte & PTE_D == 0 {
        updated |= PTE_D;
    }
    if updated != pte {
        let _ = access.write_memory(pte_addr, 3, updated);
    }
}

fn vpn_at_level(vaddr: u64, level: u32) -> u64 {
    (vaddr >> (PAGE_OFFSET_BITS + 9 * level)) & 0x1FF
}

fn is_canonical(vaddr: u64, va_bits: u32) -> bool {
    if va_bits >= 64 {
        return true;
    }
    let shift = 64 - va_bits;
    (((vaddr << shift) as i64) >> shift) as u64 == vaddr
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvm_core::{MachineState, PRV_S};
    use rvm_hal::{PmaEntry, PmaFlags, PmaTable};
    use rvm_state_access::DirectAccess;

    fn satp_sv39(ppn: u64) -> u64 {
        (SATP_MODE_SV39 << SATP_MODE_SHIFT) | ppn
    }

    fn machine_with_ram(base: u64, len: usize) -> MachineState {
        let mut pma = PmaTable::new();
        pma.push(PmaEntry::memory(base, PmaFlags::ram(), vec![0u8; len]));
        MachineState::new(pma)
    }

    #[test]
    fn bare_mode_is_identity() {
        let mut state = machine_with_ram(0x8000_0000, 0x1000);
        let mut access = DirectAccess::new(&mut state);
        let ctx = TranslationContext { privilege: PRV_S, sum: false, mxr: false };
        let pa = translate(&mut access, 0, 0x8000_0100, Intent::Load, ctx).unwrap();
        assert_eq!(pa, 0x8000_0100);
    }

    #[test]
    fn m_mode_never_translates() {
        let mut state = machine_with_ram(0x8000_0000, 0x1000);
        let mut access = DirectAccess::new(&mut state);
        let ctx = TranslationContext { privilege: PRV_M, sum: false, mxr: false };
        let pa = translate(&mut access, satp_sv39(7), 0xDEAD_0000, Intent::Load, ctx).unwrap();
        assert_eq!(pa, 0xDEAD_0000);
    }

    #[test]
    fn single_level_sv39_walk_resolves_leaf() {
        // Root table at 0x8000_0000 (ppn 0x80000), one valid leaf PTE at
        // VPN[2]=0 mapping a 1GiB superpage at PPN 0 with R|W|X|V|U|A|D.
        let mut state = machine_with_ram(0x8000_0000, 0x1000);
        {
            let mut access = DirectAccess::new(&mut state);
            let leaf_pte = PTE_V | PTE_R | PTE_W | PTE_X | PTE_U | PTE_A | PTE_D;
            access.write_memory(0x8000_0000, 3, leaf_pte).unwrap();
        }
        let mut access = DirectAccess::new(&mut state);
        let ctx = TranslationContext { privilege: PRV_U, sum: false, mxr: false };
        let satp = satp_sv39(0x8000_0000 >> 12);
        let pa = translate(&mut access, satp, 0x1234, Intent::Load, ctx).unwrap();
        assert_eq!(pa, 0x1234);
    }

    #[test]
    fn invalid_pte_faults() {
        let mut state = machine_with_ram(0x8000_0000, 0x1000);
        let mut access = DirectAccess::new(&mut state);
        let ctx = TranslationContext { privilege: PRV_U, sum: false, mxr: false };
        let satp = satp_sv39(0x8000_0000 >> 12);
        let err = translate(&mut access, satp, 0x1234, Intent::Load, ctx).unwrap_err();
        assert_eq!(err, TranslationFault::PageFault);
    }

    #[test]
    fn user_page_denied_to_supervisor_without_sum() {
        let mut state = machine_with_ram(0x8000_0000, 0x1000);
        {
            let mut access = DirectAccess::new(&mut state);
            let leaf_pte = PTE_V | PTE_R | PTE_W | PTE_U | PTE_A | PTE_D;
            access.write_memory(0x8000_0000, 3, leaf_pte).unwrap();
        }
        let mut access = DirectAccess::new(&mut state);
        let ctx = TranslationContext { privilege: PRV_S, sum: false, mxr: false };
        let satp = satp_sv39(0x8000_0000 >> 12);
        let err = translate(&mut access, satp, 0x1234, Intent::Load, ctx).unwrap_err();
        assert_eq!(err, TranslationFault::PermissionDenied);
    }
}
