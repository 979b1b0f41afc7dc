//! Instruction execution: consumes one [`Decoded`] instruction and applies it
//! through a [`StateAccess`], translating any virtual address it touches via
//! [`rvm_mmu::translate`] first.
//!
//! Every instruction is responsible for leaving `pc` pointing at the next
//! instruction (or a trap/`mret`/`sret` target) before returning — there is
//! no separate "advance pc" step in the caller, so a missed `write_pc` here
//! would be a real bug, not a latent one.

use rvm_core::csr::{MEPC, MSTATUS, MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP, MSTATUS_MPP_SHIFT, MSTATUS_MXR, MSTATUS_SUM};
use rvm_core::csr::{MSTATUS_SIE, MSTATUS_SPIE, MSTATUS_SPP, SATP, SEPC};
use rvm_core::{PRV_M, PRV_S, PRV_U};
use rvm_mmu::{translate, Intent, TlbSet, TranslationContext};
use rvm_state_access::{AccessError, StateAccess};

use crate::decode::{AluOp, AmoOp, ArithKind, BranchOp, CsrOp, CsrSource, Decoded, MemWidth, MulDivOp};
use crate::trap::{Exception, Trap};

/// What happened after executing one instruction, beyond the default
/// "advance and continue" case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ordinary instruction; `pc` already points at the next one.
    Continue,
    /// `wfi` with no interrupt pending: the caller may idle rather than spin,
    /// though spinning (re-checking interrupts every cycle) is also correct.
    WaitForInterrupt,
}

fn width_bytes(width: MemWidth) -> u64 {
    match width {
        MemWidth::Byte => 1,
        MemWidth::Half => 2,
        MemWidth::Word => 4,
        MemWidth::Double => 8,
    }
}

fn sign_extend_width(value: u64, width: MemWidth) -> i64 {
    rvm_hal::sign_extend(value, width_bytes(width) as u32)
}

/// Traps if `vaddr` is not a multiple of `width`, per the RISC-V requirement
/// that a misaligned load/store/LR/SC/AMO raise an address-misaligned
/// exception rather than being serviced. Must run before translation, since
/// `tval` on this trap is the faulting virtual address.
fn check_aligned(vaddr: u64, width: u64, on_misaligned: Exception) -> Result<(), Trap> {
    if vaddr & (width - 1) != 0 {
        Err(Trap::new(on_misaligned, vaddr))
    } else {
        Ok(())
    }
}

/// Reads `width` bytes at `paddr`, always through 8-byte-aligned
/// [`StateAccess::read_memory`] calls (`log2_size = 3`).
///
/// The Merkle tree's leaves are fixed at 8 bytes (see `rvm_merkle::hash::hash_leaf`),
/// so a proof can only ever be produced/verified at that granularity or
/// coarser. Sub-leaf RISC-V load/store/fetch/LR/SC/AMO widths are synthesized
/// here via read-modify-write against the enclosing aligned word(s) instead of
/// asking the state-access layer for a `log2_size < 3` proof, mirroring how
/// the reference machine's `read_memory<T>`/`write_memory<T>` access host
/// memory at the word type's width while the backing page representation
/// stays fixed.
fn read_bytes<A: StateAccess>(access: &mut A, paddr: u64, width: u64) -> Result<u64, AccessError> {
    let off = (paddr & 7) as u32;
    let aligned = paddr & !7;
    if u64::from(off) + width <= 8 {
        let word = access.read_memory(aligned, 3)?;
        let shifted = word >> (off * 8);
        Ok(mask_bits(shifted, width))
    } else {
        let low = access.read_memory(aligned, 3)? as u128;
        let high = access.read_memory(aligned.wrapping_add(8), 3)? as u128;
        let combined = low | (high << 64);
        let shifted = combined >> (off * 8);
        Ok(mask_bits(shifted as u64, width))
    }
}

fn write_bytes<A: StateAccess>(access: &mut A, paddr: u64, width: u64, value: u64) -> Result<(), AccessError> {
    let off = (paddr & 7) as u32;
    let aligned = paddr & !7;
    let value = mask_bits(value, width);
    if u64::from(off) + width <= 8 {
        let old = access.read_memory(aligned, 3)?;
        let shift = off * 8;
        let mask = mask_bits(u64::MAX, width) << shift;
        let new = (old & !mask) | ((value << shift) & mask);
        access.write_memory(aligned, 3, new)
    } else {
        let aligned_high = aligned.wrapping_add(8);
        let low_bits = (8 - off) * 8;
        let high_bits = width as u32 * 8 - low_bits;

        let old_low = access.read_memory(aligned, 3)?;
        let low_mask = u64::MAX << (off * 8);
        let new_low = (old_low & !low_mask) | ((value << (off * 8)) & low_mask);

        let old_high = access.read_memory(aligned_high, 3)?;
        let high_mask = if high_bits >= 64 { u64::MAX } else { (1u64 << high_bits) - 1 };
        let new_high = (old_high & !high_mask) | ((value >> low_bits) & high_mask);

        access.write_memory(aligned, 3, new_low)?;
        access.write_memory(aligned_high, 3, new_high)
    }
}

fn mask_bits(value: u64, width_bytes: u64) -> u64 {
    if width_bytes >= 8 {
        value
    } else {
        value & ((1u64 << (width_bytes * 8)) - 1)
    }
}

fn translation_ctx<A: StateAccess>(access: &mut A, privilege: u8) -> Result<TranslationContext, Trap> {
    let mstatus = access.read_csr(MSTATUS).map_err(Trap::from)?;
    Ok(TranslationContext { privilege, sum: mstatus & MSTATUS_SUM != 0, mxr: mstatus & MSTATUS_MXR != 0 })
}

fn translate_or_trap<A: StateAccess>(
    access: &mut A,
    privilege: u8,
    vaddr: u64,
    intent: Intent,
) -> Result<u64, Trap> {
    let satp = access.read_csr(SATP).map_err(Trap::from)?;
    let ctx = translation_ctx(access, privilege)?;
    translate(access, satp, vaddr, intent, ctx).map_err(|_fault| {
        // Every TranslationFault variant manifests as the same page-fault
        // exception for a given access intent; `tval` carries the faulting
        // virtual address regardless of which walk step rejected it.
        let exception = match intent {
            Intent::Fetch => Exception::InstructionPageFault,
            Intent::Load => Exception::LoadPageFault,
            Intent::Store => Exception::StorePageFault,
        };
        Trap::new(exception, vaddr)
    })
}

fn alu(op: AluOp, a: u64, b: u64) -> u64 {
    match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Sll => a.wrapping_shl(b as u32 & 0x3F),
        AluOp::Slt => ((a as i64) < (b as i64)) as u64,
        AluOp::Sltu => (a < b) as u64,
        AluOp::Xor => a ^ b,
        AluOp::Srl => a.wrapping_shr(b as u32 & 0x3F),
        AluOp::Sra => ((a as i64).wrapping_shr(b as u32 & 0x3F)) as u64,
        AluOp::Or => a | b,
        AluOp::And => a & b,
    }
}

fn alu32(op: AluOp, a: u32, b: u32) -> u32 {
    match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Sll => a.wrapping_shl(b & 0x1F),
        AluOp::Srl => a.wrapping_shr(b & 0x1F),
        AluOp::Sra => ((a as i32).wrapping_shr(b & 0x1F)) as u32,
        AluOp::Slt | AluOp::Sltu | AluOp::Xor | AluOp::Or | AluOp::And => {
            unreachable!("word-width Slt/Sltu/Xor/Or/And do not exist in the ISA")
        }
    }
}

fn muldiv(op: MulDivOp, a: u64, b: u64) -> u64 {
    match op {
        MulDivOp::Mul => a.wrapping_mul(b),
        MulDivOp::Mulh => (((a as i64 as i128) * (b as i64 as i128)) >> 64) as u64,
        MulDivOp::Mulhsu => (((a as i64 as i128) * (b as u128 as i128)) >> 64) as u64,
        MulDivOp::Mulhu => (((a as u128) * (b as u128)) >> 64) as u64,
        MulDivOp::Div => {
            if b == 0 {
                u64::MAX
            } else if a as i64 == i64::MIN && b as i64 == -1 {
                a
            } else {
                ((a as i64).wrapping_div(b as i64)) as u64
            }
        }
        MulDivOp::Divu => {
            if b == 0 {
                u64::MAX
            } else {
                a / b
            }
        }
        MulDivOp::Rem => {
            if b == 0 {
                a
            } else if a as i64 == i64::MIN && b as i64 == -1 {
                0
            } else {
                ((a as i64).wrapping_rem(b as i64)) as u64
            }
        }
        MulDivOp::Remu => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
    }
}

fn muldiv32(op: MulDivOp, a: u32, b: u32) -> u32 {
    match op {
        MulDivOp::Mul => a.wrapping_mul(b),
        MulDivOp::Div => {
            if b == 0 {
                u32::MAX
            } else if a as i32 == i32::MIN && b as i32 == -1 {
                a
            } else {
                ((a as i32).wrapping_div(b as i32)) as u32
            }
        }
        MulDivOp::Divu => {
            if b == 0 {
                u32::MAX
            } else {
                a / b
            }
        }
        MulDivOp::Rem => {
            if b == 0 {
                a
            } else if a as i32 == i32::MIN && b as i32 == -1 {
                0
            } else {
                ((a as i32).wrapping_rem(b as i32)) as u32
            }
        }
        MulDivOp::Remu => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
        MulDivOp::Mulh | MulDivOp::Mulhsu | MulDivOp::Mulhu => {
            unreachable!("MULHW-style ops do not exist in RV64's *W subset")
        }
    }
}

fn amo_apply(op: AmoOp, old: u64, rhs: u64, width: MemWidth) -> u64 {
    let signed = |v: u64| sign_extend_width(v, width);
    match op {
        AmoOp::Swap => rhs,
        AmoOp::Add => old.wrapping_add(rhs),
        AmoOp::Xor => old ^ rhs,
        AmoOp::And => old & rhs,
        AmoOp::Or => old | rhs,
        AmoOp::Min => if signed(old) <= signed(rhs) { old } else { rhs },
        AmoOp::Max => if signed(old) >= signed(rhs) { old } else { rhs },
        AmoOp::Minu => old.min(rhs),
        AmoOp::Maxu => old.max(rhs),
    }
}

/// Executes one decoded instruction at `pc`, under `privilege`.
pub fn execute<A: StateAccess>(
    access: &mut A,
    tlb: &mut TlbSet,
    privilege: &mut u8,
    pc: u64,
    decoded: Decoded,
) -> Result<Outcome, Trap> {
    let next_pc = pc.wrapping_add(4);
    let mut outcome = Outcome::Continue;

    match decoded {
        Decoded::Lui { rd, imm } => {
            access.write_x(rd, imm as u64);
            access.write_pc(next_pc);
        }
        Decoded::Auipc { rd, imm } => {
            access.write_x(rd, pc.wrapping_add(imm as u64));
            access.write_pc(next_pc);
        }
        Decoded::Jal { rd, imm } => {
            access.write_x(rd, next_pc);
            access.write_pc(pc.wrapping_add(imm as u64));
        }
        Decoded::Jalr { rd, rs1, imm } => {
            let target = (access.read_x(rs1).wrapping_add(imm as u64)) & !1;
            access.write_x(rd, next_pc);
            access.write_pc(target);
        }
        Decoded::Branch { op, rs1, rs2, imm } => {
            let a = access.read_x(rs1);
            let b = access.read_x(rs2);
            let taken = match op {
                BranchOp::Eq => a == b,
                BranchOp::Ne => a != b,
                BranchOp::Lt => (a as i64) < (b as i64),
                BranchOp::Ge => (a as i64) >= (b as i64),
                BranchOp::Ltu => a < b,
                BranchOp::Geu => a >= b,
            };
            access.write_pc(if taken { pc.wrapping_add(imm as u64) } else { next_pc });
        }
        Decoded::Load { rd, rs1, imm, width, signed } => {
            let vaddr = access.read_x(rs1).wrapping_add(imm as u64);
            check_aligned(vaddr, width_bytes(width), Exception::LoadAddressMisaligned)?;
            let paddr = translate_cached(access, tlb, *privilege, vaddr, Intent::Load)?;
            let raw = read_bytes(access, paddr, width_bytes(width)).map_err(Trap::from)?;
            let value = if signed { sign_extend_width(raw, width) as u64 } else { raw };
            access.write_x(rd, value);
            access.write_pc(next_pc);
        }
        Decoded::Store { rs1, rs2, imm, width } => {
            let vaddr = access.read_x(rs1).wrapping_add(imm as u64);
            check_aligned(vaddr, width_bytes(width), Exception::StoreAddressMisaligned)?;
            let paddr = translate_cached(access, tlb, *privilege, vaddr, Intent::Store)?;
            let value = access.read_x(rs2);
            write_bytes(access, paddr, width_bytes(width), value).map_err(Trap::from)?;
            access.write_pc(next_pc);
        }
        Decoded::OpImm { rd, rs1, op, imm } => {
            access.write_x(rd, alu(op, access.read_x(rs1), imm as u64));
            access.write_pc(next_pc);
        }
        Decoded::OpImm32 { rd, rs1, op, imm } => {
            let result = alu32(op, access.read_x(rs1) as u32, imm as u32);
            access.write_x(rd, result as i32 as i64 as u64);
            access.write_pc(next_pc);
        }
        Decoded::Op { rd, rs1, rs2, op } => {
            let a = access.read_x(rs1);
            let b = access.read_x(rs2);
            let result = match op {
                ArithKind::Base(op) => alu(op, a, b),
                ArithKind::MulDiv(op) => muldiv(op, a, b),
            };
            access.write_x(rd, result);
            access.write_pc(next_pc);
        }
        Decoded::Op32 { rd, rs1, rs2, op } => {
            let a = access.read_x(rs1) as u32;
            let b = access.read_x(rs2) as u32;
            let result = match op {
                ArithKind::Base(op) => alu32(op, a, b),
                ArithKind::MulDiv(op) => muldiv32(op, a, b),
            };
            access.write_x(rd, result as i32 as i64 as u64);
            access.write_pc(next_pc);
        }
        Decoded::Fence | Decoded::FenceI => {
            // Single-hart, sequentially consistent memory: both fence forms
            // are no-ops beyond ordering, which this interpreter already is.
            access.write_pc(next_pc);
        }
        Decoded::Ecall => {
            let exception = match *privilege {
                PRV_U => Exception::EcallFromU,
                PRV_S => Exception::EcallFromS,
                _ => Exception::EcallFromM,
            };
            return Err(Trap::new(exception, 0));
        }
        Decoded::Ebreak => return Err(Trap::new(Exception::Breakpoint, pc)),
        Decoded::Csr { rd, csr, source, op } => {
            let old = access.read_csr(csr).map_err(Trap::from)?;
            let operand = match source {
                CsrSource::Reg(r) => access.read_x(r),
                CsrSource::Imm(i) => i as u64,
            };
            let skip_write = matches!(source, CsrSource::Reg(0)) && op != CsrOp::Write;
            if !skip_write {
                let new = match op {
                    CsrOp::Write => operand,
                    CsrOp::Set => old | operand,
                    CsrOp::Clear => old & !operand,
                };
                access.write_csr(csr, new).map_err(Trap::from)?;
                if csr == SATP {
                    tlb.flush_all();
                }
            }
            access.write_x(rd, old);
            access.write_pc(next_pc);
        }
        Decoded::Mret => {
            if *privilege != PRV_M {
                return Err(Trap::new(Exception::IllegalInstruction, 0));
            }
            let mut mstatus = access.read_csr(MSTATUS).map_err(Trap::from)?;
            let mpp = ((mstatus & MSTATUS_MPP) >> MSTATUS_MPP_SHIFT) as u8;
            let mpie = mstatus & MSTATUS_MPIE != 0;
            mstatus = (mstatus & !MSTATUS_MIE) | (if mpie { MSTATUS_MIE } else { 0 });
            mstatus |= MSTATUS_MPIE;
            mstatus &= !MSTATUS_MPP;
            access.write_csr(MSTATUS, mstatus).map_err(Trap::from)?;
            *privilege = mpp;
            tlb.flush_all();
            let mepc = access.read_csr(MEPC).map_err(Trap::from)?;
            access.write_pc(mepc);
        }
        Decoded::Sret => {
            if *privilege == PRV_U {
                return Err(Trap::new(Exception::IllegalInstruction, 0));
            }
            let mut mstatus = access.read_csr(MSTATUS).map_err(Trap::from)?;
            let spp = if mstatus & MSTATUS_SPP != 0 { PRV_S } else { PRV_U };
            let spie = mstatus & MSTATUS_SPIE != 0;
            mstatus = (mstatus & !MSTATUS_SIE) | (if spie { MSTATUS_SIE } else { 0 });
            mstatus |= MSTATUS_SPIE;
            mstatus &= !MSTATUS_SPP;
            access.write_csr(MSTATUS, mstatus).map_err(Trap::from)?;
            *privilege = spp;
            tlb.flush_all();
            let sepc = access.read_csr(SEPC).map_err(Trap::from)?;
            access.write_pc(sepc);
        }
        Decoded::Wfi => {
            access.write_pc(next_pc);
            outcome = Outcome::WaitForInterrupt;
        }
        Decoded::SfenceVma { .. } => {
            tlb.flush_all();
            access.write_pc(next_pc);
        }
        Decoded::Lr { rd, rs1, width, .. } => {
            let vaddr = access.read_x(rs1);
            check_aligned(vaddr, width_bytes(width), Exception::LoadAddressMisaligned)?;
            let paddr = translate_cached(access, tlb, *privilege, vaddr, Intent::Load)?;
            let raw = read_bytes(access, paddr, width_bytes(width)).map_err(Trap::from)?;
            access.write_ilrsc(paddr);
            access.write_x(rd, sign_extend_width(raw, width) as u64);
            access.write_pc(next_pc);
        }
        Decoded::Sc { rd, rs1, rs2, width, .. } => {
            let vaddr = access.read_x(rs1);
            check_aligned(vaddr, width_bytes(width), Exception::StoreAddressMisaligned)?;
            let paddr = translate_cached(access, tlb, *privilege, vaddr, Intent::Store)?;
            let reserved = access.read_ilrsc() == paddr;
            access.write_ilrsc(rvm_core::ILRSC_NONE);
            if reserved {
                let value = access.read_x(rs2);
                write_bytes(access, paddr, width_bytes(width), value).map_err(Trap::from)?;
            }
            access.write_x(rd, if reserved { 0 } else { 1 });
            access.write_pc(next_pc);
        }
        Decoded::Amo { op, rd, rs1, rs2, width, .. } => {
            let vaddr = access.read_x(rs1);
            check_aligned(vaddr, width_bytes(width), Exception::StoreAddressMisaligned)?;
            let paddr = translate_cached(access, tlb, *privilege, vaddr, Intent::Store)?;
            let old = read_bytes(access, paddr, width_bytes(width)).map_err(Trap::from)?;
            let rhs = access.read_x(rs2);
            let new = amo_apply(op, old, rhs, width);
            write_bytes(access, paddr, width_bytes(width), new).map_err(Trap::from)?;
            access.write_x(rd, sign_extend_width(old, width) as u64);
            access.write_pc(next_pc);
        }
    }

    Ok(outcome)
}

fn translate_cached<A: StateAccess>(
    access: &mut A,
    tlb: &mut TlbSet,
    privilege: u8,
    vaddr: u64,
    intent: Intent,
) -> Result<u64, Trap> {
    let cache = match intent {
        Intent::Fetch => &mut tlb.fetch,
        Intent::Load => &mut tlb.load,
        Intent::Store => &mut tlb.store,
    };
    if let Some(paddr) = cache.lookup(vaddr) {
        return Ok(paddr);
    }
    let paddr = translate_or_trap(access, privilege, vaddr, intent)?;
    match intent {
        Intent::Fetch => tlb.fetch.insert(vaddr, paddr),
        Intent::Load => tlb.load.insert(vaddr, paddr),
        Intent::Store => tlb.store.insert(vaddr, paddr),
    }
    Ok(paddr)
}

/// Translates and fetches the 4-byte instruction word at `pc`. Kept separate
/// from [`execute`] since it runs before decode, not as part of it.
pub fn fetch<A: StateAccess>(access: &mut A, tlb: &mut TlbSet, privilege: u8, pc: u64) -> Result<u32, Trap> {
    if pc & 0b11 != 0 {
        return Err(Trap::new(Exception::InstructionAddressMisaligned, pc));
    }
    let paddr = translate_cached(access, tlb, privilege, pc, Intent::Fetch)?;
    let word = read_bytes(access, paddr, 4).map_err(Trap::from)?;
    Ok(word as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Decoded, MemWidth};
    use rvm_core::MachineState;
    use rvm_hal::{PmaEntry, PmaFlags, PmaTable};
    use rvm_state_access::DirectAccess;

    fn machine_with_ram() -> MachineState {
        let mut pma = PmaTable::new();
        pma.push(PmaEntry::memory(0x8000_0000, PmaFlags::ram(), vec![0u8; 0x2000]));
        MachineState::new(pma)
    }

    #[test]
    fn addi_computes_and_advances_pc() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_M;
        access.write_pc(0x8000_0000);
        access.write_x(1, 5);
        let outcome = execute(
            &mut access,
            &mut tlb,
            &mut prv,
            0x8000_0000,
            Decoded::OpImm { rd: 2, rs1: 1, op: AluOp::Add, imm: 10 },
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(access.read_x(2), 15);
        assert_eq!(access.read_pc(), 0x8000_0004);
    }

    #[test]
    fn store_then_load_round_trips_bare_mode() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_M;
        access.write_x(1, 0x8000_0100);
        access.write_x(2, 0xDEAD_BEEF);
        execute(&mut access, &mut tlb, &mut prv, 0, Decoded::Store { rs1: 1, rs2: 2, imm: 0, width: MemWidth::Word })
            .unwrap();
        execute(
            &mut access,
            &mut tlb,
            &mut prv,
            4,
            Decoded::Load { rd: 3, rs1: 1, imm: 0, width: MemWidth::Word, signed: false },
        )
        .unwrap();
        assert_eq!(access.read_x(3), 0xDEAD_BEEF);
    }

    #[test]
    fn ecall_from_u_returns_trap() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_U;
        let err = execute(&mut access, &mut tlb, &mut prv, 0, Decoded::Ecall).unwrap_err();
        assert_eq!(err.exception, Exception::EcallFromU);
    }

    #[test]
    fn lr_sc_pair_succeeds_without_intervening_write() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_M;
        access.write_x(1, 0x8000_0200);
        execute(&mut access, &mut tlb, &mut prv, 0, Decoded::Lr { rd: 2, rs1: 1, width: MemWidth::Double, aqrl: 0 })
            .unwrap();
        access.write_x(3, 77);
        execute(&mut access, &mut tlb, &mut prv, 4, Decoded::Sc { rd: 4, rs1: 1, rs2: 3, width: MemWidth::Double, aqrl: 0 })
            .unwrap();
        assert_eq!(access.read_x(4), 0); // success
        assert_eq!(access.read_memory(0x8000_0200, 3).unwrap(), 77);
    }

    #[test]
    fn sc_without_reservation_fails() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_M;
        access.write_x(1, 0x8000_0300);
        access.write_x(2, 1);
        execute(&mut access, &mut tlb, &mut prv, 0, Decoded::Sc { rd: 5, rs1: 1, rs2: 2, width: MemWidth::Double, aqrl: 0 })
            .unwrap();
        assert_eq!(access.read_x(5), 1); // failure: no reservation was held
    }

    #[test]
    fn amo_add_returns_old_value_and_stores_sum() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_M;
        access.write_memory(0x8000_0400, 3, 10).unwrap();
        access.write_x(1, 0x8000_0400);
        access.write_x(2, 5);
        execute(
            &mut access,
            &mut tlb,
            &mut prv,
            0,
            Decoded::Amo { op: AmoOp::Add, rd: 3, rs1: 1, rs2: 2, width: MemWidth::Double, aqrl: 0 },
        )
        .unwrap();
        assert_eq!(access.read_x(3), 10);
        assert_eq!(access.read_memory(0x8000_0400, 3).unwrap(), 15);
    }

    #[test]
    fn misaligned_load_traps_instead_of_splitting() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_M;
        access.write_x(1, 0x8000_0101); // word load, 1 byte off a 4-byte boundary
        let err = execute(
            &mut access,
            &mut tlb,
            &mut prv,
            0,
            Decoded::Load { rd: 2, rs1: 1, imm: 0, width: MemWidth::Word, signed: false },
        )
        .unwrap_err();
        assert_eq!(err.exception, Exception::LoadAddressMisaligned);
        assert_eq!(err.tval, 0x8000_0101);
    }

    #[test]
    fn misaligned_store_traps_instead_of_splitting() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_M;
        access.write_x(1, 0x8000_0102); // double store, not 8-byte aligned
        access.write_x(2, 0xDEAD_BEEF);
        let err =
            execute(&mut access, &mut tlb, &mut prv, 0, Decoded::Store { rs1: 1, rs2: 2, imm: 0, width: MemWidth::Double })
                .unwrap_err();
        assert_eq!(err.exception, Exception::StoreAddressMisaligned);
    }

    #[test]
    fn aligned_sub_word_load_still_goes_through_the_split_path() {
        let mut state = machine_with_ram();
        let mut access = DirectAccess::new(&mut state);
        let mut tlb = TlbSet::new();
        let mut prv = PRV_M;
        access.write_memory(0x8000_0500, 3, 0x1122_3344_5566_7788).unwrap();
        access.write_x(1, 0x8000_0504); // 4-byte aligned, 4-byte wide: legal, not 8-byte aligned
        execute(
            &mut access,
            &mut tlb,
            &mut prv,
            0,
            Decoded::Load { rd: 2, rs1: 1, imm: 0, width: MemWidth::Word, signed: false },
        )
        .unwrap();
        assert_eq!(access.read_x(2), 0x1122_3344);
    }
}
