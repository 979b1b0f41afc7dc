//! Sv39/Sv48 virtual-address translation.
//!
//! The page-table walk itself ([`translate`]) is generic over
//! [`rvm_state_access::StateAccess`], so every PTE fetch and every
//! accessed/dirty-bit update is just another memory access from the
//! capability set's point of view — it gets Merkle-proved under `step` and
//! replayed under `verify` with no special-casing in either of those
//! layers. [`TlbSet`] is a pure speed optimization for `run`, the
//! unlogged path; `step`/`verify` always walk.

mod tlb;
mod walk;

pub use tlb::{Tlb, TlbSet};
pub use walk::{translate, Intent, TranslationContext, TranslationFault};
