//! Errors a [`crate::StateAccess`] implementation can raise. These are never
//! surfaced to guest code directly — the interpreter turns them into the
//! appropriate trap (access fault) or, for replay, into a verification
//! failure. They are distinct from the host error taxonomy in `rvm-machine`.

use thiserror::Error;

/// Something went wrong servicing a state-access request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// `(paddr, size)` does not lie within any mapped PMA range.
    #[error("no PMA entry maps [{paddr:#x}, +{size}) for access")]
    Unmapped {
        /// Faulting physical address.
        paddr: u64,
        /// Access width in bytes.
        size: u64,
    },
    /// An access to a device range used an unsupported width or offset.
    #[error("device at {paddr:#x} rejected a {size}-byte access at this offset")]
    DeviceRejected {
        /// Faulting physical address.
        paddr: u64,
        /// Access width in bytes.
        size: u64,
    },
    /// An unimplemented CSR address was read or written.
    #[error("CSR {addr:#x} is not implemented by this machine")]
    NoSuchCsr {
        /// The CSR address.
        addr: u16,
    },
    /// A replay access did not match the next expected entry in the log:
    /// wrong kind, address, size, or a proof that failed to verify.
    #[error("replay log mismatch: {0}")]
    ReplayMismatch(String),
    /// The replay log was exhausted before the interpreter stopped reading
    /// or writing state.
    #[error("replay log exhausted")]
    ReplayExhausted,
}
