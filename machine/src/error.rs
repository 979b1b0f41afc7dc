//! Host-side errors: failures in the emulator's own machinery (bad
//! configuration, I/O, an inconsistent persisted image), kept a strictly
//! separate taxonomy from a guest [`rvm_interp::Trap`] — a trap is
//! architectural state the guest observes and handles; a [`HostError`] means
//! the call could not be carried out at all.

use std::path::PathBuf;

use rvm_state_access::AccessError;
use rvm_verifier::VerifyError;

/// Everything that can go wrong calling into a [`crate::Machine`], grouped
/// the way the reference emulator's C API groups its status codes.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A configuration value or call argument was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A value was syntactically fine but semantically impossible (e.g. two
    /// configured ranges overlap).
    #[error("domain error: {0}")]
    DomainError(String),
    /// Something had the wrong length (an image file shorter/longer than
    /// its configured region, a read/write range of zero bytes).
    #[error("length error: {0}")]
    LengthError(String),
    /// An address or index fell outside what this machine has.
    #[error("out of range: {0}")]
    OutOfRange(String),
    /// A precondition the caller was responsible for did not hold (e.g.
    /// `rollback` with no prior `snapshot`).
    #[error("runtime error: {0}")]
    RuntimeError(String),
    /// An arithmetic computation over a configuration value overflowed.
    #[error("overflow error: {0}")]
    OverflowError(String),
    /// Reading or writing a file failed.
    #[error("filesystem error: {0} ({path})", path = .1.display())]
    FilesystemError(String, PathBuf),
    /// A host allocation failed.
    #[error("allocation failed: {0}")]
    BadAlloc(String),
    /// Anything not covered above.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<AccessError> for HostError {
    fn from(err: AccessError) -> Self {
        Self::OutOfRange(err.to_string())
    }
}

impl From<VerifyError> for HostError {
    fn from(err: VerifyError) -> Self {
        Self::RuntimeError(err.to_string())
    }
}

impl HostError {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::FilesystemError(err.to_string(), path.to_path_buf())
    }
}
