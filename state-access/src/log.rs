//! The access log produced by `step()` and consumed by the replay verifier.

use rvm_merkle::Proof;

/// Kind of one logged access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// A state read.
    Read,
    /// A state write.
    Write,
}

/// One logged state access: an aligned word of `2^log2_size` bytes, its
/// value(s), and a Merkle proof of the pre-state value against the pre-state
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    /// Read or write.
    pub kind: AccessKind,
    /// Physical address, aligned to `2^log2_size`.
    pub address: u64,
    /// Access width as a log2 exponent, in `[3, 64]`.
    pub log2_size: u32,
    /// The `2^log2_size` bytes present before the access.
    pub read_data: Vec<u8>,
    /// The `2^log2_size` bytes present after the access, for writes only.
    pub written_data: Option<Vec<u8>>,
    /// Proof of `read_data` against the pre-access root.
    pub proof: Proof,
}

/// An annotation bracketing or describing a span of the log. Informational
/// only: it never affects verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// Marks the start of a named scope.
    BeginScope(String),
    /// Marks the end of the most recently opened scope.
    EndScope,
    /// A freestanding note attached to the current position in the log.
    Note(String),
}

/// The full log produced by one `step()`: a sequence of accesses plus
/// annotations, addressable by whether notes were requested at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessLog {
    /// Accesses in the order they occurred.
    pub accesses: Vec<AccessRecord>,
    /// Annotations, interleaved with accesses by the position they were
    /// emitted at (index into `accesses` at time of emission).
    pub annotations: Vec<(usize, Annotation)>,
}

impl AccessLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Whether a `step()` call should record annotations in addition to
/// accesses. Matches the reference emulator's two logging detail levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogType {
    /// Record accesses only.
    #[default]
    Accesses,
    /// Record accesses and annotations.
    AccessesAndAnnotations,
}
