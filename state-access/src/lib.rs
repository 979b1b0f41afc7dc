//! The pivotal state-access abstraction.
//!
//! Every machine operation — register/CSR/memory read or write — goes
//! through one [`StateAccess`] implementation. Three variants present the
//! identical capability set:
//!
//! - [`direct::DirectAccess`]: touches [`rvm_core::MachineState`] directly,
//!   no bookkeeping. Used by `run`.
//! - [`logging::LoggingAccess`]: additionally records each access as a
//!   Merkle-proved [`log::AccessRecord`] against one frozen pre-step root.
//!   Used by `step`.
//! - [`replay::ReplayAccess`]: sourced entirely from a previously recorded
//!   [`log::AccessLog`] and a claimed pre-root; never touches a real
//!   machine. Used by `verify`.
//!
//! The interpreter is generic over `A: StateAccess` and never branches on
//! which variant it was handed.

pub mod device;
mod mem;
mod page_source;

pub mod direct;
pub mod error;
pub mod log;
pub mod logging;
pub mod replay;

pub use device::{ConsoleBackend, DehashResolver, NullConsole, NullResolver, StdConsole};
pub use direct::DirectAccess;
pub use error::AccessError;
pub use log::{AccessKind, AccessLog, AccessRecord, Annotation, LogType};
pub use logging::LoggingAccess;
pub use replay::ReplayAccess;

use rvm_core::Iflags;

/// The complete set of operations the interpreter performs against machine
/// state, implemented identically (modulo bookkeeping) by all three
/// variants.
pub trait StateAccess {
    /// Reads general register `x[reg]` (`reg` in `0..32`; `x0` always reads
    /// as zero).
    fn read_x(&mut self, reg: u8) -> u64;
    /// Writes general register `x[reg]` (writes to `x0` are discarded).
    fn write_x(&mut self, reg: u8, value: u64);

    /// Reads the program counter.
    fn read_pc(&mut self) -> u64;
    /// Writes the program counter.
    fn write_pc(&mut self, value: u64);

    /// Reads a CSR by address, WARL-masked per [`rvm_core::csr::Csrs::read`].
    fn read_csr(&mut self, addr: u16) -> Result<u64, AccessError>;
    /// Writes a CSR by address, WARL-masked on the way in.
    fn write_csr(&mut self, addr: u16, value: u64) -> Result<(), AccessError>;

    /// Reads the packed `iflags` word.
    fn read_iflags(&mut self) -> Iflags;
    /// Writes the packed `iflags` word.
    fn write_iflags(&mut self, iflags: Iflags);

    /// Reads the load-reservation address (`ILRSC_NONE` if idle).
    fn read_ilrsc(&mut self) -> u64;
    /// Writes the load-reservation address directly (used by trap entry to
    /// clear it, and by `lr.*`/`sc.*` through [`rvm_core::MachineState`]'s
    /// own reservation helpers at a higher layer).
    fn write_ilrsc(&mut self, value: u64);

    /// Reads an aligned `2^log2_size`-byte physical memory word.
    fn read_memory(&mut self, paddr: u64, log2_size: u32) -> Result<u64, AccessError>;
    /// Writes an aligned `2^log2_size`-byte physical memory word.
    fn write_memory(&mut self, paddr: u64, log2_size: u32, value: u64) -> Result<(), AccessError>;

    /// Opens a named annotation scope (no-op unless the variant records
    /// annotations).
    fn push_bracket(&mut self, _text: &str) {}
    /// Closes the innermost open annotation scope.
    fn pop_bracket(&mut self) {}
    /// Attaches a freestanding note at the current position in the log.
    fn note(&mut self, _text: &str) {}
}
