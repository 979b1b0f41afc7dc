//! Dehash device: an oracle register bank through which guest code asks the
//! host to resolve a hash to its preimage. Preimage resolution itself lives
//! outside this crate — the device only tracks the request/response
//! registers and reports a [`DhdEffect::Resolve`] for the caller to act on,
//! the same pattern used by [`crate::HtifState`] for console I/O.

/// Byte length of the DHD's MMIO window.
pub const DHD_LENGTH: u64 = 0x1000;

const TSTART_OFFSET: u64 = 0x00;
const TLENGTH_OFFSET: u64 = 0x08;
const DLENGTH_OFFSET: u64 = 0x10;
const HLENGTH_OFFSET: u64 = 0x18;

/// A side effect produced by a DHD register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhdEffect {
    /// The guest has filled in `tstart`/`tlength`/`hlength` and asked the
    /// host to resolve the `hlength`-byte hash at `tstart` to a preimage,
    /// writing at most `dlength` bytes back at `tstart`.
    Resolve,
}

/// DHD register state.
#[derive(Debug, Clone, Default)]
pub struct DhdState {
    /// Guest physical address of the hash/preimage buffer.
    pub tstart: u64,
    /// Buffer capacity in bytes.
    pub tlength: u64,
    /// Length of the resolved preimage, written back by the host after a
    /// successful resolution (0 if none is available, per the Non-goal that
    /// this core carries no built-in preimage source).
    pub dlength: u64,
    /// Length of the hash to resolve, in bytes.
    pub hlength: u64,
}

impl DhdState {
    /// Handles an MMIO read. Only aligned 8-byte reads are supported.
    pub fn mmio_read(&self, offset: u64, size: u64) -> Option<u64> {
        if size != 8 || offset & 7 != 0 {
            return None;
        }
        match offset {
            TSTART_OFFSET => Some(self.tstart),
            TLENGTH_OFFSET => Some(self.tlength),
            DLENGTH_OFFSET => Some(self.dlength),
            HLENGTH_OFFSET => Some(self.hlength),
            _ => None,
        }
    }

    /// Handles an MMIO write. Writing `hlength` is the trigger that asks the
    /// host to resolve the pending hash, matching the reference device's
    /// "last register written commits the request" convention.
    pub fn mmio_write(&mut self, offset: u64, size: u64, value: u64) -> Result<Option<DhdEffect>, ()> {
        if size != 8 || offset & 7 != 0 {
            return Err(());
        }
        match offset {
            TSTART_OFFSET => {
                self.tstart = value;
                Ok(None)
            }
            TLENGTH_OFFSET => {
                self.tlength = value;
                Ok(None)
            }
            DLENGTH_OFFSET => {
                self.dlength = value;
                Ok(None)
            }
            HLENGTH_OFFSET => {
                self.hlength = value;
                Ok(Some(DhdEffect::Resolve))
            }
            _ => Err(()),
        }
    }

    /// Renders the DHD window as a byte image for Merkle hashing.
    pub fn peek_page(&self) -> Vec<u8> {
        let mut buf = vec![0u8; DHD_LENGTH as usize];
        buf[TSTART_OFFSET as usize..TSTART_OFFSET as usize + 8].copy_from_slice(&self.tstart.to_le_bytes());
        buf[TLENGTH_OFFSET as usize..TLENGTH_OFFSET as usize + 8].copy_from_slice(&self.tlength.to_le_bytes());
        buf[DLENGTH_OFFSET as usize..DLENGTH_OFFSET as usize + 8].copy_from_slice(&self.dlength.to_le_bytes());
        buf[HLENGTH_OFFSET as usize..HLENGTH_OFFSET as usize + 8].copy_from_slice(&self.hlength.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writing_hlength_triggers_resolve() {
        let mut d = DhdState::default();
        assert_eq!(d.mmio_write(TSTART_OFFSET, 8, 0x1000), Ok(None));
        assert_eq!(d.mmio_write(HLENGTH_OFFSET, 8, 32), Ok(Some(DhdEffect::Resolve)));
        assert_eq!(d.hlength, 32);
        assert_eq!(d.tstart, 0x1000);
    }

    #[test]
    fn misaligned_write_rejected() {
        let mut d = DhdState::default();
        assert_eq!(d.mmio_write(TSTART_OFFSET, 4, 0), Err(()));
    }
}
