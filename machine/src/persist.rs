//! The on-disk layout [`crate::Machine::store`] writes and [`crate::Machine::load`]
//! reads back: one JSON manifest (configuration plus a root hash) and one
//! raw binary dump per memory PMA range, named by that range's start
//! address so `load` can reassemble them without guessing an order.

use serde::{Deserialize, Serialize};

use crate::config::MachineConfig;

pub(crate) const MANIFEST_FILE: &str = "machine.json";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub(crate) config: MachineConfig,
    pub(crate) root_hash: String,
    pub(crate) memory_dumps: Vec<MemoryDump>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MemoryDump {
    pub(crate) start: u64,
    pub(crate) file: String,
}

pub(crate) fn dump_filename(start: u64) -> String {
    format!("mem_{start:016x}.bin")
}

pub(crate) fn hex_encode(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn hex_decode(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let hash = [0xABu8; 32];
        assert_eq!(hex_decode(&hex_encode(&hash)), Some(hash));
    }

    #[test]
    fn hex_decode_rejects_wrong_length() {
        assert_eq!(hex_decode("ab"), None);
    }
}
