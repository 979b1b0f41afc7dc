//! The keyed hash family used for every Merkle node: Keccak-256.

use tiny_keccak::{Hasher, Keccak};

/// A single tree node hash.
pub type Hash = [u8; 32];

/// Hashes a single 8-byte leaf word.
pub fn hash_leaf(word: &[u8]) -> Hash {
    debug_assert_eq!(word.len(), 8);
    let mut k = Keccak::v256();
    k.update(word);
    let mut out = [0u8; 32];
    k.finalize(&mut out);
    out
}

/// Merges two child hashes into their parent's hash.
pub fn merge(left: &Hash, right: &Hash) -> Hash {
    let mut k = Keccak::v256();
    k.update(left);
    k.update(right);
    let mut out = [0u8; 32];
    k.finalize(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_leaf(&[0u8; 8]), hash_leaf(&[0u8; 8]));
        assert_ne!(hash_leaf(&[0u8; 8]), hash_leaf(&[1u8; 8]));
    }

    #[test]
    fn merge_is_order_sensitive() {
        let a = hash_leaf(&[0u8; 8]);
        let b = hash_leaf(&[1u8; 8]);
        assert_ne!(merge(&a, &b), merge(&b, &a));
    }
}
