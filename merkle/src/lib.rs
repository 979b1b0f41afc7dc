//! Sparse Merkle tree over the machine's 2^64-byte physical address space.
//!
//! The tree never materializes pristine (all-zero) subtrees: their hashes
//! are looked up in a small precomputed table ([`pristine::PristineHashes`])
//! keyed only by level. Only pages that have ever been written are hashed
//! from real bytes; everything above the page level is an explicit sparse
//! node map updated incrementally as pages go dirty.

pub mod hash;
pub mod pristine;
pub mod tree;

pub use hash::Hash;
pub use pristine::PristineHashes;
pub use tree::{MerkleTree, PageSource, Proof};
