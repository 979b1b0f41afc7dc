//! The sparse Merkle tree itself: page-root hashes below the page level,
//! computed fresh from page bytes on each rehash, and an explicit sparse
//! node map above the page level, updated incrementally along each dirty
//! page's path to the root.

use std::collections::{HashMap, HashSet};

use rvm_hal::{PAGE_SIZE, TREE_LEAF_LOG2_SIZE, TREE_PAGE_LOG2_SIZE};

use crate::hash::{hash_leaf, merge, Hash};
use crate::pristine::PristineHashes;

/// Supplies page contents to the tree during a rehash. `None` means the
/// page is pristine (all-zero); the tree substitutes the precomputed
/// pristine hash rather than hashing 4096 zero bytes.
pub trait PageSource {
    /// Returns the `PAGE_SIZE`-byte contents of the page starting at the
    /// page-aligned address `page_addr`, or `None` if it is pristine.
    fn peek_page(&self, page_addr: u64) -> Option<Vec<u8>>;
}

/// A Merkle inclusion proof for one node against a specific root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    /// Address of the proven node (aligned to `2^log2_size`).
    pub address: u64,
    /// Size of the proven node, as a log2 exponent.
    pub log2_size: u32,
    /// Hash of the proven node itself.
    pub target_hash: Hash,
    /// Sibling hashes from `log2_size` up to (but not including) the root,
    /// in ascending level order.
    pub siblings: Vec<Hash>,
    /// The root hash this proof was generated against.
    pub root_hash: Hash,
}

impl Proof {
    /// Recomputes the root from `target_hash` and `siblings` and checks it
    /// matches `root_hash`. Used by the verifier to check a logged access.
    pub fn verify(&self) -> bool {
        let mut addr = self.address;
        let mut hash = self.target_hash;
        let mut log2 = self.log2_size;
        for sibling in &self.siblings {
            let higher = log2 + 1;
            let parent_start = align_down(addr, higher);
            let is_left = addr == parent_start;
            hash = if is_left { merge(&hash, sibling) } else { merge(sibling, &hash) };
            addr = parent_start;
            log2 = higher;
        }
        log2 == 64 && hash == self.root_hash
    }

    /// Recomputes what the root would become if `self.target_hash` were
    /// replaced by `new_leaf_hash`, folding up through `self.siblings` the
    /// same way [`Self::verify`] does. Used by the step-log verifier to
    /// derive a post-step root from a write's pre-step proof without a real
    /// tree: the sibling hashes are unaffected by changing this one leaf, so
    /// the same path recomputes the new root.
    pub fn fold_with(&self, new_leaf_hash: Hash) -> Hash {
        let mut addr = self.address;
        let mut hash = new_leaf_hash;
        let mut log2 = self.log2_size;
        for sibling in &self.siblings {
            let higher = log2 + 1;
            let parent_start = align_down(addr, higher);
            let is_left = addr == parent_start;
            hash = if is_left { merge(&hash, sibling) } else { merge(sibling, &hash) };
            addr = parent_start;
            log2 = higher;
        }
        hash
    }
}

/// The tree: a pristine-hash table, a sparse map of touched page roots, a
/// sparse map of touched internal nodes above the page level, and the
/// current root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    pristine: PristineHashes,
    page_roots: HashMap<u64, Hash>,
    nodes: HashMap<(u64, u32), Hash>,
    root: Hash,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleTree {
    /// An empty tree over an entirely pristine address space.
    pub fn new() -> Self {
        let pristine = PristineHashes::new();
        let root = pristine.at(64);
        Self { pristine, page_roots: HashMap::new(), nodes: HashMap::new(), root }
    }

    /// The current root hash.
    pub const fn root(&self) -> Hash {
        self.root
    }

    /// Hash of the node at `(addr, log2_size)`, falling back to the
    /// pristine hash when the node has never been touched.
    fn node_hash(&self, addr: u64, log2_size: u32) -> Hash {
        if log2_size == TREE_PAGE_LOG2_SIZE {
            self.page_roots.get(&addr).copied().unwrap_or_else(|| self.pristine.at(log2_size))
        } else {
            self.nodes.get(&(addr, log2_size)).copied().unwrap_or_else(|| self.pristine.at(log2_size))
        }
    }

    /// Rehashes every page in `dirty_pages`, using `source` to fetch page
    /// contents, and propagates each change up to the root. Pages absent
    /// from `dirty_pages` are assumed unchanged since the last call.
    pub fn update<S: PageSource>(&mut self, dirty_pages: &HashSet<u64>, source: &S) {
        for &page_addr in dirty_pages {
            let page_addr = page_addr & !(PAGE_SIZE - 1);
            let new_root = match source.peek_page(page_addr) {
                Some(bytes) => hash_page(&bytes),
                None => self.pristine.at(TREE_PAGE_LOG2_SIZE),
            };
            if new_root == self.pristine.at(TREE_PAGE_LOG2_SIZE) {
                self.page_roots.remove(&page_addr);
            } else {
                self.page_roots.insert(page_addr, new_root);
            }
            self.propagate(page_addr, TREE_PAGE_LOG2_SIZE, new_root);
        }
    }

    /// Walks from `(addr, log2_size)` up to the root, recomputing each
    /// ancestor's hash. Stops early once an ancestor's hash is unchanged,
    /// since nothing above it can differ either.
    fn propagate(&mut self, mut addr: u64, mut log2_size: u32, mut hash: Hash) {
        while log2_size < 64 {
            let higher = log2_size + 1;
            let parent_start = addr & !(bit(log2_size));
            let is_left = addr == parent_start;
            let sibling_start = if is_left { parent_start | bit(log2_size) } else { parent_start };
            let sibling_hash = self.node_hash(sibling_start, log2_size);
            let parent_hash = if is_left { merge(&hash, &sibling_hash) } else { merge(&sibling_hash, &hash) };

            if higher == 64 {
                self.root = parent_hash;
                return;
            }

            let previous = self.node_hash(parent_start, higher);
            if previous == parent_hash {
                return;
            }
            if parent_hash == self.pristine.at(higher) {
                self.nodes.remove(&(parent_start, higher));
            } else {
                self.nodes.insert((parent_start, higher), parent_hash);
            }

            addr = parent_start;
            log2_size = higher;
            hash = parent_hash;
        }
    }

    /// Produces an inclusion proof for the node at `(addr, log2_size)`
    /// against the current root. `source` supplies the page containing
    /// `addr` when `log2_size` is below the page level.
    pub fn proof<S: PageSource>(&self, addr: u64, log2_size: u32, source: &S) -> Proof {
        let node_start = align_down(addr, log2_size);

        let (target_hash, mut siblings, mut level, mut cursor) = if log2_size < TREE_PAGE_LOG2_SIZE {
            let page_addr = align_down(addr, TREE_PAGE_LOG2_SIZE);
            let bytes = source.peek_page(page_addr);
            let (hash, within_page_siblings) =
                page_path(&self.pristine, bytes.as_deref(), page_addr, node_start, log2_size);
            (hash, within_page_siblings, TREE_PAGE_LOG2_SIZE, page_addr)
        } else {
            (self.node_hash(node_start, log2_size), Vec::new(), log2_size, node_start)
        };

        while level < 64 {
            let sibling_start = align_down(cursor, level) ^ bit(level);
            siblings.push(self.node_hash(sibling_start, level));
            cursor = align_down(cursor, level + 1);
            level += 1;
        }

        Proof { address: node_start, log2_size, target_hash, siblings, root_hash: self.root }
    }
}

/// `1 << log2_size`, saturating to 0 at `log2_size == 64` (the whole address
/// space) instead of overflowing the shift.
const fn bit(log2_size: u32) -> u64 {
    if log2_size >= 64 {
        0
    } else {
        1u64 << log2_size
    }
}

const fn align_down(addr: u64, log2_size: u32) -> u64 {
    addr & !(bit(log2_size).wrapping_sub(1))
}

/// Hashes a full `PAGE_SIZE`-byte page into its page-root hash.
fn hash_page(bytes: &[u8]) -> Hash {
    debug_assert_eq!(bytes.len() as u64, PAGE_SIZE);
    let mut level: Vec<Hash> = bytes.chunks_exact(8).map(hash_leaf).collect();
    while level.len() > 1 {
        level = level.chunks(2).map(|pair| merge(&pair[0], &pair[1])).collect();
    }
    level[0]
}

/// Computes the hash of the node at `(node_start, log2_size)` within the
/// page at `page_addr`, plus the sibling hashes on the path from
/// `log2_size` up to the page level (exclusive of the page-root itself).
fn page_path(
    pristine: &PristineHashes,
    bytes: Option<&[u8]>,
    page_addr: u64,
    node_start: u64,
    log2_size: u32,
) -> (Hash, Vec<Hash>) {
    let Some(bytes) = bytes else {
        return (pristine.at(log2_size), vec![pristine.at(log2_size); (TREE_PAGE_LOG2_SIZE - log2_size) as usize]);
    };

    let mut level: Vec<Hash> = bytes.chunks_exact(8).map(hash_leaf).collect();
    let mut cur_log2 = TREE_LEAF_LOG2_SIZE;
    let mut idx = ((node_start - page_addr) >> TREE_LEAF_LOG2_SIZE) as usize;

    while cur_log2 < log2_size {
        level = level.chunks(2).map(|pair| merge(&pair[0], &pair[1])).collect();
        idx /= 2;
        cur_log2 += 1;
    }

    let mut siblings = Vec::new();
    while cur_log2 < TREE_PAGE_LOG2_SIZE {
        siblings.push(level[idx ^ 1]);
        level = level.chunks(2).map(|pair| merge(&pair[0], &pair[1])).collect();
        idx /= 2;
        cur_log2 += 1;
    }

    (level[idx], siblings)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource {
        pages: HashMap<u64, Vec<u8>>,
    }

    impl PageSource for FakeSource {
        fn peek_page(&self, page_addr: u64) -> Option<Vec<u8>> {
            self.pages.get(&page_addr).cloned()
        }
    }

    #[test]
    fn empty_tree_root_is_top_pristine_hash() {
        let tree = MerkleTree::new();
        let pristine = PristineHashes::new();
        assert_eq!(tree.root(), pristine.at(64));
    }

    #[test]
    fn single_dirty_page_changes_root() {
        let mut tree = MerkleTree::new();
        let mut page = vec![0u8; PAGE_SIZE as usize];
        page[0] = 0xff;
        let source = FakeSource { pages: HashMap::from([(0x1000, page)]) };
        let before = tree.root();
        tree.update(&HashSet::from([0x1000]), &source);
        assert_ne!(tree.root(), before);
    }

    #[test]
    fn reverting_page_to_zero_restores_pristine_root() {
        let mut tree = MerkleTree::new();
        let pristine_root = tree.root();
        let mut page = vec![0u8; PAGE_SIZE as usize];
        page[0] = 1;
        let dirty_source = FakeSource { pages: HashMap::from([(0x2000, page)]) };
        tree.update(&HashSet::from([0x2000]), &dirty_source);
        assert_ne!(tree.root(), pristine_root);

        let clean_source = FakeSource { pages: HashMap::new() };
        tree.update(&HashSet::from([0x2000]), &clean_source);
        assert_eq!(tree.root(), pristine_root);
    }

    #[test]
    fn proof_verifies_against_root() {
        let mut tree = MerkleTree::new();
        let mut page = vec![0u8; PAGE_SIZE as usize];
        page[16] = 7;
        let source = FakeSource { pages: HashMap::from([(0x3000, page)]) };
        tree.update(&HashSet::from([0x3000]), &source);

        let proof = tree.proof(0x3000 + 16, 3, &source);
        assert_eq!(proof.root_hash, tree.root());
        assert!(proof.verify());
    }

    #[test]
    fn proof_for_pristine_page_verifies() {
        let tree = MerkleTree::new();
        let source = FakeSource { pages: HashMap::new() };
        let proof = tree.proof(0x9000, 12, &source);
        assert!(proof.verify());
    }

    #[test]
    fn fold_with_matches_a_real_update() {
        let mut tree = MerkleTree::new();
        let mut page = vec![0u8; PAGE_SIZE as usize];
        let source_before = FakeSource { pages: HashMap::from([(0x4000, page.clone())]) };
        tree.update(&HashSet::from([0x4000]), &source_before);
        let proof = tree.proof(0x4000 + 8, 3, &source_before);

        page[8] = 0xAB;
        let source_after = FakeSource { pages: HashMap::from([(0x4000, page)]) };
        tree.update(&HashSet::from([0x4000]), &source_after);

        let new_leaf = hash_leaf(&[0xAB, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(proof.fold_with(new_leaf), tree.root());
    }
}
