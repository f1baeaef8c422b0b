//! Merkle Tree for Audit Proofs
//!
//! Binary Merkle tree over BLAKE3 leaf hashes. Levels with an odd node count pair the
//! last node with itself. Every committed root is retained so receipts issued against an
//! older root remain checkable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hash size in bytes (BLAKE3 output)
pub const HASH_SIZE: usize = 32;

/// Merkle proof containing sibling hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf index in the tree
    pub leaf_index: u64,
    /// Sibling hashes from leaf to root
    pub siblings: Vec<[u8; HASH_SIZE]>,
    /// Root hash this proof validates against
    pub root: [u8; HASH_SIZE],
}

impl MerkleProof {
    /// Verify the proof for a given leaf hash
    pub fn verify(&self, leaf_hash: &[u8; HASH_SIZE]) -> bool {
        let mut current = *leaf_hash;
        let mut index = self.leaf_index;

        for sibling in &self.siblings {
            current = if index % 2 == 0 {
                hash_pair(&current, sibling)
            } else {
                hash_pair(sibling, &current)
            };
            index /= 2;
        }

        current == self.root
    }
}

/// Append-only binary Merkle tree
#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    leaves: Vec<[u8; HASH_SIZE]>,
    /// Committed roots by version
    historic_roots: HashMap<u64, [u8; HASH_SIZE]>,
    version: u64,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tree from existing leaf hashes
    pub fn from_leaves(leaves: Vec<[u8; HASH_SIZE]>) -> Self {
        let mut tree = Self {
            leaves,
            ..Self::default()
        };
        tree.commit();
        tree
    }

    /// Current root hash
    pub fn root(&self) -> Option<[u8; HASH_SIZE]> {
        let levels = self.levels();
        levels.last().and_then(|top| top.first().copied())
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Append a leaf, returning its index
    pub fn append(&mut self, leaf_hash: [u8; HASH_SIZE]) -> u64 {
        self.leaves.push(leaf_hash);
        self.leaves.len() as u64 - 1
    }

    /// Record the current root as a new version
    pub fn commit(&mut self) -> Option<u64> {
        let root = self.root()?;
        self.version += 1;
        self.historic_roots.insert(self.version, root);
        Some(self.version)
    }

    /// Inclusion proof for the leaf at `leaf_index`
    pub fn generate_proof(&self, leaf_index: u64) -> Option<MerkleProof> {
        if leaf_index >= self.leaf_count() {
            return None;
        }

        let levels = self.levels();
        let mut siblings = Vec::with_capacity(levels.len());
        let mut index = leaf_index as usize;

        for level in &levels[..levels.len() - 1] {
            let sibling = if index % 2 == 0 {
                level.get(index + 1).copied().unwrap_or(level[index])
            } else {
                level[index - 1]
            };
            siblings.push(sibling);
            index /= 2;
        }

        Some(MerkleProof {
            leaf_index,
            siblings,
            root: levels.last()?.first().copied()?,
        })
    }

    pub fn historic_root(&self, version: u64) -> Option<[u8; HASH_SIZE]> {
        self.historic_roots.get(&version).copied()
    }

    /// Verify a proof against a committed historic root
    pub fn verify_historic(
        &self,
        leaf_hash: &[u8; HASH_SIZE],
        proof: &MerkleProof,
        version: u64,
    ) -> bool {
        match self.historic_root(version) {
            Some(root) if root == proof.root => proof.verify(leaf_hash),
            _ => false,
        }
    }

    /// All tree levels from leaves to root
    fn levels(&self) -> Vec<Vec<[u8; HASH_SIZE]>> {
        if self.leaves.is_empty() {
            return Vec::new();
        }

        let mut levels = vec![self.leaves.clone()];
        while levels.last().map_or(false, |l| l.len() > 1) {
            let current = &levels[levels.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }
        levels
    }
}

/// Hash two child nodes to create parent
#[inline]
pub fn hash_pair(left: &[u8; HASH_SIZE], right: &[u8; HASH_SIZE]) -> [u8; HASH_SIZE] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Hash data to create leaf hash
#[inline]
pub fn hash_leaf(data: &[u8]) -> [u8; HASH_SIZE] {
    *blake3::hash(data).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::new();
        assert_eq!(tree.leaf_count(), 0);
        assert!(tree.root().is_none());
        assert!(tree.generate_proof(0).is_none());
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let leaf = hash_leaf(b"only");
        let tree = MerkleTree::from_leaves(vec![leaf]);
        assert_eq!(tree.root(), Some(leaf));
        assert!(tree.generate_proof(0).unwrap().verify(&leaf));
    }

    #[test]
    fn test_proofs_for_odd_leaf_count() {
        let leaves: Vec<_> = (0u8..5).map(|i| hash_leaf(&[i])).collect();
        let tree = MerkleTree::from_leaves(leaves.clone());

        for (i, leaf) in leaves.iter().enumerate() {
            let proof = tree.generate_proof(i as u64).unwrap();
            assert!(proof.verify(leaf), "leaf {} failed", i);
            assert!(!proof.verify(&hash_leaf(b"forged")));
        }
    }

    #[test]
    fn test_root_changes_on_append_and_history_kept() {
        let mut tree = MerkleTree::new();
        tree.append(hash_leaf(b"a"));
        let v1 = tree.commit().unwrap();
        let proof_a = tree.generate_proof(0).unwrap();

        tree.append(hash_leaf(b"b"));
        tree.commit();
        assert_ne!(tree.root(), tree.historic_root(v1));

        assert!(tree.verify_historic(&hash_leaf(b"a"), &proof_a, v1));
    }
}
