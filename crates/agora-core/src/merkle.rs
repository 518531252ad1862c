//! Merkle tree over transaction ids.
//!
//! Pairs are concatenated and hashed with SHA3-256 bottom-up; odd-length
//! layers duplicate their last element. The empty tree hashes to
//! SHA3-256 of the empty string, and a single-leaf tree's root is the leaf
//! itself. The root must be recomputable from transaction ids alone at
//! every endpoint, so there is no leaf-level preprocessing.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::types::Hash256;

/// Hash an internal node: `SHA3-256(left ‖ right)`.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}

/// The root of the empty tree: SHA3-256 of the empty string.
pub fn empty_root() -> Hash256 {
    Hash256::digest(&[])
}

/// Compute the merkle root from a slice of leaf values (transaction ids).
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return empty_root();
    }

    let mut current = leaves.to_vec();
    while current.len() > 1 {
        current = next_layer(&current);
    }
    current[0]
}

/// Rebuild the root from `leaves` and compare against `root`.
pub fn verify_root(root: &Hash256, leaves: &[Hash256]) -> bool {
    merkle_root(leaves) == *root
}

/// Compute the next layer of the tree from the current one, duplicating the
/// last element when the layer has an odd number of entries.
fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        next.push(node_hash(left, right));
        i += 2;
    }
    next
}

/// Full merkle tree supporting root computation and membership proofs.
///
/// Stores all intermediate layers so inclusion proofs can be extracted for
/// any leaf.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    /// `layers[0]` = leaves, `layers[last]` = `[root]`.
    layers: Vec<Vec<Hash256>>,
}

impl MerkleTree {
    /// Build a merkle tree from leaf values (transaction ids).
    pub fn from_leaves(leaves: &[Hash256]) -> Self {
        if leaves.is_empty() {
            return Self { layers: Vec::new() };
        }

        let mut layers = vec![leaves.to_vec()];
        while layers.last().map(Vec::len).unwrap_or(0) > 1 {
            let next = next_layer(layers.last().unwrap_or(&Vec::new()));
            layers.push(next);
        }
        Self { layers }
    }

    /// The merkle root. Returns [`empty_root`] for an empty tree.
    pub fn root(&self) -> Hash256 {
        self.layers
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or_else(empty_root)
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        self.layers.first().map(Vec::len).unwrap_or(0)
    }

    /// Generate a membership proof for the leaf at `index`.
    ///
    /// Returns `None` if the index is out of bounds or the tree is empty.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        let leaves = self.layers.first()?;
        if index >= leaves.len() {
            return None;
        }

        let mut path = Vec::new();
        let mut pos = index;

        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling_pos = pos ^ 1;
            let sibling = if sibling_pos < layer.len() {
                layer[sibling_pos]
            } else {
                // Odd layer: the last element pairs with itself.
                layer[pos]
            };
            let side = if pos % 2 == 0 { Side::Right } else { Side::Left };
            path.push(ProofStep { hash: sibling, side });
            pos /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            leaf: leaves[index],
            path,
        })
    }
}

/// Which side a sibling hash is on relative to the current node.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A single step in a merkle membership proof.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ProofStep {
    pub hash: Hash256,
    pub side: Side,
}

/// Membership proof for a single leaf.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf: Hash256,
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Verify this proof against an expected root.
    pub fn verify(&self, expected_root: &Hash256) -> bool {
        let mut current = self.leaf;
        for step in &self.path {
            current = match step.side {
                Side::Left => node_hash(&step.hash, &current),
                Side::Right => node_hash(&current, &step.hash),
            };
        }
        current == *expected_root
    }
}
