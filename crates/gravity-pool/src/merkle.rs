//! append-only commitment accumulator
//!
//! fixed depth D, capacity 2^D. every layer is kept so an insert touches
//! exactly one node per level and membership paths are read straight out of
//! the layers. unfilled slots hash as the precomputed empty subtree of their
//! height.
//!
//! the gate accepts proofs against any root in a bounded history window, so
//! a proof built before unrelated inserts still verifies while its root is
//! remembered.

use std::collections::VecDeque;

use ark_bn254::Fr;

use crate::codec::{empty_leaf, hash_node, Commitment, Root};
use crate::error::{PoolError, Result};
use crate::field::{FieldElement, FIELD_BYTES};

/// largest supported depth
pub const MAX_DEPTH: usize = 32;

pub struct MerkleTree {
    depth: usize,
    /// layers[0] are the leaves, layers[depth] holds the root once non-empty
    layers: Vec<Vec<Fr>>,
    /// zeros[h] = root of an empty subtree of height h
    zeros: Vec<Fr>,
    /// recent roots, oldest first, current root last
    roots: VecDeque<Root>,
    history: usize,
}

impl MerkleTree {
    pub fn new(depth: usize, history: usize) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(PoolError::InvalidConfig(format!(
                "tree depth {} outside 1..={}",
                depth, MAX_DEPTH
            )));
        }
        if history == 0 {
            return Err(PoolError::InvalidConfig("root history must hold at least one root".into()));
        }

        let zeros = empty_subtrees(depth);
        let mut roots = VecDeque::with_capacity(history);
        roots.push_back(Root::from(zeros[depth]));

        Ok(Self {
            depth,
            layers: vec![Vec::new(); depth + 1],
            zeros,
            roots,
            history,
        })
    }

    /// append a leaf at the next free index, O(depth)
    pub fn insert(&mut self, leaf: Commitment) -> Result<u64> {
        if self.is_full() {
            return Err(PoolError::TreeFull {
                capacity: self.capacity(),
            });
        }

        let index = self.layers[0].len();
        self.layers[0].push(leaf.inner());

        let mut pos = index;
        for h in 0..self.depth {
            let left = pos & !1;
            let l = self.node(h, left);
            let r = self.node(h, left + 1);
            let parent = hash_node(l, r);

            pos >>= 1;
            let layer = &mut self.layers[h + 1];
            if pos == layer.len() {
                layer.push(parent);
            } else {
                layer[pos] = parent;
            }
        }

        if self.roots.len() == self.history {
            self.roots.pop_front();
        }
        self.roots.push_back(self.root());

        Ok(index as u64)
    }

    fn node(&self, height: usize, pos: usize) -> Fr {
        self.layers[height].get(pos).copied().unwrap_or(self.zeros[height])
    }

    pub fn root(&self) -> Root {
        Root::from(self.node(self.depth, 0))
    }

    /// true if `root` is the current root or still inside the history window
    pub fn is_known_root(&self, root: &Root) -> bool {
        self.roots.iter().rev().any(|r| r == root)
    }

    /// oldest first
    pub fn known_roots(&self) -> Vec<Root> {
        self.roots.iter().copied().collect()
    }

    /// membership path for the leaf at `index` against the current root
    pub fn prove(&self, index: u64) -> Result<MerkleProof> {
        let leaf = self
            .leaf(index)
            .ok_or(PoolError::UnknownLeaf { index })?;

        let mut siblings = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);
        let mut pos = index as usize;
        for h in 0..self.depth {
            siblings.push(self.node(h, pos ^ 1));
            indices.push(pos & 1 == 1);
            pos >>= 1;
        }

        Ok(MerkleProof {
            leaf,
            siblings,
            indices,
        })
    }

    pub fn leaf(&self, index: u64) -> Option<Fr> {
        self.layers[0].get(index as usize).copied()
    }

    pub fn len(&self) -> u64 {
        self.layers[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

impl core::fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MerkleTree")
            .field("depth", &self.depth)
            .field("len", &self.len())
            .field("root", &self.root())
            .finish()
    }
}

fn empty_subtrees(depth: usize) -> Vec<Fr> {
    let mut zeros = Vec::with_capacity(depth + 1);
    zeros.push(empty_leaf());
    for h in 0..depth {
        zeros.push(hash_node(zeros[h], zeros[h]));
    }
    zeros
}

/// `(leaf, siblings, indices)`; `indices[h]` is true when the path node at
/// height h is a right child
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: Fr,
    pub siblings: Vec<Fr>,
    pub indices: Vec<bool>,
}

impl MerkleProof {
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    pub fn verify(&self, root: &Root) -> bool {
        verify_membership(self.leaf, &self.siblings, &self.indices, root.inner())
    }

    /// leaf position encoded by the direction bits
    pub fn leaf_index(&self) -> u64 {
        self.indices
            .iter()
            .rev()
            .fold(0u64, |acc, bit| (acc << 1) | u64::from(*bit))
    }

    /// leaf || sibling_0..sibling_{D-1} || bit_0..bit_{D-1}
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIELD_BYTES * (1 + self.depth()) + self.depth());
        out.extend_from_slice(&FieldElement(self.leaf).to_be_bytes());
        for s in &self.siblings {
            out.extend_from_slice(&FieldElement(*s).to_be_bytes());
        }
        out.extend(self.indices.iter().map(|b| u8::from(*b)));
        out
    }

    /// decode a path for a tree of `depth`; bit bytes must be 0 or 1
    pub fn from_bytes(bytes: &[u8], depth: usize) -> Result<Self> {
        let expected = FIELD_BYTES * (1 + depth) + depth;
        if bytes.len() != expected {
            return Err(PoolError::InvalidEncoding(format!(
                "merkle proof is {} bytes, depth {} needs {}",
                bytes.len(),
                depth,
                expected
            )));
        }

        let (elements, bits) = bytes.split_at(FIELD_BYTES * (1 + depth));
        let mut elements = elements
            .chunks_exact(FIELD_BYTES)
            .map(|c| FieldElement::from_be_bytes(c).map(|fe| fe.0));
        let leaf = elements
            .next()
            .ok_or_else(|| PoolError::InvalidEncoding("missing leaf".into()))??;
        let siblings = elements.collect::<Result<Vec<_>>>()?;

        let indices = bits
            .iter()
            .map(|b| match b {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(PoolError::InvalidEncoding(format!("direction byte {}", other))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            leaf,
            siblings,
            indices,
        })
    }
}

/// recompute the root from `leaf` along `siblings`, steering by `indices`
///
/// directions are taken from `indices` only, never inferred from node values
pub fn verify_membership(leaf: Fr, siblings: &[Fr], indices: &[bool], root: Fr) -> bool {
    if siblings.len() != indices.len() {
        return false;
    }
    let computed = siblings
        .iter()
        .zip(indices)
        .fold(leaf, |node, (sibling, is_right)| {
            if *is_right {
                hash_node(*sibling, node)
            } else {
                hash_node(node, *sibling)
            }
        });
    computed == root
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaf(i: u64) -> Commitment {
        Commitment::from(Fr::from(1000 + i))
    }

    /// recompute the root from scratch over a padded leaf layer
    fn naive_root(leaves: &[Fr], depth: usize) -> Fr {
        let mut layer: Vec<Fr> = leaves.to_vec();
        layer.resize(1 << depth, empty_leaf());
        while layer.len() > 1 {
            layer = layer.chunks_exact(2).map(|c| hash_node(c[0], c[1])).collect();
        }
        layer[0]
    }

    #[test]
    fn test_empty_root() {
        let tree = MerkleTree::new(4, 8).unwrap();
        assert_eq!(tree.root().inner(), naive_root(&[], 4));
        assert!(tree.is_known_root(&tree.root()));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_incremental_matches_naive() {
        let mut tree = MerkleTree::new(4, 32).unwrap();
        let mut leaves = Vec::new();
        for i in 0..11 {
            tree.insert(leaf(i)).unwrap();
            leaves.push(leaf(i).inner());
            assert_eq!(tree.root().inner(), naive_root(&leaves, 4));
        }
    }

    #[test]
    fn test_prove_verify_each_leaf() {
        let mut tree = MerkleTree::new(5, 32).unwrap();
        for i in 0..13 {
            let index = tree.insert(leaf(i)).unwrap();
            assert_eq!(index, i);
        }
        let root = tree.root();
        for i in 0..13 {
            let proof = tree.prove(i).unwrap();
            assert_eq!(proof.leaf_index(), i);
            assert!(proof.verify(&root));
        }
    }

    #[test]
    fn test_old_proof_verifies_against_historical_root() {
        let mut tree = MerkleTree::new(4, 8).unwrap();
        tree.insert(leaf(0)).unwrap();
        let proof = tree.prove(0).unwrap();
        let old_root = tree.root();

        for i in 1..5 {
            tree.insert(leaf(i)).unwrap();
        }
        assert_ne!(tree.root(), old_root);
        assert!(!proof.verify(&tree.root()));
        assert!(proof.verify(&old_root));
        assert!(tree.is_known_root(&old_root));

        // a fresh proof for the same leaf tracks the current root
        assert!(tree.prove(0).unwrap().verify(&tree.root()));
    }

    #[test]
    fn test_root_history_is_bounded() {
        let mut tree = MerkleTree::new(4, 3).unwrap();
        let initial = tree.root();
        tree.insert(leaf(0)).unwrap();
        let first = tree.root();
        tree.insert(leaf(1)).unwrap();
        tree.insert(leaf(2)).unwrap();
        tree.insert(leaf(3)).unwrap();

        assert_eq!(tree.known_roots().len(), 3);
        assert!(!tree.is_known_root(&initial));
        assert!(!tree.is_known_root(&first));
        assert_eq!(tree.known_roots().last(), Some(&tree.root()));
    }

    #[test]
    fn test_tree_full() {
        let mut tree = MerkleTree::new(2, 4).unwrap();
        for i in 0..4 {
            tree.insert(leaf(i)).unwrap();
        }
        assert!(tree.is_full());
        assert_eq!(tree.insert(leaf(9)), Err(PoolError::TreeFull { capacity: 4 }));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_direction_bits_authenticated() {
        let mut tree = MerkleTree::new(4, 4).unwrap();
        for i in 0..6 {
            tree.insert(leaf(i)).unwrap();
        }
        let mut proof = tree.prove(3).unwrap();
        proof.indices[0] = !proof.indices[0];
        assert!(!proof.verify(&tree.root()));

        let mut short = tree.prove(3).unwrap();
        short.indices.pop();
        assert!(!short.verify(&tree.root()));
    }

    #[test]
    fn test_wire_format() {
        let mut tree = MerkleTree::new(4, 4).unwrap();
        for i in 0..3 {
            tree.insert(leaf(i)).unwrap();
        }
        let proof = tree.prove(2).unwrap();
        let bytes = proof.to_bytes();
        assert_eq!(bytes.len(), 32 * 5 + 4);
        assert_eq!(&bytes[160..], &[0, 1, 0, 0]);
        assert_eq!(MerkleProof::from_bytes(&bytes, 4).unwrap(), proof);

        assert!(MerkleProof::from_bytes(&bytes, 5).is_err());
        let mut bad = bytes.clone();
        bad[161] = 2;
        assert!(MerkleProof::from_bytes(&bad, 4).is_err());
    }

    #[test]
    fn test_invalid_params() {
        assert!(MerkleTree::new(0, 4).is_err());
        assert!(MerkleTree::new(33, 4).is_err());
        assert!(MerkleTree::new(4, 0).is_err());
        let tree = MerkleTree::new(4, 4).unwrap();
        assert_eq!(tree.prove(0), Err(PoolError::UnknownLeaf { index: 0 }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_proofs_survive_appends(values in proptest::collection::vec(any::<u64>(), 1..20)) {
            let mut tree = MerkleTree::new(5, 64).unwrap();
            let mut snapshots = Vec::new();
            for v in &values {
                let index = tree.insert(Commitment::from(Fr::from(*v))).unwrap();
                snapshots.push((tree.prove(index).unwrap(), tree.root()));
            }
            for (proof, root) in &snapshots {
                prop_assert!(proof.verify(root));
                prop_assert!(tree.is_known_root(root));
            }
        }
    }
}
