//! CID Merkle Tree implementation.
//!
//! A provider commits to a bundle of CIDs with a single merkle root that it
//! signs once. Per-CID inclusion proofs let the bundle be split into
//! [`SubCidOffer`](crate::SubCidOffer)s without re-signing.

use sha2::{Digest, Sha256};

use crate::id::ContentId;
use crate::proof::MerkleProof;

/// A binary Merkle tree over a sorted, de-duplicated set of CIDs.
///
/// # Hashing Rules
///
/// - **Leaf**: `SHA256(0x00 || cid)`
/// - **Internal node**: `SHA256(0x01 || left || right)`
/// - **Empty tree**: `SHA256(b"")`
/// - **Odd leaves**: last node is duplicated
///
/// # Example
///
/// ```rust
/// use fcr_core::{CidMerkleTree, ContentId};
///
/// let cids = vec![ContentId::from_data(b"a"), ContentId::from_data(b"b")];
/// let tree = CidMerkleTree::new(cids.clone());
///
/// let proof = tree.generate_proof(&cids[0]).unwrap();
/// assert!(proof.verify_cid(&cids[0], &tree.root()));
/// ```
#[derive(Debug, Clone)]
pub struct CidMerkleTree {
    /// Sorted CIDs
    cids: Vec<ContentId>,

    /// Tree layers, from leaves (index 0) to root (last index)
    layers: Vec<Vec<[u8; 32]>>,

    /// The root hash
    root: [u8; 32],
}

/// Hash of a single leaf.
pub fn leaf_hash(cid: &ContentId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(cid.as_bytes());
    hasher.finalize().into()
}

/// Hash of an internal node.
pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

impl CidMerkleTree {
    /// Build a tree from a list of CIDs.
    ///
    /// The input is sorted and de-duplicated first so that the same set of
    /// CIDs always produces the same root.
    pub fn new(mut cids: Vec<ContentId>) -> Self {
        cids.sort();
        cids.dedup();

        if cids.is_empty() {
            return Self {
                cids,
                layers: vec![],
                root: Sha256::digest([]).into(),
            };
        }

        let leaves: Vec<[u8; 32]> = cids.iter().map(leaf_hash).collect();
        let (layers, root) = Self::build_tree(leaves);

        Self { cids, layers, root }
    }

    /// Build the Merkle tree layers from leaves to root.
    fn build_tree(leaves: Vec<[u8; 32]>) -> (Vec<Vec<[u8; 32]>>, [u8; 32]) {
        let mut layers = vec![leaves];

        while let Some(current) = layers.last() {
            if current.len() <= 1 {
                break;
            }

            let next_layer: Vec<[u8; 32]> = current
                .chunks(2)
                .map(|pair| {
                    // If odd number of nodes, duplicate the last one
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    node_hash(&pair[0], right)
                })
                .collect();

            layers.push(next_layer);
        }

        let root = layers
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or_else(|| Sha256::digest([]).into());
        (layers, root)
    }

    /// Returns the root hash of the tree.
    #[inline]
    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    /// Returns the number of CIDs in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.cids.len()
    }

    /// Returns true if the tree is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cids.is_empty()
    }

    /// Returns the sorted CIDs.
    pub fn cids(&self) -> &[ContentId] {
        &self.cids
    }

    /// Generate an inclusion proof for `cid`, or `None` if it is not a leaf.
    pub fn generate_proof(&self, cid: &ContentId) -> Option<MerkleProof> {
        let leaf_index = self.cids.binary_search(cid).ok()?;
        self.generate_proof_by_index(leaf_index)
    }

    /// Generate a Merkle proof by leaf index.
    ///
    /// Returns `None` if the index is out of bounds.
    pub fn generate_proof_by_index(&self, leaf_index: usize) -> Option<MerkleProof> {
        if leaf_index >= self.cids.len() || self.layers.is_empty() {
            return None;
        }

        let leaf_hash = self.layers[0][leaf_index];

        let mut path = Vec::new();
        let mut directions = Vec::new();
        let mut idx = leaf_index;

        // Traverse from leaf layer (0) up to second-to-last layer
        for layer in self.layers.iter().take(self.layers.len().saturating_sub(1)) {
            if idx % 2 == 0 {
                // Current is left child, sibling is right (or self when odd)
                path.push(*layer.get(idx + 1).unwrap_or(&layer[idx]));
                directions.push(true);
            } else {
                path.push(layer[idx - 1]);
                directions.push(false);
            }

            idx /= 2;
        }

        Some(MerkleProof {
            leaf_hash,
            path,
            directions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cids(n: usize) -> Vec<ContentId> {
        (0..n)
            .map(|i| ContentId::from_data(format!("block-{}", i).as_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = CidMerkleTree::new(vec![]);

        let expected: [u8; 32] = Sha256::digest([]).into();
        assert_eq!(tree.root(), expected);
        assert!(tree.is_empty());
        assert!(tree.generate_proof_by_index(0).is_none());
    }

    #[test]
    fn test_single_leaf() {
        let input = cids(1);
        let tree = CidMerkleTree::new(input.clone());

        // Single leaf: root = leaf_hash
        assert_eq!(tree.root(), leaf_hash(&input[0]));
        assert_eq!(tree.len(), 1);

        let proof = tree.generate_proof(&input[0]).unwrap();
        assert_eq!(proof.depth(), 0);
        assert!(proof.verify_cid(&input[0], &tree.root()));
    }

    #[test]
    fn test_two_leaves() {
        let input = cids(2);
        let tree = CidMerkleTree::new(input);

        let sorted = tree.cids();
        let expected = node_hash(&leaf_hash(&sorted[0]), &leaf_hash(&sorted[1]));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_order_independent_root() {
        let mut input = cids(5);
        let a = CidMerkleTree::new(input.clone());
        input.reverse();
        let first = input[0];
        input.push(first);
        let b = CidMerkleTree::new(input);

        assert_eq!(a.root(), b.root());
        assert_eq!(b.len(), 5);
    }

    #[test]
    fn test_odd_number_of_leaves() {
        let input = cids(7);
        let tree = CidMerkleTree::new(input.clone());

        for cid in &input {
            let proof = tree.generate_proof(cid).unwrap();
            assert!(proof.verify_cid(cid, &tree.root()));
        }
    }

    #[test]
    fn test_proof_not_found() {
        let tree = CidMerkleTree::new(cids(3));
        assert!(tree.generate_proof(&ContentId::from_data(b"other")).is_none());
    }
}
