//! Merkle inclusion proof for a CID in an offer bundle.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::id::ContentId;
use crate::tree::{leaf_hash, node_hash};

/// A Merkle inclusion proof for one CID.
///
/// # Verification
///
/// To verify a proof, the verifier:
/// 1. Starts with the `leaf_hash`
/// 2. For each sibling in `path`:
///    - If `directions[i]` is true, compute `H(current || sibling)`
///    - If `directions[i]` is false, compute `H(sibling || current)`
/// 3. Compares the final hash with the expected root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Hash of the proven leaf
    pub leaf_hash: [u8; 32],

    /// Sibling hashes from leaf to root
    pub path: Vec<[u8; 32]>,

    /// Direction for each sibling: true = sibling is on right, false = on left
    pub directions: Vec<bool>,
}

impl MerkleProof {
    /// Verify this proof against an expected root hash.
    pub fn verify(&self, expected_root: &[u8; 32]) -> bool {
        if self.path.len() != self.directions.len() {
            return false;
        }

        let mut current = self.leaf_hash;

        for (sibling, is_right) in self.path.iter().zip(self.directions.iter()) {
            current = if *is_right {
                node_hash(&current, sibling)
            } else {
                node_hash(sibling, &current)
            };
        }

        current == *expected_root
    }

    /// Verify that this proof is for `cid` and leads to `expected_root`.
    pub fn verify_cid(&self, cid: &ContentId, expected_root: &[u8; 32]) -> bool {
        self.leaf_hash == leaf_hash(cid) && self.verify(expected_root)
    }

    /// Serialize this proof to compact binary format.
    pub fn serialize(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Deserialize a proof from binary format.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the data is malformed.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Returns the depth of the proof (number of tree levels).
    #[inline]
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::CidMerkleTree;

    fn create_test_tree() -> (CidMerkleTree, Vec<ContentId>) {
        let cids: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|s| ContentId::from_data(s.as_bytes()))
            .collect();
        (CidMerkleTree::new(cids.clone()), cids)
    }

    #[test]
    fn test_proof_verification_wrong_root() {
        let (tree, cids) = create_test_tree();
        let proof = tree.generate_proof(&cids[0]).unwrap();

        assert!(proof.verify(&tree.root()));
        assert!(!proof.verify(&[0u8; 32]));
    }

    #[test]
    fn test_proof_for_other_cid_fails() {
        let (tree, cids) = create_test_tree();
        let proof = tree.generate_proof(&cids[0]).unwrap();

        assert!(!proof.verify_cid(&cids[1], &tree.root()));
    }

    #[test]
    fn test_tampered_proof() {
        let (tree, cids) = create_test_tree();
        let mut proof = tree.generate_proof(&cids[2]).unwrap();

        proof.path[0][0] ^= 0xFF;

        assert!(!proof.verify(&tree.root()));
    }

    #[test]
    fn test_mismatched_directions() {
        let (tree, cids) = create_test_tree();
        let mut proof = tree.generate_proof(&cids[2]).unwrap();
        proof.directions.pop();
        assert!(!proof.verify(&tree.root()));
    }

    #[test]
    fn test_serialization() {
        let (tree, cids) = create_test_tree();
        let proof = tree.generate_proof(&cids[1]).unwrap();

        let restored = MerkleProof::deserialize(&proof.serialize()).unwrap();
        assert!(restored.verify_cid(&cids[1], &tree.root()));
        assert!(MerkleProof::deserialize(&[1, 2, 3]).is_err());
    }
}
