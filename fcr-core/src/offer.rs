//! Signed content offers.
//!
//! An [`Offer`] is a provider's signed promise to deliver any CID of a bundle
//! at `price` until `expiry`. The signature covers the bundle's merkle root,
//! never the CID list itself, so a [`SubCidOffer`] for a single CID carries
//! the same signature plus a merkle inclusion proof and can be verified
//! without seeing the rest of the bundle.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::id::{ContentId, NodeId};
use crate::proof::MerkleProof;
use crate::signing::{verify_message, KeyVersion, MessageSigner};
use crate::tree::CidMerkleTree;

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Bytes covered by an offer signature.
fn signable_bytes(provider: &NodeId, merkle_root: &[u8; 32], price: u64, expiry: u64, qos: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 32 + 24);
    out.extend_from_slice(provider.as_bytes());
    out.extend_from_slice(merkle_root);
    out.extend_from_slice(&price.to_be_bytes());
    out.extend_from_slice(&expiry.to_be_bytes());
    out.extend_from_slice(&qos.to_be_bytes());
    out
}

fn expires_within(expiry: u64, now: u64, window: Duration) -> bool {
    expiry <= now.saturating_add(window.as_secs())
}

/// A provider's signed offer for a bundle of CIDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Provider that will serve the content
    pub provider: NodeId,
    /// Sorted, de-duplicated CIDs in the bundle
    pub cids: Vec<ContentId>,
    /// Merkle root over `cids`
    pub merkle_root: [u8; 32],
    /// Price of retrieving one CID of the bundle
    pub price: u64,
    /// Unix seconds after which the offer is void
    pub expiry: u64,
    /// Provider-declared quality-of-service tier
    pub qos: u64,
    /// Provider's signature with its offer-signing key
    pub signature: Vec<u8>,
}

impl Offer {
    /// Build and sign an offer.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::EmptyOffer` if `cids` is empty.
    pub fn new_signed(
        provider: NodeId,
        cids: Vec<ContentId>,
        price: u64,
        expiry: u64,
        qos: u64,
        offer_key: &MessageSigner,
    ) -> Result<Self> {
        if cids.is_empty() {
            return Err(CoreError::EmptyOffer);
        }

        let tree = CidMerkleTree::new(cids);
        let merkle_root = tree.root();
        let signature = offer_key.sign(&signable_bytes(&provider, &merkle_root, price, expiry, qos));

        Ok(Self {
            provider,
            cids: tree.cids().to_vec(),
            merkle_root,
            price,
            expiry,
            qos,
            signature,
        })
    }

    /// Verify the signature and that `merkle_root` commits to `cids`.
    pub fn verify(&self, offer_key: &[u8], version: KeyVersion) -> bool {
        if CidMerkleTree::new(self.cids.clone()).root() != self.merkle_root {
            return false;
        }
        let message = signable_bytes(&self.provider, &self.merkle_root, self.price, self.expiry, self.qos);
        verify_message(offer_key, version, &self.signature, &message)
    }

    /// Whether the bundle covers `cid`.
    pub fn contains(&self, cid: &ContentId) -> bool {
        self.cids.binary_search(cid).is_ok()
    }

    /// Split out a single-CID offer with its inclusion proof.
    pub fn sub_offer(&self, cid: &ContentId) -> Result<SubCidOffer> {
        let tree = CidMerkleTree::new(self.cids.clone());
        let merkle_proof = tree
            .generate_proof(cid)
            .ok_or_else(|| CoreError::CidNotInOffer(cid.to_hex()))?;

        Ok(SubCidOffer {
            provider: self.provider,
            sub_cid: *cid,
            merkle_root: self.merkle_root,
            merkle_proof,
            price: self.price,
            expiry: self.expiry,
            qos: self.qos,
            signature: self.signature.clone(),
        })
    }

    /// Digest identifying this offer.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(signable_bytes(&self.provider, &self.merkle_root, self.price, self.expiry, self.qos));
        hasher.update(&self.signature);
        hasher.finalize().into()
    }

    /// True if the offer expires before `now + window`.
    pub fn expires_within(&self, now: u64, window: Duration) -> bool {
        expires_within(self.expiry, now, window)
    }
}

/// A single-CID slice of an [`Offer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCidOffer {
    /// Provider that will serve the content
    pub provider: NodeId,
    /// The CID this offer is for
    pub sub_cid: ContentId,
    /// Root of the parent bundle
    pub merkle_root: [u8; 32],
    /// Proof that `sub_cid` is in the parent bundle
    pub merkle_proof: MerkleProof,
    /// Retrieval price
    pub price: u64,
    /// Unix seconds after which the offer is void
    pub expiry: u64,
    /// Quality-of-service tier
    pub qos: u64,
    /// Signature over the parent offer
    pub signature: Vec<u8>,
}

impl SubCidOffer {
    /// Verify the provider signature over the parent offer fields.
    pub fn verify_signature(&self, offer_key: &[u8], version: KeyVersion) -> bool {
        let message = signable_bytes(&self.provider, &self.merkle_root, self.price, self.expiry, self.qos);
        verify_message(offer_key, version, &self.signature, &message)
    }

    /// Verify that `sub_cid` is included under `merkle_root`.
    pub fn verify_merkle_proof(&self) -> bool {
        self.merkle_proof.verify_cid(&self.sub_cid, &self.merkle_root)
    }

    /// Signature and merkle proof both check out.
    pub fn verify(&self, offer_key: &[u8], version: KeyVersion) -> bool {
        self.verify_signature(offer_key, version) && self.verify_merkle_proof()
    }

    /// Digest identifying this sub-offer (used for de-duplication).
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.sub_cid.as_bytes());
        hasher.update(signable_bytes(&self.provider, &self.merkle_root, self.price, self.expiry, self.qos));
        hasher.update(&self.signature);
        hasher.finalize().into()
    }

    /// True if the offer expires before `now + window`.
    pub fn expires_within(&self, now: u64, window: Duration) -> bool {
        expires_within(self.expiry, now, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> Vec<ContentId> {
        (0..4)
            .map(|i| ContentId::from_data(format!("piece-{}", i).as_bytes()))
            .collect()
    }

    fn make_offer(key: &MessageSigner) -> Offer {
        Offer::new_signed(key.node_id(), bundle(), 5, unix_now() + 7200, 1, key).unwrap()
    }

    #[test]
    fn test_offer_verifies() {
        let key = MessageSigner::generate(1);
        let offer = make_offer(&key);
        assert!(offer.verify(&key.public_key_bytes(), 1));
        assert_eq!(offer.cids.len(), 4);
    }

    #[test]
    fn test_empty_offer_rejected() {
        let key = MessageSigner::generate(1);
        let err = Offer::new_signed(key.node_id(), vec![], 1, 1, 0, &key).unwrap_err();
        assert!(matches!(err, CoreError::EmptyOffer));
    }

    #[test]
    fn test_tampered_price_fails() {
        let key = MessageSigner::generate(1);
        let mut offer = make_offer(&key);
        offer.price = 1;
        assert!(!offer.verify(&key.public_key_bytes(), 1));
    }

    #[test]
    fn test_sub_offer_verifies() {
        let key = MessageSigner::generate(1);
        let offer = make_offer(&key);
        let cid = bundle()[2];

        let sub = offer.sub_offer(&cid).unwrap();
        assert_eq!(sub.sub_cid, cid);
        assert!(sub.verify(&key.public_key_bytes(), 1));
    }

    #[test]
    fn test_sub_offer_for_foreign_cid() {
        let key = MessageSigner::generate(1);
        let offer = make_offer(&key);
        let err = offer.sub_offer(&ContentId::from_data(b"nope")).unwrap_err();
        assert!(matches!(err, CoreError::CidNotInOffer(_)));
    }

    #[test]
    fn test_forged_signature_with_valid_proof() {
        let provider = MessageSigner::generate(1);
        let forger = MessageSigner::generate(1);

        // Forger signs a bundle in the provider's name
        let forged = Offer::new_signed(provider.node_id(), bundle(), 5, u64::MAX, 0, &forger).unwrap();
        let sub = forged.sub_offer(&bundle()[0]).unwrap();

        assert!(sub.verify_merkle_proof());
        assert!(!sub.verify(&provider.public_key_bytes(), 1));
    }

    #[test]
    fn test_swapped_sub_cid_fails_proof() {
        let key = MessageSigner::generate(1);
        let offer = make_offer(&key);
        let mut sub = offer.sub_offer(&bundle()[0]).unwrap();
        sub.sub_cid = bundle()[1];
        assert!(!sub.verify_merkle_proof());
    }

    #[test]
    fn test_expiry_window() {
        let key = MessageSigner::generate(1);
        let now = 1_000_000;
        let offer = Offer::new_signed(key.node_id(), bundle(), 1, now + 1800, 0, &key).unwrap();

        assert!(offer.expires_within(now, Duration::from_secs(3600)));
        assert!(!offer.expires_within(now, Duration::from_secs(600)));
    }

    #[test]
    fn test_digests_differ_per_sub_cid() {
        let key = MessageSigner::generate(1);
        let offer = make_offer(&key);
        let a = offer.sub_offer(&bundle()[0]).unwrap();
        let b = offer.sub_offer(&bundle()[1]).unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), offer.sub_offer(&bundle()[0]).unwrap().digest());
    }
}
