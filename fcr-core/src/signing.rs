//! Message signing service.
//!
//! Every protocol message and every offer is signed with a secp256k1 key.
//! Keys are versioned so a node can rotate its key in the registry while
//! peers holding the previous record fail verification cleanly (and resync)
//! instead of accepting a stale key.
//!
//! Signature layout: `version (1 byte) || ECDSA(SHA256(message)) (64 bytes)`.

use k256::ecdsa::{signature::Signer, signature::Verifier, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::id::NodeId;

/// Version tag of a signing key.
pub type KeyVersion = u8;

/// Length of an encoded signature (version byte + 64-byte ECDSA).
pub const SIGNATURE_LEN: usize = 65;

/// A versioned secp256k1 signing key.
#[derive(Clone)]
pub struct MessageSigner {
    key: SigningKey,
    version: KeyVersion,
}

impl std::fmt::Debug for MessageSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSigner")
            .field("node_id", &self.node_id())
            .field("version", &self.version)
            .finish()
    }
}

impl MessageSigner {
    /// Wrap an existing key.
    pub fn new(key: SigningKey, version: KeyVersion) -> Self {
        Self { key, version }
    }

    /// Generate a fresh random key.
    pub fn generate(version: KeyVersion) -> Self {
        Self::new(SigningKey::random(&mut OsRng), version)
    }

    /// Load a key from its 32-byte secret scalar in hex.
    pub fn from_hex(secret_hex: &str, version: KeyVersion) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim_start_matches("0x"))?;
        let key = SigningKey::from_slice(&bytes).map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key, version))
    }

    /// Hex encoding of the secret scalar (for config files).
    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    /// The underlying signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    /// Key version.
    pub fn version(&self) -> KeyVersion {
        self.version
    }

    /// Public half of the key.
    pub fn public_key(&self) -> VerifyingKey {
        *self.key.verifying_key()
    }

    /// SEC1-compressed public key (33 bytes).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.key.verifying_key().to_sec1_bytes().to_vec()
    }

    /// Self-certifying node ID of this key.
    pub fn node_id(&self) -> NodeId {
        NodeId::from_public_key(self.key.verifying_key())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let hash = Sha256::digest(message);
        let signature: Signature = self.key.sign(hash.as_slice());

        let mut out = Vec::with_capacity(SIGNATURE_LEN);
        out.push(self.version);
        out.extend_from_slice(&signature.to_bytes());
        out
    }
}

/// Verify a signature produced by [`MessageSigner::sign`].
///
/// Fails if the signature was made with a different key version than the
/// one the verifier holds.
pub fn verify_message(
    public_key: &[u8],
    version: KeyVersion,
    signature: &[u8],
    message: &[u8],
) -> bool {
    if signature.len() != SIGNATURE_LEN || signature[0] != version {
        return false;
    }

    let Ok(sig) = Signature::from_slice(&signature[1..]) else {
        return false;
    };

    let Ok(pubkey) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };

    let hash = Sha256::digest(message);
    pubkey.verify(hash.as_slice(), &sig).is_ok()
}
