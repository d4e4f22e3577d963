//! Node and content identifiers.
//!
//! Both identifiers are 32-byte SHA-256 digests rendered as lowercase hex.
//! A [`NodeId`] hashes the node's compressed message-signing key, so a peer
//! can prove ownership of its ID without a registry lookup. A [`ContentId`]
//! hashes the content bytes, so retrieved data can be checked locally.

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

fn parse_hex_32(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s.trim_start_matches("0x"))?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| CoreError::InvalidLength {
        expected: 32,
        actual,
    })
}

macro_rules! hex_identifier {
    ($name:ident) => {
        impl $name {
            /// Wrap raw digest bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Raw digest bytes.
            #[inline]
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Lowercase hex rendering.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Short form keeps logs readable
                write!(f, "{}({}..)", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self> {
                parse_hex_32(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Identifier of a network participant (client, gateway or provider).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 32]);

hex_identifier!(NodeId);

impl NodeId {
    /// Derive the self-certifying ID of a message-signing key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self::from_public_key_bytes(&key.to_sec1_bytes())
    }

    /// Derive the ID from SEC1-compressed key bytes.
    pub fn from_public_key_bytes(sec1: &[u8]) -> Self {
        Self(Sha256::digest(sec1).into())
    }

    /// XOR distance between this node and a 32-byte target (usually a CID).
    pub fn distance(&self, target: &[u8; 32]) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ target[i];
        }
        out
    }
}

/// Identifier of a piece of content: `SHA256(content)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 32]);

hex_identifier!(ContentId);

impl ContentId {
    /// Compute the CID of a blob.
    pub fn from_data(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Check whether `data` is the content this CID names.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::from_data(data) == *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::MessageSigner;

    #[test]
    fn test_hex_roundtrip() {
        let cid = ContentId::from_data(b"hello");
        let parsed: ContentId = cid.to_hex().parse().unwrap();
        assert_eq!(cid, parsed);

        let prefixed: ContentId = format!("0x{}", cid).parse().unwrap();
        assert_eq!(cid, prefixed);
    }

    #[test]
    fn test_invalid_length() {
        let err = "abcd".parse::<NodeId>().unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidLength {
                expected: 32,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_node_id_is_self_certifying() {
        let signer = MessageSigner::generate(1);
        let id = NodeId::from_public_key(&signer.public_key());
        assert_eq!(id, signer.node_id());
        assert_eq!(id, NodeId::from_public_key_bytes(&signer.public_key_bytes()));
    }

    #[test]
    fn test_content_matches() {
        let cid = ContentId::from_data(b"payload");
        assert!(cid.matches(b"payload"));
        assert!(!cid.matches(b"payload!"));
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let id = NodeId::from_bytes([7u8; 32]);
        assert_eq!(id.distance(id.as_bytes()), [0u8; 32]);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = NodeId::from_bytes([0xAB; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
