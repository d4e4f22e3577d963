//! # FCR Core
//!
//! **Identifiers, signatures and offers for the FCR retrieval marketplace**
//!
//! This crate holds the pure, synchronous building blocks shared by every
//! node role: node and content identifiers, the message signing service,
//! the CID merkle tree used to commit offer bundles, and the signed
//! [`Offer`] / [`SubCidOffer`] types that gateways relay and clients verify.
//!
//! ## Features
//!
//! - **Self-certifying IDs**: a `NodeId` is the hash of its signing key
//! - **Verifiable content**: a `ContentId` is the hash of its bytes
//! - **Minimal**: no network I/O, no async
//!
//! ## Quick Start
//!
//! ```rust
//! use fcr_core::{ContentId, MessageSigner, Offer};
//!
//! let provider_key = MessageSigner::generate(1);
//! let cids = vec![
//!     ContentId::from_data(b"block-a"),
//!     ContentId::from_data(b"block-b"),
//! ];
//!
//! let offer = Offer::new_signed(provider_key.node_id(), cids.clone(), 10, u64::MAX, 0, &provider_key)
//!     .unwrap();
//! let sub = offer.sub_offer(&cids[1]).unwrap();
//!
//! assert!(sub.verify(&provider_key.public_key_bytes(), provider_key.version()));
//! ```

pub mod error;
pub mod id;
pub mod offer;
pub mod proof;
pub mod signing;
pub mod tree;

// Re-export main types for convenience
pub use error::CoreError;
pub use id::{ContentId, NodeId};
pub use offer::{unix_now, Offer, SubCidOffer};
pub use proof::MerkleProof;
pub use signing::{verify_message, KeyVersion, MessageSigner};
pub use tree::CidMerkleTree;
