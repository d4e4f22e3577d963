//! # FCR P2P
//!
//! **Escrow-gated request protocol for the FCR retrieval marketplace.**
//!
//! Clients pay gateways to discover signed offers for a content ID, then pay
//! providers to retrieve the content. Every paid request carries a voucher
//! on a dedicated payment lane; the server serves at most what was paid for
//! and hands back the unused part as a refund voucher.
//!
//! ## Roles
//!
//! - **Requester** ([`requester`]): pays, sends, verifies the signed answer,
//!   reconciles the refund and keeps per-peer reputation.
//! - **Handler** ([`handler`]): authenticates, takes payment, serves and
//!   refunds. Gateways also aggregate DHT discovery across the gateways
//!   closest to a CID.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fcr_core::{ContentId, MessageSigner, NodeId};
//! use fcr_p2p::{HttpRegistry, NodeContext, NodeRole, TcpConnector};
//! use fcr_payment::RpcChain;
//! use k256::ecdsa::SigningKey;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = NodeContext::builder(
//!         MessageSigner::generate(1),
//!         SigningKey::random(&mut rand::rngs::OsRng),
//!         NodeRole::Gateway,
//!     )
//!     .build(
//!         Arc::new(RpcChain::new("http://127.0.0.1:8545")?),
//!         Arc::new(HttpRegistry::new("http://127.0.0.1:9000")?),
//!         Arc::new(TcpConnector),
//!     );
//!
//!     let gateway: NodeId = "a1".repeat(32).parse()?;
//!     let cid = ContentId::from_data(b"hello");
//!     let offers = fcr_p2p::requester::standard_discovery::request(&ctx, &gateway, cid, 3).await?;
//!     println!("{} offers", offers.len());
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod directory;
pub mod error;
pub mod handler;
pub mod messages;
pub mod offers;
pub mod reputation;
pub mod requester;
pub mod server;
pub mod settings;
pub mod transport;

// Re-export main types
pub use context::{NodeContext, NodeContextBuilder};
pub use directory::{HttpRegistry, NodeRole, PeerDirectory, PeerRecord, Registry, StaticRegistry};
pub use error::{FcrP2pError, Result};
pub use messages::{Ack, FcrMessage, MessageType};
pub use offers::{ContentStore, OfferStore};
pub use reputation::{ReputationEvent, ReputationLedger, ReputationRecord};
pub use requester::dht_discovery::DhtOffers;
pub use server::Server;
pub use settings::{
    ProtocolSettings, DHT_DISCOVERY_LANE, MAX_FRAME_LEN, PROTOCOL_VERSION, RETRIEVAL_LANE, STANDARD_DISCOVERY_LANE,
};
pub use transport::{Acceptor, Connector, FcrConnection, MemoryListener, MemoryNetwork, TcpConnector};
