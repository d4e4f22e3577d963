//! # FCR Payment
//!
//! Off-chain escrow for the FCR retrieval marketplace.
//!
//! Every paid interaction between two nodes flows through a directional
//! payment channel. The [`PaymentManager`] keeps one outbound channel per
//! payee and one inbound channel per payer, splits each into independent
//! lanes, and issues or accepts cumulative [`Voucher`]s on them.
//!
//! On-chain work (opening, funding, settling) goes through the
//! [`ChainClient`] trait: [`LocalChain`] for tests and devnets,
//! [`RpcChain`] for a remote payment authority.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use fcr_core::MessageSigner;
//! use fcr_payment::{LocalChain, PaymentManager, PayOutcome};
//! use k256::ecdsa::SigningKey;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let chain = Arc::new(LocalChain::new());
//! let payer = PaymentManager::new(SigningKey::random(&mut rand::rngs::OsRng), chain.clone());
//! let payee = PaymentManager::new(SigningKey::random(&mut rand::rngs::OsRng), chain);
//! let payee_id = MessageSigner::generate(1).node_id();
//!
//! payer.create(&payee_id, payee.address(), 100).await.unwrap();
//! let outcome = payer.pay(&payee_id, 1, 10).await.unwrap();
//! assert!(matches!(outcome, PayOutcome::Paid(_)));
//! # });
//! # }
//! ```

pub mod chain;
pub mod error;
pub mod manager;
pub mod rpc;
pub mod voucher;

pub use chain::{ChainClient, ChannelInfo, LocalChain};
pub use error::{PaymentError, Result};
pub use manager::{ChannelSnapshot, LaneSnapshot, PayOutcome, PaymentManager};
pub use rpc::RpcChain;
pub use voucher::{wallet_address, Voucher, VoucherClaim};
