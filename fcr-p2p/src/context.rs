//! Per-node context shared by requesters and handlers.

use std::sync::Arc;

use fcr_core::{MessageSigner, NodeId};
use fcr_payment::{ChainClient, PaymentManager};
use k256::ecdsa::SigningKey;

use crate::directory::{NodeRole, PeerDirectory, Registry};
use crate::offers::{ContentStore, OfferStore};
use crate::reputation::ReputationLedger;
use crate::settings::ProtocolSettings;
use crate::transport::Connector;

/// Everything one node needs to take part in the protocol.
///
/// Built once at startup and shared behind an `Arc`.
pub struct NodeContext {
    pub signer: MessageSigner,
    /// Offer-signing key; providers only
    pub offer_signer: Option<MessageSigner>,
    pub role: NodeRole,
    pub settings: ProtocolSettings,
    pub payments: PaymentManager,
    pub directory: PeerDirectory,
    pub reputation: ReputationLedger,
    pub offers: OfferStore,
    pub content: ContentStore,
    pub connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_id", &self.node_id())
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl NodeContext {
    /// Start building a context.
    pub fn builder(signer: MessageSigner, wallet: SigningKey, role: NodeRole) -> NodeContextBuilder {
        NodeContextBuilder {
            signer,
            wallet,
            role,
            offer_signer: None,
            settings: ProtocolSettings::default(),
        }
    }

    /// This node's ID.
    pub fn node_id(&self) -> NodeId {
        self.signer.node_id()
    }
}

/// Builder for [`NodeContext`].
pub struct NodeContextBuilder {
    signer: MessageSigner,
    wallet: SigningKey,
    role: NodeRole,
    offer_signer: Option<MessageSigner>,
    settings: ProtocolSettings,
}

impl NodeContextBuilder {
    /// Set the offer-signing key.
    pub fn offer_signer(mut self, signer: MessageSigner) -> Self {
        self.offer_signer = Some(signer);
        self
    }

    /// Override protocol settings.
    pub fn settings(mut self, settings: ProtocolSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wire in the collaborators.
    pub fn build(
        self,
        chain: Arc<dyn ChainClient>,
        registry: Arc<dyn Registry>,
        connector: Arc<dyn Connector>,
    ) -> NodeContext {
        NodeContext {
            signer: self.signer,
            offer_signer: self.offer_signer,
            role: self.role,
            settings: self.settings,
            payments: PaymentManager::new(self.wallet, chain),
            directory: PeerDirectory::new(registry),
            reputation: ReputationLedger::new(),
            offers: OfferStore::new(),
            content: ContentStore::new(),
            connector,
        }
    }
}
