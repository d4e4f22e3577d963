#![allow(dead_code)]

use std::sync::Arc;

use fcr_core::{unix_now, MessageSigner, NodeId, Offer};
use fcr_p2p::handler::dispatch;
use fcr_p2p::{
    Acceptor, FcrMessage, MemoryNetwork, NodeContext, NodeRole, PeerRecord, ProtocolSettings, Server, StaticRegistry,
};
use fcr_payment::{wallet_address, ChainClient, LocalChain};
use k256::ecdsa::SigningKey;

/// Offers published in tests stay valid for two hours.
pub const OFFER_LIFETIME: u64 = 7200;

/// Shared chain, registry and in-memory network for a set of test nodes.
pub struct TestNet {
    pub network: Arc<MemoryNetwork>,
    pub chain: Arc<LocalChain>,
    pub registry: Arc<StaticRegistry>,
}

impl TestNet {
    pub fn new() -> Self {
        Self {
            network: Arc::new(MemoryNetwork::new()),
            chain: Arc::new(LocalChain::new()),
            registry: Arc::new(StaticRegistry::new()),
        }
    }

    fn context(
        &self,
        role: NodeRole,
        settings: ProtocolSettings,
        chain: Arc<dyn ChainClient>,
    ) -> (Arc<NodeContext>, SigningKey) {
        let wallet = SigningKey::random(&mut rand::rngs::OsRng);
        let mut builder = NodeContext::builder(MessageSigner::generate(1), wallet.clone(), role).settings(settings);
        if role == NodeRole::Provider {
            builder = builder.offer_signer(MessageSigner::generate(1));
        }
        let ctx = builder.build(chain, self.registry.clone(), self.network.clone());
        (Arc::new(ctx), wallet)
    }

    /// Register a serving node at `addr` and start its server.
    pub fn spawn_node(&self, addr: &str, role: NodeRole) -> Arc<NodeContext> {
        self.spawn_node_with(addr, role, ProtocolSettings::default())
    }

    pub fn spawn_node_with(&self, addr: &str, role: NodeRole, settings: ProtocolSettings) -> Arc<NodeContext> {
        let ctx = self.register_node(addr, role, settings);
        let listener = self.network.listen(addr);
        Server::new(ctx.clone()).spawn(listener);
        ctx
    }

    /// Serve a registered node at `addr`, rewriting each signed response
    /// with `rewrite` before it goes out.
    pub fn spawn_rewriting<F>(&self, addr: &str, role: NodeRole, rewrite: F) -> Arc<NodeContext>
    where
        F: Fn(&NodeContext, FcrMessage) -> FcrMessage + Send + Sync + 'static,
    {
        let ctx = self.register_node(addr, role, ProtocolSettings::default());
        let mut listener = self.network.listen(addr);
        let rewrite = Arc::new(rewrite);
        let node = ctx.clone();
        tokio::spawn(async move {
            while let Ok(mut conn) = listener.accept().await {
                let (node, rewrite) = (node.clone(), rewrite.clone());
                tokio::spawn(async move {
                    let limit = node.settings.short_timeout;
                    let request = conn.receive_message(limit).await?;
                    let response = rewrite(node.as_ref(), dispatch(&node, &request).await?);
                    conn.send_message(&response, limit).await
                });
            }
        });
        ctx
    }

    /// Build a node and put its record in the registry without serving it.
    pub fn register_node(&self, addr: &str, role: NodeRole, settings: ProtocolSettings) -> Arc<NodeContext> {
        let (ctx, wallet) = self.context(role, settings, self.chain.clone());
        let (offer_key, offer_key_version) = ctx
            .offer_signer
            .as_ref()
            .map(|s| (s.public_key_bytes(), s.version()))
            .unwrap_or_default();

        self.registry.register(PeerRecord {
            node_id: ctx.node_id(),
            addr: addr.to_string(),
            msg_key: ctx.signer.public_key_bytes(),
            msg_key_version: ctx.signer.version(),
            offer_key,
            offer_key_version,
            wallet: wallet_address(&wallet),
            role,
        });
        ctx
    }

    /// An unregistered client that only sends requests.
    pub fn client(&self) -> Arc<NodeContext> {
        self.client_with(ProtocolSettings::default(), self.chain.clone())
    }

    /// A client with its own settings and chain view.
    pub fn client_with(&self, settings: ProtocolSettings, chain: Arc<dyn ChainClient>) -> Arc<NodeContext> {
        self.context(NodeRole::Client, settings, chain).0
    }
}

/// Store `data` at the provider and sign an offer for it.
pub fn offer_content(provider: &NodeContext, data: &[u8], price: u64) -> Offer {
    let cid = provider.content.insert(data.to_vec());
    Offer::new_signed(
        provider.node_id(),
        vec![cid],
        price,
        unix_now() + OFFER_LIFETIME,
        0,
        provider.offer_signer.as_ref().unwrap(),
    )
    .unwrap()
}

/// Score and pending flag the ledger holds for `peer`.
pub fn standing(ctx: &NodeContext, peer: &NodeId) -> (i64, bool) {
    ctx.reputation
        .get(peer)
        .map(|r| (r.score, r.pending))
        .unwrap_or((0, false))
}
