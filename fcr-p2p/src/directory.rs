//! Peer directory backed by a registry.
//!
//! The directory is a local cache of [`PeerRecord`]s. Lookups never block on
//! the network; `sync` refreshes a single peer from the authoritative
//! [`Registry`] and is the only fallback the protocol uses on a miss.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::Address;
use fcr_core::{ContentId, KeyVersion, NodeId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FcrP2pError, Result};

/// Timeout for registry HTTP requests.
const REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);

/// What a node does in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Indexes offers and answers discovery
    Gateway,
    /// Stores content and issues offers
    Provider,
    /// Only sends requests; never registered
    Client,
}

impl std::str::FromStr for NodeRole {
    type Err = FcrP2pError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gateway" => Ok(NodeRole::Gateway),
            "provider" => Ok(NodeRole::Provider),
            "client" => Ok(NodeRole::Client),
            other => Err(FcrP2pError::InvalidArgument(format!("unknown role: {}", other))),
        }
    }
}

/// Registry entry for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub node_id: NodeId,
    /// Network address (`host:port` for TCP)
    pub addr: String,
    /// SEC1 message-signing key
    #[serde(with = "hex_bytes")]
    pub msg_key: Vec<u8>,
    pub msg_key_version: KeyVersion,
    /// SEC1 offer-signing key (providers)
    #[serde(with = "hex_bytes", default)]
    pub offer_key: Vec<u8>,
    #[serde(default)]
    pub offer_key_version: KeyVersion,
    /// Wallet address that receives payments
    pub wallet: Address,
    pub role: NodeRole,
}

/// Serde helper for `Vec<u8>` as a hex string.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

/// Authoritative source of peer records.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch one record; `None` if the registry does not know the node.
    async fn fetch(&self, id: &NodeId) -> Result<Option<PeerRecord>>;

    /// All registered gateways.
    async fn gateways(&self) -> Result<Vec<PeerRecord>>;
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    records: RwLock<HashMap<NodeId, PeerRecord>>,
}

impl StaticRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a record.
    pub fn register(&self, record: PeerRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.node_id, record);
    }

    /// Remove a record.
    pub fn deregister(&self, id: &NodeId) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).remove(id);
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn fetch(&self, id: &NodeId) -> Result<Option<PeerRecord>> {
        Ok(self.records.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned())
    }

    async fn gateways(&self) -> Result<Vec<PeerRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.role == NodeRole::Gateway)
            .cloned()
            .collect())
    }
}

/// Registry served over HTTP.
///
/// `GET {base}/peers/{id}` returns one record (404 if unknown) and
/// `GET {base}/gateways` returns all gateway records.
pub struct HttpRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRegistry {
    /// Create a client for the registry at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(FcrP2pError::InvalidArgument(format!("Invalid registry URL: {}", base_url)));
        }
        let client = reqwest::Client::builder()
            .timeout(REGISTRY_TIMEOUT)
            .build()
            .map_err(|e| FcrP2pError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn fetch(&self, id: &NodeId) -> Result<Option<PeerRecord>> {
        let url = format!("{}/peers/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FcrP2pError::Network(format!("registry: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FcrP2pError::Network(format!("registry returned {}", response.status())));
        }

        let record: PeerRecord = response
            .json()
            .await
            .map_err(|e| FcrP2pError::Network(format!("registry: bad record: {}", e)))?;
        if record.node_id != *id {
            warn!("Registry returned record for {} when asked for {}", record.node_id, id);
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn gateways(&self) -> Result<Vec<PeerRecord>> {
        let url = format!("{}/gateways", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FcrP2pError::Network(format!("registry: {}", e)))?;
        if !response.status().is_success() {
            return Err(FcrP2pError::Network(format!("registry returned {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| FcrP2pError::Network(format!("registry: bad gateway list: {}", e)))
    }
}

/// Local cache of peer records.
pub struct PeerDirectory {
    registry: std::sync::Arc<dyn Registry>,
    peers: RwLock<HashMap<NodeId, PeerRecord>>,
}

impl std::fmt::Debug for PeerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerDirectory").field("cached", &self.len()).finish()
    }
}

impl PeerDirectory {
    /// Create an empty cache over `registry`.
    pub fn new(registry: std::sync::Arc<dyn Registry>) -> Self {
        Self {
            registry,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Cached record, without touching the network.
    pub fn get(&self, id: &NodeId) -> Option<PeerRecord> {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    /// Refresh one peer from the registry.
    ///
    /// A peer the registry no longer knows is evicted from the cache.
    pub async fn sync(&self, id: &NodeId) -> Result<Option<PeerRecord>> {
        let fetched = self.registry.fetch(id).await?;
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        match &fetched {
            Some(record) => {
                peers.insert(*id, record.clone());
            }
            None => {
                peers.remove(id);
            }
        }
        debug!("Synced peer {}: {}", id, if fetched.is_some() { "found" } else { "absent" });
        Ok(fetched)
    }

    /// Cached record, or one resync on a miss.
    pub async fn resolve(&self, id: &NodeId) -> Result<PeerRecord> {
        if let Some(record) = self.get(id) {
            return Ok(record);
        }
        self.sync(id)
            .await?
            .ok_or_else(|| FcrP2pError::PeerNotFound(id.to_string()))
    }

    /// Insert a record directly.
    pub fn insert(&self, record: PeerRecord) {
        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.node_id, record);
    }

    /// Pull every gateway from the registry into the cache.
    pub async fn sync_gateways(&self) -> Result<usize> {
        let gateways = self.registry.gateways().await?;
        let count = gateways.len();
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        for record in gateways {
            peers.insert(record.node_id, record);
        }
        Ok(count)
    }

    /// Cached gateways.
    pub fn gateways(&self) -> Vec<PeerRecord> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.role == NodeRole::Gateway)
            .cloned()
            .collect()
    }

    /// Up to `count` cached gateways closest to `cid` by XOR distance,
    /// skipping `exclude`.
    pub fn closest_gateways(&self, cid: &ContentId, count: usize, exclude: &[NodeId]) -> Vec<PeerRecord> {
        let mut candidates: Vec<PeerRecord> = self
            .gateways()
            .into_iter()
            .filter(|r| !exclude.contains(&r.node_id))
            .collect();
        candidates.sort_by_key(|r| r.node_id.distance(cid.as_bytes()));
        candidates.truncate(count);
        candidates
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcr_core::MessageSigner;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(role: NodeRole) -> PeerRecord {
        let key = MessageSigner::generate(1);
        PeerRecord {
            node_id: key.node_id(),
            addr: "127.0.0.1:7000".into(),
            msg_key: key.public_key_bytes(),
            msg_key_version: 1,
            offer_key: vec![],
            offer_key_version: 0,
            wallet: Address::random(),
            role,
        }
    }

    #[tokio::test]
    async fn test_resolve_syncs_once_on_miss() {
        let registry = Arc::new(StaticRegistry::new());
        let directory = PeerDirectory::new(registry.clone());
        let rec = record(NodeRole::Gateway);

        assert!(directory.get(&rec.node_id).is_none());
        assert!(matches!(
            directory.resolve(&rec.node_id).await,
            Err(FcrP2pError::PeerNotFound(_))
        ));

        registry.register(rec.clone());
        assert_eq!(directory.resolve(&rec.node_id).await.unwrap(), rec);
        assert!(directory.get(&rec.node_id).is_some());
    }

    #[tokio::test]
    async fn test_sync_evicts_deregistered() {
        let registry = Arc::new(StaticRegistry::new());
        let directory = PeerDirectory::new(registry.clone());
        let rec = record(NodeRole::Provider);
        directory.insert(rec.clone());

        assert!(directory.sync(&rec.node_id).await.unwrap().is_none());
        assert!(directory.get(&rec.node_id).is_none());
    }

    #[test]
    fn test_closest_gateways() {
        let directory = PeerDirectory::new(Arc::new(StaticRegistry::new()));
        let gateways: Vec<PeerRecord> = (0..6).map(|_| record(NodeRole::Gateway)).collect();
        for g in &gateways {
            directory.insert(g.clone());
        }
        directory.insert(record(NodeRole::Provider));

        let cid = ContentId::from_data(b"target");
        let excluded = gateways[0].node_id;
        let closest = directory.closest_gateways(&cid, 3, &[excluded]);

        assert_eq!(closest.len(), 3);
        assert!(closest.iter().all(|r| r.role == NodeRole::Gateway && r.node_id != excluded));
        for pair in closest.windows(2) {
            assert!(pair[0].node_id.distance(cid.as_bytes()) <= pair[1].node_id.distance(cid.as_bytes()));
        }
    }

    #[tokio::test]
    async fn test_http_registry_fetch() {
        let server = MockServer::start().await;
        let rec = record(NodeRole::Gateway);

        Mock::given(method("GET"))
            .and(path(format!("/peers/{}", rec.node_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(&rec))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gateways"))
            .respond_with(ResponseTemplate::new(200).set_body_json(vec![&rec]))
            .mount(&server)
            .await;

        let registry = HttpRegistry::new(&server.uri()).unwrap();
        assert_eq!(registry.fetch(&rec.node_id).await.unwrap(), Some(rec.clone()));
        assert_eq!(registry.gateways().await.unwrap(), vec![rec]);

        // Unmatched paths are 404
        let unknown = MessageSigner::generate(1).node_id();
        assert_eq!(registry.fetch(&unknown).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_http_registry_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = HttpRegistry::new(&server.uri()).unwrap();
        let id = MessageSigner::generate(1).node_id();
        assert!(matches!(registry.fetch(&id).await, Err(FcrP2pError::Network(_))));
    }

    #[test]
    fn test_record_json_uses_hex_keys() {
        let rec = record(NodeRole::Provider);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["role"], "provider");
        assert_eq!(json["msg_key"], hex::encode(&rec.msg_key));
    }
}
