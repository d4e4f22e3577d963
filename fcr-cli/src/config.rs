//! Node configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fcr_core::{KeyVersion, MessageSigner};
use fcr_p2p::{HttpRegistry, NodeContext, NodeRole, ProtocolSettings, TcpConnector};
use fcr_payment::RpcChain;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7400";
pub const DEFAULT_REGISTRY_URL: &str = "http://127.0.0.1:7300";
pub const DEFAULT_CHAIN_RPC_URL: &str = "http://127.0.0.1:8545";

fn default_key_version() -> KeyVersion {
    1
}

/// Terms a provider publishes its content under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferTerms {
    /// Price per CID
    pub price: u64,
    /// Offer lifetime in seconds
    pub lifetime_secs: u64,
    /// Advertised quality of service
    pub qos: u64,
}

impl Default for OfferTerms {
    fn default() -> Self {
        Self {
            price: 1,
            lifetime_secs: 24 * 3600,
            qos: 0,
        }
    }
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub listen_addr: String,
    pub role: NodeRole,
    /// Hex secret of the message-signing key
    pub message_key: String,
    #[serde(default = "default_key_version")]
    pub message_key_version: KeyVersion,
    /// Hex secret of the offer-signing key (providers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_key: Option<String>,
    /// Hex secret of the payment wallet
    pub wallet_key: String,
    pub registry_url: String,
    pub chain_rpc_url: String,
    /// Directory whose files a provider serves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_dir: Option<PathBuf>,
    #[serde(default)]
    pub offer: OfferTerms,
    #[serde(default)]
    pub protocol: ProtocolSettings,
}

/// `<config_dir>/fcr/config.toml`
pub fn default_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("No config directory on this platform")?;
    Ok(dir.join("fcr").join("config.toml"))
}

/// The explicit path, or the default one.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_path(),
    }
}

/// Generate a fresh random wallet key as hex.
pub fn generate_wallet_hex() -> String {
    let key = SigningKey::random(&mut rand::rngs::OsRng);
    hex::encode(key.to_bytes())
}

impl NodeConfig {
    /// Fresh config with newly generated keys.
    pub fn generate(role: NodeRole) -> Self {
        let offer_key = (role == NodeRole::Provider).then(|| MessageSigner::generate(1).secret_hex());
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            role,
            message_key: MessageSigner::generate(1).secret_hex(),
            message_key_version: default_key_version(),
            offer_key,
            wallet_key: generate_wallet_hex(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            chain_rpc_url: DEFAULT_CHAIN_RPC_URL.to_string(),
            content_dir: None,
            offer: OfferTerms::default(),
            protocol: ProtocolSettings::default(),
        }
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config {} (run `fcr init` first)", path.display()))?;
        let config: NodeConfig =
            toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))?;
        config.signer()?;
        config.wallet()?;
        config.offer_signer()?;
        Ok(config)
    }

    /// Write the config, refusing to overwrite unless `force` is set.
    pub fn save(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("Cannot serialize config")?;
        std::fs::write(path, text).with_context(|| format!("Cannot write {}", path.display()))?;
        Ok(())
    }

    pub fn signer(&self) -> Result<MessageSigner> {
        MessageSigner::from_hex(&self.message_key, self.message_key_version).context("Invalid message_key")
    }

    pub fn offer_signer(&self) -> Result<Option<MessageSigner>> {
        self.offer_key
            .as_deref()
            .map(|key| MessageSigner::from_hex(key, 1).context("Invalid offer_key"))
            .transpose()
    }

    pub fn wallet(&self) -> Result<SigningKey> {
        let bytes = hex::decode(self.wallet_key.trim_start_matches("0x")).context("wallet_key is not hex")?;
        SigningKey::from_slice(&bytes).context("Invalid wallet_key")
    }

    /// Build a node context talking to the configured registry and chain.
    pub fn build_context(&self) -> Result<Arc<NodeContext>> {
        let chain = RpcChain::new(&self.chain_rpc_url).context("Invalid chain_rpc_url")?;
        let registry = HttpRegistry::new(&self.registry_url).context("Invalid registry_url")?;

        let mut builder =
            NodeContext::builder(self.signer()?, self.wallet()?, self.role).settings(self.protocol.clone());
        if let Some(offer_signer) = self.offer_signer()? {
            builder = builder.offer_signer(offer_signer);
        }
        Ok(Arc::new(builder.build(
            Arc::new(chain),
            Arc::new(registry),
            Arc::new(TcpConnector),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fcr").join("config.toml");

        let config = NodeConfig::generate(NodeRole::Provider);
        config.save(&path, false).unwrap();
        let loaded = NodeConfig::load(&path).unwrap();

        assert_eq!(loaded.message_key, config.message_key);
        assert_eq!(loaded.offer_key, config.offer_key);
        assert_eq!(loaded.role, NodeRole::Provider);
        assert_eq!(loaded.protocol.topup_amount, 100);
        assert_eq!(loaded.signer().unwrap().node_id(), config.signer().unwrap().node_id());
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        NodeConfig::generate(NodeRole::Gateway).save(&path, false).unwrap();

        assert!(NodeConfig::generate(NodeRole::Gateway).save(&path, false).is_err());
        assert!(NodeConfig::generate(NodeRole::Gateway).save(&path, true).is_ok());
    }

    #[test]
    fn test_gateway_has_no_offer_key() {
        let config = NodeConfig::generate(NodeRole::Gateway);
        assert!(config.offer_key.is_none());
        assert!(config.offer_signer().unwrap().is_none());
    }

    #[test]
    fn test_partial_protocol_table() {
        let config = NodeConfig::generate(NodeRole::Gateway);
        let text = format!(
            "listen_addr = \"127.0.0.1:1\"\nrole = \"gateway\"\nmessage_key = \"{}\"\nwallet_key = \"{}\"\n\
             registry_url = \"http://r\"\nchain_rpc_url = \"http://c\"\n\n[protocol]\nsearch_price = 4\n",
            config.message_key, config.wallet_key
        );
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.protocol.search_price, 4);
        assert_eq!(parsed.protocol.offer_price, 1);
        assert_eq!(parsed.offer, OfferTerms::default());
    }

    #[test]
    fn test_bad_wallet_key() {
        let mut config = NodeConfig::generate(NodeRole::Gateway);
        config.wallet_key = "zz".into();
        assert!(config.wallet().is_err());
    }
}
