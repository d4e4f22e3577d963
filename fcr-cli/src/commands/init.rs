//! Init command implementation.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use fcr_p2p::{NodeRole, PeerRecord};
use fcr_payment::wallet_address;

use crate::config::{resolve_path, NodeConfig};
use crate::output;

/// Arguments for the init command.
#[derive(Args)]
pub struct InitArgs {
    /// Node role (gateway, provider, client)
    #[arg(short, long, default_value = "gateway")]
    pub role: NodeRole,

    /// Address to serve on
    #[arg(long)]
    pub listen: Option<String>,

    /// Peer registry base URL
    #[arg(long)]
    pub registry_url: Option<String>,

    /// Payment chain JSON-RPC URL
    #[arg(long)]
    pub chain_rpc_url: Option<String>,

    /// Directory of files to serve (providers)
    #[arg(long)]
    pub content_dir: Option<PathBuf>,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

fn execute(args: InitArgs, explicit: Option<&Path>) -> Result<()> {
    let path = resolve_path(explicit)?;
    let mut config = NodeConfig::generate(args.role);
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(url) = args.registry_url {
        config.registry_url = url;
    }
    if let Some(url) = args.chain_rpc_url {
        config.chain_rpc_url = url;
    }
    config.content_dir = args.content_dir;
    config.save(&path, args.force)?;

    let signer = config.signer()?;
    let offer_signer = config.offer_signer()?;
    let wallet = wallet_address(&config.wallet()?);

    output::success(&format!("Wrote {}", path.display()));
    output::kv("Role", &format!("{:?}", config.role));
    output::kv("Node ID", &signer.node_id().to_string());
    output::kv("Wallet", &format!("{:?}", wallet));

    if config.role != NodeRole::Client {
        let record = PeerRecord {
            node_id: signer.node_id(),
            addr: config.listen_addr.clone(),
            msg_key: signer.public_key_bytes(),
            msg_key_version: signer.version(),
            offer_key: offer_signer.as_ref().map(|s| s.public_key_bytes()).unwrap_or_default(),
            offer_key_version: offer_signer.as_ref().map(|s| s.version()).unwrap_or_default(),
            wallet,
            role: config.role,
        };
        output::header("Registry record");
        println!("{}", serde_json::to_string_pretty(&record)?);
        output::hint("Submit this record to the peer registry before serving.");
    }
    Ok(())
}

/// Run the init command.
pub fn run(args: InitArgs, config: Option<&Path>) -> i32 {
    match execute(args, config) {
        Ok(()) => 0,
        Err(e) => super::fail(false, &e),
    }
}
