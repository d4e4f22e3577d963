//! CLI command implementations.

pub mod find_offers;
pub mod find_offers_dht;
pub mod init;
pub mod keygen;
pub mod retrieve;
pub mod serve;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fcr_core::{ContentId, NodeId, SubCidOffer};
use fcr_p2p::NodeContext;
use serde::Serialize;

use crate::config::{resolve_path, NodeConfig};
use crate::output;

/// Load the config at `explicit` or the default location.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<NodeConfig> {
    let path = resolve_path(explicit)?;
    NodeConfig::load(&path)
}

pub(crate) fn parse_cid(s: &str) -> Result<ContentId> {
    s.parse().map_err(|_| anyhow!("Invalid CID '{}': expected 64 hex characters", s))
}

/// The named gateway, or the best-ranked registered one.
pub(crate) async fn choose_gateway(ctx: &NodeContext, explicit: Option<&str>) -> Result<NodeId> {
    if let Some(id) = explicit {
        return id
            .parse()
            .map_err(|_| anyhow!("Invalid gateway ID '{}'", id));
    }

    ctx.directory
        .sync_gateways()
        .await
        .context("Cannot list gateways")?;
    let available: Vec<NodeId> = ctx.directory.gateways().iter().map(|r| r.node_id).collect();
    ctx.reputation
        .select_best(&available, 1)
        .first()
        .copied()
        .ok_or_else(|| anyhow!("No gateway available"))
}

/// JSON view of an offer.
#[derive(Serialize)]
pub(crate) struct OfferSummary {
    provider: String,
    cid: String,
    price: u64,
    expiry: u64,
    qos: u64,
}

impl From<&SubCidOffer> for OfferSummary {
    fn from(offer: &SubCidOffer) -> Self {
        Self {
            provider: offer.provider.to_string(),
            cid: offer.sub_cid.to_string(),
            price: offer.price,
            expiry: offer.expiry,
            qos: offer.qos,
        }
    }
}

/// Report a failed command and return its exit code.
pub(crate) fn fail(json: bool, err: &anyhow::Error) -> i32 {
    if json {
        println!("{}", serde_json::json!({ "success": false, "error": format!("{:#}", err) }));
    } else {
        output::error(&format!("{:#}", err));
    }
    1
}
