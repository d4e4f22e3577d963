//! Find-offers-dht command implementation.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use fcr_p2p::requester::dht_discovery;
use serde_json::json;

use super::{choose_gateway, load_config, parse_cid, OfferSummary};
use crate::output;

/// Arguments for the find-offers-dht command.
#[derive(Args)]
pub struct FindOffersDhtArgs {
    /// Content ID (hex)
    pub cid: String,

    /// Gateway that runs the fan-out (default: best-ranked registered gateway)
    #[arg(short, long)]
    pub gateway: Option<String>,

    /// Number of gateways to query
    #[arg(short, long, default_value = "4")]
    pub num_dht: u32,

    /// Maximum offers per queried gateway
    #[arg(short, long, default_value = "2")]
    pub max: u32,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

async fn execute(args: &FindOffersDhtArgs, config: Option<&Path>) -> Result<()> {
    let cid = parse_cid(&args.cid)?;
    let config = load_config(config)?;
    let ctx = config.build_context()?;
    let gateway = choose_gateway(&ctx, args.gateway.as_deref()).await?;

    if !args.json {
        output::info(&format!(
            "Asking {} to query {} gateways for up to {} offers each...",
            gateway, args.num_dht, args.max
        ));
    }
    let found = dht_discovery::request(&ctx, &gateway, cid, args.num_dht, args.max).await?;
    // Stable order for output
    let found: BTreeMap<_, _> = found.into_iter().collect();

    if args.json {
        let by_gateway: BTreeMap<String, Vec<OfferSummary>> = found
            .iter()
            .map(|(id, offers)| (id.to_string(), offers.iter().map(OfferSummary::from).collect()))
            .collect();
        println!(
            "{}",
            json!({ "success": true, "cid": cid, "gateway": gateway, "responses": by_gateway })
        );
        return Ok(());
    }

    let total: usize = found.values().map(Vec::len).sum();
    output::success(&format!(
        "{} of {} gateways answered with {} verified offers",
        found.len(),
        args.num_dht,
        total
    ));
    for (id, offers) in &found {
        output::header(&format!("Gateway {}", id));
        if offers.is_empty() {
            output::kv("Offers", "none");
        }
        output::offers(offers);
    }
    Ok(())
}

/// Run the find-offers-dht command.
pub async fn run(args: FindOffersDhtArgs, config: Option<&Path>) -> i32 {
    match execute(&args, config).await {
        Ok(()) => 0,
        Err(e) => super::fail(args.json, &e),
    }
}
