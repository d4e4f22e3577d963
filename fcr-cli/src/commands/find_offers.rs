//! Find-offers command implementation.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use fcr_p2p::requester::standard_discovery;
use serde_json::json;

use super::{choose_gateway, load_config, parse_cid, OfferSummary};
use crate::output;

/// Arguments for the find-offers command.
#[derive(Args)]
pub struct FindOffersArgs {
    /// Content ID (hex)
    pub cid: String,

    /// Gateway node ID (default: best-ranked registered gateway)
    #[arg(short, long)]
    pub gateway: Option<String>,

    /// Maximum number of offers to pay for
    #[arg(short, long, default_value = "5")]
    pub max: u32,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

async fn execute(args: &FindOffersArgs, config: Option<&Path>) -> Result<()> {
    let cid = parse_cid(&args.cid)?;
    let config = load_config(config)?;
    let ctx = config.build_context()?;
    let gateway = choose_gateway(&ctx, args.gateway.as_deref()).await?;

    if !args.json {
        output::info(&format!("Asking {} for up to {} offers...", gateway, args.max));
    }
    let offers = standard_discovery::request(&ctx, &gateway, cid, args.max).await?;

    if args.json {
        let summaries: Vec<OfferSummary> = offers.iter().map(OfferSummary::from).collect();
        println!(
            "{}",
            json!({ "success": true, "cid": cid, "gateway": gateway, "offers": summaries })
        );
        return Ok(());
    }

    if offers.is_empty() {
        output::warn(&format!("No offers for {}", cid));
        output::hint("Try `fcr find-offers-dht` to search more gateways.");
    } else {
        output::success(&format!("{} verified offers for {}", offers.len(), cid));
        output::offers(&offers);
    }
    Ok(())
}

/// Run the find-offers command.
pub async fn run(args: FindOffersArgs, config: Option<&Path>) -> i32 {
    match execute(&args, config).await {
        Ok(()) => 0,
        Err(e) => super::fail(args.json, &e),
    }
}
