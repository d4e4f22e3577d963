//! Retrieve command implementation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use fcr_p2p::requester::{retrieval, standard_discovery};
use tracing::warn;

use super::{choose_gateway, load_config, parse_cid};
use crate::output;

/// Arguments for the retrieve command.
#[derive(Args)]
pub struct RetrieveArgs {
    /// Content ID (hex)
    pub cid: String,

    /// Gateway to discover offers from (default: best-ranked registered gateway)
    #[arg(short, long)]
    pub gateway: Option<String>,

    /// Number of offers to compare
    #[arg(short, long, default_value = "3")]
    pub max: u32,

    /// Where to write the content
    #[arg(short, long)]
    pub out: PathBuf,
}

async fn execute(args: &RetrieveArgs, config: Option<&Path>) -> Result<()> {
    let cid = parse_cid(&args.cid)?;
    let config = load_config(config)?;
    let ctx = config.build_context()?;
    let gateway = choose_gateway(&ctx, args.gateway.as_deref()).await?;

    let mut offers = standard_discovery::request(&ctx, &gateway, cid, args.max).await?;
    if offers.is_empty() {
        bail!("No offers for {}", cid);
    }
    offers.sort_by_key(|o| o.price);

    for offer in &offers {
        output::info(&format!("Retrieving from {} at price {}...", offer.provider, offer.price));
        match retrieval::request(&ctx, offer).await {
            Ok(Some(data)) => {
                tokio::fs::write(&args.out, &data)
                    .await
                    .with_context(|| format!("Cannot write {}", args.out.display()))?;
                output::success(&format!("Wrote {} bytes to {}", data.len(), args.out.display()));
                return Ok(());
            }
            Ok(None) => output::warn(&format!("{} no longer holds {}", offer.provider, cid)),
            Err(e) => warn!("Retrieval from {} failed: {}", offer.provider, e),
        }
    }
    bail!("No provider delivered {}", cid)
}

/// Run the retrieve command.
pub async fn run(args: RetrieveArgs, config: Option<&Path>) -> i32 {
    match execute(&args, config).await {
        Ok(()) => 0,
        Err(e) => super::fail(false, &e),
    }
}
