//! Serve command implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fcr_core::{unix_now, ContentId, Offer};
use fcr_p2p::requester::offer_publish;
use fcr_p2p::{NodeContext, NodeRole, Server};
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::load_config;
use crate::config::OfferTerms;
use crate::output;

/// Load every regular file in `dir` into the content store.
async fn load_content(ctx: &NodeContext, dir: &Path) -> Result<Vec<ContentId>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Cannot read content_dir {}", dir.display()))?;
    let mut cids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let data = tokio::fs::read(entry.path()).await?;
        let cid = ctx.content.insert(data);
        info!("Serving {} as {}", entry.path().display(), cid);
        cids.push(cid);
    }
    Ok(cids)
}

/// Sign a fresh offer for `cids` and push it to every registered gateway.
async fn publish(ctx: &NodeContext, cids: &[ContentId], terms: &OfferTerms) -> Result<()> {
    let offer_signer = ctx.offer_signer.as_ref().context("Providers need an offer_key")?;
    let offer = Offer::new_signed(
        ctx.node_id(),
        cids.to_vec(),
        terms.price,
        unix_now() + terms.lifetime_secs,
        terms.qos,
        offer_signer,
    )?;

    ctx.directory.sync_gateways().await?;
    for gateway in ctx.directory.gateways() {
        match offer_publish::request(ctx, &gateway.node_id, &offer).await {
            Ok(indexed) => info!("{} indexed {} CIDs", gateway.node_id, indexed),
            Err(e) => warn!("Publishing to {} failed: {}", gateway.node_id, e),
        }
    }
    Ok(())
}

/// Re-sign and republish at half the offer lifetime so gateways never
/// hold an offer close to expiry.
async fn republish_loop(ctx: Arc<NodeContext>, cids: Vec<ContentId>, terms: OfferTerms) {
    let period = Duration::from_secs((terms.lifetime_secs / 2).max(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        if let Err(e) = publish(&ctx, &cids, &terms).await {
            warn!("Offer publication failed: {:#}", e);
        }
    }
}

async fn execute(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let ctx = config.build_context()?;

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Cannot listen on {}", config.listen_addr))?;
    output::success(&format!(
        "Node {} ({:?}) listening on {}",
        ctx.node_id(),
        ctx.role,
        listener.local_addr()?
    ));
    let server = Server::new(ctx.clone()).spawn(listener);

    if ctx.role == NodeRole::Provider {
        if let Some(dir) = &config.content_dir {
            let cids = load_content(&ctx, dir).await?;
            if cids.is_empty() {
                output::warn(&format!("No files in {}", dir.display()));
            } else {
                tokio::spawn(republish_loop(ctx.clone(), cids, config.offer.clone()));
            }
        }
    }

    tokio::select! {
        result = server => result.context("Server task panicked")??,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}

/// Run the serve command.
pub async fn run(config: Option<&Path>) -> i32 {
    match execute(config).await {
        Ok(()) => 0,
        Err(e) => super::fail(false, &e),
    }
}
