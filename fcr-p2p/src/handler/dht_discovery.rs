//! Gateway side of DHT discovery: fan a paid query out to the gateways
//! closest to the CID and relay their signed answers untouched.

use fcr_core::{ContentId, NodeId};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::context::NodeContext;
use crate::directory::PeerRecord;
use crate::error::Result;
use crate::messages::{Ack, DhtDiscoveryRequest, DhtDiscoveryResponse, DhtSubResponse, FcrMessage};
use crate::requester::standard_discovery;
use crate::settings::DHT_DISCOVERY_LANE;

use super::{accept_payment, authenticate, refund};

/// Up to `count` usable gateways closest to `cid`, refreshing the gateway
/// list once if the cache is short.
async fn pick_gateways(ctx: &NodeContext, cid: &ContentId, count: usize, exclude: &[NodeId]) -> Vec<PeerRecord> {
    let usable = |ctx: &NodeContext| -> Vec<PeerRecord> {
        ctx.directory
            .closest_gateways(cid, usize::MAX, exclude)
            .into_iter()
            .filter(|r| ctx.reputation.is_usable(&r.node_id))
            .take(count)
            .collect()
    };

    let picked = usable(ctx);
    if picked.len() >= count {
        return picked;
    }
    match ctx.directory.sync_gateways().await {
        Ok(n) => debug!("Refreshed gateway list: {} gateways", n),
        Err(e) => warn!("Gateway list refresh failed: {}", e),
    }
    usable(ctx)
}

/// Relay one standard discovery per chosen gateway and refund every slot
/// that was not filled.
pub async fn handle(ctx: &NodeContext, msg: &FcrMessage) -> Result<Ack> {
    let request: DhtDiscoveryRequest = match authenticate(ctx, msg).await {
        Ok(request) => request,
        Err(ack) => return Ok(ack),
    };
    let sender = request.sender.id;
    let (num_dht, max_per) = (request.num_dht, request.max_offers_per_dht);

    if num_dht == 0 || num_dht > ctx.settings.max_num_dht {
        return Ok(Ack::fail(format!("num_dht must be in 1..={}", ctx.settings.max_num_dht)));
    }
    if max_per == 0 {
        return Ok(Ack::fail("max_offers_per_dht must be at least 1"));
    }

    let expected = ctx.settings.dht_discovery_price(num_dht, max_per);
    if let Err(ack) = accept_payment(ctx, &sender, &request.voucher, DHT_DISCOVERY_LANE, expected).await {
        return Ok(ack);
    }

    let exclude = [ctx.node_id(), sender];
    let gateways = pick_gateways(ctx, &request.cid, num_dht as usize, &exclude).await;
    debug!("Fanning out {} to {} gateways", request.cid, gateways.len());

    let results = join_all(
        gateways
            .iter()
            .map(|g| standard_discovery::request_unverified(ctx, &g.node_id, request.cid, max_per)),
    )
    .await;

    let mut responses = Vec::new();
    let mut failed = Vec::new();
    let mut owed = 0u64;
    for (gateway, result) in gateways.iter().zip(results) {
        let relayed = result.and_then(|(raw, found)| Ok((raw.to_bytes()?, found)));
        match relayed {
            Ok((message, found)) => {
                owed += ctx.settings.unused_slot_refund(max_per, found);
                responses.push(DhtSubResponse {
                    gateway: gateway.node_id,
                    message,
                });
            }
            Err(e) => {
                warn!("Sub-gateway {} failed: {}", gateway.node_id, e);
                owed += ctx.settings.dht_slot_price(max_per);
                failed.push(gateway.node_id);
            }
        }
    }
    let unqueried = u64::from(num_dht) - gateways.len() as u64;
    owed += unqueried * ctx.settings.dht_slot_price(max_per);

    let refund = refund(ctx, &sender, DHT_DISCOVERY_LANE, owed).await;
    info!(
        "DHT discovery for {} from {}: {} answered, {} failed, {} unqueried",
        request.cid,
        sender,
        responses.len(),
        failed.len(),
        unqueried
    );
    Ack::ok(&DhtDiscoveryResponse {
        nonce: request.nonce,
        cid: request.cid,
        responses,
        failed,
        refund,
    })
}
