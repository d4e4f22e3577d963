//! Paid offer discovery fanned out by a gateway.
//!
//! The gateway relays the signed answers of the sub-gateways it queried
//! without checking them. This side re-verifies everything, and any failure
//! is charged to the gateway that relayed it: that is the only peer this
//! node paid.

use std::collections::{HashMap, HashSet};

use fcr_core::{ContentId, NodeId, SubCidOffer};
use tracing::info;

use crate::context::NodeContext;
use crate::error::{FcrP2pError, Result};
use crate::messages::{
    Ack, DhtDiscoveryRequest, DhtDiscoveryResponse, DhtSubResponse, FcrMessage, FcrRequest, MessageType, Sender,
    StandardDiscoveryResponse,
};
use crate::reputation::ReputationEvent;
use crate::settings::DHT_DISCOVERY_LANE;

use super::{
    new_nonce, paid_exchange, pay, reconcile_refund, reject, resolve_and_gate, verify_from, verify_offer, violation,
};

/// Offers found per sub-gateway.
pub type DhtOffers = HashMap<NodeId, Vec<SubCidOffer>>;

/// Decode and verify one relayed sub-response.
async fn verify_sub_response(
    ctx: &NodeContext,
    cid: &ContentId,
    max_offers_per_dht: u32,
    sub: &DhtSubResponse,
) -> std::result::Result<Vec<SubCidOffer>, String> {
    let msg = FcrMessage::from_bytes(&sub.message).map_err(|e| e.to_string())?;
    if msg.message_type != MessageType::StandardDiscoveryResponse {
        return Err(format!("sub-response of type {:?}", msg.message_type));
    }

    let record = ctx
        .directory
        .resolve(&sub.gateway)
        .await
        .map_err(|e| format!("sub-gateway {}: {}", sub.gateway, e))?;
    if verify_from(ctx, &record, &msg).await.is_none() {
        return Err(format!("bad signature on sub-response from {}", sub.gateway));
    }

    let ack: Ack = msg.decode().map_err(|e| e.to_string())?;
    if !ack.success {
        return Err(format!("relayed a negative ACK from {}", sub.gateway));
    }
    let response: StandardDiscoveryResponse = ack.decode().map_err(|e| e.to_string())?;
    if response.cid != *cid {
        return Err(format!("sub-response from {} for another CID", sub.gateway));
    }
    if response.offers.len() > max_offers_per_dht as usize {
        return Err(format!(
            "{} returned {} offers, cap is {}",
            sub.gateway,
            response.offers.len(),
            max_offers_per_dht
        ));
    }

    // The same offer may legitimately be indexed by several gateways
    let mut seen = HashSet::new();
    for offer in &response.offers {
        verify_offer(ctx, cid, offer, &mut seen).await?;
    }
    Ok(response.offers)
}

/// Ask `gateway` to query the `num_dht` gateways closest to `cid` for up to
/// `max_offers_per_dht` offers each.
pub async fn request(
    ctx: &NodeContext,
    gateway: &NodeId,
    cid: ContentId,
    num_dht: u32,
    max_offers_per_dht: u32,
) -> Result<DhtOffers> {
    if num_dht == 0 || num_dht > ctx.settings.max_num_dht {
        return Err(FcrP2pError::InvalidArgument(format!(
            "num_dht must be in 1..={}",
            ctx.settings.max_num_dht
        )));
    }
    if max_offers_per_dht == 0 {
        return Err(FcrP2pError::InvalidArgument("max_offers_per_dht must be at least 1".into()));
    }

    let record = resolve_and_gate(ctx, gateway).await?;
    let expected = ctx.settings.dht_discovery_price(num_dht, max_offers_per_dht);
    let voucher = pay(ctx, &record, DHT_DISCOVERY_LANE, expected).await?;

    let request = DhtDiscoveryRequest {
        sender: Sender::from_signer(&ctx.signer),
        nonce: new_nonce(),
        cid,
        num_dht,
        max_offers_per_dht,
        voucher,
    };
    let msg = FcrMessage::new_signed(DhtDiscoveryRequest::MESSAGE_TYPE, &request, &ctx.signer)?;

    let (_, ack) = paid_exchange(ctx, &record, &msg, ctx.settings.long_timeout).await?;
    let response: DhtDiscoveryResponse = ack.decode().map_err(|e| violation(ctx, gateway, e.to_string()))?;

    let refund = response.refund.as_ref();
    if response.nonce != request.nonce {
        return Err(reject(ctx, gateway, refund, "request nonce mismatch").await);
    }
    if response.cid != cid {
        return Err(reject(ctx, gateway, refund, "response for a different CID").await);
    }
    if response.responses.len() + response.failed.len() > num_dht as usize {
        return Err(reject(ctx, gateway, refund, "more sub-gateways than requested").await);
    }

    let me = ctx.node_id();
    let mut gateways = HashSet::new();
    let mut found: DhtOffers = HashMap::new();
    for sub in &response.responses {
        if sub.gateway == *gateway || sub.gateway == me || !gateways.insert(sub.gateway) {
            let reason = format!("invalid sub-gateway {}", sub.gateway);
            return Err(reject(ctx, gateway, refund, reason).await);
        }
        match verify_sub_response(ctx, &cid, max_offers_per_dht, sub).await {
            Ok(offers) => {
                found.insert(sub.gateway, offers);
            }
            Err(reason) => return Err(reject(ctx, gateway, refund, reason).await),
        }
    }

    for offers in found.values() {
        for offer in offers {
            ctx.offers.add_sub_offer(offer.clone());
            ctx.reputation.update_record(gateway, ReputationEvent::OfferVerified);
        }
    }

    let slot_price = ctx.settings.dht_slot_price(max_offers_per_dht);
    let unanswered = u64::from(num_dht) - found.len() as u64;
    let owed = found
        .values()
        .map(|offers| ctx.settings.unused_slot_refund(max_offers_per_dht, offers.len()))
        .sum::<u64>()
        + unanswered * slot_price;

    if reconcile_refund(ctx, gateway, refund, owed).await {
        ctx.reputation.update_record(gateway, ReputationEvent::DhtOfferRetrieved);
    }

    info!(
        "DHT discovery for {} via {}: {} of {} sub-gateways answered",
        cid,
        gateway,
        found.len(),
        num_dht
    );
    Ok(found)
}
