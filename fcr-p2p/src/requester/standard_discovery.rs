//! Paid offer discovery against a single gateway.

use std::collections::HashSet;

use fcr_core::{ContentId, NodeId, SubCidOffer};
use tracing::{debug, info};

use crate::context::NodeContext;
use crate::directory::PeerRecord;
use crate::error::{FcrP2pError, Result};
use crate::messages::{FcrMessage, FcrRequest, Sender, StandardDiscoveryRequest, StandardDiscoveryResponse};
use crate::reputation::ReputationEvent;
use crate::settings::STANDARD_DISCOVERY_LANE;

use super::{new_nonce, paid_exchange, pay, reconcile_refund, reject, resolve_and_gate, verify_offer, violation};

/// Pay, send, receive, verify, correlate. Returns the signed response
/// message and its decoded payload.
async fn query(
    ctx: &NodeContext,
    record: &PeerRecord,
    cid: ContentId,
    max_offers: u32,
) -> Result<(FcrMessage, StandardDiscoveryResponse)> {
    let gateway = &record.node_id;
    let expected = ctx.settings.standard_discovery_price(max_offers);
    let voucher = pay(ctx, record, STANDARD_DISCOVERY_LANE, expected).await?;

    let request = StandardDiscoveryRequest {
        sender: Sender::from_signer(&ctx.signer),
        nonce: new_nonce(),
        cid,
        max_offers,
        voucher,
    };
    let msg = FcrMessage::new_signed(StandardDiscoveryRequest::MESSAGE_TYPE, &request, &ctx.signer)?;

    let (raw, ack) = paid_exchange(ctx, record, &msg, ctx.settings.short_timeout).await?;
    let response: StandardDiscoveryResponse = ack.decode().map_err(|e| violation(ctx, gateway, e.to_string()))?;

    let refund = response.refund.as_ref();
    if response.nonce != request.nonce {
        return Err(reject(ctx, gateway, refund, "request nonce mismatch").await);
    }
    if response.cid != cid {
        return Err(reject(ctx, gateway, refund, "response for a different CID").await);
    }
    if response.offers.len() > max_offers as usize {
        let reason = format!("{} offers for {} requested", response.offers.len(), max_offers);
        return Err(reject(ctx, gateway, refund, reason).await);
    }

    Ok((raw, response))
}

fn check_args(max_offers: u32) -> Result<()> {
    if max_offers == 0 {
        return Err(FcrP2pError::InvalidArgument("max_offers must be at least 1".into()));
    }
    Ok(())
}

/// Ask `gateway` for up to `max_offers` offers for `cid`.
///
/// Every returned offer is verified before any is accepted. Accepted offers
/// are added to the local offer store.
pub async fn request(
    ctx: &NodeContext,
    gateway: &NodeId,
    cid: ContentId,
    max_offers: u32,
) -> Result<Vec<SubCidOffer>> {
    check_args(max_offers)?;
    let record = resolve_and_gate(ctx, gateway).await?;
    let (_, response) = query(ctx, &record, cid, max_offers).await?;

    let mut seen = HashSet::new();
    for offer in &response.offers {
        if let Err(reason) = verify_offer(ctx, &cid, offer, &mut seen).await {
            return Err(reject(ctx, gateway, response.refund.as_ref(), reason).await);
        }
    }
    for offer in &response.offers {
        ctx.offers.add_sub_offer(offer.clone());
        ctx.reputation.update_record(gateway, ReputationEvent::OfferVerified);
    }

    let owed = ctx.settings.unused_slot_refund(max_offers, response.offers.len());
    if reconcile_refund(ctx, gateway, response.refund.as_ref(), owed).await {
        ctx.reputation.update_record(gateway, ReputationEvent::StandardOfferRetrieved);
    }

    info!("Got {} offers for {} from {}", response.offers.len(), cid, gateway);
    Ok(response.offers)
}

/// Same call without per-offer verification, for relaying.
///
/// Returns the gateway's signed response exactly as received and the number
/// of offers it carries.
pub async fn request_unverified(
    ctx: &NodeContext,
    gateway: &NodeId,
    cid: ContentId,
    max_offers: u32,
) -> Result<(FcrMessage, usize)> {
    check_args(max_offers)?;
    let record = resolve_and_gate(ctx, gateway).await?;
    let (raw, response) = query(ctx, &record, cid, max_offers).await?;

    let found = response.offers.len();
    let owed = ctx.settings.unused_slot_refund(max_offers, found);
    reconcile_refund(ctx, gateway, response.refund.as_ref(), owed).await;

    debug!("Relaying {} unverified offers for {} from {}", found, cid, gateway);
    Ok((raw, found))
}
