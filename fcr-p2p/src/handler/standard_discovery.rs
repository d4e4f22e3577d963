//! Gateway side of standard discovery.

use tracing::info;

use crate::context::NodeContext;
use crate::error::Result;
use crate::messages::{Ack, FcrMessage, StandardDiscoveryRequest, StandardDiscoveryResponse};
use crate::settings::STANDARD_DISCOVERY_LANE;

use super::{accept_payment, authenticate, refund};

/// Serve up to `max_offers` cached offers and refund the unused slots.
pub async fn handle(ctx: &NodeContext, msg: &FcrMessage) -> Result<Ack> {
    let request: StandardDiscoveryRequest = match authenticate(ctx, msg).await {
        Ok(request) => request,
        Err(ack) => return Ok(ack),
    };
    let sender = request.sender.id;
    if request.max_offers == 0 {
        return Ok(Ack::fail("max_offers must be at least 1"));
    }

    let expected = ctx.settings.standard_discovery_price(request.max_offers);
    if let Err(ack) = accept_payment(ctx, &sender, &request.voucher, STANDARD_DISCOVERY_LANE, expected).await {
        return Ok(ack);
    }

    let offers = ctx.offers.get(
        &request.cid,
        request.max_offers as usize,
        ctx.settings.min_offer_validity,
    );
    let owed = ctx.settings.unused_slot_refund(request.max_offers, offers.len());
    let refund = refund(ctx, &sender, STANDARD_DISCOVERY_LANE, owed).await;

    info!(
        "Served {} of {} offers for {} to {}",
        offers.len(),
        request.max_offers,
        request.cid,
        sender
    );
    Ack::ok(&StandardDiscoveryResponse {
        nonce: request.nonce,
        cid: request.cid,
        offers,
        refund,
    })
}
