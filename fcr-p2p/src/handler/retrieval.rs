//! Provider side of content retrieval.

use fcr_core::unix_now;
use std::time::Duration;
use tracing::{info, warn};

use crate::context::NodeContext;
use crate::error::Result;
use crate::messages::{Ack, DataRetrievalRequest, DataRetrievalResponse, FcrMessage};
use crate::settings::RETRIEVAL_LANE;

use super::{accept_payment, authenticate, refund};

/// Why this node will not honour an offer.
fn reject_offer(ctx: &NodeContext, request: &DataRetrievalRequest) -> Option<String> {
    let offer = &request.offer;
    if offer.provider != ctx.node_id() {
        return Some(format!("offer is from provider {}", offer.provider));
    }
    let Some(offer_signer) = &ctx.offer_signer else {
        return Some("this node does not sign offers".into());
    };
    if !offer.verify(&offer_signer.public_key_bytes(), offer_signer.version()) {
        return Some("offer not signed by this node".into());
    }
    if offer.expires_within(unix_now(), Duration::ZERO) {
        return Some(format!("offer expired at {}", offer.expiry));
    }
    None
}

/// Deliver content under one of this node's own offers.
///
/// The offer is checked after payment; a rejected offer is refunded above
/// the search fee. Content that is no longer held is answered with empty
/// data and a refund of the offer price.
pub async fn handle(ctx: &NodeContext, msg: &FcrMessage) -> Result<Ack> {
    let request: DataRetrievalRequest = match authenticate(ctx, msg).await {
        Ok(request) => request,
        Err(ack) => return Ok(ack),
    };
    let sender = request.sender.id;
    let cid = request.offer.sub_cid;

    let expected = ctx.settings.retrieval_price(request.offer.price);
    let received = match accept_payment(ctx, &sender, &request.voucher, RETRIEVAL_LANE, expected).await {
        Ok(received) => received,
        Err(ack) => return Ok(ack),
    };

    if let Some(reason) = reject_offer(ctx, &request) {
        warn!("Rejected retrieval of {} by {}: {}", cid, sender, reason);
        let refund = refund(
            ctx,
            &sender,
            RETRIEVAL_LANE,
            received.saturating_sub(ctx.settings.search_price),
        )
        .await;
        return Ok(Ack::fail_with_refund(format!("Invalid offer: {}", reason), refund.as_ref()));
    }

    let (data, refund) = match ctx.content.get(&cid) {
        Some(data) => (data, None),
        None => {
            warn!("Content {} requested by {} is gone", cid, sender);
            (Vec::new(), refund(ctx, &sender, RETRIEVAL_LANE, request.offer.price).await)
        }
    };

    info!("Delivered {} bytes of {} to {}", data.len(), cid, sender);
    Ack::ok(&DataRetrievalResponse {
        nonce: request.nonce,
        cid,
        data,
        refund,
    })
}
