//! Gateway side of offer publication.

use fcr_core::unix_now;
use tracing::{info, warn};

use crate::context::NodeContext;
use crate::directory::NodeRole;
use crate::error::Result;
use crate::messages::{Ack, FcrMessage, OfferPublishRequest, OfferPublishResponse};

use super::authenticate;

/// Index a provider's signed offer.
///
/// Only registered providers may publish, and only offers signed with the
/// offer key in their registry record.
pub async fn handle(ctx: &NodeContext, msg: &FcrMessage) -> Result<Ack> {
    let request: OfferPublishRequest = match authenticate(ctx, msg).await {
        Ok(request) => request,
        Err(ack) => return Ok(ack),
    };
    let sender = request.sender.id;
    let offer = &request.offer;

    if ctx.role != NodeRole::Gateway {
        return Ok(Ack::fail("Not a gateway"));
    }

    let record = match ctx.directory.resolve(&sender).await {
        Ok(record) if record.role == NodeRole::Provider => record,
        _ => return Ok(Ack::fail("Publisher is not a registered provider")),
    };
    if offer.provider != sender {
        return Ok(Ack::fail("Offer names another provider"));
    }
    if !offer.verify(&record.offer_key, record.offer_key_version) {
        warn!("Bad offer signature from {}", sender);
        return Ok(Ack::fail("Invalid offer signature"));
    }
    if offer.expires_within(unix_now(), ctx.settings.min_offer_validity) {
        return Ok(Ack::fail(format!("Offer expires at {}", offer.expiry)));
    }

    let indexed = ctx.offers.add_offer(offer)?;
    info!("Indexed {} of {} CIDs offered by {}", indexed, offer.cids.len(), sender);
    Ack::ok(&OfferPublishResponse {
        nonce: request.nonce,
        indexed: indexed as u32,
    })
}
