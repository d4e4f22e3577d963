//! Provider pushes a signed offer to a gateway.

use fcr_core::{NodeId, Offer};
use tracing::info;

use crate::context::NodeContext;
use crate::error::{FcrP2pError, Result};
use crate::messages::{FcrMessage, FcrRequest, OfferPublishRequest, OfferPublishResponse, Sender};

use super::{free_exchange, new_nonce};

/// Publish `offer` to `gateway`. Returns how many CIDs the gateway indexed.
pub async fn request(ctx: &NodeContext, gateway: &NodeId, offer: &Offer) -> Result<u32> {
    if offer.provider != ctx.node_id() {
        return Err(FcrP2pError::InvalidArgument("can only publish own offers".into()));
    }
    let record = ctx.directory.resolve(gateway).await?;

    let request = OfferPublishRequest {
        sender: Sender::from_signer(&ctx.signer),
        nonce: new_nonce(),
        offer: offer.clone(),
    };
    let msg = FcrMessage::new_signed(OfferPublishRequest::MESSAGE_TYPE, &request, &ctx.signer)?;

    let ack = free_exchange(ctx, &record, &msg).await?;
    let response: OfferPublishResponse = ack.decode()?;
    if response.nonce != request.nonce {
        return Err(FcrP2pError::ProtocolViolation("publish nonce mismatch".into()));
    }

    info!("Published offer for {} CIDs to {}", response.indexed, gateway);
    Ok(response.indexed)
}
