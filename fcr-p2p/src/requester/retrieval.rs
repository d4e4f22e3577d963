//! Paid content retrieval from a provider.

use fcr_core::{unix_now, SubCidOffer};
use std::time::Duration;
use tracing::{info, warn};

use crate::context::NodeContext;
use crate::error::{FcrP2pError, Result};
use crate::messages::{DataRetrievalRequest, DataRetrievalResponse, FcrMessage, FcrRequest, Sender};
use crate::reputation::ReputationEvent;
use crate::settings::RETRIEVAL_LANE;

use super::{new_nonce, paid_exchange, pay, reconcile_refund, reject, resolve_and_gate, violation};

/// Download the content named by `offer` from its provider.
///
/// Returns `None` if the provider no longer holds the content, in which
/// case the offer price is owed back.
pub async fn request(ctx: &NodeContext, offer: &SubCidOffer) -> Result<Option<Vec<u8>>> {
    if offer.expires_within(unix_now(), Duration::ZERO) {
        return Err(FcrP2pError::InvalidArgument(format!("offer expired at {}", offer.expiry)));
    }

    let provider = &offer.provider;
    let record = resolve_and_gate(ctx, provider).await?;
    let expected = ctx.settings.retrieval_price(offer.price);
    let voucher = pay(ctx, &record, RETRIEVAL_LANE, expected).await?;

    let request = DataRetrievalRequest {
        sender: Sender::from_signer(&ctx.signer),
        nonce: new_nonce(),
        offer: offer.clone(),
        voucher,
    };
    let msg = FcrMessage::new_signed(DataRetrievalRequest::MESSAGE_TYPE, &request, &ctx.signer)?;

    let (_, ack) = paid_exchange(ctx, &record, &msg, ctx.settings.short_timeout).await?;
    let response: DataRetrievalResponse = ack.decode().map_err(|e| violation(ctx, provider, e.to_string()))?;

    let refund = response.refund.as_ref();
    if response.nonce != request.nonce {
        return Err(reject(ctx, provider, refund, "request nonce mismatch").await);
    }
    if response.cid != offer.sub_cid {
        return Err(reject(ctx, provider, refund, "response for a different CID").await);
    }

    if response.data.is_empty() {
        warn!("Provider {} no longer holds {}", provider, offer.sub_cid);
        reconcile_refund(ctx, provider, refund, offer.price).await;
        return Ok(None);
    }
    if !offer.sub_cid.matches(&response.data) {
        return Err(reject(ctx, provider, refund, "delivered bytes do not match the CID").await);
    }

    if reconcile_refund(ctx, provider, refund, 0).await {
        ctx.reputation.update_record(provider, ReputationEvent::ContentRetrieved);
    }

    info!("Retrieved {} bytes of {} from {}", response.data.len(), offer.sub_cid, provider);
    Ok(Some(response.data))
}
