//! Liveness handshake run before opening a channel.

use fcr_core::NodeId;
use tracing::debug;

use crate::context::NodeContext;
use crate::error::{FcrP2pError, Result};
use crate::messages::{EstablishmentRequest, EstablishmentResponse, FcrMessage, FcrRequest, Sender};

use super::{free_exchange, new_nonce};

/// Challenge `peer` and check it echoes the challenge under its own key.
///
/// Nothing is paid, so failures leave the peer's reputation alone.
pub async fn request(ctx: &NodeContext, peer: &NodeId) -> Result<()> {
    let record = ctx.directory.resolve(peer).await?;

    let request = EstablishmentRequest {
        sender: Sender::from_signer(&ctx.signer),
        nonce: new_nonce(),
        challenge: rand::random(),
    };
    let msg = FcrMessage::new_signed(EstablishmentRequest::MESSAGE_TYPE, &request, &ctx.signer)?;

    let ack = free_exchange(ctx, &record, &msg).await?;
    let response: EstablishmentResponse = ack.decode()?;
    if response.nonce != request.nonce || response.challenge != request.challenge {
        return Err(FcrP2pError::ProtocolViolation("establishment challenge mismatch".into()));
    }

    debug!("Established with {}", peer);
    Ok(())
}
