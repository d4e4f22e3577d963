//! Echo a requester's challenge before it opens a channel.

use tracing::debug;

use crate::context::NodeContext;
use crate::error::Result;
use crate::messages::{Ack, EstablishmentRequest, EstablishmentResponse, FcrMessage};

use super::authenticate;

/// Free of charge: the requester has no channel yet.
pub async fn handle(ctx: &NodeContext, msg: &FcrMessage) -> Result<Ack> {
    let request: EstablishmentRequest = match authenticate(ctx, msg).await {
        Ok(request) => request,
        Err(ack) => return Ok(ack),
    };

    debug!("Establishment from {}", request.sender.id);
    Ack::ok(&EstablishmentResponse {
        nonce: request.nonce,
        challenge: request.challenge,
    })
}
