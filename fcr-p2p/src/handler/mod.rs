//! Server side of the escrow-gated protocol.
//!
//! A handler authenticates the request, takes the payment, serves at most
//! what was paid for, refunds any per-unit shortfall and signs the answer.
//! Requests that fail authentication or carry a payment on the wrong lane
//! are answered with a signed negative ACK before any payment is taken.

pub mod dht_discovery;
pub mod establishment;
pub mod offer_publish;
pub mod retrieval;
pub mod standard_discovery;

use std::sync::Arc;

use fcr_core::NodeId;
use fcr_payment::Voucher;
use tracing::{debug, warn};

use crate::context::NodeContext;
use crate::error::{FcrP2pError, Result};
use crate::messages::{Ack, FcrMessage, FcrRequest, MessageType};
use crate::settings::PROTOCOL_VERSION;
use crate::transport::FcrConnection;

/// Serve one request on an inbound connection.
pub async fn serve_connection(ctx: Arc<NodeContext>, mut conn: FcrConnection) -> Result<()> {
    let request = conn.receive_message(ctx.settings.short_timeout).await?;
    debug!("{:?} from {}", request.message_type, conn.remote());
    let response = dispatch(&ctx, &request).await?;
    conn.send_message(&response, ctx.settings.short_timeout).await
}

/// Handle one request message and build the signed response.
pub async fn dispatch(ctx: &NodeContext, request: &FcrMessage) -> Result<FcrMessage> {
    let response_type = request
        .message_type
        .response()
        .ok_or_else(|| FcrP2pError::ProtocolViolation(format!("{:?} is not a request", request.message_type)))?;

    let ack = if request.protocol_version != PROTOCOL_VERSION {
        Ack::fail(format!("Unsupported protocol version {}", request.protocol_version))
    } else {
        let handled = match request.message_type {
            MessageType::EstablishmentRequest => establishment::handle(ctx, request).await,
            MessageType::OfferPublishRequest => offer_publish::handle(ctx, request).await,
            MessageType::StandardDiscoveryRequest => standard_discovery::handle(ctx, request).await,
            MessageType::DhtDiscoveryRequest => dht_discovery::handle(ctx, request).await,
            MessageType::DataRetrievalRequest => retrieval::handle(ctx, request).await,
            other => Err(FcrP2pError::ProtocolViolation(format!("no handler for {:?}", other))),
        };
        handled.unwrap_or_else(|e| {
            warn!("Handler failed on {:?}: {}", request.message_type, e);
            Ack::fail(format!("Internal error: {}", e))
        })
    };

    FcrMessage::new_signed(response_type, &ack, &ctx.signer)
}

/// Decode a request and authenticate its sender.
///
/// Registered senders are checked against their registry key, with one
/// resync on failure. Unregistered senders must be self-certifying.
pub(crate) async fn authenticate<R: FcrRequest>(ctx: &NodeContext, msg: &FcrMessage) -> std::result::Result<R, Ack> {
    let request: R = msg
        .decode()
        .map_err(|e| Ack::fail(format!("Undecodable request: {}", e)))?;
    let sender = request.sender();

    if sender.id == ctx.node_id() {
        return Err(Ack::fail("Request from self"));
    }

    if let Some(record) = ctx.directory.get(&sender.id) {
        if msg.verify(&record.msg_key, record.msg_key_version) {
            return Ok(request);
        }
    }

    let verified = match ctx.directory.sync(&sender.id).await {
        Ok(Some(record)) => msg.verify(&record.msg_key, record.msg_key_version),
        Ok(None) | Err(_) => sender.is_self_certified() && msg.verify(&sender.key, sender.key_version),
    };
    if verified {
        Ok(request)
    } else {
        warn!("Invalid request signature from {}", sender.id);
        Err(Ack::fail("Invalid request signature"))
    }
}

/// Take a payment of at least `expected` on `lane`.
///
/// A short payment is refunded above the search fee and answered with a
/// negative ACK carrying the refund voucher.
pub(crate) async fn accept_payment(
    ctx: &NodeContext,
    sender: &NodeId,
    voucher: &Voucher,
    lane: u64,
    expected: u64,
) -> std::result::Result<u64, Ack> {
    if voucher.lane != lane {
        return Err(Ack::fail(format!(
            "Payment on lane {}, expected lane {}",
            voucher.lane, lane
        )));
    }

    let (received, _) = ctx
        .payments
        .receive(sender, voucher)
        .await
        .map_err(|e| Ack::fail(format!("Payment rejected: {}", e)))?;

    if received < expected {
        let refund = refund(ctx, sender, lane, received.saturating_sub(ctx.settings.search_price)).await;
        warn!("Short payment from {}: {} < {}", sender, received, expected);
        return Err(Ack::fail_with_refund(
            format!("Short payment received: {}, expected: {}", received, expected),
            refund.as_ref(),
        ));
    }

    debug!("Accepted {} from {} on lane {}", received, sender, lane);
    Ok(received)
}

/// Refund `amount` to `sender` on `lane`; `None` for a zero amount or on failure.
pub(crate) async fn refund(ctx: &NodeContext, sender: &NodeId, lane: u64, amount: u64) -> Option<Voucher> {
    if amount == 0 {
        return None;
    }
    match ctx.payments.refund(sender, lane, amount).await {
        Ok(voucher) => Some(voucher),
        Err(e) => {
            warn!("Could not refund {} to {}: {}", amount, sender, e);
            None
        }
    }
}
