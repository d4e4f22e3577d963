//! Client side of the escrow-gated protocol.
//!
//! Every paid call follows the same sequence: resolve the peer, gate on its
//! reputation, pay (opening or topping up the channel if needed), send,
//! receive and verify the signed response, interpret the ACK, decode and
//! correlate, verify each returned item, then reconcile the refund.
//!
//! Once a payment has been made, every failure pends the peer. Network
//! failures and protocol violations are recorded as distinct events so
//! flakiness and dishonesty stay distinguishable in the history.

pub mod dht_discovery;
pub mod establishment;
pub mod offer_publish;
pub mod retrieval;
pub mod standard_discovery;

use std::collections::HashSet;
use std::time::Duration;

use fcr_core::{unix_now, ContentId, NodeId, SubCidOffer};
use fcr_payment::{PayOutcome, PaymentError, Voucher};
use tracing::{debug, warn};

use crate::context::NodeContext;
use crate::directory::PeerRecord;
use crate::error::{FcrP2pError, Result};
use crate::messages::{Ack, FcrMessage};
use crate::reputation::ReputationEvent;

/// Fresh correlation nonce.
pub(crate) fn new_nonce() -> u64 {
    rand::random()
}

/// Resolve a peer (one resync on a miss) and check its reputation.
pub(crate) async fn resolve_and_gate(ctx: &NodeContext, peer: &NodeId) -> Result<PeerRecord> {
    let record = ctx.directory.resolve(peer).await?;
    ctx.reputation.gate(peer)?;
    Ok(record)
}

/// Record an event and pend the peer.
pub(crate) fn penalize(ctx: &NodeContext, peer: &NodeId, event: ReputationEvent) {
    ctx.reputation.update_record(peer, event);
    ctx.reputation.pend(peer);
}

/// Penalize a peer for a bad response and build the error.
pub(crate) fn violation(ctx: &NodeContext, peer: &NodeId, reason: impl Into<String>) -> FcrP2pError {
    let reason = reason.into();
    warn!("Protocol violation by {}: {}", peer, reason);
    penalize(ctx, peer, ReputationEvent::InvalidResponseAfterPayment);
    FcrP2pError::ProtocolViolation(reason)
}

/// Pay `expected` to the peer on `lane`, funding the channel if needed.
///
/// A second funding request right after funding is fatal.
pub(crate) async fn pay(ctx: &NodeContext, record: &PeerRecord, lane: u64, expected: u64) -> Result<Voucher> {
    let peer = &record.node_id;
    let funding = expected.max(ctx.settings.topup_amount);

    match ctx.payments.pay(peer, lane, expected).await? {
        PayOutcome::Paid(voucher) => return Ok(voucher),
        PayOutcome::NeedCreate => {
            establishment::request(ctx, peer).await?;
            match ctx.payments.create(peer, record.wallet, funding).await {
                // Another call opened it first
                Ok(()) | Err(PaymentError::ChannelExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        PayOutcome::NeedTopup => ctx.payments.topup(peer, funding).await?,
    }

    match ctx.payments.pay(peer, lane, expected).await? {
        PayOutcome::Paid(voucher) => Ok(voucher),
        outcome => {
            warn!("Funding loop with {}: {:?} after funding", peer, outcome);
            Err(FcrP2pError::FundingLoop(peer.to_string()))
        }
    }
}

/// Connect, send one message and read one message back.
pub(crate) async fn send_and_receive(
    ctx: &NodeContext,
    addr: &str,
    request: &FcrMessage,
    limit: Duration,
) -> Result<FcrMessage> {
    let short = ctx.settings.short_timeout;
    let mut conn = ctx.connector.connect(addr, short).await?;
    conn.send_message(request, short).await?;
    conn.receive_message(limit).await
}

/// Verify a message against the peer's key, resyncing the peer once on failure.
///
/// Returns the record the message verified against.
pub(crate) async fn verify_from(ctx: &NodeContext, record: &PeerRecord, msg: &FcrMessage) -> Option<PeerRecord> {
    if msg.verify(&record.msg_key, record.msg_key_version) {
        return Some(record.clone());
    }

    debug!("Signature from {} failed, resyncing", record.node_id);
    match ctx.directory.sync(&record.node_id).await {
        Ok(Some(fresh)) if msg.verify(&fresh.msg_key, fresh.msg_key_version) => Some(fresh),
        _ => None,
    }
}

/// Exchange for calls that carry no payment. Failures do not touch reputation.
pub(crate) async fn free_exchange(ctx: &NodeContext, record: &PeerRecord, request: &FcrMessage) -> Result<Ack> {
    let response = send_and_receive(ctx, &record.addr, request, ctx.settings.short_timeout).await?;
    if Some(response.message_type) != request.message_type.response() {
        return Err(FcrP2pError::ProtocolViolation(format!(
            "unexpected {:?} response",
            response.message_type
        )));
    }
    if verify_from(ctx, record, &response).await.is_none() {
        return Err(FcrP2pError::ProtocolViolation("invalid response signature".into()));
    }
    let ack: Ack = response.decode()?;
    if !ack.success {
        return Err(FcrP2pError::RemoteError(ack.reason));
    }
    Ok(ack)
}

/// Send a paid request and return the signed response message with its
/// positive ACK.
pub(crate) async fn paid_exchange(
    ctx: &NodeContext,
    record: &PeerRecord,
    request: &FcrMessage,
    limit: Duration,
) -> Result<(FcrMessage, Ack)> {
    let peer = &record.node_id;

    let response = match send_and_receive(ctx, &record.addr, request, limit).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Network error with {} after payment: {}", peer, e);
            penalize(ctx, peer, ReputationEvent::NetworkErrorAfterPayment);
            return Err(e);
        }
    };

    if verify_from(ctx, record, &response).await.is_none() {
        return Err(violation(ctx, peer, "invalid response signature"));
    }
    if Some(response.message_type) != request.message_type.response() {
        return Err(violation(
            ctx,
            peer,
            format!("unexpected {:?} response", response.message_type),
        ));
    }

    let ack: Ack = match response.decode() {
        Ok(ack) => ack,
        Err(e) => return Err(violation(ctx, peer, e.to_string())),
    };

    if !ack.success {
        // The handler may have handed back part of the payment
        apply_refund(ctx, peer, ack.refund_voucher().as_ref()).await;
        warn!("Negative ACK from {}: {}", peer, ack.reason);
        penalize(ctx, peer, ReputationEvent::InvalidResponseAfterPayment);
        return Err(FcrP2pError::RemoteError(ack.reason));
    }

    Ok((response, ack))
}

/// Apply a refund voucher from `peer` if one was sent. Returns the amount applied.
///
/// The payee has already advanced its side of the lane when it issued the
/// voucher, so it must be applied whenever it arrives.
pub(crate) async fn apply_refund(ctx: &NodeContext, peer: &NodeId, refund: Option<&Voucher>) -> u64 {
    let Some(voucher) = refund else {
        return 0;
    };
    match ctx.payments.receive_refund(peer, voucher).await {
        Ok(amount) => {
            debug!("Applied refund of {} from {}", amount, peer);
            amount
        }
        Err(e) => {
            warn!("Refund from {} rejected: {}", peer, e);
            0
        }
    }
}

/// Reject a decoded response: keep its refund, drop its results, penalize the peer.
pub(crate) async fn reject(
    ctx: &NodeContext,
    peer: &NodeId,
    refund: Option<&Voucher>,
    reason: impl Into<String>,
) -> FcrP2pError {
    apply_refund(ctx, peer, refund).await;
    violation(ctx, peer, reason)
}

/// Check one offer: CID, provider signature, merkle proof, duplicates and expiry.
pub(crate) async fn verify_offer(
    ctx: &NodeContext,
    cid: &ContentId,
    offer: &SubCidOffer,
    seen: &mut HashSet<[u8; 32]>,
) -> std::result::Result<(), String> {
    if offer.sub_cid != *cid {
        return Err(format!("offer for {} when {} was requested", offer.sub_cid, cid));
    }

    let provider = ctx
        .directory
        .resolve(&offer.provider)
        .await
        .map_err(|e| format!("provider {}: {}", offer.provider, e))?;
    if !offer.verify_signature(&provider.offer_key, provider.offer_key_version) {
        return Err(format!("bad offer signature from provider {}", offer.provider));
    }
    if !offer.verify_merkle_proof() {
        return Err(format!("bad merkle proof for {}", offer.sub_cid));
    }
    if !seen.insert(offer.digest()) {
        return Err("duplicate offer".into());
    }
    if offer.expires_within(unix_now(), ctx.settings.min_offer_validity) {
        return Err(format!("offer expires at {}", offer.expiry));
    }
    Ok(())
}

/// Apply the refund owed after a partial delivery.
///
/// A missing or short refund never undoes accepted results; it only pends
/// the peer. Returns whether the refund was in order.
pub(crate) async fn reconcile_refund(
    ctx: &NodeContext,
    peer: &NodeId,
    refund: Option<&Voucher>,
    expected: u64,
) -> bool {
    let applied = apply_refund(ctx, peer, refund).await;

    if applied < expected {
        warn!("Refund shortfall from {}: got {}, expected {}", peer, applied, expected);
        penalize(ctx, peer, ReputationEvent::InvalidRefund);
        return false;
    }
    true
}

