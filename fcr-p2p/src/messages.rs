//! Wire messages.
//!
//! Every frame on the wire is one [`FcrMessage`]: a type tag, the protocol
//! version, a bincode body and the sender's signature over all three.
//! Responses always carry an [`Ack`] body whose payload is the typed
//! response when `success` is set.

use fcr_core::{verify_message, ContentId, KeyVersion, MessageSigner, NodeId, Offer, SubCidOffer};
use fcr_payment::Voucher;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::settings::PROTOCOL_VERSION;

/// Marker preceding a hex voucher inside a negative ACK reason.
pub const REFUND_VOUCHER_MARKER: &str = "refund voucher: ";

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Liveness handshake request
    EstablishmentRequest,
    /// Liveness handshake response
    EstablishmentResponse,
    /// Provider publishes an offer to a gateway
    OfferPublishRequest,
    /// Gateway acknowledges a published offer
    OfferPublishResponse,
    /// Paid offer lookup on one gateway
    StandardDiscoveryRequest,
    /// Offers found by one gateway
    StandardDiscoveryResponse,
    /// Paid offer lookup fanned out over the closest gateways
    DhtDiscoveryRequest,
    /// Raw sub-responses gathered by a fan-out
    DhtDiscoveryResponse,
    /// Paid content download
    DataRetrievalRequest,
    /// Content bytes
    DataRetrievalResponse,
}

impl MessageType {
    /// Response type for a request type.
    pub fn response(self) -> Option<MessageType> {
        match self {
            MessageType::EstablishmentRequest => Some(MessageType::EstablishmentResponse),
            MessageType::OfferPublishRequest => Some(MessageType::OfferPublishResponse),
            MessageType::StandardDiscoveryRequest => Some(MessageType::StandardDiscoveryResponse),
            MessageType::DhtDiscoveryRequest => Some(MessageType::DhtDiscoveryResponse),
            MessageType::DataRetrievalRequest => Some(MessageType::DataRetrievalResponse),
            _ => None,
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// A typed, signed protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcrMessage {
    /// What the body contains
    pub message_type: MessageType,
    /// Sender's protocol version
    pub protocol_version: u8,
    /// bincode-encoded payload
    pub body: Vec<u8>,
    /// Sender's signature over type, version and body
    pub signature: Vec<u8>,
}

impl FcrMessage {
    fn signable(message_type: MessageType, protocol_version: u8, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len() + 2);
        out.push(message_type.tag());
        out.push(protocol_version);
        out.extend_from_slice(body);
        out
    }

    /// Encode `payload` and sign the result.
    pub fn new_signed<T: Serialize>(message_type: MessageType, payload: &T, signer: &MessageSigner) -> Result<Self> {
        let body = bincode::serialize(payload)?;
        let signature = signer.sign(&Self::signable(message_type, PROTOCOL_VERSION, &body));
        Ok(Self {
            message_type,
            protocol_version: PROTOCOL_VERSION,
            body,
            signature,
        })
    }

    /// Check the signature against a sender key.
    pub fn verify(&self, public_key: &[u8], version: KeyVersion) -> bool {
        let message = Self::signable(self.message_type, self.protocol_version, &self.body);
        verify_message(public_key, version, &self.signature, &message)
    }

    /// Decode the body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.body)?)
    }

    /// Wire encoding (without the length prefix).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a message produced by [`FcrMessage::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Who sent a request.
///
/// The key travels with the request so that clients absent from the
/// registry can still be authenticated by `id == sha256(key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Claimed node ID
    pub id: NodeId,
    /// SEC1 message-signing key
    pub key: Vec<u8>,
    /// Key version
    pub key_version: KeyVersion,
}

impl Sender {
    /// Identity of a local signer.
    pub fn from_signer(signer: &MessageSigner) -> Self {
        Self {
            id: signer.node_id(),
            key: signer.public_key_bytes(),
            key_version: signer.version(),
        }
    }

    /// Whether `id` is the hash of `key`.
    pub fn is_self_certified(&self) -> bool {
        NodeId::from_public_key_bytes(&self.key) == self.id
    }
}

/// Common shape of a request body.
pub trait FcrRequest: Serialize + DeserializeOwned + Send {
    /// Type tag of the request.
    const MESSAGE_TYPE: MessageType;

    /// Who sent it.
    fn sender(&self) -> &Sender;

    /// Correlation nonce.
    fn nonce(&self) -> u64;
}

/// Generic response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether the request was served
    pub success: bool,
    /// Failure reason; may embed a refund voucher
    pub reason: String,
    /// Typed response when `success` is set
    pub payload: Vec<u8>,
}

impl Ack {
    /// Positive acknowledgement carrying `payload`.
    pub fn ok<T: Serialize>(payload: &T) -> Result<Self> {
        Ok(Self {
            success: true,
            reason: String::new(),
            payload: bincode::serialize(payload)?,
        })
    }

    /// Negative acknowledgement.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            payload: Vec::new(),
        }
    }

    /// Negative acknowledgement that hands back a refund.
    pub fn fail_with_refund(reason: impl std::fmt::Display, refund: Option<&Voucher>) -> Self {
        let encoded = refund.map(Voucher::to_hex).unwrap_or_default();
        Self::fail(format!("{}, {}{}", reason, REFUND_VOUCHER_MARKER, encoded))
    }

    /// Refund voucher embedded in a negative reason, if any.
    pub fn refund_voucher(&self) -> Option<Voucher> {
        let (_, tail) = self.reason.rsplit_once(REFUND_VOUCHER_MARKER)?;
        let tail = tail.trim();
        if tail.is_empty() {
            return None;
        }
        Voucher::from_hex(tail).ok()
    }

    /// Decode the typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}

macro_rules! impl_request {
    ($ty:ty, $tag:expr) => {
        impl FcrRequest for $ty {
            const MESSAGE_TYPE: MessageType = $tag;

            fn sender(&self) -> &Sender {
                &self.sender
            }

            fn nonce(&self) -> u64 {
                self.nonce
            }
        }
    };
}

/// Free challenge/echo handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishmentRequest {
    pub sender: Sender,
    pub nonce: u64,
    pub challenge: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishmentResponse {
    pub nonce: u64,
    pub challenge: [u8; 32],
}

/// Provider hands a signed offer to a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferPublishRequest {
    pub sender: Sender,
    pub nonce: u64,
    pub offer: Offer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferPublishResponse {
    pub nonce: u64,
    /// Number of CIDs the gateway now indexes for this offer
    pub indexed: u32,
}

/// Ask one gateway for up to `max_offers` offers for `cid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardDiscoveryRequest {
    pub sender: Sender,
    pub nonce: u64,
    pub cid: ContentId,
    pub max_offers: u32,
    pub voucher: Voucher,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardDiscoveryResponse {
    pub nonce: u64,
    pub cid: ContentId,
    pub offers: Vec<SubCidOffer>,
    pub refund: Option<Voucher>,
}

/// Ask a gateway to query the `num_dht` gateways closest to `cid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhtDiscoveryRequest {
    pub sender: Sender,
    pub nonce: u64,
    pub cid: ContentId,
    pub num_dht: u32,
    pub max_offers_per_dht: u32,
    pub voucher: Voucher,
}

/// Raw signed answer of one sub-gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhtSubResponse {
    pub gateway: NodeId,
    /// [`FcrMessage::to_bytes`] of the sub-gateway's response, untouched
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhtDiscoveryResponse {
    pub nonce: u64,
    pub cid: ContentId,
    pub responses: Vec<DhtSubResponse>,
    /// Gateways that were tried but failed
    pub failed: Vec<NodeId>,
    pub refund: Option<Voucher>,
}

/// Download the content named by `offer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRetrievalRequest {
    pub sender: Sender,
    pub nonce: u64,
    pub offer: SubCidOffer,
    pub voucher: Voucher,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRetrievalResponse {
    pub nonce: u64,
    pub cid: ContentId,
    /// Empty if the provider no longer holds the content
    pub data: Vec<u8>,
    pub refund: Option<Voucher>,
}

impl_request!(EstablishmentRequest, MessageType::EstablishmentRequest);
impl_request!(OfferPublishRequest, MessageType::OfferPublishRequest);
impl_request!(StandardDiscoveryRequest, MessageType::StandardDiscoveryRequest);
impl_request!(DhtDiscoveryRequest, MessageType::DhtDiscoveryRequest);
impl_request!(DataRetrievalRequest, MessageType::DataRetrievalRequest);

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::Address;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    fn challenge(signer: &MessageSigner) -> EstablishmentRequest {
        EstablishmentRequest {
            sender: Sender::from_signer(signer),
            nonce: 42,
            challenge: [7; 32],
        }
    }

    #[test]
    fn test_signed_message_verifies() {
        let signer = MessageSigner::generate(1);
        let msg = FcrMessage::new_signed(MessageType::EstablishmentRequest, &challenge(&signer), &signer).unwrap();

        assert!(msg.verify(&signer.public_key_bytes(), 1));
        let decoded: EstablishmentRequest = msg.decode().unwrap();
        assert_eq!(decoded.nonce, 42);
        assert!(decoded.sender.is_self_certified());
    }

    #[test]
    fn test_retagged_message_fails() {
        let signer = MessageSigner::generate(1);
        let mut msg = FcrMessage::new_signed(MessageType::EstablishmentRequest, &challenge(&signer), &signer).unwrap();
        msg.message_type = MessageType::OfferPublishRequest;
        assert!(!msg.verify(&signer.public_key_bytes(), 1));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = MessageSigner::generate(1);
        let other = MessageSigner::generate(1);
        let msg = FcrMessage::new_signed(MessageType::EstablishmentRequest, &challenge(&signer), &signer).unwrap();
        assert!(!msg.verify(&other.public_key_bytes(), 1));
    }

    #[test]
    fn test_spoofed_sender_not_self_certified() {
        let signer = MessageSigner::generate(1);
        let mut req = challenge(&signer);
        req.sender.id = MessageSigner::generate(1).node_id();
        assert!(!req.sender.is_self_certified());
    }

    #[test]
    fn test_refund_voucher_in_reason() {
        let key = SigningKey::random(&mut OsRng);
        let voucher = Voucher::sign(&key, Address::random(), 1, 2, 0).unwrap();

        let ack = Ack::fail_with_refund("Short payment received: 3, expected: 6", Some(&voucher));
        assert!(ack.reason.starts_with("Short payment received: 3, expected: 6, refund voucher: "));
        assert_eq!(ack.refund_voucher(), Some(voucher));

        let empty = Ack::fail_with_refund("Short payment received: 1, expected: 6", None);
        assert!(empty.reason.ends_with("refund voucher: "));
        assert_eq!(empty.refund_voucher(), None);
        assert_eq!(Ack::fail("nope").refund_voucher(), None);
    }

    #[test]
    fn test_response_types() {
        assert_eq!(
            MessageType::DhtDiscoveryRequest.response(),
            Some(MessageType::DhtDiscoveryResponse)
        );
        assert_eq!(MessageType::DataRetrievalResponse.response(), None);
    }
}
