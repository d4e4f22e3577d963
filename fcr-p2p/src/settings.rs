//! Protocol constants and pricing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wire protocol version carried by every message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest accepted frame (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Lane for standard offer discovery payments.
pub const STANDARD_DISCOVERY_LANE: u64 = 1;

/// Lane for DHT offer discovery payments.
pub const DHT_DISCOVERY_LANE: u64 = 2;

/// Lane for data retrieval payments.
pub const RETRIEVAL_LANE: u64 = 3;

/// Fixed protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Flat, non-refundable fee for every paid request
    pub search_price: u64,
    /// Fee per requested offer
    pub offer_price: u64,
    /// Amount used to open or top up a channel
    pub topup_amount: u64,
    /// Timeout for ordinary calls
    #[serde(with = "secs")]
    pub short_timeout: Duration,
    /// Timeout for DHT fan-out calls
    #[serde(with = "secs")]
    pub long_timeout: Duration,
    /// Minimum remaining validity for an accepted offer
    #[serde(with = "secs")]
    pub min_offer_validity: Duration,
    /// Cap on DHT fan-out width
    pub max_num_dht: u32,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            search_price: 1,
            offer_price: 1,
            topup_amount: 100,
            short_timeout: Duration::from_secs(5),
            long_timeout: Duration::from_secs(120),
            min_offer_validity: Duration::from_secs(3600),
            max_num_dht: 16,
        }
    }
}

impl ProtocolSettings {
    /// Price of a standard discovery request for up to `max_offers` offers.
    pub fn standard_discovery_price(&self, max_offers: u32) -> u64 {
        self.search_price + self.offer_price * u64::from(max_offers)
    }

    /// Price of one sub-gateway slot in a DHT discovery request.
    pub fn dht_slot_price(&self, max_offers_per_dht: u32) -> u64 {
        self.standard_discovery_price(max_offers_per_dht)
    }

    /// Price of a DHT discovery request.
    pub fn dht_discovery_price(&self, num_dht: u32, max_offers_per_dht: u32) -> u64 {
        self.search_price + u64::from(num_dht) * self.dht_slot_price(max_offers_per_dht)
    }

    /// Price of retrieving content under an offer of `offer_price`.
    pub fn retrieval_price(&self, offer_price: u64) -> u64 {
        self.search_price + offer_price
    }

    /// Refund owed for `requested - found` unused offer slots.
    pub fn unused_slot_refund(&self, requested: u32, found: usize) -> u64 {
        u64::from(requested).saturating_sub(found as u64) * self.offer_price
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
