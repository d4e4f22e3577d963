//! Per-peer reputation ledger.
//!
//! Scores move by a fixed delta per event. `pending` is a cooldown set after
//! any interaction that left a payment at risk; `blocked` is an operator ban.
//! Both gate outbound paid calls.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use fcr_core::NodeId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FcrP2pError, Result};

/// Maximum number of events kept per peer.
pub const HISTORY_CAPACITY: usize = 64;

/// Something a peer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReputationEvent {
    /// One offer passed every check
    OfferVerified,
    /// Standard discovery call completed cleanly
    StandardOfferRetrieved,
    /// DHT discovery call completed cleanly
    DhtOfferRetrieved,
    /// Content delivered and matched its CID
    ContentRetrieved,
    /// Transport failed after we had paid
    NetworkErrorAfterPayment,
    /// Bad signature, negative ACK or bad payload after we had paid
    InvalidResponseAfterPayment,
    /// Refund missing or short
    InvalidRefund,
}

impl ReputationEvent {
    /// Score change for this event.
    pub fn delta(self) -> i64 {
        match self {
            ReputationEvent::OfferVerified => 1,
            ReputationEvent::StandardOfferRetrieved => 5,
            ReputationEvent::DhtOfferRetrieved => 5,
            ReputationEvent::ContentRetrieved => 10,
            ReputationEvent::NetworkErrorAfterPayment => -10,
            ReputationEvent::InvalidResponseAfterPayment => -50,
            ReputationEvent::InvalidRefund => -20,
        }
    }
}

/// Reputation of one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReputationRecord {
    pub score: i64,
    pub pending: bool,
    pub blocked: bool,
    /// Most recent last
    pub history: VecDeque<ReputationEvent>,
}

/// Reputation of every peer this node has dealt with.
#[derive(Debug, Default)]
pub struct ReputationLedger {
    records: RwLock<HashMap<NodeId, ReputationRecord>>,
}

impl ReputationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<R>(&self, id: &NodeId, f: impl FnOnce(&mut ReputationRecord) -> R) -> R {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        f(records.entry(*id).or_default())
    }

    /// Current record of a peer.
    pub fn get(&self, id: &NodeId) -> Option<ReputationRecord> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    /// Start tracking a peer with a neutral record. No-op if already tracked.
    pub fn add(&self, id: &NodeId) {
        self.with_record(id, |_| ());
    }

    /// Apply an event.
    pub fn update_record(&self, id: &NodeId, event: ReputationEvent) {
        self.with_record(id, |rec| {
            rec.score += event.delta();
            if rec.history.len() == HISTORY_CAPACITY {
                rec.history.pop_front();
            }
            rec.history.push_back(event);
        });
    }

    /// Put a peer into cooldown.
    pub fn pend(&self, id: &NodeId) {
        warn!("Pending peer {}", id);
        self.with_record(id, |rec| rec.pending = true);
    }

    /// Lift a cooldown.
    pub fn resume(&self, id: &NodeId) {
        self.with_record(id, |rec| rec.pending = false);
    }

    /// Ban a peer.
    pub fn block(&self, id: &NodeId) {
        info!("Blocking peer {}", id);
        self.with_record(id, |rec| rec.blocked = true);
    }

    /// Lift a ban.
    pub fn unblock(&self, id: &NodeId) {
        self.with_record(id, |rec| rec.blocked = false);
    }

    /// Reject pending or blocked peers; start tracking unknown ones.
    pub fn gate(&self, id: &NodeId) -> Result<()> {
        self.with_record(id, |rec| {
            if rec.blocked {
                Err(FcrP2pError::PeerBlocked(id.to_string()))
            } else if rec.pending {
                Err(FcrP2pError::PeerPending(id.to_string()))
            } else {
                Ok(())
            }
        })
    }

    /// Whether a peer is neither pending nor blocked. Unknown peers are
    /// usable and stay untracked.
    pub fn is_usable(&self, id: &NodeId) -> bool {
        match self.records.read().unwrap_or_else(|e| e.into_inner()).get(id) {
            Some(rec) => !rec.pending && !rec.blocked,
            None => true,
        }
    }

    /// Best `count` usable peers of `available`, highest score first.
    pub fn select_best(&self, available: &[NodeId], count: usize) -> Vec<NodeId> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut peers: Vec<(NodeId, i64)> = available
            .iter()
            .filter_map(|id| match records.get(id) {
                Some(rec) if rec.pending || rec.blocked => None,
                Some(rec) => Some((*id, rec.score)),
                None => Some((*id, 0)),
            })
            .collect();

        // Sort by score descending
        peers.sort_by(|a, b| b.1.cmp(&a.1));
        peers.into_iter().take(count).map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcr_core::MessageSigner;

    fn random_peer() -> NodeId {
        MessageSigner::generate(1).node_id()
    }

    #[test]
    fn test_gate_adds_unknown_peer() {
        let ledger = ReputationLedger::new();
        let peer = random_peer();

        assert!(ledger.get(&peer).is_none());
        ledger.gate(&peer).unwrap();
        assert_eq!(ledger.get(&peer), Some(ReputationRecord::default()));
    }

    #[test]
    fn test_pending_and_blocked_gate() {
        let ledger = ReputationLedger::new();
        let peer = random_peer();

        ledger.pend(&peer);
        assert!(matches!(ledger.gate(&peer), Err(FcrP2pError::PeerPending(_))));
        ledger.resume(&peer);
        assert!(ledger.gate(&peer).is_ok());

        ledger.block(&peer);
        ledger.pend(&peer);
        assert!(matches!(ledger.gate(&peer), Err(FcrP2pError::PeerBlocked(_))));
        ledger.unblock(&peer);
        assert!(matches!(ledger.gate(&peer), Err(FcrP2pError::PeerPending(_))));
    }

    #[test]
    fn test_is_usable_does_not_track() {
        let ledger = ReputationLedger::new();
        let (fresh, pending) = (random_peer(), random_peer());
        ledger.pend(&pending);

        assert!(ledger.is_usable(&fresh));
        assert!(!ledger.is_usable(&pending));
        assert!(ledger.get(&fresh).is_none());
    }

    #[test]
    fn test_history_bounded() {
        let ledger = ReputationLedger::new();
        let peer = random_peer();

        ledger.update_record(&peer, ReputationEvent::InvalidRefund);
        for _ in 0..HISTORY_CAPACITY {
            ledger.update_record(&peer, ReputationEvent::OfferVerified);
        }

        let rec = ledger.get(&peer).unwrap();
        assert_eq!(rec.history.len(), HISTORY_CAPACITY);
        // Oldest event dropped
        assert!(!rec.history.contains(&ReputationEvent::InvalidRefund));
        assert_eq!(rec.score, HISTORY_CAPACITY as i64 - 20);
    }

    #[test]
    fn test_select_best_skips_gated() {
        let ledger = ReputationLedger::new();
        let (a, b, c) = (random_peer(), random_peer(), random_peer());

        ledger.update_record(&a, ReputationEvent::ContentRetrieved);
        ledger.update_record(&b, ReputationEvent::StandardOfferRetrieved);
        ledger.update_record(&c, ReputationEvent::ContentRetrieved);
        ledger.pend(&c);

        assert_eq!(ledger.select_best(&[b, c, a], 2), vec![a, b]);
    }
}
