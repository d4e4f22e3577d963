//! Offer and content stores.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use fcr_core::{unix_now, ContentId, Offer, SubCidOffer};
use lru::LruCache;

use crate::error::Result;

/// Default number of CIDs the offer store indexes.
const DEFAULT_CAPACITY: usize = 10_000;

/// LRU index of sub-offers by CID.
///
/// Gateways fill it from published offers and serve discovery from it;
/// clients fill it with offers they have verified.
pub struct OfferStore {
    cache: Mutex<LruCache<ContentId, Vec<SubCidOffer>>>,
}

impl std::fmt::Debug for OfferStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfferStore").field("cids", &self.len()).finish()
    }
}

impl OfferStore {
    /// Create a store with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a store indexing at most `capacity` CIDs.
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<ContentId, Vec<SubCidOffer>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store one sub-offer. Returns false if an identical one is already stored.
    pub fn add_sub_offer(&self, offer: SubCidOffer) -> bool {
        let mut cache = self.lock();
        let digest = offer.digest();
        if let Some(entries) = cache.get_mut(&offer.sub_cid) {
            if entries.iter().any(|o| o.digest() == digest) {
                return false;
            }
            entries.push(offer);
            return true;
        }
        cache.put(offer.sub_cid, vec![offer]);
        true
    }

    /// Split a bundle offer and index every CID. Returns the number indexed.
    pub fn add_offer(&self, offer: &Offer) -> Result<usize> {
        let mut added = 0;
        for cid in &offer.cids {
            if self.add_sub_offer(offer.sub_offer(cid)?) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Up to `max` offers for `cid` valid for at least `min_validity`.
    pub fn get(&self, cid: &ContentId, max: usize, min_validity: Duration) -> Vec<SubCidOffer> {
        let now = unix_now();
        let mut cache = self.lock();
        let Some(entries) = cache.get_mut(cid) else {
            return Vec::new();
        };
        entries.retain(|o| !o.expires_within(now, Duration::ZERO));
        entries
            .iter()
            .filter(|o| !o.expires_within(now, min_validity))
            .take(max)
            .cloned()
            .collect()
    }

    /// Number of indexed CIDs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OfferStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Content held by a provider, addressed by CID.
#[derive(Debug, Default)]
pub struct ContentStore {
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl ContentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob and return its CID.
    pub fn insert(&self, data: Vec<u8>) -> ContentId {
        let cid = ContentId::from_data(&data);
        self.blobs.write().unwrap_or_else(|e| e.into_inner()).insert(cid, data);
        cid
    }

    /// Fetch a blob.
    pub fn get(&self, cid: &ContentId) -> Option<Vec<u8>> {
        self.blobs.read().unwrap_or_else(|e| e.into_inner()).get(cid).cloned()
    }

    /// Drop a blob.
    pub fn remove(&self, cid: &ContentId) -> bool {
        self.blobs.write().unwrap_or_else(|e| e.into_inner()).remove(cid).is_some()
    }

    /// All stored CIDs.
    pub fn cids(&self) -> Vec<ContentId> {
        self.blobs.read().unwrap_or_else(|e| e.into_inner()).keys().copied().collect()
    }
}
