//! Listing cache and event debounce for the device façade.
//!
//! This façade's operations are handle-native (callers already hold the
//! parent handle), so there is no virtual-path cache here, only a listing
//! cache keyed by `(storage_id, parent_handle)`.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::ObjectEntry;

/// How long a cached directory listing is trusted before a re-fetch.
pub const LISTING_CACHE_TTL: Duration = Duration::from_secs(5);

/// Debounce window collapsing bursts of device events into one re-crawl
/// signal.
pub const EVENT_DEBOUNCE: Duration = Duration::from_millis(500);

struct CachedListing {
    entries: Vec<ObjectEntry>,
    cached_at: Instant,
}

/// Maps `(storage_id, parent_handle)` to its most recently fetched listing.
#[derive(Default)]
pub struct ListingCache {
    listings: RwLock<HashMap<(u32, Option<u32>), CachedListing>>,
}

impl ListingCache {
    pub fn get(&self, storage_id: u32, parent: Option<u32>) -> Option<Vec<ObjectEntry>> {
        let listings = self.listings.read().unwrap();
        let cached = listings.get(&(storage_id, parent))?;
        if cached.cached_at.elapsed() < LISTING_CACHE_TTL {
            Some(cached.entries.clone())
        } else {
            None
        }
    }

    pub fn put(&self, storage_id: u32, parent: Option<u32>, entries: Vec<ObjectEntry>) {
        let mut listings = self.listings.write().unwrap();
        listings.insert(
            (storage_id, parent),
            CachedListing {
                entries,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, storage_id: u32, parent: Option<u32>) {
        self.listings.write().unwrap().remove(&(storage_id, parent));
    }

    /// Drops every cached listing under `storage_id`, for device events
    /// (`StorageInfoChanged`, `StoreAdded`/`StoreRemoved`) that are too
    /// coarse to name the affected parent handle.
    pub fn invalidate_storage(&self, storage_id: u32) {
        self.listings.write().unwrap().retain(|(sid, _), _| *sid != storage_id);
    }
}

/// Collapses a burst of device events into a single re-crawl signal per
/// debounce window. One façade is scoped to one device, so this tracks a
/// single timestamp rather than a per-device-id map.
pub struct EventDebouncer {
    last_emit: RwLock<Option<Instant>>,
    debounce_duration: Duration,
}

impl EventDebouncer {
    pub fn new(debounce_duration: Duration) -> Self {
        Self {
            last_emit: RwLock::new(None),
            debounce_duration,
        }
    }

    /// Returns `true` if a re-crawl should fire now, and records that firing.
    pub fn should_emit(&self) -> bool {
        let now = Instant::now();
        let mut last_emit = self.last_emit.write().unwrap();
        if let Some(last) = *last_emit {
            if now.duration_since(last) < self.debounce_duration {
                return false;
            }
        }
        *last_emit = Some(now);
        true
    }
}
