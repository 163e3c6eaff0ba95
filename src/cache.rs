use crate::backend::{listing::DirectoryListing, storage_key::parent_prefix};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::debug;

/// Directory listings keyed by storage configuration and directory key.
pub trait ListingCache: Send + Sync {
    fn get(&self, config_id: &str, prefix: &str) -> Option<DirectoryListing>;

    fn put(&self, config_id: &str, prefix: &str, listing: DirectoryListing);

    /// Drops whatever a write to `key` may have made stale.
    fn invalidate(&self, key: &str, config_id: &str, is_directory: bool);
}

#[derive(Debug)]
struct CacheEntry {
    stored: Instant,
    listing: DirectoryListing,
}

#[derive(Debug)]
pub struct MemoryListingCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl MemoryListingCache {
    pub fn new(ttl: Duration) -> Self {
        MemoryListingCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ListingCache for MemoryListingCache {
    fn get(&self, config_id: &str, prefix: &str) -> Option<DirectoryListing> {
        if self.ttl == Duration::from_secs(0) {
            return None;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let k = (config_id.to_owned(), prefix.to_owned());
        match entries.get(&k) {
            Some(e) if e.stored.elapsed() < self.ttl => Some(e.listing.clone()),
            Some(_) => {
                entries.remove(&k);
                None
            }
            None => None,
        }
    }

    fn put(&self, config_id: &str, prefix: &str, listing: DirectoryListing) {
        if self.ttl == Duration::from_secs(0) {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (config_id.to_owned(), prefix.to_owned()),
                CacheEntry {
                    stored: Instant::now(),
                    listing,
                },
            );
    }

    fn invalidate(&self, key: &str, config_id: &str, is_directory: bool) {
        let parent = parent_prefix(key);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(id, prefix), _| {
            if id != config_id {
                return true;
            }
            if *prefix == parent {
                return false;
            }
            !(is_directory && prefix.starts_with(key))
        });
        debug!(key = %key, dropped = before - entries.len(), "listing cache invalidated");
    }
}
