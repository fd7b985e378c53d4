//! Memoized discovery results, keyed by the sha256 of the document bytes.

use crate::discovery::DiscoveredFields;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut hex = String::with_capacity(digest.len() * 2);
        for b in digest {
            let _ = write!(&mut hex, "{:02x}", b);
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub trait DiscoveryCache: Send + Sync {
    fn get(&self, key: &DocumentKey) -> Option<Arc<DiscoveredFields>>;
    fn insert(&self, key: DocumentKey, fields: Arc<DiscoveredFields>);
    /// Returns true when an entry was dropped.
    fn invalidate(&self, key: &DocumentKey) -> bool;
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Least-recently-used cache holding at most `capacity` documents. Lookups
/// count as use. A capacity of zero stores nothing.
pub struct BoundedDiscoveryCache {
    entries: Option<Mutex<LruCache<DocumentKey, Arc<DiscoveredFields>>>>,
}

impl BoundedDiscoveryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .as_ref()
            .map_or(0, |entries| entries.lock().cap().get())
    }
}

impl DiscoveryCache for BoundedDiscoveryCache {
    fn get(&self, key: &DocumentKey) -> Option<Arc<DiscoveredFields>> {
        self.entries.as_ref()?.lock().get(key).cloned()
    }

    fn insert(&self, key: DocumentKey, fields: Arc<DiscoveredFields>) {
        let Some(entries) = &self.entries else {
            return;
        };
        if let Some((evicted, _)) = entries.lock().push(key.clone(), fields) {
            if evicted != key {
                log::debug!("evicting discovery result {}", evicted.as_str());
            }
        }
    }

    fn invalidate(&self, key: &DocumentKey) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|entries| entries.lock().pop(key).is_some())
    }

    fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.lock().len())
    }
}
