use dashmap::DashMap;
use std::sync::Arc;

use crate::models::Link;

/// Thread-safe in-memory cache mapping short_code -> Link record.
///
/// Backed by a DashMap so reads are concurrent and lock-free for most cases.
/// Warmed on startup from the database and backfilled on every lookup miss.
/// Only the immutable rule set is cached; click counts are always read live
/// so the click-quota gate never acts on a stale number.
#[derive(Clone, Debug, Default)]
pub struct LinkCache {
    inner: Arc<DashMap<String, Link>>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a cached link, keyed by its short code.
    pub fn set(&self, link: Link) {
        self.inner.insert(link.short_code.clone(), link);
    }

    /// Look up a short code. Returns a clone of the record if present.
    pub fn get(&self, short_code: &str) -> Option<Link> {
        self.inner.get(short_code).map(|v| v.clone())
    }

    /// Drop a cached record (e.g. after a dashboard edit or delete).
    pub fn remove(&self, short_code: &str) {
        self.inner.remove(short_code);
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
