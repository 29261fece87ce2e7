//! Key-value cache abstractions shared by the fast settings cache, the
//! durable rate records, and the usage ledger.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A byte-oriented collection with optional per-entry TTL.
///
/// Implementations swallow their own storage errors (logging them) and
/// degrade to cache-miss behavior; callers treat every miss the same way.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    async fn put(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>);

    async fn remove(&self, key: &[u8]);

    /// Live entries whose key starts with `prefix`, in lexicographic key
    /// order. Expired entries are skipped.
    async fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    async fn clear(&self);
}

/// A store that can hold multiple named collections, persistent or
/// memory-only.
pub trait Store: Send + Sync {
    fn get_collection(
        &self,
        name: &str,
        persist: bool,
        create_if_missing: bool,
    ) -> Option<Arc<dyn KeyValueCollection>>;

    fn remove_collection(&self, name: &str) -> bool;
}
