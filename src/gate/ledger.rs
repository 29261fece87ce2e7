//! Append-only usage log backing the hourly quota counts.
//!
//! Keys are `identity|endpoint|millis|seq`, so one `(identity, endpoint)`
//! bucket is a single prefix scan and the millisecond timestamp keeps
//! entries in arrival order. Quota accounting is approximate by design:
//! losing an occasional row under-enforces, never over-enforces.

use crate::core::cache::{KeyValueCollection, Store};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub const USAGE_COLLECTION: &str = "usage_log";

#[derive(Debug, Clone, PartialEq)]
pub struct UsageEntry {
    pub identity: String,
    pub endpoint: String,
    pub at: DateTime<Utc>,
    pub status: u16,
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn append(&self, entry: UsageEntry);

    /// Admitted (2xx) entries for `(identity, endpoint)` at or after
    /// `cutoff`. Denial rows are logged but never counted against quota.
    async fn count_since(&self, identity: &str, endpoint: &str, cutoff: DateTime<Utc>) -> u64;

    /// Delete entries older than `cutoff`; returns how many were removed.
    async fn prune(&self, cutoff: DateTime<Utc>) -> u64;
}

pub struct KvUsageLedger {
    collection: Arc<dyn KeyValueCollection>,
    seq: AtomicU64,
}

impl KvUsageLedger {
    pub fn new(store: &dyn Store) -> Result<Self> {
        let collection = store
            .get_collection(USAGE_COLLECTION, true, true)
            .context("Failed to open usage log collection")?;
        Ok(Self::with_collection(collection))
    }

    pub fn with_collection(collection: Arc<dyn KeyValueCollection>) -> Self {
        Self {
            collection,
            seq: AtomicU64::new(0),
        }
    }

    fn key(entry: &UsageEntry, seq: u64) -> String {
        format!(
            "{}|{}|{:013}|{}",
            entry.identity,
            entry.endpoint,
            entry.at.timestamp_millis(),
            seq
        )
    }

    /// `identity|endpoint|millis|seq` -> millis
    fn millis_from_key(key: &[u8]) -> Option<i64> {
        let key = std::str::from_utf8(key).ok()?;
        let mut parts = key.rsplitn(3, '|');
        let _seq = parts.next()?;
        parts.next()?.parse().ok()
    }
}

#[async_trait]
impl UsageLedger for KvUsageLedger {
    async fn append(&self, entry: UsageEntry) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = Self::key(&entry, seq);
        self.collection
            .put(key.as_bytes(), entry.status.to_string().into_bytes(), None)
            .await;
    }

    async fn count_since(&self, identity: &str, endpoint: &str, cutoff: DateTime<Utc>) -> u64 {
        let prefix = format!("{identity}|{endpoint}|");
        let cutoff_millis = cutoff.timestamp_millis();
        let mut count = 0;
        for (key, value) in self.collection.scan_prefix(prefix.as_bytes()).await {
            let Some(millis) = Self::millis_from_key(&key) else {
                continue;
            };
            if millis < cutoff_millis {
                continue;
            }
            let admitted = std::str::from_utf8(&value)
                .ok()
                .and_then(|s| s.parse::<u16>().ok())
                .is_some_and(|status| (200..300).contains(&status));
            if admitted {
                count += 1;
            }
        }
        count
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> u64 {
        let cutoff_millis = cutoff.timestamp_millis();
        let mut removed = 0;
        for (key, _) in self.collection.scan_prefix(b"").await {
            if let Some(millis) = Self::millis_from_key(&key) {
                if millis < cutoff_millis {
                    self.collection.remove(&key).await;
                    removed += 1;
                }
            }
        }
        debug!(removed, "Pruned usage log");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use chrono::{Duration, TimeZone};

    fn ledger() -> KvUsageLedger {
        KvUsageLedger::with_collection(Arc::new(MemoryCollection::new()))
    }

    fn entry(identity: &str, at: DateTime<Utc>, status: u16) -> UsageEntry {
        UsageEntry {
            identity: identity.to_string(),
            endpoint: "/api/rates/:currency".to_string(),
            at,
            status,
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_count_is_scoped_to_identity_and_window() {
        let ledger = ledger();
        let now = base_time();

        ledger.append(entry("1.2.3.4", now - Duration::minutes(90), 200)).await;
        ledger.append(entry("1.2.3.4", now - Duration::minutes(30), 200)).await;
        ledger.append(entry("1.2.3.4", now - Duration::minutes(5), 200)).await;
        ledger.append(entry("5.6.7.8", now - Duration::minutes(5), 200)).await;

        let count = ledger
            .count_since("1.2.3.4", "/api/rates/:currency", now - Duration::hours(1))
            .await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_denials_are_not_counted() {
        let ledger = ledger();
        let now = base_time();

        ledger.append(entry("1.2.3.4", now, 200)).await;
        ledger.append(entry("1.2.3.4", now, 429)).await;
        ledger.append(entry("1.2.3.4", now, 403)).await;

        let count = ledger
            .count_since("1.2.3.4", "/api/rates/:currency", now - Duration::hours(1))
            .await;
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_same_millisecond_entries_are_distinct() {
        let ledger = ledger();
        let now = base_time();

        for _ in 0..5 {
            ledger.append(entry("1.2.3.4", now, 200)).await;
        }

        let count = ledger
            .count_since("1.2.3.4", "/api/rates/:currency", now - Duration::hours(1))
            .await;
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_prune_removes_old_rows_only() {
        let ledger = ledger();
        let now = base_time();

        ledger.append(entry("1.2.3.4", now - Duration::hours(3), 200)).await;
        ledger.append(entry("5.6.7.8", now - Duration::hours(3), 200)).await;
        ledger.append(entry("1.2.3.4", now - Duration::minutes(10), 200)).await;

        let removed = ledger.prune(now - Duration::hours(2)).await;
        assert_eq!(removed, 2);

        let count = ledger
            .count_since("1.2.3.4", "/api/rates/:currency", now - Duration::hours(4))
            .await;
        assert_eq!(count, 1);
    }
}
