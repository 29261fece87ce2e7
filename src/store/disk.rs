use crate::core::cache::KeyValueCollection;
use anyhow::Result;
use async_trait::async_trait;
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<SystemTime>,
}

impl CacheEntry {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|expiry| now > expiry)
    }
}

/// Persistent collection backed by one fjall partition. Entries carry their
/// own expiry; expired entries are dropped lazily on read.
pub struct DiskCollection {
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let res: Result<Option<Vec<u8>>> = (|| {
            if let Some(raw) = self.partition.get(key)? {
                let entry: CacheEntry = serde_json::from_slice(&raw)?;
                if entry.is_expired(SystemTime::now()) {
                    debug!("Cache entry expired");
                    self.partition.remove(key)?;
                    return Ok(None);
                }
                debug!("Cache HIT");
                return Ok(Some(entry.value));
            }
            debug!("Cache MISS");
            Ok(None)
        })();

        match res {
            Ok(val) => val,
            Err(e) => {
                debug!("DiskCollection get error: {}", e);
                None
            }
        }
    }

    async fn put(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) {
        let res: Result<()> = (|| {
            let expires_at = ttl.map(|d| SystemTime::now() + d);
            let entry = CacheEntry { value, expires_at };
            self.partition.insert(key, serde_json::to_vec(&entry)?)?;
            debug!("Cache PUT");
            Ok(())
        })();
        if let Err(e) = res {
            debug!("DiskCollection put error: {}", e);
        }
    }

    async fn remove(&self, key: &[u8]) {
        if let Err(e) = self.partition.remove(key) {
            debug!("DiskCollection remove error: {}", e);
        }
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let now = SystemTime::now();
        let mut entries = Vec::new();
        for item in self.partition.prefix(prefix) {
            match item {
                Ok((key, raw)) => match serde_json::from_slice::<CacheEntry>(&raw) {
                    Ok(entry) if !entry.is_expired(now) => {
                        entries.push((key.to_vec(), entry.value));
                    }
                    Ok(_) => {}
                    Err(e) => debug!("DiskCollection scan decode error: {}", e),
                },
                Err(e) => {
                    debug!("DiskCollection scan error: {}", e);
                    break;
                }
            }
        }
        entries
    }

    async fn clear(&self) {
        let keys: Vec<Vec<u8>> = self
            .partition
            .prefix(&[] as &[u8])
            .filter_map(|item| item.ok().map(|(k, _)| k.to_vec()))
            .collect();
        for key in keys {
            if let Err(e) = self.partition.remove(key) {
                debug!("DiskCollection clear error: {}", e);
            }
        }
    }
}
