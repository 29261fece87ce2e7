//! Access rules: durable storage plus the short-TTL settings cache in
//! front of it.

use crate::core::cache::{KeyValueCollection, Store};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const RULES_COLLECTION: &str = "api_rules";
pub const SETTINGS_CACHE_COLLECTION: &str = "settings_cache";

/// Access policy for one endpoint. A tagged variant instead of a level
/// string plus a separately parsed pattern blob, so an empty or malformed
/// allow list cannot exist as a distinct runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum AccessLevel {
    Public {
        /// -1 means unlimited.
        quota_per_hour: i64,
    },
    Restricted {
        allow_list: Vec<String>,
        quota_per_hour: i64,
    },
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRule {
    pub endpoint: String,
    #[serde(flatten)]
    pub level: AccessLevel,
}

/// Durable rule storage, owned by the admin-facing collaborator and only
/// read here.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn load(&self, endpoint: &str) -> Result<Option<AccessRule>>;
}

pub struct KvRuleStore {
    collection: Arc<dyn KeyValueCollection>,
}

impl KvRuleStore {
    pub fn new(store: &dyn Store) -> Result<Self> {
        let collection = store
            .get_collection(RULES_COLLECTION, true, true)
            .context("Failed to open access rules collection")?;
        Ok(Self { collection })
    }

    pub fn with_collection(collection: Arc<dyn KeyValueCollection>) -> Self {
        Self { collection }
    }

    /// Admin-side write path.
    pub async fn put(&self, rule: &AccessRule) -> Result<()> {
        let value = serde_json::to_vec(rule)?;
        self.collection.put(rule.endpoint.as_bytes(), value, None).await;
        Ok(())
    }

    pub async fn delete(&self, endpoint: &str) {
        self.collection.remove(endpoint.as_bytes()).await;
    }
}

#[async_trait]
impl RuleSource for KvRuleStore {
    async fn load(&self, endpoint: &str) -> Result<Option<AccessRule>> {
        match self.collection.get(endpoint.as_bytes()).await {
            Some(bytes) => {
                let rule = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt access rule for {endpoint}"))?;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }
}

/// Rule resolution through the fast settings cache. A miss loads from the
/// durable source and repopulates with the configured TTL; admin writes
/// call `invalidate`. Absence is cached too, so unconfigured endpoints do
/// not hammer the durable store.
pub struct CachedRules {
    source: Arc<dyn RuleSource>,
    cache: Arc<dyn KeyValueCollection>,
    ttl: Duration,
}

impl CachedRules {
    pub fn new(
        source: Arc<dyn RuleSource>,
        cache: Arc<dyn KeyValueCollection>,
        ttl: Duration,
    ) -> Self {
        Self { source, cache, ttl }
    }

    pub async fn resolve(&self, endpoint: &str) -> Result<Option<AccessRule>> {
        if let Some(bytes) = self.cache.get(endpoint.as_bytes()).await {
            debug!(endpoint, "Settings cache hit");
            return Ok(serde_json::from_slice(&bytes)?);
        }

        debug!(endpoint, "Settings cache miss");
        let rule = self.source.load(endpoint).await?;
        let bytes = serde_json::to_vec(&rule)?;
        self.cache
            .put(endpoint.as_bytes(), bytes, Some(self.ttl))
            .await;
        Ok(rule)
    }

    pub async fn invalidate(&self, endpoint: &str) {
        self.cache.remove(endpoint.as_bytes()).await;
    }
}
