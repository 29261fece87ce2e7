//! Client-side request throttling for chart loads.
//!
//! Two independent rules: a rolling-hour cap on short-range requests and a
//! fixed cooldown between long-range ones. State lives behind a small
//! key-value persistence boundary so a server deployment can back it with
//! the same shared store used for quota accounting.

use crate::core::cache::KeyValueCollection;
use crate::core::clock::Clock;
use crate::core::config::LimiterConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use tracing::debug;

const RECORDS_KEY: &[u8] = b"records";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientRequestRecord {
    pub at: DateTime<Utc>,
    pub span_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    HourlyCap,
    LongRangeCooldown,
}

impl Display for LimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LimitReason::HourlyCap => "hourly request cap reached",
            LimitReason::LongRangeCooldown => "long-range cooldown active",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed,
    Denied {
        reason: LimitReason,
        cooldown_secs: u64,
    },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allowed)
    }
}

pub struct RequestLimiter {
    records: Arc<dyn KeyValueCollection>,
    clock: Arc<dyn Clock>,
    window: Duration,
    short_cap: usize,
    long_range_days: i64,
    long_cooldown: Duration,
}

impl RequestLimiter {
    pub fn new(
        records: Arc<dyn KeyValueCollection>,
        clock: Arc<dyn Clock>,
        config: &LimiterConfig,
    ) -> Self {
        Self {
            records,
            clock,
            window: Duration::hours(1),
            short_cap: config.short_cap_per_hour,
            long_range_days: config.long_range_days,
            long_cooldown: Duration::seconds(config.long_cooldown_secs as i64),
        }
    }

    /// Decide whether a request of `span_days` may be issued now.
    pub async fn check(&self, span_days: i64) -> LimitDecision {
        let now = self.clock.now();
        let records = self.live_records(now).await;

        if span_days >= self.long_range_days {
            if let Some(last) = records
                .iter()
                .filter(|r| r.span_days >= self.long_range_days)
                .map(|r| r.at)
                .max()
            {
                let elapsed = now - last;
                if elapsed < self.long_cooldown {
                    let remaining = (self.long_cooldown - elapsed).num_seconds().max(0) as u64;
                    debug!(remaining, "Long-range request denied by cooldown");
                    return LimitDecision::Denied {
                        reason: LimitReason::LongRangeCooldown,
                        cooldown_secs: remaining,
                    };
                }
            }
            return LimitDecision::Allowed;
        }

        let short: Vec<&ClientRequestRecord> = records
            .iter()
            .filter(|r| r.span_days < self.long_range_days)
            .collect();
        if short.len() >= self.short_cap {
            // Cooldown runs until the oldest counted record exits the window
            let remaining = short
                .iter()
                .map(|r| r.at)
                .min()
                .map(|oldest| (self.window - (now - oldest)).num_seconds().max(0) as u64)
                .unwrap_or(self.window.num_seconds().max(0) as u64);
            debug!(remaining, "Short-range request denied by hourly cap");
            return LimitDecision::Denied {
                reason: LimitReason::HourlyCap,
                cooldown_secs: remaining,
            };
        }

        LimitDecision::Allowed
    }

    /// Record an admitted request. Must be called after an allowed `check`
    /// and before the fetch is issued.
    pub async fn record(&self, span_days: i64) {
        let now = self.clock.now();
        let mut records = self.live_records(now).await;
        records.push(ClientRequestRecord {
            at: now,
            span_days,
        });
        self.save(&records).await;
    }

    /// Records still inside the rolling window; older entries are dropped.
    async fn live_records(&self, now: DateTime<Utc>) -> Vec<ClientRequestRecord> {
        let raw = self.records.get(RECORDS_KEY).await;
        let records: Vec<ClientRequestRecord> = raw
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        records
            .into_iter()
            .filter(|r| now - r.at < self.window)
            .collect()
    }

    async fn save(&self, records: &[ClientRequestRecord]) {
        match serde_json::to_vec(records) {
            Ok(bytes) => self.records.put(RECORDS_KEY, bytes, None).await,
            Err(e) => debug!("Failed to serialize limiter records: {}", e),
        }
    }
}
