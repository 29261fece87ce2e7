//! Server-side access gatekeeper: every public endpoint invocation passes
//! through `Gatekeeper::check` before its handler runs.

pub mod ledger;
pub mod rules;

use crate::core::clock::Clock;
use chrono::Duration;
use ledger::{UsageEntry, UsageLedger};
use rules::{AccessLevel, AccessRule, CachedRules};
use std::sync::Arc;
use tracing::{debug, warn};

/// Transport-level facts about the caller, supplied by the host HTTP layer.
#[derive(Debug, Clone)]
pub struct Caller {
    pub ip: String,
    /// Hostname from the request's declared origin or referrer.
    pub origin_host: Option<String>,
}

impl Caller {
    pub fn from_ip(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            origin_host: None,
        }
    }

    pub fn with_origin(ip: &str, origin_host: &str) -> Self {
        Self {
            ip: ip.to_string(),
            origin_host: Some(origin_host.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyKind {
    Disabled,
    OriginDenied,
    QuotaExceeded { quota: i64 },
}

/// Terminal denial state; callers map `status`/`error` straight onto their
/// transport response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub status: u16,
    pub error: String,
    pub kind: DenyKind,
}

impl Denial {
    fn disabled() -> Self {
        Self {
            status: 403,
            error: "This endpoint is disabled".to_string(),
            kind: DenyKind::Disabled,
        }
    }

    fn origin_denied() -> Self {
        Self {
            status: 403,
            error: "Access denied".to_string(),
            kind: DenyKind::OriginDenied,
        }
    }

    fn quota_exceeded(quota: i64) -> Self {
        Self {
            status: 429,
            error: format!("Hourly quota of {quota} requests exceeded"),
            kind: DenyKind::QuotaExceeded { quota },
        }
    }
}

/// Reduce a literal request path to the canonical endpoint key, so one rule
/// governs all instances of a parameterized route. Unmatched paths pass
/// through unchanged.
pub fn normalize_endpoint(path: &str, routes: &[String]) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let segments: Vec<&str> = path.split('/').collect();

    for route in routes {
        let pattern: Vec<&str> = route.split('/').collect();
        if pattern.len() != segments.len() {
            continue;
        }
        let matches = pattern
            .iter()
            .zip(&segments)
            .all(|(p, s)| p.starts_with(':') || p == s);
        if matches {
            return route.clone();
        }
    }
    path.to_string()
}

/// `pattern` is an exact literal, the universal wildcard `*`, or a hostname
/// suffix wildcard like `*.example.com` (which matches `foo.example.com`
/// but not `example.com` or `example.com.evil.com`).
fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return candidate.ends_with(suffix);
    }
    pattern == candidate
}

pub struct Gatekeeper {
    rules: CachedRules,
    ledger: Arc<dyn UsageLedger>,
    clock: Arc<dyn Clock>,
    routes: Vec<String>,
    quota_window: Duration,
}

impl Gatekeeper {
    pub fn new(
        rules: CachedRules,
        ledger: Arc<dyn UsageLedger>,
        clock: Arc<dyn Clock>,
        routes: Vec<String>,
        quota_window_secs: u64,
    ) -> Self {
        Self {
            rules,
            ledger,
            clock,
            routes,
            quota_window: Duration::seconds(quota_window_secs as i64),
        }
    }

    /// Evaluate access for one request. `Ok(())` means the handler may run.
    ///
    /// Every call is decided independently from current cache and ledger
    /// contents; there is no retry loop and no state machine.
    pub async fn check(&self, path: &str, caller: &Caller) -> Result<(), Denial> {
        let endpoint = normalize_endpoint(path, &self.routes);

        let rule = match self.rules.resolve(&endpoint).await {
            Ok(rule) => rule,
            Err(e) => {
                // Rule storage trouble is treated like a missing rule
                warn!(endpoint, error = %e, "Failed to resolve access rule; allowing");
                return Ok(());
            }
        };

        let Some(AccessRule { level, .. }) = rule else {
            // Fail open so undocumented internal routes keep working, but
            // make the misconfiguration visible.
            warn!(endpoint, "No access rule configured for endpoint; allowing");
            return Ok(());
        };

        match level {
            AccessLevel::Disabled => {
                debug!(endpoint, "Endpoint disabled");
                let denial = Denial::disabled();
                self.log_usage(&caller.ip, &endpoint, denial.status).await;
                Err(denial)
            }
            AccessLevel::Public { quota_per_hour } => {
                self.enforce_quota(&endpoint, caller.ip.clone(), quota_per_hour)
                    .await
            }
            AccessLevel::Restricted {
                allow_list,
                quota_per_hour,
            } => {
                let ip_matched = allow_list.iter().any(|p| pattern_matches(p, &caller.ip));
                let host_matched = caller
                    .origin_host
                    .as_deref()
                    .filter(|host| allow_list.iter().any(|p| pattern_matches(p, host)));

                if !ip_matched && host_matched.is_none() {
                    debug!(endpoint, ip = %caller.ip, "Caller not in allow list");
                    return Err(Denial::origin_denied());
                }

                // One domain's traffic shares one bucket regardless of IP
                let identity = host_matched
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| caller.ip.clone());
                self.enforce_quota(&endpoint, identity, quota_per_hour).await
            }
        }
    }

    async fn enforce_quota(
        &self,
        endpoint: &str,
        identity: String,
        quota_per_hour: i64,
    ) -> Result<(), Denial> {
        if quota_per_hour < 0 {
            return Ok(());
        }

        let now = self.clock.now();
        let count = self
            .ledger
            .count_since(&identity, endpoint, now - self.quota_window)
            .await;
        if count >= quota_per_hour as u64 {
            debug!(endpoint, identity, count, "Quota exceeded");
            return Err(Denial::quota_exceeded(quota_per_hour));
        }

        self.log_usage(&identity, endpoint, 200).await;
        Ok(())
    }

    async fn log_usage(&self, identity: &str, endpoint: &str, status: u16) {
        let entry = UsageEntry {
            identity: identity.to_string(),
            endpoint: endpoint.to_string(),
            at: self.clock.now(),
            status,
        };
        // Fire and forget; a lost row only under-enforces the quota
        let ledger = Arc::clone(&self.ledger);
        tokio::spawn(async move {
            ledger.append(entry).await;
        });
    }
}
