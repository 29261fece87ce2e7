//! Rate series types and provider seams

use crate::core::error::SourceError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A single day's buy/sell quote for one currency. `buy`/`sell` are `None`
/// when no data exists for that day (an explicit gap, not a zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatePoint {
    pub date: NaiveDate,
    pub currency: String,
    pub buy: Option<Decimal>,
    pub sell: Option<Decimal>,
}

impl RatePoint {
    pub fn gap(date: NaiveDate, currency: &str) -> Self {
        Self {
            date,
            currency: currency.to_string(),
            buy: None,
            sell: None,
        }
    }

    pub fn is_gap(&self) -> bool {
        self.buy.is_none() && self.sell.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sampling {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Upstream,
    Synthetic,
}

impl Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provenance::Cache => "cache",
            Provenance::Upstream => "upstream",
            Provenance::Synthetic => "synthetic",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub currency: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub sampling_hint: Option<Sampling>,
}

impl FetchRequest {
    pub fn new(currency: &str, from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            currency: currency.to_string(),
            from,
            to,
            sampling_hint: None,
        }
    }

    /// Number of calendar days covered by the request, inclusive.
    pub fn span_days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub points: Vec<RatePoint>,
    pub provenance: Provenance,
    pub sampling_used: Sampling,
}

/// Constant buy/sell quote for a policy-pegged currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedRate {
    pub buy: Decimal,
    pub sell: Decimal,
}

/// Static reference data for one listed currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyMeta {
    pub code: String,
    pub display_name: String,
    #[serde(default = "default_unit")]
    pub unit: u32,
    #[serde(default)]
    pub fixed_peg: Option<FixedRate>,
}

fn default_unit() -> u32 {
    1
}

/// Upstream rate-publishing API. Implementations are expected to enforce
/// their own per-request timeout and report it as `SourceError::Timeout`.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_range(
        &self,
        currency: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RatePoint>, SourceError>;
}

/// Durable per-day rate records, written by the ingest path and read here.
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn range(&self, currency: &str, from: NaiveDate, to: NaiveDate)
    -> Result<Vec<RatePoint>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_span_days_inclusive() {
        let req = FetchRequest::new("USD", date(2024, 1, 1), date(2024, 1, 10));
        assert_eq!(req.span_days(), 10);

        let single = FetchRequest::new("USD", date(2024, 1, 1), date(2024, 1, 1));
        assert_eq!(single.span_days(), 1);
    }

    #[test]
    fn test_gap_point() {
        let p = RatePoint::gap(date(2024, 1, 5), "EUR");
        assert!(p.is_gap());
        assert_eq!(p.currency, "EUR");
    }

    #[test]
    fn test_currency_meta_defaults() {
        let yaml = r#"
code: "EUR"
display_name: "Euro"
"#;
        let meta: CurrencyMeta = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(meta.unit, 1);
        assert!(meta.fixed_peg.is_none());
    }
}
