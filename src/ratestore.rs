//! Durable per-day rate records over a key-value collection.
//!
//! Keys are `CODE/YYYY-MM-DD`, so a lexicographic prefix scan yields one
//! currency's history in chronological order. Records are written by the
//! backfill/ingest path and only read here.

use crate::core::cache::{KeyValueCollection, Store};
use crate::core::rates::{RatePoint, RateStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

pub const RATES_COLLECTION: &str = "rates";

pub struct KvRateStore {
    collection: Arc<dyn KeyValueCollection>,
}

impl KvRateStore {
    pub fn new(store: &dyn Store) -> Result<Self> {
        let collection = store
            .get_collection(RATES_COLLECTION, true, true)
            .context("Failed to open rates collection")?;
        Ok(Self { collection })
    }

    pub fn with_collection(collection: Arc<dyn KeyValueCollection>) -> Self {
        Self { collection }
    }

    fn key(currency: &str, date: NaiveDate) -> String {
        format!("{}/{}", currency.to_uppercase(), date)
    }

    /// Ingest-side write; not used by the fetch path.
    pub async fn put(&self, point: &RatePoint) -> Result<()> {
        let key = Self::key(&point.currency, point.date);
        let value = serde_json::to_vec(point)?;
        self.collection.put(key.as_bytes(), value, None).await;
        Ok(())
    }
}

#[async_trait]
impl RateStore for KvRateStore {
    async fn range(
        &self,
        currency: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RatePoint>> {
        let prefix = format!("{}/", currency.to_uppercase());
        let from_key = Self::key(currency, from);
        let to_key = Self::key(currency, to);

        let mut points = Vec::new();
        for (key, value) in self.collection.scan_prefix(prefix.as_bytes()).await {
            if key.as_slice() < from_key.as_bytes() || key.as_slice() > to_key.as_bytes() {
                continue;
            }
            let point: RatePoint = serde_json::from_slice(&value)
                .with_context(|| format!("Corrupt rate record for key {:?}", String::from_utf8_lossy(&key)))?;
            points.push(point);
        }
        debug!(
            currency,
            %from,
            %to,
            count = points.len(),
            "Rate store range scan"
        );
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCollection;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn point(currency: &str, y: i32, m: u32, d: u32) -> RatePoint {
        RatePoint {
            date: date(y, m, d),
            currency: currency.to_string(),
            buy: Some(Decimal::new(105, 2)),
            sell: Some(Decimal::new(107, 2)),
        }
    }

    #[tokio::test]
    async fn test_range_returns_sorted_window() {
        let store = KvRateStore::with_collection(Arc::new(MemoryCollection::new()));

        store.put(&point("EUR", 2024, 1, 5)).await.unwrap();
        store.put(&point("EUR", 2024, 1, 1)).await.unwrap();
        store.put(&point("EUR", 2024, 1, 3)).await.unwrap();
        store.put(&point("EUR", 2024, 2, 1)).await.unwrap();
        store.put(&point("GBP", 2024, 1, 2)).await.unwrap();

        let points = store
            .range("EUR", date(2024, 1, 1), date(2024, 1, 31))
            .await
            .unwrap();

        let dates: Vec<NaiveDate> = points.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 1, 1), date(2024, 1, 3), date(2024, 1, 5)]
        );
        assert!(points.iter().all(|p| p.currency == "EUR"));
    }

    #[tokio::test]
    async fn test_range_is_case_insensitive_on_currency() {
        let store = KvRateStore::with_collection(Arc::new(MemoryCollection::new()));
        store.put(&point("USD", 2024, 3, 1)).await.unwrap();

        let points = store
            .range("usd", date(2024, 3, 1), date(2024, 3, 2))
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let store = KvRateStore::with_collection(Arc::new(MemoryCollection::new()));
        let points = store
            .range("EUR", date(2024, 1, 1), date(2024, 1, 31))
            .await
            .unwrap();
        assert!(points.is_empty());
    }
}
