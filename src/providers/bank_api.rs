//! Client for the external rate-publishing API.
//!
//! The feed caps each call at a bounded date window; the orchestrator is
//! responsible for chunking larger spans. One call here is one window.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::error::SourceError;
use crate::core::rates::{RatePoint, RateSource};

pub struct BankRateProvider {
    base_url: String,
    client: reqwest::Client,
}

impl BankRateProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fxdash/1.0")
            .timeout(timeout)
            .build()?;
        Ok(BankRateProvider {
            base_url: base_url.to_string(),
            client,
        })
    }
}

#[derive(Deserialize, Debug)]
struct FeedResponse {
    rates: Vec<FeedItem>,
}

#[derive(Deserialize, Debug)]
struct FeedItem {
    date: NaiveDate,
    buy: Option<Decimal>,
    sell: Option<Decimal>,
}

#[async_trait]
impl RateSource for BankRateProvider {
    #[instrument(
        name = "FeedRangeFetch",
        skip(self),
        fields(currency = %currency, from = %from, to = %to)
    )]
    async fn fetch_range(
        &self,
        currency: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<RatePoint>, SourceError> {
        let url = format!(
            "{}/api/historical/{}?from={}&to={}",
            self.base_url,
            currency.to_uppercase(),
            from,
            to
        );
        debug!("Requesting rate data from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Transport(e.to_string())
            }
        })?;

        let data: FeedResponse =
            serde_json::from_str(&text).map_err(|e| SourceError::Payload(e.to_string()))?;

        let points = data
            .rates
            .into_iter()
            .map(|item| RatePoint {
                date: item.date,
                currency: currency.to_uppercase(),
                buy: item.buy,
                sell: item.sell,
            })
            .collect();

        Ok(points)
    }
}
