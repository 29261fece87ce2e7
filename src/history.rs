//! Historical fetch orchestration: cache-vs-upstream routing, chunked
//! retrieval, merge, and gap-fill.

use crate::core::config::AppConfig;
use crate::core::error::FetchError;
use crate::core::rates::{
    CurrencyMeta, FetchRequest, FetchResult, FixedRate, Provenance, RatePoint, RateSource,
    RateStore, Sampling,
};
use chrono::{Duration as ChronoDuration, NaiveDate};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Progress event published after each completed chunk. Chunk indices are
/// 1-based and non-decreasing within one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchProgress {
    pub percent: u8,
    pub current_chunk: usize,
    pub total_chunks: usize,
}

pub type ProgressSender = mpsc::UnboundedSender<FetchProgress>;

/// Cooperative cancellation checked between chunk fetches. Cancelling
/// mid-chunk lets the in-flight call finish and discards its result.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct HistoricalFetcher {
    source: Arc<dyn RateSource>,
    store: Arc<dyn RateStore>,
    currencies: Vec<CurrencyMeta>,
    chunk_days: i64,
    short_span_days: i64,
    store_timeout: Duration,
}

impl HistoricalFetcher {
    pub fn new(
        source: Arc<dyn RateSource>,
        store: Arc<dyn RateStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            source,
            store,
            currencies: config.currencies.clone(),
            chunk_days: config.upstream.chunk_days as i64,
            short_span_days: config.store.short_span_days,
            store_timeout: Duration::from_secs(config.store.lookup_timeout_secs),
        }
    }

    fn currency(&self, code: &str) -> Option<&CurrencyMeta> {
        self.currencies
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
    }

    /// Fetch historical rates for `[from, to]` inclusive.
    ///
    /// Progress events are published on `progress` after each upstream
    /// chunk. Store failures and timeouts fall back to the upstream source
    /// and are never surfaced; upstream chunk failures abort the whole
    /// operation with the failing chunk's context.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        progress: Option<ProgressSender>,
        cancel: Option<CancelToken>,
    ) -> Result<FetchResult, FetchError> {
        if request.from > request.to {
            return Err(FetchError::InvalidDateRange {
                from: request.from,
                to: request.to,
            });
        }

        if let Some(meta) = self.currency(&request.currency) {
            if let Some(peg) = meta.fixed_peg {
                // A pegged series is complete by construction: no store, no
                // network, no gap-fill.
                return Ok(self.synthesize(meta, &peg, request));
            }
        }

        if request.span_days() <= self.short_span_days {
            match timeout(
                self.store_timeout,
                self.store.range(&request.currency, request.from, request.to),
            )
            .await
            {
                Ok(Ok(points)) if !points.is_empty() => {
                    debug!(count = points.len(), "Serving range from rate store");
                    return Ok(self.finish(points, Provenance::Cache, request));
                }
                Ok(Ok(_)) => {
                    debug!("Rate store has no rows for range; falling back to upstream");
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Rate store lookup failed; falling back to upstream");
                }
                Err(_) => {
                    warn!("Rate store lookup timed out; falling back to upstream");
                }
            }
        }

        let total_chunks = (request.span_days() as u64).div_ceil(self.chunk_days as u64) as usize;
        let mut merged: BTreeMap<NaiveDate, RatePoint> = BTreeMap::new();

        for i in 0..total_chunks {
            if let Some(token) = &cancel {
                if token.is_cancelled() {
                    return Err(FetchError::Cancelled);
                }
            }

            let start = request.from + ChronoDuration::days(i as i64 * self.chunk_days);
            let end = (start + ChronoDuration::days(self.chunk_days - 1)).min(request.to);

            let chunk = self
                .source
                .fetch_range(&request.currency, start, end)
                .await
                .map_err(|source| FetchError::Upstream {
                    chunk: i + 1,
                    total: total_chunks,
                    source,
                })?;

            // Last write wins on overlap between adjacent chunks.
            for point in chunk {
                merged.insert(point.date, point);
            }

            if let Some(tx) = &progress {
                let _ = tx.send(FetchProgress {
                    percent: ((i + 1) * 100 / total_chunks) as u8,
                    current_chunk: i + 1,
                    total_chunks,
                });
            }
        }

        let points = merged.into_values().collect();
        Ok(self.finish(points, Provenance::Upstream, request))
    }

    fn synthesize(
        &self,
        meta: &CurrencyMeta,
        peg: &FixedRate,
        request: &FetchRequest,
    ) -> FetchResult {
        let unit = Decimal::from(meta.unit);
        let buy = peg.buy / unit;
        let sell = peg.sell / unit;

        let points = request
            .from
            .iter_days()
            .take_while(|d| *d <= request.to)
            .map(|date| RatePoint {
                date,
                currency: meta.code.clone(),
                buy: Some(buy),
                sell: Some(sell),
            })
            .collect();

        FetchResult {
            points: sample(points, request),
            provenance: Provenance::Synthetic,
            sampling_used: request.sampling_hint.unwrap_or(Sampling::Daily),
        }
    }

    fn finish(
        &self,
        points: Vec<RatePoint>,
        provenance: Provenance,
        request: &FetchRequest,
    ) -> FetchResult {
        let filled = gap_fill(points, &request.currency, request.from, request.to);
        FetchResult {
            points: sample(filled, request),
            provenance,
            sampling_used: request.sampling_hint.unwrap_or(Sampling::Daily),
        }
    }
}

/// Insert an explicit null-valued point for every calendar day in
/// `[from, to]` missing from `points`, so consumers render breaks rather
/// than skewed interpolation. Points outside the range are dropped.
/// Idempotent.
pub fn gap_fill(
    points: Vec<RatePoint>,
    currency: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<RatePoint> {
    let mut by_date: BTreeMap<NaiveDate, RatePoint> = points
        .into_iter()
        .filter(|p| p.date >= from && p.date <= to)
        .map(|p| (p.date, p))
        .collect();

    from.iter_days()
        .take_while(|d| *d <= to)
        .map(|date| {
            by_date
                .remove(&date)
                .unwrap_or_else(|| RatePoint::gap(date, currency))
        })
        .collect()
}

fn sample(points: Vec<RatePoint>, request: &FetchRequest) -> Vec<RatePoint> {
    match request.sampling_hint.unwrap_or(Sampling::Daily) {
        Sampling::Daily => points,
        Sampling::Weekly => points
            .into_iter()
            .filter(|p| (p.date - request.from).num_days() % 7 == 0)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::SourceError;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rate(currency: &str, date: NaiveDate) -> RatePoint {
        RatePoint {
            date,
            currency: currency.to_string(),
            buy: Some(Decimal::new(11, 1)),
            sell: Some(Decimal::new(12, 1)),
        }
    }

    /// Upstream stub: one point per day of the requested window, minus the
    /// configured missing dates; optionally fails on the nth call.
    struct MockSource {
        calls: AtomicUsize,
        windows: Mutex<Vec<(NaiveDate, NaiveDate)>>,
        missing: Vec<NaiveDate>,
        fail_on_call: Option<usize>,
    }

    impl MockSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                windows: Mutex::new(Vec::new()),
                missing: Vec::new(),
                fail_on_call: None,
            }
        }

        fn failing_on(call: usize) -> Self {
            Self {
                fail_on_call: Some(call),
                ..Self::new()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateSource for MockSource {
        async fn fetch_range(
            &self,
            currency: &str,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<RatePoint>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.windows.lock().unwrap().push((from, to));
            if self.fail_on_call == Some(call) {
                return Err(SourceError::Status(500));
            }
            Ok(from
                .iter_days()
                .take_while(|d| *d <= to)
                .filter(|d| !self.missing.contains(d))
                .map(|d| rate(currency, d))
                .collect())
        }
    }

    struct MockStore {
        calls: AtomicUsize,
        points: Vec<RatePoint>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl MockStore {
        fn with_points(points: Vec<RatePoint>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                points,
                delay: None,
                fail: false,
            }
        }

        fn empty() -> Self {
            Self::with_points(Vec::new())
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RateStore for MockStore {
        async fn range(
            &self,
            _currency: &str,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> anyhow::Result<Vec<RatePoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(anyhow!("store unavailable"));
            }
            Ok(self.points.clone())
        }
    }

    fn fetcher(source: Arc<MockSource>, store: Arc<MockStore>) -> HistoricalFetcher {
        let config = AppConfig::default();
        HistoricalFetcher {
            source,
            store,
            currencies: config.currencies.clone(),
            chunk_days: 90,
            short_span_days: 7,
            store_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_chunking_sizes_and_progress() {
        let source = Arc::new(MockSource::new());
        let store = Arc::new(MockStore::empty());
        let f = fetcher(source.clone(), store.clone());

        // 200 days => chunks of 90, 90, 20
        let request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 7, 18));
        assert_eq!(request.span_days(), 200);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = f.fetch(&request, Some(tx), None).await.unwrap();

        assert_eq!(source.call_count(), 3);
        let windows = source.windows.lock().unwrap().clone();
        assert_eq!(windows[0], (date(2024, 1, 1), date(2024, 3, 30)));
        assert_eq!(windows[1], (date(2024, 3, 31), date(2024, 6, 28)));
        assert_eq!(windows[2], (date(2024, 6, 29), date(2024, 7, 18)));

        // Long span skips the store entirely
        assert_eq!(store.call_count(), 0);
        assert_eq!(result.provenance, Provenance::Upstream);
        assert_eq!(result.points.len(), 200);

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(events[2].percent, 100);
        assert_eq!(events[2].current_chunk, 3);
        assert_eq!(events[2].total_chunks, 3);
    }

    #[tokio::test]
    async fn test_fixed_peg_bypasses_store_and_upstream() {
        let source = Arc::new(MockSource::new());
        let store = Arc::new(MockStore::empty());
        let f = fetcher(source.clone(), store.clone());

        let request = FetchRequest::new("USD", date(2024, 1, 1), date(2024, 1, 10));
        let result = f.fetch(&request, None, None).await.unwrap();

        assert_eq!(result.provenance, Provenance::Synthetic);
        assert_eq!(result.points.len(), 10);
        assert!(result.points.iter().all(|p| !p.is_gap()));
        assert_eq!(result.points[0].buy, Some(Decimal::new(36710, 4)));
        assert_eq!(source.call_count(), 0);
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn test_short_span_served_from_store_with_gap_fill() {
        // 5-day request, store has 3 of the days
        let points = vec![
            rate("EUR", date(2024, 1, 1)),
            rate("EUR", date(2024, 1, 2)),
            rate("EUR", date(2024, 1, 4)),
        ];
        let source = Arc::new(MockSource::new());
        let store = Arc::new(MockStore::with_points(points));
        let f = fetcher(source.clone(), store.clone());

        let request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 1, 5));
        let result = f.fetch(&request, None, None).await.unwrap();

        assert_eq!(result.provenance, Provenance::Cache);
        assert_eq!(result.points.len(), 5);
        assert!(result.points[2].is_gap());
        assert!(result.points[4].is_gap());
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_store_falls_back_to_upstream() {
        let source = Arc::new(MockSource::new());
        let store = Arc::new(MockStore::empty());
        let f = fetcher(source.clone(), store.clone());

        let request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 1, 5));
        let result = f.fetch(&request, None, None).await.unwrap();

        assert_eq!(store.call_count(), 1);
        assert_eq!(source.call_count(), 1);
        assert_eq!(result.provenance, Provenance::Upstream);
        assert_eq!(result.points.len(), 5);
    }

    #[tokio::test]
    async fn test_store_timeout_falls_back_to_upstream() {
        let source = Arc::new(MockSource::new());
        let store = Arc::new(MockStore {
            delay: Some(Duration::from_millis(500)),
            ..MockStore::with_points(vec![rate("EUR", date(2024, 1, 1))])
        });
        let f = fetcher(source.clone(), store);

        let request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 1, 3));
        let result = f.fetch(&request, None, None).await.unwrap();

        assert_eq!(result.provenance, Provenance::Upstream);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_store_error_is_recovered_not_surfaced() {
        let source = Arc::new(MockSource::new());
        let store = Arc::new(MockStore {
            fail: true,
            ..MockStore::empty()
        });
        let f = fetcher(source.clone(), store);

        let request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 1, 3));
        let result = f.fetch(&request, None, None).await.unwrap();
        assert_eq!(result.provenance, Provenance::Upstream);
    }

    #[tokio::test]
    async fn test_chunk_failure_aborts_with_context() {
        let source = Arc::new(MockSource::failing_on(2));
        let store = Arc::new(MockStore::empty());
        let f = fetcher(source.clone(), store);

        let request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 7, 18));
        let err = f.fetch(&request, None, None).await.unwrap_err();

        match err {
            FetchError::Upstream {
                chunk,
                total,
                source: SourceError::Status(500),
            } => {
                assert_eq!(chunk, 2);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // No further chunks after the failure
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_date_range() {
        let f = fetcher(Arc::new(MockSource::new()), Arc::new(MockStore::empty()));
        let request = FetchRequest::new("EUR", date(2024, 1, 10), date(2024, 1, 1));
        let err = f.fetch(&request, None, None).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidDateRange { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_before_first_chunk() {
        let source = Arc::new(MockSource::new());
        let f = fetcher(source.clone(), Arc::new(MockStore::empty()));

        let token = CancelToken::new();
        token.cancel();

        let request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 7, 18));
        let err = f.fetch(&request, None, Some(token)).await.unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ten_day_scenario_with_two_missing_days() {
        let mut source = MockSource::new();
        source.missing = vec![date(2024, 1, 4), date(2024, 1, 7)];
        let f = fetcher(Arc::new(source), Arc::new(MockStore::empty()));

        let request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 1, 10));
        let result = f.fetch(&request, None, None).await.unwrap();

        assert_eq!(result.points.len(), 10);
        assert_eq!(result.points.iter().filter(|p| p.is_gap()).count(), 2);
        let dates: Vec<NaiveDate> = result.points.iter().map(|p| p.date).collect();
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(dates[0], date(2024, 1, 1));
        assert_eq!(dates[9], date(2024, 1, 10));
    }

    #[tokio::test]
    async fn test_weekly_sampling_hint() {
        let source = Arc::new(MockSource::new());
        let f = fetcher(source, Arc::new(MockStore::empty()));

        let mut request = FetchRequest::new("EUR", date(2024, 1, 1), date(2024, 1, 15));
        request.sampling_hint = Some(Sampling::Weekly);
        let result = f.fetch(&request, None, None).await.unwrap();

        assert_eq!(result.sampling_used, Sampling::Weekly);
        let dates: Vec<NaiveDate> = result.points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 1, 8), date(2024, 1, 15)]);
    }

    #[test]
    fn test_gap_fill_is_idempotent() {
        let points = vec![rate("EUR", date(2024, 1, 2)), rate("EUR", date(2024, 1, 4))];
        let once = gap_fill(points, "EUR", date(2024, 1, 1), date(2024, 1, 5));
        let twice = gap_fill(once.clone(), "EUR", date(2024, 1, 1), date(2024, 1, 5));
        assert_eq!(once, twice);
        assert_eq!(once.len(), 5);
        assert!(once[0].is_gap());
    }

    #[test]
    fn test_gap_fill_drops_out_of_range_points() {
        let points = vec![rate("EUR", date(2023, 12, 31)), rate("EUR", date(2024, 1, 2))];
        let filled = gap_fill(points, "EUR", date(2024, 1, 1), date(2024, 1, 3));
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[0].date, date(2024, 1, 1));
        assert!(filled[0].is_gap());
    }
}
