pub mod core;
pub mod gate;
pub mod history;
pub mod limiter;
pub mod providers;
pub mod ratestore;
pub mod store;
pub mod ui;

use crate::core::cache::Store;
use crate::core::clock::SystemClock;
use crate::core::config::AppConfig;
use crate::core::rates::FetchRequest;
use crate::gate::rules::{CachedRules, KvRuleStore, SETTINGS_CACHE_COLLECTION};
use crate::gate::{Caller, Gatekeeper};
use crate::gate::ledger::{KvUsageLedger, UsageLedger};
use crate::history::HistoricalFetcher;
use crate::limiter::{LimitDecision, RequestLimiter};
use crate::providers::bank_api::BankRateProvider;
use crate::ratestore::KvRateStore;
use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use comfy_table::Cell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const LIMITER_COLLECTION: &str = "limiter";

pub enum AppCommand {
    Rates {
        currency: String,
        from: NaiveDate,
        to: NaiveDate,
        weekly: bool,
    },
    Access {
        endpoint: String,
        ip: String,
        origin: Option<String>,
    },
    Prune,
}

/// Wire the orchestrator from config and a shared store.
pub fn build_fetcher(config: &AppConfig, store: &KeyValueStore) -> Result<HistoricalFetcher> {
    let source = BankRateProvider::new(
        &config.upstream.base_url,
        Duration::from_secs(config.upstream.timeout_secs),
    )?;
    let rate_store = KvRateStore::new(store)?;
    Ok(HistoricalFetcher::new(
        Arc::new(source),
        Arc::new(rate_store),
        config,
    ))
}

pub fn build_limiter(config: &AppConfig, store: &KeyValueStore) -> Result<RequestLimiter> {
    let records = store
        .get_collection(LIMITER_COLLECTION, true, true)
        .or_else(|| store.get_collection(LIMITER_COLLECTION, false, true))
        .context("Failed to open limiter collection")?;
    Ok(RequestLimiter::new(
        records,
        Arc::new(SystemClock),
        &config.limiter,
    ))
}

pub fn build_gatekeeper(config: &AppConfig, store: &KeyValueStore) -> Result<Gatekeeper> {
    let rules = Arc::new(KvRuleStore::new(store)?);
    let settings_cache = store
        .get_collection(SETTINGS_CACHE_COLLECTION, false, true)
        .context("Failed to open settings cache")?;
    let cached = CachedRules::new(
        rules,
        settings_cache,
        Duration::from_secs(config.gate.rule_ttl_secs),
    );
    let ledger = Arc::new(KvUsageLedger::new(store)?);
    Ok(Gatekeeper::new(
        cached,
        ledger,
        Arc::new(SystemClock),
        config.gate.routes.clone(),
        config.gate.quota_window_secs,
    ))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("fxdash starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store = match config.default_data_path() {
        Ok(path) => KeyValueStore::open(&path),
        Err(_) => KeyValueStore::ephemeral(),
    };

    match command {
        AppCommand::Rates {
            currency,
            from,
            to,
            weekly,
        } => run_rates(&config, &store, &currency, from, to, weekly).await,
        AppCommand::Access {
            endpoint,
            ip,
            origin,
        } => run_access(&config, &store, &endpoint, &ip, origin.as_deref()).await,
        AppCommand::Prune => run_prune(&config, &store).await,
    }
}

async fn run_rates(
    config: &AppConfig,
    store: &KeyValueStore,
    currency: &str,
    from: NaiveDate,
    to: NaiveDate,
    weekly: bool,
) -> Result<()> {
    let mut request = FetchRequest::new(currency, from, to);
    if weekly {
        request.sampling_hint = Some(crate::core::rates::Sampling::Weekly);
    }

    let limiter = build_limiter(config, store)?;
    match limiter.check(request.span_days()).await {
        LimitDecision::Allowed => limiter.record(request.span_days()).await,
        LimitDecision::Denied {
            reason,
            cooldown_secs,
        } => {
            println!(
                "{}",
                ui::style_text(
                    &format!("Rate limited: {reason}. Retry in {cooldown_secs}s."),
                    ui::StyleType::Error
                )
            );
            return Ok(());
        }
    }

    let fetcher = build_fetcher(config, store)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<crate::history::FetchProgress>();
    let pb = ui::new_progress_bar(100, true);
    pb.set_message(format!("Fetching {currency} rates..."));
    let pb_task = {
        let pb = pb.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                pb.set_position(event.percent as u64);
            }
        })
    };

    let result = fetcher.fetch(&request, Some(tx), None).await;
    let _ = pb_task.await;
    pb.finish_and_clear();

    let result = result?;

    if result.points.iter().all(|p| p.is_gap()) {
        println!(
            "{}",
            ui::style_text("No data for this range.", ui::StyleType::Subtle)
        );
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Buy"),
        ui::header_cell("Sell"),
    ]);
    for point in &result.points {
        table.add_row(vec![
            Cell::new(point.date.to_string()),
            ui::rate_cell(point.buy),
            ui::rate_cell(point.sell),
        ]);
    }

    println!(
        "{}\n\n{}",
        ui::style_text(
            &format!("{currency} {from} – {to}"),
            ui::StyleType::Title
        ),
        table
    );
    println!(
        "\n{}",
        ui::style_text(
            &format!("source: {}", result.provenance),
            ui::StyleType::Subtle
        )
    );
    Ok(())
}

async fn run_access(
    config: &AppConfig,
    store: &KeyValueStore,
    endpoint: &str,
    ip: &str,
    origin: Option<&str>,
) -> Result<()> {
    let gate = build_gatekeeper(config, store)?;
    let caller = match origin {
        Some(host) => Caller::with_origin(ip, host),
        None => Caller::from_ip(ip),
    };

    match gate.check(endpoint, &caller).await {
        Ok(()) => println!("allowed"),
        Err(denial) => println!(
            "{}",
            ui::style_text(
                &format!("denied ({}): {}", denial.status, denial.error),
                ui::StyleType::Error
            )
        ),
    }
    Ok(())
}

async fn run_prune(config: &AppConfig, store: &KeyValueStore) -> Result<()> {
    let ledger = KvUsageLedger::new(store)?;
    let cutoff = Utc::now() - chrono::Duration::seconds(config.gate.prune_after_secs as i64);
    let removed = ledger.prune(cutoff).await;
    println!("Pruned {removed} usage log entries");
    Ok(())
}
