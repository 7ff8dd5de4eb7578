//! swkit smoke harness.
//!
//! Registers a caching worker against a live origin, replays a list of
//! requests through it (twice by default, so the second pass exercises the
//! cache), and prints a JSON report.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the shell of an app and replay two requests
//! swkit-smoke https://app.example/ --asset / --asset /index.html /styles/app.css /dashboard
//!
//! # Use a JSON worker config and structured logs
//! swkit-smoke https://app.example/ --config sw.json --log-format json -v /api/tasks
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::json;
use swkit_common::{init_logging, LogConfig, LogFormat};
use swkit_net::{LoaderConfig, Request, ResourceLoader};
use swkit_worker::{
    CacheStore, Client, ClientMatchOptions, FetchEvent, MemoryCacheStore, Router,
    ServiceWorkerContainer, ServiceWorkerEvent, SyncEvent, WorkerConfig,
};
use tracing::{error, info};
use url::Url;

#[derive(Parser)]
#[command(name = "swkit-smoke")]
#[command(about = "Drive a caching service worker against a live origin")]
struct Cli {
    /// Worker scope; request paths are resolved against it
    scope: Url,

    /// Paths to request after activation
    paths: Vec<String>,

    /// Worker config (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the cache generation name
    #[arg(long)]
    cache_name: Option<String>,

    /// Static asset to pre-cache (repeatable; replaces the configured list)
    #[arg(long = "asset")]
    assets: Vec<String>,

    /// Treat every path as a page navigation
    #[arg(long)]
    navigate: bool,

    /// Number of passes over the paths
    #[arg(long, default_value = "2")]
    passes: u32,

    /// Network timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Fire a background sync with this tag before exiting
    #[arg(long)]
    sync_tag: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: CliLogFormat,

    /// Log filter directives (e.g. "swkit_worker=debug,reqwest=warn")
    #[arg(long)]
    log_filter: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace, -vvv span events)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Compact => LogFormat::Compact,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

/// Performance timing collector for tracking operation durations.
struct PerfTiming {
    timings: RefCell<HashMap<&'static str, Vec<Duration>>>,
}

impl PerfTiming {
    fn new() -> Self {
        Self {
            timings: RefCell::new(HashMap::new()),
        }
    }

    fn record(&self, operation: &'static str, duration: Duration) {
        self.timings
            .borrow_mut()
            .entry(operation)
            .or_default()
            .push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let round = |ms: f64| (ms * 100.0).round() / 100.0;
        let mut summary = serde_json::Map::new();

        for (op, durations) in self.timings.borrow().iter() {
            let ms: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            if ms.is_empty() {
                continue;
            }
            let total: f64 = ms.iter().sum();

            summary.insert(
                op.to_string(),
                json!({
                    "count": ms.len(),
                    "total_ms": round(total),
                    "avg_ms": round(total / ms.len() as f64),
                    "min_ms": round(ms.iter().copied().fold(f64::INFINITY, f64::min)),
                    "max_ms": round(ms.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

/// Outcome of one replayed request.
#[derive(Serialize)]
struct FetchReport {
    pass: u32,
    url: String,
    route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    elapsed_ms: f64,
}

fn load_config(cli: &Cli) -> Result<WorkerConfig, Box<dyn std::error::Error>> {
    let mut config = match cli.config {
        Some(ref path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    if let Some(ref name) = cli.cache_name {
        config = config.with_cache_name(name.clone());
    }
    if !cli.assets.is_empty() {
        config.static_assets = cli.assets.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format.into());
    if let Some(ref filter) = cli.log_filter {
        log_config = log_config.with_filter(filter.clone());
    }
    init_logging(log_config)?;

    let config = load_config(&cli)?;
    let router = Router::from_config(&config);
    let perf = PerfTiming::new();

    let loader = ResourceLoader::new(LoaderConfig {
        default_timeout: Duration::from_secs(cli.timeout),
        ..Default::default()
    })?;
    let store = Arc::new(MemoryCacheStore::new());
    let (container, mut events) =
        ServiceWorkerContainer::new(cli.scope.clone(), Arc::new(loader), store.clone());

    // The page that issues every replayed request.
    let page = Client::window(cli.scope.clone());
    let page_id = page.id.clone();
    container.add_client(page).await;

    let start = Instant::now();
    let registered = container.register(config.clone()).await;
    perf.record("register", start.elapsed());
    if let Err(ref e) = registered {
        error!(error = %e, "Registration failed");
    }

    let mut reports = Vec::new();
    if registered.is_ok() {
        for pass in 1..=cli.passes {
            for path in &cli.paths {
                let url = cli.scope.join(path)?;
                let request = if cli.navigate {
                    Request::navigate(url.clone())
                } else {
                    Request::get(url.clone())
                };
                let route = router.classify(&request);

                let start = Instant::now();
                let result = container
                    .handle_fetch(FetchEvent::from_client(request, page_id.as_str()))
                    .await;
                let elapsed = start.elapsed();
                perf.record("fetch", elapsed);

                let mut report = FetchReport {
                    pass,
                    url: url.to_string(),
                    route: route.to_string(),
                    status: None,
                    bytes: None,
                    error: None,
                    elapsed_ms: (elapsed.as_secs_f64() * 100_000.0).round() / 100.0,
                };
                match result {
                    Ok(response) => {
                        report.status = Some(response.status.as_u16());
                        report.bytes = Some(response.body_len());
                    }
                    Err(e) => report.error = Some(e.to_string()),
                }
                reports.push(report);
            }
        }

        if let Some(ref tag) = cli.sync_tag {
            let outcome = container.handle_sync(SyncEvent::new(tag.clone())).await?;
            info!(tag = %tag, outcome = ?outcome, "Sync dispatched");
        }
    }

    let start = Instant::now();
    container.wait_for_background().await;
    perf.record("background_drain", start.elapsed());

    let mut event_counts: HashMap<&'static str, usize> = HashMap::new();
    while let Ok(event) = events.try_recv() {
        let kind = match event {
            ServiceWorkerEvent::StateChange { .. } => "state_change",
            ServiceWorkerEvent::InstallFailed { .. } => "install_failed",
            ServiceWorkerEvent::CacheEvicted { .. } => "cache_evicted",
            ServiceWorkerEvent::ClientsClaimed { .. } => "clients_claimed",
        };
        *event_counts.entry(kind).or_default() += 1;
    }

    let mut generations = serde_json::Map::new();
    for name in store.generations().await {
        let count = store.entry_count(&name).await.unwrap_or_default();
        generations.insert(name, json!(count));
    }

    let controlled: Vec<serde_json::Value> = container
        .match_clients(&ClientMatchOptions::default())
        .await
        .into_iter()
        .map(|client| {
            json!({
                "id": client.id,
                "url": client.url.as_str(),
                "controller": client.controller.map(|id| id.to_string()),
            })
        })
        .collect();

    let failed = registered.is_err() || reports.iter().any(|r| r.error.is_some());
    let result = json!({
        "scope": cli.scope.as_str(),
        "cache_name": config.cache_name,
        "registered": registered.is_ok(),
        "registration_error": registered.err().map(|e| e.to_string()),
        "fetches": reports,
        "events": event_counts,
        "generations": generations,
        "controlled_clients": controlled,
        "perf": perf.summary(),
    });
    println!("{}", serde_json::to_string_pretty(&result)?);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
