//! Driftnet command-line entry point
//!
//! Runs a crawl over the seed URLs from a TOML configuration file using the
//! plain-HTTP transport, logging each fetched page.

use async_trait::async_trait;
use clap::Parser;
use driftnet::config::load_config_with_hash;
use driftnet::{
    Crawler, CrawlingContext, EventBus, HttpFetcher, MemoryKeyValueStore, MemoryRequestQueue,
    PageHandler, PlatformEvent, RequestQueue, SqliteRequestQueue, StaticProxyList,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Driftnet: a general web-crawling engine
#[derive(Parser, Debug)]
#[command(name = "driftnet")]
#[command(version)]
#[command(about = "A general web-crawling engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,
}

/// Handler that logs every fetched page
struct LoggingHandler;

#[async_trait]
impl PageHandler for LoggingHandler {
    async fn handle(&self, ctx: &mut CrawlingContext) -> anyhow::Result<()> {
        match &ctx.page {
            Some(page) => {
                tracing::info!(
                    url = %ctx.request.url,
                    status = page.status,
                    bytes = page.body.len(),
                    "Fetched"
                );
                if page.status >= 400 {
                    anyhow::bail!("server responded with status {}", page.status);
                }
            }
            None => tracing::info!(url = %ctx.request.url, "Processed (no transport)"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    if config.seeds.urls.is_empty() {
        tracing::error!("No seed URLs configured; nothing to crawl");
        return Err("no seed URLs configured".into());
    }

    // Pick the queue backend: durable when a path is configured
    let queue: Arc<dyn RequestQueue> = match &config.storage.queue_path {
        Some(path) => {
            tracing::info!("Using SQLite queue at {}", path);
            Arc::new(SqliteRequestQueue::new(std::path::Path::new(path))?)
        }
        None => Arc::new(MemoryRequestQueue::new()),
    };

    let fetcher = Arc::new(HttpFetcher::new(
        &config.crawler.user_agent,
        Duration::from_millis(config.crawler.navigation_timeout_ms),
    )?);

    let event_bus = EventBus::new();
    spawn_signal_listener(event_bus.clone());

    let mut builder = Crawler::builder()
        .handler(Arc::new(LoggingHandler))
        .fetcher(fetcher)
        .seed_urls(&config.seeds.urls)?
        .request_queue(queue)
        .state_store(Arc::new(MemoryKeyValueStore::new()))
        .executor_options(config.executor_options())
        .scheduler_options(config.scheduler_options())
        .load_options(config.load_options())
        .migration_grace(config.migration_grace())
        .event_subscription(event_bus.subscribe());

    if let Some(pool_options) = config.session_pool_options() {
        builder = builder.session_pool(pool_options);
    }

    if !config.proxy.urls.is_empty() {
        builder = builder.proxy_provider(Arc::new(StaticProxyList::new(config.proxy.urls.clone())));
    }

    let crawler = builder.build()?;

    match crawler.run().await {
        Ok(summary) => {
            println!("=== Crawl Summary ===");
            println!("  Finished: {}", summary.requests_finished);
            println!("  Failed:   {}", summary.requests_failed);
            println!(
                "  Avg duration: {}ms (min {}ms, max {}ms)",
                summary.request_avg_duration_millis,
                summary.request_min_duration_millis,
                summary.request_max_duration_millis
            );
            println!("  Throughput: {:.1} requests/min", summary.requests_per_minute);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("driftnet=info,warn"),
            1 => EnvFilter::new("driftnet=debug,info"),
            2 => EnvFilter::new("driftnet=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Bridges SIGTERM into the lifecycle event bus
fn spawn_signal_listener(bus: EventBus) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let Ok(mut term) = signal(SignalKind::terminate()) else {
            return;
        };
        term.recv().await;
        tracing::info!("SIGTERM received");
        bus.emit(PlatformEvent::Migrating);
    });

    #[cfg(not(unix))]
    let _ = bus;
}

/// Prints what the crawl would do, without doing it
fn handle_dry_run(config: &driftnet::Config) {
    println!("=== Driftnet Dry Run ===\n");

    println!("Crawler:");
    println!(
        "  Concurrency: {}..{}",
        config.crawler.min_concurrency, config.crawler.max_concurrency
    );
    println!("  Max request retries: {}", config.crawler.max_request_retries);
    if let Some(max) = config.crawler.max_requests_per_crawl {
        println!("  Max requests per crawl: {}", max);
    }
    println!(
        "  Timeouts: navigation {}ms, handler {}ms",
        config.crawler.navigation_timeout_ms, config.crawler.handler_timeout_ms
    );

    println!("\nSession pool:");
    if config.session_pool.enabled {
        println!(
            "  {} sessions, {} uses each, blocked on {:?}",
            config.session_pool.max_pool_size,
            config.session_pool.max_session_usage,
            config.session_pool.blocked_status_codes
        );
    } else {
        println!("  disabled");
    }

    println!("\nStorage:");
    match &config.storage.queue_path {
        Some(path) => println!("  SQLite queue: {}", path),
        None => println!("  in-memory queue"),
    }

    if !config.proxy.urls.is_empty() {
        println!("\nProxies ({}):", config.proxy.urls.len());
        for url in &config.proxy.urls {
            println!("  - {}", url);
        }
    }

    println!("\nSeeds ({}):", config.seeds.urls.len());
    for url in &config.seeds.urls {
        println!("  - {}", url);
    }

    println!("\n✓ Configuration is valid");
}
