//! Feed-Refresher main entry point
//!
//! This is the command-line interface for the feed refresher daemon.

use anyhow::{Context, Result};
use clap::Parser;
use feed_refresher::bus::{spawn_consumers, ConsumerSettings, MemoryBus};
use feed_refresher::checker::UpdateChecker;
use feed_refresher::config::{load_config_with_hash, Config};
use feed_refresher::http::build_http_client;
use feed_refresher::model::{ArticleCheckCandidate, ArticleCheckEvent};
use feed_refresher::refresh::FeedRefresher;
use feed_refresher::robots::RobotsPolicy;
use feed_refresher::scheduler::{clamp_page_size, BatchScheduler, SchedulerSettings};
use feed_refresher::shutdown_channel;
use feed_refresher::storage::{ArticleStore, SqliteStorage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Feed-Refresher: keeps aggregated feed articles fresh
///
/// Periodically refreshes subscribed feeds and rechecks recently published
/// articles with conditional requests, honouring robots.txt throughout.
#[derive(Parser, Debug)]
#[command(name = "feed-refresher")]
#[command(version)]
#[command(about = "Polite incremental feed and article refresher", long_about = None)]
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

    /// Validate config and print the effective settings
    #[arg(long, conflicts_with_all = ["add_feed", "check_article", "run_now"])]
    dry_run: bool,

    /// Subscribe a feed URL and exit
    #[arg(long, value_name = "URL", conflicts_with_all = ["check_article", "run_now"])]
    add_feed: Option<String>,

    /// Recheck one article immediately and exit
    #[arg(long, value_name = "ID", conflicts_with = "run_now")]
    check_article: Option<i64>,

    /// Run both cycles once, process the resulting events and exit
    #[arg(long)]
    run_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let storage = Arc::new(
        SqliteStorage::new(Path::new(&config.storage.database_path))
            .with_context(|| format!("failed to open {}", config.storage.database_path))?,
    );

    if let Some(url) = cli.add_feed {
        let feed_id = storage
            .insert_feed(&url, None)
            .with_context(|| format!("failed to add feed {}", url))?;
        println!("Feed {} subscribed as id {}", url, feed_id);
        return Ok(());
    }

    let app = App::build(&config, storage)?;

    if let Some(article_id) = cli.check_article {
        return app.check_article(article_id).await;
    }

    if cli.run_now {
        return app.run_once().await;
    }

    app.run_daemon().await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("feed_refresher=info,warn"),
            1 => EnvFilter::new("feed_refresher=debug,info"),
            2 => EnvFilter::new("feed_refresher=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode
fn handle_dry_run(config: &Config) {
    println!("=== Feed-Refresher Dry Run ===\n");

    println!("Scheduler:");
    println!("  Feed refresh cron: {}", config.scheduler.feed_refresh_cron);
    println!("  Article recheck cron: {}", config.scheduler.article_recheck_cron);
    println!(
        "  Batches: {} feeds each, {}ms apart, at most {} at once",
        config.scheduler.batch_size,
        config.scheduler.batch_delay_ms,
        config.scheduler.max_concurrent_batches
    );

    println!("\nRecheck:");
    println!("  Window: {}h", config.recheck.window_hours);
    println!("  Minimum gap: {}min", config.recheck.min_gap_minutes);
    println!("  Page size: {}", clamp_page_size(config.recheck.page_size));

    println!("\nChecker:");
    println!("  User agent: {}", config.checker.user_agent);
    println!(
        "  Attempts: {} (backoff {}ms..{}ms, jitter {})",
        config.checker.max_attempts,
        config.checker.backoff_initial_ms,
        config.checker.backoff_max_ms,
        config.checker.jitter
    );
    println!("  Max content: {} bytes", config.checker.max_content_bytes);

    println!("\nRobots:");
    println!("  Enabled: {}", config.robots.enabled);
    println!("  Cache TTL: {}h", config.robots.cache_ttl_hours);

    println!("\nStorage: {}", config.storage.database_path);
    println!(
        "Consumers: {} per channel, queue {}",
        config.consumer.workers, config.consumer.queue_capacity
    );

    println!("\n✓ Configuration is valid");
}

/// Wired-up components
struct App {
    config: Config,
    storage: Arc<SqliteStorage>,
    bus: Arc<MemoryBus>,
    checker: Arc<UpdateChecker>,
    refresher: Arc<FeedRefresher>,
    scheduler: BatchScheduler,
}

impl App {
    fn build(config: &Config, storage: Arc<SqliteStorage>) -> Result<Self> {
        let client = build_http_client(&config.checker).context("failed to build HTTP client")?;
        let robots = config
            .robots
            .enabled
            .then(|| Arc::new(RobotsPolicy::new(client.clone(), &config.robots)));

        let checker = Arc::new(UpdateChecker::from_config(
            client.clone(),
            storage.clone(),
            robots.clone(),
            config,
        ));
        let refresher = Arc::new(FeedRefresher::from_config(
            client,
            storage.clone(),
            robots,
            config,
        ));

        let bus = Arc::new(MemoryBus::new(config.consumer.queue_capacity));
        let scheduler = BatchScheduler::new(
            storage.clone(),
            storage.clone(),
            bus.clone(),
            SchedulerSettings::from_config(config),
        );

        Ok(Self {
            config: config.clone(),
            storage,
            bus,
            checker,
            refresher,
            scheduler,
        })
    }

    /// Handles --check-article
    async fn check_article(&self, article_id: i64) -> Result<()> {
        let article = self
            .storage
            .get_article(article_id)
            .await
            .with_context(|| format!("cannot load article {}", article_id))?;

        let event = ArticleCheckEvent::manual(ArticleCheckCandidate::from(&article));
        let outcome = self
            .checker
            .check(&event)
            .await
            .with_context(|| format!("check of article {} failed", article_id))?;

        println!("Article {} ({}): {}", article_id, article.url, outcome);
        Ok(())
    }

    /// Handles --run-now
    async fn run_once(&self) -> Result<()> {
        let (trigger, shutdown) = shutdown_channel();
        let consumers = spawn_consumers(
            &self.bus,
            self.refresher.clone(),
            self.checker.clone(),
            ConsumerSettings::from(&self.config.consumer),
            shutdown.clone(),
        );

        let refresh = self.scheduler.run_feed_refresh_cycle(&shutdown).await?;
        println!(
            "Feed refresh: {} published, {} failed",
            refresh.succeeded, refresh.failed
        );

        let recheck = self.scheduler.run_article_recheck_cycle(&shutdown).await?;
        println!(
            "Article recheck: {} published, {} failed",
            recheck.published, recheck.failed
        );

        // Redeliveries are queued before a handler finishes, so idle means done.
        self.bus.wait_idle(Duration::from_millis(200)).await;

        trigger.trigger();
        consumers.wait().await;
        Ok(())
    }

    /// Default mode: schedule until Ctrl-C
    async fn run_daemon(&self) -> Result<()> {
        let (trigger, shutdown) = shutdown_channel();
        let consumers = spawn_consumers(
            &self.bus,
            self.refresher.clone(),
            self.checker.clone(),
            ConsumerSettings::from(&self.config.consumer),
            shutdown,
        );

        self.scheduler
            .start()
            .await
            .context("failed to start scheduler")?;

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        tracing::info!("Shutdown requested");

        self.scheduler.stop().await?;
        trigger.trigger();
        consumers.wait().await;

        tracing::info!("Feed-Refresher stopped");
        Ok(())
    }
}
