//! Batch scheduler
//!
//! Turns two cron triggers into bursts of published work:
//! - Feed refresh: every feed, fanned out in batches under a concurrency cap
//! - Article recheck: cursor-paged candidates inside the recheck window
//!
//! The scheduler never checks articles itself. It only publishes events for
//! whatever consumers are attached to the bus.

mod batch;
mod recheck;

pub use batch::{create_batches, process_batch, BatchReport, RefreshCycleReport};
pub use recheck::{
    check_window, clamp_page_size, RecheckCycleReport, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

use crate::bus::EventPublisher;
use crate::config::Config;
use crate::shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
use crate::storage::{CandidateLister, FeedLister, StorageError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Errors from scheduler lifecycle and cycles
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("cron scheduler error: {0}")]
    Cron(String),

    #[error("listing failed: {0}")]
    Storage(#[from] StorageError),
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(error: JobSchedulerError) -> Self {
        Self::Cron(error.to_string())
    }
}

/// Scheduler tuning, usually taken from `[scheduler]` and `[recheck]`
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub feed_refresh_cron: String,
    pub article_recheck_cron: String,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_concurrent_batches: usize,
    pub shutdown_grace: Duration,
    pub recheck_window: chrono::Duration,
    pub min_recheck_gap: chrono::Duration,
    pub page_size: usize,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            feed_refresh_cron: config.scheduler.feed_refresh_cron.clone(),
            article_recheck_cron: config.scheduler.article_recheck_cron.clone(),
            batch_size: config.scheduler.batch_size,
            batch_delay: config.scheduler.batch_delay(),
            max_concurrent_batches: config.scheduler.max_concurrent_batches,
            shutdown_grace: config.scheduler.shutdown_grace(),
            recheck_window: config.recheck.window(),
            min_recheck_gap: config.recheck.min_gap(),
            page_size: config.recheck.page_size,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let scheduler = crate::config::SchedulerConfig::default();
        let recheck = crate::config::RecheckConfig::default();
        Self {
            feed_refresh_cron: scheduler.feed_refresh_cron.clone(),
            article_recheck_cron: scheduler.article_recheck_cron.clone(),
            batch_size: scheduler.batch_size,
            batch_delay: scheduler.batch_delay(),
            max_concurrent_batches: scheduler.max_concurrent_batches,
            shutdown_grace: scheduler.shutdown_grace(),
            recheck_window: recheck.window(),
            min_recheck_gap: recheck.min_gap(),
            page_size: recheck.page_size,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cycle {
    FeedRefresh,
    ArticleRecheck,
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FeedRefresh => f.write_str("feed refresh"),
            Self::ArticleRecheck => f.write_str("article recheck"),
        }
    }
}

/// Collaborators shared with cron jobs
struct SchedulerCore {
    feeds: Arc<dyn FeedLister>,
    candidates: Arc<dyn CandidateLister>,
    publisher: Arc<dyn EventPublisher>,
    settings: SchedulerSettings,
}

impl SchedulerCore {
    async fn run(&self, cycle: Cycle, shutdown: &ShutdownSignal) -> Result<(), SchedulerError> {
        match cycle {
            Cycle::FeedRefresh => {
                batch::feed_refresh_cycle(
                    self.feeds.as_ref(),
                    &self.publisher,
                    &self.settings,
                    shutdown,
                )
                .await?;
            }
            Cycle::ArticleRecheck => {
                recheck::article_recheck_cycle(
                    self.candidates.as_ref(),
                    self.publisher.as_ref(),
                    &self.settings,
                    Utc::now(),
                    shutdown,
                )
                .await?;
            }
        }
        Ok(())
    }
}

/// State present only while started
struct Running {
    cron: JobScheduler,
    trigger: ShutdownTrigger,
    /// One single-permit semaphore per cycle; held while that cycle runs
    in_flight: Vec<Arc<Semaphore>>,
}

/// Cron-driven publisher of feed-refresh and article-check events
pub struct BatchScheduler {
    core: Arc<SchedulerCore>,
    state: RwLock<Option<Running>>,
}

impl BatchScheduler {
    /// Creates a stopped scheduler
    ///
    /// # Arguments
    ///
    /// * `feeds` - Source of all subscribed feeds
    /// * `candidates` - Pages of articles due for a recheck
    /// * `publisher` - Bus receiving the generated events
    /// * `settings` - Cron expressions, batch sizing and recheck window
    pub fn new(
        feeds: Arc<dyn FeedLister>,
        candidates: Arc<dyn CandidateLister>,
        publisher: Arc<dyn EventPublisher>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                feeds,
                candidates,
                publisher,
                settings,
            }),
            state: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.core.settings
    }

    /// Lists all feeds and publishes a refresh event for each
    pub async fn run_feed_refresh_cycle(
        &self,
        shutdown: &ShutdownSignal,
    ) -> Result<RefreshCycleReport, SchedulerError> {
        batch::feed_refresh_cycle(
            self.core.feeds.as_ref(),
            &self.core.publisher,
            &self.core.settings,
            shutdown,
        )
        .await
    }

    /// Pages through due articles and publishes a check event for each
    pub async fn run_article_recheck_cycle(
        &self,
        shutdown: &ShutdownSignal,
    ) -> Result<RecheckCycleReport, SchedulerError> {
        self.run_article_recheck_cycle_at(Utc::now(), shutdown).await
    }

    /// Recheck cycle with an explicit clock reading
    pub async fn run_article_recheck_cycle_at(
        &self,
        now: DateTime<Utc>,
        shutdown: &ShutdownSignal,
    ) -> Result<RecheckCycleReport, SchedulerError> {
        recheck::article_recheck_cycle(
            self.core.candidates.as_ref(),
            self.core.publisher.as_ref(),
            &self.core.settings,
            now,
            shutdown,
        )
        .await
    }

    /// Registers both cron jobs and starts firing them
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Both jobs are registered and the cron scheduler is running
    /// * `Err(SchedulerError)` - `AlreadyRunning` if called twice without
    ///   `stop`, or the cron scheduler rejected a job
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.write().await;
        if state.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (trigger, shutdown) = shutdown_channel();
        let settings = &self.core.settings;
        let jobs = [
            (Cycle::FeedRefresh, settings.feed_refresh_cron.as_str()),
            (Cycle::ArticleRecheck, settings.article_recheck_cron.as_str()),
        ];

        let cron = JobScheduler::new().await?;
        let mut in_flight = Vec::with_capacity(jobs.len());
        for (cycle, expression) in jobs {
            let guard = Arc::new(Semaphore::new(1));
            let job = self.cycle_job(cycle, expression, shutdown.clone(), Arc::clone(&guard))?;
            cron.add(job).await?;
            in_flight.push(guard);
        }
        cron.start().await?;

        tracing::info!(
            "scheduler started (feed refresh '{}', article recheck '{}')",
            settings.feed_refresh_cron,
            settings.article_recheck_cron
        );

        *state = Some(Running {
            cron,
            trigger,
            in_flight,
        });
        Ok(())
    }

    fn cycle_job(
        &self,
        cycle: Cycle,
        expression: &str,
        shutdown: ShutdownSignal,
        guard: Arc<Semaphore>,
    ) -> Result<Job, SchedulerError> {
        let core = Arc::clone(&self.core);

        Job::new_async(expression, move |_id, _scheduler| {
            let core = Arc::clone(&core);
            let shutdown = shutdown.clone();
            let guard = Arc::clone(&guard);
            Box::pin(async move {
                if shutdown.is_cancelled() {
                    return;
                }
                let Ok(_permit) = guard.try_acquire_owned() else {
                    tracing::warn!("{} cycle still running, skipping this firing", cycle);
                    return;
                };
                if let Err(error) = core.run(cycle, &shutdown).await {
                    tracing::error!("{} cycle failed: {}", cycle, error);
                }
            })
        })
        .map_err(|error| SchedulerError::InvalidCron {
            expression: expression.to_string(),
            message: error.to_string(),
        })
    }

    /// Stops firing, cancels running cycles and waits up to the grace period
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let running = self
            .state
            .write()
            .await
            .take()
            .ok_or(SchedulerError::NotRunning)?;

        running.trigger.trigger();

        let mut cron = running.cron;
        if let Err(error) = cron.shutdown().await {
            tracing::warn!("cron scheduler did not shut down cleanly: {}", error);
        }

        let grace = self.core.settings.shutdown_grace;
        let in_flight = running.in_flight;
        let drained = tokio::time::timeout(grace, async {
            for guard in &in_flight {
                let _ = guard.acquire().await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::info!("scheduler stopped"),
            Err(_) => tracing::warn!(
                "scheduler stopped with cycles still running after {:?}",
                grace
            ),
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.is_some()
    }
}
