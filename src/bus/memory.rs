//! In-process bus over bounded tokio channels
//!
//! One channel per event kind. Consumer workers share the receiving end,
//! so each event reaches exactly one worker per delivery.

use crate::bus::{ArticleCheckHandler, EventPublisher, FeedRefreshHandler, PublishError};
use crate::config::ConsumerConfig;
use crate::model::{ArticleCheckEvent, FeedRefreshEvent};
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use uuid::Uuid;

const FEED_CHANNEL: &str = "feed-refresh";
const ARTICLE_CHANNEL: &str = "article-check";

/// How long a publish waits for queue space before failing
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded in-memory bus implementing `EventPublisher`
pub struct MemoryBus {
    feed_tx: mpsc::Sender<FeedRefreshEvent>,
    feed_rx: Arc<Mutex<mpsc::Receiver<FeedRefreshEvent>>>,
    article_tx: mpsc::Sender<ArticleCheckEvent>,
    article_rx: Arc<Mutex<mpsc::Receiver<ArticleCheckEvent>>>,
    /// Events taken off a channel whose handler has not returned yet
    in_flight: Arc<AtomicUsize>,
    publish_timeout: Duration,
}

impl MemoryBus {
    /// Creates a bus whose channels each hold up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (feed_tx, feed_rx) = mpsc::channel(capacity.max(1));
        let (article_tx, article_rx) = mpsc::channel(capacity.max(1));
        Self {
            feed_tx,
            feed_rx: Arc::new(Mutex::new(feed_rx)),
            article_tx,
            article_rx: Arc::new(Mutex::new(article_rx)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Sets how long a publish waits for space in a full channel
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Feed-refresh events waiting for a consumer
    pub fn pending_feed_refreshes(&self) -> usize {
        self.feed_tx.max_capacity() - self.feed_tx.capacity()
    }

    /// Article-check events waiting for a consumer
    pub fn pending_article_checks(&self) -> usize {
        self.article_tx.max_capacity() - self.article_tx.capacity()
    }

    /// Events currently being handled by a consumer
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// No event is queued or being handled
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
            && self.pending_feed_refreshes() == 0
            && self.pending_article_checks() == 0
    }

    /// Waits until the bus has been idle for two consecutive polls
    ///
    /// A failed event is re-enqueued before its handler slot is released, so a
    /// redelivery is never missed. The second poll covers the instant between
    /// a worker taking an event and marking it in flight.
    ///
    /// # Arguments
    ///
    /// * `poll` - Interval between idle checks
    pub async fn wait_idle(&self, poll: Duration) {
        let mut idle_polls = 0;
        while idle_polls < 2 {
            if self.is_idle() {
                idle_polls += 1;
            } else {
                idle_polls = 0;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

fn publish_error<T>(channel: &'static str, error: SendTimeoutError<T>, waited: Duration) -> PublishError {
    match error {
        SendTimeoutError::Timeout(_) => PublishError::Timeout { channel, waited },
        SendTimeoutError::Closed(_) => PublishError::Closed { channel },
    }
}

#[async_trait]
impl EventPublisher for MemoryBus {
    async fn publish_feed_refresh(&self, event: FeedRefreshEvent) -> Result<(), PublishError> {
        self.feed_tx
            .send_timeout(event, self.publish_timeout)
            .await
            .map_err(|error| publish_error(FEED_CHANNEL, error, self.publish_timeout))
    }

    async fn publish_article_check(&self, event: ArticleCheckEvent) -> Result<(), PublishError> {
        self.article_tx
            .send_timeout(event, self.publish_timeout)
            .await
            .map_err(|error| publish_error(ARTICLE_CHANNEL, error, self.publish_timeout))
    }
}

/// Consumer pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Workers per channel
    pub workers: usize,
    /// Deliveries of one event before it is dropped
    pub max_deliveries: u32,
}

impl From<&ConsumerConfig> for ConsumerSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            workers: config.workers,
            max_deliveries: config.max_deliveries,
        }
    }
}

/// Running consumer workers
pub struct ConsumerGroup {
    tasks: JoinSet<()>,
}

impl ConsumerGroup {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every worker to exit (after shutdown)
    pub async fn wait(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(error) = result {
                tracing::error!("consumer worker panicked: {}", error);
            }
        }
    }
}

/// Starts `settings.workers` consumers on each channel of `bus`
///
/// Workers exit once `shutdown` fires; an event being handled at that moment
/// is finished first.
pub fn spawn_consumers(
    bus: &MemoryBus,
    feed_handler: Arc<dyn FeedRefreshHandler>,
    article_handler: Arc<dyn ArticleCheckHandler>,
    settings: ConsumerSettings,
    shutdown: ShutdownSignal,
) -> ConsumerGroup {
    let mut tasks = JoinSet::new();
    let workers = settings.workers.max(1);
    let max_deliveries = settings.max_deliveries.max(1);

    for worker in 0..workers {
        tasks.spawn(run_worker(
            worker,
            Arc::clone(&bus.feed_rx),
            bus.feed_tx.clone(),
            Arc::clone(&bus.in_flight),
            Arc::clone(&feed_handler),
            max_deliveries,
            shutdown.clone(),
        ));
        tasks.spawn(run_worker(
            worker,
            Arc::clone(&bus.article_rx),
            bus.article_tx.clone(),
            Arc::clone(&bus.in_flight),
            Arc::clone(&article_handler),
            max_deliveries,
            shutdown.clone(),
        ));
    }

    tracing::info!(
        "started {} consumers per channel (max {} deliveries)",
        workers,
        max_deliveries
    );

    ConsumerGroup { tasks }
}

/// Event kinds carried on the bus
trait BusEvent: Clone + Send + Sync + 'static {
    const CHANNEL: &'static str;

    fn attempt(&self) -> u32;
    fn next_attempt(&self) -> Self;
    fn request_id(&self) -> Uuid;
}

impl BusEvent for FeedRefreshEvent {
    const CHANNEL: &'static str = FEED_CHANNEL;

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn next_attempt(&self) -> Self {
        FeedRefreshEvent::next_attempt(self)
    }

    fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl BusEvent for ArticleCheckEvent {
    const CHANNEL: &'static str = ARTICLE_CHANNEL;

    fn attempt(&self) -> u32 {
        self.attempt
    }

    fn next_attempt(&self) -> Self {
        ArticleCheckEvent::next_attempt(self)
    }

    fn request_id(&self) -> Uuid {
        self.request_id
    }
}

/// Routes an event to its handler trait
#[async_trait]
trait Dispatch<E>: Send + Sync + 'static {
    async fn dispatch(&self, event: &E) -> crate::Result<()>;
}

#[async_trait]
impl Dispatch<FeedRefreshEvent> for Arc<dyn FeedRefreshHandler> {
    async fn dispatch(&self, event: &FeedRefreshEvent) -> crate::Result<()> {
        self.handle_feed_refresh(event).await
    }
}

#[async_trait]
impl Dispatch<ArticleCheckEvent> for Arc<dyn ArticleCheckHandler> {
    async fn dispatch(&self, event: &ArticleCheckEvent) -> crate::Result<()> {
        self.handle_article_check(event).await
    }
}

/// Handles one delivery, re-enqueueing the event if the handler failed
async fn deliver<E, D>(event: &E, requeue: &mpsc::Sender<E>, handler: &D, max_deliveries: u32)
where
    E: BusEvent,
    D: Dispatch<E>,
{
    if handler.dispatch(event).await.is_ok() {
        return;
    }

    if event.attempt() >= max_deliveries {
        tracing::warn!(
            request_id = %event.request_id(),
            "{} event dropped after {} deliveries",
            E::CHANNEL,
            event.attempt()
        );
        return;
    }

    // try_send: a worker blocking on its own full queue would stall the pool
    if requeue.try_send(event.next_attempt()).is_err() {
        tracing::warn!(
            request_id = %event.request_id(),
            "{} queue full, event dropped instead of redelivered",
            E::CHANNEL
        );
    }
}

async fn run_worker<E, D>(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<E>>>,
    requeue: mpsc::Sender<E>,
    in_flight: Arc<AtomicUsize>,
    handler: D,
    max_deliveries: u32,
    shutdown: ShutdownSignal,
) where
    E: BusEvent,
    D: Dispatch<E>,
{
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                event = receiver.recv() => {
                    if event.is_some() {
                        in_flight.fetch_add(1, Ordering::SeqCst);
                    }
                    event
                }
            }
        };
        let Some(event) = next else {
            break;
        };

        deliver(&event, &requeue, &handler, max_deliveries).await;
        in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    tracing::debug!("{} consumer {} stopped", E::CHANNEL, worker);
}
