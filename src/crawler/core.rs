//! The core Crawler implementation.
//!
//! This module defines the `Crawler` struct, which owns every stage of a
//! crawl and drives it from start to quiescence. Requests flow
//!
//! ```text
//! admit ─▶ fetch queue ─▶ download ─▶ response queue ─▶ parser ─▶ admit / sink
//!              ▲              │
//!              └── retry ─────┘
//! ```
//!
//! A single dispatch loop reads both stage queues, taking work only when the
//! stage has a free slot, and spawns a task per job. A download gives up its
//! network slot as soon as the fetch ends, but stays within the download
//! budget until its response is handed to the next stage, so a backed-up
//! parser stage stops new downloads from starting. Two idle monitors watch
//! the crawl: the engine monitor ends the crawl once every stage has been idle
//! for `max_idle` heartbeats, and the output monitor closes the item sink
//! once the engine is done and the sink has been drained.

use crate::bloom_filter::BloomFilter;
use crate::builder::CrawlerConfig;
use crate::concurrency::{Job, StageSlots};
use crate::crawler::item_sink::{ItemSink, WeakItemSink};
use crate::crawler::monitor::IdleMonitor;
use crate::crawler::request_handler::{build_client, Downloader, FetchResult};
use crate::crawler::response_parser::dispatch_response;
use crate::error::SpiderError;
use crate::queue::{stage_queue, StageQueue};
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::Scheduler;
use crate::spider::CrawlContext;
use crate::stats::CrawlStats;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// The central orchestrator of a crawl.
pub struct Crawler<I> {
    config: CrawlerConfig,
    scheduler: Arc<Scheduler<I>>,
    downloader: Arc<Downloader>,
    sink: ItemSink<I>,
    stats: Arc<CrawlStats>,
    fetch_queue: StageQueue<Request<I>>,
    fetch_rx: Receiver<Request<I>>,
    response_queue: StageQueue<Response<I>>,
    response_rx: Receiver<Response<I>>,
    shutdown: CancellationToken,
}

impl<I: Send + 'static> Crawler<I> {
    /// Assembles the stages from a validated configuration.
    pub(crate) fn new(config: CrawlerConfig, http_client: Option<reqwest::Client>) -> Result<Self, SpiderError> {
        let stats = Arc::new(CrawlStats::new());

        trace!(
            "Creating stage queues: fetch={}, response={}, pending pushes={}",
            config.fetch_queue_capacity,
            config.response_queue_capacity,
            config.max_pending_pushes
        );
        let (fetch_queue, fetch_rx) =
            stage_queue("fetch", config.fetch_queue_capacity, config.max_pending_pushes);
        let (response_queue, response_rx) =
            stage_queue("response", config.response_queue_capacity, config.max_pending_pushes);

        let filter = BloomFilter::with_estimates(config.expected_requests, config.false_positive_rate);
        debug!(
            "Dedup filter: {} bits, {} hashes",
            filter.num_bits(),
            filter.num_hashes()
        );
        let scheduler = Arc::new(Scheduler::new(
            filter,
            config.allowed_domains.clone(),
            config.request_delay,
            fetch_queue.clone(),
            Arc::clone(&stats.scheduler),
        ));

        let client = match http_client {
            Some(client) => client,
            None => build_client(config.connect_timeout, config.read_write_timeout)?,
        };
        let downloader = Arc::new(Downloader::new(
            client,
            config.retry_statuses.iter().copied(),
            config.max_retry,
            Arc::clone(&stats),
        ));

        let sink = ItemSink::new(config.item_queue_capacity, config.max_pending_pushes);

        Ok(Crawler {
            config,
            scheduler,
            downloader,
            sink,
            stats,
            fetch_queue,
            fetch_rx,
            response_queue,
            response_rx,
            shutdown: CancellationToken::new(),
        })
    }

    /// A handle for seeding the crawl and draining its output.
    pub fn context(&self) -> CrawlContext<I> {
        CrawlContext::new(Arc::clone(&self.scheduler), self.sink.clone())
    }

    /// Token that ends the crawl when cancelled. Work already running is
    /// allowed to finish.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns the statistics shared with the running crawl.
    pub fn stats(&self) -> Arc<CrawlStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Runs the crawl until it goes quiet or the shutdown token is cancelled,
    /// then prints the summary and returns the final statistics.
    ///
    /// This returns as soon as the engine is quiet; it does not wait for the
    /// output. The sink stays open until it has been drained, then a
    /// background monitor closes it and every `drain()` stream ends. If all
    /// handles to the sink are dropped instead, the monitor exits without
    /// closing anything.
    pub async fn start_crawl(self) -> Result<Arc<CrawlStats>, SpiderError> {
        info!(
            "Crawler starting: max_concurrent_downloads={}, max_concurrent_parsers={}, max_retry={}",
            self.config.max_concurrent_downloads, self.config.max_concurrent_parsers, self.config.max_retry
        );

        let Crawler {
            config,
            scheduler,
            downloader,
            sink,
            stats,
            fetch_queue,
            fetch_rx,
            response_queue,
            response_rx,
            shutdown,
        } = self;

        let engine_done = CancellationToken::new();

        trace!("Spawning output monitor");
        tokio::spawn(watch_output(
            IdleMonitor::new("output", config.max_idle, config.heartbeat),
            sink.downgrade(),
            engine_done.clone(),
        ));

        trace!("Spawning dispatch loop");
        let dispatcher = Dispatcher {
            downloader,
            ctx: CrawlContext::new(Arc::clone(&scheduler), sink),
            stats: Arc::clone(&stats),
            fetch_queue: fetch_queue.clone(),
            response_queue: response_queue.clone(),
            download_budget: StageSlots::new(
                "download",
                config.max_concurrent_downloads.saturating_add(config.max_pending_pushes),
            ),
            download_slots: StageSlots::new("network", config.max_concurrent_downloads),
            parse_slots: StageSlots::new("parse", config.max_concurrent_parsers),
            shutdown: shutdown.clone(),
        };
        let dispatch_task = tokio::spawn(dispatcher.run(fetch_rx, response_rx));

        let engine_monitor = IdleMonitor::new("engine", config.max_idle, config.heartbeat);
        let probe = || stats.stages_idle() && fetch_queue.is_idle() && response_queue.is_idle();
        if engine_monitor.wait(probe, probe, shutdown.cancelled()).await {
            info!("Crawl has become idle, initiating shutdown.");
        } else {
            info!("Shutdown requested, stopping the crawl.");
        }
        shutdown.cancel();

        let joined = dispatch_task.await;
        engine_done.cancel();
        if let Err(e) = joined {
            error!("Dispatch loop failed: {}", e);
            return Err(SpiderError::GeneralError(format!("dispatch loop failed: {}", e)));
        }

        println!("{}", stats);
        info!(
            "Crawl finished. called={}, intercepted={}, accepted={}, failed={}, completed={}",
            stats.called(),
            stats.intercepted(),
            stats.accepted(),
            stats.failed(),
            stats.completed()
        );
        Ok(stats)
    }
}

impl<I> fmt::Debug for Crawler<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crawler")
            .field("config", &self.config)
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

/// Everything the dispatch loop hands to the tasks it spawns.
struct Dispatcher<I> {
    downloader: Arc<Downloader>,
    ctx: CrawlContext<I>,
    stats: Arc<CrawlStats>,
    fetch_queue: StageQueue<Request<I>>,
    response_queue: StageQueue<Response<I>>,
    /// Downloads taken off the fetch queue, running or waiting to hand over.
    download_budget: StageSlots,
    /// Requests on the network at once.
    download_slots: StageSlots,
    parse_slots: StageSlots,
    shutdown: CancellationToken,
}

impl<I: Send + 'static> Dispatcher<I> {
    async fn run(self, mut fetch_rx: Receiver<Request<I>>, mut response_rx: Receiver<Response<I>>) {
        let mut tasks = JoinSet::new();
        trace!("Dispatch loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(job) = self.download_budget.next_job(&mut fetch_rx, &self.stats.downloader) => {
                    self.spawn_download(&mut tasks, job);
                }
                Some(job) = self.parse_slots.next_job(&mut response_rx, &self.stats.dispatcher) => {
                    self.spawn_dispatch(&mut tasks, job);
                }
                Some(result) = tasks.join_next() => log_task_result(result),
            }
        }

        // Close both queues first so that no running task can wait on them.
        drop(fetch_rx);
        drop(response_rx);

        trace!("Waiting for {} running tasks", tasks.len());
        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }
        trace!("Dispatch loop finished");
    }

    fn spawn_download(&self, tasks: &mut JoinSet<()>, job: Job<Request<I>>) {
        let Job { item: request, slot: budget, guard } = job;
        let downloader = Arc::clone(&self.downloader);
        let slots = self.download_slots.clone();
        let fetch_queue = self.fetch_queue.clone();
        let response_queue = self.response_queue.clone();

        tasks.spawn(async move {
            let Some(slot) = slots.acquire().await else {
                warn!("Download slots are closed; dropping {}", request.url());
                return;
            };
            let outcome = downloader.fetch(request).await;
            // The slot bounds network work only; pushing the result may wait.
            drop(slot);

            let pushed = match outcome {
                FetchResult::Delivered(response) => response_queue.push(response).await,
                FetchResult::Retry(request) => {
                    // This stage is the fetch queue's only reader.
                    drop(budget);
                    fetch_queue.push(request).await
                }
                FetchResult::Failed => Ok(()),
            };
            if let Err(e) = pushed {
                warn!("Dropping download result: {}", e);
            }
            drop(guard);
        });
    }

    fn spawn_dispatch(&self, tasks: &mut JoinSet<()>, job: Job<Response<I>>) {
        let Job { item: response, slot, guard } = job;
        let ctx = self.ctx.clone();
        let counters = Arc::clone(&self.stats.dispatcher);

        tasks.spawn(async move {
            dispatch_response(response, ctx, &counters).await;
            drop(slot);
            drop(guard);
        });
    }
}

/// Closes the sink once the engine is done and the sink has stayed empty for
/// the idle threshold. Returns whether the sink was closed, or `false` if
/// every handle to it was dropped first.
async fn watch_output<I: Send + 'static>(
    monitor: IdleMonitor,
    sink: WeakItemSink<I>,
    engine_done: CancellationToken,
) -> bool {
    monitor
        .wait(
            || engine_done.is_cancelled() && sink.upgrade().map_or(true, |sink| sink.is_empty()),
            || sink.upgrade().map_or(true, |sink| sink.close_if_idle()),
            std::future::pending::<()>(),
        )
        .await;

    match sink.upgrade() {
        Some(sink) if sink.is_closed() => {
            info!("Output sink drained and closed");
            true
        }
        _ => {
            debug!("Output sink abandoned before it was drained");
            false
        }
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!("A crawl task panicked: {}", e),
        Err(e) => debug!("A crawl task was cancelled: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn monitor() -> IdleMonitor {
        IdleMonitor::new("output", 2, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn output_monitor_closes_a_drained_sink() {
        let sink = ItemSink::new(4, 4);
        sink.push(1u8).await;
        let engine_done = CancellationToken::new();
        let watcher = tokio::spawn(watch_output(monitor(), sink.downgrade(), engine_done.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!sink.is_closed(), "engine still running");

        engine_done.cancel();
        let drained = tokio::spawn(sink.drain().collect::<Vec<u8>>());
        let closed = tokio::time::timeout(Duration::from_secs(1), watcher).await.unwrap().unwrap();
        assert!(closed);
        assert!(sink.is_closed());
        assert_eq!(drained.await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn output_monitor_exits_once_the_sink_is_abandoned() {
        let sink = ItemSink::new(4, 4);
        sink.push(1u8).await;
        let engine_done = CancellationToken::new();
        engine_done.cancel();
        let watcher = tokio::spawn(watch_output(monitor(), sink.downgrade(), engine_done));

        drop(sink);
        let closed = tokio::time::timeout(Duration::from_secs(1), watcher).await.unwrap().unwrap();
        assert!(!closed);
    }
}
