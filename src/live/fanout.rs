//! Live publish fan-out
//!
//! Every destination gets its own worker task and its own bounded queue.
//! `append_sample` never waits: when a destination falls behind its queue
//! fills and further samples for that destination are dropped, leaving the
//! others untouched. A destination that fails to connect or publish shuts
//! its worker down without affecting anything else.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

use super::destination::{DestinationConnector, LiveDestination};
use crate::recorder::settings::{LiveDestinationSettings, RenderSettings};
use crate::sink::sample::MediaSample;

/// Samples buffered per destination before dropping
pub const DESTINATION_QUEUE_CAPACITY: usize = 120;

/// How long `stop_streaming` waits for all workers before aborting the rest
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-destination delivery counters
#[derive(Debug, Default)]
struct DestinationStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    connected: AtomicBool,
}

/// Snapshot of one destination's delivery counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationReport {
    pub publish_url: String,
    pub connected: bool,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

struct Worker {
    sender: mpsc::Sender<MediaSample>,
    stats: Arc<DestinationStats>,
    handle: JoinHandle<()>,
}

pub struct LiveFanout {
    settings: Arc<RenderSettings>,
    connector: Arc<dyn DestinationConnector>,
    is_streaming: AtomicBool,
    workers: Mutex<Vec<Worker>>,
    reports: Mutex<Vec<(String, Arc<DestinationStats>)>>,
}

impl LiveFanout {
    pub fn new(settings: Arc<RenderSettings>, connector: Arc<dyn DestinationConnector>) -> Self {
        Self {
            settings,
            connector,
            is_streaming: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming.load(Ordering::SeqCst)
    }

    /// Connect every configured destination and begin publishing
    ///
    /// Only the first call has any effect.
    pub fn start_streaming(&self) {
        if self
            .is_streaming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let mut workers = self.workers.lock();
        let mut reports = self.reports.lock();
        for destination in &self.settings.livestreams {
            let (sender, receiver) = mpsc::channel(DESTINATION_QUEUE_CAPACITY);
            let stats = Arc::new(DestinationStats::default());
            let handle = tokio::spawn(run_destination(
                self.connector.clone(),
                destination.clone(),
                self.settings.clone(),
                receiver,
                stats.clone(),
            ));
            reports.push((destination.publish_url(), stats.clone()));
            workers.push(Worker {
                sender,
                stats,
                handle,
            });
        }

        if !workers.is_empty() {
            tracing::info!("Live streaming to {} destination(s)", workers.len());
        }
    }

    /// Forward a sample to every destination; no-op unless streaming
    pub fn append_sample(&self, sample: &MediaSample) {
        if !self.is_streaming() {
            return;
        }
        for worker in self.workers.lock().iter() {
            if worker.sender.try_send(sample.clone()).is_err() {
                worker.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Close every destination and wait for the workers to exit
    ///
    /// Workers still running after [`STOP_TIMEOUT`] are aborted. Safe to call
    /// any number of times, including before `start_streaming`.
    pub async fn stop_streaming(&self) {
        if !self.is_streaming.swap(false, Ordering::SeqCst) {
            return;
        }
        let workers: Vec<Worker> = std::mem::take(&mut *self.workers.lock());
        // Dropping the senders lets every worker drain and close
        let handles: Vec<JoinHandle<()>> = workers.into_iter().map(|w| w.handle).collect();

        let deadline = Instant::now() + STOP_TIMEOUT;
        let mut aborted = 0;
        for mut handle in handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Live destination worker panicked: {}", e),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            tracing::warn!("Aborted {} live destination(s) that did not close in time", aborted);
        }
        tracing::debug!("Live streaming stopped");
    }

    /// Delivery counters for every destination started so far
    pub fn reports(&self) -> Vec<DestinationReport> {
        self.reports
            .lock()
            .iter()
            .map(|(publish_url, stats)| DestinationReport {
                publish_url: publish_url.clone(),
                connected: stats.connected.load(Ordering::Relaxed),
                delivered: stats.delivered.load(Ordering::Relaxed),
                failed: stats.failed.load(Ordering::Relaxed),
                dropped: stats.dropped.load(Ordering::Relaxed),
            })
            .collect()
    }
}

async fn run_destination(
    connector: Arc<dyn DestinationConnector>,
    destination: LiveDestinationSettings,
    settings: Arc<RenderSettings>,
    mut receiver: mpsc::Receiver<MediaSample>,
    stats: Arc<DestinationStats>,
) {
    let url = destination.publish_url();
    let mut stream: Box<dyn LiveDestination> = match connector.connect(&destination, &settings).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("Live destination {} unavailable: {}", url, e);
            return;
        }
    };
    if let Err(e) = stream.publish(&destination.stream_key).await {
        tracing::error!("Failed to publish to {}: {}", url, e);
        let _ = stream.close().await;
        return;
    }
    stats.connected.store(true, Ordering::Relaxed);
    tracing::info!("Publishing to {}", url);

    while let Some(sample) = receiver.recv().await {
        match stream.append(&sample).await {
            Ok(()) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let failures = stats.failed.fetch_add(1, Ordering::Relaxed) + 1;
                if failures == 1 {
                    tracing::warn!("Live destination {} rejected a sample: {}", url, e);
                } else {
                    tracing::trace!("Live destination {} rejected a sample: {}", url, e);
                }
            }
        }
    }

    if let Err(e) = stream.close().await {
        tracing::warn!("Failed to close live destination {}: {}", url, e);
    }
    tracing::debug!(
        "Live destination {} closed ({} delivered)",
        url,
        stats.delivered.load(Ordering::Relaxed)
    );
}
