//! Live watching of the capture folder.
//!
//! Two tokio tasks connected by a bounded channel:
//!
//! ```text
//! DirectoryPoller ──CaptureEvent──▶ PairingConsumer (owns PendingPairStore)
//! ```
//!
//! The poller reports a file once it has been seen with the same size and
//! mtime on two consecutive polls, so captures still being written are not
//! picked up. A file that changes after being reported is reported again.
//! Files already present when watching starts are not reported until they
//! change; run a backfill for those. The consumer is the only owner of the
//! live store.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::pipeline::{
    cleanup_orphaned_temp_files, parse_capture, process_pair_bounded, FailureRecord, PairContext,
    PendingPairStore, PipelineError, ORPHAN_TEMP_MIN_AGE,
};

const EVENT_QUEUE_CAPACITY: usize = 256;
const MAX_RECENT_FAILURES: usize = 50;

/// Notification from the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Created(PathBuf),
}

/// Everything a watch session needs.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    pub operation_timeout: Duration,
}

/// Status returned to the surrounding application.
#[derive(Debug, Clone, Serialize)]
pub struct WatchStatus {
    pub running: bool,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub archive_dir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub pairs_emitted: u64,
    pub pending: usize,
    pub ignored: u64,
    pub malformed: u64,
    pub recent_failures: Vec<FailureRecord>,
}

#[derive(Debug, Default)]
struct WatchStats {
    pairs_emitted: u64,
    pending: usize,
    ignored: u64,
    malformed: u64,
    recent_failures: VecDeque<FailureRecord>,
}

impl WatchStats {
    fn push_failure(&mut self, record: FailureRecord) {
        if self.recent_failures.len() == MAX_RECENT_FAILURES {
            self.recent_failures.pop_front();
        }
        self.recent_failures.push_back(record);
    }
}

type SharedStats = Arc<Mutex<WatchStats>>;

fn with_stats(stats: &SharedStats, f: impl FnOnce(&mut WatchStats)) {
    match stats.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

// ---------------------------------------------------------------------------
// Event source
// ---------------------------------------------------------------------------

/// Size and modification time of a file at one poll.
type Stamp = (u64, Option<SystemTime>);

#[derive(Debug, Clone, Copy)]
struct Observed {
    stamp: Stamp,
    reported: bool,
}

/// Polling event source for one directory (non-recursive).
#[derive(Debug)]
pub struct DirectoryPoller {
    dir: PathBuf,
    interval: Duration,
    observed: HashMap<PathBuf, Observed>,
}

impl DirectoryPoller {
    /// Snapshot `dir` now; everything in it counts as already reported.
    pub async fn new(dir: PathBuf, interval: Duration) -> Self {
        let observed = list_stamps(&dir)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|(path, stamp)| {
                (
                    path,
                    Observed {
                        stamp,
                        reported: true,
                    },
                )
            })
            .collect();
        Self {
            dir,
            interval,
            observed,
        }
    }

    /// Compare the directory against the previous poll and return newly
    /// settled files, sorted by path. A reported file that changes is
    /// reported again once it settles.
    async fn poll(&mut self) -> Result<Vec<PathBuf>, std::io::Error> {
        let current = list_stamps(&self.dir).await?;
        let present: HashSet<&PathBuf> = current.iter().map(|(p, _)| p).collect();
        self.observed.retain(|path, _| present.contains(path));

        let mut created = Vec::new();
        for (path, stamp) in current {
            match self.observed.entry(path) {
                Entry::Vacant(slot) => {
                    slot.insert(Observed {
                        stamp,
                        reported: false,
                    });
                }
                Entry::Occupied(mut slot) => {
                    let seen = slot.get_mut();
                    if seen.stamp != stamp {
                        seen.stamp = stamp;
                        seen.reported = false;
                    } else if !seen.reported {
                        seen.reported = true;
                        created.push(slot.key().clone());
                    }
                }
            }
        }
        created.sort();
        Ok(created)
    }

    /// Poll until `shutdown` fires or the consumer goes away.
    pub async fn run(mut self, events: mpsc::Sender<CaptureEvent>, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut listing_failed = false;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let created = match self.poll().await {
                        Ok(created) => {
                            listing_failed = false;
                            created
                        }
                        Err(e) => {
                            if !listing_failed {
                                tracing::warn!(dir = %self.dir.display(), error = %e, "Cannot list watched folder");
                                listing_failed = true;
                            }
                            continue;
                        }
                    };
                    for path in created {
                        if events.send(CaptureEvent::Created(path)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
        tracing::debug!(dir = %self.dir.display(), "Directory poller stopped");
    }
}

async fn list_stamps(dir: &Path) -> Result<Vec<(PathBuf, Stamp)>, std::io::Error> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(meta) = entry.metadata().await else { continue };
        if meta.is_file() {
            files.push((entry.path(), (meta.len(), meta.modified().ok())));
        }
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Single consumer of [`CaptureEvent`]s. Owns the live pending store.
pub struct PairingConsumer {
    store: PendingPairStore,
    ctx: Arc<PairContext>,
    limit: Duration,
    stats: SharedStats,
}

impl PairingConsumer {
    fn new(ctx: Arc<PairContext>, limit: Duration, stats: SharedStats) -> Self {
        Self {
            store: PendingPairStore::new(),
            ctx,
            limit,
            stats,
        }
    }

    /// Drain events until every sender is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<CaptureEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                CaptureEvent::Created(path) => self.on_created(path).await,
            }
        }
        if !self.store.is_empty() {
            tracing::info!(pending = self.store.len(), "Watch stopped with unmatched captures");
        }
    }

    async fn on_created(&mut self, path: PathBuf) {
        let capture = match parse_capture(&path) {
            Ok(Some(capture)) => capture,
            Ok(None) => {
                tracing::trace!(path = %path.display(), "Not a capture, ignored");
                with_stats(&self.stats, |s| s.ignored += 1);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping capture");
                with_stats(&self.stats, |s| s.malformed += 1);
                return;
            }
        };

        let recorded = self.store.record(&capture);
        if let Some(replaced) = &recorded.replaced {
            tracing::warn!(
                key = %capture.key,
                side = %capture.side,
                kept = %capture.path.display(),
                dropped = %replaced.display(),
                "Same side arrived twice, keeping last"
            );
        }

        if recorded.complete {
            if let Some(pair) = self.store.ready(&capture.key) {
                match process_pair_bounded(self.ctx.clone(), pair, self.limit).await {
                    Ok(_) => {
                        self.store.settle(&capture.key);
                        with_stats(&self.stats, |s| s.pairs_emitted += 1);
                    }
                    Err(failure) => {
                        tracing::error!(error = %failure, "Pair failed");
                        if failure.document_emitted() {
                            self.store.settle(&capture.key);
                        }
                        let record = FailureRecord::from(&failure);
                        with_stats(&self.stats, |s| s.push_failure(record));
                    }
                }
            }
        } else {
            tracing::debug!(key = %capture.key, side = %capture.side, "Waiting for other side");
        }

        let pending = self.store.len();
        with_stats(&self.stats, |s| s.pending = pending);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A running watch: poller task + consumer task.
pub struct WatchSession {
    settings: WatchSettings,
    started_at: DateTime<Utc>,
    stats: SharedStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    poller: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl WatchSession {
    /// Start watching with the PDF assembler. Must be called inside a tokio
    /// runtime.
    pub async fn start(settings: WatchSettings) -> Result<Self, PipelineError> {
        let ctx = PairContext::new(settings.output_dir.clone(), settings.archive_dir.clone());
        Self::start_with(settings, ctx).await
    }

    pub async fn start_with(settings: WatchSettings, ctx: PairContext) -> Result<Self, PipelineError> {
        let input_is_dir = tokio::fs::metadata(&settings.input_dir)
            .await
            .is_ok_and(|m| m.is_dir());
        if !input_is_dir {
            return Err(PipelineError::Listing {
                path: settings.input_dir.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }
        tokio::fs::create_dir_all(&settings.output_dir).await?;

        let output_dir = settings.output_dir.clone();
        tokio::task::spawn_blocking(move || {
            cleanup_orphaned_temp_files(&output_dir, ORPHAN_TEMP_MIN_AGE)
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))?;

        let stats = SharedStats::default();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let poller = DirectoryPoller::new(settings.input_dir.clone(), settings.poll_interval).await;
        let consumer = PairingConsumer::new(Arc::new(ctx), settings.operation_timeout, stats.clone());

        let poller = tokio::spawn(poller.run(event_tx, shutdown_rx));
        let consumer = tokio::spawn(consumer.run(event_rx));

        tracing::info!(
            input = %settings.input_dir.display(),
            output = %settings.output_dir.display(),
            archive = ?settings.archive_dir,
            "Watching started"
        );

        Ok(Self {
            settings,
            started_at: Utc::now(),
            stats,
            shutdown_tx: Some(shutdown_tx),
            poller: Some(poller),
            consumer: Some(consumer),
        })
    }

    pub fn is_running(&self) -> bool {
        self.consumer.as_ref().is_some_and(|c| !c.is_finished())
    }

    pub fn status(&self) -> WatchStatus {
        let mut status = WatchStatus {
            running: self.is_running(),
            input_dir: self.settings.input_dir.clone(),
            output_dir: self.settings.output_dir.clone(),
            archive_dir: self.settings.archive_dir.clone(),
            started_at: self.started_at,
            pairs_emitted: 0,
            pending: 0,
            ignored: 0,
            malformed: 0,
            recent_failures: Vec::new(),
        };
        with_stats(&self.stats, |s| {
            status.pairs_emitted = s.pairs_emitted;
            status.pending = s.pending;
            status.ignored = s.ignored;
            status.malformed = s.malformed;
            status.recent_failures = s.recent_failures.iter().cloned().collect();
        });
        status
    }

    /// Stop polling, let the consumer finish queued events, and wait for
    /// both tasks. Unmatched captures are dropped with the store.
    pub async fn stop(mut self) -> WatchStatus {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(poller) = self.poller.take() {
            let _ = poller.await;
        }
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.await;
        }
        tracing::info!(input = %self.settings.input_dir.display(), "Watching stopped");
        self.status()
    }
}
