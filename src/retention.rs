//! Retention sweep for emitted documents.
//!
//! A tokio task wakes on a fixed interval (first sweep immediately), lists
//! the output folder without descending into subfolders and deletes
//! documents whose age in whole days exceeds the threshold. Deleting is
//! best-effort: one file failing never stops the rest of the sweep.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pipeline::{PipelineError, DOCUMENT_EXTENSION};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    /// Only files with this extension (case-insensitive) are considered.
    pub extension: String,
}

impl RetentionPolicy {
    pub fn days(max_age_days: u32) -> Self {
        Self {
            max_age_days,
            extension: DOCUMENT_EXTENSION.to_string(),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension))
    }

    /// Age is truncated to whole days before comparing. Timestamps in the
    /// future never expire.
    pub fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified)
            .map(|age| age.as_secs() / SECS_PER_DAY > u64::from(self.max_age_days))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: u32,
    pub deleted: u32,
    pub failed: u32,
}

/// One pass over `dir` as of `now`.
pub fn sweep_once(
    dir: &Path,
    policy: &RetentionPolicy,
    now: SystemTime,
) -> Result<SweepReport, PipelineError> {
    let entries = std::fs::read_dir(dir).map_err(|source| PipelineError::Listing {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut report = SweepReport::default();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() || !policy.matches(&path) {
            continue;
        }
        report.scanned += 1;

        let Ok(modified) = meta.modified() else { continue };
        if !policy.is_expired(modified, now) {
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                report.deleted += 1;
                tracing::debug!(path = %path.display(), "Expired document deleted");
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(path = %path.display(), error = %e, "Could not delete expired document");
            }
        }
    }

    Ok(report)
}

/// Handle for the periodic sweep task. Dropping it also ends the task.
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Ask the task to stop after the sweep in progress, if any.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop and wait for the task to exit.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Start sweeping `dir` every `interval`. Must be called inside a tokio
/// runtime.
pub fn start_sweeper(dir: PathBuf, policy: RetentionPolicy, interval: Duration) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        tracing::info!(
            dir = %dir.display(),
            max_age_days = policy.max_age_days,
            interval_secs = interval.as_secs(),
            "Retention sweeper started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let (d, p) = (dir.clone(), policy.clone());
                    let outcome =
                        tokio::task::spawn_blocking(move || sweep_once(&d, &p, SystemTime::now())).await;
                    match outcome {
                        Ok(Ok(report)) if report.deleted > 0 || report.failed > 0 => {
                            tracing::info!(
                                deleted = report.deleted,
                                failed = report.failed,
                                scanned = report.scanned,
                                "Retention sweep finished"
                            );
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::warn!(error = %e, "Retention sweep skipped"),
                        Err(e) => tracing::warn!(error = %e, "Retention sweep task failed"),
                    }
                }
            }
        }

        tracing::info!("Retention sweeper shutting down");
    });

    SweeperHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}
