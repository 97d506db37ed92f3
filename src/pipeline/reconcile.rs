//! Backfill: one pass over the files already sitting in the input folder.
//!
//! The snapshot is buffered into its own [`PendingPairStore`], so a backfill
//! can run while live watching is active without sharing state. Only keys
//! with both sides in the snapshot are emitted; singletons stay where they
//! are and are not reported.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::naming::parse_capture;
use super::pending::PendingPairStore;
use super::processor::{process_pair_bounded, FailureRecord, PairContext};
use super::PipelineError;

/// Result of one backfill run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    /// Pairs whose document was written and whose post-processing succeeded.
    pub pairs_processed: u32,
    pub documents: Vec<PathBuf>,
    /// Capture-shaped names rejected for a malformed date.
    pub malformed: Vec<String>,
    pub failures: Vec<FailureRecord>,
}

/// Regular files directly inside `dir`, sorted by name.
async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let listing_err = |source| PipelineError::Listing {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(listing_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(listing_err)? {
        match entry.file_type().await {
            Ok(ft) if ft.is_file() => files.push(entry.path()),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Pair every complete study found in `input_dir` and process it.
///
/// Under [`PostAction::LeaveInPlace`](super::PostAction::LeaveInPlace) the
/// sources remain, so running this twice emits (and overwrites) the same
/// documents again.
pub async fn backfill(
    input_dir: &Path,
    ctx: Arc<PairContext>,
    limit: Duration,
) -> Result<BackfillReport, PipelineError> {
    let files = list_files(input_dir).await?;
    let mut store = PendingPairStore::new();
    let mut report = BackfillReport::default();

    for path in &files {
        match parse_capture(path) {
            Ok(Some(capture)) => {
                let recorded = store.record(&capture);
                if let Some(replaced) = recorded.replaced {
                    tracing::warn!(
                        key = %capture.key,
                        side = %capture.side,
                        kept = %capture.path.display(),
                        dropped = %replaced.display(),
                        "Duplicate side in snapshot, keeping last"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Skipping capture");
                report.malformed.push(e.file);
            }
        }
    }

    let keys = store.complete_keys();
    tracing::info!(
        input = %input_dir.display(),
        files = files.len(),
        complete = keys.len(),
        incomplete = store.len() - keys.len(),
        "Backfill snapshot taken"
    );

    for key in keys {
        let Some(pair) = store.ready(&key) else {
            continue;
        };
        match process_pair_bounded(ctx.clone(), pair, limit).await {
            Ok(done) => {
                store.settle(&key);
                report.pairs_processed += 1;
                report.documents.push(done.document);
            }
            Err(failure) => {
                tracing::error!(error = %failure, "Backfill pair failed");
                if failure.document_emitted() {
                    store.settle(&key);
                }
                report.failures.push(FailureRecord::from(&failure));
            }
        }
    }

    tracing::info!(
        pairs = report.pairs_processed,
        failures = report.failures.len(),
        "Backfill complete"
    );
    Ok(report)
}
