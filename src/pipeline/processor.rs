//! Completed-pair processing: assemble the document, then post-process.
//!
//! Shared by the live watcher and by backfill so both paths emit the same
//! document names and apply the same archive layout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::archive::PostAction;
use super::assembler::{DocumentAssembler, PdfAssembler, DOCUMENT_EXTENSION};
use super::naming::PairKey;
use super::pending::PairSources;
use super::PipelineError;

/// Where documents go and what happens to sources afterwards.
#[derive(Clone)]
pub struct PairContext {
    pub output_dir: PathBuf,
    pub post_action: PostAction,
    pub assembler: Arc<dyn DocumentAssembler>,
}

impl PairContext {
    pub fn new(output_dir: PathBuf, archive_dir: Option<PathBuf>) -> Self {
        Self {
            output_dir,
            post_action: PostAction::from_archive_dir(archive_dir),
            assembler: Arc::new(PdfAssembler::new()),
        }
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn DocumentAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn document_path(&self, key: &PairKey) -> PathBuf {
        self.output_dir.join(key.document_name(DOCUMENT_EXTENSION))
    }
}

impl std::fmt::Debug for PairContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairContext")
            .field("output_dir", &self.output_dir)
            .field("post_action", &self.post_action)
            .finish_non_exhaustive()
    }
}

/// A pair that was fully processed.
#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub key: PairKey,
    pub document: PathBuf,
    /// New locations of archived sources; empty when sources stay in place.
    pub archived: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum PairFailure {
    /// No document was written. The pending entry must be kept.
    #[error("Pair {key}: document not written: {source}")]
    Assembly {
        key: PairKey,
        #[source]
        source: PipelineError,
    },

    /// The document exists but the sources were not (all) relocated.
    #[error("Pair {key}: {} written but sources not archived: {source}", .document.display())]
    PartiallyArchived {
        key: PairKey,
        document: PathBuf,
        #[source]
        source: PipelineError,
    },

    #[error("Pair {key}: processing exceeded {secs}s")]
    TimedOut { key: PairKey, secs: u64 },

    #[error("Pair {key}: processing task aborted: {message}")]
    Aborted { key: PairKey, message: String },
}

impl PairFailure {
    pub fn key(&self) -> &PairKey {
        match self {
            Self::Assembly { key, .. }
            | Self::PartiallyArchived { key, .. }
            | Self::TimedOut { key, .. }
            | Self::Aborted { key, .. } => key,
        }
    }

    /// Whether the output document reached its final location.
    pub fn document_emitted(&self) -> bool {
        matches!(self, Self::PartiallyArchived { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Assembly { .. } => "assembly",
            Self::PartiallyArchived { .. } => "partially_archived",
            Self::TimedOut { .. } => "timed_out",
            Self::Aborted { .. } => "aborted",
        }
    }
}

/// Serializable snapshot of a [`PairFailure`] for status and reports.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub key: PairKey,
    pub kind: &'static str,
    pub message: String,
    pub document_emitted: bool,
    pub at: DateTime<Utc>,
}

impl From<&PairFailure> for FailureRecord {
    fn from(failure: &PairFailure) -> Self {
        Self {
            key: failure.key().clone(),
            kind: failure.kind(),
            message: failure.to_string(),
            document_emitted: failure.document_emitted(),
            at: Utc::now(),
        }
    }
}

/// Write the document for `pair`, then run the post-processing action.
/// The action never runs unless the document was written.
pub fn process_pair(ctx: &PairContext, pair: &PairSources) -> Result<PairReport, PairFailure> {
    let document = ctx.document_path(&pair.key);

    ctx.assembler
        .assemble(pair.key.as_str(), pair.pages(), &document)
        .map_err(|source| PairFailure::Assembly {
            key: pair.key.clone(),
            source,
        })?;

    let archived = ctx
        .post_action
        .apply(pair.date, &pair.pages())
        .map_err(|source| PairFailure::PartiallyArchived {
            key: pair.key.clone(),
            document: document.clone(),
            source,
        })?;

    tracing::info!(
        key = %pair.key,
        document = %document.display(),
        archived = archived.len(),
        "Pair processed"
    );

    Ok(PairReport {
        key: pair.key.clone(),
        document,
        archived,
    })
}

/// [`process_pair`] on the blocking pool, bounded by `limit`.
///
/// On timeout the work is abandoned, not cancelled: the blocking call may
/// still finish later.
pub async fn process_pair_bounded(
    ctx: Arc<PairContext>,
    pair: PairSources,
    limit: Duration,
) -> Result<PairReport, PairFailure> {
    let key = pair.key.clone();
    let task = tokio::task::spawn_blocking(move || process_pair(&ctx, &pair));

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(PairFailure::Aborted {
            key,
            message: join_err.to_string(),
        }),
        Err(_) => Err(PairFailure::TimedOut {
            key,
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;

    /// Writes a placeholder document and remembers the page order it saw.
    #[derive(Default)]
    pub struct RecordingAssembler {
        pub calls: Mutex<Vec<(String, Vec<PathBuf>)>>,
        pub delay: Option<Duration>,
    }

    impl DocumentAssembler for RecordingAssembler {
        fn assemble(
            &self,
            title: &str,
            pages: [&Path; 2],
            dest: &Path,
        ) -> Result<(), PipelineError> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            for page in pages {
                if !page.exists() {
                    return Err(PipelineError::Decode {
                        path: page.to_path_buf(),
                        message: "missing".into(),
                    });
                }
            }
            std::fs::create_dir_all(dest.parent().unwrap())?;
            std::fs::write(dest, format!("%PDF {title}"))?;
            self.calls
                .lock()
                .unwrap()
                .push((title.to_string(), pages.iter().map(|p| p.to_path_buf()).collect()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::test_support::RecordingAssembler;
    use super::*;
    use crate::pipeline::naming::parse_capture;
    use crate::pipeline::pending::PendingPairStore;

    fn pair_in(dir: &Path) -> PairSources {
        let mut store = PendingPairStore::new();
        let mut key = None;
        for name in ["P1_20240101_S1_R_a.jpg", "P1_20240101_S1_L_a.jpg"] {
            let path = dir.join(name);
            std::fs::write(&path, b"img").unwrap();
            let capture = parse_capture(&path).unwrap().unwrap();
            store.record(&capture);
            key = Some(capture.key);
        }
        store.ready(&key.unwrap()).unwrap()
    }

    #[test]
    fn writes_document_then_archives() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let pair = pair_in(&input);

        let recorder = Arc::new(RecordingAssembler::default());
        let ctx = PairContext::new(dir.path().join("out"), Some(dir.path().join("archive")))
            .with_assembler(recorder.clone());

        let report = process_pair(&ctx, &pair).unwrap();

        assert_eq!(report.document, dir.path().join("out").join("P1_20240101_S1_a.pdf"));
        assert!(report.document.exists());
        assert_eq!(report.archived.len(), 2);
        assert!(dir.path().join("archive/2024/01/01/P1_20240101_S1_L_a.jpg").exists());
        assert!(!input.join("P1_20240101_S1_R_a.jpg").exists());

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "P1_20240101_S1_a");
        assert_eq!(
            calls[0].1,
            vec![
                input.join("P1_20240101_S1_L_a.jpg"),
                input.join("P1_20240101_S1_R_a.jpg"),
            ]
        );
    }

    #[test]
    fn assembly_failure_skips_post_action() {
        let dir = tempfile::tempdir().unwrap();
        let pair = pair_in(dir.path());
        std::fs::remove_file(&pair.left).unwrap();

        let ctx = PairContext::new(dir.path().join("out"), Some(dir.path().join("archive")))
            .with_assembler(Arc::new(RecordingAssembler::default()));

        let failure = process_pair(&ctx, &pair).unwrap_err();
        assert_eq!(failure.kind(), "assembly");
        assert!(!failure.document_emitted());
        assert!(pair.right.exists(), "right source must not be archived");
        assert!(!dir.path().join("archive").exists());
    }

    #[test]
    fn archive_failure_is_partial() {
        let dir = tempfile::tempdir().unwrap();
        let pair = pair_in(dir.path());
        let blocked_root = dir.path().join("archive");
        std::fs::write(&blocked_root, b"not a directory").unwrap();

        let ctx = PairContext::new(dir.path().join("out"), Some(blocked_root))
            .with_assembler(Arc::new(RecordingAssembler::default()));

        let failure = process_pair(&ctx, &pair).unwrap_err();
        assert_eq!(failure.kind(), "partially_archived");
        assert!(failure.document_emitted());
        assert_eq!(failure.key().as_str(), "P1_20240101_S1_a");
        assert!(dir.path().join("out/P1_20240101_S1_a.pdf").exists());
        assert!(pair.left.exists());
    }

    #[tokio::test]
    async fn bounded_processing_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pair = pair_in(dir.path());
        let slow = RecordingAssembler {
            delay: Some(Duration::from_millis(400)),
            ..Default::default()
        };
        let ctx = Arc::new(PairContext::new(dir.path().join("out"), None).with_assembler(Arc::new(slow)));

        let failure = process_pair_bounded(ctx, pair, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(failure, PairFailure::TimedOut { .. }));
    }

    #[tokio::test]
    async fn bounded_processing_returns_report() {
        let dir = tempfile::tempdir().unwrap();
        let pair = pair_in(dir.path());
        let ctx = Arc::new(
            PairContext::new(dir.path().join("out"), None)
                .with_assembler(Arc::new(RecordingAssembler::default())),
        );

        let report = process_pair_bounded(ctx, pair.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(report.archived.is_empty());
        assert!(pair.left.exists());
        assert!(pair.right.exists());
    }
}
