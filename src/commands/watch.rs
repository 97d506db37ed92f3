//! Watch, backfill and retention commands.
//!
//! Every command returns `Result<T, String>` so the caller can show the
//! message to the user as is.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::commands::state::AppState;
use crate::pipeline::{self, BackfillReport, PairContext};
use crate::retention::{start_sweeper, RetentionPolicy};
use crate::watcher::{WatchSession, WatchSettings, WatchStatus};

fn require_dir(path: &Path, what: &str) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err(format!("Please choose the {what} folder"));
    }
    Ok(())
}

/// Start live watching. The chosen folders are saved so the next launch
/// can start on its own.
pub async fn start_watching(
    state: &AppState,
    input_dir: PathBuf,
    output_dir: PathBuf,
    archive_dir: Option<PathBuf>,
) -> Result<WatchStatus, String> {
    require_dir(&input_dir, "input")?;
    require_dir(&output_dir, "output")?;
    let archive_dir = archive_dir.filter(|p| !p.as_os_str().is_empty());

    let mut session_guard = state.watch_session.lock().await;
    if session_guard.as_ref().is_some_and(WatchSession::is_running) {
        return Err("Already watching".into());
    }

    if let Err(e) =
        state.update_config(|c| c.set_dirs(&input_dir, &output_dir, archive_dir.as_deref()))
    {
        tracing::warn!(error = %e, "Could not save settings");
    }

    let config = state.config();
    let settings = WatchSettings {
        input_dir,
        output_dir,
        archive_dir,
        poll_interval: config.poll_interval(),
        operation_timeout: config.operation_timeout(),
    };
    let session = WatchSession::start(settings)
        .await
        .map_err(|e| e.to_string())?;
    let status = session.status();

    // A stale, finished session is simply replaced.
    if let Some(old) = session_guard.replace(session) {
        old.stop().await;
    }
    drop(session_guard);

    restart_retention(state).await;
    Ok(status)
}

/// Stop live watching. Returns the final status, or `None` when nothing
/// was running.
pub async fn stop_watching(state: &AppState) -> Result<Option<WatchStatus>, String> {
    let session = state.watch_session.lock().await.take();
    match session {
        Some(session) => Ok(Some(session.stop().await)),
        None => Ok(None),
    }
}

/// Current watch status. Returns None if no session was started.
pub async fn watch_status(state: &AppState) -> Option<WatchStatus> {
    state
        .watch_session
        .lock()
        .await
        .as_ref()
        .map(WatchSession::status)
}

/// Pair and process everything already in `input_dir`. Independent of any
/// live session.
pub async fn backfill(
    state: &AppState,
    input_dir: PathBuf,
    output_dir: PathBuf,
    archive_dir: Option<PathBuf>,
) -> Result<BackfillReport, String> {
    require_dir(&input_dir, "input")?;
    require_dir(&output_dir, "output")?;
    let archive_dir = archive_dir.filter(|p| !p.as_os_str().is_empty());

    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(|e| format!("Could not create output folder: {e}"))?;

    let limit = state.config().operation_timeout();
    let ctx = Arc::new(PairContext::new(output_dir, archive_dir));
    pipeline::backfill(&input_dir, ctx, limit)
        .await
        .map_err(|e| e.to_string())
}

/// (Re)start the retention sweeper over the configured output folder.
/// Stops any running sweeper first; starts nothing when retention is off.
pub async fn restart_retention(state: &AppState) -> bool {
    let config = state.config();
    let mut sweeper = state.sweeper.lock().await;
    if let Some(old) = sweeper.take() {
        old.stop().await;
    }

    let (Some(days), Some(output_dir)) = (config.retention_days, config.output_dir()) else {
        tracing::debug!("Retention disabled");
        return false;
    };
    *sweeper = Some(start_sweeper(
        output_dir,
        RetentionPolicy::days(days),
        config.sweep_interval(),
    ));
    true
}

/// Stop the retention sweeper, if running.
pub async fn stop_retention(state: &AppState) {
    if let Some(handle) = state.sweeper.lock().await.take() {
        handle.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, AppConfig};

    struct Fixture {
        _root: tempfile::TempDir,
        input: PathBuf,
        output: PathBuf,
        state: AppState,
    }

    fn fixture(config: AppConfig) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let output = root.path().join("out");
        let state = AppState::new(root.path().join("settings/config.json"), config);
        Fixture {
            input,
            output,
            state,
            _root: root,
        }
    }

    fn fast_config() -> AppConfig {
        AppConfig {
            poll_interval_ms: 20,
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn start_persists_dirs_and_rejects_second_start() {
        let f = fixture(fast_config());

        let status = start_watching(&f.state, f.input.clone(), f.output.clone(), None)
            .await
            .unwrap();
        assert!(status.running);
        assert!(f.output.is_dir());

        let saved = config::load_config(&f.state.config_path).unwrap();
        assert_eq!(saved.input_dir(), Some(f.input.clone()));
        assert_eq!(saved.output_dir(), Some(f.output.clone()));
        assert_eq!(saved.archive_dir(), None);

        let err = start_watching(&f.state, f.input.clone(), f.output.clone(), None)
            .await
            .unwrap_err();
        assert_eq!(err, "Already watching");

        let stopped = stop_watching(&f.state).await.unwrap().unwrap();
        assert!(!stopped.running);
        assert!(watch_status(&f.state).await.is_none());
    }

    #[tokio::test]
    async fn stop_without_session_is_ok() {
        let f = fixture(fast_config());
        assert!(stop_watching(&f.state).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_dirs_are_rejected() {
        let f = fixture(fast_config());
        let err = start_watching(&f.state, PathBuf::new(), f.output.clone(), None)
            .await
            .unwrap_err();
        assert!(err.contains("input"));

        let err = backfill(&f.state, f.input.clone(), PathBuf::new(), None)
            .await
            .unwrap_err();
        assert!(err.contains("output"));
    }

    #[tokio::test]
    async fn missing_input_folder_fails_start() {
        let f = fixture(fast_config());
        let err = start_watching(&f.state, f.input.join("nope"), f.output.clone(), None)
            .await
            .unwrap_err();
        assert!(err.contains("nope"), "{err}");
        assert!(watch_status(&f.state).await.is_none());
    }

    #[tokio::test]
    async fn backfill_with_nothing_to_pair() {
        let f = fixture(fast_config());
        std::fs::write(f.input.join("P1_20240101_S1_L_a.jpg"), b"img").unwrap();

        let report = backfill(&f.state, f.input.clone(), f.output.clone(), None)
            .await
            .unwrap();
        assert_eq!(report.pairs_processed, 0);
        assert!(f.output.is_dir());
        assert!(f.input.join("P1_20240101_S1_L_a.jpg").exists());
    }

    #[tokio::test]
    async fn retention_follows_settings() {
        let f = fixture(fast_config());
        assert!(!restart_retention(&f.state).await);

        f.state
            .update_config(|c| {
                c.set_dirs(Path::new("/in"), Path::new("/out"), None);
                c.retention_days = Some(30);
            })
            .unwrap();
        assert!(restart_retention(&f.state).await);
        assert!(f.state.sweeper.lock().await.is_some());

        stop_retention(&f.state).await;
        assert!(f.state.sweeper.lock().await.is_none());
    }
}
