pub mod commands;
pub mod config;
pub mod pipeline;
pub mod retention;
pub mod watcher;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::commands::AppState;
use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not start the async runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("{0}")]
    Command(String),

    #[error("Unknown command: {0} (expected `watch` or `backfill`)")]
    Usage(String),
}

/// What the binary was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Watch until Ctrl-C (the default).
    Watch,
    /// Process the input folder once and exit.
    Backfill,
}

impl Mode {
    pub fn from_arg(arg: Option<&str>) -> Result<Self, RunError> {
        match arg {
            None | Some("watch") => Ok(Mode::Watch),
            Some("backfill") => Ok(Mode::Backfill),
            Some(other) => Err(RunError::Usage(other.to_string())),
        }
    }
}

pub fn run() -> Result<(), RunError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let arg = std::env::args().nth(1);
    let mode = Mode::from_arg(arg.as_deref())?;

    tracing::info!("eyepdf starting v{}", config::APP_VERSION);

    let state = Arc::new(AppState::load()?);
    tracing::info!(path = %state.config_path.display(), "Using settings file");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match mode {
            Mode::Watch => serve(state).await,
            Mode::Backfill => backfill_once(&state).await,
        }
    })
}

/// Run the retention sweeper and (when configured) the watch session until
/// Ctrl-C.
async fn serve(state: Arc<AppState>) -> Result<(), RunError> {
    commands::restart_retention(&state).await;

    let config = state.config();
    match (config.input_dir(), config.output_dir()) {
        (Some(input), Some(output)) if config.should_auto_start() => {
            if let Err(e) =
                commands::start_watching(&state, input, output, config.archive_dir()).await
            {
                tracing::error!(error = %e, "Auto start failed");
            }
        }
        _ => tracing::info!("Auto start skipped, waiting for Ctrl-C"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for Ctrl-C");
    }
    tracing::info!("Shutting down");

    if let Ok(Some(status)) = commands::stop_watching(&state).await {
        tracing::info!(
            pairs_emitted = status.pairs_emitted,
            pending = status.pending,
            "Final watch status"
        );
    }
    commands::stop_retention(&state).await;
    Ok(())
}

async fn backfill_once(state: &AppState) -> Result<(), RunError> {
    let config = state.config();
    let (Some(input), Some(output)) = (config.input_dir(), config.output_dir()) else {
        return Err(RunError::Command(
            "Input and output folders must be set before a backfill".into(),
        ));
    };

    let report = commands::backfill(state, input, output, config.archive_dir())
        .await
        .map_err(RunError::Command)?;
    println!("Processed {} pairs.", report.pairs_processed);
    for failure in &report.failures {
        println!("  failed {}: {}", failure.key, failure.message);
    }
    Ok(())
}
