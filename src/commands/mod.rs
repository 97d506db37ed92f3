pub mod state;
pub mod watch;

pub use state::AppState;
pub use watch::{
    backfill, restart_retention, start_watching, stop_retention, stop_watching, watch_status,
};
