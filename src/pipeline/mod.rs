//! Capture pairing pipeline
//!
//! ```text
//! naming → pending → assembler → archive
//! ```
//!
//! `processor` runs one completed pair through assembly and post-processing.
//! `reconcile` replays a directory snapshot through the same steps.

pub mod naming;
pub mod pending;
pub mod assembler;
pub mod archive;
pub mod processor;
pub mod reconcile;

pub use naming::{parse_capture, Capture, NameError, PairKey, Side, ACCEPTED_EXTENSIONS};
pub use pending::{PairSources, PendingEntry, PendingPairStore, Recorded};
pub use assembler::{
    cleanup_orphaned_temp_files, DocumentAssembler, PdfAssembler, DOCUMENT_EXTENSION,
    ORPHAN_TEMP_MIN_AGE,
};
pub use archive::{archive_partition, PostAction};
pub use processor::{
    process_pair, process_pair_bounded, FailureRecord, PairContext, PairFailure, PairReport,
};
pub use reconcile::{backfill, BackfillReport};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not decode image {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },

    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("Could not move {} to {}: {source}", .from.display(), .to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory not readable: {}: {source}", .path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}
