use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use super::PipelineError;

/// What happens to the two sources after their document is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Move sources into `<root>/<YYYY>/<MM>/<DD>/`.
    Archive { root: PathBuf },
    /// Leave sources where they were found.
    LeaveInPlace,
}

impl PostAction {
    pub fn from_archive_dir(archive_dir: Option<PathBuf>) -> Self {
        match archive_dir {
            Some(root) => Self::Archive { root },
            None => Self::LeaveInPlace,
        }
    }

    /// Apply the action to `sources`. Returns the new location of each
    /// moved file (empty for [`PostAction::LeaveInPlace`]).
    pub fn apply(&self, date: NaiveDate, sources: &[&Path]) -> Result<Vec<PathBuf>, PipelineError> {
        match self {
            Self::LeaveInPlace => Ok(Vec::new()),
            Self::Archive { root } => {
                let partition = archive_partition(root, date);
                std::fs::create_dir_all(&partition)?;
                sources
                    .iter()
                    .map(|src| move_into(src, &partition))
                    .collect()
            }
        }
    }
}

/// Date partition for a capture date: `<root>/<YYYY>/<MM>/<DD>`.
pub fn archive_partition(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
        .join(date.format("%d").to_string())
}

/// Move `src` into `dir`, keeping its file name. Falls back to copy and
/// remove when a plain rename is refused (e.g. across filesystems).
fn move_into(src: &Path, dir: &Path) -> Result<PathBuf, PipelineError> {
    let name = src.file_name().ok_or_else(|| PipelineError::Move {
        from: src.to_path_buf(),
        to: dir.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name"),
    })?;
    let target = dir.join(name);
    let move_err = |source| PipelineError::Move {
        from: src.to_path_buf(),
        to: target.clone(),
        source,
    };

    if let Err(rename_err) = std::fs::rename(src, &target) {
        if !src.exists() {
            return Err(move_err(rename_err));
        }
        std::fs::copy(src, &target).map_err(|_| move_err(rename_err))?;
        std::fs::remove_file(src).map_err(move_err)?;
    }

    tracing::debug!(from = %src.display(), to = %target.display(), "Source archived");
    Ok(target)
}
