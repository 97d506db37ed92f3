//! Capture filename parsing.
//!
//! Capture devices name files `<id>_<YYYYMMDD>_<id2>_<L|R>_<rest...>.<ext>`.
//! The pair key is every token except the side code, so the left and right
//! captures of one study project onto the same key. This is the only place
//! keys are derived; live watching and backfill both call [`parse_capture`].

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Image extensions accepted as captures (compared case-insensitively).
pub const ACCEPTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

const DELIMITER: char = '_';
const MIN_TOKENS: usize = 5;
const DATE_TOKEN: usize = 1;
const SIDE_TOKEN: usize = 3;
const DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Page order in the output document.
    pub const ORDER: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "L",
            Self::Right => "R",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "L" => Some(Self::Left),
            "R" => Some(Self::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier shared by the two captures of one study.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PairKey(String);

impl PairKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Output document file name, e.g. `P1_20240101_S1_a.pdf`.
    pub fn document_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file that satisfies the capture naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub path: PathBuf,
    pub key: PairKey,
    pub side: Side,
    pub date: NaiveDate,
}

/// A file that looked like a capture but carries an unusable date token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed capture date {token:?} in {file}")]
pub struct NameError {
    pub file: String,
    pub token: String,
}

/// Parse a path into a [`Capture`].
///
/// Returns `Ok(None)` for anything that is not a capture (wrong extension,
/// too few tokens, unknown side code); those are skipped without comment.
/// A capture-shaped name whose date token is not `YYYYMMDD` is an error for
/// that file only.
pub fn parse_capture(path: &Path) -> Result<Option<Capture>, NameError> {
    let Some(stem) = accepted_stem(path) else {
        return Ok(None);
    };

    let tokens: Vec<&str> = stem.split(DELIMITER).collect();
    if tokens.len() < MIN_TOKENS {
        return Ok(None);
    }
    let Some(side) = Side::from_token(tokens[SIDE_TOKEN]) else {
        return Ok(None);
    };

    let date_token = tokens[DATE_TOKEN];
    let date = parse_date(date_token).ok_or_else(|| NameError {
        file: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        token: date_token.to_string(),
    })?;

    let key_tokens: Vec<&str> = tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != SIDE_TOKEN)
        .map(|(_, t)| *t)
        .collect();
    let key = PairKey(key_tokens.join(DELIMITER.to_string().as_str()));

    Ok(Some(Capture {
        path: path.to_path_buf(),
        key,
        side,
        date,
    }))
}

/// File stem of `path` if its extension is an accepted image type.
fn accepted_stem(path: &Path) -> Option<&str> {
    let ext = path.extension()?.to_str()?;
    if !ACCEPTED_EXTENSIONS
        .iter()
        .any(|accepted| accepted.eq_ignore_ascii_case(ext))
    {
        return None;
    }
    path.file_stem()?.to_str()
}

fn parse_date(token: &str) -> Option<NaiveDate> {
    if token.len() != 8 || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(token, DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str) -> Result<Option<Capture>, NameError> {
        parse_capture(Path::new("/captures").join(name).as_path())
    }

    #[test]
    fn left_and_right_share_key() {
        let left = parse("P1_20240101_S1_L_a.jpg").unwrap().unwrap();
        let right = parse("P1_20240101_S1_R_a.jpg").unwrap().unwrap();

        assert_eq!(left.key.as_str(), "P1_20240101_S1_a");
        assert_eq!(left.key, right.key);
        assert_eq!(left.side, Side::Left);
        assert_eq!(right.side, Side::Right);
        assert_eq!(left.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn trailing_tokens_stay_in_key() {
        let capture = parse("P9_20231231_X_R_a_b_c.png").unwrap().unwrap();
        assert_eq!(capture.key.as_str(), "P9_20231231_X_a_b_c");
        assert_eq!(capture.key.document_name("pdf"), "P9_20231231_X_a_b_c.pdf");
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(parse("P1_20240101_S1_L_a.JPG").unwrap().is_some());
        assert!(parse("P1_20240101_S1_L_a.Jpeg").unwrap().is_some());
        assert!(parse("P1_20240101_S1_L_a.PNG").unwrap().is_some());
    }

    #[test]
    fn other_extensions_are_ignored() {
        assert_eq!(parse("P1_20240101_S1_L_a.tiff"), Ok(None));
        assert_eq!(parse("P1_20240101_S1_L_a.pdf"), Ok(None));
        assert_eq!(parse("P1_20240101_S1_L_a"), Ok(None));
    }

    #[test]
    fn too_few_tokens_are_ignored() {
        assert_eq!(parse("P1_20240101_S1_L.jpg"), Ok(None));
        assert_eq!(parse("single.jpg"), Ok(None));
    }

    #[test]
    fn unknown_side_codes_are_ignored() {
        assert_eq!(parse("P1_20240101_S1_X_a.jpg"), Ok(None));
        assert_eq!(parse("P1_20240101_S1_l_a.jpg"), Ok(None));
        assert_eq!(parse("P1_20240101_S1_LR_a.jpg"), Ok(None));
    }

    #[test]
    fn malformed_date_is_a_per_file_error() {
        let err = parse("P1_2024-01-01_S1_L_a.jpg").unwrap_err();
        assert_eq!(err.token, "2024-01-01");
        assert_eq!(err.file, "P1_2024-01-01_S1_L_a.jpg");

        assert!(parse("P1_20241301_S1_L_a.jpg").is_err());
        assert!(parse("P1_2024011_S1_L_a.jpg").is_err());
        assert!(parse("P1__S1_L_a.jpg").is_err());
    }

    #[test]
    fn side_is_checked_before_date() {
        // Not a capture at all, so the bad date is never looked at.
        assert_eq!(parse("P1_notadate_S1_Q_a.jpg"), Ok(None));
    }

    #[test]
    fn different_studies_get_different_keys() {
        let a = parse("P1_20240101_S1_L_a.jpg").unwrap().unwrap();
        let b = parse("P1_20240101_S2_L_a.jpg").unwrap().unwrap();
        let c = parse("P1_20240102_S1_L_a.jpg").unwrap().unwrap();
        assert_ne!(a.key, b.key);
        assert_ne!(a.key, c.key);
    }

    #[test]
    fn side_order_is_left_then_right() {
        assert_eq!(Side::ORDER, [Side::Left, Side::Right]);
        assert_eq!(Side::Left.to_string(), "L");
    }
}
