//! In-memory table of half-matched studies.
//!
//! One store per driver: the live watcher owns one for its whole session,
//! every backfill run builds a fresh one. Nothing here is persisted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::naming::{Capture, PairKey, Side};

/// Sources seen so far for one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingEntry {
    left: Option<PathBuf>,
    right: Option<PathBuf>,
    date: Option<NaiveDate>,
}

impl PendingEntry {
    pub fn get(&self, side: Side) -> Option<&Path> {
        match side {
            Side::Left => self.left.as_deref(),
            Side::Right => self.right.as_deref(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    fn slot(&mut self, side: Side) -> &mut Option<PathBuf> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Both sources of a study, ready for assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairSources {
    pub key: PairKey,
    pub date: NaiveDate,
    pub left: PathBuf,
    pub right: PathBuf,
}

impl PairSources {
    /// Source paths in page order: left first, right second.
    pub fn pages(&self) -> [&Path; 2] {
        [self.left.as_path(), self.right.as_path()]
    }
}

/// Outcome of [`PendingPairStore::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    /// Both sides are now present for the key.
    pub complete: bool,
    /// Path that was overwritten when the same side arrived twice.
    pub replaced: Option<PathBuf>,
}

/// Partial pairs keyed by [`PairKey`].
///
/// Duplicate side arrivals follow a keep-last policy: the newer path wins
/// and the displaced one is handed back to the caller.
#[derive(Debug, Default)]
pub struct PendingPairStore {
    entries: HashMap<PairKey, PendingEntry>,
}

impl PendingPairStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, capture: &Capture) -> Recorded {
        let entry = self.entries.entry(capture.key.clone()).or_default();
        entry.date = Some(capture.date);
        let replaced = entry
            .slot(capture.side)
            .replace(capture.path.clone())
            .filter(|previous| previous != &capture.path);
        Recorded {
            complete: entry.is_complete(),
            replaced,
        }
    }

    /// The pair for `key` if both sides are present. The entry stays in the
    /// store until [`settle`](Self::settle) is called.
    pub fn ready(&self, key: &PairKey) -> Option<PairSources> {
        let entry = self.entries.get(key)?;
        Some(PairSources {
            key: key.clone(),
            date: entry.date?,
            left: entry.left.clone()?,
            right: entry.right.clone()?,
        })
    }

    /// Remove `key` once its document has been emitted.
    pub fn settle(&mut self, key: &PairKey) -> Option<PendingEntry> {
        self.entries.remove(key)
    }

    /// Keys with both sides present, in key order.
    pub fn complete_keys(&self) -> Vec<PairKey> {
        let mut keys: Vec<PairKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_complete())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &PairKey) -> Option<&PendingEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::naming::parse_capture;

    fn capture(name: &str) -> Capture {
        parse_capture(&Path::new("/in").join(name)).unwrap().unwrap()
    }

    #[test]
    fn first_side_waits() {
        let mut store = PendingPairStore::new();
        let rec = store.record(&capture("P1_20240101_S1_L_a.jpg"));
        assert!(!rec.complete);
        assert!(rec.replaced.is_none());
        assert_eq!(store.len(), 1);
        assert!(store.complete_keys().is_empty());
    }

    #[test]
    fn either_arrival_order_completes_with_left_first() {
        for names in [
            ["P1_20240101_S1_L_a.jpg", "P1_20240101_S1_R_a.jpg"],
            ["P1_20240101_S1_R_a.jpg", "P1_20240101_S1_L_a.jpg"],
        ] {
            let mut store = PendingPairStore::new();
            assert!(!store.record(&capture(names[0])).complete);
            assert!(store.record(&capture(names[1])).complete);

            let key = capture(names[0]).key;
            let pair = store.ready(&key).unwrap();
            assert_eq!(pair.pages()[0], Path::new("/in/P1_20240101_S1_L_a.jpg"));
            assert_eq!(pair.pages()[1], Path::new("/in/P1_20240101_S1_R_a.jpg"));
        }
    }

    #[test]
    fn duplicate_side_keeps_last() {
        let mut store = PendingPairStore::new();
        store.record(&capture("P1_20240101_S1_L_a.jpg"));
        let rec = store.record(&capture("P1_20240101_S1_L_a.png"));

        assert!(!rec.complete);
        assert_eq!(rec.replaced, Some(PathBuf::from("/in/P1_20240101_S1_L_a.jpg")));
        let key = capture("P1_20240101_S1_L_a.png").key;
        assert_eq!(
            store.get(&key).unwrap().get(Side::Left),
            Some(Path::new("/in/P1_20240101_S1_L_a.png"))
        );
    }

    #[test]
    fn same_path_twice_is_not_a_replacement() {
        let mut store = PendingPairStore::new();
        store.record(&capture("P1_20240101_S1_L_a.jpg"));
        let rec = store.record(&capture("P1_20240101_S1_L_a.jpg"));
        assert!(rec.replaced.is_none());
    }

    #[test]
    fn ready_does_not_remove_until_settled() {
        let mut store = PendingPairStore::new();
        store.record(&capture("P1_20240101_S1_L_a.jpg"));
        store.record(&capture("P1_20240101_S1_R_a.jpg"));
        let key = capture("P1_20240101_S1_L_a.jpg").key;

        assert!(store.ready(&key).is_some());
        assert_eq!(store.len(), 1);

        let entry = store.settle(&key).unwrap();
        assert!(entry.is_complete());
        assert!(store.is_empty());
        assert!(store.ready(&key).is_none());
    }

    #[test]
    fn settled_key_starts_fresh_on_new_arrival() {
        let mut store = PendingPairStore::new();
        store.record(&capture("P1_20240101_S1_L_a.jpg"));
        store.record(&capture("P1_20240101_S1_R_a.jpg"));
        let key = capture("P1_20240101_S1_L_a.jpg").key;
        store.settle(&key);

        let rec = store.record(&capture("P1_20240101_S1_R_a.jpg"));
        assert!(!rec.complete);
        assert!(store.ready(&key).is_none());
    }

    #[test]
    fn complete_keys_are_sorted_and_skip_singletons() {
        let mut store = PendingPairStore::new();
        for name in [
            "B_20240101_S_L_x.jpg",
            "B_20240101_S_R_x.jpg",
            "C_20240101_S_L_x.jpg",
            "A_20240101_S_R_x.jpg",
            "A_20240101_S_L_x.jpg",
        ] {
            store.record(&capture(name));
        }
        let keys: Vec<String> = store
            .complete_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["A_20240101_S_x", "B_20240101_S_x"]);
    }
}
