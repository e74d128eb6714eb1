use std::fmt;

use crate::error::{IndexError, Result};
use crate::index::GameId;

/// A tag and the ids of every game carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub tag: String,
    pub games: Vec<GameId>, // ascending once sort() has run
}

impl Posting {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), games: Vec::new() }
    }

    /// Append an id. The list is unsorted until [`Posting::sort`] runs.
    pub fn add(&mut self, id: GameId) {
        self.games.push(id);
    }

    pub fn sort(&mut self) {
        self.games.sort_unstable();
    }

    /// Fold `other`'s ids into this posting and re-sort.
    ///
    /// The two id sets are expected to be disjoint. Ids present in both are
    /// kept once and reported through the return value so callers can log the
    /// anomaly; the result is always strictly ascending.
    pub fn merge(&mut self, other: &Posting) -> usize {
        self.games.extend_from_slice(&other.games);
        self.sort();
        let before = self.games.len();
        self.games.dedup();
        let dropped = before - self.games.len();
        if dropped > 0 {
            tracing::warn!(tag = %self.tag, dropped, "merged postings shared game ids");
        }
        dropped
    }

    pub fn df(&self) -> usize {
        self.games.len()
    }

    pub fn is_strictly_sorted(&self) -> bool {
        self.games.windows(2).all(|w| w[0] < w[1])
    }

    /// Parse one persisted `tag:id1,id2,...` line.
    ///
    /// Splits on the first `:` and then on `,`; empty id segments are ignored.
    /// `line_no` is 1-based and only used for error reporting.
    pub fn parse_line(line: &str, line_no: usize) -> Result<Posting> {
        let corrupt = |reason: &'static str| IndexError::CorruptIndexLine { line_no, line: line.to_string(), reason };
        let trimmed = line.trim_end_matches(&['\n', '\r'][..]);
        let (tag, ids) = trimmed.split_once(':').ok_or_else(|| corrupt("missing ':' separator"))?;
        if tag.is_empty() {
            return Err(corrupt("empty tag"));
        }
        let mut posting = Posting::new(tag);
        for seg in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let id: GameId = seg.parse().map_err(|_| corrupt("unparseable game id"))?;
            posting.add(id);
        }
        if posting.games.is_empty() {
            return Err(corrupt("posting lists no games"));
        }
        if !posting.is_strictly_sorted() {
            return Err(corrupt("game ids not strictly ascending"));
        }
        Ok(posting)
    }
}

impl fmt::Display for Posting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.tag)?;
        for (i, id) in self.games.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_tag_colon_ids() {
        let mut p = Posting::new("action");
        p.add(5);
        p.add(1);
        p.add(3);
        p.sort();
        assert_eq!(p.to_string(), "action:1,3,5");
    }

    #[test]
    fn parse_ignores_trailing_and_empty_segments() {
        let p = Posting::parse_line("rpg:2,7,,9,\n", 1).unwrap();
        assert_eq!(p.tag, "rpg");
        assert_eq!(p.games, vec![2, 7, 9]);
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        for (line, reason) in [
            ("no separator", "missing ':' separator"),
            (":1,2", "empty tag"),
            ("rpg:1,x", "unparseable game id"),
            ("rpg:", "posting lists no games"),
            ("rpg:3,1", "game ids not strictly ascending"),
            ("rpg:1,1", "game ids not strictly ascending"),
        ] {
            match Posting::parse_line(line, 4) {
                Err(IndexError::CorruptIndexLine { line_no, reason: got, .. }) => {
                    assert_eq!(line_no, 4);
                    assert_eq!(got, reason, "line {line:?}");
                }
                other => panic!("expected corruption for {line:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn merge_of_disjoint_sets_sorts() {
        let mut disk = Posting { tag: "action".into(), games: vec![1, 3] };
        let new = Posting { tag: "action".into(), games: vec![2, 5] };
        assert_eq!(disk.merge(&new), 0);
        assert_eq!(disk.games, vec![1, 2, 3, 5]);
    }

    #[test]
    fn merge_of_overlapping_sets_keeps_each_id_once() {
        let mut disk = Posting { tag: "action".into(), games: vec![1, 3] };
        let new = Posting { tag: "action".into(), games: vec![3, 4] };
        assert_eq!(disk.merge(&new), 1);
        assert_eq!(disk.games, vec![1, 3, 4]);
        assert!(disk.is_strictly_sorted());
    }
}
