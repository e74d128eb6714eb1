use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use unicode_normalization::UnicodeNormalization;

pub type GameId = i64;

/// tag -> idf, ordered by tag so the weight file is written deterministically.
pub type TagWeights = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: GameId,
    pub title: String,
    /// Normalized genre tags; see [`normalize_tag`].
    pub genres: BTreeSet<String>,
    pub weight: f64, // L2 norm of the idf-weighted tag vector, 0 until computed
}

impl GameRecord {
    /// Build a record from raw tags. Tags that cannot be stored are dropped.
    pub fn new<I, S>(id: GameId, title: impl Into<String>, genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tags = BTreeSet::new();
        for raw in genres {
            match normalize_tag(raw.as_ref()) {
                Some(tag) => {
                    tags.insert(tag);
                }
                None => {
                    if !raw.as_ref().trim().is_empty() {
                        tracing::warn!(id, tag = raw.as_ref(), "dropping unstorable genre tag");
                    }
                }
            }
        }
        Self { id, title: title.into(), genres: tags, weight: 0.0 }
    }

    /// Build a record from a comma-joined genre string, the catalog's column format.
    pub fn from_genre_list(id: GameId, title: impl Into<String>, genres: &str) -> Self {
        Self::new(id, title, genres.split(','))
    }

    pub fn genre_list(&self) -> String {
        self.genres.iter().map(String::as_str).collect::<Vec<_>>().join(",")
    }
}

/// NFKC-normalize, trim and lowercase a tag.
///
/// Returns `None` for tags that would not survive the `tag:ids` line format.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let tag = raw.nfkc().collect::<String>().trim().to_lowercase();
    if tag.is_empty() || tag.chars().any(|c| c == ':' || c == ',' || c.is_control()) {
        return None;
    }
    Some(tag)
}
