use std::collections::HashMap;

use crate::index::GameRecord;
use crate::posting::Posting;

/// Group a staging snapshot by tag into postings sorted by tag, each with an
/// ascending id list.
///
/// An empty snapshot yields an empty list, which tells the coordinator there
/// is nothing to merge this cycle.
pub fn build_postings(records: &[GameRecord]) -> Vec<Posting> {
    let mut by_tag: HashMap<&str, Posting> = HashMap::new();
    for rec in records {
        for tag in &rec.genres {
            by_tag.entry(tag.as_str()).or_insert_with(|| Posting::new(tag.clone())).add(rec.id);
        }
    }

    let mut postings: Vec<Posting> = by_tag.into_values().collect();
    for p in postings.iter_mut() {
        p.sort();
        // a snapshot never carries the same id twice, but keep the invariant local
        p.games.dedup();
    }
    postings.sort_unstable_by(|a, b| a.tag.cmp(&b.tag));

    tracing::debug!(records = records.len(), tags = postings.len(), "built in-memory postings");
    postings
}
