//! Tag IDF and per-game L2 norms, recomputed from the committed index.
//!
//! `idf(tag) = ln(N / df(tag))` with `N` the main catalog size, and a game's
//! weight is `sqrt(sum(idf(tag)^2))` over its tags: the denominator a ranker
//! needs for cosine similarity against that game.

use std::path::Path;

use crate::catalog::CatalogStore;
use crate::error::{IndexError, Result};
use crate::index::{GameId, GameRecord, TagWeights};
use crate::merge::IndexReader;
use crate::persist::{write_lines_atomic, IndexPaths};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightOutcome {
    /// Nothing was written.
    Skipped(SkipReason),
    Computed { tags: usize, games: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing new was staged and the policy keeps weights as they are.
    NothingStaged,
    /// `ln(N / df)` is undefined for an empty catalog.
    EmptyCatalog,
}

/// IDF for every posting in the index at `index`.
pub fn compute_idf(index: &Path, total_games: usize) -> Result<TagWeights> {
    let mut weights = TagWeights::new();
    let Some(reader) = IndexReader::open(index)? else {
        return Ok(weights);
    };
    for posting in reader {
        let posting = posting?;
        let df = posting.df();
        if df > total_games {
            return Err(IndexError::DocumentFrequencyOverflow { tag: posting.tag, df, total: total_games });
        }
        weights.insert(posting.tag, idf(total_games, df));
    }
    Ok(weights)
}

#[inline]
pub fn idf(total_games: usize, df: usize) -> f64 {
    (total_games as f64 / df as f64).ln()
}

/// Euclidean length of a game's idf-weighted tag vector.
pub fn l2_norm(record: &GameRecord, weights: &TagWeights) -> Result<f64> {
    let mut sum = 0.0f64;
    for tag in &record.genres {
        let w = weights
            .get(tag)
            .ok_or_else(|| IndexError::MissingWeight { game: record.id, tag: tag.clone() })?;
        sum += w * w;
    }
    Ok(sum.sqrt())
}

/// Overwrite the weight file with one `tag:idf` line per tag.
pub fn write_weights(paths: &IndexPaths, weights: &TagWeights) -> Result<()> {
    let lines = weights.iter().map(|(tag, idf)| format!("{tag}:{idf}"));
    write_lines_atomic(&paths.weights_temp(), &paths.weights(), lines)?;
    tracing::info!(tags = weights.len(), file = %paths.weights().display(), "wrote tag weights");
    Ok(())
}

/// Compute every game's norm first and only then write them back, so a
/// missing weight leaves the catalog untouched.
pub fn update_l2_norms(weights: &TagWeights, main: &CatalogStore) -> Result<usize> {
    let norms: Vec<(GameId, f64)> = main
        .all_records()?
        .iter()
        .map(|rec| l2_norm(rec, weights).map(|n| (rec.id, n)))
        .collect::<Result<_>>()?;
    for (id, norm) in &norms {
        main.update_weight(*id, *norm)?;
    }
    tracing::info!(games = norms.len(), "updated game norms");
    Ok(norms.len())
}

/// Recompute tag weights and game norms from the committed index.
/// `main` must be open.
pub fn recompute(paths: &IndexPaths, main: &CatalogStore) -> Result<WeightOutcome> {
    let total = main.row_count()?;
    if total == 0 {
        tracing::info!("catalog is empty, skipping weight computation");
        return Ok(WeightOutcome::Skipped(SkipReason::EmptyCatalog));
    }
    let weights = compute_idf(&paths.index(), total)?;
    write_weights(paths, &weights)?;
    let games = update_l2_norms(&weights, main)?;
    Ok(WeightOutcome::Computed { tags: weights.len(), games })
}
