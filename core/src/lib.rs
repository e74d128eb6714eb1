//! Genre-tag inverted index for the game catalog.
//!
//! New games land in a staging table, get folded into the on-disk index by a
//! streaming merge, and then every tag gets an IDF weight and every game an L2
//! norm so a ranker can compute cosine similarity without rescanning raw data.

pub mod builder;
pub mod catalog;
pub mod commit;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod merge;
pub mod persist;
pub mod posting;
pub mod weights;

pub use catalog::{CatalogStore, Table, NO_GENRE_INFO};
pub use coordinator::{CoordinatorConfig, CycleReport, EmptyStagingPolicy, IndexCoordinator};
pub use error::{IndexError, Result};
pub use index::{normalize_tag, GameId, GameRecord, TagWeights};
pub use posting::Posting;
