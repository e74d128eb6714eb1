use thiserror::Error;

use crate::index::GameId;

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("catalog table '{table}' is not open")]
    StoreUnavailable { table: &'static str },

    #[error("game {id} already exists in the catalog")]
    DuplicateRecord { id: GameId },

    #[error("corrupt index line {line_no}: {reason} ({line:?})")]
    CorruptIndexLine { line_no: usize, line: String, reason: &'static str },

    #[error("corrupt weight line {line_no}: {reason} ({line:?})")]
    CorruptWeightLine { line_no: usize, line: String, reason: &'static str },

    #[error("game {game} has tag '{tag}' with no computed idf")]
    MissingWeight { game: GameId, tag: String },

    #[error("tag '{tag}' lists {df} games but the catalog only holds {total}")]
    DocumentFrequencyOverflow { tag: String, df: usize, total: usize },

    #[error("game id {0} cannot be stored")]
    InvalidGameId(GameId),

    #[error("an index update cycle is already running")]
    CycleInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog error: {0}")]
    Store(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("meta file error: {0}")]
    Meta(#[from] serde_json::Error),
}

impl IndexError {
    /// Errors a cycle may step over; everything else aborts it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IndexError::DuplicateRecord { .. })
    }
}
