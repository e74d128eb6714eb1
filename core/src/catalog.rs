//! Durable game catalog backed by sled.
//!
//! One sled database holds two tables: the main catalog and the staging area
//! for ingested games that have not been indexed yet. A [`CatalogStore`] is a
//! connection to one table and must be opened before use.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::{IndexError, Result};
use crate::index::{GameId, GameRecord};

/// Returned by [`CatalogStore::genres_of`] for unknown games.
pub const NO_GENRE_INFO: &str = "No genre information.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Main,
    Staging,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Main => "gameinfo",
            Table::Staging => "gameinfo_staging",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    title: String,
    genres: BTreeSet<String>,
    weight: f64,
}

pub struct CatalogStore {
    db: sled::Db,
    table: Table,
    tree: Option<sled::Tree>,
}

impl CatalogStore {
    /// A closed connection to `table`; call [`CatalogStore::open`] or use
    /// [`CatalogStore::session`] before touching data.
    pub fn new(db: &sled::Db, table: Table) -> Self {
        Self { db: db.clone(), table, tree: None }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn is_open(&self) -> bool {
        self.tree.is_some()
    }

    pub fn open(&mut self) -> Result<()> {
        if self.tree.is_none() {
            self.tree = Some(self.db.open_tree(self.table.name())?);
        }
        Ok(())
    }

    /// Flush and release the table handle. Closing a closed store is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(tree) = self.tree.take() {
            tree.flush()?;
        }
        Ok(())
    }

    /// Open, run `f`, and close again on every exit path.
    ///
    /// If `f` fails its error wins over a failing close.
    pub fn session<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.open()?;
        let out = f(self);
        let closed = self.close();
        let value = out?;
        closed?;
        Ok(value)
    }

    fn tree(&self) -> Result<&sled::Tree> {
        self.tree.as_ref().ok_or(IndexError::StoreUnavailable { table: self.table.name() })
    }

    pub fn all_ids(&self) -> Result<HashSet<GameId>> {
        let mut ids = HashSet::new();
        for key in self.tree()?.iter().keys() {
            ids.insert(decode_key(&key?));
        }
        Ok(ids)
    }

    /// Every record, ascending by id.
    pub fn all_records(&self) -> Result<Vec<GameRecord>> {
        let mut records = Vec::new();
        for entry in self.tree()?.iter() {
            let (key, value) = entry?;
            records.push(decode_record(decode_key(&key), &value)?);
        }
        Ok(records)
    }

    pub fn get(&self, id: GameId) -> Result<Option<GameRecord>> {
        let tree = self.tree()?;
        if id < 0 {
            return Ok(None);
        }
        match tree.get(encode_key(id))? {
            Some(value) => Ok(Some(decode_record(id, &value)?)),
            None => Ok(None),
        }
    }

    /// Comma-joined tags of a game, or [`NO_GENRE_INFO`] when the id is
    /// negative or unknown.
    pub fn genres_of(&self, id: GameId) -> Result<String> {
        Ok(self.get(id)?.map(|r| r.genre_list()).unwrap_or_else(|| NO_GENRE_INFO.to_string()))
    }

    /// Insert a new record with weight 0. Existing ids are rejected with
    /// [`IndexError::DuplicateRecord`].
    pub fn insert(&self, record: &GameRecord) -> Result<()> {
        let tree = self.tree()?;
        if record.id < 0 {
            return Err(IndexError::InvalidGameId(record.id));
        }
        let stored = StoredRecord { title: record.title.clone(), genres: record.genres.clone(), weight: 0.0 };
        let bytes = bincode::serialize(&stored)?;
        match tree.compare_and_swap(encode_key(record.id), None as Option<&[u8]>, Some(bytes))? {
            Ok(()) => {
                tracing::debug!(table = self.table.name(), id = record.id, title = %record.title, "inserted game");
                Ok(())
            }
            Err(_) => Err(IndexError::DuplicateRecord { id: record.id }),
        }
    }

    /// Overwrite the stored weight of a game. Unknown ids are ignored.
    pub fn update_weight(&self, id: GameId, weight: f64) -> Result<()> {
        let tree = self.tree()?;
        if id < 0 {
            return Ok(());
        }
        let key = encode_key(id);
        if let Some(value) = tree.get(key)? {
            let mut stored: StoredRecord = bincode::deserialize(&value)?;
            stored.weight = weight;
            tree.insert(key, bincode::serialize(&stored)?)?;
        }
        Ok(())
    }

    pub fn row_count(&self) -> Result<usize> {
        Ok(self.tree()?.len())
    }

    /// Drop the table and recreate it empty.
    pub fn clear(&mut self) -> Result<()> {
        self.tree()?;
        self.tree = None;
        self.db.drop_tree(self.table.name())?;
        self.tree = Some(self.db.open_tree(self.table.name())?);
        tracing::debug!(table = self.table.name(), "table recreated empty");
        Ok(())
    }
}

// Sign bit flipped so big-endian byte order matches numeric order.
fn encode_key(id: GameId) -> [u8; 8] {
    ((id as u64) ^ (1 << 63)).to_be_bytes()
}

fn decode_key(key: &[u8]) -> GameId {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&key[..8]);
    (u64::from_be_bytes(buf) ^ (1 << 63)) as GameId
}

fn decode_record(id: GameId, value: &[u8]) -> Result<GameRecord> {
    let stored: StoredRecord = bincode::deserialize(value)?;
    Ok(GameRecord { id, title: stored.title, genres: stored.genres, weight: stored.weight })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    #[test]
    fn closed_store_reports_unavailable() {
        let db = temp_db();
        let store = CatalogStore::new(&db, Table::Main);
        let err = store.row_count().unwrap_err();
        assert!(matches!(err, IndexError::StoreUnavailable { table: "gameinfo" }));
    }

    #[test]
    fn session_closes_on_error() {
        let db = temp_db();
        let mut store = CatalogStore::new(&db, Table::Main);
        let res: Result<()> = store.session(|s| {
            s.insert(&GameRecord::new(1, "Hades", ["action"]))?;
            s.insert(&GameRecord::new(1, "Hades", ["action"]))
        });
        assert!(matches!(res, Err(IndexError::DuplicateRecord { id: 1 })));
        assert!(!store.is_open());
    }

    #[test]
    fn records_come_back_in_id_order() {
        let db = temp_db();
        let mut store = CatalogStore::new(&db, Table::Main);
        store.open().unwrap();
        for id in [300, 10, 2000] {
            store.insert(&GameRecord::new(id, format!("game {id}"), ["indie"])).unwrap();
        }
        let ids: Vec<GameId> = store.all_records().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 300, 2000]);
        assert_eq!(store.row_count().unwrap(), 3);
    }

    #[test]
    fn genres_of_unknown_or_negative_id_is_sentinel() {
        let db = temp_db();
        let mut store = CatalogStore::new(&db, Table::Main);
        store.open().unwrap();
        store.insert(&GameRecord::new(5, "Portal", ["Puzzle", "Sci-fi"])).unwrap();
        assert_eq!(store.genres_of(5).unwrap(), "puzzle,sci-fi");
        assert_eq!(store.genres_of(6).unwrap(), NO_GENRE_INFO);
        assert_eq!(store.genres_of(-1).unwrap(), NO_GENRE_INFO);
    }

    #[test]
    fn update_weight_keeps_other_columns() {
        let db = temp_db();
        let mut store = CatalogStore::new(&db, Table::Main);
        store.open().unwrap();
        store.insert(&GameRecord::new(5, "Portal", ["puzzle"])).unwrap();
        store.update_weight(5, 1.25).unwrap();
        let rec = store.get(5).unwrap().unwrap();
        assert_eq!(rec.weight, 1.25);
        assert_eq!(rec.title, "Portal");
    }

    #[test]
    fn clear_empties_only_its_table() {
        let db = temp_db();
        let mut main = CatalogStore::new(&db, Table::Main);
        let mut staging = CatalogStore::new(&db, Table::Staging);
        main.open().unwrap();
        staging.open().unwrap();
        main.insert(&GameRecord::new(1, "a", ["x"])).unwrap();
        staging.insert(&GameRecord::new(2, "b", ["y"])).unwrap();
        staging.clear().unwrap();
        assert_eq!(staging.row_count().unwrap(), 0);
        assert_eq!(main.row_count().unwrap(), 1);
        staging.insert(&GameRecord::new(2, "b", ["y"])).unwrap();
        assert_eq!(staging.row_count().unwrap(), 1);
    }

    #[test]
    fn negative_ids_are_rejected() {
        let db = temp_db();
        let mut store = CatalogStore::new(&db, Table::Main);
        store.open().unwrap();
        let err = store.insert(&GameRecord::new(-1, "bad", ["x"])).unwrap_err();
        assert!(matches!(err, IndexError::InvalidGameId(-1)));
    }
}
