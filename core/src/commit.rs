//! Publishing a merged index and folding staging into the main catalog.
//!
//! The two steps are not transactional. A crash after [`replace_index`] but
//! before [`migrate_staging`] finishes leaves the index naming games that the
//! main catalog does not hold yet; staging still holds them, so the next cycle
//! re-indexes and migrates them (posting merge keeps each id once).

use std::path::Path;

use crate::catalog::CatalogStore;
use crate::error::{IndexError, Result};
use crate::index::GameId;
use crate::persist::replace_file;

/// Atomically replace the canonical index with the merged temp file.
pub fn replace_index(temp: &Path, canonical: &Path) -> Result<()> {
    replace_file(temp, canonical)?;
    tracing::info!(index = %canonical.display(), "published merged index");
    Ok(())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Migration {
    pub migrated: usize,
    /// Staged ids that already existed in the main catalog.
    pub skipped: Vec<GameId>,
}

/// Insert every staged record into `main`, then drop and recreate staging.
///
/// Both stores must be open. Ids already present in `main` are logged and
/// skipped; any other failure aborts before staging is cleared.
pub fn migrate_staging(staging: &mut CatalogStore, main: &CatalogStore) -> Result<Migration> {
    let mut migration = Migration::default();
    for record in staging.all_records()? {
        match main.insert(&record) {
            Ok(()) => migration.migrated += 1,
            Err(IndexError::DuplicateRecord { id }) => {
                tracing::warn!(id, title = %record.title, "game already in catalog, skipping");
                migration.skipped.push(id);
            }
            Err(e) => return Err(e),
        }
    }
    staging.clear()?;
    tracing::info!(migrated = migration.migrated, skipped = migration.skipped.len(), "migrated staging into catalog");
    Ok(migration)
}
