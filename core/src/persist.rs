use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};
use crate::index::TagWeights;
use crate::merge::IndexReader;
use crate::posting::Posting;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_games: usize,
    pub num_tags: usize,
    pub staged: usize,
    pub updated_at: String,
    pub version: u32,
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index(&self) -> PathBuf { self.root.join("index.backlog_buddy") }
    pub fn index_temp(&self) -> PathBuf { self.root.join("index_temp.backlog_buddy") }
    pub fn weights(&self) -> PathBuf { self.root.join("tag_idf.backlog_buddy") }
    pub fn weights_temp(&self) -> PathBuf { self.root.join("tag_idf_temp.backlog_buddy") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn meta_temp(&self) -> PathBuf { self.root.join("meta.json.tmp") }
    pub fn catalog_dir(&self) -> PathBuf { self.root.join("catalog") }
}

/// Rename `temp` over `target` and sync the parent directory so the rename
/// itself is durable. Readers see either the old or the new file, never a mix.
pub fn replace_file(temp: &Path, target: &Path) -> Result<()> {
    fs::rename(temp, target)?;
    sync_parent(target);
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent() {
        let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            tracing::warn!(error = %e, dir = %dir.display(), "could not sync directory after rename");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

/// Write `lines` to `temp`, fsync it, then atomically replace `target`.
pub fn write_lines_atomic<I, D>(temp: &Path, target: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = D>,
    D: std::fmt::Display,
{
    let mut out = BufWriter::new(File::create(temp)?);
    for line in lines {
        writeln!(out, "{line}")?;
    }
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    replace_file(temp, target)
}

/// Parse a whole index file, enforcing its sort invariants.
/// A missing file is an empty index.
pub fn load_index(path: &Path) -> Result<Vec<Posting>> {
    match IndexReader::open(path)? {
        Some(reader) => reader.collect(),
        None => Ok(Vec::new()),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexSummary {
    pub tags: usize,
    pub postings: usize,
    pub distinct_games: usize,
}

/// Stream an index file and check that every tag and every id list is
/// strictly ascending.
pub fn verify_index(path: &Path) -> Result<IndexSummary> {
    let mut summary = IndexSummary::default();
    let mut games = std::collections::HashSet::new();
    if let Some(reader) = IndexReader::open(path)? {
        for posting in reader {
            let posting = posting?;
            summary.tags += 1;
            summary.postings += posting.df();
            games.extend(posting.games);
        }
    }
    summary.distinct_games = games.len();
    Ok(summary)
}

/// Parse a `tag:idf` weight file. A missing file is an empty table.
pub fn load_weights(path: &Path) -> Result<TagWeights> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TagWeights::new()),
        Err(e) => return Err(e.into()),
    };
    let mut weights = TagWeights::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let corrupt = |reason: &'static str| IndexError::CorruptWeightLine { line_no: i + 1, line: line.clone(), reason };
        let (tag, idf) = line.split_once(':').ok_or_else(|| corrupt("missing ':' separator"))?;
        let idf: f64 = idf.trim().parse().map_err(|_| corrupt("unparseable idf"))?;
        weights.insert(tag.to_string(), idf);
    }
    Ok(weights)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    fs::create_dir_all(&paths.root)?;
    let json = serde_json::to_string_pretty(meta)?;
    write_lines_atomic(&paths.meta_temp(), &paths.meta(), [json])
}

pub fn load_meta(paths: &IndexPaths) -> Result<Option<MetaFile>> {
    match fs::read_to_string(paths.meta()) {
        Ok(buf) => Ok(Some(serde_json::from_str(&buf)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
