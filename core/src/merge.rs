//! Streaming merge of the on-disk index with freshly built postings.
//!
//! The disk index is read one line at a time and never held in memory as a
//! whole. The merged result goes to a temp file next to the canonical index,
//! so the canonical file stays readable until the commit renames over it.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::posting::Posting;

/// Forward-only reader over a persisted index that enforces the file-wide
/// strictly-ascending tag order while it parses.
pub struct IndexReader<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    prev_tag: Option<String>,
}

impl<R: BufRead> IndexReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: Vec::new(), line_no: 0, prev_tag: None }
    }

    /// Next raw line, decoded. Bytes that are not UTF-8 make the line corrupt.
    fn read_line(&mut self) -> Option<Result<String>> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e.into())),
        }
        self.line_no += 1;
        Some(String::from_utf8(std::mem::take(&mut self.buf)).map_err(|e| IndexError::CorruptIndexLine {
            line_no: self.line_no,
            line: String::from_utf8_lossy(e.as_bytes()).trim_end().to_string(),
            reason: "invalid UTF-8",
        }))
    }
}

impl IndexReader<BufReader<File>> {
    /// Open an index file. A missing file reads as an empty index.
    pub fn open(path: &Path) -> Result<Option<Self>> {
        match File::open(path) {
            Ok(f) => Ok(Some(Self::new(BufReader::new(f)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: BufRead> Iterator for IndexReader<R> {
    type Item = Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.read_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            let line = line.trim_end_matches(&['\n', '\r'][..]);
            if line.trim().is_empty() {
                continue;
            }
            let posting = match Posting::parse_line(line, self.line_no) {
                Ok(p) => p,
                Err(e) => return Some(Err(e)),
            };
            if let Some(prev) = &self.prev_tag {
                if posting.tag.as_str() <= prev.as_str() {
                    return Some(Err(IndexError::CorruptIndexLine {
                        line_no: self.line_no,
                        line: line.to_string(),
                        reason: "tags not strictly ascending",
                    }));
                }
            }
            self.prev_tag = Some(posting.tag.clone());
            return Some(Ok(posting));
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Tags only present in the new postings.
    pub added: usize,
    /// Tags present on both sides.
    pub merged: usize,
    /// Tags copied from disk unchanged.
    pub carried: usize,
    /// Ids that appeared on both sides of a merged tag and were kept once.
    pub duplicate_ids: usize,
}

impl MergeStats {
    pub fn tags_written(&self) -> usize {
        self.added + self.merged + self.carried
    }
}

/// Two-pointer merge of a sorted disk stream and sorted in-memory postings.
///
/// Any corrupt disk line aborts the merge; whatever was written to `out`
/// up to that point must be discarded by the caller.
pub fn merge_streams<R, W>(disk: IndexReader<R>, new: &[Posting], out: &mut W) -> Result<MergeStats>
where
    R: BufRead,
    W: Write,
{
    debug_assert!(new.windows(2).all(|w| w[0].tag < w[1].tag), "new postings must be sorted by tag");

    let mut stats = MergeStats::default();
    let mut pending = new.iter().peekable();

    for disk_posting in disk {
        let mut disk_posting = disk_posting?;
        while let Some(p) = pending.next_if(|p| p.tag < disk_posting.tag) {
            writeln!(out, "{p}")?;
            stats.added += 1;
        }
        if let Some(p) = pending.next_if(|p| p.tag == disk_posting.tag) {
            stats.duplicate_ids += disk_posting.merge(p);
            stats.merged += 1;
        } else {
            stats.carried += 1;
        }
        writeln!(out, "{disk_posting}")?;
    }

    for p in pending {
        writeln!(out, "{p}")?;
        stats.added += 1;
    }
    Ok(stats)
}

/// Merge the index at `canonical` with `new` into `temp`, fsynced on success.
///
/// On failure the partial temp file is removed and `canonical` is untouched.
pub fn merge_into_temp(canonical: &Path, new: &[Posting], temp: &Path) -> Result<MergeStats> {
    let result = write_merged(canonical, new, temp);
    match &result {
        Ok(stats) => tracing::info!(
            temp = %temp.display(),
            added = stats.added,
            merged = stats.merged,
            carried = stats.carried,
            "merged index into temp file"
        ),
        Err(e) => {
            tracing::error!(error = %e, temp = %temp.display(), "index merge failed");
            if let Err(rm) = fs::remove_file(temp) {
                if rm.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(error = %rm, "could not remove partial temp index");
                }
            }
        }
    }
    result
}

fn write_merged(canonical: &Path, new: &[Posting], temp: &Path) -> Result<MergeStats> {
    let file = File::create(temp)?;
    let mut out = BufWriter::new(file);
    let stats = match IndexReader::open(canonical)? {
        Some(reader) => merge_streams(reader, new, &mut out)?,
        None => merge_streams(IndexReader::new(io::empty()), new, &mut out)?,
    };
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(disk: &str, new: &[Posting]) -> Result<(String, MergeStats)> {
        let mut out = Vec::new();
        let stats = merge_streams(IndexReader::new(disk.as_bytes()), new, &mut out)?;
        Ok((String::from_utf8(out).unwrap(), stats))
    }

    fn posting(tag: &str, games: &[i64]) -> Posting {
        Posting { tag: tag.into(), games: games.to_vec() }
    }

    #[test]
    fn interleaves_new_merged_and_carried_tags() {
        let disk = "action:1,3\nrpg:2\n";
        let new = [posting("action", &[5]), posting("strategy", &[4])];
        let (merged, stats) = run(disk, &new).unwrap();
        assert_eq!(merged, "action:1,3,5\nrpg:2\nstrategy:4\n");
        assert_eq!(stats, MergeStats { added: 1, merged: 1, carried: 1, duplicate_ids: 0 });
    }

    #[test]
    fn new_tags_before_first_disk_tag_come_first() {
        let (merged, _) = run("rpg:2\n", &[posting("adventure", &[8]), posting("puzzle", &[6])]).unwrap();
        assert_eq!(merged, "adventure:8\npuzzle:6\nrpg:2\n");
    }

    #[test]
    fn empty_disk_emits_new_postings() {
        let (merged, stats) = run("", &[posting("indie", &[1, 2])]).unwrap();
        assert_eq!(merged, "indie:1,2\n");
        assert_eq!(stats.tags_written(), 1);
    }

    #[test]
    fn unsorted_disk_is_corruption() {
        let err = run("rpg:2\naction:1\n", &[]).unwrap_err();
        assert!(matches!(err, IndexError::CorruptIndexLine { line_no: 2, .. }));
    }

    #[test]
    fn duplicate_disk_tag_is_corruption() {
        let err = run("rpg:2\nrpg:3\n", &[]).unwrap_err();
        assert!(matches!(err, IndexError::CorruptIndexLine { line_no: 2, .. }));
    }

    #[test]
    fn non_utf8_disk_line_is_corruption() {
        let mut out = Vec::new();
        let disk: &[u8] = b"action:1\n\xff\xfe:2\n";
        let err = merge_streams(IndexReader::new(disk), &[], &mut out).unwrap_err();
        match err {
            IndexError::CorruptIndexLine { line_no, reason, .. } => {
                assert_eq!(line_no, 2);
                assert_eq!(reason, "invalid UTF-8");
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn crlf_line_endings_parse() {
        let (merged, _) = run("action:1\r\nrpg:2\r\n", &[]).unwrap();
        assert_eq!(merged, "action:1\nrpg:2\n");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let (merged, _) = run("action:1\n\nrpg:2\n", &[]).unwrap();
        assert_eq!(merged, "action:1\nrpg:2\n");
    }
}
