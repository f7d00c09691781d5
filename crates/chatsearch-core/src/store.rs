//! On-disk index of embedded segments: a pipe-delimited file with one row per record
//! (`conversation_id|section_id|text|embedding`), the embedding stored as a JSON array.
//!
//! The file is read whole and written whole. Concurrent writers are not coordinated;
//! the last one to finish wins.

use std::collections::HashSet;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::export::Segment;

/// A segment with its embedding. Never modified once written.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRecord {
    pub conversation_id: String,
    pub segment_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl IndexedRecord {
    pub fn from_segment(segment: Segment, embedding: Vec<f32>) -> Self {
        Self {
            conversation_id: segment.conversation_id,
            segment_id: segment.segment_id,
            text: segment.text,
            embedding,
        }
    }
}

const COLUMNS: [&str; 4] = ["conversation_id", "section_id", "text", "embedding"];

/// Column layout of the index file.
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    conversation_id: String,
    section_id: String,
    text: String,
    embedding: String,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read every record in file order. A missing file is an empty index.
    pub fn load(&self) -> Result<Vec<IndexedRecord>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(self.path.clone(), e)),
        };
        let now = Instant::now();
        let mut reader = csv::ReaderBuilder::new().delimiter(b'|').from_reader(file);

        let header = reader.headers().map_err(|e| self.read_error(e, 0))?;
        if header.is_empty() {
            return Ok(Vec::new());
        }
        if !header.iter().eq(COLUMNS) {
            return Err(StoreError::Corrupt {
                row: 0,
                reason: format!(
                    "header is `{}`, expected `{}`",
                    header.iter().collect::<Vec<_>>().join("|"),
                    COLUMNS.join("|")
                ),
            });
        }

        let mut records = Vec::new();
        let mut dim = None;
        for (i, row) in reader.deserialize::<Row>().enumerate() {
            let row_no = i + 1;
            let row = row.map_err(|e| self.read_error(e, row_no))?;
            let embedding: Vec<f32> =
                serde_json::from_str(&row.embedding).map_err(|e| StoreError::Corrupt {
                    row: row_no,
                    reason: format!("embedding is not a JSON array of numbers: {e}"),
                })?;
            if embedding.is_empty() {
                return Err(StoreError::Corrupt {
                    row: row_no,
                    reason: "embedding is empty".into(),
                });
            }
            match dim {
                None => dim = Some(embedding.len()),
                Some(d) if d != embedding.len() => {
                    return Err(StoreError::Corrupt {
                        row: row_no,
                        reason: format!("embedding has {} dimensions, expected {d}", embedding.len()),
                    })
                }
                Some(_) => {}
            }
            records.push(IndexedRecord {
                conversation_id: row.conversation_id,
                segment_id: row.section_id,
                text: row.text,
                embedding,
            });
        }
        debug!(
            records = records.len(),
            "took {}ms to read index",
            now.elapsed().as_micros() as f64 / 1000.0
        );
        Ok(records)
    }

    /// Replace the file with `records`. Writes a sibling temp file and renames it over
    /// the target, so readers never see a half-written index.
    pub fn save(&self, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let now = Instant::now();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }
        let temp_path = self.temp_path();
        let written = write_rows(&temp_path, records).and_then(|()| {
            std::fs::rename(&temp_path, &self.path).map_err(|e| StoreError::Io(self.path.clone(), e))
        });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }
        debug!(
            records = records.len(),
            "took {}ms to write index",
            now.elapsed().as_micros() as f64 / 1000.0
        );
        Ok(())
    }

    /// Malformed rows are corruption; only genuine read failures stay I/O errors.
    fn read_error(&self, e: csv::Error, row: usize) -> StoreError {
        let reason = e.to_string();
        match e.into_kind() {
            csv::ErrorKind::Io(io) => StoreError::Io(self.path.clone(), io),
            _ => StoreError::Corrupt { row, reason },
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_rows(path: &Path, records: &[IndexedRecord]) -> Result<(), StoreError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'|')
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.serialize(Row {
            conversation_id: record.conversation_id.clone(),
            section_id: record.segment_id.clone(),
            text: record.text.clone(),
            embedding: serde_json::to_string(&record.embedding)?,
        })?;
    }
    writer
        .flush()
        .map_err(|e| StoreError::Io(path.to_path_buf(), e))
}

/// Candidates whose identity key is not yet indexed, in candidate order.
///
/// The identity key is `conversation_id` alone; `segment_id` plays no part. Among
/// candidates sharing a key only the first is kept, so a conversation contributes
/// one record: its first non-empty text segment.
pub fn diff(candidates: Vec<Segment>, existing: &[IndexedRecord]) -> Vec<Segment> {
    let mut seen: HashSet<String> = existing
        .iter()
        .map(|r| r.conversation_id.clone())
        .collect();
    candidates
        .into_iter()
        .filter(|s| seen.insert(s.conversation_id.clone()))
        .collect()
}

/// Existing records followed by new ones. Existing records are kept as they are; a new
/// record whose key is already present is dropped.
pub fn merge(existing: Vec<IndexedRecord>, new: Vec<IndexedRecord>) -> Vec<IndexedRecord> {
    let mut seen: HashSet<String> = existing
        .iter()
        .map(|r| r.conversation_id.clone())
        .collect();
    let mut merged = existing;
    merged.extend(
        new.into_iter()
            .filter(|r| seen.insert(r.conversation_id.clone())),
    );
    merged
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("index file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to write index file: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to encode embedding: {0}")]
    Encode(#[from] serde_json::Error),
    /// `row` counts data rows from 1; 0 is the header.
    #[error("index row {row} is corrupt: {reason}")]
    Corrupt { row: usize, reason: String },
}
