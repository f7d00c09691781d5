//! Index pipeline: extract → diff against the stored index → embed only what's new →
//! merge → write.

use std::path::Path;

use tracing::info;

use crate::embedding::{EmbeddingBackend, EmbeddingClient, EmbeddingError};
use crate::export::{extract_segments, read_export, Conversation, ParseError};
use crate::store::{diff, merge, IndexStore, IndexedRecord, StoreError};

/// Outcome of one indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    /// Records in the index after the run.
    pub total: usize,
    /// Records embedded during this run.
    pub newly_indexed: usize,
}

/// Read an export file and index it.
pub async fn build_index_from_file<B: EmbeddingBackend>(
    export_path: &Path,
    store: &IndexStore,
    client: &EmbeddingClient<B>,
) -> Result<IndexSummary, IndexError> {
    let conversations = read_export(export_path)?;
    build_index(&conversations, store, client).await
}

/// Add conversations to the index, embedding only conversations not indexed yet.
///
/// Already-indexed conversations are never re-embedded, even if their text changed.
/// Nothing is written unless every embedding request succeeds.
pub async fn build_index<B: EmbeddingBackend>(
    conversations: &[Conversation],
    store: &IndexStore,
    client: &EmbeddingClient<B>,
) -> Result<IndexSummary, IndexError> {
    let segments = extract_segments(conversations);
    info!(segments = segments.len(), "extracted segments from export");

    let existing = store.load()?;
    let candidates = diff(segments, &existing);
    if !existing.is_empty() && !candidates.is_empty() {
        info!(
            new = candidates.len(),
            "only generating embeddings for new conversations"
        );
    }

    let new_records: Vec<IndexedRecord> = if candidates.is_empty() {
        info!("no new conversations detected");
        Vec::new()
    } else {
        let texts: Vec<String> = candidates.iter().map(|s| s.text.clone()).collect();
        let embeddings = client.embed_many(&texts).await?;
        candidates
            .into_iter()
            .zip(embeddings)
            .map(|(segment, embedding)| IndexedRecord::from_segment(segment, embedding))
            .collect()
    };

    let newly_indexed = new_records.len();
    let records = merge(existing, new_records);
    store.save(&records)?;
    info!(
        total = records.len(),
        newly_indexed,
        path = %store.path().display(),
        "index written"
    );
    Ok(IndexSummary {
        total: records.len(),
        newly_indexed,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("could not read export: {0}")]
    Parse(#[from] ParseError),
    #[error("index store error: {0}")]
    Store(#[from] StoreError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}
