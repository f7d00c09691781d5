//! Similarity search over the stored index.
//!
//! Score is the plain dot product of query and stored embeddings. OpenAI embeddings
//! come back unit length, so this equals cosine similarity there; other providers
//! are scored as-is.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{DEFAULT_THRESHOLD, DEFAULT_TOP_K};
use crate::embedding::{EmbeddingBackend, EmbeddingClient, EmbeddingError};
use crate::store::{IndexStore, IndexedRecord, StoreError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Minimum score to keep. `None` keeps every record.
    pub threshold: Option<f32>,
    /// Maximum number of hits.
    pub top_n: usize,
    /// Score only records whose text contains the query verbatim. Falls back to all
    /// records when none match.
    pub keyword_filter: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threshold: Some(DEFAULT_THRESHOLD),
            top_n: DEFAULT_TOP_K,
            keyword_filter: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub conversation_id: String,
    pub segment_id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    /// Best first; equal scores keep index order.
    pub hits: Vec<SearchHit>,
    /// The keyword filter matched nothing and every record was scored instead.
    pub keyword_fallback: bool,
}

/// Embed `query` and rank the stored records against it.
pub async fn search<B: EmbeddingBackend>(
    query: &str,
    store: &IndexStore,
    client: &EmbeddingClient<B>,
    options: &SearchOptions,
) -> Result<SearchOutcome, SearchError> {
    info!(query, "searching");
    let records = store.load()?;
    if records.is_empty() {
        return Err(SearchError::IndexNotFound(store.path().to_path_buf()));
    }
    let query_embedding = client.embed_one(query).await?;
    rank(&records, query, &query_embedding, options)
}

/// Score, filter and order `records` for an already-embedded query.
pub fn rank(
    records: &[IndexedRecord],
    keyword: &str,
    query_embedding: &[f32],
    options: &SearchOptions,
) -> Result<SearchOutcome, SearchError> {
    if let Some(bad) = records
        .iter()
        .find(|r| r.embedding.len() != query_embedding.len())
    {
        return Err(SearchError::IndexCorrupt(format!(
            "conversation {} has {} dimensions but the query has {}; rebuild the index with the current model",
            bad.conversation_id,
            bad.embedding.len(),
            query_embedding.len()
        )));
    }

    let mut keyword_fallback = false;
    let mut candidates: Vec<&IndexedRecord> = records.iter().collect();
    if options.keyword_filter {
        let matching: Vec<&IndexedRecord> = records
            .iter()
            .filter(|r| r.text.contains(keyword))
            .collect();
        if matching.is_empty() {
            warn!(keyword, "no record contains the keyword, scoring all records");
            keyword_fallback = true;
        } else {
            candidates = matching;
        }
    }

    let mut scored: Vec<(&IndexedRecord, f32)> = candidates
        .into_iter()
        .map(|r| (r, dot(&r.embedding, query_embedding)))
        .filter(|(_, score)| options.threshold.map_or(true, |t| *score >= t))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(options.top_n);

    Ok(SearchOutcome {
        hits: scored
            .into_iter()
            .map(|(r, score)| SearchHit {
                conversation_id: r.conversation_id.clone(),
                segment_id: r.segment_id.clone(),
                text: r.text.clone(),
                score,
            })
            .collect(),
        keyword_fallback,
    })
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("no index at {0}; build it first")]
    IndexNotFound(PathBuf),
    #[error("index is corrupt: {0}")]
    IndexCorrupt(String),
    #[error("index store error: {0}")]
    Store(StoreError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl From<StoreError> for SearchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { .. } => SearchError::IndexCorrupt(e.to_string()),
            other => SearchError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::fake::FakeBackend;

    fn rec(id: &str, text: &str, embedding: Vec<f32>) -> IndexedRecord {
        IndexedRecord {
            conversation_id: id.into(),
            segment_id: format!("{id}-n"),
            text: text.into(),
            embedding,
        }
    }

    fn scored_records() -> Vec<IndexedRecord> {
        vec![
            rec("a", "rust borrow checker", vec![0.9, 0.3]),
            rec("b", "bread baking", vec![0.5, 0.7]),
            rec("c", "rust lifetimes", vec![0.95, 0.1]),
        ]
    }

    fn ids(outcome: &SearchOutcome) -> Vec<&str> {
        outcome.hits.iter().map(|h| h.conversation_id.as_str()).collect()
    }

    const QUERY: [f32; 2] = [1.0, 0.0];

    #[test]
    fn threshold_filters_and_orders() {
        let options = SearchOptions {
            threshold: Some(0.8),
            top_n: 5,
            keyword_filter: false,
        };
        let out = rank(&scored_records(), "rust", &QUERY, &options).unwrap();
        assert_eq!(ids(&out), ["c", "a"]);
        assert!((out.hits[0].score - 0.95).abs() < 1e-6);
        assert!((out.hits[1].score - 0.9).abs() < 1e-6);
        assert!(!out.keyword_fallback);
    }

    #[test]
    fn no_threshold_keeps_everything_up_to_top_n() {
        let mut options = SearchOptions {
            threshold: None,
            top_n: 5,
            keyword_filter: false,
        };
        let out = rank(&scored_records(), "x", &QUERY, &options).unwrap();
        assert_eq!(ids(&out), ["c", "a", "b"]);

        options.top_n = 2;
        let out = rank(&scored_records(), "x", &QUERY, &options).unwrap();
        assert_eq!(ids(&out), ["c", "a"]);
    }

    #[test]
    fn zero_top_n_is_empty() {
        let options = SearchOptions {
            threshold: None,
            top_n: 0,
            keyword_filter: false,
        };
        assert!(rank(&scored_records(), "x", &QUERY, &options).unwrap().hits.is_empty());
    }

    #[test]
    fn ties_keep_store_order() {
        let records = vec![
            rec("first", "t", vec![0.5, 0.0]),
            rec("best", "t", vec![0.9, 0.0]),
            rec("second", "t", vec![0.5, 0.0]),
        ];
        let options = SearchOptions {
            threshold: None,
            ..SearchOptions::default()
        };
        let out = rank(&records, "t", &QUERY, &options).unwrap();
        assert_eq!(ids(&out), ["best", "first", "second"]);
    }

    #[test]
    fn keyword_filter_restricts_candidates() {
        let options = SearchOptions {
            threshold: None,
            top_n: 5,
            keyword_filter: true,
        };
        let out = rank(&scored_records(), "bread", &QUERY, &options).unwrap();
        assert_eq!(ids(&out), ["b"]);
        assert!(!out.keyword_fallback);
    }

    #[test]
    fn keyword_filter_falls_back_when_nothing_matches() {
        let options = SearchOptions {
            threshold: Some(0.8),
            top_n: 5,
            keyword_filter: true,
        };
        let out = rank(&scored_records(), "kubernetes", &QUERY, &options).unwrap();
        assert_eq!(ids(&out), ["c", "a"]);
        assert!(out.keyword_fallback);
    }

    #[test]
    fn dimension_mismatch_is_corrupt() {
        let err = rank(&scored_records(), "x", &[1.0, 0.0, 0.0], &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, SearchError::IndexCorrupt(_)));
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("chatindex.csv"));
        let client = EmbeddingClient::new(FakeBackend::new()).unwrap();
        let err = search("rust", &store, &client, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::IndexNotFound(_)));
        assert!(client.backend().calls().is_empty());
    }

    #[tokio::test]
    async fn empty_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("chatindex.csv"));
        store.save(&[]).unwrap();
        let client = EmbeddingClient::new(FakeBackend::new()).unwrap();
        let err = search("rust", &store, &client, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn search_embeds_query_and_ranks_stored_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path().join("chatindex.csv"));
        store.save(&scored_records()).unwrap();
        let client = EmbeddingClient::new(FakeBackend::new().with_vector("rust", QUERY.to_vec()))
            .unwrap();
        let out = search("rust", &store, &client, &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(ids(&out), ["c", "a"]);
        assert_eq!(client.backend().calls(), vec![vec!["rust".to_string()]]);
    }

    #[tokio::test]
    async fn corrupt_file_surfaces_as_index_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatindex.csv");
        std::fs::write(&path, "conversation_id|section_id|text|embedding\na|n|t|nope\n").unwrap();
        let client = EmbeddingClient::new(FakeBackend::new()).unwrap();
        let err = search("rust", &IndexStore::new(&path), &client, &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::IndexCorrupt(_)));
    }

    #[tokio::test]
    async fn malformed_rows_surface_as_index_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let client = EmbeddingClient::new(FakeBackend::new()).unwrap();
        for (name, contents) in [
            ("short.csv", "conversation_id|section_id|text|embedding\na|n|[0.1]\n"),
            ("header.csv", "chat_id|section_id|text|embeddings\na|n|t|[0.1]\n"),
        ] {
            let path = dir.path().join(name);
            std::fs::write(&path, contents).unwrap();
            let err = search("rust", &IndexStore::new(&path), &client, &SearchOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, SearchError::IndexCorrupt(_)), "{name}: {err:?}");
        }
        assert!(client.backend().calls().is_empty());
    }
}
