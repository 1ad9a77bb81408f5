use serde::{Deserialize, Serialize};

/// Content-addressed document ID (blake3 hex hash).
pub type DocId = String;

/// Document metadata stored alongside its chunks in cnidarium.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMeta {
    pub id: DocId,
    /// Filename reported as the citation source.
    pub name: String,
    /// e.g. "upload", "github:owner/repo" or "url:https://..."
    pub source: String,
    pub label: String,
    pub size: usize,
    pub pages: u32,
    pub chunks: usize,
    pub ingested_at: i64,
}

/// One embedded passage of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub doc_id: DocId,
    pub filename: String,
    pub page: u32,
    pub chunk_index: u32,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Metadata attached to an index hit. `page` stays raw JSON: indexes are
/// not trusted to store it as a positive integer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitMetadata {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub page: Option<serde_json::Value>,
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub chunk_index: Option<u32>,
}

/// A nearest-neighbor result, most relevant first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub text: String,
    pub metadata: HitMetadata,
}

impl From<&StoredChunk> for IndexHit {
    fn from(chunk: &StoredChunk) -> Self {
        IndexHit {
            text: chunk.text.clone(),
            metadata: HitMetadata {
                source: Some(chunk.filename.clone()),
                page: Some(chunk.page.into()),
                chunk_id: Some(chunk.chunk_id.clone()),
                chunk_index: Some(chunk.chunk_index),
            },
        }
    }
}
