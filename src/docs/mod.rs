pub mod ingest;
pub mod types;

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::llm::Embedder;
use types::{DocId, DocMeta, IndexHit, StoredChunk};

// Substore prefixes, registered with cnidarium at load time
const META_PREFIX: &str = "doc/meta";
const CHUNK_PREFIX: &str = "doc/chunk";

/// Embedding requests are batched to keep request bodies bounded.
const EMBED_BATCH: usize = 64;

fn meta_key(id: &str) -> String {
    format!("{}/{}", META_PREFIX, id)
}
fn chunk_key(id: &str, index: u32) -> String {
    format!("{}/{}/{:06}", CHUNK_PREFIX, id, index)
}

/// Nearest-neighbor search over the document corpus.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `k` passages for `query`, most relevant first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<IndexHit>>;
}

/// A document split into pages and chunks, ready to embed.
pub struct PreparedDocument {
    pub name: String,
    pub source: String,
    pub label: String,
    pub text: String,
    /// `(page, chunk text)` in document order.
    pub chunks: Vec<(u32, String)>,
}

pub struct DocumentStore {
    storage: Storage,
    embedder: Arc<dyn Embedder>,
    /// All chunks, loaded on first search and dropped on every write.
    chunk_cache: tokio::sync::RwLock<Option<Arc<Vec<StoredChunk>>>>,
}

impl DocumentStore {
    pub async fn new(data_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let prefixes = vec![META_PREFIX.to_string(), CHUNK_PREFIX.to_string()];
        let storage = Storage::load(data_dir.to_path_buf(), prefixes)
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self {
            storage,
            embedder,
            chunk_cache: tokio::sync::RwLock::new(None),
        })
    }

    async fn invalidate_cache(&self) {
        *self.chunk_cache.write().await = None;
    }

    /// Embed and store a prepared document. Idempotent: same content = same ID,
    /// and an already stored document is returned without re-embedding.
    pub async fn store_document(&self, doc: PreparedDocument) -> Result<DocMeta> {
        let id = blake3::hash(doc.text.as_bytes()).to_hex().to_string();
        if let Some(existing) = self.find_meta(&id).await? {
            debug!(doc_id = %id, name = %existing.name, "document already stored");
            return Ok(existing);
        }

        let texts: Vec<String> = doc.chunks.iter().map(|(_, t)| t.clone()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            embeddings.extend(
                self.embedder
                    .embed(batch)
                    .await
                    .context("Failed to embed document chunks")?,
            );
        }

        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);

        let mut pages = 0;
        for (index, ((page, text), embedding)) in doc.chunks.into_iter().zip(embeddings).enumerate()
        {
            let chunk_index = index as u32;
            let chunk_id = blake3::hash(format!("{}:{}:{}", id, chunk_index, text).as_bytes())
                .to_hex()
                .to_string();
            pages = pages.max(page);
            let chunk = StoredChunk {
                chunk_id,
                doc_id: id.clone(),
                filename: doc.name.clone(),
                page,
                chunk_index,
                text,
                embedding,
            };
            delta.put_raw(
                chunk_key(&id, chunk_index),
                serde_json::to_vec(&chunk).context("serialize chunk")?,
            );
        }

        let meta = DocMeta {
            id: id.clone(),
            name: doc.name,
            source: doc.source,
            label: doc.label,
            size: doc.text.len(),
            pages,
            chunks: texts.len(),
            ingested_at: chrono::Utc::now().timestamp(),
        };
        delta.put_raw(
            meta_key(&id),
            serde_json::to_vec(&meta).context("serialize meta")?,
        );

        self.storage.commit(delta).await?;
        self.invalidate_cache().await;
        info!(doc_id = %id, name = %meta.name, chunks = meta.chunks, pages, "document stored");
        Ok(meta)
    }

    /// `Ok(None)` only when the document is absent; read and decode
    /// failures are errors.
    pub async fn find_meta(&self, doc_id: &str) -> Result<Option<DocMeta>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&meta_key(doc_id)).await? else {
            return Ok(None);
        };
        let meta = serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt metadata for document {}", doc_id))?;
        Ok(Some(meta))
    }

    pub async fn get_meta(&self, doc_id: &str) -> Result<DocMeta> {
        self.find_meta(doc_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("document metadata not found: {}", doc_id))
    }

    /// List all documents, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<DocMeta>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(META_PREFIX);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((_key, value)) => {
                    if let Ok(meta) = serde_json::from_slice::<DocMeta>(&value) {
                        results.push(meta);
                    }
                }
                Err(e) => {
                    warn!("Error reading doc meta stream: {}", e);
                }
            }
        }

        results.sort_by(|a, b| b.ingested_at.cmp(&a.ingested_at));
        results.truncate(limit);
        Ok(results)
    }

    async fn keys_under(&self, prefix: &str) -> Result<Vec<String>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(prefix);
        let mut keys = Vec::new();
        while let Some(entry) = stream.next().await {
            let (key, _) = entry?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// Delete a document and all of its chunks.
    pub async fn delete(&self, doc_id: &DocId) -> Result<()> {
        self.get_meta(doc_id).await?;
        let chunk_keys = self
            .keys_under(&format!("{}/{}/", CHUNK_PREFIX, doc_id))
            .await?;

        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        for key in chunk_keys {
            delta.delete(key);
        }
        delta.delete(meta_key(doc_id));
        self.storage.commit(delta).await?;
        self.invalidate_cache().await;
        debug!(doc_id = %doc_id, "document deleted");
        Ok(())
    }

    /// Drop every document and chunk. Returns the number of documents removed.
    pub async fn reset(&self) -> Result<usize> {
        let meta_keys = self.keys_under(META_PREFIX).await?;
        let chunk_keys = self.keys_under(CHUNK_PREFIX).await?;
        let removed = meta_keys.len();

        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        for key in meta_keys.into_iter().chain(chunk_keys) {
            delta.delete(key);
        }
        self.storage.commit(delta).await?;
        self.invalidate_cache().await;
        info!(removed, "document store reset");
        Ok(removed)
    }

    async fn all_chunks(&self) -> Result<Arc<Vec<StoredChunk>>> {
        {
            let cache = self.chunk_cache.read().await;
            if let Some(chunks) = cache.as_ref() {
                return Ok(chunks.clone());
            }
        }

        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(CHUNK_PREFIX);
        let mut chunks = Vec::new();
        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, value)) => match serde_json::from_slice::<StoredChunk>(&value) {
                    Ok(chunk) => chunks.push(chunk),
                    Err(e) => warn!(key = %key, "Skipping undecodable chunk: {}", e),
                },
                Err(e) => warn!("Error reading chunk stream: {}", e),
            }
        }

        let chunks = Arc::new(chunks);
        *self.chunk_cache.write().await = Some(chunks.clone());
        Ok(chunks)
    }
}

#[async_trait]
impl VectorIndex for DocumentStore {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<IndexHit>> {
        let chunks = self.all_chunks().await?;
        if chunks.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .context("Embedding service returned no vector for query")?;

        Ok(rank(&query_embedding, &chunks, k)
            .into_iter()
            .map(IndexHit::from)
            .collect())
    }
}

/// Top-`k` chunks by cosine similarity. Ties keep storage order.
fn rank<'a>(query: &[f32], chunks: &'a [StoredChunk], k: usize) -> Vec<&'a StoredChunk> {
    let mut scored: Vec<(f32, &StoredChunk)> = chunks
        .iter()
        .map(|c| (cosine_similarity(query, &c.embedding), c))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.into_iter().take(k).map(|(_, c)| c).collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
