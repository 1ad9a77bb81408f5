//! Source-diverse passage selection on top of a vector index.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::docs::types::{HitMetadata, IndexHit};
use crate::docs::VectorIndex;

use super::state::SourceRecord;

const UNKNOWN_SOURCE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub text: String,
    pub source_id: String,
    /// 1-based.
    pub page: u32,
    pub raw_metadata: HitMetadata,
}

impl RetrievedPassage {
    pub fn to_source(&self) -> SourceRecord {
        SourceRecord {
            filename: self.source_id.clone(),
            page: self.page,
            content: self.text.clone(),
            chunk_id: self.raw_metadata.chunk_id.clone(),
            chunk_index: self.raw_metadata.chunk_index,
        }
    }
}

/// Coerce whatever page value the index stored into a 1-based page number.
/// Missing, non-numeric and non-positive values become page 1.
pub fn normalize_page(page: Option<&serde_json::Value>) -> u32 {
    let parsed = match page {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match parsed {
        Some(p) if p > 0 => u32::try_from(p).unwrap_or(u32::MAX),
        _ => 1,
    }
}

/// Round-robin across source documents (first hit of every source, then the
/// second, ...), truncate to `max_results`, then drop empty and duplicate
/// texts. Sources are visited in order of first appearance.
pub fn interleave(hits: Vec<IndexHit>, max_results: usize) -> Vec<RetrievedPassage> {
    let mut groups: Vec<(String, Vec<IndexHit>)> = Vec::new();
    for hit in hits {
        let source = hit
            .metadata
            .source
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
        match groups.iter_mut().find(|(s, _)| *s == source) {
            Some((_, group)) => group.push(hit),
            None => groups.push((source, vec![hit])),
        }
    }

    let depth = groups.iter().map(|(_, g)| g.len()).max().unwrap_or(0);
    let mut ordered = Vec::new();
    for round in 0..depth {
        for (source, group) in &groups {
            if let Some(hit) = group.get(round) {
                ordered.push((source.clone(), hit.clone()));
            }
        }
    }
    ordered.truncate(max_results);

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter_map(|(source_id, hit)| {
            let text = hit.text.trim();
            if text.is_empty() || !seen.insert(text.to_string()) {
                return None;
            }
            Some(RetrievedPassage {
                text: text.to_string(),
                page: normalize_page(hit.metadata.page.as_ref()),
                source_id,
                raw_metadata: hit.metadata,
            })
        })
        .collect()
}

/// Fetch `top_k` candidates for `query` and return at most `max_results`
/// diverse passages. Index failures degrade to an empty result.
pub async fn select(
    index: &dyn VectorIndex,
    query: &str,
    top_k: usize,
    max_results: usize,
) -> Vec<RetrievedPassage> {
    let hits = match index.search(query, top_k).await {
        Ok(hits) => hits,
        Err(e) => {
            warn!(query, "Vector index search failed: {:#}", e);
            return vec![];
        }
    };
    let fetched = hits.len();
    let passages = interleave(hits, max_results);
    debug!(query, fetched, kept = passages.len(), "Retrieval selected");
    passages
}
