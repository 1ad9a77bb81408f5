use std::collections::VecDeque;

use anyhow::{Context, Result};
use tracing::info;

use super::types::DocMeta;
use super::{DocumentStore, PreparedDocument};

pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;

/// Split points tried in order, coarsest first.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Split text into 1-based pages on form-feed boundaries. Blank pages are
/// dropped but keep their position in the numbering.
pub fn split_pages(text: &str) -> Vec<(u32, &str)> {
    text.split('\x0c')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| (i as u32 + 1, page))
        .collect()
}

/// Recursive character splitter: chunks of at most `chunk_size` chars,
/// consecutive chunks sharing up to `overlap` chars.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let pieces = atomize(text, chunk_size, SEPARATORS);

    let mut chunks = Vec::new();
    let mut window: VecDeque<(String, usize)> = VecDeque::new();
    let mut window_len = 0;

    for piece in pieces {
        let piece_len = piece.chars().count();
        if window_len + piece_len > chunk_size && !window.is_empty() {
            chunks.push(join(&window));
            while window_len > overlap || (window_len + piece_len > chunk_size && window_len > 0) {
                match window.pop_front() {
                    Some((_, len)) => window_len -= len,
                    None => break,
                }
            }
        }
        window_len += piece_len;
        window.push_back((piece, piece_len));
    }
    if !window.is_empty() {
        chunks.push(join(&window));
    }

    chunks.retain(|c| !c.is_empty());
    chunks
}

fn join(window: &VecDeque<(String, usize)>) -> String {
    window
        .iter()
        .map(|(s, _)| s.as_str())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Break text into pieces no longer than `size`, splitting on the coarsest
/// separator present. Separators stay attached to the preceding piece.
fn atomize(text: &str, size: usize, separators: &[&str]) -> Vec<String> {
    if text.chars().count() <= size {
        return vec![text.to_string()];
    }
    match separators.split_first() {
        Some((sep, rest)) if text.contains(sep) => text
            .split_inclusive(sep)
            .flat_map(|part| atomize(part, size, rest))
            .collect(),
        Some((_, rest)) => atomize(text, size, rest),
        None => {
            let chars: Vec<char> = text.chars().collect();
            chars.chunks(size.max(1)).map(|c| c.iter().collect()).collect()
        }
    }
}

/// Page-split and chunk a document's text.
pub fn prepare(text: String, name: &str, source: &str, label: &str) -> PreparedDocument {
    let chunks = split_pages(&text)
        .into_iter()
        .flat_map(|(page, page_text)| {
            split_text(page_text, CHUNK_SIZE, CHUNK_OVERLAP)
                .into_iter()
                .map(move |chunk| (page, chunk))
        })
        .collect();

    PreparedDocument {
        name: name.to_string(),
        source: source.to_string(),
        label: label.to_string(),
        text,
        chunks,
    }
}

/// Ingest an uploaded text file.
pub async fn ingest_upload(
    store: &DocumentStore,
    bytes: &[u8],
    filename: &str,
    label: &str,
) -> Result<DocMeta> {
    let text = std::str::from_utf8(bytes)
        .with_context(|| format!("{} is not UTF-8 text", filename))?
        .to_string();
    if text.trim().is_empty() {
        anyhow::bail!("No content extracted from {}", filename);
    }

    let meta = store
        .store_document(prepare(text, filename, "upload", label))
        .await?;
    info!(doc_id = %meta.id, filename, chunks = meta.chunks, label, "Upload ingested");
    Ok(meta)
}

/// Ingest a web page by fetching its content.
pub async fn ingest_url(store: &DocumentStore, url: &str, label: &str) -> Result<DocMeta> {
    let resp = reqwest::get(url).await.context("Failed to fetch URL")?;

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = resp.bytes().await.context("Failed to read response body")?;

    // Convert HTML to text if applicable
    let text = if content_type.contains("html") {
        html2text::from_read(&body[..], 120)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).to_string())
    } else {
        String::from_utf8_lossy(&body).to_string()
    };
    if text.trim().is_empty() {
        anyhow::bail!("No content extracted from {}", url);
    }

    let name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url);
    let source = format!("url:{}", url);
    let meta = store
        .store_document(prepare(text, name, &source, label))
        .await?;

    info!(doc_id = %meta.id, chunks = meta.chunks, label, "URL ingested");
    Ok(meta)
}

/// Split githem output into `(path, body)` sections on `=== path ===` header lines.
pub fn split_repo_sections(text: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.starts_with("=== ") && line.ends_with(" ===") && line.len() > 8 {
            let path = line.trim_start_matches("=== ").trim_end_matches(" ===");
            sections.push((path.to_string(), String::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    sections.retain(|(_, body)| !body.trim().is_empty());
    sections
}

/// Ingest a GitHub repository using githem-core. Every file becomes its own
/// document so citations name the file path.
pub async fn ingest_github_repo(
    store: &DocumentStore,
    url: &str,
    label: &str,
    doc_type: Option<&str>,
) -> Result<Vec<DocMeta>> {
    let _parsed = githem_core::parse_github_url(url).context("Invalid GitHub URL")?;

    let preset = match doc_type {
        Some("code") => githem_core::FilterPreset::CodeOnly,
        Some("minimal") => githem_core::FilterPreset::Minimal,
        _ => githem_core::FilterPreset::Standard,
    };
    let opts = githem_core::IngestOptions::with_preset(preset);

    // Cloning is blocking I/O
    let url_owned = url.to_string();
    let output = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let ingester = githem_core::Ingester::from_url_cached(&url_owned, opts)?;
        let mut output = Vec::new();
        ingester.ingest(&mut output)?;
        Ok(output)
    })
    .await
    .context("spawn_blocking join failed")??;

    let repo = url
        .trim_end_matches('/')
        .rsplit('/')
        .take(2)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("/");
    let source = format!("github:{}", repo);

    let text = String::from_utf8_lossy(&output);
    let mut stored = Vec::new();
    for (path, body) in split_repo_sections(&text) {
        stored.push(
            store
                .store_document(prepare(body, &path, &source, label))
                .await?,
        );
    }

    info!(repo = %repo, files = stored.len(), label, "GitHub repo ingested");
    Ok(stored)
}
