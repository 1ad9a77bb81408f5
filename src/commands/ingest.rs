use poise::serenity_prelude as serenity;
use tracing::info;

use crate::docs::ingest as doc_ingest;
use crate::state::Context;

/// Attachments larger than this are refused before download.
const MAX_ATTACHMENT_BYTES: u32 = 10 * 1024 * 1024;

/// Ingest a text file, web page, or GitHub repository
#[poise::command(slash_command, guild_only)]
pub async fn ingest(
    ctx: Context<'_>,
    #[description = "Text file to upload"] file: Option<serenity::Attachment>,
    #[description = "URL (GitHub repo or web page)"] url: Option<String>,
    #[description = "Label for grouping documents"] label: Option<String>,
    #[description = "GitHub filter: documentation, code, minimal"] doc_type: Option<String>,
) -> Result<(), anyhow::Error> {
    ctx.defer().await?;

    let label = label.unwrap_or_else(|| "general".to_string());
    let store = &ctx.data().store;

    let summary = match (file, url) {
        (Some(file), _) => {
            if file.size > MAX_ATTACHMENT_BYTES {
                ctx.say(format!(
                    "**{}** is too large ({} bytes, limit {}).",
                    file.filename, file.size, MAX_ATTACHMENT_BYTES
                ))
                .await?;
                return Ok(());
            }
            info!(user = ctx.author().name, filename = file.filename, label, "Upload started");
            let bytes = file.download().await?;
            let meta = doc_ingest::ingest_upload(store, &bytes, &file.filename, &label).await?;
            format!(
                "Ingested **{}**: {} page(s), {} chunk(s)\nDoc ID: `{}`",
                meta.name, meta.pages, meta.chunks, meta.id
            )
        }
        (None, Some(url)) if url.contains("github.com") => {
            info!(user = ctx.author().name, url, label, "Repository ingestion started");
            let docs =
                doc_ingest::ingest_github_repo(store, &url, &label, doc_type.as_deref()).await?;
            let chunks: usize = docs.iter().map(|d| d.chunks).sum();
            format!(
                "Ingested **{}**: {} file(s), {} chunk(s)",
                url,
                docs.len(),
                chunks
            )
        }
        (None, Some(url)) => {
            info!(user = ctx.author().name, url, label, "URL ingestion started");
            let meta = doc_ingest::ingest_url(store, &url, &label).await?;
            format!(
                "Ingested **{}**: {} chunk(s)\nDoc ID: `{}`",
                meta.name, meta.chunks, meta.id
            )
        }
        (None, None) => {
            ctx.say("Attach a text file or give a `url` to ingest.").await?;
            return Ok(());
        }
    };

    ctx.say(format!("{} under label **'{}'**", summary, label))
        .await?;
    Ok(())
}
