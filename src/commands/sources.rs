use std::collections::BTreeMap;

use super::send_chunked;
use crate::docs::types::DocMeta;
use crate::state::Context;

fn render_listing(docs: &[DocMeta]) -> String {
    let mut by_label: BTreeMap<&str, Vec<&DocMeta>> = BTreeMap::new();
    for doc in docs {
        by_label.entry(doc.label.as_str()).or_default().push(doc);
    }

    let mut output = String::from("**Ingested Documents**\n\n");
    for (label, label_docs) in &by_label {
        output.push_str(&format!("**Label: {}**\n", label));
        for doc in label_docs {
            output.push_str(&format!(
                "  - {} ({} KB, {} pages, {} chunks) `{}`\n    Source: {}\n",
                doc.name,
                doc.size / 1024,
                doc.pages,
                doc.chunks,
                &doc.id[..doc.id.len().min(12)],
                doc.source
            ));
        }
        output.push('\n');
    }
    output
}

/// List ingested documents
#[poise::command(slash_command, guild_only)]
pub async fn sources(
    ctx: Context<'_>,
    #[description = "Max documents to show"] limit: Option<u32>,
) -> Result<(), anyhow::Error> {
    let limit = limit.unwrap_or(20) as usize;
    let docs = ctx.data().store.list(limit).await?;

    if docs.is_empty() {
        ctx.say("No documents ingested yet. Use `/docs ingest` to add some.")
            .await?;
        return Ok(());
    }

    send_chunked(&ctx, &render_listing(&docs)).await
}
