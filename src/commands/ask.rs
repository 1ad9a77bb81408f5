use futures::StreamExt;
use poise::CreateReply;
use tracing::{error, info, warn};

use super::{first_line, send_chunked};
use crate::agent::state::SourceRecord;
use crate::agent::StreamEvent;
use crate::state::Context;

/// Format the answer and its deduplicated `filename (p. N)` source list.
fn render_answer(mention: &str, question: &str, answer: &str, sources: &[SourceRecord]) -> String {
    let mut full = format!(
        "{} here's what I found:\n\n**Q:** {}\n\n**A:** {}",
        mention, question, answer
    );

    let mut cited: Vec<(&str, u32)> = Vec::new();
    for source in sources {
        let key = (source.filename.as_str(), source.page);
        if !cited.contains(&key) {
            cited.push(key);
        }
    }
    if !cited.is_empty() {
        full.push_str("\n\n**Sources:**\n");
        for (filename, page) in cited {
            full.push_str(&format!("- {} (p. {})\n", filename, page));
        }
    }
    full
}

/// Ask a question about the ingested documents
#[poise::command(slash_command, guild_only)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Your question"] question: String,
) -> Result<(), anyhow::Error> {
    let user_mention = format!("<@{}>", ctx.author().id);
    let progress = ctx
        .say(format!("Researching that for you, {}...", user_mention))
        .await?;

    let conversation = ctx.channel_id().get();
    let history = ctx.data().histories.get(conversation).await;
    let agent = ctx.data().orchestrator().await;

    info!(
        user = ctx.author().name,
        conversation,
        history_len = history.len(),
        question,
        "Query started"
    );

    let mut events = Box::pin(agent.run_stream(
        &question,
        &history,
        &ctx.author().name,
        &conversation.to_string(),
    ));
    let mut steps = 0u32;

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Thinking { content } => {
                steps += 1;
                let status = format!(
                    "Researching that for you, {}... (step {})\n> {}",
                    user_mention,
                    steps,
                    first_line(&content, 180)
                );
                if let Err(e) = progress
                    .edit(ctx, CreateReply::default().content(status))
                    .await
                {
                    warn!("Failed to update progress message: {}", e);
                }
            }
            StreamEvent::Final {
                response, sources, ..
            } => {
                info!(
                    steps,
                    answer_len = response.len(),
                    sources = sources.len(),
                    "Query complete"
                );
                ctx.data()
                    .histories
                    .record(conversation, &question, &response)
                    .await;
                let full = render_answer(&user_mention, &question, &response, &sources);
                return send_chunked(&ctx, &full).await;
            }
            StreamEvent::Error { content, .. } => {
                error!(steps, "Query failed: {}", content);
                ctx.say(format!(
                    "{} sorry, something went wrong while answering: {}",
                    user_mention, content
                ))
                .await?;
                return Ok(());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(filename: &str, page: u32, content: &str) -> SourceRecord {
        SourceRecord {
            filename: filename.to_string(),
            page,
            content: content.to_string(),
            chunk_id: None,
            chunk_index: None,
        }
    }

    #[test]
    fn test_render_answer_lists_each_page_once() {
        let sources = vec![
            source("policy.pdf", 4, "one"),
            source("faq.pdf", 1, "two"),
            source("policy.pdf", 4, "three"),
        ];
        let text = render_answer("<@1>", "Refunds?", "30 days.", &sources);
        assert!(text.starts_with("<@1> here's what I found:"));
        assert!(text.contains("**A:** 30 days."));
        assert!(text.ends_with("**Sources:**\n- policy.pdf (p. 4)\n- faq.pdf (p. 1)\n"));
    }

    #[test]
    fn test_render_answer_without_sources() {
        let text = render_answer("<@1>", "q", "There is no relevant information in the given data", &[]);
        assert!(!text.contains("Sources"));
    }
}
