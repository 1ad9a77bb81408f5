use poise::serenity_prelude as serenity;
use tracing::info;

use crate::docs::types::DocMeta;
use crate::state::Context;

/// Start a new conversation in this channel (forgets earlier questions)
#[poise::command(slash_command, guild_only)]
pub async fn clear(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let cleared = ctx.data().histories.clear(ctx.channel_id().get()).await;
    if cleared {
        ctx.say("Conversation cleared.").await?;
    } else {
        ctx.say("Nothing to clear, this conversation is already empty.")
            .await?;
    }
    Ok(())
}

/// Create a thread with its own conversation
#[poise::command(slash_command, guild_only)]
pub async fn thread(
    ctx: Context<'_>,
    #[description = "Thread name"] name: Option<String>,
) -> Result<(), anyhow::Error> {
    let thread_name = name.unwrap_or_else(|| format!("Docs - {}", ctx.author().name));

    let thread = ctx
        .channel_id()
        .create_thread(
            ctx.http(),
            serenity::CreateThread::new(thread_name.clone())
                .kind(serenity::ChannelType::PublicThread),
        )
        .await?;

    ctx.say(format!(
        "Created thread: <#{}>. Questions asked there share one conversation.",
        thread.id
    ))
    .await?;
    Ok(())
}

/// Resolve a full or abbreviated document id to exactly one document.
fn find_by_prefix<'a>(docs: &'a [DocMeta], prefix: &str) -> Result<&'a DocMeta, String> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err("Give a document id.".to_string());
    }
    let matches: Vec<&DocMeta> = docs.iter().filter(|d| d.id.starts_with(prefix)).collect();
    match matches.as_slice() {
        [doc] => Ok(*doc),
        [] => Err(format!("No document with id `{}`.", prefix)),
        many => Err(format!(
            "`{}` matches {} documents, use a longer id.",
            prefix,
            many.len()
        )),
    }
}

/// Remove one document (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Document id (as shown by /docs sources)"] id: String,
) -> Result<(), anyhow::Error> {
    if !ctx.data().is_admin(ctx.author().id.get()) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    let docs = ctx.data().store.list(usize::MAX).await?;
    let doc = match find_by_prefix(&docs, &id) {
        Ok(doc) => doc.clone(),
        Err(msg) => {
            ctx.say(msg).await?;
            return Ok(());
        }
    };

    ctx.data().store.delete(&doc.id).await?;
    info!(user = ctx.author().name, doc_id = %doc.id, name = %doc.name, "Document removed");
    ctx.say(format!("Removed **{}** (`{}`).", doc.name, doc.id))
        .await?;
    Ok(())
}

/// Delete every document and conversation (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn reset(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    if !ctx.data().is_admin(ctx.author().id.get()) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    ctx.defer().await?;
    let removed = ctx.data().store.reset().await?;
    let conversations = ctx.data().histories.clear_all().await;
    info!(
        user = ctx.author().name,
        removed, conversations, "Knowledge base reset"
    );
    ctx.say(format!(
        "Knowledge base cleared: {} document(s) and {} conversation(s) removed.",
        removed, conversations
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> DocMeta {
        DocMeta {
            id: id.to_string(),
            name: format!("{}.txt", id),
            source: "upload".to_string(),
            label: "general".to_string(),
            size: 1,
            pages: 1,
            chunks: 1,
            ingested_at: 0,
        }
    }

    #[test]
    fn test_find_by_prefix() {
        let docs = vec![meta("abc123"), meta("abd456"), meta("ff0000")];
        assert_eq!(find_by_prefix(&docs, "abc").unwrap().id, "abc123");
        assert_eq!(find_by_prefix(&docs, " ff ").unwrap().id, "ff0000");
        assert!(find_by_prefix(&docs, "ab").unwrap_err().contains("matches 2"));
        assert!(find_by_prefix(&docs, "zz").unwrap_err().contains("No document"));
        assert!(find_by_prefix(&docs, "").is_err());
    }
}
