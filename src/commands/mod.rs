mod ask;
mod config;
mod ingest;
mod manage;
mod sources;

use crate::state::Context;

/// Discord rejects messages over 2000 chars.
const MESSAGE_LIMIT: usize = 1990;

/// Docs - answers grounded in your uploaded documents
#[poise::command(
    slash_command,
    subcommands(
        "ask::ask",
        "ingest::ingest",
        "sources::sources",
        "manage::clear",
        "manage::thread",
        "manage::remove",
        "manage::reset",
        "config::config"
    )
)]
pub async fn docs(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Split text into pieces of at most `limit` bytes, preferring to break after
/// a newline, then after a space. Never splits inside a UTF-8 sequence.
fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= limit {
            pieces.push(remaining);
            break;
        }
        let mut end = limit;
        while !remaining.is_char_boundary(end) {
            end -= 1;
        }
        let window = &remaining[..end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|i| i + 1)
            .unwrap_or(end)
            .max(1);
        let split_at = if remaining.is_char_boundary(split_at) {
            split_at
        } else {
            end
        };
        pieces.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    pieces
}

/// Send a message in Discord-safe chunks. Every chunk goes through ctx.say()
/// so follow-ups use the interaction webhook, which doesn't require the
/// Send Messages channel permission.
async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    for chunk in split_message(text, MESSAGE_LIMIT) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

/// First line of `text`, cut to at most `max_chars` characters.
fn first_line(text: &str, max_chars: usize) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}
