mod agent;
mod commands;
mod docs;
mod llm;
mod state;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tokio::sync::RwLock;
use tracing::{error, info, Level};

use agent::config::AgentConfig;
use docs::DocumentStore;
use llm::LlmClient;
use state::{AppState, ChatHistories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    let _ = dotenv::dotenv();
    let token = dotenv::var("DISCORD_TOKEN").context("DISCORD_TOKEN required")?;
    let guild_id = dotenv::var("DISCORD_GUILD_ID")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(serenity::GuildId::new);

    // One client serves both chat completions and embeddings
    let llm_client = Arc::new(LlmClient::from_env()?);

    let data_dir = std::path::PathBuf::from(
        dotenv::var("DATA_DIR").unwrap_or_else(|_| "./data/docs".to_string()),
    );
    let store = Arc::new(DocumentStore::new(&data_dir, llm_client.clone()).await?);
    info!(path = %data_dir.display(), "Document store opened");

    let admin_ids = parse_admin_ids(&dotenv::var("ADMIN_USER_IDS").unwrap_or_default());
    info!(admins = admin_ids.len(), "Admin users configured");

    let agent_config = AgentConfig::from_env()?;
    info!(?agent_config, "Agent config loaded");

    let app_state = AppState {
        store,
        llm: llm_client,
        admin_ids,
        agent_config: Arc::new(RwLock::new(agent_config)),
        histories: ChatHistories::default(),
    };

    let intents =
        serenity::GatewayIntents::GUILDS | serenity::GatewayIntents::GUILD_MESSAGES;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::docs()],
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!(user = %ready.user.name, id = %ready.user.id, "Connected to Discord");

                let commands = &framework.options().commands;
                for cmd in commands {
                    let subs: Vec<&str> = cmd.subcommands.iter().map(|c| c.name.as_str()).collect();
                    info!(command = %cmd.name, subcommands = %subs.join(", "), "Registering command");
                }

                match guild_id {
                    Some(gid) => {
                        poise::builtins::register_in_guild(ctx, commands, gid).await?;
                        info!(guild = %gid, "Commands registered in guild");
                    }
                    None => {
                        poise::builtins::register_globally(ctx, commands).await?;
                        info!("Commands registered globally (may take up to an hour to appear)");
                    }
                }

                Ok(app_state)
            })
        })
        .build();

    info!("Starting grounded-qa bot");

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .context("Failed to create Discord client")?;

    if let Err(e) = client.start().await {
        error!("Discord client stopped: {}", e);
    }

    Ok(())
}

/// Comma-separated Discord user ids; entries that are not ids are ignored.
fn parse_admin_ids(raw: &str) -> HashSet<u64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .collect()
}
