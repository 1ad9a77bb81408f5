use tracing::info;

use crate::agent::config::AgentConfig;
use crate::state::Context;

fn render_config(config: &AgentConfig) -> String {
    format!(
        "**Agent Configuration:**\n\
         `max_retries`: {}\n\
         `soft_step_limit`: {}\n\
         `max_steps`: {}\n\
         `top_k`: {}\n\
         `max_results`: {}\n\
         `on_validation_error`: {}",
        config.max_retries,
        config.soft_step_limit,
        config.max_steps,
        config.top_k,
        config.max_results,
        config.on_validation_error
    )
}

/// Configure agent limits (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn config(
    ctx: Context<'_>,
    #[description = "max_retries | soft_step_limit | max_steps | top_k | max_results | on_validation_error"]
    param: Option<String>,
    #[description = "New value"] value: Option<String>,
) -> Result<(), anyhow::Error> {
    let user_id = ctx.author().id.get();
    if !ctx.data().is_admin(user_id) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    match (param.as_deref(), value) {
        // Show current config
        (None, _) => {
            let config = ctx.data().agent_config.read().await.clone();
            ctx.say(render_config(&config)).await?;
        }
        // Set a parameter
        (Some(key), Some(val)) => {
            let result = ctx.data().agent_config.write().await.set(key, &val);
            match result {
                Ok(()) => {
                    info!(user = ctx.author().name, key, value = %val, "Agent config changed");
                    ctx.say(format!("`{}` set to {}", key, val)).await?;
                }
                Err(e) => {
                    ctx.say(format!("{}", e)).await?;
                }
            }
        }
        (Some(_), None) => {
            ctx.say("Provide both `param` and `value`. Example: `/docs config max_retries 2`")
                .await?;
        }
    }

    Ok(())
}
