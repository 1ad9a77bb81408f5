use anyhow::{Context, Result};
use tracing::debug;

use crate::llm::ChatModel;

use super::prompts::SYSTEM_PROMPT;
use super::state::{ConversationState, Role, Turn};

fn has_instruction_head(state: &ConversationState) -> bool {
    matches!(
        state.messages.first(),
        Some(Turn { role: Role::System, content }) if content == SYSTEM_PROMPT
    )
}

/// One LLM turn: make sure the instruction contract heads the conversation,
/// replay the whole conversation, and append the reply.
///
/// Errors from the model are not retried here; they end the run.
pub async fn agent_step(
    llm: &dyn ChatModel,
    mut state: ConversationState,
) -> Result<(String, ConversationState)> {
    if !has_instruction_head(&state) {
        state.messages.insert(0, Turn::new(Role::System, SYSTEM_PROMPT));
    }

    let step = state.step_count + 1;
    let reply = llm
        .complete(&state.wire_messages())
        .await
        .with_context(|| format!("LLM call failed at step {}", step))?;

    debug!(step, reply_len = reply.len(), "─── Agent Reply ───");
    for line in reply.lines().take(20) {
        debug!("  │ {}", line);
    }

    state.push(Role::Assistant, reply.clone());
    state.step_count = step;
    Ok((reply, state))
}
