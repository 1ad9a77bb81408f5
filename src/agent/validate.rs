use tracing::{info, warn};

use crate::llm::{ChatModel, Message};

use super::config::{AgentConfig, ValidationErrorPolicy};
use super::prompts::validation_prompt;
use super::state::ConversationState;

/// Read the grader's reply. `INVALID` anywhere rejects, otherwise `VALID`
/// anywhere accepts; a reply with neither rejects.
pub fn parse_verdict(reply: &str) -> bool {
    let upper = reply.to_uppercase();
    !upper.contains("INVALID") && upper.contains("VALID")
}

/// Ask the model whether `candidate` is grounded in the accumulated context.
///
/// Accepted: `is_valid = Some(true)` and `final_answer` holds the candidate.
/// Rejected: `is_valid = Some(false)` and `retry_count` goes up by one.
/// A failed grading call is resolved by `config.on_validation_error`.
pub async fn validate(
    llm: &dyn ChatModel,
    config: &AgentConfig,
    mut state: ConversationState,
    candidate: &str,
) -> ConversationState {
    let prompt = validation_prompt(&state.context, candidate);
    let valid = match llm.complete(&[Message::new("user", prompt)]).await {
        Ok(reply) => parse_verdict(&reply),
        Err(e) => {
            warn!(
                policy = %config.on_validation_error,
                "Validation call failed: {:#}",
                e
            );
            config.on_validation_error == ValidationErrorPolicy::AssumeValid
        }
    };

    if valid {
        state.is_valid = Some(true);
        state.final_answer = candidate.to_string();
        info!(
            step = state.step_count,
            sources = state.sources.len(),
            "Answer validated"
        );
    } else {
        state.is_valid = Some(false);
        state.retry_count += 1;
        info!(
            step = state.step_count,
            retry = state.retry_count,
            max_retries = config.max_retries,
            "Answer rejected by validation"
        );
    }
    state
}
