use tracing::{debug, info};

use crate::docs::VectorIndex;

use super::config::AgentConfig;
use super::prompts::{no_results_observation, FORCE_FINAL_PROMPT, INVALID_ACTION_OBSERVATION};
use super::retrieval::{self, RetrievedPassage};
use super::state::{ConversationState, Role};

fn passage_block(passage: &RetrievedPassage) -> String {
    format!(
        "[Source: {}, Page: {}]\n{}",
        passage.source_id, passage.page, passage.text
    )
}

/// Run a search action against the index and fold the results into the
/// state. Returns the message appended to the conversation.
///
/// This is the only place `sources` and `context` grow. A passage already
/// among the sources is shown to the agent again but not re-added.
pub async fn execute_search(
    index: &dyn VectorIndex,
    config: &AgentConfig,
    mut state: ConversationState,
    query: Option<&str>,
) -> (String, ConversationState) {
    let Some(query) = query else {
        debug!(step = state.step_count, "Malformed search action");
        state.push(Role::Observation, INVALID_ACTION_OBSERVATION);
        return (INVALID_ACTION_OBSERVATION.to_string(), state);
    };

    if state.step_count >= config.max_steps {
        info!(
            step = state.step_count,
            max_steps = config.max_steps,
            "Step ceiling reached, demanding final answer"
        );
        state.push(Role::System, FORCE_FINAL_PROMPT);
        return (FORCE_FINAL_PROMPT.to_string(), state);
    }

    let passages = retrieval::select(index, query, config.top_k, config.max_results).await;
    if passages.is_empty() {
        let observation = no_results_observation(query);
        state.push(Role::Observation, observation.clone());
        return (observation, state);
    }

    let mut added = 0;
    for passage in &passages {
        if state.add_source(passage.to_source()) {
            state.context.push_str(&passage_block(passage));
            state.context.push_str("\n\n");
            added += 1;
        }
    }
    info!(
        step = state.step_count,
        query,
        retrieved = passages.len(),
        added,
        total_sources = state.sources.len(),
        "Search executed"
    );

    let observation = format!(
        "Observation: Retrieved {} passage(s) for \"{}\":\n\n{}",
        passages.len(),
        query,
        passages
            .iter()
            .map(passage_block)
            .collect::<Vec<_>>()
            .join("\n\n")
    );
    state.push(Role::Observation, observation.clone());
    (observation, state)
}
