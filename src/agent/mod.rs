//! Agentic retrieval loop: the agent searches the corpus until it commits to
//! an answer, and the answer is only returned once a grounding check passes.
//!
//! ```text
//! AGENT ──search──▶ TOOL ──▶ AGENT
//!   ├──final/unparseable──▶ VALIDATE ──valid──▶ done
//!   │                           ├──retries left──▶ AGENT
//!   │                           └──exhausted──▶ done (fallback)
//!   └──search past ceiling──▶ rejected without grading, as above
//! ```

pub mod action;
pub mod config;
pub mod prompts;
pub mod retrieval;
pub mod state;
pub mod step;
pub mod tools;
pub mod validate;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use futures::stream::{self, Stream};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::docs::VectorIndex;
use crate::llm::{ChatModel, Message};

use action::Action;
use config::AgentConfig;
use prompts::{FALLBACK_ANSWER, REJECTED_ANSWER_OBSERVATION};
use state::{ConversationState, Role, SourceRecord};

/// Progress of a run, as seen by a streaming caller. Every run ends with
/// exactly one `Final` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// An agent reply, an observation, or a rejection notice.
    Thinking { content: String },
    Final {
        response: String,
        sources: Vec<SourceRecord>,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Error {
        content: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Thinking { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<SourceRecord>,
    pub conversation_id: String,
}

/// Answers questions against a document index. Cheap to clone; every query
/// gets its own [`Run`] and nothing mutable is shared between runs.
#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn ChatModel>,
    index: Arc<dyn VectorIndex>,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn ChatModel>, index: Arc<dyn VectorIndex>, config: AgentConfig) -> Self {
        Self { llm, index, config }
    }

    /// Begin a run in the AGENT phase.
    pub fn start(
        &self,
        query: &str,
        history: &[Message],
        username: &str,
        conversation_id: &str,
    ) -> Run {
        info!(
            user = username,
            conversation_id,
            history_len = history.len(),
            "Agent run started"
        );
        Run {
            llm: self.llm.clone(),
            index: self.index.clone(),
            config: self.config.clone(),
            conversation_id: conversation_id.to_string(),
            state: ConversationState::new(query, history),
            phase: Phase::Agent,
        }
    }

    /// Drive a run to completion. Failures come back as an `Error: ...`
    /// response with no sources.
    pub async fn run(
        &self,
        query: &str,
        history: &[Message],
        username: &str,
        conversation_id: &str,
    ) -> ChatResponse {
        let mut run = self.start(query, history, username, conversation_id);
        loop {
            match run.advance().await {
                StreamEvent::Thinking { .. } => continue,
                StreamEvent::Final {
                    response,
                    sources,
                    conversation_id,
                } => {
                    return ChatResponse {
                        response,
                        sources,
                        conversation_id,
                    }
                }
                StreamEvent::Error {
                    content,
                    conversation_id,
                } => {
                    return ChatResponse {
                        response: format!("Error: {}", content),
                        sources: vec![],
                        conversation_id,
                    }
                }
            }
        }
    }

    /// Lazy event stream over the same state machine as [`Orchestrator::run`].
    /// Nothing runs until the stream is polled; dropping it stops the run
    /// between steps.
    pub fn run_stream(
        &self,
        query: &str,
        history: &[Message],
        username: &str,
        conversation_id: &str,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let run = self.start(query, history, username, conversation_id);
        stream::unfold(Some(run), |run| async move {
            let mut run = run?;
            let event = run.advance().await;
            let next = if event.is_terminal() { None } else { Some(run) };
            Some((event, next))
        })
    }
}

#[derive(Debug)]
enum Phase {
    Agent,
    Act(Action),
    Done,
}

/// One query's pass through the loop. Each [`Run::advance`] performs a
/// single transition and reports it.
pub struct Run {
    llm: Arc<dyn ChatModel>,
    index: Arc<dyn VectorIndex>,
    config: AgentConfig,
    conversation_id: String,
    state: ConversationState,
    phase: Phase,
}

impl Run {
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    fn finish(&mut self) -> StreamEvent {
        self.phase = Phase::Done;
        StreamEvent::Final {
            response: self.state.final_answer.clone(),
            sources: self.state.sources.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }

    fn fail(&mut self, content: String) -> StreamEvent {
        self.phase = Phase::Done;
        StreamEvent::Error {
            content,
            conversation_id: self.conversation_id.clone(),
        }
    }

    /// Finish on an accepted answer, fall back once retries are spent,
    /// otherwise send the agent back with a rejection notice.
    fn after_verdict(&mut self) -> StreamEvent {
        if self.state.is_valid == Some(true) {
            info!(
                conversation_id = %self.conversation_id,
                steps = self.state.step_count,
                retries = self.state.retry_count,
                sources = self.state.sources.len(),
                "Agent run complete"
            );
            return self.finish();
        }

        if self.state.retry_count >= self.config.max_retries {
            warn!(
                conversation_id = %self.conversation_id,
                steps = self.state.step_count,
                retries = self.state.retry_count,
                "Retries exhausted, returning fallback answer"
            );
            self.state.final_answer = FALLBACK_ANSWER.to_string();
            self.state.sources.clear();
            return self.finish();
        }

        self.state.push(Role::Observation, REJECTED_ANSWER_OBSERVATION);
        self.phase = Phase::Agent;
        StreamEvent::Thinking {
            content: REJECTED_ANSWER_OBSERVATION.to_string(),
        }
    }

    pub async fn advance(&mut self) -> StreamEvent {
        let state = std::mem::take(&mut self.state);
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Agent => match step::agent_step(self.llm.as_ref(), state).await {
                Ok((reply, state)) => {
                    let action = Action::classify(&reply, state.step_count, &self.config);
                    debug!(
                        step = state.step_count,
                        action = action.kind(),
                        "Reply classified"
                    );
                    self.state = state;
                    self.phase = Phase::Act(action);
                    StreamEvent::Thinking { content: reply }
                }
                Err(e) => {
                    error!(conversation_id = %self.conversation_id, "Agent step failed: {:#}", e);
                    self.fail(format!("{:#}", e))
                }
            },

            Phase::Act(Action::Search(query)) => {
                let (observation, state) =
                    tools::execute_search(self.index.as_ref(), &self.config, state, query.as_deref())
                        .await;
                self.state = state;
                self.phase = Phase::Agent;
                StreamEvent::Thinking {
                    content: observation,
                }
            }

            Phase::Act(Action::Final(candidate)) | Phase::Act(Action::Unparseable(candidate)) => {
                self.state =
                    validate::validate(self.llm.as_ref(), &self.config, state, &candidate).await;
                self.after_verdict()
            }

            Phase::Act(Action::Overstep) => {
                self.state = state;
                self.state.is_valid = Some(false);
                self.state.retry_count += 1;
                info!(
                    conversation_id = %self.conversation_id,
                    step = self.state.step_count,
                    retry = self.state.retry_count,
                    "Search requested past the step ceiling, counted as rejected"
                );
                self.after_verdict()
            }

            Phase::Done => {
                self.state = state;
                self.fail("run already finished".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use crate::agent::testing::{hit, FakeIndex, ScriptedModel};

    fn orchestrator(
        llm: &Arc<ScriptedModel>,
        index: &Arc<FakeIndex>,
        config: AgentConfig,
    ) -> Orchestrator {
        Orchestrator::new(llm.clone(), index.clone(), config)
    }

    async fn drive(run: &mut Run) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while !run.is_done() {
            events.push(run.advance().await);
        }
        events
    }

    fn corpus() -> Arc<FakeIndex> {
        Arc::new(FakeIndex::new(vec![
            hit("policy.pdf", 4, "Refunds are issued within 30 days of purchase."),
            hit("faq.pdf", 1, "Contact support to start a refund."),
            hit("policy.pdf", 5, "Shipping fees are not refundable."),
        ]))
    }

    #[tokio::test]
    async fn test_search_then_validated_answer() {
        let llm = Arc::new(ScriptedModel::new([
            "I need the refund policy.\nAction: search(\"refund window\")",
            "Final Answer: Refunds are issued within 30 days of purchase.",
            "VALID",
        ]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let response = agent.run("How long do refunds take?", &[], "ana", "conv-1").await;

        assert_eq!(response.response, "Refunds are issued within 30 days of purchase.");
        assert_eq!(response.conversation_id, "conv-1");
        let files: Vec<&str> = response.sources.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(files, vec!["policy.pdf", "faq.pdf", "policy.pdf"]);
        assert_eq!(index.calls(), vec![("refund window".to_string(), 10)]);

        let grading = &llm.requests()[2][0].content;
        assert!(grading.contains("[Source: policy.pdf, Page: 4]"));
    }

    #[tokio::test]
    async fn test_stream_event_sequence() {
        let llm = Arc::new(ScriptedModel::new([
            "Action: search(\"refund\")",
            "Final Answer: Within 30 days.",
            "VALID",
        ]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let events: Vec<StreamEvent> = agent.run_stream("refunds?", &[], "ana", "c").collect().await;

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], StreamEvent::Thinking { content } if content.contains("Action: search")));
        assert!(matches!(&events[1], StreamEvent::Thinking { content } if content.starts_with("Observation:")));
        assert!(matches!(&events[2], StreamEvent::Thinking { .. }));
        assert!(matches!(&events[3], StreamEvent::Final { response, .. } if response == "Within 30 days."));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_immediate_final_rejected_with_single_retry_falls_back() {
        let llm = Arc::new(ScriptedModel::new(["Final Answer: Probably 90 days.", "INVALID"]));
        let index = corpus();
        let config = AgentConfig {
            max_retries: 1,
            ..AgentConfig::default()
        };
        let agent = orchestrator(&llm, &index, config);

        let mut run = agent.start("How long do refunds take?", &[], "ana", "c");
        let events = drive(&mut run).await;

        assert_eq!(
            events.last(),
            Some(&StreamEvent::Final {
                response: FALLBACK_ANSWER.to_string(),
                sources: vec![],
                conversation_id: "c".to_string(),
            })
        );
        assert_eq!(run.state().retry_count, 1);
        assert_eq!(run.state().step_count, 1);
        assert!(index.calls().is_empty());
        assert_eq!(llm.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_search_is_corrected_without_retrieval() {
        let llm = Arc::new(ScriptedModel::new([
            "Action: search(\"refund window)",
            "Action: search(\"refund window\")",
            "Final Answer: Within 30 days.",
            "VALID",
        ]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());
        let mut run = agent.start("refunds?", &[], "ana", "c");

        run.advance().await;
        assert_eq!(run.state().step_count, 1);
        let event = run.advance().await;

        assert_eq!(
            event,
            StreamEvent::Thinking {
                content: prompts::INVALID_ACTION_OBSERVATION.to_string()
            }
        );
        assert!(index.calls().is_empty());
        assert_eq!(run.state().step_count, 1);

        run.advance().await;
        assert_eq!(run.state().step_count, 2);

        let events = drive(&mut run).await;
        assert!(matches!(events.last(), Some(StreamEvent::Final { .. })));
        assert_eq!(index.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_step_ceiling_forces_final_answer_demand() {
        let mut script: Vec<String> = (0..10)
            .map(|i| format!("Action: search(\"query {}\")", i))
            .collect();
        script.push("Final Answer: Within 30 days.".to_string());
        script.push("VALID".to_string());
        let llm = Arc::new(ScriptedModel::new(script));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let response = agent.run("refunds?", &[], "ana", "c").await;

        assert_eq!(response.response, "Within 30 days.");
        assert_eq!(index.calls().len(), 9);
        let eleventh = &llm.requests()[10];
        let demand = &eleventh[eleventh.len() - 1];
        assert_eq!(demand.role, "system");
        assert_eq!(demand.content, prompts::FORCE_FINAL_PROMPT);
    }

    fn searches(n: usize) -> Vec<Result<String, String>> {
        (0..n)
            .map(|i| Ok(format!("Action: search(\"query {}\")", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_search_past_ceiling_falls_back_without_grading() {
        let llm = Arc::new(ScriptedModel::with_results(searches(11)));
        let index = corpus();
        let config = AgentConfig {
            max_retries: 1,
            ..AgentConfig::default()
        };
        let agent = orchestrator(&llm, &index, config);

        let mut run = agent.start("refunds?", &[], "ana", "c");
        let events = drive(&mut run).await;

        assert!(
            matches!(events.last(), Some(StreamEvent::Final { response, sources, .. }) if response == FALLBACK_ANSWER && sources.is_empty())
        );
        assert_eq!(run.state().step_count, 11);
        assert_eq!(run.state().retry_count, 1);
        assert_eq!(run.state().is_valid, Some(false));
        assert_eq!(llm.requests().len(), 11);
    }

    #[tokio::test]
    async fn test_search_past_ceiling_never_becomes_the_answer() {
        // Grader accepts, then grader fails under the default accept policy.
        for grader in [Ok("VALID".to_string()), Err("timeout".to_string())] {
            let mut script = searches(11);
            script.push(Ok("Final Answer: Within 30 days.".to_string()));
            script.push(grader);
            let llm = Arc::new(ScriptedModel::with_results(script));
            let index = corpus();
            let agent = orchestrator(&llm, &index, AgentConfig::default());

            let response = agent.run("refunds?", &[], "ana", "c").await;

            assert_eq!(response.response, "Within 30 days.");
            assert!(!response.response.contains("Action: search"));
            let twelfth = &llm.requests()[11];
            assert_eq!(
                twelfth.last().unwrap().content,
                REJECTED_ANSWER_OBSERVATION
            );
        }
    }

    #[tokio::test]
    async fn test_repeated_overstep_exhausts_retries() {
        let llm = Arc::new(ScriptedModel::with_results(searches(13)));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let response = agent.run("refunds?", &[], "ana", "c").await;

        assert_eq!(response.response, FALLBACK_ANSWER);
        assert!(response.sources.is_empty());
        assert_eq!(llm.requests().len(), 13);
    }

    #[tokio::test]
    async fn test_rejected_answer_retries_then_succeeds() {
        let llm = Arc::new(ScriptedModel::new([
            "Final Answer: 90 days.",
            "INVALID",
            "Action: search(\"refund\")",
            "Final Answer: 30 days.",
            "VALID",
        ]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let mut run = agent.start("refunds?", &[], "ana", "c");
        let events = drive(&mut run).await;

        assert!(events.contains(&StreamEvent::Thinking {
            content: REJECTED_ANSWER_OBSERVATION.to_string()
        }));
        assert_eq!(run.state().retry_count, 1);
        assert_eq!(run.state().is_valid, Some(true));
        assert!(matches!(events.last(), Some(StreamEvent::Final { response, .. }) if response == "30 days."));

        let third_turn = &llm.requests()[2];
        assert_eq!(third_turn.last().unwrap().content, REJECTED_ANSWER_OBSERVATION);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_clears_sources() {
        let llm = Arc::new(ScriptedModel::new([
            "Action: search(\"refund\")",
            "Final Answer: a",
            "INVALID",
            "Final Answer: b",
            "INVALID",
            "Final Answer: c",
            "INVALID",
        ]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let mut run = agent.start("refunds?", &[], "ana", "c");
        let events = drive(&mut run).await;

        assert_eq!(run.state().retry_count, 3);
        assert_eq!(run.state().final_answer, FALLBACK_ANSWER);
        assert!(run.state().sources.is_empty());
        assert!(matches!(events.last(), Some(StreamEvent::Final { sources, .. }) if sources.is_empty()));
    }

    #[tokio::test]
    async fn test_agent_failure_ends_run_with_error() {
        let llm = Arc::new(ScriptedModel::with_results([Err("quota exceeded".to_string())]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let response = agent.run("refunds?", &[], "ana", "c").await;
        assert!(response.response.starts_with("Error: "));
        assert!(response.response.contains("quota exceeded"));
        assert!(response.sources.is_empty());

        let llm = Arc::new(ScriptedModel::with_results([Err("quota exceeded".to_string())]));
        let agent = orchestrator(&llm, &index, AgentConfig::default());
        let events: Vec<StreamEvent> = agent.run_stream("refunds?", &[], "ana", "c").collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_validated_as_answer() {
        let llm = Arc::new(ScriptedModel::new(["Refunds take 30 days.", "VALID"]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let response = agent.run("refunds?", &[], "ana", "c").await;
        assert_eq!(response.response, "Refunds take 30 days.");
        assert!(response.sources.is_empty());
    }

    #[tokio::test]
    async fn test_grader_failure_accepts_by_default() {
        let llm = Arc::new(ScriptedModel::with_results([
            Ok("Final Answer: 30 days.".to_string()),
            Err("timeout".to_string()),
        ]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let response = agent.run("refunds?", &[], "ana", "c").await;
        assert_eq!(response.response, "30 days.");
    }

    #[tokio::test]
    async fn test_sources_never_duplicated_across_searches() {
        let llm = Arc::new(ScriptedModel::new([
            "Action: search(\"refund\")",
            "Action: search(\"refund policy\")",
            "Action: search(\"returns\")",
            "Final Answer: 30 days.",
            "VALID",
        ]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());

        let response = agent.run("refunds?", &[], "ana", "c").await;
        assert_eq!(response.sources.len(), 3);
        for (i, a) in response.sources.iter().enumerate() {
            for b in &response.sources[i + 1..] {
                assert!(
                    !(a.filename == b.filename && a.page == b.page && a.content == b.content),
                    "duplicate source {:?}",
                    a
                );
            }
        }
    }

    #[tokio::test]
    async fn test_history_is_replayed_before_query() {
        let llm = Arc::new(ScriptedModel::new(["Final Answer: Yes.", "VALID"]));
        let index = corpus();
        let agent = orchestrator(&llm, &index, AgentConfig::default());
        let history = vec![
            Message::new("user", "Do you know the refund policy?"),
            Message::new("assistant", "Refunds are issued within 30 days."),
        ];

        agent.run("Does that include shipping?", &history, "ana", "c").await;

        let first = &llm.requests()[0];
        let contents: Vec<&str> = first.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[0], prompts::SYSTEM_PROMPT);
        assert_eq!(
            &contents[1..],
            &[
                "Do you know the refund policy?",
                "Refunds are issued within 30 days.",
                "Does that include shipping?",
            ]
        );
    }

    #[test]
    fn test_event_wire_format() {
        let event = StreamEvent::Final {
            response: "ok".to_string(),
            sources: vec![SourceRecord {
                filename: "a.pdf".to_string(),
                page: 2,
                content: "text".to_string(),
                chunk_id: None,
                chunk_index: None,
            }],
            conversation_id: "c1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "type": "final",
                "response": "ok",
                "sources": [{"filename": "a.pdf", "page": 2, "content": "text"}],
                "conversationId": "c1",
            })
        );
        let thinking = StreamEvent::Thinking {
            content: "hmm".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&thinking).unwrap(),
            serde_json::json!({"type": "thinking", "content": "hmm"})
        );
    }
}
