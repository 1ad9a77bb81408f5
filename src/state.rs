use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::agent::config::AgentConfig;
use crate::agent::Orchestrator;
use crate::docs::DocumentStore;
use crate::llm::{LlmClient, Message};

/// Chat turns kept per conversation; older turns are dropped first.
pub const MAX_HISTORY_TURNS: usize = 20;

/// Conversations kept in memory; the least recently used is evicted first.
pub const MAX_CONVERSATIONS: usize = 1000;

#[derive(Default)]
struct Histories {
    turns: HashMap<u64, Vec<Message>>,
    /// Conversation ids, least recently used first.
    recency: VecDeque<u64>,
}

impl Histories {
    fn touch(&mut self, conversation: u64) {
        self.recency.retain(|&c| c != conversation);
        self.recency.push_back(conversation);
    }

    fn forget(&mut self, conversation: u64) -> bool {
        self.recency.retain(|&c| c != conversation);
        self.turns.remove(&conversation).is_some()
    }
}

/// Per-conversation chat history, keyed by channel or thread id.
pub struct ChatHistories {
    inner: RwLock<Histories>,
    capacity: usize,
}

impl Default for ChatHistories {
    fn default() -> Self {
        Self::with_capacity(MAX_CONVERSATIONS)
    }
}

impl ChatHistories {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Histories::default()),
            capacity: capacity.max(1),
        }
    }

    pub async fn get(&self, conversation: u64) -> Vec<Message> {
        self.inner
            .read()
            .await
            .turns
            .get(&conversation)
            .cloned()
            .unwrap_or_default()
    }

    /// Record a completed question/answer exchange.
    pub async fn record(&self, conversation: u64, question: &str, answer: &str) {
        let mut inner = self.inner.write().await;
        inner.touch(conversation);
        let turns = inner.turns.entry(conversation).or_default();
        turns.push(Message::new("user", question));
        turns.push(Message::new("assistant", answer));
        if turns.len() > MAX_HISTORY_TURNS {
            let excess = turns.len() - MAX_HISTORY_TURNS;
            turns.drain(..excess);
        }

        while inner.turns.len() > self.capacity {
            let Some(oldest) = inner.recency.pop_front() else {
                break;
            };
            inner.turns.remove(&oldest);
            debug!(conversation = oldest, "Evicted idle conversation history");
        }
    }

    /// Returns whether there was anything to clear.
    pub async fn clear(&self, conversation: u64) -> bool {
        self.inner.write().await.forget(conversation)
    }

    pub async fn clear_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.turns.len();
        *inner = Histories::default();
        count
    }
}

pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub llm: Arc<LlmClient>,
    pub admin_ids: HashSet<u64>,
    pub agent_config: Arc<RwLock<AgentConfig>>,
    pub histories: ChatHistories,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Orchestrator bound to a snapshot of the current agent config.
    pub async fn orchestrator(&self) -> Orchestrator {
        let config = self.agent_config.read().await.clone();
        Orchestrator::new(self.llm.clone(), self.store.clone(), config)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
