//! Scripted collaborators for exercising the agent loop without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::docs::types::{HitMetadata, IndexHit};
use crate::docs::VectorIndex;
use crate::llm::{ChatModel, Message};

pub fn hit(source: &str, page: i64, text: &str) -> IndexHit {
    IndexHit {
        text: text.to_string(),
        metadata: HitMetadata {
            source: Some(source.to_string()),
            page: Some(page.into()),
            chunk_id: None,
            chunk_index: None,
        },
    }
}

/// Returns the same hits for every query and records each call.
pub struct FakeIndex {
    hits: Vec<IndexHit>,
    fail: bool,
    calls: Mutex<Vec<(String, usize)>>,
}

impl FakeIndex {
    pub fn new(hits: Vec<IndexHit>) -> Self {
        Self {
            hits,
            fail: false,
            calls: Mutex::new(vec![]),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<IndexHit>> {
        self.calls.lock().unwrap().push((query.to_string(), k));
        if self.fail {
            anyhow::bail!("index unavailable");
        }
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

/// Replies from a script, in order. `Err` entries simulate provider
/// failures. Running past the end of the script is an error.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(vec![]),
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => anyhow::bail!("script exhausted"),
        }
    }
}
