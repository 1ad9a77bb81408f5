use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Text-completion service used by the agent loop.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// Embedding service used by the document store.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:1234/v1".to_string());
        let model =
            dotenv::var("LLM_MODEL").unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string());
        let embedding_model = dotenv::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "all-MiniLM-L6-v2".to_string());
        let api_key = dotenv::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            model,
            embedding_model,
            api_key,
        })
    }

    /// Resolve an OpenAI-style endpoint (`chat/completions`, `embeddings`) from the base URL.
    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base
            .strip_suffix("/chat/completions")
            .or_else(|| base.strip_suffix("/embeddings"))
            .unwrap_or(base);
        if base.ends_with("/v1") {
            format!("{}/{}", base, path)
        } else {
            format!("{}/v1/{}", base, path)
        }
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut req = self.client.post(self.endpoint(path)).json(body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.context("LLM request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read LLM response")?;
        if !status.is_success() {
            anyhow::bail!("LLM endpoint returned {}: {}", status, text);
        }
        serde_json::from_str(&text).context("Failed to parse LLM JSON")
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
            "max_tokens": 2048,
        });
        let json = self.post_json("chat/completions", &body).await?;

        // Extract content from choices[0].message.content (handle null)
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .unwrap_or("")
            .to_string();

        Ok(content)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.chat(messages).await
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": inputs,
        });
        let json = self.post_json("embeddings", &body).await?;

        #[derive(Deserialize)]
        struct Item {
            index: usize,
            embedding: Vec<f32>,
        }
        let mut items: Vec<Item> = serde_json::from_value(json["data"].clone())
            .context("Malformed embeddings response")?;
        items.sort_by_key(|i| i.index);
        if items.len() != inputs.len() {
            anyhow::bail!(
                "embedding count mismatch: sent {}, got {}",
                inputs.len(),
                items.len()
            );
        }
        Ok(items.into_iter().map(|i| i.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> LlmClient {
        LlmClient {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            model: "m".to_string(),
            embedding_model: "e".to_string(),
            api_key: None,
        }
    }

    #[test]
    fn test_endpoint_resolution() {
        let c = client("http://localhost:1234/v1/");
        assert_eq!(
            c.endpoint("chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(c.endpoint("embeddings"), "http://localhost:1234/v1/embeddings");

        let c = client("https://api.groq.com/openai/v1/chat/completions");
        assert_eq!(
            c.endpoint("embeddings"),
            "https://api.groq.com/openai/v1/embeddings"
        );

        let c = client("http://ollama:11434");
        assert_eq!(
            c.endpoint("chat/completions"),
            "http://ollama:11434/v1/chat/completions"
        );
    }
}
