use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};

/// What the validator concludes when its own LLM call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorPolicy {
    /// Accept the candidate answer. Favors availability.
    AssumeValid,
    /// Count the failure as a rejected answer and retry.
    AssumeInvalid,
}

impl FromStr for ValidationErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "assume_valid" | "valid" => Ok(Self::AssumeValid),
            "assume_invalid" | "invalid" => Ok(Self::AssumeInvalid),
            other => anyhow::bail!(
                "unknown validation error policy '{}' (expected assume_valid or assume_invalid)",
                other
            ),
        }
    }
}

impl fmt::Display for ValidationErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssumeValid => write!(f, "assume_valid"),
            Self::AssumeInvalid => write!(f, "assume_invalid"),
        }
    }
}

/// Limits for one agent run (admins can modify at runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Failed validations tolerated before the fallback answer is returned.
    pub max_retries: u32,
    /// Past this many steps a reply without any marker is taken as final.
    pub soft_step_limit: u32,
    /// Hard ceiling on steps; retrieval is refused from here on.
    pub max_steps: u32,
    /// Candidates fetched from the vector index per search.
    pub top_k: usize,
    /// Passages kept after interleaving.
    pub max_results: usize,
    pub on_validation_error: ValidationErrorPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            soft_step_limit: 5,
            max_steps: 10,
            top_k: 10,
            max_results: 5,
            on_validation_error: ValidationErrorPolicy::AssumeValid,
        }
    }
}

fn env_parse<T>(keys: &[&str]) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    for key in keys {
        if let Ok(raw) = dotenv::var(key) {
            let value = raw
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{}", e))
                .with_context(|| format!("Invalid value for {}: {:?}", key, raw))?;
            return Ok(Some(value));
        }
    }
    Ok(None)
}

impl AgentConfig {
    /// Defaults overridden by whatever is set in the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_parse(&["MAX_RETRIES", "ITERATION_COUNT"])? {
            config.max_retries = v;
        }
        if let Some(v) = env_parse(&["SOFT_STEP_LIMIT"])? {
            config.soft_step_limit = v;
        }
        if let Some(v) = env_parse(&["MAX_STEPS"])? {
            config.max_steps = v;
        }
        if let Some(v) = env_parse(&["RETRIEVAL_TOP_K"])? {
            config.top_k = v;
        }
        if let Some(v) = env_parse(&["RETRIEVAL_MAX_RESULTS"])? {
            config.max_results = v;
        }
        if let Some(v) = env_parse(&["VALIDATION_ERROR_POLICY"])? {
            config.on_validation_error = v;
        }
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be at least 1");
        }
        if self.top_k == 0 || self.max_results == 0 {
            anyhow::bail!("top_k and max_results must be at least 1");
        }
        Ok(())
    }

    /// Set one field by name, as used by the `config` command.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn num<T: FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("`{}` expects a non-negative integer", key))
        }
        let mut next = self.clone();
        match key {
            "max_retries" => next.max_retries = num(key, value)?,
            "soft_step_limit" => next.soft_step_limit = num(key, value)?,
            "max_steps" => next.max_steps = num(key, value)?,
            "top_k" => next.top_k = num(key, value)?,
            "max_results" => next.max_results = num(key, value)?,
            "on_validation_error" => next.on_validation_error = value.parse()?,
            other => anyhow::bail!(
                "Unknown param `{}`. Valid: `max_retries`, `soft_step_limit`, `max_steps`, \
                `top_k`, `max_results`, `on_validation_error`",
                other
            ),
        }
        next.check()?;
        *self = next;
        Ok(())
    }
}
