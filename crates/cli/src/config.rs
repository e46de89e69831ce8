use anyhow::{Context, Result};
use extract::{LlmClient, LlmProvider, OllamaClient, OpenAiClient, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    /// Read from OPENAI_API_KEY; never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; RUST_LOG takes precedence.
    pub filter: String,
    pub json: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/extract.db"),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            api_key: None,
            request_timeout_secs: 120,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the optional TOML file, then environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(path) = lookup("DATA_EXTRACT_DB") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(model) = lookup("DATA_EXTRACT_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("DATA_EXTRACT_LLM_URL") {
            self.llm.base_url = url;
        }
        if let Some(provider) = lookup("DATA_EXTRACT_PROVIDER") {
            self.llm.provider = match provider.to_ascii_lowercase().as_str() {
                "openai" => LlmProvider::OpenAi,
                "ollama" => LlmProvider::Ollama,
                other => anyhow::bail!("Unknown DATA_EXTRACT_PROVIDER: {}", other),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            anyhow::bail!("database.path must not be empty");
        }
        if self.llm.request_timeout_secs == 0 {
            anyhow::bail!("llm.request_timeout_secs must be greater than zero");
        }
        if self.llm.provider == LlmProvider::OpenAi && self.llm.api_key.is_none() {
            anyhow::bail!("Missing required OpenAI API key (set OPENAI_API_KEY)");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }

    pub fn llm_client(&self) -> Result<LlmClient> {
        let timeout = Duration::from_secs(self.llm.request_timeout_secs);

        let client = match self.llm.provider {
            LlmProvider::OpenAi => {
                let api_key = self
                    .llm
                    .api_key
                    .clone()
                    .context("Missing required OpenAI API key (set OPENAI_API_KEY)")?;
                LlmClient::OpenAi(OpenAiClient::new(
                    self.llm.base_url.clone(),
                    self.llm.model.clone(),
                    api_key,
                    timeout,
                )?)
            }
            LlmProvider::Ollama => LlmClient::Ollama(OllamaClient::new(
                self.llm.base_url.clone(),
                self.llm.model.clone(),
                timeout,
            )?),
        };

        Ok(client)
    }
}
