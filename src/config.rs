use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use std::fmt;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub ai: AiConfig,
    pub retrieval: RetrievalConfig,
    pub locks: LockConfig,
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from environment variables, with defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            // Override with environment variables using `DOCUCHAT` prefix and `__` separator
            // e.g., DOCUCHAT__DATABASE__USER="my_user" or DOCUCHAT__LOCKS__CONVERSATION_TIMEOUT_SECS
            .add_source(
                config::Environment::with_prefix("DOCUCHAT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;

        config.validate().map_err(|e| {
            config::ConfigError::Message(format!("Configuration validation failed: {}", e))
        })?;

        Ok(config)
    }

    /// Validates retrieval and concurrency settings that would otherwise
    /// fail in non-obvious ways at request time.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            return Err(format!(
                "DOCUCHAT__RETRIEVAL__CHUNK_OVERLAP ({}) must be smaller than chunk_size ({})",
                self.retrieval.chunk_overlap, self.retrieval.chunk_size
            )
            .into());
        }
        if self.retrieval.history_chunk_overlap >= self.retrieval.history_chunk_size {
            return Err(format!(
                "DOCUCHAT__RETRIEVAL__HISTORY_CHUNK_OVERLAP ({}) must be smaller than history_chunk_size ({})",
                self.retrieval.history_chunk_overlap, self.retrieval.history_chunk_size
            )
            .into());
        }
        if self.ai.local_max_parallel == 0 {
            return Err("DOCUCHAT__AI__LOCAL_MAX_PARALLEL must be at least 1".into());
        }
        if self.ai.embedding_dimension == 0 {
            return Err("DOCUCHAT__AI__EMBEDDING_DIMENSION must be at least 1".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub user: String,
    #[serde(skip_serializing)]
    pub password: SecretString,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl DatabaseConfig {
    /// Constructs the database connection string.
    pub fn connection_string(&self) -> SecretString {
        SecretString::from(format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user,
            self.password.expose_secret(),
            self.host,
            self.port,
            self.database
        ))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            user: "postgres".to_string(),
            password: "password".to_string().into(),
            host: "localhost".to_string(),
            port: 5432,
            database: "docuchat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host address to bind to (default: "0.0.0.0")
    pub host: String,
    /// Port to listen on (default: 3000)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct AiConfig {
    /// Base URL of the cloud chat-completions endpoint
    pub cloud_base_url: String,
    /// Default model for the cloud provider
    pub cloud_model: String,
    /// API key for the cloud provider
    #[serde(skip_serializing)]
    pub cloud_api_key: SecretString,
    /// Base URL of the local OpenAI-compatible server (e.g. Ollama)
    pub local_base_url: String,
    /// Model name served by the local server
    pub local_model: String,
    /// Context window (tokens) requested from the local server
    pub local_context_length: usize,
    /// Global cap on concurrent local-model calls across all conversations
    pub local_max_parallel: usize,
    /// Dimension of the embedding vectors; must match the pgvector column
    pub embedding_dimension: usize,
    /// Embedding profile assigned to new conversations
    pub default_embedding_profile: String,
    /// Approximate prompt budget (bytes of chunk text) for a single cloud call
    pub cloud_context_budget_bytes: usize,
    /// Approximate prompt budget (bytes of chunk text) for a single local call
    pub local_context_budget_bytes: usize,
    /// Flashcards requested per generation run
    pub flashcard_target: usize,
}

// Custom Debug implementation to redact secrets
impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("cloud_base_url", &self.cloud_base_url)
            .field("cloud_model", &self.cloud_model)
            .field("cloud_api_key", &"<REDACTED>")
            .field("local_base_url", &self.local_base_url)
            .field("local_model", &self.local_model)
            .field("local_context_length", &self.local_context_length)
            .field("local_max_parallel", &self.local_max_parallel)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("default_embedding_profile", &self.default_embedding_profile)
            .finish_non_exhaustive()
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            cloud_base_url: "https://api.openai.com/v1".to_string(),
            cloud_model: "gpt-4o-mini".to_string(),
            cloud_api_key: SecretString::from(String::new()),
            local_base_url: "http://127.0.0.1:11434".to_string(),
            local_model: "llama3:8b-instruct-q4_K_M".to_string(),
            local_context_length: 4096,
            local_max_parallel: 6,
            embedding_dimension: 384,
            default_embedding_profile: "custom".to_string(),
            cloud_context_budget_bytes: 30_000,
            local_context_budget_bytes: 8_000,
            flashcard_target: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Target chunk size in characters for document splitting
    pub chunk_size: usize,
    /// Overlap in characters between adjacent document chunks
    pub chunk_overlap: usize,
    /// Chunk size for the per-request chat-history index
    pub history_chunk_size: usize,
    /// Overlap for the chat-history index
    pub history_chunk_overlap: usize,
    /// Document chunks retrieved per turn in cloud mode
    pub cloud_doc_k: usize,
    /// Past Q/A units retrieved per turn in cloud mode
    pub cloud_chat_k: usize,
    /// Recent messages included verbatim in cloud mode
    pub cloud_recent: usize,
    /// Document chunks retrieved per turn in local mode
    pub local_doc_k: usize,
    /// Past Q/A units retrieved per turn in local mode
    pub local_chat_k: usize,
    /// Recent messages included verbatim in local mode
    pub local_recent: usize,
    /// Document chunks retrieved for summary-intent queries
    pub summary_doc_k: usize,
    /// Recent messages for summary-intent queries
    pub summary_recent: usize,
    /// Cap on the branch-history walk
    pub max_history_messages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 128,
            history_chunk_size: 300,
            history_chunk_overlap: 50,
            cloud_doc_k: 10,
            cloud_chat_k: 3,
            cloud_recent: 8,
            local_doc_k: 10,
            local_chat_k: 2,
            local_recent: 4,
            summary_doc_k: 20,
            summary_recent: 4,
            max_history_messages: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    /// How long a second request on the same conversation waits before Busy
    pub conversation_timeout_secs: u64,
    /// How long a local-mode call waits for a global slot before Busy
    pub local_timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            conversation_timeout_secs: 300,
            local_timeout_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Maximum accepted size of a single uploaded file, in bytes
    pub max_file_size_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 20 * 1024 * 1024,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Use serde to serialize to pretty JSON; secrets are skipped
        match serde_json::to_string_pretty(&self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "Error serializing config"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().expect("defaults should validate");
        assert_eq!(config.locks.conversation_timeout_secs, 300);
        assert_eq!(config.locks.local_timeout_secs, 180);
        assert_eq!(config.ai.local_max_parallel, 6);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let mut config = Config::default();
        config.retrieval.chunk_overlap = config.retrieval.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_display_redacts_password() {
        let config = Config::default();
        let rendered = format!("{}", config);
        assert!(!rendered.contains("password\""));
        assert!(rendered.contains("\"database\""));
    }
}
