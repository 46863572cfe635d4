//! Cloud provider family: chat-completions style API with structured
//! `{role, content}` messages.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::models::message::{BranchMessage, MessageRole};
use crate::services::llm::{
    ContextDoc, GenerateOutput, LlmProvider, extract_source_chunks, extract_sources, prompt,
};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

pub struct CloudProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl CloudProvider {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.cloud_base_url.trim_end_matches('/').to_string(),
            api_key: config.cloud_api_key.clone(),
            model: config.cloud_model.clone(),
        }
    }

    /// Same endpoint and credentials with a per-turn model override.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: model.to_string(),
        }
    }

    async fn complete(&self, messages: Vec<WireMessage>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("cloud request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "cloud provider returned {status}: {body}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("cloud response decode failed: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Provider("cloud provider returned no choices".to_string()))
    }
}

fn history_messages(recent: &[BranchMessage]) -> Vec<WireMessage> {
    recent
        .iter()
        .map(|m| WireMessage {
            role: match m.role {
                MessageRole::User => "user".to_string(),
                MessageRole::Assistant => "assistant".to_string(),
            },
            content: m.content.clone(),
        })
        .collect()
}

#[async_trait]
impl LlmProvider for CloudProvider {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn generate(
        &self,
        query: &str,
        context_docs: &[ContextDoc],
        recent: &[BranchMessage],
        aux_context: &str,
    ) -> Result<GenerateOutput> {
        let mut messages = vec![WireMessage {
            role: "system".to_string(),
            content: prompt::SYSTEM_PROMPT.to_string(),
        }];
        messages.extend(history_messages(recent));
        messages.push(WireMessage {
            role: "user".to_string(),
            content: prompt::build_cloud_user_message(query, context_docs, aux_context),
        });

        let response = self.complete(messages).await?;

        Ok(GenerateOutput {
            response,
            sources: extract_sources(context_docs),
            source_chunks: extract_source_chunks(context_docs),
        })
    }

    async fn generate_simple(&self, prompt_text: &str) -> Result<String> {
        self.complete(vec![WireMessage {
            role: "user".to_string(),
            content: prompt_text.to_string(),
        }])
        .await
    }
}
