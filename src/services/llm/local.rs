//! Local provider family: OpenAI-compatible `/v1/chat/completions` server
//! (e.g. Ollama). Streaming parses `data: …\n\n` SSE frames terminated by
//! `[DONE]`; a spawned producer task feeds tokens into a bounded channel
//! consumed by the orchestrator.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::models::message::BranchMessage;
use crate::services::llm::{
    ContextDoc, GenerateOutput, LlmProvider, STREAM_CHANNEL_CAPACITY, TokenReceiver,
    extract_source_chunks, extract_sources, prompt,
};

#[derive(Debug, Serialize)]
struct LocalChatRequest {
    model: String,
    messages: Vec<LocalMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocalMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct LocalChatResponse {
    choices: Vec<LocalChoice>,
}

#[derive(Debug, Deserialize)]
struct LocalChoice {
    message: LocalMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

pub struct LocalProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl LocalProvider {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.local_base_url.trim_end_matches('/').to_string(),
            model: config.local_model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn connection_hint(&self) -> String {
        format!(
            "Ensure the local model server is running at {} and the model '{}' is pulled.",
            self.base_url, self.model
        )
    }

    fn build_messages(
        &self,
        query: &str,
        context_docs: &[ContextDoc],
        recent: &[BranchMessage],
        aux: &str,
    ) -> Vec<LocalMessage> {
        vec![
            LocalMessage {
                role: "system".to_string(),
                content: prompt::SYSTEM_PROMPT.to_string(),
            },
            LocalMessage {
                role: "user".to_string(),
                content: prompt::build_local_user_message(query, context_docs, recent, aux),
            },
        ]
    }

    async fn complete(&self, messages: Vec<LocalMessage>) -> Result<String> {
        let request = LocalChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                Error::Provider(format!(
                    "local request failed: {e}. {}",
                    self.connection_hint()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "local model server returned {status}: {body}"
            )));
        }

        let parsed: LocalChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("local response decode failed: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Provider("local model returned no choices".to_string()))
    }
}

/// Extracts token deltas from one SSE frame. Returns false when the
/// `[DONE]` terminator was seen.
fn parse_sse_frame(frame: &str, tokens: &mut Vec<String>) -> bool {
    for line in frame.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return false;
        }
        if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content
                    && !content.is_empty()
                {
                    tokens.push(content);
                }
            }
        }
    }
    true
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        query: &str,
        context_docs: &[ContextDoc],
        recent: &[BranchMessage],
        aux_context: &str,
    ) -> Result<GenerateOutput> {
        let messages = self.build_messages(query, context_docs, recent, aux_context);
        let response = self.complete(messages).await?;

        Ok(GenerateOutput {
            response,
            sources: extract_sources(context_docs),
            source_chunks: extract_source_chunks(context_docs),
        })
    }

    async fn generate_stream(
        &self,
        query: &str,
        context_docs: &[ContextDoc],
        recent: &[BranchMessage],
        aux_context: &str,
    ) -> Result<TokenReceiver> {
        let request = LocalChatRequest {
            model: self.model.clone(),
            messages: self.build_messages(query, context_docs, recent, aux_context),
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                Error::Provider(format!(
                    "local stream request failed: {e}. {}",
                    self.connection_hint()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "local model server returned {status}: {body}"
            )));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(item) = byte_stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::Provider(format!("local stream failed: {e}"))))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find("\n\n") {
                    let frame: String = buffer.drain(..pos + 2).collect();
                    let mut tokens = Vec::new();
                    let keep_going = parse_sse_frame(&frame, &mut tokens);
                    for token in tokens {
                        if tx.send(Ok(token)).await.is_err() {
                            // Consumer went away; stop producing.
                            return;
                        }
                    }
                    if !keep_going {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn generate_simple(&self, prompt_text: &str) -> Result<String> {
        self.complete(vec![LocalMessage {
            role: "user".to_string(),
            content: prompt_text.to_string(),
        }])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_frame_extracts_delta() {
        let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}";
        let mut tokens = Vec::new();
        assert!(parse_sse_frame(frame, &mut tokens));
        assert_eq!(tokens, vec!["hel".to_string()]);
    }

    #[test]
    fn test_parse_sse_frame_detects_done() {
        let mut tokens = Vec::new();
        assert!(!parse_sse_frame("data: [DONE]", &mut tokens));
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_parse_sse_frame_ignores_comments_and_empty_deltas() {
        let frame = ": keep-alive\ndata: {\"choices\":[{\"delta\":{}}]}";
        let mut tokens = Vec::new();
        assert!(parse_sse_frame(frame, &mut tokens));
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_parse_sse_frame_multiple_lines() {
        let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}";
        let mut tokens = Vec::new();
        assert!(parse_sse_frame(frame, &mut tokens));
        assert_eq!(tokens, vec!["a".to_string(), "b".to_string()]);
    }
}
