//! Transcript export. The renderer boundary is a trait so PDF (or any
//! richer format) can be provided externally; plain text and JSON ship
//! in-repo. Archived messages never appear in exports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::message::{ChatMessage, MessageRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Txt,
    Pdf,
    Json,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "txt" => Ok(ExportFormat::Txt),
            "pdf" => Ok(ExportFormat::Pdf),
            "json" => Ok(ExportFormat::Json),
            other => Err(Error::Validation(format!("unsupported format: {other}"))),
        }
    }
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "text/plain",
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&ChatMessage> for ExportMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            sources: message.source_list(),
            timestamp: message.created_at,
        }
    }
}

/// Renders a transcript into one export format.
pub trait ExportRenderer: Send + Sync {
    fn render(
        &self,
        title: &str,
        messages: &[ExportMessage],
        format: ExportFormat,
    ) -> Result<Vec<u8>>;
}

pub struct TranscriptRenderer;

impl ExportRenderer for TranscriptRenderer {
    fn render(
        &self,
        title: &str,
        messages: &[ExportMessage],
        format: ExportFormat,
    ) -> Result<Vec<u8>> {
        match format {
            ExportFormat::Txt => Ok(render_txt(title, messages).into_bytes()),
            ExportFormat::Json => {
                let doc = JsonExport {
                    title: title.to_string(),
                    exported_at: Utc::now(),
                    message_count: messages.len(),
                    messages: messages.to_vec(),
                };
                Ok(serde_json::to_vec_pretty(&doc)?)
            }
            ExportFormat::Pdf => Err(Error::Unsupported(
                "pdf export requires an external renderer".to_string(),
            )),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport {
    title: String,
    exported_at: DateTime<Utc>,
    message_count: usize,
    messages: Vec<ExportMessage>,
}

fn render_txt(title: &str, messages: &[ExportMessage]) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("  {title}"));
    lines.push("=".repeat(60));
    lines.push(format!(
        "  Exported on {}",
        Utc::now().format("%b %d, %Y at %I:%M %p")
    ));
    lines.push(format!("  Total messages: {}", messages.len()));
    lines.push("=".repeat(60));
    lines.push(String::new());

    for message in messages {
        let label = match message.role {
            MessageRole::User => "You",
            MessageRole::Assistant => "Assistant",
        };
        lines.push(format!(
            "[{label}]  ({})",
            message.timestamp.format("%b %d, %Y  %I:%M %p")
        ));
        lines.push(message.content.clone());
        if !message.sources.is_empty() {
            lines.push(format!("  Sources: {}", message.sources.join(", ")));
        }
        lines.push(String::new());
        lines.push("-".repeat(50));
        lines.push(String::new());
    }

    lines.push("— End of conversation —".to_string());
    lines.join("\n")
}

/// Sanitizes a conversation title for use as a download filename.
pub fn safe_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "chat".to_string()
    } else {
        trimmed.to_string()
    }
}
