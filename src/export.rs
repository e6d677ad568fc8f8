//! Conversation export.
//!
//! Serializes a transcript to Markdown, JSON, or plain text. Reasoning
//! spans are stripped from assistant turns at render time, so an exported
//! file never contains scratchpad text even if an older persisted
//! transcript predates stripping-at-ingest.

use crate::chat::{Message, Role};
use crate::error::{ChatError, Result};
use crate::reasoning;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Markdown with per-turn headings.
    Markdown,
    /// JSON document with a timestamp and the message list.
    Json,
    /// Plain text with separator rules between turns.
    Text,
}

impl ExportFormat {
    /// Conventional file extension for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
            Self::Text => "txt",
        }
    }

    /// Parse a format name as typed by the user.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Some(Self::Markdown),
            "json" => Some(Self::Json),
            "text" | "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

/// One exported turn. Attachments are not carried into exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedMessage {
    /// `"user"`, `"assistant"`, or `"error"`.
    pub role: Role,
    /// Turn text, reasoning spans removed.
    pub content: String,
}

/// The JSON export document shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Export time, RFC 3339.
    pub timestamp: DateTime<Utc>,
    /// The transcript, oldest first.
    pub messages: Vec<ExportedMessage>,
}

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "You",
        Role::Assistant => "Assistant",
        Role::Error => "Error",
    }
}

fn cleaned(message: &Message) -> String {
    match message.role {
        Role::Assistant => reasoning::strip(&message.content),
        _ => message.content.clone(),
    }
}

/// Render a transcript in the given format, timestamped now.
pub fn render(format: ExportFormat, messages: &[Message]) -> Result<String> {
    render_at(format, messages, Utc::now())
}

/// Render with an explicit timestamp.
pub fn render_at(
    format: ExportFormat,
    messages: &[Message],
    timestamp: DateTime<Utc>,
) -> Result<String> {
    match format {
        ExportFormat::Markdown => Ok(render_markdown(messages)),
        ExportFormat::Text => Ok(render_text(messages)),
        ExportFormat::Json => {
            let doc = ExportDocument {
                timestamp,
                messages: messages
                    .iter()
                    .map(|m| ExportedMessage {
                        role: m.role,
                        content: cleaned(m),
                    })
                    .collect(),
            };
            serde_json::to_string_pretty(&doc).map_err(|e| ChatError::Export(e.to_string()))
        }
    }
}

fn render_markdown(messages: &[Message]) -> String {
    let mut out = String::from("# Conversation\n");
    for message in messages {
        out.push_str(&format!("\n### {}:\n\n{}\n", label(message.role), cleaned(message)));
    }
    out
}

fn render_text(messages: &[Message]) -> String {
    let blocks: Vec<String> = messages
        .iter()
        .map(|m| format!("[{}]:\n{}", label(m.role), cleaned(m)))
        .collect();
    blocks.join("\n\n---\n\n")
}

/// Parse a JSON export back into its document form.
pub fn parse_json_export(raw: &str) -> Result<ExportDocument> {
    serde_json::from_str(raw).map_err(|e| ChatError::Export(e.to_string()))
}
