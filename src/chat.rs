//! Chat conversation state and the send path.
//!
//! [`ChatController`] owns the message transcript, the selected model, and
//! the gate between the user and the network: sending is refused while the
//! connection monitor reports the server unreachable, and the refusal shows
//! up as an error-role message in the transcript rather than a thrown
//! failure. Transcripts persist as JSON between sessions; persistence
//! failures are logged and never break the conversation.

use crate::config::Settings;
use crate::connection::ConnectionState;
use crate::reasoning;
use crate::server::ServerClient;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

// ── Transcript ─────────────────────────────────────────────────

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human.
    User,
    /// The model.
    Assistant,
    /// An inline failure notice shown in the transcript.
    Error,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Entry author.
    pub role: Role,
    /// Displayed text, reasoning spans already removed for assistant turns.
    pub content: String,
    /// Name of the file attached to a user turn, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_file: Option<String>,
}

impl Message {
    fn user(content: impl Into<String>, attached_file: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            attached_file,
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            attached_file: None,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            role: Role::Error,
            content: content.into(),
            attached_file: None,
        }
    }
}

/// A text file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    /// Display name, usually the file name.
    pub name: String,
    /// Full text content.
    pub content: String,
}

impl FileAttachment {
    /// Read an attachment from disk.
    pub fn read_from(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, content })
    }
}

/// Build the prompt sent to the model: attachment first, question after.
/// The file name travels on the transcript entry, not in the prompt.
fn assemble_prompt(input: &str, attachment: Option<&FileAttachment>) -> String {
    match attachment {
        Some(file) => format!("file content:\n\n{}\n\nprompt: {input}", file.content),
        None => input.to_owned(),
    }
}

// ── Controller ─────────────────────────────────────────────────

/// Owns one conversation against one model server.
pub struct ChatController {
    client: ServerClient,
    connection: watch::Receiver<ConnectionState>,
    history_path: Option<PathBuf>,
    messages: Vec<Message>,
    model: Option<String>,
}

impl ChatController {
    /// Create a controller, loading any persisted transcript.
    ///
    /// A missing or unreadable history file starts an empty conversation;
    /// the failure is logged, not raised.
    pub fn new(
        settings: &Settings,
        connection: watch::Receiver<ConnectionState>,
        history_path: Option<PathBuf>,
    ) -> Self {
        let messages = history_path
            .as_deref()
            .map(load_history)
            .unwrap_or_default();
        Self {
            client: ServerClient::new(settings),
            connection,
            history_path,
            messages,
            model: None,
        }
    }

    /// The transcript so far, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The currently selected model, if any.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Select the model used for subsequent sends.
    pub fn select_model(&mut self, model: impl Into<String>) {
        self.model = Some(model.into());
    }

    /// Send a user message, returning the entries appended by this call.
    ///
    /// The user's turn is always appended. While the server is unreachable
    /// or no model is selected, the reply slot is an error-role notice and
    /// no request is issued. A failed generation likewise lands in the
    /// transcript instead of propagating.
    pub async fn send(
        &mut self,
        input: &str,
        attachment: Option<FileAttachment>,
    ) -> &[Message] {
        let appended_from = self.messages.len();
        let attached_name = attachment.as_ref().map(|a| a.name.clone());
        self.messages.push(Message::user(input, attached_name));

        if !self.connection.borrow().connected {
            self.messages.push(Message::error(
                "Cannot send: the model server is unreachable.",
            ));
            self.persist();
            return &self.messages[appended_from..];
        }

        let Some(model) = self.model.clone() else {
            self.messages
                .push(Message::error("Cannot send: no model selected."));
            self.persist();
            return &self.messages[appended_from..];
        };

        let prompt = assemble_prompt(input, attachment.as_ref());
        match self.client.generate(&model, &prompt).await {
            Ok(reply) => {
                self.messages
                    .push(Message::assistant(reasoning::strip(&reply)));
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "generation failed");
                self.messages.push(Message::error(e.to_string()));
            }
        }
        self.persist();
        &self.messages[appended_from..]
    }

    /// Drop the transcript and its persisted copy.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.persist();
    }

    fn persist(&self) {
        if let Some(path) = &self.history_path
            && let Err(e) = save_history(path, &self.messages)
        {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist chat history");
        }
    }
}

/// Default transcript location: `<config_dir>/wren/history.json`.
pub fn default_history_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("wren").join("history.json"))
}

fn load_history(path: &Path) -> Vec<Message> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read chat history");
            return Vec::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "chat history is corrupt, starting fresh");
            Vec::new()
        }
    }
}

fn save_history(path: &Path, messages: &[Message]) -> crate::error::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(messages)
        .map_err(|e| crate::error::ChatError::History(e.to_string()))?;
    std::fs::write(path, raw)?;
    Ok(())
}
