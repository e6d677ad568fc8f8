//! HTTP client for the Ollama-compatible model server.
//!
//! Thin wrapper over the four REST endpoints: list installed models
//! (`GET /api/tags`), generate a completion (`POST /api/generate`),
//! pull a model (`POST /api/pull`, chunked NDJSON body), and delete a
//! model (`DELETE /api/delete`). Transport failures are classified into
//! [`ErrorKind`] at this boundary; callers never see raw client errors.
//!
//! Only the health-probe path carries a deadline. Generation can take as
//! long as inference takes, and a pull stream may run for the duration of
//! a multi-gigabyte download, so neither is bounded here.

use crate::config::Settings;
use crate::error::{ChatError, ErrorKind, Result};
use serde::Deserialize;

// ── Wire types ─────────────────────────────────────────────────

/// One installed model as reported by `/api/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelEntry {
    /// Model identifier, e.g. `"llama3:8b"`.
    pub name: String,
    /// On-disk size in bytes, when reported.
    #[serde(default)]
    pub size: Option<u64>,
    /// Last-modified timestamp, when reported.
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

// ── Client ─────────────────────────────────────────────────────

/// Client for one model server, constructed from [`Settings`].
#[derive(Debug, Clone)]
pub struct ServerClient {
    base_url: String,
    probe_timeout: std::time::Duration,
    client: reqwest::Client,
}

impl ServerClient {
    /// Create a client for the server named in `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            base_url: settings.base_url_trimmed().to_owned(),
            probe_timeout: settings.connect_timeout(),
            client: reqwest::Client::new(),
        }
    }

    /// The base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List installed models via `GET /api/tags`.
    ///
    /// This doubles as the health probe, so it carries the configured
    /// deadline.
    pub async fn list_models(&self) -> Result<Vec<ModelEntry>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| ChatError::Server(ErrorKind::from_reqwest(&e)))?;

        let resp = check_status(resp)?;
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|_| ChatError::Server(ErrorKind::MalformedResponse))?;
        Ok(tags.models)
    }

    /// Generate a non-streaming completion via `POST /api/generate`.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Server(ErrorKind::from_reqwest(&e)))?;

        let resp = check_status(resp)?;
        let generated: GenerateResponse = resp
            .json()
            .await
            .map_err(|_| ChatError::Server(ErrorKind::MalformedResponse))?;
        Ok(generated.response)
    }

    /// Open the pull stream for `model_id` via `POST /api/pull`.
    ///
    /// Returns the raw response once the status has been checked; the
    /// caller consumes the chunked NDJSON body. A non-2xx answer or a
    /// connect error is terminal — pulls are never retried blindly.
    pub async fn start_pull(&self, model_id: &str) -> Result<reqwest::Response> {
        let url = format!("{}/api/pull", self.base_url);
        let body = serde_json::json!({ "name": model_id });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Server(ErrorKind::from_reqwest(&e)))?;

        check_status(resp)
    }

    /// Remove an installed model via `DELETE /api/delete`.
    pub async fn delete_model(&self, model_id: &str) -> Result<()> {
        let url = format!("{}/api/delete", self.base_url);
        let body = serde_json::json!({ "name": model_id });

        let resp = self
            .client
            .delete(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Server(ErrorKind::from_reqwest(&e)))?;

        check_status(resp)?;
        Ok(())
    }
}

/// Map a non-success status into the error taxonomy.
fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ChatError::Server(ErrorKind::HttpStatus(status.as_u16())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_entry_deserializes_with_extras() {
        let body = r#"{"name":"llama3:8b","size":4661224676,"modified_at":"2024-05-01T00:00:00Z","digest":"abc"}"#;
        let entry: ModelEntry = serde_json::from_str(body).unwrap_or(ModelEntry {
            name: String::new(),
            size: None,
            modified_at: None,
        });
        assert_eq!(entry.name, "llama3:8b");
        assert_eq!(entry.size, Some(4_661_224_676));
    }

    #[test]
    fn tags_response_tolerates_missing_models() {
        let tags: TagsResponse = serde_json::from_str("{}").unwrap_or(TagsResponse {
            models: vec![ModelEntry {
                name: "sentinel".into(),
                size: None,
                modified_at: None,
            }],
        });
        assert!(tags.models.is_empty());
    }

    #[test]
    fn client_trims_base_url() {
        let settings = Settings::new("http://localhost:11434/");
        let client = ServerClient::new(&settings);
        assert_eq!(client.base_url(), "http://localhost:11434");
    }
}
