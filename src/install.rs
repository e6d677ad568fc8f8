//! Model installation over the streaming pull endpoint.
//!
//! A pull response body is an open chunked stream of UTF-8 text where each
//! complete line is an independent JSON object (`{status, completed?,
//! total?}`). Lines arrive split across network chunks, so [`LineFramer`]
//! buffers partial lines and yields only complete ones — chunk boundaries
//! are transparent to decoded output.
//!
//! [`InstallSession`] folds decoded events into a progress percentage
//! (clamped to `[0,100]`, never decreasing within one session) and a
//! status log, and detects the terminal condition. [`Installer`] drives
//! the whole thing: one POST, one consume loop, one terminal notification.
//!
//! Policy note: a stream that ends cleanly without an explicit terminal
//! status resolves to success at 100 %, matching how servers in the wild
//! end the feed. A dropped connection is therefore indistinguishable from a
//! completed install unless `strict_stream_end` is set, which reports such
//! closures as aborted instead.

use crate::config::Settings;
use crate::error::ErrorKind;
use crate::server::ServerClient;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Line framing ───────────────────────────────────────────────

/// Incremental line framer for NDJSON byte chunks.
///
/// Splits on `\n`, strips a trailing `\r`, retains any trailing partial
/// line for the next chunk, and drops empty lines. The buffer holds raw
/// bytes and decodes only complete lines, so a multi-byte UTF-8 character
/// split across chunks survives intact.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning the complete lines it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                if let Some(line) = Self::take_line(&mut self.buffer) {
                    lines.push(line);
                }
            } else {
                self.buffer.push(byte);
            }
        }
        lines
    }

    /// Flush the trailing partial line, if any. Call at stream end.
    pub fn flush(&mut self) -> Option<String> {
        Self::take_line(&mut self.buffer)
    }

    fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
        let mut bytes = std::mem::take(buffer);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        if bytes.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

// ── Events ─────────────────────────────────────────────────────

/// One decoded line of the pull stream.
///
/// All fields are optional on the wire; the decoder must account for
/// status-only, progress-only, and combined shapes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullEvent {
    /// Human-readable phase, e.g. `"downloading"` or `"success"`.
    #[serde(default)]
    pub status: Option<String>,
    /// Bytes transferred so far for the current layer.
    #[serde(default)]
    pub completed: Option<u64>,
    /// Total bytes for the current layer.
    #[serde(default)]
    pub total: Option<u64>,
    /// In-band error report from the server.
    #[serde(default)]
    pub error: Option<String>,
}

/// Decode one line. Malformed lines are skipped and logged, never fatal.
pub fn decode_line(line: &str) -> Option<PullEvent> {
    match serde_json::from_str::<PullEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed pull event line");
            None
        }
    }
}

/// Incremental updates surfaced to the caller during an installation.
#[derive(Debug, Clone, PartialEq)]
pub enum InstallUpdate {
    /// A new current status, already appended to the session log.
    Status(String),
    /// Progress percentage moved (monotone within the session).
    Progress(f64),
    /// Terminal outcome. Sent exactly once, nothing follows it.
    Done(InstallOutcome),
}

/// How an installation session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The model was installed.
    Success,
    /// The installation failed; the message is user-displayable.
    Failure(String),
}

/// Installation session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    /// No request issued yet.
    Idle,
    /// Request sent, response headers not yet seen.
    Requesting,
    /// Consuming the event stream.
    Streaming,
    /// Terminal: install completed. Absorbing.
    Success,
    /// Terminal: install failed. Absorbing.
    Failure,
}

// ── Session ────────────────────────────────────────────────────

/// Aggregate state of one installation, fed by decoded [`PullEvent`]s.
#[derive(Debug, Clone)]
pub struct InstallSession {
    model_id: String,
    progress_percent: f64,
    status_log: Vec<String>,
    phase: InstallPhase,
}

impl InstallSession {
    /// Create a session for `model_id`, in the `Idle` phase.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            progress_percent: 0.0,
            status_log: Vec::new(),
            phase: InstallPhase::Idle,
        }
    }

    /// The model being installed.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Progress in `[0,100]`, non-decreasing for the session's lifetime.
    pub fn progress_percent(&self) -> f64 {
        self.progress_percent
    }

    /// All status messages seen so far, in arrival order.
    pub fn status_log(&self) -> &[String] {
        &self.status_log
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> InstallPhase {
        self.phase
    }

    /// Whether the session reached an absorbing state.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, InstallPhase::Success | InstallPhase::Failure)
    }

    /// Mark the request as sent.
    pub fn begin_request(&mut self) {
        self.phase = InstallPhase::Requesting;
    }

    /// Mark the response body as open.
    pub fn begin_streaming(&mut self) {
        self.phase = InstallPhase::Streaming;
    }

    /// Fold one decoded event into the session.
    ///
    /// Returns the updates this event produced, terminal update last.
    /// Events after a terminal state are ignored.
    pub fn apply(&mut self, event: &PullEvent) -> Vec<InstallUpdate> {
        if self.is_terminal() {
            return Vec::new();
        }

        let mut updates = Vec::new();

        if let Some(error) = &event.error {
            self.phase = InstallPhase::Failure;
            updates.push(InstallUpdate::Done(InstallOutcome::Failure(error.clone())));
            return updates;
        }

        if let Some(status) = &event.status {
            self.status_log.push(status.clone());
            updates.push(InstallUpdate::Status(status.clone()));
        }

        if let (Some(completed), Some(total)) = (event.completed, event.total)
            && total > 0
        {
            let percent = (100.0 * completed as f64 / total as f64).clamp(0.0, 100.0);
            // Never move the bar backwards, even if the feed regresses.
            if percent > self.progress_percent {
                self.progress_percent = percent;
                updates.push(InstallUpdate::Progress(percent));
            }
        }

        if event
            .status
            .as_deref()
            .is_some_and(|s| s == "success" || s.contains("complete"))
        {
            updates.extend(self.finish_success());
        }

        updates
    }

    /// Resolve the session as successful, pinning progress to 100 %.
    pub fn finish_success(&mut self) -> Vec<InstallUpdate> {
        if self.is_terminal() {
            return Vec::new();
        }
        let mut updates = Vec::new();
        if self.progress_percent < 100.0 {
            self.progress_percent = 100.0;
            updates.push(InstallUpdate::Progress(100.0));
        }
        self.phase = InstallPhase::Success;
        updates.push(InstallUpdate::Done(InstallOutcome::Success));
        updates
    }

    /// Resolve the session as failed with a user-displayable message.
    pub fn finish_failure(&mut self, message: impl Into<String>) -> Vec<InstallUpdate> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.phase = InstallPhase::Failure;
        vec![InstallUpdate::Done(InstallOutcome::Failure(message.into()))]
    }
}

// ── Installer ──────────────────────────────────────────────────

/// A running installation: its update stream and cancellation token.
///
/// Cancelling drops the response body, closing the underlying connection;
/// the transfer does not keep running behind a dismissed dialog.
#[derive(Debug)]
pub struct InstallJob {
    /// Updates in stream order, ending with exactly one `Done`.
    pub updates: mpsc::UnboundedReceiver<InstallUpdate>,
    /// Cancels the transfer when triggered.
    pub cancel: CancellationToken,
}

/// Drives model installations against one server.
#[derive(Debug, Clone)]
pub struct Installer {
    client: ServerClient,
    strict_stream_end: bool,
}

impl Installer {
    /// Create an installer for the server named in `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: ServerClient::new(settings),
            strict_stream_end: settings.strict_stream_end,
        }
    }

    /// Start installing `model_id`, returning the running job.
    ///
    /// A non-2xx initial response or an error opening the body resolves to
    /// failure immediately; installation is not blindly retried.
    pub fn start(&self, model_id: impl Into<String>) -> InstallJob {
        let model_id = model_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let client = self.client.clone();
        let strict = self.strict_stream_end;
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run_install(client, model_id, strict, tx, task_cancel).await;
        });

        InstallJob {
            updates: rx,
            cancel,
        }
    }
}

async fn run_install(
    client: ServerClient,
    model_id: String,
    strict_stream_end: bool,
    tx: mpsc::UnboundedSender<InstallUpdate>,
    cancel: CancellationToken,
) {
    let mut session = InstallSession::new(&model_id);
    session.begin_request();

    let resp = tokio::select! {
        () = cancel.cancelled() => {
            send_all(&tx, session.finish_failure("installation cancelled"));
            return;
        }
        resp = client.start_pull(&model_id) => resp,
    };

    let resp = match resp {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(model = %model_id, error = %e, "pull request failed");
            send_all(&tx, session.finish_failure(e.to_string()));
            return;
        }
    };

    session.begin_streaming();
    tracing::info!(model = %model_id, "pull stream open");

    let mut body = resp.bytes_stream();
    let mut framer = LineFramer::new();

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!(model = %model_id, "pull cancelled, closing stream");
                send_all(&tx, session.finish_failure("installation cancelled"));
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(chunk)) => {
                for line in framer.push(&chunk) {
                    if apply_line(&mut session, &line, &tx) {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(model = %model_id, error = %e, "pull stream read error");
                send_all(
                    &tx,
                    session.finish_failure(ErrorKind::StreamAborted.to_string()),
                );
                return;
            }
            None => {
                if let Some(line) = framer.flush()
                    && apply_line(&mut session, &line, &tx)
                {
                    return;
                }
                // Clean end without a terminal status.
                if strict_stream_end {
                    send_all(
                        &tx,
                        session.finish_failure(ErrorKind::StreamAborted.to_string()),
                    );
                } else {
                    send_all(&tx, session.finish_success());
                }
                return;
            }
        }
    }
}

/// Decode and fold one line; returns `true` once the session is terminal.
fn apply_line(
    session: &mut InstallSession,
    line: &str,
    tx: &mpsc::UnboundedSender<InstallUpdate>,
) -> bool {
    if let Some(event) = decode_line(line) {
        send_all(tx, session.apply(&event));
    }
    session.is_terminal()
}

fn send_all(tx: &mpsc::UnboundedSender<InstallUpdate>, updates: Vec<InstallUpdate>) {
    for update in updates {
        let _ = tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── LineFramer ─────────────────────────────────────────────

    #[test]
    fn framer_whole_lines() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"{\"status\":\"a\"}\n{\"status\":\"b\"}\n");
        assert_eq!(lines, vec![r#"{"status":"a"}"#, r#"{"status":"b"}"#]);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn framer_buffers_partial_line_across_chunks() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"{\"status\":\"down").is_empty());
        let lines = framer.push(b"loading\"}\n");
        assert_eq!(lines, vec![r#"{"status":"downloading"}"#]);
    }

    #[test]
    fn framer_crlf_and_blank_lines() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"one\r\n\ntwo\n");
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn framer_preserves_multibyte_chars_split_across_chunks() {
        let body = "{\"status\":\"téléchargement\"}\n".as_bytes();

        let mut whole = LineFramer::new();
        let expected = whole.push(body);
        assert_eq!(expected, vec!["{\"status\":\"téléchargement\"}"]);

        // Byte 13 is the second byte of the first 'é'.
        let mut split = LineFramer::new();
        let mut lines = split.push(&body[..13]);
        lines.extend(split.push(&body[13..]));
        assert_eq!(lines, expected);
    }

    #[test]
    fn framer_flush_returns_trailing_partial() {
        let mut framer = LineFramer::new();
        framer.push(b"no newline here");
        assert_eq!(framer.flush().as_deref(), Some("no newline here"));
        assert!(framer.flush().is_none());
    }

    // ── decode_line ────────────────────────────────────────────

    #[test]
    fn decode_status_only() {
        let event = decode_line(r#"{"status":"pulling manifest"}"#);
        assert_eq!(
            event,
            Some(PullEvent {
                status: Some("pulling manifest".into()),
                completed: None,
                total: None,
                error: None,
            })
        );
    }

    #[test]
    fn decode_progress_only() {
        let event = decode_line(r#"{"completed":512,"total":1024}"#).unwrap_or(PullEvent {
            status: None,
            completed: None,
            total: None,
            error: None,
        });
        assert_eq!(event.completed, Some(512));
        assert_eq!(event.total, Some(1024));
        assert!(event.status.is_none());
    }

    #[test]
    fn decode_combined_shape() {
        let event =
            decode_line(r#"{"status":"downloading","completed":50,"total":100}"#);
        assert!(event.is_some_and(|e| e.status.as_deref() == Some("downloading")
            && e.completed == Some(50)
            && e.total == Some(100)));
    }

    #[test]
    fn decode_malformed_returns_none() {
        assert!(decode_line("{not json").is_none());
        assert!(decode_line("").is_none());
    }

    // ── InstallSession ─────────────────────────────────────────

    fn streaming_session() -> InstallSession {
        let mut session = InstallSession::new("llama3:8b");
        session.begin_request();
        session.begin_streaming();
        session
    }

    fn progress_event(completed: u64, total: u64) -> PullEvent {
        PullEvent {
            status: None,
            completed: Some(completed),
            total: Some(total),
            error: None,
        }
    }

    #[test]
    fn status_appends_to_log_verbatim() {
        let mut session = streaming_session();
        let updates = session.apply(&PullEvent {
            status: Some("pulling manifest".into()),
            completed: None,
            total: None,
            error: None,
        });
        assert_eq!(updates, vec![InstallUpdate::Status("pulling manifest".into())]);
        assert_eq!(session.status_log(), ["pulling manifest"]);
        assert!(!session.is_terminal());
    }

    #[test]
    fn progress_is_derived_and_clamped_monotone() {
        let mut session = streaming_session();

        session.apply(&progress_event(50, 100));
        assert!((session.progress_percent() - 50.0).abs() < f64::EPSILON);

        // Regressing feed must not move the bar backwards.
        let updates = session.apply(&progress_event(20, 100));
        assert!(updates.is_empty());
        assert!((session.progress_percent() - 50.0).abs() < f64::EPSILON);

        session.apply(&progress_event(80, 100));
        assert!((session.progress_percent() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_ratio_above_one_clamps_to_hundred() {
        let mut session = streaming_session();
        session.apply(&progress_event(200, 100));
        assert!((session.progress_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_total_is_ignored() {
        let mut session = streaming_session();
        let updates = session.apply(&progress_event(5, 0));
        assert!(updates.is_empty());
        assert!(session.progress_percent().abs() < f64::EPSILON);
    }

    #[test]
    fn success_token_is_terminal_at_hundred() {
        let mut session = streaming_session();
        session.apply(&progress_event(10, 100));

        let updates = session.apply(&PullEvent {
            status: Some("success".into()),
            completed: None,
            total: None,
            error: None,
        });
        assert_eq!(
            updates,
            vec![
                InstallUpdate::Status("success".into()),
                InstallUpdate::Progress(100.0),
                InstallUpdate::Done(InstallOutcome::Success),
            ]
        );
        assert_eq!(session.phase(), InstallPhase::Success);
    }

    #[test]
    fn complete_substring_is_terminal() {
        let mut session = streaming_session();
        let updates = session.apply(&PullEvent {
            status: Some("verifying complete".into()),
            completed: None,
            total: None,
            error: None,
        });
        assert!(matches!(
            updates.last(),
            Some(InstallUpdate::Done(InstallOutcome::Success))
        ));
    }

    #[test]
    fn in_band_error_is_terminal_failure() {
        let mut session = streaming_session();
        let updates = session.apply(&PullEvent {
            status: None,
            completed: None,
            total: None,
            error: Some("pull model manifest: file does not exist".into()),
        });
        assert_eq!(
            updates,
            vec![InstallUpdate::Done(InstallOutcome::Failure(
                "pull model manifest: file does not exist".into()
            ))]
        );
        assert_eq!(session.phase(), InstallPhase::Failure);
    }

    #[test]
    fn terminal_states_absorb_later_events() {
        let mut session = streaming_session();
        session.apply(&PullEvent {
            status: Some("success".into()),
            completed: None,
            total: None,
            error: None,
        });
        assert!(session.is_terminal());

        let updates = session.apply(&progress_event(1, 100));
        assert!(updates.is_empty());
        assert!((session.progress_percent() - 100.0).abs() < f64::EPSILON);

        assert!(session.finish_failure("late").is_empty());
        assert_eq!(session.phase(), InstallPhase::Success);
    }

    #[test]
    fn chunking_is_transparent_to_decoded_output() {
        let body = concat!(
            "{\"status\":\"pulling manifest\"}\n",
            "{\"status\":\"downloading\",\"completed\":50,\"total\":100}\n",
            "{\"status\":\"success\"}\n",
        );

        // Whole-body delivery.
        let mut whole_framer = LineFramer::new();
        let mut whole_session = streaming_session();
        let mut whole_updates = Vec::new();
        for line in whole_framer.push(body.as_bytes()) {
            if let Some(event) = decode_line(&line) {
                whole_updates.extend(whole_session.apply(&event));
            }
        }

        // Adversarial mid-line chunking of the same body.
        let chunks: [&[u8]; 5] = [
            b"{\"status\":\"pulling man",
            b"ifest\"}\n{\"status\":\"down",
            b"loading\",\"comp",
            b"leted\":50,\"total\":100}\n{\"status\"",
            b":\"success\"}\n",
        ];
        let mut split_framer = LineFramer::new();
        let mut split_session = streaming_session();
        let mut split_updates = Vec::new();
        for chunk in chunks {
            for line in split_framer.push(chunk) {
                if let Some(event) = decode_line(&line) {
                    split_updates.extend(split_session.apply(&event));
                }
            }
        }

        assert_eq!(split_updates, whole_updates);
        assert_eq!(split_session.phase(), InstallPhase::Success);
    }

    #[test]
    fn malformed_line_does_not_alter_progress() {
        let mut session = streaming_session();
        session.apply(&progress_event(40, 100));

        // A malformed line is skipped before ever reaching the session.
        assert!(decode_line("garbage line").is_none());
        assert!((session.progress_percent() - 40.0).abs() < f64::EPSILON);
        assert!(!session.is_terminal());
    }

    #[test]
    fn clean_end_resolves_success_at_hundred() {
        let mut session = streaming_session();
        session.apply(&progress_event(30, 100));

        let updates = session.finish_success();
        assert_eq!(
            updates,
            vec![
                InstallUpdate::Progress(100.0),
                InstallUpdate::Done(InstallOutcome::Success),
            ]
        );
    }
}
