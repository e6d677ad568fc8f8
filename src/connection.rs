//! Connection monitor for the model server.
//!
//! Maintains a best-effort, eventually-consistent view of whether the
//! server is reachable. A probe is a bounded `GET /api/tags`; a check is a
//! probe retried a fixed number of times with a fixed delay. The monitor
//! publishes [`ConnectionState`] through a `watch` channel (single writer,
//! any readers) and emits one [`MonitorEvent::Disconnected`] per unbroken
//! failure episode — never once per retry.
//!
//! A successful probe already carries the `/api/tags` payload, so the
//! installed-model list is refreshed for free on every healthy check.

use crate::config::Settings;
use crate::error::ErrorKind;
use crate::server::{ModelEntry, ServerClient};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

// ── State ──────────────────────────────────────────────────────

/// Observable connectivity state. Owned by the monitor, read by anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    /// Whether the last completed check reached the server.
    pub connected: bool,
    /// Whether a check is currently in flight.
    pub checking: bool,
    /// Classified failure from the last completed check, if it failed.
    pub last_error: Option<ErrorKind>,
}

impl ConnectionState {
    /// Initial state: a check is pending, nothing is known yet.
    pub fn initial() -> Self {
        Self {
            connected: false,
            checking: true,
            last_error: None,
        }
    }
}

/// Failure-episode state machine.
///
/// The notification guard lives in the `Failed` variant and is reset by
/// the transition back to `Healthy`, so there is no separate flag to keep
/// in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Episode {
    /// Last check succeeded.
    Healthy,
    /// A check is in progress and at least one attempt has failed.
    Degraded(u32),
    /// A check exhausted its attempts.
    Failed {
        /// Whether the user has been told about this episode.
        notified: bool,
    },
}

/// User-visible notifications, at most one per episode edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The server became unreachable. Carries the classified cause.
    Disconnected(ErrorKind),
    /// Connectivity was regained after a failure episode.
    Reconnected,
}

/// Read side of a running monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    /// Latest connectivity state.
    pub state: watch::Receiver<ConnectionState>,
    /// Latest installed-model list (refreshed on every healthy probe).
    pub models: watch::Receiver<Vec<ModelEntry>>,
    /// Episode notifications.
    pub events: mpsc::UnboundedReceiver<MonitorEvent>,
}

// ── Monitor ────────────────────────────────────────────────────

/// Periodically verifies server reachability and publishes the result.
///
/// Failure is never fatal: every path through [`check`](Self::check)
/// resolves to a [`ConnectionState`]; nothing escapes the boundary.
pub struct ConnectionMonitor {
    client: ServerClient,
    retry_attempts: u32,
    retry_delay: Duration,
    probe_interval: Duration,
    episode: Episode,
    state_tx: watch::Sender<ConnectionState>,
    models_tx: watch::Sender<Vec<ModelEntry>>,
    event_tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl ConnectionMonitor {
    /// Create a monitor for the server named in `settings`.
    pub fn new(settings: &Settings) -> (Self, MonitorHandle) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::initial());
        let (models_tx, models_rx) = watch::channel(Vec::new());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let monitor = Self {
            client: ServerClient::new(settings),
            retry_attempts: settings.retry_attempts.max(1),
            retry_delay: settings.retry_delay(),
            probe_interval: settings.probe_interval(),
            episode: Episode::Healthy,
            state_tx,
            models_tx,
            event_tx,
        };
        let handle = MonitorHandle {
            state: state_rx,
            models: models_rx,
            events: event_rx,
        };
        (monitor, handle)
    }

    /// Run one full check: probe with retries, settle, publish.
    ///
    /// Always resolves to a state; retry failures are logged, not raised.
    pub async fn check(&mut self) -> ConnectionState {
        let current = *self.state_tx.borrow();
        self.publish(ConnectionState {
            checking: true,
            ..current
        });

        let mut last_kind = ErrorKind::NetworkUnreachable;
        for attempt in 1..=self.retry_attempts {
            match self.client.list_models().await {
                Ok(models) => {
                    let _ = self.models_tx.send(models);
                    self.settle_connected();
                    return *self.state_tx.borrow();
                }
                Err(err) => {
                    last_kind = err.kind().unwrap_or(ErrorKind::NetworkUnreachable);
                    tracing::debug!(
                        attempt,
                        of = self.retry_attempts,
                        error = %last_kind,
                        "health probe failed"
                    );
                    self.episode = match self.episode {
                        Episode::Failed { notified } => Episode::Failed { notified },
                        _ => Episode::Degraded(attempt),
                    };
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        self.settle_failed(last_kind);
        *self.state_tx.borrow()
    }

    /// Background loop: check now, then on every interval tick until
    /// cancelled. Each scheduled check restarts the retry sequence.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            self.check().await;
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("connection monitor stopped");
                    return;
                }
                () = tokio::time::sleep(self.probe_interval) => {}
            }
        }
    }

    /// Spawn the background loop, returning its cancellation token.
    pub fn spawn(self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(self.run(child));
        cancel
    }

    fn settle_connected(&mut self) {
        if matches!(self.episode, Episode::Failed { .. }) {
            tracing::info!("model server reachable again");
            let _ = self.event_tx.send(MonitorEvent::Reconnected);
        }
        self.episode = Episode::Healthy;
        self.publish(ConnectionState {
            connected: true,
            checking: false,
            last_error: None,
        });
    }

    fn settle_failed(&mut self, kind: ErrorKind) {
        let already_notified = matches!(self.episode, Episode::Failed { notified: true });
        if !already_notified {
            tracing::warn!(error = %kind, "model server unreachable");
            let _ = self.event_tx.send(MonitorEvent::Disconnected(kind));
        }
        self.episode = Episode::Failed { notified: true };
        self.publish(ConnectionState {
            connected: false,
            checking: false,
            last_error: Some(kind),
        });
    }

    fn publish(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_for(url: &str) -> Settings {
        Settings::new(url)
            .with_connect_timeout_ms(200)
            .with_retry_attempts(2)
            .with_retry_delay_ms(10)
    }

    #[test]
    fn initial_state_is_checking() {
        let state = ConnectionState::initial();
        assert!(!state.connected);
        assert!(state.checking);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn unreachable_server_settles_to_failed_once() {
        // Nothing listens on this port.
        let (mut monitor, mut handle) = ConnectionMonitor::new(&settings_for("http://127.0.0.1:19998"));

        let state = monitor.check().await;
        assert!(!state.connected);
        assert!(!state.checking);
        assert!(state.last_error.is_some());

        // Exactly one Disconnected despite two attempts.
        let first = handle.events.try_recv();
        assert!(matches!(first, Ok(MonitorEvent::Disconnected(_))));
        assert!(handle.events.try_recv().is_err());

        // A second failed check within the same episode stays silent.
        monitor.check().await;
        assert!(handle.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn handle_observes_state_transitions() {
        let (mut monitor, handle) = ConnectionMonitor::new(&settings_for("http://127.0.0.1:19998"));
        assert!(handle.state.borrow().checking);

        monitor.check().await;
        let state = *handle.state.borrow();
        assert!(!state.connected);
        assert!(!state.checking);
    }
}
