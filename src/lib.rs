//! wren — a terminal chat client for a locally-hosted, Ollama-compatible
//! model server.
//!
//! The crate is organized around two long-lived observers and a thin
//! request layer:
//!
//! - [`connection`] keeps an eventually-consistent view of server
//!   reachability and refreshes the installed-model list on every healthy
//!   probe.
//! - [`install`] consumes the chunked NDJSON pull stream and folds it into
//!   monotone progress with a single terminal outcome.
//! - [`server`] wraps the four REST endpoints and classifies transport
//!   failures into [`error::ErrorKind`].
//! - [`chat`] owns the transcript and gates sending on connectivity;
//!   [`reasoning`] and [`export`] handle display and serialization of
//!   model output.

pub mod chat;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod install;
pub mod reasoning;
pub mod server;

pub use chat::{ChatController, FileAttachment, Message, Role};
pub use config::Settings;
pub use connection::{ConnectionMonitor, ConnectionState, MonitorEvent, MonitorHandle};
pub use error::{ChatError, ErrorKind, Result};
pub use export::ExportFormat;
pub use install::{InstallOutcome, InstallPhase, InstallSession, InstallUpdate, Installer};
pub use server::{ModelEntry, ServerClient};
