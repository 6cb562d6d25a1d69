//! Streaming WebSocket client for the inference telemetry backend.
//!
//! This crate keeps a persistent connection to the backend, issues step
//! requests, decodes the telemetry stream into typed facets and exposes the
//! result as an observable view. It is UI-agnostic and can be driven by a
//! terminal renderer, a test harness or an alternative frontend.
//!
//! The core is [`ClientStateMachine`], a synchronous state machine with no
//! I/O. [`HudClient`] wraps it in a Tokio task together with the WebSocket
//! [`transport`] and the reconnect timer.

pub mod actor;
pub mod codec;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod machine;
pub mod reconnect;
pub mod telemetry;
pub mod transport;

pub use actor::{ClientConfig, HudClient, HudCommand, HudUpdate};
pub use codec::{decode_message, encode_step, Map, StepRequest, Value};
pub use connection::{
    normalize_url, resolve_address, AddressError, AddressSource, BackendAddress,
    DEFAULT_BACKEND_PORT, DEFAULT_BACKEND_URL, ENV_BACKEND_URL,
};
pub use diagnostics::{DiagnosticsLog, MAX_LOG_LINES};
pub use error::{ClientError, Result};
pub use machine::{ClientStateMachine, Effect, HudView, Output, MAX_JSON_CHARS};
pub use reconnect::{ConnectionState, ReconnectPolicy};
pub use telemetry::{
    AttentionSnapshot, Change, ChangeSet, MlpSnapshot, ResidualSnapshot, RunMeta, Sampled,
    TelemetryFrame, MAX_TOKENS_DISPLAY,
};
pub use transport::{Link, LinkConfig, LinkEvent};
