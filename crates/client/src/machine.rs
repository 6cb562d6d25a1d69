//! Connection state machine and message decode pipeline.
//!
//! [`ClientStateMachine`] is purely synchronous: it never touches a socket
//! or a timer. Every entry point mutates the view and returns an [`Output`]
//! describing which observable properties changed and which side effects
//! (open a link, send a frame, arm the reconnect timer) the owner must
//! perform. Time is passed in, so round-trip measurement is deterministic
//! under test.
//!
//! The owner (see [`crate::actor`]) must serialize all calls onto a single
//! task; no internal locking is done.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec::{decode_message, encode_step, StepRequest};
use crate::connection::BackendAddress;
use crate::diagnostics::DiagnosticsLog;
use crate::error::ClientError;
use crate::reconnect::{ConnectionState, ReconnectPolicy};
use crate::telemetry::{Change, ChangeSet, TelemetryFrame};

/// Maximum number of characters of the raw payload kept for display.
pub const MAX_JSON_CHARS: usize = 200_000;

const TRUNCATION_MARKER: &str = "\n...(truncated)...";

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a transport handshake to the endpoint.
    Open(BackendAddress),
    /// Send one text frame on the live link.
    Send(String),
    /// Arm the single-shot reconnect timer.
    ArmReconnect(Duration),
}

/// Result of feeding one event into the state machine.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Output {
    /// Properties that changed (and must be notified).
    pub changes: ChangeSet,
    /// Effects to perform, in order.
    pub effects: Vec<Effect>,
}

impl Output {
    /// True if nothing changed and nothing needs doing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.effects.is_empty()
    }

    /// The payload of the first `Send` effect, if any.
    #[must_use]
    pub fn sent(&self) -> Option<&str> {
        self.effects.iter().find_map(|e| match e {
            Effect::Send(payload) => Some(payload.as_str()),
            _ => None,
        })
    }
}

/// Everything a UI can observe about the client.
#[derive(Debug, Clone, Default)]
pub struct HudView {
    /// Connection state.
    pub connection: ConnectionState,
    /// Consecutive reconnect attempts since the last successful connect.
    pub reconnect_attempt: u32,
    /// True while a step request awaits its response.
    pub busy: bool,
    /// Decoded telemetry.
    pub frame: TelemetryFrame,
    /// Last error; empty means no error.
    pub last_error: String,
    /// Operator diagnostics.
    pub log: DiagnosticsLog,
    /// Last raw payload, capped at [`MAX_JSON_CHARS`] characters. Shared
    /// with published snapshots.
    pub last_json: Arc<str>,
    /// Round-trip time of the last answered step, in milliseconds.
    pub last_round_trip_ms: f64,
    /// Size of the last inbound payload in UTF-8 bytes.
    pub last_payload_bytes: usize,
}

impl HudView {
    /// Whether the link is up.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Device reported in the run metadata.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.frame.meta.device
    }

    /// Whether the backend reported the run as finished.
    #[must_use]
    pub fn done(&self) -> bool {
        self.frame.meta.done
    }
}

/// Owns connection health, request correlation and the view model.
#[derive(Debug)]
pub struct ClientStateMachine {
    endpoint: BackendAddress,
    policy: ReconnectPolicy,
    view: HudView,
    attempt: u32,
    round_trip_started: Option<Instant>,
    reconnect_pending: Option<Duration>,
}

impl ClientStateMachine {
    /// Create a disconnected machine. Call [`connect`](Self::connect) to
    /// start the first attempt.
    #[must_use]
    pub fn new(endpoint: BackendAddress, policy: ReconnectPolicy) -> Self {
        Self {
            endpoint,
            policy,
            view: HudView::default(),
            attempt: 0,
            round_trip_started: None,
            reconnect_pending: None,
        }
    }

    /// Current observable state.
    #[must_use]
    pub fn view(&self) -> &HudView {
        &self.view
    }

    /// Endpoint every attempt targets.
    #[must_use]
    pub fn endpoint(&self) -> &BackendAddress {
        &self.endpoint
    }

    /// Reconnect attempt counter.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay of the armed reconnect timer, if one is pending.
    #[must_use]
    pub fn reconnect_pending(&self) -> Option<Duration> {
        self.reconnect_pending
    }

    /// Whether a round-trip measurement is in progress.
    #[must_use]
    pub fn round_trip_pending(&self) -> bool {
        self.round_trip_started.is_some()
    }

    /// Begin a connection attempt.
    ///
    /// Ignored while a handshake is already in flight or the link is up, so
    /// attempts never overlap.
    pub fn connect(&mut self) -> Output {
        let mut out = Output::default();
        if self.view.connection != ConnectionState::Disconnected {
            debug!(state = ?self.view.connection, "Connect ignored");
            return out;
        }

        self.reconnect_pending = None;
        self.set_last_error(&mut out, "");

        let line = if self.attempt > 0 {
            format!("Connecting to {} (attempt {})...", self.endpoint, self.attempt)
        } else {
            format!("Connecting to {}...", self.endpoint)
        };
        info!(url = %self.endpoint, attempt = self.attempt, "Connecting to backend");
        self.note(&mut out, line);

        self.set_connection(&mut out, ConnectionState::Connecting);
        out.effects.push(Effect::Open(self.endpoint.clone()));
        out
    }

    /// The reconnect timer fired.
    pub fn reconnect_timer_fired(&mut self) -> Output {
        self.reconnect_pending = None;
        self.connect()
    }

    /// The transport handshake completed.
    pub fn on_connected(&mut self) -> Output {
        let mut out = Output::default();
        self.attempt = 0;
        self.view.reconnect_attempt = 0;
        self.reconnect_pending = None;
        self.set_connection(&mut out, ConnectionState::Connected);
        out.changes.insert(Change::Connection);
        self.set_last_error(&mut out, "");
        info!(url = %self.endpoint, "Connected to backend");
        self.note(&mut out, "CONNECTED");
        out
    }

    /// The link closed or the handshake failed.
    pub fn on_disconnected(&mut self) -> Output {
        let mut out = Output::default();
        if self.view.connection == ConnectionState::Disconnected && self.reconnect_pending.is_some()
        {
            debug!("Duplicate disconnect ignored, reconnect already armed");
            return out;
        }

        self.set_connection(&mut out, ConnectionState::Disconnected);
        out.changes.insert(Change::Connection);
        self.set_busy(&mut out, false);

        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.view.reconnect_attempt = self.attempt;
        self.reconnect_pending = Some(delay);
        out.effects.push(Effect::ArmReconnect(delay));

        warn!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.attempt,
            "Disconnected from backend"
        );
        self.note(
            &mut out,
            format!("DISCONNECTED (reconnect in {}ms)", delay.as_millis()),
        );
        out
    }

    /// The transport reported an error. Does not change state; a
    /// disconnect notification, if any, follows separately.
    pub fn on_transport_error(&mut self, error: &str) -> Output {
        let mut out = Output::default();
        let err = ClientError::Transport(error.to_string());
        self.set_last_error(&mut out, &err.to_string());
        warn!(error, "Socket error");
        self.note(&mut out, format!("SOCKET ERROR: {error}"));
        out
    }

    /// Issue a generation step.
    ///
    /// Rejected locally (error string + log line, nothing sent) unless
    /// connected. A step while another is pending simply resends and
    /// restarts the round-trip timer; the next inbound message answers the
    /// most recent request.
    pub fn step(&mut self, request: &StepRequest, now: Instant) -> Output {
        let mut out = Output::default();
        if !self.view.connected() {
            let err = ClientError::NotConnected(self.endpoint.to_string());
            self.set_last_error(&mut out, &err.to_string());
            warn!("Step blocked, not connected");
            self.note(&mut out, "STEP blocked (not connected)");
            return out;
        }

        self.note(
            &mut out,
            format!(
                "STEP reset={} temp={:.2} topk={} topp={:.2} layer={} head={}",
                if request.resets() { "yes" } else { "no" },
                request.temperature,
                request.top_k,
                request.top_p,
                request.viz_layer,
                request.viz_head
            ),
        );

        let payload = match encode_step(request) {
            Ok(payload) => payload,
            Err(err) => {
                self.set_last_error(&mut out, &err.to_string());
                warn!(error = %err, "Step not sent");
                self.note(&mut out, format!("STEP failed: {err}"));
                return out;
            }
        };
        debug!(bytes = payload.len(), reset = request.resets(), "Sending step");
        out.effects.push(Effect::Send(payload));
        self.round_trip_started = Some(now);
        self.set_busy(&mut out, true);
        out
    }

    /// Handle one inbound text message.
    pub fn on_message(&mut self, raw: &str, now: Instant) -> Output {
        let mut out = Output::default();

        let clipped = clip_payload(raw);
        if *self.view.last_json != *clipped {
            self.view.last_json = Arc::from(clipped);
            out.changes.insert(Change::LastJson);
        }

        let payload_bytes = raw.len();
        let mut perf_dirty = false;
        if self.view.last_payload_bytes != payload_bytes {
            self.view.last_payload_bytes = payload_bytes;
            perf_dirty = true;
        }
        if let Some(started) = self.round_trip_started.take() {
            let rtt = now.saturating_duration_since(started).as_millis() as f64;
            if self.view.last_round_trip_ms != rtt {
                self.view.last_round_trip_ms = rtt;
                perf_dirty = true;
            }
        }
        if perf_dirty {
            out.changes.insert(Change::Perf);
        }

        // Any inbound text resolves the pending request.
        self.set_busy(&mut out, false);

        let root = match decode_message(raw) {
            Ok(root) => root,
            Err(err) => {
                self.set_last_error(&mut out, &err.to_string());
                let detail = match &err {
                    ClientError::Decode(detail) => detail.clone(),
                    other => other.to_string(),
                };
                warn!(bytes = payload_bytes, error = %detail, "Invalid JSON from backend");
                self.note(
                    &mut out,
                    format!("RECV INVALID JSON ({payload_bytes} bytes): {detail}"),
                );
                return out;
            }
        };

        if let Some(error) = root.get("error") {
            let err = ClientError::Backend(error.to_text());
            self.set_last_error(&mut out, &err.to_string());
            warn!(error = %err, "Backend error");
            self.note(&mut out, format!("BACKEND ERROR: {}", self.view.last_error));
            return out;
        }

        self.set_last_error(&mut out, "");
        out.changes.extend(self.view.frame.apply(&root));

        debug!(
            bytes = payload_bytes,
            rtt_ms = self.view.last_round_trip_ms,
            done = self.view.done(),
            changes = ?out.changes,
            "Telemetry received"
        );
        self.note(
            &mut out,
            format!(
                "RECV {} bytes  rtt={:.0}ms  done={}",
                payload_bytes,
                self.view.last_round_trip_ms,
                self.view.done()
            ),
        );
        out
    }

    /// Empty the diagnostics log. No change is reported if already empty.
    pub fn clear_log(&mut self) -> Output {
        let mut out = Output::default();
        if self.view.log.clear() {
            out.changes.insert(Change::LogLines);
        }
        out
    }

    fn note(&mut self, out: &mut Output, line: impl AsRef<str>) {
        self.view.log.push(line);
        out.changes.insert(Change::LogLines);
    }

    fn set_last_error(&mut self, out: &mut Output, error: &str) {
        if self.view.last_error == error {
            return;
        }
        self.view.last_error = error.to_string();
        out.changes.insert(Change::LastError);
    }

    fn set_busy(&mut self, out: &mut Output, busy: bool) {
        if self.view.busy != busy {
            self.view.busy = busy;
            out.changes.insert(Change::Busy);
        }
    }

    fn set_connection(&mut self, out: &mut Output, state: ConnectionState) {
        if self.view.connection != state {
            self.view.connection = state;
            out.changes.insert(Change::Connection);
        }
    }
}

fn clip_payload(raw: &str) -> String {
    match raw.char_indices().nth(MAX_JSON_CHARS) {
        Some((cut, _)) => {
            let mut clipped = String::with_capacity(cut + TRUNCATION_MARKER.len());
            clipped.push_str(&raw[..cut]);
            clipped.push_str(TRUNCATION_MARKER);
            clipped
        }
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn connected() -> ClientStateMachine {
        let mut sm = ClientStateMachine::new(BackendAddress::default(), ReconnectPolicy::default());
        sm.connect();
        sm.on_connected();
        sm
    }

    #[test]
    fn test_connect_logs_endpoint_without_attempt_suffix() {
        let mut sm = ClientStateMachine::new(BackendAddress::default(), ReconnectPolicy::default());
        let out = sm.connect();
        assert_eq!(sm.view().connection, ConnectionState::Connecting);
        assert_eq!(out.effects, vec![Effect::Open(BackendAddress::default())]);
        assert!(sm
            .view()
            .log
            .last()
            .unwrap()
            .ends_with("] Connecting to ws://localhost:8765/..."));
    }

    #[test]
    fn test_connect_while_connecting_is_ignored() {
        let mut sm = ClientStateMachine::new(BackendAddress::default(), ReconnectPolicy::default());
        sm.connect();
        assert!(sm.connect().is_empty());
    }

    #[test]
    fn test_reconnect_logs_attempt_number() {
        let mut sm = ClientStateMachine::new(BackendAddress::default(), ReconnectPolicy::default());
        sm.connect();
        sm.on_disconnected();
        sm.reconnect_timer_fired();
        assert!(sm.view().log.last().unwrap().ends_with("(attempt 1)..."));
    }

    #[test]
    fn test_snapshot_shares_raw_payload() {
        let mut sm = ClientStateMachine::new(BackendAddress::default(), ReconnectPolicy::default());
        sm.connect();
        sm.on_connected();
        sm.on_message(r#"{"generated":"abc"}"#, Instant::now());

        let snapshot = sm.view().clone();
        assert!(Arc::ptr_eq(&snapshot.last_json, &sm.view().last_json));

        // Same payload again: no change, storage kept.
        let out = sm.on_message(r#"{"generated":"abc"}"#, Instant::now());
        assert!(!out.changes.contains(Change::LastJson));
        assert!(Arc::ptr_eq(&snapshot.last_json, &sm.view().last_json));
    }

    #[test]
    fn test_clip_payload() {
        let short = "{}";
        assert_eq!(clip_payload(short), "{}");

        let long = "é".repeat(MAX_JSON_CHARS + 5);
        let clipped = clip_payload(&long);
        assert!(clipped.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            clipped.chars().count(),
            MAX_JSON_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn test_payload_bytes_are_utf8_length() {
        let mut sm = connected();
        sm.on_message(r#"{"generated":"é"}"#, Instant::now());
        assert_eq!(sm.view().last_payload_bytes, r#"{"generated":"é"}"#.len());
    }

    #[test]
    fn test_step_log_line() {
        let mut sm = connected();
        sm.step(&StepRequest::new("", 0.8, 40, 0.9, 1, 2), Instant::now());
        let line = sm.view().log.last().unwrap();
        assert!(line.ends_with("STEP reset=no temp=0.80 topk=40 topp=0.90 layer=1 head=2"));
    }

    #[test]
    fn test_transport_error_does_not_change_state() {
        let mut sm = connected();
        let out = sm.on_transport_error("connection reset");
        assert!(out.effects.is_empty());
        assert_eq!(sm.view().connection, ConnectionState::Connected);
        assert_eq!(sm.view().last_error, "connection reset");
        assert!(sm.view().log.last().unwrap().ends_with("SOCKET ERROR: connection reset"));
    }

    #[test]
    fn test_duplicate_disconnect_arms_one_timer() {
        let mut sm = connected();
        let first = sm.on_disconnected();
        let second = sm.on_disconnected();
        assert_eq!(first.effects.len(), 1);
        assert!(second.is_empty());
        assert_eq!(sm.attempt(), 1);
    }

    #[test]
    #[traced_test]
    fn test_lifecycle_is_traced() {
        let mut sm = connected();
        sm.on_disconnected();
        sm.on_message("{oops", Instant::now());
        assert!(logs_contain("Connected to backend"));
        assert!(logs_contain("Disconnected from backend"));
        assert!(logs_contain("Invalid JSON from backend"));
    }
}
