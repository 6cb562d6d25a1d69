//! Telemetry view model.
//!
//! A [`TelemetryFrame`] holds the latest value of every facet the backend
//! streams. Each inbound message may carry any subset of facets; only the
//! facets present in that message are overwritten, and only those are
//! reported as changed.

use std::fmt;

use serde::Serialize;

use crate::codec::{Map, Value};

/// Maximum number of tokens retained for display.
pub const MAX_TOKENS_DISPLAY: usize = 256;

/// One observable property of the client.
///
/// The first nine variants are telemetry facets; the rest describe client
/// state (connection, busy flag, error, log, raw payload, perf counters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Change {
    /// Generated text so far.
    Generated,
    /// Token window.
    Tokens,
    /// Most recent sampling result.
    Sampled,
    /// Top-k candidates.
    Topk,
    /// Attention snapshot.
    Attention,
    /// MLP activation snapshot.
    Mlp,
    /// Residual stream norms.
    Residual,
    /// Residual norms of the last position across layers.
    ResidualLayersLast,
    /// Run metadata (device, done, passthrough fields).
    Meta,
    /// Connection state.
    Connection,
    /// Busy flag.
    Busy,
    /// Last error string.
    LastError,
    /// Diagnostics log lines.
    LogLines,
    /// Last raw payload.
    LastJson,
    /// Round-trip time or payload size.
    Perf,
}

impl Change {
    /// Every change kind, in declaration order.
    pub const ALL: [Change; 15] = [
        Change::Generated,
        Change::Tokens,
        Change::Sampled,
        Change::Topk,
        Change::Attention,
        Change::Mlp,
        Change::Residual,
        Change::ResidualLayersLast,
        Change::Meta,
        Change::Connection,
        Change::Busy,
        Change::LastError,
        Change::LogLines,
        Change::LastJson,
        Change::Perf,
    ];

    /// Whether this change is a telemetry facet.
    #[must_use]
    pub fn is_facet(self) -> bool {
        (self as u8) <= (Change::Meta as u8)
    }

    fn bit(self) -> u16 {
        1 << (self as u8)
    }
}

/// Set of changes produced by one event.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet(u16);

impl ChangeSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// Add a change.
    pub fn insert(&mut self, change: Change) {
        self.0 |= change.bit();
    }

    /// Add every change from `other`.
    pub fn extend(&mut self, other: ChangeSet) {
        self.0 |= other.0;
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, change: Change) -> bool {
        self.0 & change.bit() != 0
    }

    /// True when nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of distinct changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Change> + '_ {
        Change::ALL.into_iter().filter(|c| self.contains(*c))
    }

    /// Whether any telemetry facet changed.
    #[must_use]
    pub fn any_facet(&self) -> bool {
        self.iter().any(Change::is_facet)
    }
}

impl FromIterator<Change> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        let mut set = Self::new();
        for change in iter {
            set.insert(change);
        }
        set
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Sampling result for the latest token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sampled {
    /// Token id, -1 when unknown.
    pub id: i64,
    /// Decoded token text.
    pub token: String,
    /// Probability the sampler assigned.
    pub prob: f64,
}

impl Default for Sampled {
    fn default() -> Self {
        Self {
            id: -1,
            token: String::new(),
            prob: 0.0,
        }
    }
}

/// Attention weights of one head.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttentionSnapshot {
    /// Layer index.
    pub layer: i64,
    /// Head index.
    pub head: i64,
    /// Nested rows of weights, wire shape preserved.
    pub matrix: Vec<Value>,
}

/// MLP activations of one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MlpSnapshot {
    /// Layer index.
    pub layer: i64,
    /// Nested activation tensor, wire shape preserved.
    pub activations: Vec<Value>,
}

/// Residual stream norms of one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResidualSnapshot {
    /// Layer index.
    pub layer: i64,
    /// Per-position L2 norms.
    pub norms: Vec<Value>,
}

/// Run metadata. The backend may add arbitrary fields; they are kept in
/// `fields` alongside the two the HUD reads directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMeta {
    /// Compute device reported by the backend.
    pub device: String,
    /// Whether generation has finished.
    pub done: bool,
    /// The full metadata object as received.
    pub fields: Map,
}

impl Default for RunMeta {
    fn default() -> Self {
        Self {
            device: "unknown".to_string(),
            done: false,
            fields: Map::new(),
        }
    }
}

/// Latest decoded telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryFrame {
    /// Generated text.
    pub generated: String,
    /// Most recent tokens, at most [`MAX_TOKENS_DISPLAY`].
    pub tokens: Vec<String>,
    /// Latest sampling result.
    pub sampled: Sampled,
    /// Top-k candidate records.
    pub topk: Vec<Value>,
    /// Attention snapshot.
    pub attention: AttentionSnapshot,
    /// MLP snapshot.
    pub mlp: MlpSnapshot,
    /// Residual snapshot.
    pub residual: ResidualSnapshot,
    /// Residual norms of the last position, one per layer.
    pub residual_layers_last: Vec<Value>,
    /// Run metadata.
    pub meta: RunMeta,
}

impl TelemetryFrame {
    /// Overwrite every facet present in `root` and report which ones were
    /// touched. A facet whose value has the wrong container type is ignored.
    ///
    /// Presence is what counts: a facet re-sent with an identical value is
    /// still reported.
    pub fn apply(&mut self, root: &Map) -> ChangeSet {
        let mut changes = ChangeSet::new();

        if let Some(items) = root.get("tokens").and_then(Value::as_array) {
            let start = items.len().saturating_sub(MAX_TOKENS_DISPLAY);
            self.tokens = items[start..].iter().map(Value::to_text).collect();
            changes.insert(Change::Tokens);
        }

        if let Some(generated) = root.get("generated") {
            self.generated = generated.to_text();
            changes.insert(Change::Generated);
        }

        if let Some(s) = root.get("sampled").and_then(Value::as_object) {
            self.sampled = Sampled {
                id: s.get("id").and_then(Value::as_i64).unwrap_or(-1),
                token: s.get("token").map(Value::to_text).unwrap_or_default(),
                prob: s.get("prob").and_then(Value::as_f64).unwrap_or(0.0),
            };
            changes.insert(Change::Sampled);
        }

        if let Some(items) = root.get("topk").and_then(Value::as_array) {
            self.topk = items.to_vec();
            changes.insert(Change::Topk);
        }

        if let Some(a) = root.get("attention").and_then(Value::as_object) {
            self.attention.layer = int_or(a, "layer", self.attention.layer);
            self.attention.head = int_or(a, "head", self.attention.head);
            if let Some(matrix) = a.get("matrix") {
                self.attention.matrix = matrix.to_list();
            }
            changes.insert(Change::Attention);
        }

        if let Some(m) = root.get("mlp").and_then(Value::as_object) {
            self.mlp.layer = int_or(m, "layer", self.mlp.layer);
            if let Some(activations) = m.get("activations") {
                self.mlp.activations = activations.to_list();
            }
            changes.insert(Change::Mlp);
        }

        if let Some(r) = root.get("residual").and_then(Value::as_object) {
            self.residual.layer = int_or(r, "layer", self.residual.layer);
            if let Some(norms) = r.get("norms") {
                self.residual.norms = norms.to_list();
            }
            changes.insert(Change::Residual);
        }

        if let Some(last) = root.get("residual_layers_last") {
            self.residual_layers_last = last.to_list();
            changes.insert(Change::ResidualLayersLast);
        }

        if let Some(meta) = root.get("meta").and_then(Value::as_object) {
            if let Some(device) = meta.get("device").and_then(Value::as_str) {
                self.meta.device = device.to_string();
            }
            self.meta.done = meta.get("done").and_then(Value::as_bool).unwrap_or(false);
            self.meta.fields = meta.clone();
            changes.insert(Change::Meta);
        }

        changes
    }
}

fn int_or(object: &Map, key: &str, fallback: i64) -> i64 {
    object.get(key).and_then(Value::as_i64).unwrap_or(fallback)
}
