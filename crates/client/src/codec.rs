//! Wire codec: dynamic telemetry values and the outbound request shape.
//!
//! Backend payloads are schema-free JSON. [`Value`] is the tagged union the
//! view model stores for anything whose shape is backend-defined (top-k
//! records, attention matrices, activation tensors, metadata). Nested arrays
//! are kept nested, exactly as they appear on the wire.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ClientError;

/// Key-value mapping of a decoded object.
pub type Map = BTreeMap<String, Value>;

/// Dynamic value decoded from the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// JSON `null` (or a missing value).
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Any JSON number. The wire format does not distinguish integers.
    Number(f64),
    /// String.
    String(String),
    /// Ordered sequence.
    Array(Vec<Value>),
    /// Object; key order is not significant.
    Object(Map),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Boolean payload, if this is a bool.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric payload, if this is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whole-number payload. Fractional or out-of-range numbers yield `None`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() <= i32::MAX as f64 => Some(*n as i64),
            _ => None,
        }
    }

    /// String payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array payload, if this is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Object payload, if this is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// String payload, or `""` for anything else.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.as_str().unwrap_or_default().to_string()
    }

    /// Array payload cloned out, or an empty list for anything else.
    #[must_use]
    pub fn to_list(&self) -> Vec<Value> {
        self.as_array().map(<[Value]>::to_vec).unwrap_or_default()
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Decode one inbound text message into its top-level object.
///
/// Malformed JSON and non-object top levels are both decode errors.
pub fn decode_message(raw: &str) -> Result<Map, ClientError> {
    let parsed: serde_json::Value = serde_json::from_str(raw)?;
    match Value::from(parsed) {
        Value::Object(map) => Ok(map),
        other => Err(ClientError::Decode(format!(
            "top-level value is {}, expected an object",
            kind_name(&other)
        ))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parameters of one generation step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRequest {
    /// Prompt text. Empty means "continue, do not reset generation".
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Top-k cutoff.
    pub top_k: i64,
    /// Nucleus sampling threshold.
    pub top_p: f64,
    /// Layer whose internals should be visualised.
    pub viz_layer: i64,
    /// Attention head to visualise.
    pub viz_head: i64,
}

impl StepRequest {
    /// Build a request from the six step parameters.
    pub fn new(
        prompt: impl Into<String>,
        temperature: f64,
        top_k: i64,
        top_p: f64,
        viz_layer: i64,
        viz_head: i64,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            top_k,
            top_p,
            viz_layer,
            viz_head,
        }
    }

    /// A "continue" step: empty prompt, same sampling parameters.
    #[must_use]
    pub fn continuation(&self) -> Self {
        Self {
            prompt: String::new(),
            ..self.clone()
        }
    }

    /// Whether the backend will reset generation for this request.
    #[must_use]
    pub fn resets(&self) -> bool {
        !self.prompt.is_empty()
    }
}

#[derive(Serialize)]
struct StepWire<'a> {
    prompt: &'a str,
    temperature: f64,
    top_k: i64,
    top_p: f64,
    step: bool,
    viz_layer: i64,
    viz_head: i64,
}

/// Serialize a step request as compact JSON. All seven fields are always
/// present; `step` is the literal `true`.
pub fn encode_step(request: &StepRequest) -> Result<String, ClientError> {
    let wire = StepWire {
        prompt: &request.prompt,
        temperature: request.temperature,
        top_k: request.top_k,
        top_p: request.top_p,
        step: true,
        viz_layer: request.viz_layer,
        viz_head: request.viz_head,
    };
    serde_json::to_string(&wire).map_err(|e| ClientError::Encode(e.to_string()))
}
