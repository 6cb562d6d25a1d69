//! Plain-text rendering of client updates for the headless HUD.

use hud_client::{Change, HudUpdate, HudView, Value};

/// Maximum number of top-k candidates printed per update.
pub const TOPK_SHOWN: usize = 5;

/// Render one update as display lines, one per changed property.
///
/// Diagnostics lines are included only when `show_log` is set.
#[must_use]
pub fn render_update(update: &HudUpdate, show_log: bool) -> Vec<String> {
    let view = &update.view;
    update
        .changes
        .iter()
        .filter_map(|change| render_change(change, view, show_log))
        .collect()
}

fn render_change(change: Change, view: &HudView, show_log: bool) -> Option<String> {
    let frame = &view.frame;
    let line = match change {
        Change::Connection => match view.reconnect_attempt {
            0 => format!("connection: {}", view.connection.label()),
            n => format!("connection: {} (retry {n})", view.connection.label()),
        },
        Change::Busy => return None,
        Change::LastError if view.last_error.is_empty() => return None,
        Change::LastError => format!("error: {}", view.last_error),
        Change::Generated => format!("generated: {}", frame.generated),
        Change::Tokens => format!("tokens: {}", frame.tokens.len()),
        Change::Sampled => format!(
            "sampled: {:?} id={} p={:.3}",
            frame.sampled.token, frame.sampled.id, frame.sampled.prob
        ),
        Change::Topk => format!("top-k: {}", topk_summary(&frame.topk)),
        Change::Attention => format!(
            "attention L{} H{}: {}",
            frame.attention.layer,
            frame.attention.head,
            shape(&frame.attention.matrix)
        ),
        Change::Mlp => format!(
            "mlp L{}: {}",
            frame.mlp.layer,
            shape(&frame.mlp.activations)
        ),
        Change::Residual => format!(
            "residual L{}: {} norms, max {:.2}",
            frame.residual.layer,
            frame.residual.norms.len(),
            max_of(&frame.residual.norms)
        ),
        Change::ResidualLayersLast => format!(
            "residual by layer: [{}]",
            numbers(&frame.residual_layers_last).join(", ")
        ),
        Change::Meta => format!("device={} done={}", frame.meta.device, frame.meta.done),
        Change::Perf => format!(
            "perf: {} bytes  rtt={:.0}ms",
            view.last_payload_bytes, view.last_round_trip_ms
        ),
        Change::LogLines if show_log => format!("log {}", view.log.last()?),
        Change::LogLines | Change::LastJson => return None,
    };
    Some(line)
}

/// `token(prob)` pairs for the first [`TOPK_SHOWN`] candidates.
fn topk_summary(candidates: &[Value]) -> String {
    if candidates.is_empty() {
        return "(none)".to_string();
    }
    candidates
        .iter()
        .take(TOPK_SHOWN)
        .map(|candidate| {
            let token = candidate
                .as_object()
                .and_then(|c| c.get("token"))
                .map(Value::to_text)
                .unwrap_or_default();
            let prob = candidate
                .as_object()
                .and_then(|c| c.get("prob"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            format!("{token:?}({prob:.3})")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Dimensions of a nested array, following the first element at each level.
fn shape(values: &[Value]) -> String {
    if values.is_empty() {
        return "empty".to_string();
    }
    let mut dims = vec![values.len()];
    let mut current = values.first();
    while let Some(inner) = current.and_then(Value::as_array) {
        dims.push(inner.len());
        current = inner.first();
    }
    dims.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("x")
}

fn numbers(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.as_f64().map_or_else(|| "-".to_string(), |n| format!("{n:.2}")))
        .collect()
}

fn max_of(values: &[Value]) -> f64 {
    values
        .iter()
        .filter_map(Value::as_f64)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hud_client::{decode_message, ChangeSet, TelemetryFrame};
    use std::sync::Arc;

    fn update_from(raw: &str) -> HudUpdate {
        let mut frame = TelemetryFrame::default();
        let changes = frame.apply(&decode_message(raw).unwrap());
        HudUpdate {
            changes,
            view: Arc::new(HudView {
                frame,
                ..HudView::default()
            }),
        }
    }

    #[test]
    fn test_renders_each_present_facet() {
        let update = update_from(
            r#"{"generated":"Hi","sampled":{"id":5,"token":"Hi","prob":0.5},
                "attention":{"layer":1,"head":2,"matrix":[[1,0],[0.5,0.5],[0,1]]},
                "meta":{"device":"cpu","done":true}}"#,
        );
        let lines = render_update(&update, false);
        assert!(lines.contains(&"generated: Hi".to_string()));
        assert!(lines.contains(&"sampled: \"Hi\" id=5 p=0.500".to_string()));
        assert!(lines.contains(&"attention L1 H2: 3x2".to_string()));
        assert!(lines.contains(&"device=cpu done=true".to_string()));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_topk_summary_is_truncated() {
        let candidates: Vec<String> = (0..8)
            .map(|i| format!(r#"{{"id":{i},"token":"t{i}","prob":0.1}}"#))
            .collect();
        let update = update_from(&format!(r#"{{"topk":[{}]}}"#, candidates.join(",")));
        let lines = render_update(&update, false);
        assert_eq!(
            lines,
            vec![r#"top-k: "t0"(0.100) "t1"(0.100) "t2"(0.100) "t3"(0.100) "t4"(0.100)"#]
        );
    }

    #[test]
    fn test_shape_of_nested_arrays() {
        let update = update_from(r#"{"mlp":{"layer":0,"activations":[[[1,2,3,4]]]}}"#);
        assert_eq!(render_update(&update, false), vec!["mlp L0: 1x1x4"]);

        let update = update_from(r#"{"mlp":{"layer":3,"activations":[]}}"#);
        assert_eq!(render_update(&update, false), vec!["mlp L3: empty"]);
    }

    #[test]
    fn test_empty_error_and_log_are_hidden() {
        let update = HudUpdate {
            changes: [Change::LastError, Change::LogLines, Change::Busy]
                .into_iter()
                .collect::<ChangeSet>(),
            view: Arc::new(HudView::default()),
        };
        assert!(render_update(&update, true).is_empty());

        let mut view = HudView::default();
        view.last_error = "model not loaded".to_string();
        view.log.push("BACKEND ERROR: model not loaded");
        let update = HudUpdate {
            changes: update.changes,
            view: Arc::new(view),
        };
        let lines = render_update(&update, true);
        assert_eq!(lines[0], "error: model not loaded");
        assert!(lines[1].ends_with("BACKEND ERROR: model not loaded"));
        assert_eq!(render_update(&update, false).len(), 1);
    }
}
