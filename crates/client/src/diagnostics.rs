//! Bounded diagnostics log shown to the operator.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local};

/// Maximum number of retained lines.
pub const MAX_LOG_LINES: usize = 500;

/// Fixed-capacity, append-only ring of timestamped lines.
///
/// Oldest lines are evicted first once [`MAX_LOG_LINES`] is exceeded.
/// Lines are reference counted, so cloning the log does not copy text.
#[derive(Debug, Clone)]
pub struct DiagnosticsLog {
    lines: VecDeque<Arc<str>>,
    capacity: usize,
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsLog {
    /// Create an empty log with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_LINES)
    }

    /// Create an empty log holding at most `capacity` lines.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(MAX_LOG_LINES)),
            capacity: capacity.max(1),
        }
    }

    /// Append a line stamped with the current wall-clock time.
    pub fn push(&mut self, message: impl AsRef<str>) {
        self.push_at(Local::now(), message);
    }

    /// Append a line stamped with `at`, formatted `[HH:MM:SS.mmm] message`.
    pub fn push_at(&mut self, at: DateTime<Local>, message: impl AsRef<str>) {
        let line = format!("[{}] {}", at.format("%H:%M:%S%.3f"), message.as_ref());
        self.lines.push_back(Arc::from(line));
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    /// Remove every line. Returns `false` (and does nothing) if already empty.
    pub fn clear(&mut self) -> bool {
        if self.lines.is_empty() {
            return false;
        }
        self.lines.clear();
        true
    }

    /// Number of retained lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Most recent line, if any.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(|line| &**line)
    }

    /// Lines oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|line| &**line)
    }

    /// Copy of all lines, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().map(|line| line.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_line_format() {
        let mut log = DiagnosticsLog::new();
        let at = Local.with_ymd_and_hms(2024, 5, 1, 9, 4, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        log.push_at(at, "CONNECTED");
        assert_eq!(log.last(), Some("[09:04:07.042] CONNECTED"));
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut log = DiagnosticsLog::new();
        for i in 0..600 {
            log.push(format!("line {i}"));
        }
        assert_eq!(log.len(), MAX_LOG_LINES);
        let lines = log.to_vec();
        assert!(lines[0].ends_with("] line 100"));
        assert!(lines[499].ends_with("] line 599"));
        for (offset, line) in lines.iter().enumerate() {
            assert!(line.ends_with(&format!("] line {}", offset + 100)));
        }
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut log = DiagnosticsLog::new();
        log.push("x");
        assert!(log.clear());
        assert!(!log.clear());
        assert!(log.is_empty());
    }

    #[test]
    fn test_small_capacity() {
        let mut log = DiagnosticsLog::with_capacity(2);
        log.push("a");
        log.push("b");
        log.push("c");
        let tail: Vec<&str> = log.iter().collect();
        assert_eq!(tail.len(), 2);
        assert!(tail[0].ends_with(" b"));
    }

    #[test]
    fn test_clone_shares_line_text() {
        let mut log = DiagnosticsLog::new();
        log.push("shared");
        let copy = log.clone();
        assert!(Arc::ptr_eq(&log.lines[0], &copy.lines[0]));

        log.push("only in original");
        assert_eq!(copy.len(), 1);
        assert_eq!(log.len(), 2);
    }
}
