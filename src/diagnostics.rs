//! In-memory diagnostic trail handed back to the host application
//!
//! Mirrors what is logged through `tracing` for bootstrap and session
//! lifecycle, so a host without access to the process log can still show
//! why a database could not be opened.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const DEFAULT_CAPACITY: usize = 512;

/// Bounded, shared log of diagnostic lines; the oldest lines are dropped first
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl DiagnosticLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn error(&self, line: impl AsRef<str>) {
        self.record(format!("Error: {}", line.as_ref()));
    }

    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    /// All lines joined with newlines
    pub fn render(&self) -> String {
        self.lines().join("\n")
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
