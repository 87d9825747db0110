// src/worker/diagnostics.rs
use tracing::{debug, error, info, warn};

/// Startup chatter from the inference backend that is not an error.
pub const BENIGN_DIAGNOSTICS: &[&str] = &[
    "Hi there",
    "cpu backend was already",
    "Platform node has already",
    "I tensorfl",
    "Your CPU supports instructions",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Suppressed,
    Debug,
    Info,
    Warn,
    Error,
}

/// Classifies lines a worker writes to stderr. Known-benign text is
/// suppressed, lines from the worker's own logger keep their level, and
/// anything else is treated as an error.
#[derive(Debug, Clone)]
pub struct DiagnosticFilter {
    benign: Vec<String>,
}

impl DiagnosticFilter {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut benign: Vec<String> = BENIGN_DIAGNOSTICS.iter().map(|s| s.to_string()).collect();
        benign.extend(extra.into_iter().map(Into::into));
        Self { benign }
    }

    pub fn classify(&self, line: &str) -> DiagnosticLevel {
        let trimmed = line.trim();
        if trimmed.is_empty() || self.benign.iter().any(|pattern| trimmed.contains(pattern.as_str())) {
            return DiagnosticLevel::Suppressed;
        }

        match trimmed.split_whitespace().next() {
            Some("TRACE") | Some("DEBUG") => DiagnosticLevel::Debug,
            Some("INFO") => DiagnosticLevel::Info,
            Some("WARN") => DiagnosticLevel::Warn,
            _ => DiagnosticLevel::Error,
        }
    }

    pub fn emit(&self, worker: &str, line: &str) {
        match self.classify(line) {
            DiagnosticLevel::Suppressed => debug!(worker, "suppressed: {}", line.trim()),
            DiagnosticLevel::Debug => debug!(worker, "{}", line.trim()),
            DiagnosticLevel::Info => info!(worker, "{}", line.trim()),
            DiagnosticLevel::Warn => warn!(worker, "{}", line.trim()),
            DiagnosticLevel::Error => error!(worker, "{}", line.trim()),
        }
    }
}

impl Default for DiagnosticFilter {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}
