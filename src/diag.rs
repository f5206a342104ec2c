//! Diagnostic entries and the diagnostic arena.
//!
//! Diagnostics accumulate either on the reply currently being built or, when
//! no reply is open (authentication, connection-level events), on the session.
//! They are drained only by an explicit [`Diagnostics::clear`] call.

use crate::error::ServerError;

/// Diagnostic severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational note.
    Info,
    /// Warning that did not abort the statement.
    Warning,
    /// Error.
    Error,
}

/// A single diagnostic record.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Error or warning code; 0 for client-generated entries without one.
    pub code: u32,
    /// SQLSTATE, present only for server-reported conditions.
    pub sql_state: Option<String>,
    pub message: String,
}

impl Diagnostic {
    /// Client-generated diagnostic without a server code.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: 0,
            sql_state: None,
            message: message.into(),
        }
    }

    /// Diagnostic built from a server-reported error.
    pub fn from_server(severity: Severity, err: &ServerError) -> Self {
        Self {
            severity,
            code: err.code,
            sql_state: Some(err.sql_state.clone()),
            message: err.message.clone(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.severity {
            Severity::Info => write!(f, "note: ")?,
            Severity::Warning => write!(f, "warning: ")?,
            Severity::Error => write!(f, "error: ")?,
        }
        write!(f, "{}", self.message)?;
        if self.code != 0 {
            write!(f, " (code {})", self.code)?;
        }
        if let Some(state) = &self.sql_state {
            write!(f, " (SQLSTATE {})", state)?;
        }
        Ok(())
    }
}

/// Ordered collection of diagnostics with severity-filtered retrieval.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Entries keep arrival order.
    pub fn push(&mut self, entry: Diagnostic) {
        self.entries.push(entry);
    }

    /// Number of entries at or above the given severity.
    pub fn entry_count(&self, min: Severity) -> usize {
        self.entries.iter().filter(|e| e.severity >= min).count()
    }

    /// Iterate over entries at or above the given severity, in arrival order.
    pub fn iter(&self, min: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |e| e.severity >= min)
    }

    /// First error-severity entry, if any.
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.entries.iter().find(|e| e.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all accumulated entries. Never called implicitly.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
