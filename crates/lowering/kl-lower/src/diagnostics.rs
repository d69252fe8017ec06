//! Location-tagged messages collected during a session

use crate::LowerError;
use derive_more::Display;
use kl_span::{SourceLocation, Span};
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq)]
pub enum Severity {
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
}

/// One reported message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: SourceLocation,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "{}: {}", self.location, self.message),
            Severity::Error => write!(f, "{}: Error: {}", self.location, self.message),
        }
    }
}

/// Sink for the diagnostics of one translation unit
#[derive(Debug)]
pub struct Diagnostics {
    file: Arc<str>,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(file: impl Into<Arc<str>>) -> Self {
        Self {
            file: file.into(),
            entries: Vec::new(),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Records a non-fatal message
    pub fn warning(&mut self, span: Span, message: impl Into<String>) -> &Diagnostic {
        let diagnostic = self.push(Severity::Warning, span, message.into());
        warn!("{diagnostic}");
        diagnostic
    }

    /// Records a fatal error at the location of its innermost cause
    pub fn error(&mut self, err: &LowerError) -> &Diagnostic {
        let span = err.root_cause().span();
        let diagnostic = self.push(Severity::Error, span, err.chain_message());
        error!("{diagnostic}");
        diagnostic
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|entry| entry.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, span: Span, message: String) -> &Diagnostic {
        self.entries.push(Diagnostic {
            severity,
            location: SourceLocation::new(Arc::clone(&self.file), span),
            message,
        });
        &self.entries[self.entries.len() - 1]
    }
}
