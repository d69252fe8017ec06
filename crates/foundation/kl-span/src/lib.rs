//! Source positions, spans and file-qualified locations

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A 1-based line/column position in a source file
#[derive(
    Copy, Clone, Debug, Display, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[display("{line}:{column}")]
pub struct Position {
    /// Line number, starting at 1
    pub line: u32,
    /// Column number, starting at 1
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

/// The region of source text a node was parsed from
#[derive(
    Copy, Clone, Debug, Default, Display, Hash, Eq, PartialEq, Serialize, Deserialize,
)]
#[display("{begin}")]
pub struct Span {
    pub begin: Position,
    pub end: Position,
}

impl Span {
    pub fn new(begin: Position, end: Position) -> Self {
        Self { begin, end }
    }

    /// A zero-width span at `line:column`
    pub fn point(line: u32, column: u32) -> Self {
        let pos = Position::new(line, column);
        Self { begin: pos, end: pos }
    }

    /// Smallest span covering both `self` and `other`
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }
}

/// A span qualified with the name of the file it belongs to
#[derive(Clone, Debug, Display, Hash, Eq, PartialEq)]
#[display("{file}:{span}")]
pub struct SourceLocation {
    pub file: Arc<str>,
    pub span: Span,
}

impl SourceLocation {
    pub fn new(file: Arc<str>, span: Span) -> Self {
        Self { file, span }
    }
}
