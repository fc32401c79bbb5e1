//! Source positions, the sidecar metadata channel and compilation units

use crate::ast::{NodeId, SyntaxTree};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open byte range `[start, end)` into the unit's source text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// True when `other` lies inside this span and is not the span itself
    pub fn encloses(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end && *self != other
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// One-based line and column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Offset-to-position map supplied by the front end, plus the leading
/// comment block of every function (where function-level directives live)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    line_starts: Vec<u32>,
    leading_blocks: FxHashMap<NodeId, Span>,
}

impl SourceMap {
    /// Build the line table for `text`
    pub fn from_text(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset as u32 + 1);
            }
        }
        Self {
            line_starts,
            leading_blocks: FxHashMap::default(),
        }
    }

    /// Line/column of a byte offset
    pub fn position(&self, offset: u32) -> Position {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_index).copied().unwrap_or(0);
        Position {
            line: line_index as u32 + 1,
            column: offset - line_start + 1,
        }
    }

    pub fn line_of(&self, offset: u32) -> u32 {
        self.position(offset).line
    }

    /// Record the leading comment block of a function
    pub fn set_leading_block(&mut self, function: NodeId, span: Span) {
        self.leading_blocks.insert(function, span);
    }

    pub fn leading_block(&self, function: NodeId) -> Option<Span> {
        self.leading_blocks.get(&function).copied()
    }

    /// The function whose leading comment block contains `span`, if any
    pub fn function_leading(&self, span: Span) -> Option<NodeId> {
        self.leading_blocks
            .iter()
            .filter(|(_, block)| block.start <= span.start && span.end <= block.end)
            .map(|(id, _)| *id)
            .min_by_key(|id| id.get())
    }
}

/// One entry of the sidecar metadata channel. The front end fills these from
/// comments, pragmas or attributes; the engine only sees the text and range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub span: Span,
    pub text: String,
}

impl MetadataEntry {
    pub fn new(span: Span, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
        }
    }
}

/// A parsed compilation unit as handed over by the front end
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub name: String,
    pub tree: SyntaxTree,
    pub source_map: SourceMap,
    pub metadata: Vec<MetadataEntry>,
}

impl SourceUnit {
    pub fn new(
        name: impl Into<String>,
        tree: SyntaxTree,
        source_map: SourceMap,
        metadata: Vec<MetadataEntry>,
    ) -> Self {
        Self {
            name: name.into(),
            tree,
            source_map,
            metadata,
        }
    }

    /// Position of a node's span start, when the node has a span
    pub fn position_of(&self, node: NodeId) -> Option<Position> {
        self.tree
            .span(node)
            .map(|span| self.source_map.position(span.start))
    }
}
