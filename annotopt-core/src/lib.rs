//! Core types for annotopt
//!
//! This crate holds the syntax model the optimizer rewrites, the directive
//! grammar and scanner, diagnostics, and a small programmatic front end with a
//! debug emitter.

pub mod ast;
pub mod builder;
pub mod diagnostic;
pub mod directive;
pub mod error;
pub mod printer;
pub mod scanner;
pub mod source;

pub use error::{Error, Result, Severity};

/// Re-exports of the types most callers need
pub mod prelude {
    pub use crate::ast::{BinaryOp, Literal, Node, NodeId, NodeKind, SyntaxTree, Transform, UnaryOp};
    pub use crate::builder::{BlockBuilder, Expr, UnitBuilder};
    pub use crate::diagnostic::{Diagnostic, DiagnosticCode};
    pub use crate::directive::{Directive, DirectiveId, DirectiveKind, Qualifier};
    pub use crate::error::{Error, Result, Severity};
    pub use crate::scanner::{DirectiveSet, Scanner};
    pub use crate::source::{MetadataEntry, Position, SourceMap, SourceUnit, Span};
}
