//! Structured diagnostics recorded during a run

use crate::ast::NodeId;
use crate::directive::DirectiveId;
use crate::error::{Error, Severity};
use crate::source::{Position, Span};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    DirectiveSyntax,
    DirectiveAttachment,
    DirectiveConflict,
    TransformationInapplicable,
    /// An unsafe pass was applied
    TransformationUnsafe,
    InternalInvariantViolation,
    /// The target already satisfies the pass's post-condition
    NothingToDo,
    /// The native compiler is expected to inline the callee itself
    CompilerAutoInline,
}

impl DiagnosticCode {
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticCode::DirectiveSyntax | DiagnosticCode::InternalInvariantViolation => {
                Severity::Fatal
            }
            DiagnosticCode::DirectiveAttachment
            | DiagnosticCode::DirectiveConflict
            | DiagnosticCode::TransformationInapplicable => Severity::Warning,
            DiagnosticCode::TransformationUnsafe
            | DiagnosticCode::NothingToDo
            | DiagnosticCode::CompilerAutoInline => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub span: Option<Span>,
    pub position: Option<Position>,
    pub node: Option<NodeId>,
    pub directive: Option<DirectiveId>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: code.severity(),
            code,
            message: message.into(),
            span: None,
            position: None,
            node: None,
            directive: None,
        }
    }

    pub fn nothing_to_do(message: impl Into<String>) -> Self {
        Self::new(DiagnosticCode::NothingToDo, message)
    }

    pub fn inapplicable(pass: &str, reason: impl Into<String>) -> Self {
        let error = Error::TransformationInapplicable {
            pass: pass.to_string(),
            reason: reason.into(),
        };
        Self::from_error(&error)
    }

    /// Diagnostic for a recoverable or fatal engine error
    pub fn from_error(error: &Error) -> Self {
        let (code, position) = match error {
            Error::DirectiveSyntax { position, .. } => {
                (DiagnosticCode::DirectiveSyntax, Some(*position))
            }
            Error::DirectiveAttachment { position, .. }
            | Error::DirectiveUnattached { position, .. } => {
                (DiagnosticCode::DirectiveAttachment, Some(*position))
            }
            Error::DirectiveConflict { position, .. } => {
                (DiagnosticCode::DirectiveConflict, Some(*position))
            }
            Error::TransformationInapplicable { .. } => {
                (DiagnosticCode::TransformationInapplicable, None)
            }
            Error::InternalInvariantViolation(_)
            | Error::MissingNode(_)
            | Error::GraphNodeIdOverflow
            | Error::Other(_) => (DiagnosticCode::InternalInvariantViolation, None),
        };
        let mut diagnostic = Self::new(code, error.to_string());
        diagnostic.severity = error.severity();
        diagnostic.position = position;
        diagnostic
    }

    pub fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    pub fn with_position(mut self, position: Option<Position>) -> Self {
        if position.is_some() {
            self.position = position;
        }
        self
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_directive(mut self, directive: DirectiveId) -> Self {
        self.directive = Some(directive);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Fatal => "error",
        };
        match self.position {
            Some(position) => write!(f, "{}[{:?}] {}: {}", level, self.code, position, self.message),
            None => write!(f, "{}[{:?}]: {}", level, self.code, self.message),
        }
    }
}
