//! Error types for annotopt

use crate::ast::{NodeId, NodeKind};
use crate::directive::DirectiveKind;
use crate::source::Position;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How serious a failure is for the run that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Recorded for the report, never blocks anything
    Info,
    /// The directive or pass was skipped, the node is unchanged
    Warning,
    /// Stops processing of the file or of the whole run
    Fatal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Directive syntax error at {position}: {message}")]
    DirectiveSyntax { message: String, position: Position },

    #[error("Directive attachment error at {position}: `{kind}` cannot attach to {found}")]
    DirectiveAttachment {
        kind: DirectiveKind,
        found: NodeKind,
        position: Position,
    },

    #[error("Directive attachment error at {position}: no construct follows `{kind}`")]
    DirectiveUnattached { kind: DirectiveKind, position: Position },

    #[error("Directive conflict at {position}: `speed` and `size` both target function `{function}`")]
    DirectiveConflict { function: String, position: Position },

    #[error("{pass} is not applicable: {reason}")]
    TransformationInapplicable { pass: String, reason: String },

    #[error("Internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    #[error("Missing node: {0}")]
    MissingNode(NodeId),

    #[error("Graph node ID overflow: maximum number of nodes reached")]
    GraphNodeIdOverflow,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Severity class of this error
    pub fn severity(&self) -> Severity {
        match self {
            Error::DirectiveAttachment { .. }
            | Error::DirectiveUnattached { .. }
            | Error::DirectiveConflict { .. }
            | Error::TransformationInapplicable { .. } => Severity::Warning,
            Error::DirectiveSyntax { .. }
            | Error::InternalInvariantViolation(_)
            | Error::MissingNode(_)
            | Error::GraphNodeIdOverflow
            | Error::Other(_) => Severity::Fatal,
        }
    }

    /// True for errors that must abort the whole run rather than one file
    pub fn aborts_run(&self) -> bool {
        !matches!(self, Error::DirectiveSyntax { .. }) && self.severity() == Severity::Fatal
    }

    /// Shorthand for an invariant violation
    pub fn invariant(message: impl Into<String>) -> Self {
        Error::InternalInvariantViolation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
