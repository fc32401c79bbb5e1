//! Individual transformation passes

pub mod collapse;
pub mod dead_code;
pub mod fold;
pub mod inline;
pub mod unroll;

pub use collapse::LoopCollapser;
pub use dead_code::DeadCodePass;
pub use fold::DeadBranchPass;
pub use inline::InlinePass;
pub use unroll::UnrollPass;

use annotopt_core::ast::{Node, NodeId, SyntaxTree, Transform};
use annotopt_core::diagnostic::Diagnostic;
use annotopt_core::directive::{Directive, DirectiveId};
use annotopt_core::Result;
use serde::{Deserialize, Serialize};

use crate::context::PassContext;

/// Who asked for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestOrigin {
    /// A directive naming this node
    Directive,
    /// The `speed` pipeline
    Speed,
    /// The `size` pipeline
    Size,
}

/// One node a pass is asked to transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRequest {
    pub target: NodeId,
    pub directive: Option<DirectiveId>,
    pub origin: RequestOrigin,
    /// Strip-mining factor
    pub factor: Option<u32>,
    /// Skip the compiler oracle
    pub force: bool,
    /// Accept only a full unroll
    pub full_only: bool,
}

impl PassRequest {
    pub fn new(target: NodeId) -> Self {
        Self {
            target,
            directive: None,
            origin: RequestOrigin::Directive,
            factor: None,
            force: false,
            full_only: false,
        }
    }

    /// Request carrying a directive's qualifiers, aimed at one instance of
    /// its target
    pub fn for_directive(directive: &Directive, target: NodeId) -> Self {
        Self {
            directive: Some(directive.id),
            factor: directive.factor(),
            force: directive.is_forced(),
            ..Self::new(target)
        }
    }

    pub fn from_pipeline(directive: &Directive, origin: RequestOrigin, target: NodeId) -> Self {
        Self {
            directive: Some(directive.id),
            origin,
            ..Self::new(target)
        }
    }

    pub fn full_only(mut self) -> Self {
        self.full_only = true;
        self
    }
}

/// One rewrite performed by a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRewrite {
    pub pass: String,
    pub target: NodeId,
    pub replacement: NodeId,
    pub description: String,
    pub is_unsafe: bool,
}

impl SubRewrite {
    pub fn new(
        pass: &str,
        target: NodeId,
        replacement: NodeId,
        description: impl Into<String>,
    ) -> Self {
        Self {
            pass: pass.to_string(),
            target,
            replacement,
            description: description.into(),
            is_unsafe: false,
        }
    }

    pub fn flagged_unsafe(mut self) -> Self {
        self.is_unsafe = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum TransformationResult {
    Rewritten {
        replacement: NodeId,
        applied: Vec<SubRewrite>,
    },
    Declined(Diagnostic),
}

impl TransformationResult {
    pub fn is_rewritten(&self) -> bool {
        matches!(self, TransformationResult::Rewritten { .. })
    }
}

/// Verdict of a pass's own applicability check
#[derive(Debug, Clone)]
pub enum Applicability {
    Applicable,
    Skip(Diagnostic),
}

/// Trait for transformation passes
///
/// `check` never mutates. `run` is only called after `check` said
/// [`Applicability::Applicable`] and swaps its replacement into the tree
/// itself.
pub trait Pass: Send + Sync {
    /// Name of the pass
    fn name(&self) -> &'static str;

    fn check(
        &self,
        tree: &SyntaxTree,
        request: &PassRequest,
        ctx: &PassContext,
    ) -> Result<Applicability>;

    fn run(
        &self,
        tree: &mut SyntaxTree,
        request: &PassRequest,
        ctx: &PassContext,
    ) -> Result<TransformationResult>;

    /// Check, then run when applicable
    fn apply(
        &self,
        tree: &mut SyntaxTree,
        request: &PassRequest,
        ctx: &PassContext,
    ) -> Result<TransformationResult> {
        match self.check(tree, request, ctx)? {
            Applicability::Applicable => self.run(tree, request, ctx),
            Applicability::Skip(diagnostic) => {
                let mut diagnostic = diagnostic
                    .with_node(request.target)
                    .with_span(tree.span(request.target));
                if let Some(directive) = request.directive {
                    diagnostic = diagnostic.with_directive(directive);
                }
                Ok(TransformationResult::Declined(diagnostic))
            }
        }
    }
}

pub(crate) fn inapplicable(pass: &str, reason: impl Into<String>) -> Applicability {
    Applicability::Skip(Diagnostic::inapplicable(pass, reason))
}

pub(crate) fn nothing_to_do(message: impl Into<String>) -> Applicability {
    Applicability::Skip(Diagnostic::nothing_to_do(message))
}

/// Marks are single-valued; an existing mark is the one a re-run looks for
pub(crate) fn mark_if_unmarked(tree: &mut SyntaxTree, id: NodeId, transform: Transform) {
    if tree.mark_of(id).is_none() {
        tree.mark(id, transform);
    }
}

/// Put a rebuilt version of `old` in its slot. The new node inherits the
/// span and mark of `old` and records it as its origin.
pub(crate) fn swap_rebuilt(tree: &mut SyntaxTree, old: NodeId, node: Node) -> Result<NodeId> {
    let span = tree.span(old);
    let rebuilt = tree.add_node_with_span(node, span)?;
    tree.record_copy(rebuilt, old);
    if let Some(mark) = tree.mark_of(old) {
        tree.mark(rebuilt, mark);
    }
    tree.replace(old, rebuilt)?;
    Ok(rebuilt)
}

#[cfg(test)]
#[path = "passes_tests.rs"]
mod passes_tests;
