//! Per-run report: what happened to every directive and why

use annotopt_core::ast::{Node, NodeId, SyntaxTree};
use annotopt_core::diagnostic::{Diagnostic, DiagnosticCode};
use annotopt_core::directive::{Directive, DirectiveId, DirectiveKind};
use annotopt_core::scanner::DirectiveSet;
use annotopt_core::source::{Position, SourceMap, Span};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::passes::SubRewrite;

/// Outcome of one pass invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PassOutcome {
    Applied(Vec<SubRewrite>),
    Declined(Diagnostic),
}

/// One pass invocation, as recorded by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassRecord {
    pub directive: Option<DirectiveId>,
    pub function: String,
    pub pass: String,
    pub target: NodeId,
    pub outcome: PassOutcome,
}

impl PassRecord {
    pub fn is_applied(&self) -> bool {
        matches!(self.outcome, PassOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectiveStatus {
    /// At least one pass rewrote something for the directive
    Applied,
    /// Every pass declined, or nothing was left to transform
    Skipped,
    /// `speed` and `size` on the same function
    Conflict,
    /// Never bound
    Discarded,
}

impl fmt::Display for DirectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DirectiveStatus::Applied => "applied",
            DirectiveStatus::Skipped => "skipped",
            DirectiveStatus::Conflict => "conflict",
            DirectiveStatus::Discarded => "discarded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassApplication {
    pub pass: String,
    pub function: String,
    pub target: NodeId,
    pub replacement: NodeId,
    pub description: String,
    pub is_unsafe: bool,
    pub directive: Option<DirectiveId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveOutcome {
    pub directive: Option<DirectiveId>,
    pub kind: DirectiveKind,
    /// Source form of the annotation
    pub description: String,
    pub target: Option<NodeId>,
    pub function: Option<String>,
    pub is_unsafe: bool,
    pub span: Span,
    pub position: Position,
    pub status: DirectiveStatus,
    pub reasons: Vec<Diagnostic>,
    pub applications: Vec<PassApplication>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub unit: String,
    pub directives: Vec<DirectiveOutcome>,
    /// Every diagnostic of the run, reasons and unsafe notices alike
    pub diagnostics: Vec<Diagnostic>,
    pub unsafe_applications: usize,
}

fn function_of(tree: &SyntaxTree, node: NodeId) -> Option<String> {
    tree.enclosing_function(node)
        .and_then(|id| match tree.get_node(id) {
            Some(Node::FunctionDecl { name, .. }) => Some(name.clone()),
            _ => None,
        })
}

fn locate(mut diagnostic: Diagnostic, source_map: &SourceMap) -> Diagnostic {
    if diagnostic.position.is_none() {
        diagnostic.position = diagnostic.span.map(|span| source_map.position(span.start));
    }
    diagnostic
}

impl RunReport {
    /// Assemble the report from the pass log. `original` is the tree the
    /// directives were bound against.
    pub fn build(
        unit: &str,
        original: &SyntaxTree,
        source_map: &SourceMap,
        set: &DirectiveSet,
        records: &[PassRecord],
    ) -> Self {
        let mut directives = Vec::new();

        for directive in &set.bound {
            let outcome = Self::bound_outcome(original, set, records, directive);
            directives.push(outcome);
        }
        for conflict in &set.conflicts {
            for directive in &conflict.directives {
                directives.push(DirectiveOutcome {
                    directive: Some(directive.id),
                    kind: directive.kind,
                    description: directive.describe(),
                    target: Some(directive.target),
                    function: Some(conflict.name.clone()),
                    is_unsafe: directive.is_unsafe,
                    span: directive.span,
                    position: directive.position,
                    status: DirectiveStatus::Conflict,
                    reasons: vec![conflict.diagnostic.clone()],
                    applications: Vec::new(),
                });
            }
        }
        for rejected in &set.rejected {
            directives.push(DirectiveOutcome {
                directive: rejected.diagnostic.directive,
                kind: rejected.kind,
                description: rejected.text.clone(),
                target: rejected.diagnostic.node,
                function: rejected
                    .diagnostic
                    .node
                    .and_then(|node| function_of(original, node)),
                is_unsafe: false,
                span: rejected.span,
                position: rejected.position,
                status: DirectiveStatus::Discarded,
                reasons: vec![rejected.diagnostic.clone()],
                applications: Vec::new(),
            });
        }
        directives.sort_by_key(|outcome| (outcome.span.start, outcome.span.end));

        let mut diagnostics = Vec::new();
        let mut unsafe_applications = 0;
        for outcome in &mut directives {
            outcome.reasons = std::mem::take(&mut outcome.reasons)
                .into_iter()
                .map(|reason| locate(reason, source_map))
                .collect();
            diagnostics.extend(outcome.reasons.iter().cloned());
            for application in outcome.applications.iter().filter(|a| a.is_unsafe) {
                unsafe_applications += 1;
                let notice = Diagnostic::new(
                    DiagnosticCode::TransformationUnsafe,
                    format!(
                        "unsafe `{}` applied in `{}`: {}",
                        application.pass, application.function, application.description
                    ),
                )
                .with_node(application.target)
                .with_span(original.span(application.target).or(Some(outcome.span)));
                let notice = match application.directive {
                    Some(directive) => notice.with_directive(directive),
                    None => notice,
                };
                diagnostics.push(locate(notice, source_map));
            }
        }
        // Declines logged outside any directive still belong in the run's log
        for record in records.iter().filter(|record| record.directive.is_none()) {
            if let PassOutcome::Declined(diagnostic) = &record.outcome {
                diagnostics.push(locate(diagnostic.clone(), source_map));
            }
        }

        Self {
            unit: unit.to_string(),
            directives,
            diagnostics,
            unsafe_applications,
        }
    }

    fn bound_outcome(
        original: &SyntaxTree,
        set: &DirectiveSet,
        records: &[PassRecord],
        directive: &Directive,
    ) -> DirectiveOutcome {
        let function = function_of(original, directive.target);
        let mut outcome = DirectiveOutcome {
            directive: Some(directive.id),
            kind: directive.kind,
            description: directive.describe(),
            target: Some(directive.target),
            function: function.clone(),
            is_unsafe: directive.is_unsafe,
            span: directive.span,
            position: directive.position,
            status: DirectiveStatus::Skipped,
            reasons: Vec::new(),
            applications: Vec::new(),
        };

        let conflicted = original
            .enclosing_function(directive.target)
            .map_or(false, |id| set.is_conflicted(id));
        if conflicted {
            outcome.reasons.push(
                Diagnostic::new(
                    DiagnosticCode::DirectiveConflict,
                    format!(
                        "function `{}` carries both `speed` and `size`; no pass ran",
                        function.as_deref().unwrap_or("?")
                    ),
                )
                .with_directive(directive.id)
                .with_span(Some(directive.span))
                .with_position(Some(directive.position)),
            );
            return outcome;
        }

        for record in records
            .iter()
            .filter(|record| record.directive == Some(directive.id))
        {
            match &record.outcome {
                PassOutcome::Applied(rewrites) => {
                    outcome.status = DirectiveStatus::Applied;
                    outcome
                        .applications
                        .extend(rewrites.iter().map(|rewrite| PassApplication {
                            pass: rewrite.pass.clone(),
                            function: record.function.clone(),
                            target: rewrite.target,
                            replacement: rewrite.replacement,
                            description: rewrite.description.clone(),
                            is_unsafe: rewrite.is_unsafe,
                            directive: record.directive,
                        }));
                }
                PassOutcome::Declined(diagnostic) => outcome.reasons.push(diagnostic.clone()),
            }
        }
        outcome.is_unsafe |= outcome.applications.iter().any(|a| a.is_unsafe);
        if outcome.status == DirectiveStatus::Skipped && outcome.reasons.is_empty() {
            outcome.reasons.push(
                Diagnostic::nothing_to_do("no instance of the target was left to transform")
                    .with_directive(directive.id)
                    .with_node(directive.target)
                    .with_span(Some(directive.span))
                    .with_position(Some(directive.position)),
            );
        }
        outcome
    }

    pub fn outcome(&self, directive: DirectiveId) -> Option<&DirectiveOutcome> {
        self.directives
            .iter()
            .find(|outcome| outcome.directive == Some(directive))
    }

    pub fn count(&self, status: DirectiveStatus) -> usize {
        self.directives
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    pub fn applied_count(&self) -> usize {
        self.count(DirectiveStatus::Applied)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} directives, {} applied, {} unsafe rewrites",
            self.unit,
            self.directives.len(),
            self.applied_count(),
            self.unsafe_applications
        )?;
        for outcome in &self.directives {
            write!(
                f,
                "  {} `{}` {}",
                outcome.position, outcome.description, outcome.status
            )?;
            if let Some(function) = &outcome.function {
                write!(f, " in `{}`", function)?;
            }
            writeln!(f)?;
            for application in &outcome.applications {
                writeln!(f, "    {}: {}", application.pass, application.description)?;
            }
            for reason in &outcome.reasons {
                writeln!(f, "    {}", reason)?;
            }
        }
        Ok(())
    }
}
