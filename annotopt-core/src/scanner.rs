//! Directive scanner: reads the sidecar metadata channel and binds every
//! annotation to exactly one node
//!
//! A directive attaches to the nearest node that either
//! - immediately follows it in a pre-order walk of the innermost node
//!   enclosing the annotation, or
//! - immediately encloses it, when the annotation sits in a function's leading
//!   comment block.
//!
//! Placement that could mean more than one node is a syntax error.

use crate::ast::{Node, NodeId, SyntaxTree};
use crate::diagnostic::Diagnostic;
use crate::directive::{parse_annotation, Directive, DirectiveId, DirectiveKind, ParsedAnnotation};
use crate::error::{Error, Result};
use crate::source::{MetadataEntry, Position, SourceUnit, Span};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

/// A directive that could not be bound and was discarded
#[derive(Debug, Clone)]
pub struct RejectedDirective {
    pub kind: DirectiveKind,
    pub text: String,
    pub span: Span,
    pub position: Position,
    pub diagnostic: Diagnostic,
}

/// `speed` and `size` bound to the same function
#[derive(Debug, Clone)]
pub struct Conflict {
    pub function: NodeId,
    pub name: String,
    pub directives: Vec<Directive>,
    pub diagnostic: Diagnostic,
}

/// Outcome of scanning one unit
#[derive(Debug, Clone, Default)]
pub struct DirectiveSet {
    pub bound: Vec<Directive>,
    pub rejected: Vec<RejectedDirective>,
    pub conflicts: Vec<Conflict>,
}

impl DirectiveSet {
    pub fn is_empty(&self) -> bool {
        self.bound.is_empty() && self.rejected.is_empty() && self.conflicts.is_empty()
    }

    pub fn is_conflicted(&self, function: NodeId) -> bool {
        self.conflicts.iter().any(|c| c.function == function)
    }

    pub fn targeting(&self, node: NodeId) -> impl Iterator<Item = &Directive> {
        self.bound.iter().filter(move |d| d.target == node)
    }

    pub fn get(&self, id: DirectiveId) -> Option<&Directive> {
        self.bound.iter().find(|d| d.id == id)
    }
}

enum Binding {
    Bound(NodeId),
    Rejected(Error, Option<NodeId>),
}

pub struct Scanner {
    prefix: String,
}

impl Scanner {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Scan `unit`'s metadata. A malformed or ambiguous annotation fails the
    /// whole unit with [`Error::DirectiveSyntax`].
    pub fn scan(&self, unit: &SourceUnit) -> Result<DirectiveSet> {
        let mut entries: Vec<&MetadataEntry> = unit.metadata.iter().collect();
        entries.sort_by_key(|entry| (entry.span.start, entry.span.end));

        let mut set = DirectiveSet::default();
        let mut next_id = 0;
        for entry in entries {
            let position = unit.source_map.position(entry.span.start);
            let parsed = match parse_annotation(&entry.text, &self.prefix) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => {
                    trace!("ignoring comment at {}", position);
                    continue;
                }
                Err(message) => return Err(Error::DirectiveSyntax { message, position }),
            };
            let id = DirectiveId(next_id);
            next_id += 1;

            match self.bind(unit, entry, &parsed, position)? {
                Binding::Bound(target) => {
                    debug!("bound `{}` at {} to {}", parsed.kind, position, target);
                    set.bound.push(Directive {
                        id,
                        kind: parsed.kind,
                        target,
                        is_unsafe: parsed.is_unsafe,
                        qualifier: parsed.qualifier,
                        span: entry.span,
                        position,
                    });
                }
                Binding::Rejected(error, node) => {
                    warn!("discarding directive at {}: {}", position, error);
                    let mut diagnostic = Diagnostic::from_error(&error)
                        .with_span(Some(entry.span))
                        .with_directive(id);
                    if let Some(node) = node {
                        diagnostic = diagnostic.with_node(node);
                    }
                    set.rejected.push(RejectedDirective {
                        kind: parsed.kind,
                        text: entry.text.trim().to_string(),
                        span: entry.span,
                        position,
                        diagnostic,
                    });
                }
            }
        }

        resolve_conflicts(&unit.tree, &mut set);
        Ok(set)
    }

    fn bind(
        &self,
        unit: &SourceUnit,
        entry: &MetadataEntry,
        parsed: &ParsedAnnotation,
        position: Position,
    ) -> Result<Binding> {
        let tree = &unit.tree;
        let root = match tree.root {
            Some(root) => root,
            None => {
                return Ok(Binding::Rejected(
                    Error::DirectiveUnattached {
                        kind: parsed.kind,
                        position,
                    },
                    None,
                ))
            }
        };

        let candidate = match unit
            .source_map
            .function_leading(entry.span)
            .filter(|function| tree.contains(*function))
        {
            Some(function) => function,
            None => {
                let enclosing = innermost_enclosing(tree, root, entry.span);
                check_trailing(unit, enclosing, entry.span, position)?;
                match following(tree, enclosing, entry.span) {
                    Some(node) => node,
                    None => {
                        return Ok(Binding::Rejected(
                            Error::DirectiveUnattached {
                                kind: parsed.kind,
                                position,
                            },
                            None,
                        ))
                    }
                }
            }
        };

        let mut target = candidate;
        let mut node = tree.node(target)?;
        if parsed.kind == DirectiveKind::Inline && needs_narrowing(tree, target, node) {
            let calls = call_sites_within(tree, target);
            match calls.as_slice() {
                [single] => {
                    target = *single;
                    node = tree.node(target)?;
                }
                [] => {}
                _ => {
                    return Err(Error::DirectiveSyntax {
                        message: format!(
                            "ambiguous `inline`: the statement contains {} calls",
                            calls.len()
                        ),
                        position,
                    })
                }
            }
        }

        let own_product = parsed
            .kind
            .product_mark()
            .is_some_and(|mark| tree.mark_of(target) == Some(mark));
        if parsed.kind.accepts(node) || own_product {
            Ok(Binding::Bound(target))
        } else {
            Ok(Binding::Rejected(
                Error::DirectiveAttachment {
                    kind: parsed.kind,
                    found: node.kind(),
                    position,
                },
                Some(target),
            ))
        }
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(crate::directive::DEFAULT_PREFIX)
    }
}

/// Deepest node whose span strictly contains `span`
fn innermost_enclosing(tree: &SyntaxTree, root: NodeId, span: Span) -> NodeId {
    let mut current = root;
    loop {
        let next = tree
            .children(current)
            .into_iter()
            .find(|child| tree.span(*child).is_some_and(|s| s.encloses(span)));
        match next {
            Some(child) => current = child,
            None => return current,
        }
    }
}

/// First pre-order descendant of `enclosing` that starts after `span`
fn following(tree: &SyntaxTree, enclosing: NodeId, span: Span) -> Option<NodeId> {
    tree.preorder(enclosing)
        .into_iter()
        .skip(1)
        .find(|id| tree.span(*id).is_some_and(|s| s.start >= span.end))
}

/// An annotation trailing a statement on its line, with another statement
/// still to come, could mean either one
fn check_trailing(unit: &SourceUnit, enclosing: NodeId, span: Span, position: Position) -> Result<()> {
    let tree = &unit.tree;
    if !matches!(
        tree.get_node(enclosing),
        Some(Node::Block { .. } | Node::Module { .. })
    ) {
        return Ok(());
    }
    let siblings: Vec<Span> = tree
        .children(enclosing)
        .into_iter()
        .filter_map(|child| tree.span(child))
        .collect();
    let previous = siblings.iter().rev().find(|s| s.end <= span.start);
    let next = siblings.iter().find(|s| s.start >= span.end);
    if let (Some(previous), Some(_)) = (previous, next) {
        let map = &unit.source_map;
        if map.line_of(previous.end.saturating_sub(1)) == map.line_of(span.start) {
            return Err(Error::DirectiveSyntax {
                message: "ambiguous placement: annotation trails a statement and precedes another"
                    .to_string(),
                position,
            });
        }
    }
    Ok(())
}

fn needs_narrowing(tree: &SyntaxTree, id: NodeId, node: &Node) -> bool {
    !DirectiveKind::Inline.accepts(node)
        && node.is_statement()
        && tree.mark_of(id).is_none()
}

/// Calls inside `root`. Nodes produced by inlining count as one call site and
/// are not searched further.
fn call_sites_within(tree: &SyntaxTree, root: NodeId) -> Vec<NodeId> {
    let mut calls = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Some(node) = tree.get_node(id) else {
            continue;
        };
        if id != root && tree.mark_of(id) == Some(crate::ast::Transform::Inlined) {
            calls.push(id);
            continue;
        }
        if matches!(node, Node::Call { .. }) {
            calls.push(id);
        }
        stack.extend(node.children().into_iter().rev());
    }
    calls
}

fn resolve_conflicts(tree: &SyntaxTree, set: &mut DirectiveSet) {
    let mut by_function: FxHashMap<NodeId, Vec<usize>> = FxHashMap::default();
    for (index, directive) in set.bound.iter().enumerate() {
        if directive.kind.is_function_level() {
            by_function.entry(directive.target).or_default().push(index);
        }
    }

    let mut conflicted: Vec<(NodeId, Vec<usize>)> = by_function
        .into_iter()
        .filter(|(_, indices)| {
            let speed = indices
                .iter()
                .any(|i| set.bound[*i].kind == DirectiveKind::FuncSpeed);
            let size = indices
                .iter()
                .any(|i| set.bound[*i].kind == DirectiveKind::FuncSize);
            speed && size
        })
        .collect();
    conflicted.sort_by_key(|(function, _)| *function);

    let mut removed = Vec::new();
    for (function, indices) in conflicted {
        let name = match tree.get_node(function) {
            Some(Node::FunctionDecl { name, .. }) => name.clone(),
            _ => function.to_string(),
        };
        let directives: Vec<Directive> = indices.iter().map(|i| set.bound[*i].clone()).collect();
        let position = directives
            .iter()
            .map(|d| d.position)
            .max()
            .unwrap_or_default();
        let error = Error::DirectiveConflict {
            function: name.clone(),
            position,
        };
        warn!("{}", error);
        let diagnostic = Diagnostic::from_error(&error).with_node(function);
        removed.extend(indices);
        set.conflicts.push(Conflict {
            function,
            name,
            directives,
            diagnostic,
        });
    }

    let mut index = 0;
    set.bound.retain(|_| {
        let keep = !removed.contains(&index);
        index += 1;
        keep
    });
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod tests;
