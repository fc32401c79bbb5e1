//! Copying subtrees into a tree, with renaming and control-flow rewrites
//!
//! Passes never mutate a node in place when it could be shared; they capture
//! the subtree they want to duplicate and instantiate fresh copies of it.
//! Every copy records the node it came from, so directives bound inside the
//! original follow the copies.

use annotopt_core::ast::{Literal, Node, NodeId, SyntaxTree, Transform};
use annotopt_core::source::Span;
use annotopt_core::{Error, Result};
use rustc_hash::FxHashMap;

/// Detached snapshot of a subtree
#[derive(Debug, Clone)]
pub struct Subtree {
    root: NodeId,
    nodes: FxHashMap<NodeId, Node>,
    spans: FxHashMap<NodeId, Span>,
    origins: FxHashMap<NodeId, NodeId>,
    marks: FxHashMap<NodeId, Transform>,
}

impl Subtree {
    pub fn capture(tree: &SyntaxTree, root: NodeId) -> Result<Self> {
        if !tree.contains(root) {
            return Err(Error::MissingNode(root));
        }
        let mut subtree = Subtree {
            root,
            nodes: FxHashMap::default(),
            spans: FxHashMap::default(),
            origins: FxHashMap::default(),
            marks: FxHashMap::default(),
        };
        for id in tree.preorder(root) {
            subtree.nodes.insert(id, tree.node(id)?.clone());
            subtree.origins.insert(id, tree.origin(id));
            if let Some(span) = tree.span(id) {
                subtree.spans.insert(id, span);
            }
            if let Some(mark) = tree.mark_of(id) {
                subtree.marks.insert(id, mark);
            }
        }
        Ok(subtree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(Error::MissingNode(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Build one copy inside `dest` and return its root. The copy is not yet
    /// attached anywhere.
    pub fn instantiate(&self, dest: &mut SyntaxTree, plan: &CopyPlan) -> Result<NodeId> {
        let mut initial = FxHashMap::default();
        for (from, to) in &plan.renames {
            initial.insert(from.clone(), Binding::Rename(to.clone()));
        }
        for (name, literal) in &plan.substitutions {
            initial.insert(name.clone(), Binding::Literal(literal.clone()));
        }
        let mut copier = Copier {
            subtree: self,
            dest,
            plan,
            scopes: vec![initial],
            labels: vec![FxHashMap::default()],
            closure_depth: 0,
        };
        copier.copy(self.root)
    }
}

/// How a copy differs from its source
#[derive(Debug, Clone, Default)]
pub struct CopyPlan {
    /// Free variables renamed in the copy
    pub renames: FxHashMap<String, String>,
    /// Free variables replaced by a literal
    pub substitutions: FxHashMap<String, Literal>,
    /// Source nodes emitted as the given leaf instead of being copied
    pub overrides: FxHashMap<NodeId, Node>,
    /// Give every binding and label introduced inside the copy a fresh name
    pub rename_locals: bool,
    /// Turn `return v` (outside closures) into `break 'label v`
    pub returns_to: Option<String>,
    /// Span for every copied node instead of the source's own
    pub span: Option<Span>,
}

impl CopyPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    pub fn substitute(mut self, name: impl Into<String>, literal: Literal) -> Self {
        self.substitutions.insert(name.into(), literal);
        self
    }

    pub fn override_node(mut self, source: NodeId, node: Node) -> Self {
        self.overrides.insert(source, node);
        self
    }

    pub fn fresh_locals(mut self) -> Self {
        self.rename_locals = true;
        self
    }

    pub fn returning_to(mut self, label: impl Into<String>) -> Self {
        self.returns_to = Some(label.into());
        self
    }

    pub fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Rename(String),
    Literal(Literal),
    /// Bound inside the copy under its own name
    Local,
}

struct Copier<'a> {
    subtree: &'a Subtree,
    dest: &'a mut SyntaxTree,
    plan: &'a CopyPlan,
    scopes: Vec<FxHashMap<String, Binding>>,
    labels: Vec<FxHashMap<String, String>>,
    closure_depth: usize,
}

impl Copier<'_> {
    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn label(&self, label: &Option<String>) -> Option<String> {
        label.as_ref().map(|label| {
            self.labels
                .iter()
                .rev()
                .find_map(|scope| scope.get(label))
                .cloned()
                .unwrap_or_else(|| label.clone())
        })
    }

    fn bind(&mut self, name: &str) -> String {
        let (renamed, binding) = if self.plan.rename_locals {
            let fresh = self.dest.fresh_name(name);
            (fresh.clone(), Binding::Rename(fresh))
        } else {
            (name.to_string(), Binding::Local)
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
        renamed
    }

    fn bind_label(&mut self, label: &Option<String>) -> Option<String> {
        let label = label.as_ref()?;
        let renamed = if self.plan.rename_locals {
            self.dest.fresh_name(label)
        } else {
            label.clone()
        };
        if let Some(scope) = self.labels.last_mut() {
            scope.insert(label.clone(), renamed.clone());
        }
        Some(renamed)
    }

    fn enter(&mut self) {
        self.scopes.push(FxHashMap::default());
        self.labels.push(FxHashMap::default());
    }

    fn leave(&mut self) {
        self.scopes.pop();
        self.labels.pop();
    }

    fn emit(&mut self, source: NodeId, node: Node) -> Result<NodeId> {
        let span = self
            .plan
            .span
            .or_else(|| self.subtree.spans.get(&source).copied());
        let id = self.dest.add_node_with_span(node, span)?;
        if let Some(origin) = self.subtree.origins.get(&source) {
            self.dest.record_foreign_copy(id, *origin);
        }
        if let Some(mark) = self.subtree.marks.get(&source) {
            self.dest.mark(id, *mark);
        }
        Ok(id)
    }

    fn copy_all(&mut self, ids: &[NodeId]) -> Result<Vec<NodeId>> {
        ids.iter().map(|id| self.copy(*id)).collect()
    }

    fn copy(&mut self, id: NodeId) -> Result<NodeId> {
        if let Some(replacement) = self.plan.overrides.get(&id) {
            return self.emit(id, replacement.clone());
        }
        let node = self.subtree.node(id)?.clone();
        let copied = match node {
            Node::Variable { name } => match self.lookup(&name) {
                Some(Binding::Rename(renamed)) => Node::Variable {
                    name: renamed.clone(),
                },
                Some(Binding::Literal(literal)) => Node::Literal(literal.clone()),
                _ => Node::Variable { name },
            },
            Node::Call { callee, args } => {
                let args = self.copy_all(&args)?;
                let callee = match self.lookup(&callee) {
                    Some(Binding::Rename(renamed)) => renamed.clone(),
                    _ => callee,
                };
                Node::Call { callee, args }
            }
            Node::Block { label, stmts, tail } => {
                self.enter();
                let label = self.bind_label(&label);
                let stmts = self.copy_all(&stmts)?;
                let tail = tail.map(|tail| self.copy(tail)).transpose()?;
                self.leave();
                Node::Block { label, stmts, tail }
            }
            Node::Let {
                name,
                mutable,
                init,
            } => {
                let init = self.copy(init)?;
                let name = self.bind(&name);
                Node::Let {
                    name,
                    mutable,
                    init,
                }
            }
            Node::Loop {
                label,
                induction,
                start,
                end,
                step,
                body,
            } => {
                let start = self.copy(start)?;
                let end = self.copy(end)?;
                let step = self.copy(step)?;
                self.enter();
                let label = self.bind_label(&label);
                let induction = self.bind(&induction);
                let body = self.copy(body)?;
                self.leave();
                Node::Loop {
                    label,
                    induction,
                    start,
                    end,
                    step,
                    body,
                }
            }
            Node::Closure { params, body } => {
                self.enter();
                let params = params.iter().map(|param| self.bind(param)).collect();
                self.closure_depth += 1;
                let body = self.copy(body);
                self.closure_depth -= 1;
                self.leave();
                Node::Closure {
                    params,
                    body: body?,
                }
            }
            Node::FunctionDecl {
                name,
                params,
                variadic,
                body,
            } => {
                self.enter();
                let params = params.iter().map(|param| self.bind(param)).collect();
                let body = self.copy(body)?;
                self.leave();
                Node::FunctionDecl {
                    name,
                    params,
                    variadic,
                    body,
                }
            }
            Node::Return { value } if self.closure_depth == 0 && self.plan.returns_to.is_some() => {
                let value = value.map(|value| self.copy(value)).transpose()?;
                Node::Break {
                    label: self.plan.returns_to.clone(),
                    value,
                }
            }
            Node::Break { label, value } => {
                let value = value.map(|value| self.copy(value)).transpose()?;
                Node::Break {
                    label: self.label(&label),
                    value,
                }
            }
            Node::Continue { label } => Node::Continue {
                label: self.label(&label),
            },
            other => {
                let mut mapped = FxHashMap::default();
                for child in other.children() {
                    mapped.insert(child, self.copy(child)?);
                }
                other.map_children(&mut |child| mapped.get(&child).copied().unwrap_or(child))
            }
        };
        self.emit(id, copied)
    }
}

#[cfg(test)]
#[path = "rewrite_tests.rs"]
mod tests;
