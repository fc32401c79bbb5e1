//! Unsafe removal of a marked statement or expression

use annotopt_core::ast::{Node, NodeId, SyntaxTree, Transform};
use annotopt_core::{Error, Result};
use tracing::debug;

use crate::analysis;
use crate::context::PassContext;
use crate::passes::{
    inapplicable, nothing_to_do, Applicability, Pass, PassRequest, SubRewrite,
    TransformationResult,
};

const NAME: &str = "deadcode";

/// Slot a removed node leaves behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vacancy {
    /// Element of a block's statement list
    Statement { parent: NodeId },
    /// Value produced by a block
    Tail,
    /// Expression of an expression statement
    ExprStmt { statement: NodeId },
    /// Body of an `if`, loop or function
    Body,
    Value,
}

/// Removes the node a `deadcode` directive names without proving it dead
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadCodePass;

impl DeadCodePass {
    pub fn new() -> Self {
        Self
    }
}

fn vacancy(tree: &SyntaxTree, id: NodeId) -> Result<Vacancy> {
    let parent = tree
        .parent(id)
        .ok_or_else(|| Error::invariant(format!("{} has no parent slot", id)))?;
    Ok(match tree.node(parent)? {
        Node::Block { tail, .. } if *tail == Some(id) => Vacancy::Tail,
        Node::Block { .. } => Vacancy::Statement { parent },
        Node::ExprStmt { .. } => Vacancy::ExprStmt { statement: parent },
        Node::If {
            then_branch,
            else_branch,
            ..
        } if *then_branch == id || *else_branch == Some(id) => Vacancy::Body,
        Node::Loop { body, .. } | Node::FunctionDecl { body, .. } if *body == id => Vacancy::Body,
        _ => Vacancy::Value,
    })
}

/// Whether a statement after `id` in `block` reads the binding `id` introduces
fn used_later(tree: &SyntaxTree, block: NodeId, id: NodeId, name: &str) -> bool {
    let (stmts, tail) = match tree.get_node(block) {
        Some(Node::Block { stmts, tail, .. }) => (stmts, tail),
        _ => return false,
    };
    let later = stmts
        .iter()
        .skip_while(|stmt| **stmt != id)
        .skip(1)
        .chain(tail.iter());
    for stmt in later {
        if let Some(Node::Let { name: rebound, init, .. }) = tree.get_node(*stmt) {
            if analysis::free_variables(tree, *init).contains(name) {
                return true;
            }
            if rebound == name {
                return false;
            }
            continue;
        }
        if analysis::free_variables(tree, *stmt).contains(name) {
            return true;
        }
    }
    false
}

fn trap(reason: &str) -> Node {
    Node::Trap {
        reason: reason.to_string(),
    }
}

impl Pass for DeadCodePass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn check(
        &self,
        tree: &SyntaxTree,
        request: &PassRequest,
        _ctx: &PassContext,
    ) -> Result<Applicability> {
        let target = request.target;
        if tree.mark_of(target) == Some(Transform::Eliminated) {
            return Ok(nothing_to_do("node was already eliminated"));
        }
        let node = tree.node(target)?;
        if matches!(node, Node::Nop) {
            return Ok(nothing_to_do("statement is already empty"));
        }
        if matches!(
            node,
            Node::Module { .. } | Node::FunctionDecl { .. } | Node::Global { .. }
        ) || tree.root == Some(target)
        {
            return Ok(inapplicable(
                NAME,
                format!("{} is not a statement or expression", node.kind()),
            ));
        }
        if analysis::is_assignment_target(tree, target) {
            return Ok(inapplicable(NAME, "an assignment target cannot be removed"));
        }
        Ok(Applicability::Applicable)
    }

    fn run(
        &self,
        tree: &mut SyntaxTree,
        request: &PassRequest,
        _ctx: &PassContext,
    ) -> Result<TransformationResult> {
        let target = request.target;
        let span = tree.span(target);
        let reason = format!("eliminated {}", target);

        let (removed, replacement) = match vacancy(tree, target)? {
            Vacancy::Statement { parent } => {
                let node = match tree.node(target)? {
                    Node::Let { name, mutable, .. } if used_later(tree, parent, target, name) => {
                        let (name, mutable) = (name.clone(), *mutable);
                        let init = tree.add_node_with_span(trap(&reason), span)?;
                        Node::Let {
                            name,
                            mutable,
                            init,
                        }
                    }
                    Node::Return { value: Some(_) } if ends_function_body(tree, parent, target) => {
                        let expr = tree.add_node_with_span(trap(&reason), span)?;
                        Node::ExprStmt { expr }
                    }
                    _ => Node::Nop,
                };
                (target, node)
            }
            Vacancy::ExprStmt { statement } => (statement, Node::Nop),
            Vacancy::Body => (
                target,
                Node::Block {
                    label: None,
                    stmts: Vec::new(),
                    tail: None,
                },
            ),
            Vacancy::Tail | Vacancy::Value => (target, trap(&reason)),
        };
        let kind = replacement.kind();
        let span = tree.span(removed);
        let replacement = tree.add_node_with_span(replacement, span)?;
        tree.record_copy(replacement, target);
        tree.mark(replacement, Transform::Eliminated);
        tree.replace(removed, replacement)?;
        debug!(target = %target, removed = %removed, replacement = ?kind, "eliminated node");

        Ok(TransformationResult::Rewritten {
            replacement,
            applied: vec![SubRewrite::new(
                NAME,
                target,
                replacement,
                format!("removed {}", target),
            )
            .flagged_unsafe()],
        })
    }
}

/// Whether `stmt` is the last statement of the function body `block`
fn ends_function_body(tree: &SyntaxTree, block: NodeId, stmt: NodeId) -> bool {
    let is_body = matches!(
        tree.parent(block).and_then(|parent| tree.get_node(parent)),
        Some(Node::FunctionDecl { body, .. }) if *body == block
    );
    is_body
        && matches!(
            tree.get_node(block),
            Some(Node::Block { stmts, tail: None, .. }) if stmts.last() == Some(&stmt)
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotopt_core::builder::{Expr, UnitBuilder};

    #[test]
    fn test_let_used_later_keeps_binding() {
        let mut unit = UnitBuilder::new("dead");
        unit.function("main", &[], |b| {
            b.let_("x", Expr::int(1));
            b.let_("y", Expr::int(2));
            b.call("emit", [Expr::var("x")]);
            b.let_("x", Expr::int(3));
        });
        let unit = unit.finish().unwrap();
        let tree = &unit.tree;
        let main = tree.function_named("main").unwrap();
        let body = match tree.node(main).unwrap() {
            Node::FunctionDecl { body, .. } => *body,
            _ => unreachable!(),
        };
        let stmts = match tree.node(body).unwrap() {
            Node::Block { stmts, .. } => stmts.clone(),
            _ => unreachable!(),
        };
        assert!(used_later(tree, body, stmts[0], "x"));
        assert!(!used_later(tree, body, stmts[1], "y"));
        assert!(!used_later(tree, body, stmts[3], "x"));
        assert_eq!(
            vacancy(tree, stmts[1]).unwrap(),
            Vacancy::Statement { parent: body }
        );
    }
}
