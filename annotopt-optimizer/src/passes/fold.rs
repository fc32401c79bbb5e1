//! Constant folding and dead-branch stripping over a whole function

use annotopt_core::ast::{BinaryOp, Literal, Node, NodeId, SyntaxTree, Transform, UnaryOp};
use annotopt_core::{Error, Result};
use tracing::debug;

use crate::context::PassContext;
use crate::passes::{
    inapplicable, mark_if_unmarked, nothing_to_do, swap_rebuilt, Applicability, Pass, PassRequest,
    SubRewrite, TransformationResult,
};

/// Strips branches whose condition is a literal and statements that follow
/// an unconditional transfer. With `fold_constants` it first folds operators
/// applied to literals, the same way the interpreter would evaluate them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadBranchPass {
    pub fold_constants: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Simplification {
    Fold(Literal),
    /// `if` with a literal condition; the branch taken, if any
    Strip(Option<NodeId>),
    /// Block statements from this index on never run
    Truncate(usize),
}

#[derive(Debug, Default)]
struct Tally {
    folded: usize,
    stripped: usize,
    truncated: usize,
}

impl DeadBranchPass {
    pub fn folding() -> Self {
        Self {
            fold_constants: true,
        }
    }

    pub fn stripping() -> Self {
        Self {
            fold_constants: false,
        }
    }

    fn simplification(&self, tree: &SyntaxTree, id: NodeId) -> Option<Simplification> {
        match tree.get_node(id)? {
            Node::Binary { op, lhs, rhs } if self.fold_constants => {
                fold_binary(*op, literal(tree, *lhs)?, literal(tree, *rhs)?)
                    .map(Simplification::Fold)
            }
            Node::Unary { op, operand } if self.fold_constants => {
                fold_unary(*op, literal(tree, *operand)?).map(Simplification::Fold)
            }
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => match literal(tree, *condition)? {
                Literal::Bool(true) => Some(Simplification::Strip(Some(*then_branch))),
                Literal::Bool(false) => Some(Simplification::Strip(*else_branch)),
                _ => None,
            },
            Node::Block { stmts, tail, .. } => {
                let end = stmts.iter().position(|stmt| {
                    matches!(
                        tree.get_node(*stmt),
                        Some(Node::Return { .. } | Node::Break { .. } | Node::Continue { .. })
                    )
                })?;
                (end + 1 < stmts.len() || tail.is_some()).then(|| Simplification::Truncate(end + 1))
            }
            _ => None,
        }
    }

    fn function_body(&self, tree: &SyntaxTree, target: NodeId) -> Result<Option<NodeId>> {
        Ok(match tree.node(target)? {
            Node::FunctionDecl { body, .. } => Some(*body),
            _ => None,
        })
    }
}

fn literal(tree: &SyntaxTree, id: NodeId) -> Option<&Literal> {
    match tree.get_node(id)? {
        Node::Literal(literal) => Some(literal),
        _ => None,
    }
}

/// `None` for anything the interpreter would reject at run time
fn fold_binary(op: BinaryOp, lhs: &Literal, rhs: &Literal) -> Option<Literal> {
    use Literal::{Bool, Int, Str};
    Some(match (op, lhs, rhs) {
        (BinaryOp::Add, Str(a), Str(b)) => Str(format!("{}{}", a, b)),
        (BinaryOp::Add, Int(a), Int(b)) => Int(a.checked_add(*b)?),
        (BinaryOp::Sub, Int(a), Int(b)) => Int(a.checked_sub(*b)?),
        (BinaryOp::Mul, Int(a), Int(b)) => Int(a.checked_mul(*b)?),
        (BinaryOp::Div, Int(a), Int(b)) => Int(a.checked_div(*b)?),
        (BinaryOp::Rem, Int(a), Int(b)) => Int(a.checked_rem(*b)?),
        (BinaryOp::Eq, a, b) => Bool(a == b),
        (BinaryOp::Ne, a, b) => Bool(a != b),
        (BinaryOp::Lt, Int(a), Int(b)) => Bool(a < b),
        (BinaryOp::Le, Int(a), Int(b)) => Bool(a <= b),
        (BinaryOp::Gt, Int(a), Int(b)) => Bool(a > b),
        (BinaryOp::Ge, Int(a), Int(b)) => Bool(a >= b),
        (BinaryOp::And, Bool(a), Bool(b)) => Bool(*a && *b),
        (BinaryOp::Or, Bool(a), Bool(b)) => Bool(*a || *b),
        _ => return None,
    })
}

fn fold_unary(op: UnaryOp, operand: &Literal) -> Option<Literal> {
    match (op, operand) {
        (UnaryOp::Neg, Literal::Int(n)) => n.checked_neg().map(Literal::Int),
        (UnaryOp::Not, Literal::Bool(b)) => Some(Literal::Bool(!b)),
        _ => None,
    }
}

impl Pass for DeadBranchPass {
    fn name(&self) -> &'static str {
        if self.fold_constants {
            "fold"
        } else {
            "dead-branch"
        }
    }

    fn check(
        &self,
        tree: &SyntaxTree,
        request: &PassRequest,
        _ctx: &PassContext,
    ) -> Result<Applicability> {
        let body = match self.function_body(tree, request.target)? {
            Some(body) => body,
            None => return Ok(inapplicable(self.name(), "target is not a function")),
        };
        let pending = tree
            .preorder(body)
            .into_iter()
            .any(|id| self.simplification(tree, id).is_some());
        if pending {
            Ok(Applicability::Applicable)
        } else {
            Ok(nothing_to_do("no constant branches or unreachable statements"))
        }
    }

    fn run(
        &self,
        tree: &mut SyntaxTree,
        request: &PassRequest,
        _ctx: &PassContext,
    ) -> Result<TransformationResult> {
        let target = request.target;
        let body = self
            .function_body(tree, target)?
            .ok_or_else(|| Error::invariant(format!("{} is no longer a function", target)))?;

        let mut tally = Tally::default();
        // Children first, so a folded operand is visible to its parent
        for id in tree.postorder(body) {
            let simplification = match self.simplification(tree, id) {
                Some(simplification) => simplification,
                None => continue,
            };
            let span = tree.span(id);
            match simplification {
                Simplification::Fold(value) => {
                    let folded = tree.add_node_with_span(Node::Literal(value), span)?;
                    tree.record_copy(folded, id);
                    tree.mark(folded, Transform::Folded);
                    tree.replace(id, folded)?;
                    tally.folded += 1;
                }
                Simplification::Strip(taken) => {
                    let replacement = match taken {
                        Some(branch) => branch,
                        None => tree.add_node_with_span(Node::Nop, span)?,
                    };
                    mark_if_unmarked(tree, replacement, Transform::Folded);
                    tree.replace(id, replacement)?;
                    tally.stripped += 1;
                }
                Simplification::Truncate(keep) => {
                    if let Node::Block { label, stmts, .. } = tree.node(id)? {
                        let truncated = Node::Block {
                            label: label.clone(),
                            stmts: stmts[..keep].to_vec(),
                            tail: None,
                        };
                        swap_rebuilt(tree, id, truncated)?;
                        tally.truncated += 1;
                    }
                }
            }
        }

        debug!(
            function = %target,
            folded = tally.folded,
            stripped = tally.stripped,
            truncated = tally.truncated,
            "simplified function"
        );
        let description = format!(
            "folded {} expressions, stripped {} branches, truncated {} blocks",
            tally.folded, tally.stripped, tally.truncated
        );
        Ok(TransformationResult::Rewritten {
            replacement: target,
            applied: vec![SubRewrite::new(self.name(), target, target, description).flagged_unsafe()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folding_matches_evaluation_rules() {
        use Literal::{Bool, Int, Str};
        assert_eq!(fold_binary(BinaryOp::Add, &Int(2), &Int(3)), Some(Int(5)));
        assert_eq!(
            fold_binary(BinaryOp::Add, &Str("a".into()), &Str("b".into())),
            Some(Str("ab".into()))
        );
        assert_eq!(fold_binary(BinaryOp::Div, &Int(1), &Int(0)), None);
        assert_eq!(fold_binary(BinaryOp::Mul, &Int(i64::MAX), &Int(2)), None);
        assert_eq!(fold_binary(BinaryOp::Eq, &Int(1), &Bool(true)), Some(Bool(false)));
        assert_eq!(fold_binary(BinaryOp::Lt, &Str("a".into()), &Str("b".into())), None);
        assert_eq!(fold_unary(UnaryOp::Neg, &Int(i64::MIN)), None);
        assert_eq!(fold_unary(UnaryOp::Not, &Bool(false)), Some(Bool(true)));
    }
}
