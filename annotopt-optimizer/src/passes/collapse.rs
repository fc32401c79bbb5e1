//! Re-rolling runs of near-identical statements into counted loops

use annotopt_core::ast::{BinaryOp, Literal, Node, NodeId, SyntaxTree, Transform};
use annotopt_core::source::Span;
use annotopt_core::{Error, Result};
use rustc_hash::{FxHashSet, FxHasher};
use std::hash::{Hash, Hasher};
use tracing::{debug, trace};

use crate::context::PassContext;
use crate::passes::{
    inapplicable, nothing_to_do, swap_rebuilt, Applicability, Pass, PassRequest, SubRewrite,
    TransformationResult,
};
use crate::rewrite::{CopyPlan, Subtree};

const NAME: &str = "collapse";

/// Replaces `min_run` or more consecutive statements that differ only in
/// integer literals stepping by a constant into one counted loop
#[derive(Debug, Clone)]
pub struct LoopCollapser {
    pub min_run: usize,
    /// Nodes other directives still name; a run never swallows them
    pub protected: FxHashSet<NodeId>,
}

/// A statement with its integer literals cut out
#[derive(Debug, Clone)]
struct Shape {
    skeleton: u64,
    holes: Vec<NodeId>,
    values: Vec<i64>,
}

#[derive(Debug, Clone)]
struct Run {
    block: NodeId,
    first: usize,
    len: usize,
    /// Start and stride of every hole of the first statement
    progressions: Vec<(NodeId, i64, i64)>,
}

impl Run {
    fn varying(&self) -> impl Iterator<Item = &(NodeId, i64, i64)> {
        self.progressions.iter().filter(|(_, _, stride)| *stride != 0)
    }

    /// Start and stride shared by every varying hole, when the stride is
    /// positive
    fn uniform(&self) -> Option<(i64, i64)> {
        let mut varying = self.varying();
        let (_, start, stride) = *varying.next()?;
        let shared = varying.all(|(_, a, d)| *a == start && *d == stride);
        (shared && stride > 0).then_some((start, stride))
    }
}

impl LoopCollapser {
    pub fn new(min_run: usize) -> Self {
        Self {
            min_run: min_run.max(2),
            protected: FxHashSet::default(),
        }
    }

    pub fn protecting(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.protected.extend(nodes);
        self
    }

    fn shape(&self, tree: &SyntaxTree, stmt: NodeId) -> Option<Shape> {
        if !matches!(
            tree.get_node(stmt)?,
            Node::ExprStmt { .. } | Node::Assign { .. }
        ) {
            return None;
        }
        let mut hasher = FxHasher::default();
        let mut holes = Vec::new();
        let mut values = Vec::new();
        for id in tree.preorder(stmt) {
            if self.protected.contains(&id) || tree.mark_of(id).is_some() {
                return None;
            }
            let node = tree.get_node(id)?;
            std::mem::discriminant(node).hash(&mut hasher);
            match node {
                Node::ExprStmt { .. } | Node::Index { .. } => {}
                Node::Assign { op, .. } => op.hash(&mut hasher),
                Node::Literal(Literal::Int(value)) => {
                    holes.push(id);
                    values.push(*value);
                }
                Node::Literal(literal) => literal.hash(&mut hasher),
                Node::Variable { name } => name.hash(&mut hasher),
                Node::Unary { op, .. } => op.hash(&mut hasher),
                Node::Binary { op, .. } => op.hash(&mut hasher),
                Node::Call { callee, args } => {
                    callee.hash(&mut hasher);
                    args.len().hash(&mut hasher);
                }
                Node::Array { elements } => elements.len().hash(&mut hasher),
                _ => return None,
            }
        }
        Some(Shape {
            skeleton: hasher.finish(),
            holes,
            values,
        })
    }

    /// Whether `block` sits inside something a pass already produced
    fn is_settled(&self, tree: &SyntaxTree, block: NodeId) -> bool {
        std::iter::once(block)
            .chain(tree.ancestors(block))
            .any(|id| {
                matches!(
                    tree.mark_of(id),
                    Some(Transform::Unrolled | Transform::Collapsed)
                )
            })
    }

    fn runs_in_block(&self, tree: &SyntaxTree, block: NodeId, stmts: &[NodeId]) -> Vec<Run> {
        let shapes: Vec<Option<Shape>> = stmts.iter().map(|stmt| self.shape(tree, *stmt)).collect();
        let mut runs = Vec::new();
        let mut first = 0;
        while first + 1 < stmts.len() {
            let len = match &shapes[first] {
                Some(head) => self.run_length(head, &shapes[first + 1..]),
                None => 1,
            };
            if len >= self.min_run {
                if let Some(head) = &shapes[first] {
                    let second = shapes[first + 1].as_ref().map(|s| &s.values);
                    let progressions = head
                        .holes
                        .iter()
                        .zip(&head.values)
                        .zip(second.into_iter().flatten())
                        .map(|((hole, a), b)| (*hole, *a, b - a))
                        .collect();
                    runs.push(Run {
                        block,
                        first,
                        len,
                        progressions,
                    });
                }
                first += len;
            } else {
                first += 1;
            }
        }
        runs
    }

    /// Statements, `head` included, continuing the progression `head` starts
    fn run_length(&self, head: &Shape, rest: &[Option<Shape>]) -> usize {
        let second = match rest.first() {
            Some(Some(second)) if second.skeleton == head.skeleton => second,
            _ => return 1,
        };
        if second.values.len() != head.values.len() {
            return 1;
        }
        let strides: Option<Vec<i64>> = head
            .values
            .iter()
            .zip(&second.values)
            .map(|(a, b)| b.checked_sub(*a))
            .collect();
        let strides = match strides {
            Some(strides) if strides.iter().any(|d| *d != 0) => strides,
            _ => return 1,
        };
        let mut len = 2;
        let mut previous = second;
        for next in rest[1..].iter() {
            let next = match next {
                Some(next)
                    if next.skeleton == head.skeleton && next.values.len() == head.values.len() =>
                {
                    next
                }
                _ => break,
            };
            let continues = previous
                .values
                .iter()
                .zip(&next.values)
                .zip(&strides)
                .all(|((a, b), d)| b.checked_sub(*a) == Some(*d));
            if !continues {
                break;
            }
            len += 1;
            previous = next;
        }
        len
    }

    fn find_runs(&self, tree: &SyntaxTree, body: NodeId) -> Vec<Run> {
        let mut runs = Vec::new();
        for id in tree.preorder(body) {
            if let Some(Node::Block { stmts, .. }) = tree.get_node(id) {
                if stmts.len() < self.min_run || self.is_settled(tree, id) {
                    continue;
                }
                runs.extend(self.runs_in_block(tree, id, stmts));
            }
        }
        runs
    }

    fn function_body(&self, tree: &SyntaxTree, target: NodeId) -> Result<Option<NodeId>> {
        Ok(match tree.node(target)? {
            Node::FunctionDecl { body, .. } => Some(*body),
            _ => None,
        })
    }

    /// Build the loop standing in for `run`
    fn reroll(&self, tree: &mut SyntaxTree, run: &Run, stmts: &[NodeId]) -> Result<NodeId> {
        let span = match (
            tree.span(stmts[run.first]),
            tree.span(stmts[run.first + run.len - 1]),
        ) {
            (Some(first), Some(last)) => Some(Span::new(first.start, last.end)),
            (first, last) => first.or(last),
        };
        let node = |tree: &mut SyntaxTree, node: Node| tree.add_node_with_span(node, span);
        let count = i64::try_from(run.len)
            .map_err(|_| Error::invariant("statement run longer than i64::MAX"))?;
        let template = Subtree::capture(tree, stmts[run.first])?;
        let induction = tree.fresh_name("i");
        let mut plan = CopyPlan::new();
        let mut prelude = Vec::new();

        let (start, end, step) = match run.uniform() {
            // for i in a..a+r*d step d
            Some((a, d)) => {
                let end = count
                    .checked_mul(d)
                    .and_then(|extent| a.checked_add(extent))
                    .ok_or_else(|| Error::invariant("collapsed loop bound overflow"))?;
                for (hole, _, _) in run.varying() {
                    plan = plan.override_node(*hole, Node::var(&induction));
                }
                (a, end, d)
            }
            // for t in 0..r, one temporary per varying literal
            None => {
                for (hole, a, d) in run.varying() {
                    let value = tree.fresh_name("v");
                    let counter = node(tree, Node::var(&induction))?;
                    let stride = node(tree, Node::int(*d))?;
                    let offset = node(
                        tree,
                        Node::Binary {
                            op: BinaryOp::Mul,
                            lhs: counter,
                            rhs: stride,
                        },
                    )?;
                    let base = node(tree, Node::int(*a))?;
                    let init = node(
                        tree,
                        Node::Binary {
                            op: BinaryOp::Add,
                            lhs: base,
                            rhs: offset,
                        },
                    )?;
                    prelude.push(node(
                        tree,
                        Node::Let {
                            name: value.clone(),
                            mutable: false,
                            init,
                        },
                    )?);
                    plan = plan.override_node(*hole, Node::var(value));
                }
                (0, count, 1)
            }
        };

        let statement = template.instantiate(tree, &plan)?;
        prelude.push(statement);
        let body = node(
            tree,
            Node::Block {
                label: None,
                stmts: prelude,
                tail: None,
            },
        )?;
        let (start, end, step) = (
            node(tree, Node::int(start))?,
            node(tree, Node::int(end))?,
            node(tree, Node::int(step))?,
        );
        let rolled = node(
            tree,
            Node::Loop {
                label: None,
                induction,
                start,
                end,
                step,
                body,
            },
        )?;
        tree.mark(rolled, Transform::Collapsed);
        Ok(rolled)
    }
}

impl Pass for LoopCollapser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn check(
        &self,
        tree: &SyntaxTree,
        request: &PassRequest,
        _ctx: &PassContext,
    ) -> Result<Applicability> {
        let body = match self.function_body(tree, request.target)? {
            Some(body) => body,
            None => return Ok(inapplicable(NAME, "target is not a function")),
        };
        if self.find_runs(tree, body).is_empty() {
            Ok(nothing_to_do("already minimal"))
        } else {
            Ok(Applicability::Applicable)
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
        let runs = self.find_runs(tree, body);
        let mut applied = Vec::new();

        // Runs were found block by block; rebuild each block once
        let mut blocks: Vec<NodeId> = runs.iter().map(|run| run.block).collect();
        blocks.dedup();
        for block in blocks {
            let (label, stmts, tail) = match tree.node(block)? {
                Node::Block { label, stmts, tail } => (label.clone(), stmts.clone(), *tail),
                other => {
                    return Err(Error::invariant(format!(
                        "collapse target {} became {}",
                        block,
                        other.kind()
                    )))
                }
            };
            let mut rebuilt = Vec::with_capacity(stmts.len());
            let mut next = 0;
            for run in runs.iter().filter(|run| run.block == block) {
                rebuilt.extend_from_slice(&stmts[next..run.first]);
                let rolled = self.reroll(tree, run, &stmts)?;
                trace!(block = %block, first = run.first, len = run.len, "collapsed run");
                applied.push(SubRewrite::new(
                    NAME,
                    stmts[run.first],
                    rolled,
                    format!("collapsed {} statements into a loop", run.len),
                ));
                rebuilt.push(rolled);
                next = run.first + run.len;
            }
            rebuilt.extend_from_slice(&stmts[next..]);
            swap_rebuilt(
                tree,
                block,
                Node::Block {
                    label,
                    stmts: rebuilt,
                    tail,
                },
            )?;
        }
        debug!(function = %target, runs = applied.len(), "collapsed statement runs");

        Ok(TransformationResult::Rewritten {
            replacement: target,
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotopt_core::builder::{Expr, UnitBuilder};
    use annotopt_core::printer;

    fn emit_run(values: &[i64]) -> annotopt_core::source::SourceUnit {
        let mut unit = UnitBuilder::new("runs");
        let values = values.to_vec();
        unit.function("main", &[], move |b| {
            for value in &values {
                b.call("emit", [Expr::int(*value)]);
            }
        });
        unit.finish().unwrap()
    }

    #[test]
    fn test_progression_detection() {
        let collapser = LoopCollapser::new(3);
        let unit = emit_run(&[1, 3, 5, 7, 7, 8]);
        let body = match unit.tree.node(unit.tree.function_named("main").unwrap()).unwrap() {
            Node::FunctionDecl { body, .. } => *body,
            _ => unreachable!(),
        };
        let runs = collapser.find_runs(&unit.tree, body);
        assert_eq!(runs.len(), 1);
        assert_eq!((runs[0].first, runs[0].len), (0, 4));
        assert_eq!(runs[0].uniform(), Some((1, 2)));

        let short = emit_run(&[4, 4, 4]);
        let body = match short.tree.node(short.tree.function_named("main").unwrap()).unwrap() {
            Node::FunctionDecl { body, .. } => *body,
            _ => unreachable!(),
        };
        assert!(collapser.find_runs(&short.tree, body).is_empty());
    }

    #[test]
    fn test_shape_rejects_closures() {
        let mut unit = UnitBuilder::new("closures");
        unit.function("main", &[], |b| {
            b.call("apply", [Expr::closure(&["x"], Expr::var("x")), Expr::int(1)]);
        });
        let unit = unit.finish().unwrap();
        let main = unit.tree.function_named("main").unwrap();
        let stmt = match unit.tree.node(main).unwrap() {
            Node::FunctionDecl { body, .. } => unit.tree.children(*body)[0],
            _ => unreachable!(),
        };
        assert!(LoopCollapser::new(2).shape(&unit.tree, stmt).is_none());
        assert!(printer::render_node(&unit.tree, stmt).unwrap().contains("apply"));
    }
}
