//! Loop unrolling pass

use annotopt_core::ast::{BinaryOp, Literal, Node, NodeId, SyntaxTree, Transform};
use annotopt_core::source::Span;
use annotopt_core::{Error, Result};
use tracing::debug;

use crate::analysis::{self, LoopControl};
use crate::context::PassContext;
use crate::passes::{
    inapplicable, nothing_to_do, Applicability, Pass, PassRequest, SubRewrite,
    TransformationResult,
};
use crate::rewrite::{CopyPlan, Subtree};

const NAME: &str = "unroll";

/// Fully unrolls loops with a small static trip count and strip-mines the
/// rest
#[derive(Debug, Clone, Copy, Default)]
pub struct UnrollPass;

/// Parts of the loop being unrolled
struct Unrolling {
    target: NodeId,
    label: Option<String>,
    induction: String,
    start: NodeId,
    end: NodeId,
    step: i64,
    body: Subtree,
    body_id: NodeId,
    control: LoopControl,
    span: Option<Span>,
}

/// Labels guarding transfers that leave or restart the loop
struct Guards {
    outer: Option<String>,
    copies: bool,
}

impl UnrollPass {
    pub fn new() -> Self {
        Self
    }

    fn guards(&self, tree: &mut SyntaxTree, loop_: &Unrolling) -> Guards {
        Guards {
            outer: (!loop_.control.breaks.is_empty()).then(|| tree.fresh_name("unrolled")),
            copies: !loop_.control.continues.is_empty(),
        }
    }

    /// Copy of the body with the loop's own break/continue redirected.
    /// Wrapped in a labeled block when a `continue` needs somewhere to go.
    fn body_copy(
        &self,
        tree: &mut SyntaxTree,
        loop_: &Unrolling,
        guards: &Guards,
        plan: CopyPlan,
    ) -> Result<NodeId> {
        let copy_label = guards.copies.then(|| tree.fresh_name("copy"));
        let mut plan = plan;
        for brk in &loop_.control.breaks {
            plan = plan.override_node(
                *brk,
                Node::Break {
                    label: guards.outer.clone(),
                    value: None,
                },
            );
        }
        for cont in &loop_.control.continues {
            plan = plan.override_node(
                *cont,
                Node::Break {
                    label: copy_label.clone(),
                    value: None,
                },
            );
        }
        let copy = loop_.body.instantiate(tree, &plan)?;
        match copy_label {
            Some(label) => tree.add_node_with_span(
                Node::Block {
                    label: Some(label),
                    stmts: vec![copy],
                    tail: None,
                },
                loop_.span,
            ),
            None => Ok(copy),
        }
    }

    fn full(&self, tree: &mut SyntaxTree, loop_: &Unrolling, trips: u64) -> Result<NodeId> {
        let start = analysis::static_int(tree, loop_.start)
            .ok_or_else(|| Error::invariant("full unroll of a loop without a static start"))?;
        let guards = self.guards(tree, loop_);
        let mut copies = Vec::new();
        let mut value = start;
        for _ in 0..trips {
            let plan = CopyPlan::new().substitute(loop_.induction.clone(), Literal::Int(value));
            copies.push(self.body_copy(tree, loop_, &guards, plan)?);
            value = match value.checked_add(loop_.step) {
                Some(next) => next,
                None => break,
            };
        }
        tree.add_node_with_span(
            Node::Block {
                label: guards.outer,
                stmts: copies,
                tail: None,
            },
            loop_.span,
        )
    }

    /// ```text
    /// let s = start; let e = end;
    /// let mut m = s; if e >= MIN + (F-1)*k { m = e - (F-1)*k; }
    /// let mut r = s;
    /// for b in s..m step F*k {
    ///     { let i = b + j*k; body } for j in 0..F
    ///     r = e; if b <= MAX - F*k { r = b + F*k; }
    /// }
    /// 'label: for i in r..e step k { body }
    /// ```
    /// Every bound is compared before it is computed, so no bound pair that
    /// the original loop accepts can overflow.
    fn strip_mine(&self, tree: &mut SyntaxTree, loop_: &Unrolling, factor: u32) -> Result<NodeId> {
        let span = loop_.span;
        let k = loop_.step;
        let stride = k
            .checked_mul(i64::from(factor))
            .ok_or_else(|| Error::invariant("unroll stride overflow"))?;
        // Offset of the last copy in a group
        let reach = stride - k;
        let mut build = Emitter { tree, span };

        let s = build.tree.fresh_name("start");
        let e = build.tree.fresh_name("end");
        let m = build.tree.fresh_name("main_end");
        let r = build.tree.fresh_name("next");
        let base = build.tree.fresh_name(&loop_.induction);
        let mut stmts = vec![
            build.let_(&s, false, loop_.start)?,
            build.let_(&e, false, loop_.end)?,
        ];

        // A group fits only if its last value stays below `e`
        let s_var = build.var(&s)?;
        stmts.push(build.let_(&m, true, s_var)?);
        let lowest_end = build.int(i64::MIN + reach)?;
        let e_var = build.var(&e)?;
        let fits = build.binary(BinaryOp::Ge, e_var, lowest_end)?;
        let e_var = build.var(&e)?;
        let reach_literal = build.int(reach)?;
        let last_base = build.binary(BinaryOp::Sub, e_var, reach_literal)?;
        let assign = build.assign(&m, last_base)?;
        stmts.push(build.when(fits, assign)?);

        let s_var = build.var(&s)?;
        stmts.push(build.let_(&r, true, s_var)?);

        // Main loop: F copies per iteration
        let guards = self.guards(build.tree, loop_);
        let mut group = Vec::new();
        for j in 0..i64::from(factor) {
            let base_var = build.var(&base)?;
            let init = if j == 0 {
                base_var
            } else {
                let offset = build.int(j * k)?;
                build.binary(BinaryOp::Add, base_var, offset)?
            };
            let induction = build.let_(&loop_.induction, false, init)?;
            let body = self.body_copy(build.tree, loop_, &guards, CopyPlan::new())?;
            group.push(build.block(vec![induction, body])?);
        }

        // Where the remainder picks up, or `e` when the next group would
        // leave the integer range
        let e_var = build.var(&e)?;
        group.push(build.assign(&r, e_var)?);
        let base_var = build.var(&base)?;
        let highest_base = build.int(i64::MAX - stride)?;
        let in_range = build.binary(BinaryOp::Le, base_var, highest_base)?;
        let base_var = build.var(&base)?;
        let stride_literal = build.int(stride)?;
        let next_group = build.binary(BinaryOp::Add, base_var, stride_literal)?;
        let advance = build.assign(&r, next_group)?;
        group.push(build.when(in_range, advance)?);

        let main_body = build.block(group)?;
        let (from, to, by) = (build.var(&s)?, build.var(&m)?, build.int(stride)?);
        let main_loop = build.node(Node::Loop {
            label: None,
            induction: base,
            start: from,
            end: to,
            step: by,
            body: main_body,
        })?;
        build.tree.mark(main_loop, Transform::Unrolled);
        stmts.push(main_loop);

        // Remainder keeps the original body, label and induction name
        let (from, to, by) = (build.var(&r)?, build.var(&e)?, build.int(k)?);
        let remainder = build.node(Node::Loop {
            label: loop_.label.clone(),
            induction: loop_.induction.clone(),
            start: from,
            end: to,
            step: by,
            body: loop_.body_id,
        })?;
        build.tree.mark(remainder, Transform::Unrolled);
        stmts.push(remainder);

        build.node(Node::Block {
            label: guards.outer,
            stmts,
            tail: None,
        })
    }
}

/// Adds generated nodes that all carry the loop's span
struct Emitter<'t> {
    tree: &'t mut SyntaxTree,
    span: Option<Span>,
}

impl Emitter<'_> {
    fn node(&mut self, node: Node) -> Result<NodeId> {
        self.tree.add_node_with_span(node, self.span)
    }

    fn int(&mut self, value: i64) -> Result<NodeId> {
        self.node(Node::int(value))
    }

    fn var(&mut self, name: &str) -> Result<NodeId> {
        self.node(Node::var(name))
    }

    fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> Result<NodeId> {
        self.node(Node::Binary { op, lhs, rhs })
    }

    fn let_(&mut self, name: &str, mutable: bool, init: NodeId) -> Result<NodeId> {
        self.node(Node::Let {
            name: name.to_string(),
            mutable,
            init,
        })
    }

    fn assign(&mut self, name: &str, value: NodeId) -> Result<NodeId> {
        let target = self.var(name)?;
        self.node(Node::Assign {
            target,
            op: None,
            value,
        })
    }

    fn block(&mut self, stmts: Vec<NodeId>) -> Result<NodeId> {
        self.node(Node::Block {
            label: None,
            stmts,
            tail: None,
        })
    }

    /// `if condition { stmt }`
    fn when(&mut self, condition: NodeId, stmt: NodeId) -> Result<NodeId> {
        let then_branch = self.block(vec![stmt])?;
        self.node(Node::If {
            condition,
            then_branch,
            else_branch: None,
        })
    }
}

impl Pass for UnrollPass {
    fn name(&self) -> &'static str {
        NAME
    }

    fn check(
        &self,
        tree: &SyntaxTree,
        request: &PassRequest,
        ctx: &PassContext,
    ) -> Result<Applicability> {
        let target = request.target;
        if tree.mark_of(target) == Some(Transform::Unrolled) {
            return Ok(nothing_to_do("loop is already unrolled"));
        }
        let (induction, step, body) = match tree.node(target)? {
            Node::Loop {
                induction,
                step,
                body,
                ..
            } => (induction, *step, *body),
            other => {
                return Ok(inapplicable(
                    NAME,
                    format!("target is {}, not a loop", other.kind()),
                ))
            }
        };
        if let Some(factor) = request.factor {
            if factor < 2 {
                return Ok(inapplicable(
                    NAME,
                    format!("unroll factor must be at least 2, got {}", factor),
                ));
            }
        }
        if analysis::is_assigned(tree, body, induction) {
            return Ok(inapplicable(
                NAME,
                format!("induction variable `{}` is assigned in the body", induction),
            ));
        }
        let step = match analysis::static_int(tree, step) {
            Some(step) if step <= 0 => {
                return Ok(inapplicable(
                    NAME,
                    format!("loop step {} is not positive", step),
                ))
            }
            Some(step) => step,
            None => return Ok(inapplicable(NAME, "strip-mining needs a static step")),
        };
        let full = analysis::static_trip_count(tree, target)
            .map_or(false, |trips| trips <= ctx.config.full_unroll_limit);
        if request.full_only && !full {
            return Ok(inapplicable(
                NAME,
                "trip count is not static or exceeds the full unroll limit",
            ));
        }
        if !full {
            let factor = request.factor.unwrap_or(ctx.config.default_unroll_factor);
            if step.checked_mul(i64::from(factor)).is_none() {
                return Ok(inapplicable(
                    NAME,
                    format!("factor {} times step {} overflows", factor, step),
                ));
            }
        }
        Ok(Applicability::Applicable)
    }

    fn run(
        &self,
        tree: &mut SyntaxTree,
        request: &PassRequest,
        ctx: &PassContext,
    ) -> Result<TransformationResult> {
        let target = request.target;
        let (label, induction, start, end, step, body) = match tree.node(target)? {
            Node::Loop {
                label,
                induction,
                start,
                end,
                step,
                body,
            } => (label.clone(), induction.clone(), *start, *end, *step, *body),
            other => {
                return Err(Error::invariant(format!(
                    "unroll target {} became {}",
                    target,
                    other.kind()
                )))
            }
        };
        let step = analysis::static_int(tree, step)
            .ok_or_else(|| Error::invariant("unroll of a loop without a static step"))?;
        let loop_ = Unrolling {
            target,
            label,
            induction,
            start,
            end,
            step,
            body: Subtree::capture(tree, body)?,
            body_id: body,
            control: analysis::loop_control(tree, target),
            span: tree.span(target),
        };

        let trips = analysis::static_trip_count(tree, target)
            .filter(|trips| *trips <= ctx.config.full_unroll_limit);
        let (replacement, description) = match trips {
            Some(trips) => (
                self.full(tree, &loop_, trips)?,
                format!("fully unrolled {} iterations", trips),
            ),
            None => {
                let factor = request.factor.unwrap_or(ctx.config.default_unroll_factor);
                (
                    self.strip_mine(tree, &loop_, factor)?,
                    format!("strip-mined by {}", factor),
                )
            }
        };
        tree.record_copy(replacement, loop_.target);
        tree.mark(replacement, Transform::Unrolled);
        tree.replace(loop_.target, replacement)?;
        debug!(
            target = %loop_.target,
            guarded = !loop_.control.is_empty(),
            "{}",
            description
        );

        Ok(TransformationResult::Rewritten {
            replacement,
            applied: vec![SubRewrite::new(NAME, target, replacement, description)],
        })
    }
}
