//! Function inlining pass

use annotopt_core::ast::{Literal, Node, NodeId, SyntaxTree, Transform};
use annotopt_core::diagnostic::{Diagnostic, DiagnosticCode};
use annotopt_core::{Error, Result};
use tracing::{debug, trace};

use crate::analysis;
use crate::context::{FunctionInfo, PassContext};
use crate::passes::{
    inapplicable, nothing_to_do, Applicability, Pass, PassRequest, SubRewrite,
    TransformationResult,
};
use crate::rewrite::{CopyPlan, Subtree};

const NAME: &str = "inline";

/// Replaces a call with a copy of the callee's body
///
/// Parameters become fresh temporaries initialized from the arguments, in
/// argument order, so each argument is evaluated exactly once. Callee-local
/// names and labels are renamed apart. Returns other than a lone trailing one
/// become breaks out of a labeled exit block.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlinePass;

impl InlinePass {
    pub fn new() -> Self {
        Self
    }

    fn legality(
        &self,
        tree: &SyntaxTree,
        call: NodeId,
        info: &FunctionInfo,
        argument_count: usize,
        ctx: &PassContext,
    ) -> Option<Applicability> {
        let callee = info.name.as_str();
        let caller = tree
            .enclosing_function(call)
            .and_then(|id| match tree.get_node(id) {
                Some(Node::FunctionDecl { name, .. }) => Some(name.as_str()),
                _ => None,
            });
        if caller == Some(callee) {
            return Some(inapplicable(
                NAME,
                format!("`{}` would be inlined into itself", callee),
            ));
        }
        if ctx.call_graph.is_recursive(callee) {
            return Some(inapplicable(NAME, format!("`{}` is recursive", callee)));
        }
        if !info.accepts_arity(argument_count) {
            let fixed = if info.variadic {
                format!("at least {}", info.params.len().saturating_sub(1))
            } else {
                info.params.len().to_string()
            };
            return Some(inapplicable(
                NAME,
                format!(
                    "`{}` takes {} arguments, the call passes {}",
                    callee, fixed, argument_count
                ),
            ));
        }
        if info.has_mutable_capture {
            return Some(inapplicable(
                NAME,
                format!("`{}` has a closure capturing mutable state", callee),
            ));
        }

        let visible = analysis::visible_bindings(tree, call);
        if visible.contains(callee) {
            return Some(inapplicable(
                NAME,
                format!("`{}` is shadowed by a local binding of the caller", callee),
            ));
        }
        let mut shadowed_globals: Vec<_> = info
            .globals_read
            .iter()
            .filter(|global| visible.contains(*global))
            .collect();
        shadowed_globals.sort();
        if let Some(global) = shadowed_globals.first() {
            return Some(inapplicable(
                NAME,
                format!(
                    "global `{}` read by `{}` is shadowed at the call site",
                    global, callee
                ),
            ));
        }
        let mut shadowed_callees: Vec<_> = info
            .callees
            .iter()
            .filter(|name| visible.contains(*name))
            .collect();
        shadowed_callees.sort();
        if let Some(name) = shadowed_callees.first() {
            return Some(inapplicable(
                NAME,
                format!(
                    "`{}` called by `{}` is shadowed at the call site",
                    name, callee
                ),
            ));
        }
        None
    }
}

impl Pass for InlinePass {
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
        if tree.mark_of(target) == Some(Transform::Inlined) {
            return Ok(nothing_to_do("call site is already inlined"));
        }
        let (callee, argument_count) = match tree.node(target)? {
            Node::Call { callee, args } => (callee, args.len()),
            other => {
                return Ok(inapplicable(
                    NAME,
                    format!("target is {}, not a call", other.kind()),
                ))
            }
        };
        let info = match ctx.function(callee) {
            Some(info) => info,
            None => {
                return Ok(inapplicable(
                    NAME,
                    format!("`{}` does not resolve to a function of this unit", callee),
                ))
            }
        };
        if let Some(verdict) = self.legality(tree, target, info, argument_count, ctx) {
            return Ok(verdict);
        }

        if !request.force && ctx.config.consult_oracle {
            let verdict = ctx.oracle.query(&info.signature(), &info.shape);
            trace!(callee = %callee, oracle = ctx.oracle.name(), ?verdict, "consulted oracle");
            if verdict.would_auto_inline {
                return Ok(Applicability::Skip(Diagnostic::new(
                    DiagnosticCode::CompilerAutoInline,
                    format!(
                        "the compiler already inlines `{}` ({:?})",
                        callee, verdict.reason
                    ),
                )));
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
        let (callee, args) = match tree.node(target)? {
            Node::Call { callee, args } => (callee.clone(), args.clone()),
            other => {
                return Err(Error::invariant(format!(
                    "inline target {} became {}",
                    target,
                    other.kind()
                )))
            }
        };
        let info = ctx
            .function(&callee)
            .ok_or_else(|| Error::invariant(format!("`{}` left the symbol table", callee)))?;
        let span = tree.span(target);
        let body = Subtree::capture(&ctx.snapshot, info.body)?;

        // Parameters → temporaries, in argument order
        let mut plan = CopyPlan::new().fresh_locals().with_span(span);
        let mut stmts = Vec::new();
        let fixed = if info.variadic {
            info.params.len().saturating_sub(1)
        } else {
            info.params.len()
        };
        for (param, arg) in info.params.iter().take(fixed).zip(&args) {
            let temp = tree.fresh_name(param);
            let binding = Node::Let {
                name: temp.clone(),
                mutable: true,
                init: *arg,
            };
            stmts.push(tree.add_node_with_span(binding, span)?);
            plan = plan.rename(param.clone(), temp);
        }
        if info.variadic {
            if let Some(rest) = info.params.last() {
                let elements = args.get(fixed..).map(<[NodeId]>::to_vec).unwrap_or_default();
                let array = tree.add_node_with_span(Node::Array { elements }, span)?;
                let temp = tree.fresh_name(rest);
                let binding = Node::Let {
                    name: temp.clone(),
                    mutable: true,
                    init: array,
                };
                stmts.push(tree.add_node_with_span(binding, span)?);
                plan = plan.rename(rest.clone(), temp);
            }
        }

        // Single exit
        let returns = analysis::returns_in(&ctx.snapshot, info.body);
        let (body_stmts, body_tail) = match body.node(body.root())? {
            Node::Block {
                label: None,
                stmts,
                tail,
            } => (stmts.clone(), *tail),
            _ => (Vec::new(), Some(body.root())),
        };
        let lone_trailing = match (returns.as_slice(), body_stmts.last(), body_tail) {
            ([only], Some(last), None) => only == last,
            _ => false,
        };
        let exit = if returns.is_empty() || lone_trailing {
            None
        } else {
            Some(tree.fresh_name("exit"))
        };
        if let Some(exit) = &exit {
            plan = plan.returning_to(exit.clone());
        }

        let copied = body.instantiate(tree, &plan)?;
        let (mut copied_stmts, mut tail) = match tree.node(copied)? {
            Node::Block {
                label: None,
                stmts,
                tail,
            } => (stmts.clone(), *tail),
            _ => (Vec::new(), Some(copied)),
        };
        if lone_trailing {
            if let Some(last) = copied_stmts.pop() {
                tail = match tree.node(last)? {
                    Node::Return { value: Some(value) } => Some(*value),
                    Node::Return { value: None } => {
                        Some(tree.add_node_with_span(Node::Literal(Literal::Unit), span)?)
                    }
                    other => {
                        return Err(Error::invariant(format!(
                            "expected the trailing return of `{}`, found {}",
                            callee,
                            other.kind()
                        )))
                    }
                };
            }
        }
        stmts.extend(copied_stmts);

        let block = tree.add_node_with_span(
            Node::Block {
                label: exit,
                stmts,
                tail,
            },
            span,
        )?;
        tree.record_copy(block, target);
        tree.mark(block, Transform::Inlined);
        tree.replace(target, block)?;
        debug!(callee = %callee, call = %target, size = info.size, "inlined call");

        Ok(TransformationResult::Rewritten {
            replacement: block,
            applied: vec![SubRewrite::new(
                NAME,
                target,
                block,
                format!("inlined `{}` ({} nodes)", callee, info.size),
            )],
        })
    }
}
