use super::*;
use crate::analysis;
use crate::config::OptimizerConfig;
use crate::oracle::{NullOracle, StubOracle};
use annotopt_core::ast::{BinaryOp, Node, NodeId, SyntaxTree};
use annotopt_core::builder::{Expr, UnitBuilder};
use annotopt_core::diagnostic::DiagnosticCode;
use annotopt_core::printer;
use annotopt_core::source::SourceUnit;
use annotopt_interpreter::{Interpreter, Value};
use std::sync::Arc;

fn context(unit: &SourceUnit) -> PassContext {
    PassContext::build(&unit.tree, OptimizerConfig::default(), Arc::new(NullOracle)).unwrap()
}

fn call_to(tree: &SyntaxTree, function: &str, callee: &str) -> NodeId {
    let function = tree.function_named(function).unwrap();
    analysis::calls_in(tree, function)
        .into_iter()
        .find(|(_, name)| name == callee)
        .map(|(id, _)| id)
        .unwrap()
}

fn first_loop(tree: &SyntaxTree, function: &str) -> NodeId {
    let function = tree.function_named(function).unwrap();
    tree.preorder(function)
        .into_iter()
        .find(|id| matches!(tree.get_node(*id), Some(Node::Loop { .. })))
        .unwrap()
}

fn run_main(tree: &SyntaxTree) -> Vec<Value> {
    let mut interpreter = Interpreter::new(tree).unwrap();
    interpreter.call("main", vec![]).unwrap();
    interpreter.output().to_vec()
}

fn declined_code(result: &TransformationResult) -> Option<DiagnosticCode> {
    match result {
        TransformationResult::Declined(diagnostic) => Some(diagnostic.code),
        TransformationResult::Rewritten { .. } => None,
    }
}

#[test]
fn test_inline_trailing_return_becomes_value() {
    let mut unit = UnitBuilder::new("inline");
    unit.function("square", &["x"], |b| {
        b.ret(Expr::mul(Expr::var("x"), Expr::var("x")));
    });
    unit.function("main", &[], |b| {
        b.call("emit", [Expr::call("square", [Expr::int(7)])]);
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let call = call_to(&unit.tree, "main", "square");

    let result = InlinePass::new()
        .apply(&mut unit.tree, &PassRequest::new(call), &ctx)
        .unwrap();
    assert!(result.is_rewritten());
    unit.tree.validate().unwrap();

    let main = unit.tree.function_named("main").unwrap();
    let rendered = printer::render_node(&unit.tree, main).unwrap();
    assert!(!rendered.contains("square("));
    assert!(!rendered.contains("exit__"));
    assert!(rendered.contains("let mut x__1 = 7;"));
    assert_eq!(run_main(&unit.tree), vec![Value::Int(49)]);
}

#[test]
fn test_inline_early_return_uses_exit_label() {
    let mut unit = UnitBuilder::new("exit");
    unit.function("clamp", &["x"], |b| {
        b.if_then(Expr::lt(Expr::var("x"), Expr::int(0)), |then| {
            then.ret(Expr::int(0));
        });
        b.ret(Expr::var("x"));
    });
    unit.function("main", &[], |b| {
        b.call("emit", [Expr::call("clamp", [Expr::int(-4)])]);
        b.call("emit", [Expr::call("clamp", [Expr::int(5)])]);
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    for _ in 0..2 {
        let call = call_to(&unit.tree, "main", "clamp");
        let result = InlinePass::new()
            .apply(&mut unit.tree, &PassRequest::new(call), &ctx)
            .unwrap();
        assert!(result.is_rewritten());
    }
    unit.tree.validate().unwrap();

    let rendered = printer::render(&unit.tree).unwrap();
    assert!(rendered.contains("'exit__"));
    assert_eq!(run_main(&unit.tree), vec![Value::Int(0), Value::Int(5)]);
}

#[test]
fn test_inline_oracle_skip_and_force() {
    let mut unit = UnitBuilder::new("oracle");
    unit.function("one", &[], |b| {
        b.ret(Expr::int(1));
    });
    unit.function("main", &[], |b| {
        b.call("emit", [Expr::call("one", [])]);
    });
    let mut unit = unit.finish().unwrap();
    let oracle = Arc::new(StubOracle::new(false).with_verdict("one", true));
    let ctx = PassContext::build(&unit.tree, OptimizerConfig::default(), oracle).unwrap();
    let call = call_to(&unit.tree, "main", "one");

    let skipped = InlinePass::new()
        .apply(&mut unit.tree, &PassRequest::new(call), &ctx)
        .unwrap();
    assert_eq!(declined_code(&skipped), Some(DiagnosticCode::CompilerAutoInline));

    let forced = PassRequest {
        force: true,
        ..PassRequest::new(call)
    };
    let result = InlinePass::new().apply(&mut unit.tree, &forced, &ctx).unwrap();
    assert!(result.is_rewritten());
    assert_eq!(run_main(&unit.tree), vec![Value::Int(1)]);
}

#[test]
fn test_full_unroll_with_continue() {
    let mut unit = UnitBuilder::new("unroll");
    unit.function("main", &[], |b| {
        b.for_range("i", Expr::int(0), Expr::int(4), |body| {
            body.if_then(Expr::eq(Expr::var("i"), Expr::int(2)), |then| {
                then.cont();
            });
            body.call("emit", [Expr::var("i")]);
        });
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let target = first_loop(&unit.tree, "main");

    let result = UnrollPass::new()
        .apply(&mut unit.tree, &PassRequest::new(target), &ctx)
        .unwrap();
    let replacement = match result {
        TransformationResult::Rewritten { replacement, .. } => replacement,
        other => panic!("expected a rewrite, got {:?}", other),
    };
    unit.tree.validate().unwrap();

    let rendered = printer::render(&unit.tree).unwrap();
    assert!(!rendered.contains("for "));
    assert!(rendered.contains("'copy__"));
    assert_eq!(
        run_main(&unit.tree),
        vec![Value::Int(0), Value::Int(1), Value::Int(3)]
    );

    // The replacement is the unroller's own product
    let again = UnrollPass::new()
        .apply(&mut unit.tree, &PassRequest::new(replacement), &ctx)
        .unwrap();
    assert_eq!(declined_code(&again), Some(DiagnosticCode::NothingToDo));
}

#[test]
fn test_unroll_rejections() {
    let mut unit = UnitBuilder::new("reject");
    unit.global("limit", false, Expr::int(8));
    unit.function("main", &[], |b| {
        b.for_range("i", Expr::int(0), Expr::int(10), |body| {
            body.assign("i", Expr::add(Expr::var("i"), Expr::int(1)));
        });
        b.for_step("j", Expr::int(0), Expr::int(10), Expr::var("limit"), |body| {
            body.call("emit", [Expr::var("j")]);
        });
        b.for_step("k", Expr::int(10), Expr::int(0), Expr::int(-1), |body| {
            body.call("emit", [Expr::var("k")]);
        });
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let main = unit.tree.function_named("main").unwrap();
    let loops: Vec<NodeId> = unit
        .tree
        .preorder(main)
        .into_iter()
        .filter(|id| matches!(unit.tree.get_node(*id), Some(Node::Loop { .. })))
        .collect();
    assert_eq!(loops.len(), 3);

    let messages: Vec<String> = loops
        .iter()
        .map(|target| {
            match UnrollPass::new()
                .apply(&mut unit.tree, &PassRequest::new(*target), &ctx)
                .unwrap()
            {
                TransformationResult::Declined(diagnostic) => {
                    assert_eq!(diagnostic.code, DiagnosticCode::TransformationInapplicable);
                    diagnostic.message
                }
                other => panic!("expected a rejection, got {:?}", other),
            }
        })
        .collect();
    assert!(messages[0].contains("induction variable `i` is assigned"));
    assert!(messages[1].contains("strip-mining needs a static step"));
    assert!(messages[2].contains("not positive"));

    let small_factor = PassRequest {
        factor: Some(1),
        ..PassRequest::new(loops[1])
    };
    let result = UnrollPass::new()
        .apply(&mut unit.tree, &small_factor, &ctx)
        .unwrap();
    assert_eq!(
        declined_code(&result),
        Some(DiagnosticCode::TransformationInapplicable)
    );
}

#[test]
fn test_deadcode_removes_expression_statement() {
    let mut unit = UnitBuilder::new("dead");
    unit.function("main", &[], |b| {
        b.call("emit", [Expr::int(1)]);
        b.call("emit", [Expr::int(2)]);
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let main = unit.tree.function_named("main").unwrap();
    let second = analysis::calls_in(&unit.tree, main)[1].0;

    let result = DeadCodePass::new()
        .apply(&mut unit.tree, &PassRequest::new(second), &ctx)
        .unwrap();
    match &result {
        TransformationResult::Rewritten { applied, .. } => assert!(applied[0].is_unsafe),
        other => panic!("expected a rewrite, got {:?}", other),
    }
    unit.tree.validate().unwrap();
    assert!(!printer::render(&unit.tree).unwrap().contains("emit(2)"));
    assert_eq!(run_main(&unit.tree), vec![Value::Int(1)]);
}

#[test]
fn test_deadcode_rejects_assignment_target() {
    let mut unit = UnitBuilder::new("target");
    unit.function("main", &[], |b| {
        b.let_mut("x", Expr::int(0));
        b.assign_op("x", BinaryOp::Add, Expr::int(1));
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let main = unit.tree.function_named("main").unwrap();
    let target = unit
        .tree
        .preorder(main)
        .into_iter()
        .find(|id| analysis::is_assignment_target(&unit.tree, *id))
        .unwrap();

    let result = DeadCodePass::new()
        .apply(&mut unit.tree, &PassRequest::new(target), &ctx)
        .unwrap();
    match result {
        TransformationResult::Declined(diagnostic) => {
            assert!(diagnostic.message.contains("assignment target"));
        }
        other => panic!("expected a rejection, got {:?}", other),
    }
}

#[test]
fn test_dead_branch_folding() {
    let mut unit = UnitBuilder::new("fold");
    unit.function("main", &[], |b| {
        b.if_else(
            Expr::lt(Expr::add(Expr::int(1), Expr::int(1)), Expr::int(3)),
            |then| {
                then.call("emit", [Expr::int(1)]);
                then.ret_unit();
                then.call("emit", [Expr::int(99)]);
            },
            |otherwise| {
                otherwise.call("emit", [Expr::int(2)]);
            },
        );
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let main = unit.tree.function_named("main").unwrap();

    // Stripping alone still finds the statement after `return`
    let stripping = DeadBranchPass::stripping();
    assert!(matches!(
        stripping.check(&unit.tree, &PassRequest::new(main), &ctx).unwrap(),
        Applicability::Applicable
    ));

    let folding = DeadBranchPass::folding();
    let result = folding
        .apply(&mut unit.tree, &PassRequest::new(main), &ctx)
        .unwrap();
    assert!(result.is_rewritten());
    unit.tree.validate().unwrap();

    let rendered = printer::render(&unit.tree).unwrap();
    assert!(!rendered.contains("if "));
    assert!(!rendered.contains("emit(99)"));
    assert!(!rendered.contains("emit(2)"));
    assert_eq!(run_main(&unit.tree), vec![Value::Int(1)]);

    let again = folding
        .apply(&mut unit.tree, &PassRequest::new(main), &ctx)
        .unwrap();
    assert_eq!(declined_code(&again), Some(DiagnosticCode::NothingToDo));
}

#[test]
fn test_collapse_rerolls_run() {
    let mut unit = UnitBuilder::new("collapse");
    unit.function("main", &[], |b| {
        for value in [10, 20, 30, 40] {
            b.call("emit", [Expr::int(value)]);
        }
        b.call("emit", [Expr::int(0)]);
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let main = unit.tree.function_named("main").unwrap();
    let before = run_main(&unit.tree);

    let collapser = LoopCollapser::new(3);
    let result = collapser
        .apply(&mut unit.tree, &PassRequest::new(main), &ctx)
        .unwrap();
    assert!(result.is_rewritten());
    unit.tree.validate().unwrap();

    let rendered = printer::render(&unit.tree).unwrap();
    assert!(rendered.contains("for i__1 in 10..50 step 10 {"));
    assert_eq!(run_main(&unit.tree), before);

    let again = collapser
        .apply(&mut unit.tree, &PassRequest::new(main), &ctx)
        .unwrap();
    match again {
        TransformationResult::Declined(diagnostic) => {
            assert_eq!(diagnostic.code, DiagnosticCode::NothingToDo);
            assert_eq!(diagnostic.message, "already minimal");
        }
        other => panic!("expected nothing to do, got {:?}", other),
    }
}

fn body_of(tree: &SyntaxTree, function: NodeId) -> NodeId {
    match tree.node(function).unwrap() {
        Node::FunctionDecl { body, .. } => *body,
        other => panic!("expected a function, got {:?}", other),
    }
}

#[test]
fn test_truncation_swaps_in_a_new_block() {
    let mut unit = UnitBuilder::new("truncate");
    unit.function("main", &[], |b| {
        b.call("emit", [Expr::int(1)]);
        b.ret_unit();
        b.call("emit", [Expr::int(2)]);
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let main = unit.tree.function_named("main").unwrap();
    let old_body = body_of(&unit.tree, main);
    let kept = unit.tree.children(old_body)[0];

    let result = DeadBranchPass::stripping()
        .apply(&mut unit.tree, &PassRequest::new(main), &ctx)
        .unwrap();
    assert!(result.is_rewritten());

    let body = body_of(&unit.tree, main);
    assert_ne!(body, old_body);
    assert_eq!(unit.tree.origin(body), old_body);
    assert_eq!(unit.tree.parent(body), Some(main));
    assert_eq!(unit.tree.parent(kept), Some(body));
    assert_eq!(unit.tree.children(body).len(), 2);
    unit.tree.validate().unwrap();
    assert_eq!(run_main(&unit.tree), vec![Value::Int(1)]);
}

#[test]
fn test_collapse_swaps_in_a_new_block() {
    let mut unit = UnitBuilder::new("rebuild");
    unit.function("main", &[], |b| {
        b.call("emit", [Expr::int(0)]);
        for value in [1, 2, 3] {
            b.call("emit", [Expr::int(value)]);
        }
        b.call("emit", [Expr::int(9)]);
    });
    let mut unit = unit.finish().unwrap();
    let ctx = context(&unit);
    let main = unit.tree.function_named("main").unwrap();
    let old_body = body_of(&unit.tree, main);
    let last = *unit.tree.children(old_body).last().unwrap();
    let before = run_main(&unit.tree);

    let result = LoopCollapser::new(3)
        .apply(&mut unit.tree, &PassRequest::new(main), &ctx)
        .unwrap();
    assert!(result.is_rewritten());

    let body = body_of(&unit.tree, main);
    assert_ne!(body, old_body);
    assert_eq!(unit.tree.origin(body), old_body);
    assert_eq!(unit.tree.parent(last), Some(body));
    // The old block still lists the rolled statements until pruning
    assert_eq!(unit.tree.children(old_body).len(), 5);
    unit.tree.validate().unwrap();
    unit.tree.prune();
    assert!(!unit.tree.contains(old_body));
    assert_eq!(run_main(&unit.tree), before);
}
