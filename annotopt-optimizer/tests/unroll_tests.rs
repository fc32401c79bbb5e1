//! Loop unrolling through the whole engine, checked against the interpreter

use annotopt_core::ast::BinaryOp;
use annotopt_core::builder::{Expr, UnitBuilder};
use annotopt_core::printer::render;
use annotopt_core::source::SourceUnit;
use annotopt_interpreter::{Interpreter, Value};
use annotopt_optimizer::{DirectiveStatus, Optimizer, OptimizerConfig};
use proptest::prelude::*;

fn sequential() -> Optimizer {
    Optimizer::new(OptimizerConfig {
        parallel: false,
        ..OptimizerConfig::default()
    })
}

fn run(unit: &SourceUnit, function: &str, args: Vec<Value>) -> (Value, Vec<Value>) {
    let mut interpreter = Interpreter::new(&unit.tree).unwrap();
    let value = interpreter.call(function, args).unwrap();
    (value, interpreter.output().to_vec())
}

fn strided_sum(annotation: &str, step: i64) -> SourceUnit {
    let mut unit = UnitBuilder::new("strided");
    let annotation = annotation.to_string();
    unit.function("sum", &["n"], move |b| {
        b.let_mut("total", Expr::int(0));
        b.annotate(annotation);
        b.for_step("i", Expr::int(0), Expr::var("n"), Expr::int(step), |body| {
            body.assign_op("total", BinaryOp::Add, Expr::var("i"));
            body.call("emit", [Expr::var("i")]);
        });
        b.ret(Expr::var("total"));
    });
    unit.finish().unwrap()
}

#[test]
fn test_full_unroll_sum() {
    let mut unit = UnitBuilder::new("full");
    unit.function("sum", &["xs"], |b| {
        b.let_mut("total", Expr::int(0));
        b.annotate("tool: unroll");
        b.for_range("i", Expr::int(0), Expr::int(8), |body| {
            body.assign_op(
                "total",
                BinaryOp::Add,
                Expr::index(Expr::var("xs"), Expr::var("i")),
            );
        });
        b.ret(Expr::var("total"));
    });
    let unit = unit.finish().unwrap();
    let optimized = sequential().optimize(&unit).unwrap();

    let text = render(&optimized.unit.tree).unwrap();
    assert!(!text.contains("for "));
    assert!(text.contains("total += xs[0];"));
    assert!(text.contains("total += xs[7];"));
    assert_eq!(optimized.report.count(DirectiveStatus::Applied), 1);

    let xs = Value::array((1..=8).map(Value::Int).collect());
    let (before, _) = run(&unit, "sum", vec![xs.clone()]);
    let (after, _) = run(&optimized.unit, "sum", vec![xs]);
    assert_eq!(before, Value::Int(36));
    assert_eq!(after, before);
}

#[test]
fn test_strip_mined_loop_shape() {
    let unit = strided_sum("tool: unroll/3", 2);
    let optimized = sequential().optimize(&unit).unwrap();
    let text = render(&optimized.unit.tree).unwrap();

    // Main loop advances by factor × step, remainder keeps the original step
    assert!(text.contains("step 6 {"));
    assert!(text.contains("for i in next__"));
    assert_eq!(optimized.report.applied_count(), 1);
    optimized.unit.tree.validate().unwrap();
}

#[test]
fn test_strip_mining_near_the_integer_limits() {
    let mut unit = UnitBuilder::new("limits");
    unit.function("walk", &["lo", "hi"], |b| {
        b.annotate("tool: unroll/4");
        b.for_range("i", Expr::var("lo"), Expr::var("hi"), |body| {
            body.call("emit", [Expr::var("i")]);
            body.if_then(Expr::eq(Expr::var("i"), Expr::int(1)), |then| {
                then.brk();
            });
        });
        b.ret(Expr::int(0));
    });
    let unit = unit.finish().unwrap();
    let optimized = sequential().optimize(&unit).unwrap();
    assert_eq!(optimized.report.applied_count(), 1);

    let cases = [
        (-1, i64::MAX),
        (i64::MIN, i64::MIN + 2),
        (i64::MAX - 2, i64::MAX),
        (i64::MAX - 9, i64::MAX),
    ];
    for (lo, hi) in cases {
        let args = vec![Value::Int(lo), Value::Int(hi)];
        let (_, before) = run(&unit, "walk", args.clone());
        let (_, after) = run(&optimized.unit, "walk", args);
        assert_eq!(after, before, "{}..{}", lo, hi);
    }
    let (_, output) = run(&optimized.unit, "walk", vec![Value::Int(-1), Value::Int(i64::MAX)]);
    assert_eq!(output, vec![Value::Int(-1), Value::Int(0), Value::Int(1)]);
}

#[test]
fn test_guarded_break_and_continue() {
    let mut unit = UnitBuilder::new("guarded");
    unit.function("scan", &["n"], |b| {
        b.annotate("tool: unroll/4");
        b.for_range("i", Expr::int(0), Expr::var("n"), |body| {
            body.if_then(Expr::eq(Expr::var("i"), Expr::int(3)), |then| {
                then.cont();
            });
            body.if_then(Expr::eq(Expr::var("i"), Expr::int(9)), |then| {
                then.brk();
            });
            body.call("emit", [Expr::var("i")]);
        });
        b.ret(Expr::int(0));
    });
    let unit = unit.finish().unwrap();
    let optimized = sequential().optimize(&unit).unwrap();
    let text = render(&optimized.unit.tree).unwrap();
    assert!(text.contains("'copy__"));
    assert!(text.contains("'unrolled__"));

    for n in [0, 2, 5, 9, 14] {
        let (_, before) = run(&unit, "scan", vec![Value::Int(n)]);
        let (_, after) = run(&optimized.unit, "scan", vec![Value::Int(n)]);
        assert_eq!(after, before, "n = {}", n);
    }
}

#[test]
fn test_enclosing_loop_transfers_keep_meaning() {
    let mut unit = UnitBuilder::new("nested");
    unit.function("grid", &[], |b| {
        b.labeled_for("outer", "r", Expr::int(0), Expr::int(4), Expr::int(1), |rows| {
            rows.annotate("tool: unroll");
            rows.for_range("c", Expr::int(0), Expr::int(3), |cols| {
                cols.if_then(Expr::eq(Expr::var("c"), Expr::var("r")), |then| {
                    then.cont_to("outer");
                });
                cols.call("emit", [Expr::add(Expr::mul(Expr::var("r"), Expr::int(10)), Expr::var("c"))]);
            });
        });
        b.ret(Expr::int(0));
    });
    let unit = unit.finish().unwrap();
    let optimized = sequential().optimize(&unit).unwrap();
    assert_eq!(optimized.report.applied_count(), 1);

    let (_, before) = run(&unit, "grid", vec![]);
    let (_, after) = run(&optimized.unit, "grid", vec![]);
    assert_eq!(after, before);
    assert!(render(&optimized.unit.tree).unwrap().contains("continue 'outer;"));
}

#[test]
fn test_rejected_unroll_leaves_loop() {
    let mut unit = UnitBuilder::new("assigned");
    unit.function("f", &["n"], |b| {
        b.annotate("tool: unroll/2");
        b.for_range("i", Expr::int(0), Expr::var("n"), |body| {
            body.assign("i", Expr::add(Expr::var("i"), Expr::int(1)));
        });
        b.ret(Expr::int(0));
    });
    let unit = unit.finish().unwrap();
    let optimized = sequential().optimize(&unit).unwrap();
    assert_eq!(
        render(&optimized.unit.tree).unwrap(),
        render(&unit.tree).unwrap()
    );
    let outcome = &optimized.report.directives[0];
    assert_eq!(outcome.status, DirectiveStatus::Skipped);
    assert!(outcome.reasons[0].message.contains("is assigned in the body"));
}

proptest! {
    #[test]
    fn prop_strip_mining_runs_every_iteration(
        factor in 2u32..6,
        step in 1i64..4,
        n in -3i64..40,
    ) {
        let unit = strided_sum(&format!("tool: unroll/{}", factor), step);
        let optimized = sequential().optimize(&unit).unwrap();
        let before = run(&unit, "sum", vec![Value::Int(n)]);
        let after = run(&optimized.unit, "sum", vec![Value::Int(n)]);
        prop_assert_eq!(after, before);
    }
}

fn emitting_walk(factor: u32, step: i64) -> SourceUnit {
    let mut unit = UnitBuilder::new("walk");
    unit.function("walk", &["lo", "hi"], move |b| {
        b.annotate(format!("tool: unroll/{}", factor));
        b.for_step("i", Expr::var("lo"), Expr::var("hi"), Expr::int(step), |body| {
            body.call("emit", [Expr::var("i")]);
        });
        b.ret(Expr::int(0));
    });
    unit.finish().unwrap()
}

proptest! {
    #[test]
    fn prop_strip_mining_at_the_top_of_the_range(
        factor in 2u32..6,
        step in 1i64..4,
        len in 0i64..30,
        gap in 0i64..3,
    ) {
        let unit = emitting_walk(factor, step);
        let optimized = sequential().optimize(&unit).unwrap();
        let hi = i64::MAX - gap;
        let args = vec![Value::Int(hi - len), Value::Int(hi)];
        let before = run(&unit, "walk", args.clone());
        let after = run(&optimized.unit, "walk", args);
        prop_assert_eq!(after, before);
    }
}
