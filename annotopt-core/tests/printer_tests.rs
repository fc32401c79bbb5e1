//! Tests for the debug emitter and the layout the builder relies on

use annotopt_core::ast::BinaryOp;
use annotopt_core::builder::{Expr, UnitBuilder};
use annotopt_core::printer::render;

#[test]
fn test_render_function() {
    let mut unit = UnitBuilder::new("render");
    unit.global("hits", true, Expr::int(0));
    unit.function("sum", &["xs"], |b| {
        b.let_mut("total", Expr::int(0));
        b.for_range("i", Expr::int(0), Expr::int(4), |body| {
            body.assign_op(
                "total",
                BinaryOp::Add,
                Expr::index(Expr::var("xs"), Expr::var("i")),
            );
        });
        b.ret(Expr::var("total"));
    });
    let unit = unit.finish().unwrap();
    let text = render(&unit.tree).unwrap();
    let expected = "\
global mut hits = 0;
fn sum(xs) {
    let mut total = 0;
    for i in 0..4 step 1 {
        total += xs[i];
    }
    return total;
}
";
    assert_eq!(text, expected);
}

#[test]
fn test_render_nested_operators_and_labels() {
    let mut unit = UnitBuilder::new("render");
    unit.function("f", &["a", "rest"], |b| {
        b.let_(
            "x",
            Expr::mul(Expr::add(Expr::var("a"), Expr::int(1)), Expr::int(2)),
        );
        b.labeled_block("done", |inner| {
            inner.if_then(Expr::lt(Expr::var("x"), Expr::int(0)), |then| {
                then.brk_to("done", None);
            });
            inner.call("emit", [Expr::var("x")]);
        });
        b.ret(Expr::closure(&["y"], Expr::add(Expr::var("y"), Expr::var("x"))));
    })
    .variadic();
    let unit = unit.finish().unwrap();
    let text = render(&unit.tree).unwrap();
    assert!(text.contains("fn f(a, ...rest) {"));
    assert!(text.contains("let x = (a + 1) * 2;"));
    assert!(text.contains("'done: {"));
    assert!(text.contains("break 'done;"));
    assert!(text.contains("return |y| y + x;"));
}

#[test]
fn test_layout_text_matches_render_without_annotations() {
    let mut unit = UnitBuilder::new("render");
    unit.function("f", &[], |b| {
        b.annotate("tool: deadcode");
        b.call("emit", [Expr::str("hi")]);
    });
    let (unit, text) = unit.finish_with_text().unwrap();
    assert!(text.contains("    // tool: deadcode\n    emit(\"hi\");"));
    assert_eq!(
        render(&unit.tree).unwrap(),
        "fn f() {\n    emit(\"hi\");\n}\n"
    );
}
