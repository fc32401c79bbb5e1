use super::*;
use annotopt_core::builder::{Expr, UnitBuilder};
use annotopt_core::printer::render_node;

fn body_of(tree: &SyntaxTree, name: &str) -> NodeId {
    match tree.get_node(tree.function_named(name).unwrap()) {
        Some(Node::FunctionDecl { body, .. }) => *body,
        _ => unreachable!(),
    }
}

#[test]
fn test_fresh_locals_and_parameter_renames() {
    let mut unit = UnitBuilder::new("copy");
    unit.function("f", &["x"], |b| {
        b.let_("y", Expr::add(Expr::var("x"), Expr::var("g")));
        b.for_range("i", Expr::int(0), Expr::var("y"), |body| {
            body.call("emit", [Expr::var("i")]);
        });
        b.ret(Expr::var("y"));
    });
    let mut unit = unit.finish().unwrap();
    let body = body_of(&unit.tree, "f");
    let subtree = Subtree::capture(&unit.tree, body).unwrap();
    let temp = unit.tree.fresh_name("x");
    assert_eq!(temp, "x__1");
    let plan = CopyPlan::new()
        .rename("x", temp)
        .fresh_locals()
        .returning_to("exit__9");
    let copy = subtree.instantiate(&mut unit.tree, &plan).unwrap();

    let text = render_node(&unit.tree, copy).unwrap();
    assert!(text.contains("let y__2 = x__1 + g;"), "{}", text);
    assert!(text.contains("for i__3 in 0..y__2 step 1"), "{}", text);
    assert!(text.contains("emit(i__3);"), "{}", text);
    assert!(text.contains("break 'exit__9 y__2;"), "{}", text);
    assert!(!text.contains("return"), "{}", text);
}

#[test]
fn test_copies_record_their_origin() {
    let mut unit = UnitBuilder::new("origin");
    unit.function("f", &[], |b| {
        b.call("emit", [Expr::int(1)]);
    });
    let mut unit = unit.finish().unwrap();
    let body = body_of(&unit.tree, "f");
    let subtree = Subtree::capture(&unit.tree, body).unwrap();
    let first = subtree.instantiate(&mut unit.tree, &CopyPlan::new()).unwrap();
    assert_eq!(unit.tree.origin(first), body);
    assert_eq!(unit.tree.span(first), unit.tree.span(body));

    // A copy of a copy still points at the original
    let again = Subtree::capture(&unit.tree, first)
        .unwrap()
        .instantiate(&mut unit.tree, &CopyPlan::new().with_span(None))
        .unwrap();
    assert_eq!(unit.tree.origin(again), body);
}

#[test]
fn test_substitution_stops_at_shadowing() {
    let mut unit = UnitBuilder::new("shadow");
    unit.function("f", &[], |b| {
        b.call("emit", [Expr::var("i")]);
        b.expr(Expr::block(|inner| {
            inner.let_("i", Expr::int(100));
            inner.call("emit", [Expr::var("i")]);
        }));
        b.expr(Expr::closure(&["i"], Expr::var("i")));
    });
    let mut unit = unit.finish().unwrap();
    let body = body_of(&unit.tree, "f");
    let subtree = Subtree::capture(&unit.tree, body).unwrap();
    let copy = subtree
        .instantiate(
            &mut unit.tree,
            &CopyPlan::new().substitute("i", Literal::Int(7)),
        )
        .unwrap();
    let text = render_node(&unit.tree, copy).unwrap();
    assert!(text.contains("emit(7);"), "{}", text);
    assert!(text.contains("emit(i);"), "{}", text);
    assert!(text.contains("|i| i;"), "{}", text);
}
