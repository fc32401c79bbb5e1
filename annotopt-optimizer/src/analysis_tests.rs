use super::*;
use annotopt_core::builder::{Expr, UnitBuilder};

fn first_loop(tree: &SyntaxTree) -> NodeId {
    tree.preorder(tree.root.unwrap())
        .into_iter()
        .find(|id| matches!(tree.get_node(*id), Some(Node::Loop { .. })))
        .unwrap()
}

#[test]
fn test_trip_count() {
    assert_eq!(trip_count(0, 8, 1), Some(8));
    assert_eq!(trip_count(0, 7, 2), Some(4));
    assert_eq!(trip_count(5, 5, 1), Some(0));
    assert_eq!(trip_count(9, 3, 1), Some(0));
    assert_eq!(trip_count(0, 3, 0), None);
    assert_eq!(trip_count(i64::MIN, i64::MAX, 1), Some(u64::MAX));
}

#[test]
fn test_static_bounds() {
    let mut unit = UnitBuilder::new("bounds");
    unit.function("f", &["n"], |b| {
        b.for_step(
            "i",
            Expr::neg(Expr::int(2)),
            Expr::mul(Expr::int(3), Expr::int(4)),
            Expr::int(3),
            |_| {},
        );
        b.for_range("j", Expr::int(0), Expr::var("n"), |_| {});
    });
    let unit = unit.finish().unwrap();
    let tree = &unit.tree;
    let loops: Vec<_> = tree
        .preorder(tree.root.unwrap())
        .into_iter()
        .filter(|id| matches!(tree.get_node(*id), Some(Node::Loop { .. })))
        .collect();
    // -2, 1, 4, 7, 10
    assert_eq!(static_trip_count(tree, loops[0]), Some(5));
    assert_eq!(static_trip_count(tree, loops[1]), None);
}

#[test]
fn test_loop_control_targets() {
    let mut unit = UnitBuilder::new("control");
    unit.function("f", &[], |b| {
        b.labeled_for("outer", "i", Expr::int(0), Expr::int(4), Expr::int(1), |body| {
            body.if_then(Expr::eq(Expr::var("i"), Expr::int(1)), |then| {
                then.cont();
            });
            body.for_range("j", Expr::int(0), Expr::int(4), |inner| {
                // Targets the inner loop
                inner.brk();
                // Targets the outer loop by label
                inner.cont_to("outer");
            });
            body.brk_to("outer", None);
        });
    });
    let unit = unit.finish().unwrap();
    let control = loop_control(&unit.tree, first_loop(&unit.tree));
    assert_eq!(control.breaks.len(), 1);
    assert_eq!(control.continues.len(), 2);
}

#[test]
fn test_free_variables_respect_scopes() {
    let mut unit = UnitBuilder::new("scopes");
    unit.global("g", false, Expr::int(1));
    unit.function("f", &["p"], |b| {
        b.let_("a", Expr::add(Expr::var("p"), Expr::var("g")));
        b.let_(
            "k",
            Expr::closure(&["x"], Expr::add(Expr::var("x"), Expr::var("a"))),
        );
        b.for_range("i", Expr::int(0), Expr::var("limit"), |body| {
            body.call("emit", [Expr::var("i")]);
        });
        b.ret(Expr::var("a"));
    });
    let unit = unit.finish().unwrap();
    let f = unit.tree.function_named("f").unwrap();
    let free = free_variables(&unit.tree, f);
    let mut names: Vec<_> = free.into_iter().collect();
    names.sort();
    assert_eq!(names, vec!["g".to_string(), "limit".to_string()]);

    let bound = bound_names(&unit.tree, f);
    for name in ["p", "a", "k", "x", "i"] {
        assert!(bound.contains(name), "{} should be bound", name);
    }
}

#[test]
fn test_mutable_capture() {
    let mut unit = UnitBuilder::new("capture");
    unit.function("reads", &[], |b| {
        b.let_("base", Expr::int(1));
        b.let_("k", Expr::closure(&["x"], Expr::add(Expr::var("x"), Expr::var("base"))));
        b.ret(Expr::call("k", [Expr::int(2)]));
    });
    unit.function("writes", &[], |b| {
        b.let_mut("count", Expr::int(0));
        b.let_("k", Expr::closure(&["x"], Expr::add(Expr::var("x"), Expr::var("count"))));
        b.assign("count", Expr::int(5));
        b.ret(Expr::call("k", [Expr::int(2)]));
    });
    let unit = unit.finish().unwrap();
    let tree = &unit.tree;
    let none = FxHashSet::default();
    assert!(!has_mutable_capture(tree, tree.function_named("reads").unwrap(), &none));
    assert!(has_mutable_capture(tree, tree.function_named("writes").unwrap(), &none));
}

#[test]
fn test_structural_hash_ignores_handles() {
    let build = |extra: bool| {
        let mut unit = UnitBuilder::new("hash");
        if extra {
            unit.function("padding", &[], |b| {
                b.ret(Expr::int(0));
            });
        }
        unit.function("f", &["x"], |b| {
            b.ret(Expr::add(Expr::var("x"), Expr::int(1)));
        });
        unit.finish().unwrap()
    };
    let (a, b) = (build(false), build(true));
    let fa = a.tree.function_named("f").unwrap();
    let fb = b.tree.function_named("f").unwrap();
    assert_ne!(fa, fb);
    assert_eq!(structural_hash(&a.tree, fa), structural_hash(&b.tree, fb));

    let shape = body_shape(&a.tree, fa);
    assert_eq!(shape.returns, 1);
    assert_eq!(shape.loops, 0);
    assert_eq!(shape.node_count, node_size(&a.tree, fa) - 1);
}
