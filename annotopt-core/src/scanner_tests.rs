use super::*;
use crate::ast::BinaryOp;
use crate::builder::{Expr, UnitBuilder};
use crate::diagnostic::DiagnosticCode;
use crate::directive::Qualifier;

fn scan(unit: &SourceUnit) -> Result<DirectiveSet> {
    Scanner::default().scan(unit)
}

fn loop_body(b: &mut crate::builder::BlockBuilder) {
    b.assign_op("total", BinaryOp::Add, Expr::var("i"));
}

#[test]
fn test_unroll_binds_to_following_loop() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("f", &[], |b| {
        b.let_mut("total", Expr::int(0));
        b.annotate("tool: unroll/4");
        b.for_range("i", Expr::int(0), Expr::int(8), loop_body);
        b.ret(Expr::var("total"));
    });
    let unit = unit.finish().unwrap();
    let set = scan(&unit).unwrap();
    assert_eq!(set.bound.len(), 1);
    let directive = &set.bound[0];
    assert_eq!(directive.kind, DirectiveKind::Unroll);
    assert_eq!(directive.qualifier, Some(Qualifier::Factor(4)));
    assert!(matches!(
        unit.tree.get_node(directive.target),
        Some(Node::Loop { .. })
    ));
    assert_eq!(directive.position.line, 3);
}

#[test]
fn test_ordinary_comments_are_skipped() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("f", &[], |b| {
        b.annotate("accumulate the values");
        b.ret(Expr::int(1));
    });
    let set = scan(&unit.finish().unwrap()).unwrap();
    assert!(set.is_empty());
}

#[test]
fn test_unroll_on_statement_is_discarded() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("f", &[], |b| {
        b.annotate("tool: unroll");
        b.let_("x", Expr::int(1));
        b.ret(Expr::var("x"));
    });
    let set = scan(&unit.finish().unwrap()).unwrap();
    assert!(set.bound.is_empty());
    assert_eq!(set.rejected.len(), 1);
    assert_eq!(
        set.rejected[0].diagnostic.code,
        DiagnosticCode::DirectiveAttachment
    );
}

#[test]
fn test_annotation_at_block_end_is_unattached() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("f", &[], |b| {
        b.call("emit", [Expr::int(1)]);
        b.annotate("tool: deadcode");
    });
    let set = scan(&unit.finish().unwrap()).unwrap();
    assert_eq!(set.rejected.len(), 1);
    assert!(set.rejected[0].diagnostic.message.contains("no construct follows"));
}

#[test]
fn test_function_doc_binds_to_function() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("hot", &["n"], |b| {
        b.ret(Expr::var("n"));
    })
    .doc("Returns its argument.")
    .doc("tool: unsafe speed");
    let unit = unit.finish().unwrap();
    let set = scan(&unit).unwrap();
    assert_eq!(set.bound.len(), 1);
    assert_eq!(set.bound[0].kind, DirectiveKind::FuncSpeed);
    assert!(set.bound[0].is_unsafe);
    assert_eq!(Some(set.bound[0].target), unit.tree.function_named("hot"));
}

#[test]
fn test_speed_and_size_conflict() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("hot", &[], |b| {
        b.ret(Expr::int(0));
    })
    .doc("tool: speed")
    .doc("tool: size");
    let unit = unit.finish().unwrap();
    let set = scan(&unit).unwrap();
    assert!(set.bound.is_empty());
    assert_eq!(set.conflicts.len(), 1);
    let function = unit.tree.function_named("hot").unwrap();
    assert!(set.is_conflicted(function));
    assert_eq!(set.conflicts[0].directives.len(), 2);
    assert_eq!(
        set.conflicts[0].diagnostic.code,
        DiagnosticCode::DirectiveConflict
    );
}

#[test]
fn test_statement_inline_narrows_to_single_call() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("g", &["a"], |b| {
        b.ret(Expr::var("a"));
    });
    unit.function("f", &[], |b| {
        b.annotate("tool: inline");
        b.let_("x", Expr::add(Expr::call("g", [Expr::int(2)]), Expr::int(1)));
        b.ret(Expr::var("x"));
    });
    let unit = unit.finish().unwrap();
    let set = scan(&unit).unwrap();
    assert_eq!(set.bound.len(), 1);
    assert!(matches!(
        unit.tree.get_node(set.bound[0].target),
        Some(Node::Call { callee, .. }) if callee == "g"
    ));
}

#[test]
fn test_statement_inline_over_two_calls_is_ambiguous() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("f", &[], |b| {
        b.annotate("tool: inline");
        b.let_(
            "x",
            Expr::add(Expr::call("g", [Expr::int(1)]), Expr::call("g", [Expr::int(2)])),
        );
        b.ret(Expr::var("x"));
    });
    let err = scan(&unit.finish().unwrap()).unwrap_err();
    assert!(matches!(err, Error::DirectiveSyntax { .. }));
}

#[test]
fn test_expression_annotation_picks_the_marked_call() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("f", &[], |b| {
        b.let_(
            "x",
            Expr::add(
                Expr::call("g", [Expr::int(1)]),
                Expr::annotated("tool: inline/force", Expr::call("h", [Expr::int(2)])),
            ),
        );
        b.ret(Expr::var("x"));
    });
    let unit = unit.finish().unwrap();
    let set = scan(&unit).unwrap();
    assert_eq!(set.bound.len(), 1);
    assert!(set.bound[0].is_forced());
    assert!(matches!(
        unit.tree.get_node(set.bound[0].target),
        Some(Node::Call { callee, .. }) if callee == "h"
    ));
}

#[test]
fn test_trailing_annotation_between_statements_is_ambiguous() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("f", &[], |b| {
        b.call("emit", [Expr::int(1)]);
        b.annotate_trailing("tool: deadcode");
        b.call("emit", [Expr::int(2)]);
    });
    let err = scan(&unit.finish().unwrap()).unwrap_err();
    match err {
        Error::DirectiveSyntax { message, position } => {
            assert!(message.contains("ambiguous"));
            assert_eq!(position.line, 2);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_malformed_annotation_fails_the_unit() {
    let mut unit = UnitBuilder::new("scan");
    unit.function("f", &[], |b| {
        b.annotate("tool: unroll/1");
        b.for_range("i", Expr::int(0), Expr::int(8), |_| {});
    });
    let err = scan(&unit.finish().unwrap()).unwrap_err();
    assert!(matches!(err, Error::DirectiveSyntax { .. }));
}

#[test]
fn test_inline_before_function_item() {
    let mut unit = UnitBuilder::new("scan");
    unit.annotate("tool: inline");
    unit.function("g", &["a"], |b| {
        b.ret(Expr::var("a"));
    });
    let unit = unit.finish().unwrap();
    let set = scan(&unit).unwrap();
    assert_eq!(set.bound.len(), 1);
    assert_eq!(Some(set.bound[0].target), unit.tree.function_named("g"));
}
