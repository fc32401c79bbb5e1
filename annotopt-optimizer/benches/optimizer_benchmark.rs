use annotopt_core::ast::BinaryOp;
use annotopt_core::builder::{Expr, UnitBuilder};
use annotopt_core::scanner::Scanner;
use annotopt_core::source::SourceUnit;
use annotopt_optimizer::{OptimizationLevel, Optimizer, OptimizerConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// `functions` kernels, each with one annotated loop and one inlined helper call
fn create_unit(functions: usize) -> SourceUnit {
    let mut unit = UnitBuilder::new(format!("bench_{}", functions));
    unit.function("weight", &["v"], |b| {
        b.ret(Expr::add(Expr::mul(Expr::var("v"), Expr::int(3)), Expr::int(1)));
    });
    for index in 0..functions {
        unit.function(format!("kernel_{}", index), &["xs", "n"], |b| {
            b.let_mut("total", Expr::int(0));
            b.annotate("tool: unroll/4");
            b.for_range("i", Expr::int(0), Expr::var("n"), |body| {
                body.annotate("tool: inline");
                body.let_("w", Expr::call("weight", [Expr::index(Expr::var("xs"), Expr::var("i"))]));
                body.assign_op("total", BinaryOp::Add, Expr::var("w"));
            });
            b.annotate("tool: unroll");
            b.for_range("j", Expr::int(0), Expr::int(8), |body| {
                body.call("emit", [Expr::var("j")]);
            });
            b.ret(Expr::var("total"));
        })
        .doc(if index % 2 == 0 { "tool: speed" } else { "tool: size" });
    }
    unit.finish().expect("benchmark unit builds")
}

fn benchmark_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    for functions in [4, 32, 128] {
        let unit = create_unit(functions);
        group.bench_with_input(BenchmarkId::from_parameter(functions), &unit, |b, unit| {
            let scanner = Scanner::default();
            b.iter(|| black_box(scanner.scan(unit).expect("scan")));
        });
    }
    group.finish();
}

fn benchmark_optimization_levels(c: &mut Criterion) {
    let unit = create_unit(32);
    let levels = [
        OptimizationLevel::Conservative,
        OptimizationLevel::Standard,
        OptimizationLevel::Aggressive,
    ];

    let mut group = c.benchmark_group("optimization_levels");
    for level in levels {
        let optimizer = Optimizer::new(OptimizerConfig {
            parallel: false,
            ..OptimizerConfig::for_level(level)
        });
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", level)),
            &unit,
            |b, unit| b.iter(|| black_box(optimizer.optimize(unit).expect("optimize"))),
        );
    }
    group.finish();
}

fn benchmark_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel");
    for functions in [8, 64] {
        let unit = create_unit(functions);
        for parallel in [false, true] {
            let optimizer = Optimizer::new(OptimizerConfig {
                parallel,
                ..OptimizerConfig::default()
            });
            group.bench_with_input(
                BenchmarkId::new(if parallel { "parallel" } else { "sequential" }, functions),
                &unit,
                |b, unit| b.iter(|| black_box(optimizer.optimize(unit).expect("optimize"))),
            );
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_scan,
    benchmark_optimization_levels,
    benchmark_parallel
);
criterion_main!(benches);
