use super::*;

fn signature(name: &str) -> FunctionSignature {
    FunctionSignature {
        name: name.to_string(),
        arity: 1,
        variadic: false,
    }
}

#[test]
fn test_heuristic_oracle() {
    let oracle = HeuristicOracle { max_nodes: 10 };
    let small = BodyShape {
        node_count: 6,
        ..BodyShape::default()
    };
    let looping = BodyShape {
        node_count: 6,
        loops: 1,
        ..BodyShape::default()
    };
    let large = BodyShape {
        node_count: 40,
        ..BodyShape::default()
    };
    assert_eq!(
        oracle.query(&signature("f"), &small),
        OracleVerdict::new(true, ReasonCode::SmallBody)
    );
    assert_eq!(
        oracle.query(&signature("f"), &looping).reason,
        ReasonCode::ContainsLoop
    );
    assert_eq!(
        oracle.query(&signature("f"), &large).reason,
        ReasonCode::TooLarge
    );
    assert!(!NullOracle.query(&signature("f"), &small).would_auto_inline);
}

#[test]
fn test_cached_oracle_memoizes() {
    let stub = Arc::new(StubOracle::new(false).with_verdict("hot", true));
    let cached = CachedOracle::new(stub.clone());
    let shape = BodyShape {
        node_count: 3,
        structural_hash: 42,
        ..BodyShape::default()
    };

    assert!(cached.query(&signature("hot"), &shape).would_auto_inline);
    assert!(cached.query(&signature("hot"), &shape).would_auto_inline);
    assert!(!cached.query(&signature("cold"), &shape).would_auto_inline);

    assert_eq!(stub.queries(), 2);
    assert_eq!(cached.stats(), CacheStats { hits: 1, misses: 2 });

    // A different body under the same name is a different question
    let changed = BodyShape {
        structural_hash: 7,
        ..shape
    };
    cached.query(&signature("hot"), &changed);
    assert_eq!(stub.queries(), 3);

    cached.clear();
    cached.query(&signature("hot"), &shape);
    assert_eq!(stub.queries(), 4);
}

#[test]
fn test_cached_oracle_across_threads() {
    let stub = Arc::new(StubOracle::new(true));
    let cached = Arc::new(CachedOracle::new(stub.clone()));
    let shape = BodyShape::default();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cached = cached.clone();
            let shape = shape.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    assert!(cached.query(&signature("f"), &shape).would_auto_inline);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let stats = cached.stats();
    assert_eq!(stats.hits + stats.misses, 400);
    assert!(stub.queries() <= 4);
}
