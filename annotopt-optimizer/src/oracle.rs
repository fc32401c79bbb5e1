//! Compiler oracle: a pluggable answer to "would the native compiler inline
//! this function on its own?"
//!
//! The optimizer only asks; it never knows how the answer was produced. A
//! query must be pure so that [`CachedOracle`] can memoize it.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Name and arity of the function being asked about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub arity: usize,
    pub variadic: bool,
}

/// Coarse shape of a function body
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BodyShape {
    pub node_count: usize,
    pub loops: usize,
    pub calls: usize,
    pub returns: usize,
    pub closures: usize,
    /// Hash of the body structure, independent of node handles
    pub structural_hash: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    SmallBody,
    TooLarge,
    ContainsLoop,
    Variadic,
    Recursive,
    /// No compiler is attached
    NotConsulted,
    /// A fixed answer (tests and replays)
    Stubbed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleVerdict {
    pub would_auto_inline: bool,
    pub reason: ReasonCode,
}

impl OracleVerdict {
    pub fn new(would_auto_inline: bool, reason: ReasonCode) -> Self {
        Self {
            would_auto_inline,
            reason,
        }
    }
}

/// Read-only capability shared by every worker
pub trait CompilerOracle: Send + Sync {
    fn name(&self) -> &str;

    fn query(&self, signature: &FunctionSignature, shape: &BodyShape) -> OracleVerdict;
}

/// Oracle for runs without a compiler: nothing is auto-inlined
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOracle;

impl CompilerOracle for NullOracle {
    fn name(&self) -> &str {
        "null"
    }

    fn query(&self, _signature: &FunctionSignature, _shape: &BodyShape) -> OracleVerdict {
        OracleVerdict::new(false, ReasonCode::NotConsulted)
    }
}

/// Approximates a typical compiler's inliner from the body shape
#[derive(Debug, Clone, Copy)]
pub struct HeuristicOracle {
    /// Bodies up to this many nodes are auto-inlined
    pub max_nodes: usize,
}

impl Default for HeuristicOracle {
    fn default() -> Self {
        Self { max_nodes: 12 }
    }
}

impl CompilerOracle for HeuristicOracle {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn query(&self, signature: &FunctionSignature, shape: &BodyShape) -> OracleVerdict {
        if signature.variadic {
            OracleVerdict::new(false, ReasonCode::Variadic)
        } else if shape.loops > 0 {
            OracleVerdict::new(false, ReasonCode::ContainsLoop)
        } else if shape.node_count > self.max_nodes {
            OracleVerdict::new(false, ReasonCode::TooLarge)
        } else {
            OracleVerdict::new(true, ReasonCode::SmallBody)
        }
    }
}

/// Fixed answers per function name; counts how often it was asked
#[derive(Debug, Default)]
pub struct StubOracle {
    verdicts: FxHashMap<String, bool>,
    fallback: bool,
    queries: AtomicUsize,
}

impl StubOracle {
    pub fn new(fallback: bool) -> Self {
        Self {
            fallback,
            ..Self::default()
        }
    }

    pub fn with_verdict(mut self, function: impl Into<String>, would_auto_inline: bool) -> Self {
        self.verdicts.insert(function.into(), would_auto_inline);
        self
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl CompilerOracle for StubOracle {
    fn name(&self) -> &str {
        "stub"
    }

    fn query(&self, signature: &FunctionSignature, _shape: &BodyShape) -> OracleVerdict {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let answer = self
            .verdicts
            .get(&signature.name)
            .copied()
            .unwrap_or(self.fallback);
        OracleVerdict::new(answer, ReasonCode::Stubbed)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

/// Memoizes another oracle per signature and body hash
pub struct CachedOracle {
    inner: Arc<dyn CompilerOracle>,
    cache: RwLock<FxHashMap<(FunctionSignature, u64), OracleVerdict>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedOracle {
    pub fn new(inner: Arc<dyn CompilerOracle>) -> Self {
        Self {
            inner,
            cache: RwLock::new(FxHashMap::default()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }
}

impl CompilerOracle for CachedOracle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn query(&self, signature: &FunctionSignature, shape: &BodyShape) -> OracleVerdict {
        let key = (signature.clone(), shape.structural_hash);
        if let Some(verdict) = self.cache.read().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return *verdict;
        }
        // Two workers may race to the same miss; the query is pure so either
        // answer is the answer.
        let verdict = self.inner.query(signature, shape);
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(function = %signature.name, ?verdict, "oracle cache miss");
        self.cache.write().insert(key, verdict);
        verdict
    }
}

#[cfg(test)]
#[path = "oracle_tests.rs"]
mod tests;
