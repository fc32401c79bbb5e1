//! annotopt optimization engine
//!
//! Rewrites functions of a unit according to the directives found in its
//! annotations: inlining, loop unrolling, unsafe dead-code removal, and the
//! `speed`/`size` pipelines built from them.

pub mod analysis;
pub mod config;
pub mod context;
pub mod manager;
pub mod oracle;
pub mod passes;
pub mod report;
pub mod rewrite;

pub use config::{ConfigError, OptimizationLevel, OptimizerConfig};
pub use context::PassContext;
pub use manager::{Optimized, Optimizer, UnitOutcome};
pub use oracle::{CachedOracle, CompilerOracle, HeuristicOracle, NullOracle, StubOracle};
pub use passes::{Pass, PassRequest, SubRewrite, TransformationResult};
pub use report::{DirectiveOutcome, DirectiveStatus, RunReport};

/// Re-exports for driving the engine
pub mod prelude {
    pub use crate::config::{OptimizationLevel, OptimizerConfig};
    pub use crate::manager::{Optimized, Optimizer, UnitOutcome};
    pub use crate::oracle::{CompilerOracle, HeuristicOracle, NullOracle};
    pub use crate::report::{DirectiveStatus, RunReport};
}
