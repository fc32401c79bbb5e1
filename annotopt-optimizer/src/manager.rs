//! Pass manager: expands directives into passes and runs them per function

use annotopt_core::ast::{Node, NodeId, SyntaxTree, Transform};
use annotopt_core::diagnostic::Diagnostic;
use annotopt_core::directive::{Directive, DirectiveId, DirectiveKind};
use annotopt_core::error::Severity;
use annotopt_core::scanner::{DirectiveSet, Scanner};
use annotopt_core::source::SourceUnit;
use annotopt_core::{Error, Result};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::analysis;
use crate::config::OptimizerConfig;
use crate::context::PassContext;
use crate::oracle::{CompilerOracle, NullOracle};
use crate::passes::{
    DeadBranchPass, DeadCodePass, InlinePass, LoopCollapser, Pass, PassRequest, RequestOrigin,
    TransformationResult, UnrollPass,
};
use crate::report::{PassOutcome, PassRecord, RunReport};

/// A rewritten unit and what happened to its directives
#[derive(Debug, Clone)]
pub struct Optimized {
    pub unit: SourceUnit,
    pub report: RunReport,
}

/// Result for one unit of a batch
#[derive(Debug, Clone)]
pub enum UnitOutcome {
    Optimized(Optimized),
    /// The unit's annotations did not parse; the unit was left alone
    Skipped { name: String, diagnostic: Diagnostic },
}

/// Entry point of the engine
pub struct Optimizer {
    config: OptimizerConfig,
    oracle: Arc<dyn CompilerOracle>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

/// One function handed to a worker
struct Job {
    function: NodeId,
    name: String,
    fragment: SyntaxTree,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            oracle: Arc::new(NullOracle),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn CompilerOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Optimize one unit. A malformed annotation fails the unit with
    /// [`Error::DirectiveSyntax`]; an invariant violation fails the run.
    pub fn optimize(&self, unit: &SourceUnit) -> Result<Optimized> {
        let start = Instant::now();
        self.config.validate()?;
        let set = Scanner::new(self.config.prefix.clone()).scan(unit)?;

        let mut tree = unit.tree.clone();
        tree.seed_fresh_names();
        let ctx = PassContext::build(&tree, self.config.clone(), Arc::clone(&self.oracle))?;

        let directives = self.live_directives(&tree, &set);
        let mut jobs = Vec::new();
        for function in tree.functions() {
            if directives.is_empty() {
                break;
            }
            if set.is_conflicted(function) {
                debug!(function = %function, "skipping conflicted function");
                continue;
            }
            let name = ctx.function_name(function).unwrap_or_default().to_string();
            jobs.push(Job {
                function,
                name,
                fragment: tree.extract(function)?,
            });
        }

        let mut records = Vec::new();
        let mut rewritten = 0;
        for (fragment, function_records) in self.run_jobs(&ctx, &directives, jobs)? {
            if function_records.iter().any(PassRecord::is_applied) {
                rewritten += 1;
                tree.absorb(fragment)?;
            }
            records.extend(function_records);
        }

        let pruned = tree.prune();
        tree.validate()?;
        let report = RunReport::build(&unit.name, &ctx.snapshot, &unit.source_map, &set, &records);
        info!(
            unit = %unit.name,
            directives = report.directives.len(),
            applied = report.applied_count(),
            functions = rewritten,
            pruned,
            elapsed_us = start.elapsed().as_micros() as u64,
            "optimized unit"
        );

        Ok(Optimized {
            unit: SourceUnit::new(
                unit.name.clone(),
                tree,
                unit.source_map.clone(),
                unit.metadata.clone(),
            ),
            report,
        })
    }

    /// Optimize several units, in parallel when configured. A unit whose
    /// annotations do not parse is reported and skipped; any other error
    /// fails the batch once every unit has finished.
    pub fn optimize_all(&self, units: &[SourceUnit]) -> Result<Vec<UnitOutcome>> {
        let results: Vec<Result<UnitOutcome>> = if self.config.parallel && units.len() > 1 {
            self.pool()?
                .install(|| units.par_iter().map(|unit| self.unit_outcome(unit)).collect())
        } else {
            units.iter().map(|unit| self.unit_outcome(unit)).collect()
        };
        results.into_iter().collect()
    }

    fn unit_outcome(&self, unit: &SourceUnit) -> Result<UnitOutcome> {
        match self.optimize(unit) {
            Ok(optimized) => Ok(UnitOutcome::Optimized(optimized)),
            Err(error @ Error::DirectiveSyntax { .. }) => {
                warn!(unit = %unit.name, "skipping unit: {}", error);
                Ok(UnitOutcome::Skipped {
                    name: unit.name.clone(),
                    diagnostic: Diagnostic::from_error(&error),
                })
            }
            Err(error) => Err(error),
        }
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("failed to build thread pool: {}", e)))
    }

    /// Bound directives outside conflicted functions
    fn live_directives(&self, tree: &SyntaxTree, set: &DirectiveSet) -> Vec<Directive> {
        set.bound
            .iter()
            .filter(|directive| {
                tree.enclosing_function(directive.target)
                    .map_or(true, |function| !set.is_conflicted(function))
            })
            .cloned()
            .collect()
    }

    fn run_jobs(
        &self,
        ctx: &PassContext,
        directives: &[Directive],
        jobs: Vec<Job>,
    ) -> Result<Vec<(SyntaxTree, Vec<PassRecord>)>> {
        let run = |job: Job| FunctionRun::new(ctx, directives, job).run();
        let results: Vec<Result<_>> = if !self.config.parallel || jobs.len() < 2 {
            jobs.into_iter().map(run).collect()
        } else if rayon::current_thread_index().is_some() {
            // Already on a pool worker; nest into that pool
            jobs.into_par_iter().map(run).collect()
        } else {
            self.pool()?
                .install(|| jobs.into_par_iter().map(run).collect())
        };
        results.into_iter().collect()
    }
}

/// Rewrites one extracted function
struct FunctionRun<'a> {
    ctx: &'a PassContext,
    directives: &'a [Directive],
    function: NodeId,
    name: String,
    tree: SyntaxTree,
    records: Vec<PassRecord>,
    /// Requests already answered, keyed by directive and target
    processed: FxHashSet<(Option<DirectiveId>, NodeId)>,
    /// Inlined copies written by this run
    expanded: FxHashSet<NodeId>,
}

impl<'a> FunctionRun<'a> {
    fn new(ctx: &'a PassContext, directives: &'a [Directive], job: Job) -> Self {
        Self {
            ctx,
            directives,
            function: job.function,
            name: job.name,
            tree: job.fragment,
            records: Vec::new(),
            processed: FxHashSet::default(),
            expanded: FxHashSet::default(),
        }
    }

    fn run(mut self) -> Result<(SyntaxTree, Vec<PassRecord>)> {
        trace!(function = %self.name, "running passes");
        self.inline_stage()?;
        self.unroll_stage()?;
        self.deadcode_stage()?;
        Ok((self.tree, self.records))
    }

    fn of_kind(&self, kind: DirectiveKind) -> impl Iterator<Item = &'a Directive> + 'a {
        let directives: &'a [Directive] = self.directives;
        directives
            .iter()
            .filter(move |directive| directive.kind == kind)
    }

    /// `speed` or `size` on this function
    fn pipeline(&self, kind: DirectiveKind) -> Option<&'a Directive> {
        let function = self.function;
        self.of_kind(kind)
            .find(|directive| directive.target == function)
    }

    /// Nodes of this fragment standing for the directive's target
    fn instances(&self, directive: &Directive) -> Vec<NodeId> {
        let key = self.ctx.snapshot.origin(directive.target);
        self.tree.instances_of(key)
    }

    fn is_pending(&self, request: &PassRequest) -> bool {
        !self.processed.contains(&(request.directive, request.target))
            && analysis::is_attached(&self.tree, request.target)
    }

    /// Run one request; the replacement comes back when the pass rewrote
    fn apply(&mut self, pass: &dyn Pass, request: PassRequest) -> Result<Option<NodeId>> {
        let result = pass.apply(&mut self.tree, &request, self.ctx)?;
        self.processed.insert((request.directive, request.target));
        let (outcome, rewritten) = match result {
            TransformationResult::Rewritten {
                replacement,
                applied,
            } => {
                self.processed.insert((request.directive, replacement));
                if self.ctx.config.validate_each_pass {
                    self.tree.validate()?;
                }
                debug!(
                    function = %self.name,
                    pass = pass.name(),
                    target = %request.target,
                    replacement = %replacement,
                    origin = ?request.origin,
                    "applied"
                );
                (PassOutcome::Applied(applied), Some(replacement))
            }
            TransformationResult::Declined(diagnostic) => {
                if diagnostic.severity >= Severity::Warning {
                    warn!(function = %self.name, pass = pass.name(), "{}", diagnostic.message);
                } else {
                    debug!(function = %self.name, pass = pass.name(), "{}", diagnostic.message);
                }
                (PassOutcome::Declined(diagnostic), None)
            }
        };
        self.records.push(PassRecord {
            directive: request.directive,
            function: self.name.clone(),
            pass: pass.name().to_string(),
            target: request.target,
            outcome,
        });
        Ok(rewritten)
    }

    /// A call a previous run left inside one of its inlined copies belongs
    /// to that copy. Only calls the unit was written with, or ones this
    /// run's own copies brought in, are expanded again.
    fn is_open_site(&self, call: NodeId) -> bool {
        self.tree
            .ancestors(call)
            .into_iter()
            .find(|id| self.tree.mark_of(*id) == Some(Transform::Inlined))
            .map_or(true, |copy| self.expanded.contains(&copy))
    }

    fn inline_sites(&self) -> Vec<PassRequest> {
        let calls: Vec<(NodeId, String)> = analysis::calls_in(&self.tree, self.function)
            .into_iter()
            .filter(|(call, _)| self.is_open_site(*call))
            .collect();
        let mut sites = Vec::new();

        for directive in self.of_kind(DirectiveKind::Inline) {
            match self.ctx.snapshot.get_node(directive.target) {
                // Every call of the annotated function
                Some(Node::FunctionDecl { name, .. }) => sites.extend(
                    calls
                        .iter()
                        .filter(|(_, callee)| callee == name)
                        .map(|(call, _)| PassRequest::for_directive(directive, *call)),
                ),
                _ => sites.extend(
                    self.instances(directive)
                        .into_iter()
                        .map(|instance| PassRequest::for_directive(directive, instance)),
                ),
            }
        }
        if let Some(speed) = self.pipeline(DirectiveKind::FuncSpeed) {
            let budget = self.ctx.config.speed_inline_budget;
            sites.extend(
                calls
                    .iter()
                    .filter(|(_, callee)| {
                        self.ctx
                            .function(callee)
                            .map_or(false, |info| info.size <= budget)
                    })
                    .map(|(call, _)| PassRequest::from_pipeline(speed, RequestOrigin::Speed, *call)),
            );
        }
        if let Some(size) = self.pipeline(DirectiveKind::FuncSize) {
            sites.extend(
                calls
                    .iter()
                    .filter(|(_, callee)| {
                        self.ctx.function(callee).is_some()
                            && self.ctx.call_graph.call_count(callee) == 1
                    })
                    .map(|(call, _)| PassRequest::from_pipeline(size, RequestOrigin::Size, *call)),
            );
        }

        let mut seen = FxHashSet::default();
        sites
            .into_iter()
            .filter(|request| self.is_pending(request) && seen.insert(request.target))
            .collect()
    }

    /// Repeats while new call sites get inlined
    fn inline_stage(&mut self) -> Result<()> {
        let rounds = self.ctx.config.max_inline_rounds.max(1);
        for round in 0..rounds {
            let sites = self.inline_sites();
            if sites.is_empty() {
                break;
            }
            let mut inlined = 0;
            for request in sites {
                // An earlier site of this round may have swallowed it
                if !self.is_pending(&request) {
                    continue;
                }
                if let Some(copy) = self.apply(&InlinePass, request)? {
                    self.expanded.insert(copy);
                    inlined += 1;
                }
            }
            trace!(function = %self.name, round, inlined, "inline round");
            if inlined == 0 {
                break;
            }
        }
        Ok(())
    }

    fn unroll_candidates(&self) -> Vec<PassRequest> {
        let mut candidates = Vec::new();
        for directive in self.of_kind(DirectiveKind::Unroll) {
            candidates.extend(
                self.instances(directive)
                    .into_iter()
                    .map(|instance| PassRequest::for_directive(directive, instance)),
            );
        }
        if let Some(speed) = self.pipeline(DirectiveKind::FuncSpeed) {
            let config = &self.ctx.config;
            for id in self.tree.preorder(self.function) {
                let body = match self.tree.get_node(id) {
                    Some(Node::Loop { body, .. }) if self.tree.mark_of(id).is_none() => *body,
                    _ => continue,
                };
                let within_budget = analysis::static_trip_count(&self.tree, id).map_or(false, |trips| {
                    let size = analysis::node_size(&self.tree, body) as u64;
                    trips <= config.full_unroll_limit
                        && trips.saturating_mul(size) <= config.speed_unroll_budget as u64
                });
                if within_budget {
                    candidates
                        .push(PassRequest::from_pipeline(speed, RequestOrigin::Speed, id).full_only());
                }
            }
        }
        candidates
            .into_iter()
            .filter(|request| self.is_pending(request))
            .collect()
    }

    /// Innermost loops first, then re-rolling for `size`
    fn unroll_stage(&mut self) -> Result<()> {
        loop {
            let mut deepest: Option<(usize, PassRequest)> = None;
            for request in self.unroll_candidates() {
                let depth = self.tree.depth(request.target);
                if deepest.as_ref().map_or(true, |(best, _)| depth > *best) {
                    deepest = Some((depth, request));
                }
            }
            match deepest {
                Some((_, request)) => {
                    self.apply(&UnrollPass, request)?;
                }
                None => break,
            }
        }

        if let Some(size) = self.pipeline(DirectiveKind::FuncSize) {
            let protected: Vec<NodeId> = self
                .directives
                .iter()
                .filter(|directive| {
                    !directive.kind.is_function_level()
                        && !matches!(
                            self.ctx.snapshot.get_node(directive.target),
                            Some(Node::FunctionDecl { .. })
                        )
                })
                .flat_map(|directive| self.instances(directive))
                .collect();
            let collapser =
                LoopCollapser::new(self.ctx.config.collapse_min_run).protecting(protected);
            let request = PassRequest::from_pipeline(size, RequestOrigin::Size, self.function);
            self.apply(&collapser, request)?;
        }
        Ok(())
    }

    /// Explicit removals in source order, then the unsafe pipeline stages
    fn deadcode_stage(&mut self) -> Result<()> {
        let order: FxHashMap<NodeId, usize> = self
            .tree
            .preorder(self.function)
            .into_iter()
            .enumerate()
            .map(|(index, id)| (id, index))
            .collect();
        let mut requests: Vec<PassRequest> = self
            .of_kind(DirectiveKind::Deadcode)
            .flat_map(|directive| {
                self.instances(directive)
                    .into_iter()
                    .map(move |instance| PassRequest::for_directive(directive, instance))
            })
            .collect();
        requests.sort_by_key(|request| order.get(&request.target).copied().unwrap_or(usize::MAX));
        for request in requests {
            // Removing an enclosing node detaches the ones inside it
            if self.is_pending(&request) {
                self.apply(&DeadCodePass, request)?;
            }
        }

        if let Some(speed) = self.pipeline(DirectiveKind::FuncSpeed) {
            if speed.is_unsafe {
                let request = PassRequest::from_pipeline(speed, RequestOrigin::Speed, self.function);
                self.apply(&DeadBranchPass::folding(), request)?;
            }
        }
        if let Some(size) = self.pipeline(DirectiveKind::FuncSize) {
            if size.is_unsafe {
                let request = PassRequest::from_pipeline(size, RequestOrigin::Size, self.function);
                self.apply(&DeadBranchPass::stripping(), request)?;
            }
        }
        Ok(())
    }
}
