//! Read-only per-run state shared by every worker

use annotopt_core::ast::{Node, NodeId, SyntaxTree};
use annotopt_core::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::debug;

use crate::analysis;
use crate::config::OptimizerConfig;
use crate::oracle::{BodyShape, CompilerOracle, FunctionSignature};

/// What the passes need to know about one function
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub id: NodeId,
    pub name: String,
    pub params: Vec<String>,
    pub variadic: bool,
    pub body: NodeId,
    /// Nodes in the body
    pub size: usize,
    /// Globals the body refers to
    pub globals_read: FxHashSet<String>,
    /// Functions the body calls, module functions or not
    pub callees: FxHashSet<String>,
    pub has_mutable_capture: bool,
    pub shape: BodyShape,
}

impl FunctionInfo {
    pub fn signature(&self) -> FunctionSignature {
        FunctionSignature {
            name: self.name.clone(),
            arity: self.params.len(),
            variadic: self.variadic,
        }
    }

    /// Whether `count` arguments fit the parameter list
    pub fn accepts_arity(&self, count: usize) -> bool {
        if self.variadic {
            count + 1 >= self.params.len()
        } else {
            count == self.params.len()
        }
    }
}

/// Call edges between module functions plus call-site counts
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    edges: FxHashMap<String, FxHashSet<String>>,
    call_sites: FxHashMap<String, usize>,
}

impl CallGraph {
    pub fn add_call(&mut self, caller: &str, callee: &str) {
        self.edges
            .entry(caller.to_string())
            .or_default()
            .insert(callee.to_string());
        *self.call_sites.entry(callee.to_string()).or_insert(0) += 1;
    }

    pub fn callees(&self, caller: &str) -> impl Iterator<Item = &String> {
        self.edges.get(caller).into_iter().flatten()
    }

    /// Whether `to` can be reached from `from` through one or more calls
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack: Vec<&str> = vec![from];
        let mut seen = FxHashSet::default();
        while let Some(current) = stack.pop() {
            for callee in self.callees(current) {
                if callee == to {
                    return true;
                }
                if seen.insert(callee.as_str()) {
                    stack.push(callee.as_str());
                }
            }
        }
        false
    }

    pub fn is_recursive(&self, name: &str) -> bool {
        self.reaches(name, name)
    }

    /// Call sites naming `callee` anywhere in the unit
    pub fn call_count(&self, callee: &str) -> usize {
        self.call_sites.get(callee).copied().unwrap_or(0)
    }
}

/// Frozen before any pass runs
pub struct PassContext {
    /// The unit as it was before this run
    pub snapshot: Arc<SyntaxTree>,
    pub functions: FxHashMap<String, FunctionInfo>,
    pub globals: FxHashSet<String>,
    pub mutable_globals: FxHashSet<String>,
    pub call_graph: CallGraph,
    pub config: OptimizerConfig,
    pub oracle: Arc<dyn CompilerOracle>,
}

impl PassContext {
    pub fn build(
        tree: &SyntaxTree,
        config: OptimizerConfig,
        oracle: Arc<dyn CompilerOracle>,
    ) -> Result<Self> {
        let snapshot = Arc::new(tree.clone());
        let mut globals = FxHashSet::default();
        let mut mutable_globals = FxHashSet::default();
        if let Some(Node::Module { items }) = tree.root.and_then(|root| tree.get_node(root)) {
            for item in items {
                if let Some(Node::Global { name, mutable, .. }) = tree.get_node(*item) {
                    globals.insert(name.clone());
                    if *mutable {
                        mutable_globals.insert(name.clone());
                    }
                }
            }
        }

        let mut functions = FxHashMap::default();
        let mut call_graph = CallGraph::default();
        for id in tree.functions() {
            let (name, params, variadic, body) = match tree.node(id)? {
                Node::FunctionDecl {
                    name,
                    params,
                    variadic,
                    body,
                } => (name.clone(), params.clone(), *variadic, *body),
                _ => continue,
            };
            let calls = analysis::calls_in(tree, body);
            for (_, callee) in &calls {
                call_graph.add_call(&name, callee);
            }
            let callees = calls.into_iter().map(|(_, callee)| callee).collect();
            let globals_read = analysis::free_variables(tree, id)
                .into_iter()
                .filter(|variable| globals.contains(variable))
                .collect();
            let info = FunctionInfo {
                id,
                params,
                variadic,
                body,
                size: analysis::node_size(tree, body),
                globals_read,
                callees,
                has_mutable_capture: analysis::has_mutable_capture(tree, id, &mutable_globals),
                shape: analysis::body_shape(tree, id),
                name: name.clone(),
            };
            functions.insert(name, info);
        }
        debug!(
            functions = functions.len(),
            globals = globals.len(),
            "built pass context"
        );
        Ok(Self {
            snapshot,
            functions,
            globals,
            mutable_globals,
            call_graph,
            config,
            oracle,
        })
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    /// Name of the function declared at `id` in the snapshot
    pub fn function_name(&self, id: NodeId) -> Option<&str> {
        match self.snapshot.get_node(id) {
            Some(Node::FunctionDecl { name, .. }) => Some(name.as_str()),
            _ => None,
        }
    }
}
