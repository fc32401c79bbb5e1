//! Syntax model: a handle-based tree of typed nodes
//!
//! Nodes live in an arena keyed by [`NodeId`]. Children are referenced by
//! handle; parents are found through a separate [`ParentIndex`], so there are
//! no back-pointers and a rewrite only has to swap one child slot.

use crate::error::{Error, Result};
use crate::source::Span;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Type alias for the HashMap implementation used in the tree
pub type AstHashMap<K, V> = FxHashMap<K, V>;

/// Type alias for the HashSet implementation used in the tree
pub type AstHashSet<T> = FxHashSet<T>;

/// Node identifier in the syntax tree
///
/// Uses NonZeroU32 internally to enable null pointer optimization for Option<NodeId>.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub NonZeroU32);

impl NodeId {
    /// Creates a new NodeId from a u32.
    /// Returns None if the value is 0.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(NodeId)
    }

    /// Gets the inner u32 value
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
    Unit,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Str(s) => write!(f, "{:?}", s),
            Literal::Unit => write!(f, "()"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Arithmetic operators usable in compound assignment
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// Coarse classification used by directive binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Module,
    Declaration,
    FunctionDecl,
    Block,
    Loop,
    CallExpr,
    Statement,
    Expression,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Module => "a module",
            NodeKind::Declaration => "a declaration",
            NodeKind::FunctionDecl => "a function declaration",
            NodeKind::Block => "a block",
            NodeKind::Loop => "a loop",
            NodeKind::CallExpr => "a call expression",
            NodeKind::Statement => "a statement",
            NodeKind::Expression => "an expression",
        };
        f.write_str(name)
    }
}

/// Marks left on nodes produced by a pass; used to recognize a pass's own
/// post-condition on a re-run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transform {
    Inlined,
    Unrolled,
    Eliminated,
    Folded,
    Collapsed,
}

/// Syntax tree nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Root of a compilation unit
    Module { items: Vec<NodeId> },
    /// Module-level variable
    Global {
        name: String,
        mutable: bool,
        init: NodeId,
    },
    /// Function declaration; with `variadic` the last parameter collects
    /// the remaining arguments into an array
    FunctionDecl {
        name: String,
        params: Vec<String>,
        variadic: bool,
        body: NodeId,
    },
    /// Scoped statement sequence with an optional value. A labeled block can
    /// be left early with `break 'label value`.
    Block {
        label: Option<String>,
        stmts: Vec<NodeId>,
        tail: Option<NodeId>,
    },
    Let {
        name: String,
        mutable: bool,
        init: NodeId,
    },
    /// `target op= value`; target is a Variable or Index node
    Assign {
        target: NodeId,
        op: Option<BinaryOp>,
        value: NodeId,
    },
    ExprStmt { expr: NodeId },
    If {
        condition: NodeId,
        then_branch: NodeId,
        else_branch: Option<NodeId>,
    },
    /// Counted loop `for induction in start..end step step`. Bounds and step
    /// are evaluated once; the induction variable is bound afresh for every
    /// iteration.
    Loop {
        label: Option<String>,
        induction: String,
        start: NodeId,
        end: NodeId,
        step: NodeId,
        body: NodeId,
    },
    Return { value: Option<NodeId> },
    Break {
        label: Option<String>,
        value: Option<NodeId>,
    },
    Continue { label: Option<String> },
    /// Placeholder left where a statement was removed
    Nop,
    Literal(Literal),
    Variable { name: String },
    Unary { op: UnaryOp, operand: NodeId },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    Call { callee: String, args: Vec<NodeId> },
    Index { base: NodeId, index: NodeId },
    Array { elements: Vec<NodeId> },
    /// Closure capturing its environment by reference
    Closure { params: Vec<String>, body: NodeId },
    /// Value placeholder that fails when evaluated
    Trap { reason: String },
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Module { .. } => NodeKind::Module,
            Node::Global { .. } => NodeKind::Declaration,
            Node::FunctionDecl { .. } => NodeKind::FunctionDecl,
            Node::Block { .. } => NodeKind::Block,
            Node::Loop { .. } => NodeKind::Loop,
            Node::Call { .. } => NodeKind::CallExpr,
            Node::Let { .. }
            | Node::Assign { .. }
            | Node::ExprStmt { .. }
            | Node::If { .. }
            | Node::Return { .. }
            | Node::Break { .. }
            | Node::Continue { .. }
            | Node::Nop => NodeKind::Statement,
            Node::Literal(_)
            | Node::Variable { .. }
            | Node::Unary { .. }
            | Node::Binary { .. }
            | Node::Index { .. }
            | Node::Array { .. }
            | Node::Closure { .. }
            | Node::Trap { .. } => NodeKind::Expression,
        }
    }

    /// Nodes that may appear in a statement list
    pub fn is_statement(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::Statement | NodeKind::Loop | NodeKind::Block
        )
    }

    /// Nodes that produce a value
    pub fn is_expression(&self) -> bool {
        matches!(
            self.kind(),
            NodeKind::Expression | NodeKind::CallExpr | NodeKind::Block
        )
    }

    /// Child handles in source (and evaluation) order
    pub fn children(&self) -> Vec<NodeId> {
        let mut children = Vec::new();
        match self {
            Node::Module { items } => children.extend(items),
            Node::Global { init, .. } | Node::Let { init, .. } => children.push(*init),
            Node::FunctionDecl { body, .. } | Node::Closure { body, .. } => children.push(*body),
            Node::Block { stmts, tail, .. } => {
                children.extend(stmts);
                children.extend(tail);
            }
            Node::Assign { target, value, .. } => {
                children.push(*target);
                children.push(*value);
            }
            Node::ExprStmt { expr } => children.push(*expr),
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => {
                children.push(*condition);
                children.push(*then_branch);
                children.extend(else_branch);
            }
            Node::Loop {
                start,
                end,
                step,
                body,
                ..
            } => {
                children.extend([*start, *end, *step, *body]);
            }
            Node::Return { value } | Node::Break { value, .. } => children.extend(value),
            Node::Unary { operand, .. } => children.push(*operand),
            Node::Binary { lhs, rhs, .. } => {
                children.push(*lhs);
                children.push(*rhs);
            }
            Node::Call { args, .. } => children.extend(args),
            Node::Index { base, index } => {
                children.push(*base);
                children.push(*index);
            }
            Node::Array { elements } => children.extend(elements),
            Node::Continue { .. }
            | Node::Nop
            | Node::Literal(_)
            | Node::Variable { .. }
            | Node::Trap { .. } => {}
        }
        children
    }

    /// Copy of this node with every child handle passed through `f`
    pub fn map_children(&self, f: &mut impl FnMut(NodeId) -> NodeId) -> Node {
        match self {
            Node::Module { items } => Node::Module {
                items: items.iter().map(|id| f(*id)).collect(),
            },
            Node::Global {
                name,
                mutable,
                init,
            } => Node::Global {
                name: name.clone(),
                mutable: *mutable,
                init: f(*init),
            },
            Node::FunctionDecl {
                name,
                params,
                variadic,
                body,
            } => Node::FunctionDecl {
                name: name.clone(),
                params: params.clone(),
                variadic: *variadic,
                body: f(*body),
            },
            Node::Block { label, stmts, tail } => Node::Block {
                label: label.clone(),
                stmts: stmts.iter().map(|id| f(*id)).collect(),
                tail: tail.map(&mut *f),
            },
            Node::Let {
                name,
                mutable,
                init,
            } => Node::Let {
                name: name.clone(),
                mutable: *mutable,
                init: f(*init),
            },
            Node::Assign { target, op, value } => Node::Assign {
                target: f(*target),
                op: *op,
                value: f(*value),
            },
            Node::ExprStmt { expr } => Node::ExprStmt { expr: f(*expr) },
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => Node::If {
                condition: f(*condition),
                then_branch: f(*then_branch),
                else_branch: else_branch.map(&mut *f),
            },
            Node::Loop {
                label,
                induction,
                start,
                end,
                step,
                body,
            } => Node::Loop {
                label: label.clone(),
                induction: induction.clone(),
                start: f(*start),
                end: f(*end),
                step: f(*step),
                body: f(*body),
            },
            Node::Return { value } => Node::Return {
                value: value.map(&mut *f),
            },
            Node::Break { label, value } => Node::Break {
                label: label.clone(),
                value: value.map(&mut *f),
            },
            Node::Unary { op, operand } => Node::Unary {
                op: *op,
                operand: f(*operand),
            },
            Node::Binary { op, lhs, rhs } => Node::Binary {
                op: *op,
                lhs: f(*lhs),
                rhs: f(*rhs),
            },
            Node::Call { callee, args } => Node::Call {
                callee: callee.clone(),
                args: args.iter().map(|id| f(*id)).collect(),
            },
            Node::Index { base, index } => Node::Index {
                base: f(*base),
                index: f(*index),
            },
            Node::Array { elements } => Node::Array {
                elements: elements.iter().map(|id| f(*id)).collect(),
            },
            Node::Closure { params, body } => Node::Closure {
                params: params.clone(),
                body: f(*body),
            },
            Node::Continue { .. }
            | Node::Nop
            | Node::Literal(_)
            | Node::Variable { .. }
            | Node::Trap { .. } => self.clone(),
        }
    }

    pub fn int(value: i64) -> Node {
        Node::Literal(Literal::Int(value))
    }

    pub fn var(name: impl Into<String>) -> Node {
        Node::Variable { name: name.into() }
    }
}

/// Handle allocator shared by a unit's tree and every fragment extracted from
/// it, so fragments rewritten on different threads never hand out the same id
#[derive(Debug, Clone)]
struct IdAllocator {
    next: Arc<AtomicU32>,
}

impl IdAllocator {
    fn new() -> Self {
        Self {
            next: Arc::new(AtomicU32::new(1)),
        }
    }

    fn allocate(&self) -> Result<NodeId> {
        let value = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current < u32::MAX).then_some(current + 1)
            })
            .map_err(|_| Error::GraphNodeIdOverflow)?;
        NodeId::new(value).ok_or(Error::GraphNodeIdOverflow)
    }

    fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Child → parent lookup, kept apart from the nodes themselves
#[derive(Debug, Clone, Default)]
pub struct ParentIndex {
    parents: FxHashMap<NodeId, NodeId>,
}

impl ParentIndex {
    pub fn get(&self, child: NodeId) -> Option<NodeId> {
        self.parents.get(&child).copied()
    }

    fn adopt(&mut self, parent: NodeId, node: &Node) {
        for child in node.children() {
            self.parents.insert(child, parent);
        }
    }

    fn remove(&mut self, child: NodeId) {
        self.parents.remove(&child);
    }
}

/// Syntax tree of one compilation unit (or of one function fragment)
///
/// # Invariants
/// - Every reachable node is reachable exactly once (the structure is a tree)
/// - NodeIds are never reused, even after pruning
/// - `parents` agrees with the child lists of every reachable node
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    nodes: AstHashMap<NodeId, Node>,
    pub root: Option<NodeId>,
    spans: AstHashMap<NodeId, Span>,
    /// Copy provenance: copied node → the original it was derived from
    origins: AstHashMap<NodeId, NodeId>,
    marks: AstHashMap<NodeId, Transform>,
    parents: ParentIndex,
    ids: IdAllocator,
    next_name: u32,
}

impl Default for SyntaxTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntaxTree {
    pub fn new() -> Self {
        Self {
            nodes: AstHashMap::default(),
            root: None,
            spans: AstHashMap::default(),
            origins: AstHashMap::default(),
            marks: AstHashMap::default(),
            parents: ParentIndex::default(),
            ids: IdAllocator::new(),
            next_name: 1,
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        let id = self.ids.allocate()?;
        self.parents.adopt(id, &node);
        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn add_node_with_span(&mut self, node: Node, span: Option<Span>) -> Result<NodeId> {
        let id = self.add_node(node)?;
        if let Some(span) = span {
            self.spans.insert(id, span);
        }
        Ok(id)
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Like [`get_node`](Self::get_node) but a missing node is an error
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(Error::MissingNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn span(&self, id: NodeId) -> Option<Span> {
        self.spans.get(&id).copied()
    }

    pub fn set_span(&mut self, id: NodeId, span: Span) {
        self.spans.insert(id, span);
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id)
    }

    /// The original node `id` was copied from, or `id` itself
    pub fn origin(&self, id: NodeId) -> NodeId {
        self.origins.get(&id).copied().unwrap_or(id)
    }

    /// Record that `copy` was derived from `source`
    pub fn record_copy(&mut self, copy: NodeId, source: NodeId) {
        let original = self.origin(source);
        self.origins.insert(copy, original);
    }

    /// Record provenance coming from another tree (a frozen snapshot)
    pub fn record_foreign_copy(&mut self, copy: NodeId, original: NodeId) {
        self.origins.insert(copy, original);
    }

    pub fn mark(&mut self, id: NodeId, transform: Transform) {
        self.marks.insert(id, transform);
    }

    pub fn mark_of(&self, id: NodeId) -> Option<Transform> {
        self.marks.get(&id).copied()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get_node(id).map(Node::children).unwrap_or_default()
    }

    /// Swap `replacement` into the slot currently holding `old`. The old
    /// subtree is left untouched in the arena until [`prune`](Self::prune).
    pub fn replace(&mut self, old: NodeId, replacement: NodeId) -> Result<()> {
        if old == replacement {
            return Ok(());
        }
        match self.parents.get(old) {
            Some(parent) => {
                let node = self.node(parent)?;
                let mut found = false;
                let updated = node.map_children(&mut |child| {
                    if child == old {
                        found = true;
                        replacement
                    } else {
                        child
                    }
                });
                if !found {
                    return Err(Error::invariant(format!(
                        "parent index says {} owns {}, but it does not",
                        parent, old
                    )));
                }
                self.nodes.insert(parent, updated);
                self.parents.remove(old);
                self.parents.parents.insert(replacement, parent);
                Ok(())
            }
            None if self.root == Some(old) => {
                self.root = Some(replacement);
                self.parents.remove(replacement);
                Ok(())
            }
            None => Err(Error::invariant(format!("{} has no parent slot", old))),
        }
    }

    /// Pre-order traversal, iterative to avoid stack overflow on deep trees
    pub fn preorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = AstHashSet::default();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.get_node(id) {
                order.push(id);
                // Push children in reverse order for correct DFS order
                for child in node.children().into_iter().rev() {
                    stack.push(child);
                }
            }
        }
        order
    }

    /// Post-order traversal (children before parents)
    pub fn postorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited = AstHashSet::default();
        let mut stack = vec![(start, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.get_node(id) {
                stack.push((id, true));
                for child in node.children().into_iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    /// Nodes reachable from the root
    pub fn reachable(&self) -> AstHashSet<NodeId> {
        self.root
            .map(|root| self.preorder(root).into_iter().collect())
            .unwrap_or_default()
    }

    /// Ancestors of `id`, nearest first
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.parent(parent);
        }
        chain
    }

    /// Nesting depth of `id` below the root
    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors(id).len()
    }

    pub fn enclosing_function(&self, id: NodeId) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|candidate| matches!(self.get_node(*candidate), Some(Node::FunctionDecl { .. })))
    }

    /// Function declarations of the module, in declaration order
    pub fn functions(&self) -> Vec<NodeId> {
        match self.root.and_then(|root| self.get_node(root)) {
            Some(Node::Module { items }) => items
                .iter()
                .copied()
                .filter(|id| matches!(self.get_node(*id), Some(Node::FunctionDecl { .. })))
                .collect(),
            Some(Node::FunctionDecl { .. }) => self.root.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn function_named(&self, name: &str) -> Option<NodeId> {
        self.functions().into_iter().find(|id| {
            matches!(self.get_node(*id), Some(Node::FunctionDecl { name: n, .. }) if n == name)
        })
    }

    /// Reachable nodes that are `target` itself or copies of it, pre-order
    pub fn instances_of(&self, target: NodeId) -> Vec<NodeId> {
        match self.root {
            Some(root) => self
                .preorder(root)
                .into_iter()
                .filter(|id| *id == target || self.origin(*id) == target)
                .collect(),
            None => Vec::new(),
        }
    }

    /// A binding or label name that does not occur in this tree.
    /// Generated names use the reserved `base__N` form.
    pub fn fresh_name(&mut self, base: &str) -> String {
        let stem = strip_generated_suffix(base);
        let name = format!("{}__{}", stem, self.next_name);
        self.next_name += 1;
        name
    }

    /// Move the fresh-name counter past every generated name in the tree, so
    /// re-running over optimized output never reissues a name
    pub fn seed_fresh_names(&mut self) {
        let highest = self
            .nodes
            .values()
            .flat_map(names_in)
            .filter_map(|name| generated_suffix(&name))
            .max()
            .unwrap_or(0);
        self.next_name = self.next_name.max(highest + 1);
    }

    /// Copy the subtree rooted at `function` into a fragment that shares this
    /// tree's handle allocator
    pub fn extract(&self, function: NodeId) -> Result<SyntaxTree> {
        if !matches!(self.get_node(function), Some(Node::FunctionDecl { .. })) {
            return Err(Error::invariant(format!(
                "cannot extract {}: not a function declaration",
                function
            )));
        }
        let mut fragment = SyntaxTree {
            nodes: AstHashMap::default(),
            root: Some(function),
            spans: AstHashMap::default(),
            origins: AstHashMap::default(),
            marks: AstHashMap::default(),
            parents: ParentIndex::default(),
            ids: self.ids.clone(),
            next_name: 1,
        };
        for id in self.preorder(function) {
            let node = self.node(id)?.clone();
            fragment.parents.adopt(id, &node);
            fragment.nodes.insert(id, node);
            if let Some(span) = self.spans.get(&id) {
                fragment.spans.insert(id, *span);
            }
            if let Some(origin) = self.origins.get(&id) {
                fragment.origins.insert(id, *origin);
            }
            if let Some(mark) = self.marks.get(&id) {
                fragment.marks.insert(id, *mark);
            }
        }
        fragment.seed_fresh_names();
        Ok(fragment)
    }

    /// Take a rewritten fragment back. Its root must be a function that still
    /// sits in this tree.
    pub fn absorb(&mut self, fragment: SyntaxTree) -> Result<()> {
        let root = fragment
            .root
            .ok_or_else(|| Error::invariant("fragment without a root"))?;
        if !self.nodes.contains_key(&root) || self.parents.get(root).is_none() {
            return Err(Error::invariant(format!(
                "fragment root {} is not part of the unit",
                root
            )));
        }
        // Nodes a rewrite swapped out still sit in the fragment's arena and
        // may list children that now live elsewhere. Only the live ones count.
        let live = fragment.preorder(root);
        let SyntaxTree {
            mut nodes,
            spans,
            origins,
            marks,
            next_name,
            ..
        } = fragment;
        for id in live {
            if let Some(node) = nodes.remove(&id) {
                self.parents.adopt(id, &node);
                self.nodes.insert(id, node);
            }
        }
        self.spans.extend(spans);
        self.origins.extend(origins);
        self.marks.extend(marks);
        self.next_name = self.next_name.max(next_name);
        Ok(())
    }

    /// Drop every node that is no longer reachable from the root
    pub fn prune(&mut self) -> usize {
        let reachable = self.reachable();
        let before = self.nodes.len();
        self.nodes.retain(|id, _| reachable.contains(id));
        self.spans.retain(|id, _| reachable.contains(id));
        self.origins.retain(|id, _| reachable.contains(id));
        self.marks.retain(|id, _| reachable.contains(id));
        self.parents.parents.retain(|id, _| reachable.contains(id));
        before - self.nodes.len()
    }

    /// Check the structural invariants an emitter relies on
    pub fn validate(&self) -> Result<()> {
        let root = match self.root {
            Some(root) => root,
            None => return Ok(()),
        };
        if !self.nodes.contains_key(&root) {
            return Err(Error::Other(anyhow::anyhow!(
                "Root node {} does not exist in tree",
                root
            )));
        }
        if self.ids.peek() == 0 {
            return Err(Error::invariant("handle allocator wrapped around"));
        }
        let mut checker = Validator {
            tree: self,
            seen: AstHashSet::default(),
            scopes: Vec::new(),
        };
        checker.visit(root, None)
    }
}

fn generated_suffix(name: &str) -> Option<u32> {
    let (_, suffix) = name.rsplit_once("__")?;
    suffix.parse().ok()
}

fn strip_generated_suffix(name: &str) -> &str {
    match name.rsplit_once("__") {
        Some((stem, suffix)) if suffix.parse::<u32>().is_ok() && !stem.is_empty() => stem,
        _ => name,
    }
}

/// Binding, label and reference names carried by a node
fn names_in(node: &Node) -> Vec<String> {
    match node {
        Node::Global { name, .. } | Node::Let { name, .. } | Node::Variable { name } => {
            vec![name.clone()]
        }
        Node::FunctionDecl { params, .. } | Node::Closure { params, .. } => params.clone(),
        Node::Block {
            label: Some(label), ..
        } => vec![label.clone()],
        Node::Loop {
            label, induction, ..
        } => label.iter().cloned().chain([induction.clone()]).collect(),
        _ => Vec::new(),
    }
}

/// What a break/continue may target while validating
#[derive(Debug, Clone)]
enum Scope {
    Loop(Option<String>),
    Block(String),
    /// Function or closure boundary; control transfers cannot cross it
    Barrier,
}

/// Slot a child occupies, for kind checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Item,
    Body,
    Statement,
    Value,
    Target,
}

struct Validator<'a> {
    tree: &'a SyntaxTree,
    seen: AstHashSet<NodeId>,
    scopes: Vec<Scope>,
}

impl Validator<'_> {
    fn visit(&mut self, id: NodeId, slot: Option<Slot>) -> Result<()> {
        if !self.seen.insert(id) {
            return Err(Error::invariant(format!("{} is reachable twice", id)));
        }
        let node = self.tree.node(id)?;
        for child in node.children() {
            if self.tree.parent(child) != Some(id) {
                return Err(Error::invariant(format!(
                    "parent index of {} does not point at {}",
                    child, id
                )));
            }
        }
        if let Some(slot) = slot {
            let fits = match slot {
                Slot::Item => matches!(node, Node::FunctionDecl { .. } | Node::Global { .. }),
                Slot::Body => matches!(node, Node::Block { .. }),
                Slot::Statement => node.is_statement(),
                Slot::Value => node.is_expression(),
                Slot::Target => matches!(node, Node::Variable { .. } | Node::Index { .. }),
            };
            if !fits {
                return Err(Error::invariant(format!(
                    "{} ({}) cannot occupy a {:?} slot",
                    id,
                    node.kind(),
                    slot
                )));
            }
        }
        match node {
            Node::Module { items } => {
                for item in items {
                    self.visit(*item, Some(Slot::Item))?;
                }
            }
            Node::Global { init, .. } => self.visit(*init, Some(Slot::Value))?,
            Node::FunctionDecl { body, .. } => {
                self.scopes.push(Scope::Barrier);
                self.visit(*body, Some(Slot::Body))?;
                self.scopes.pop();
            }
            Node::Closure { body, .. } => {
                self.scopes.push(Scope::Barrier);
                self.visit(*body, Some(Slot::Value))?;
                self.scopes.pop();
            }
            Node::Block { label, stmts, tail } => {
                if let Some(label) = label {
                    self.scopes.push(Scope::Block(label.clone()));
                }
                for stmt in stmts {
                    self.visit(*stmt, Some(Slot::Statement))?;
                }
                if let Some(tail) = tail {
                    self.visit(*tail, Some(Slot::Value))?;
                }
                if label.is_some() {
                    self.scopes.pop();
                }
            }
            Node::Loop {
                label,
                start,
                end,
                step,
                body,
                ..
            } => {
                for bound in [start, end, step] {
                    self.visit(*bound, Some(Slot::Value))?;
                }
                self.scopes.push(Scope::Loop(label.clone()));
                self.visit(*body, Some(Slot::Body))?;
                self.scopes.pop();
            }
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.visit(*condition, Some(Slot::Value))?;
                self.visit(*then_branch, Some(Slot::Body))?;
                if let Some(else_branch) = else_branch {
                    self.visit(*else_branch, Some(Slot::Body))?;
                }
            }
            Node::Assign { target, value, .. } => {
                self.visit(*target, Some(Slot::Target))?;
                self.visit(*value, Some(Slot::Value))?;
            }
            Node::Break { label, value } => {
                self.check_break(id, label.as_deref(), value.is_some())?;
                if let Some(value) = value {
                    self.visit(*value, Some(Slot::Value))?;
                }
            }
            Node::Continue { label } => self.check_continue(id, label.as_deref())?,
            other => {
                for child in other.children() {
                    self.visit(child, Some(Slot::Value))?;
                }
            }
        }
        Ok(())
    }

    fn reachable_scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes
            .iter()
            .rev()
            .take_while(|scope| !matches!(scope, Scope::Barrier))
    }

    fn check_break(&self, id: NodeId, label: Option<&str>, has_value: bool) -> Result<()> {
        let target = self.reachable_scopes().find(|scope| match (scope, label) {
            (Scope::Loop(_), None) => true,
            (Scope::Loop(Some(l)), Some(wanted)) | (Scope::Block(l), Some(wanted)) => l == wanted,
            _ => false,
        });
        match target {
            Some(Scope::Loop(_)) if has_value => Err(Error::invariant(format!(
                "{} breaks out of a loop with a value",
                id
            ))),
            Some(_) => Ok(()),
            None => Err(Error::invariant(format!(
                "{} has no enclosing target for break{}",
                id,
                label.map(|l| format!(" '{}", l)).unwrap_or_default()
            ))),
        }
    }

    fn check_continue(&self, id: NodeId, label: Option<&str>) -> Result<()> {
        let found = self.reachable_scopes().any(|scope| match (scope, label) {
            (Scope::Loop(_), None) => true,
            (Scope::Loop(Some(l)), Some(wanted)) => l == wanted,
            _ => false,
        });
        if found {
            Ok(())
        } else {
            Err(Error::invariant(format!(
                "{} has no enclosing loop to continue",
                id
            )))
        }
    }
}

#[cfg(test)]
#[path = "ast_tests.rs"]
mod tests;
