//! Read-only queries over syntax trees used by the applicability checks

use annotopt_core::ast::{BinaryOp, Literal, Node, NodeId, SyntaxTree, UnaryOp};
use rustc_hash::{FxHashSet, FxHasher};
use std::hash::{Hash, Hasher};

use crate::oracle::BodyShape;

/// Number of nodes in the subtree
pub fn node_size(tree: &SyntaxTree, id: NodeId) -> usize {
    tree.preorder(id).len()
}

/// Call expressions in the subtree, pre-order
pub fn calls_in(tree: &SyntaxTree, id: NodeId) -> Vec<(NodeId, String)> {
    tree.preorder(id)
        .into_iter()
        .filter_map(|node| match tree.get_node(node) {
            Some(Node::Call { callee, .. }) => Some((node, callee.clone())),
            _ => None,
        })
        .collect()
}

/// Integer value of a closed constant expression
pub fn static_int(tree: &SyntaxTree, id: NodeId) -> Option<i64> {
    match tree.get_node(id)? {
        Node::Literal(Literal::Int(n)) => Some(*n),
        Node::Unary {
            op: UnaryOp::Neg,
            operand,
        } => static_int(tree, *operand)?.checked_neg(),
        Node::Binary { op, lhs, rhs } => {
            let (a, b) = (static_int(tree, *lhs)?, static_int(tree, *rhs)?);
            match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Iterations of `for _ in start..end step step`; `None` for a non-positive
/// step
pub fn trip_count(start: i64, end: i64, step: i64) -> Option<u64> {
    if step <= 0 {
        return None;
    }
    if end <= start {
        return Some(0);
    }
    let span = (end as i128) - (start as i128);
    let step = step as i128;
    u64::try_from((span + step - 1) / step).ok()
}

/// Trip count of a loop whose bounds and step are all constant
pub fn static_trip_count(tree: &SyntaxTree, loop_id: NodeId) -> Option<u64> {
    match tree.get_node(loop_id)? {
        Node::Loop {
            start, end, step, ..
        } => trip_count(
            static_int(tree, *start)?,
            static_int(tree, *end)?,
            static_int(tree, *step)?,
        ),
        _ => None,
    }
}

/// Whether any assignment in the subtree writes the variable `name`
pub fn is_assigned(tree: &SyntaxTree, root: NodeId, name: &str) -> bool {
    tree.preorder(root).into_iter().any(|id| match tree.get_node(id) {
        Some(Node::Assign { target, .. }) => {
            matches!(tree.get_node(*target), Some(Node::Variable { name: n }) if n == name)
        }
        _ => false,
    })
}

/// Whether `id` is the target slot of an assignment
pub fn is_assignment_target(tree: &SyntaxTree, id: NodeId) -> bool {
    match tree.parent(id).and_then(|parent| tree.get_node(parent)) {
        Some(Node::Assign { target, .. }) => *target == id,
        _ => false,
    }
}

/// Whether `id` is still reachable from the root through real child slots
pub fn is_attached(tree: &SyntaxTree, id: NodeId) -> bool {
    let mut current = id;
    loop {
        if tree.root == Some(current) {
            return true;
        }
        match tree.parent(current) {
            Some(parent) if tree.children(parent).contains(&current) => current = parent,
            _ => return false,
        }
    }
}

/// Control transfers inside a loop body that leave or restart that loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopControl {
    pub breaks: Vec<NodeId>,
    pub continues: Vec<NodeId>,
}

impl LoopControl {
    pub fn is_empty(&self) -> bool {
        self.breaks.is_empty() && self.continues.is_empty()
    }
}

pub fn loop_control(tree: &SyntaxTree, loop_id: NodeId) -> LoopControl {
    let mut control = LoopControl::default();
    if let Some(Node::Loop { label, body, .. }) = tree.get_node(loop_id) {
        collect_control(tree, *body, label.as_deref(), 0, false, &mut control);
    }
    control
}

fn collect_control(
    tree: &SyntaxTree,
    id: NodeId,
    label: Option<&str>,
    nested_loops: usize,
    shadowed: bool,
    out: &mut LoopControl,
) {
    let node = match tree.get_node(id) {
        Some(node) => node,
        None => return,
    };
    let targets_us = |wanted: &Option<String>| match wanted {
        None => nested_loops == 0,
        Some(wanted) => !shadowed && Some(wanted.as_str()) == label,
    };
    match node {
        Node::Break { label: wanted, value } => {
            if targets_us(wanted) {
                out.breaks.push(id);
            }
            if let Some(value) = value {
                collect_control(tree, *value, label, nested_loops, shadowed, out);
            }
        }
        Node::Continue { label: wanted } => {
            if targets_us(wanted) {
                out.continues.push(id);
            }
        }
        Node::Loop {
            label: inner,
            start,
            end,
            step,
            body,
            ..
        } => {
            for bound in [start, end, step] {
                collect_control(tree, *bound, label, nested_loops, shadowed, out);
            }
            let hides = shadowed || (inner.is_some() && inner.as_deref() == label);
            collect_control(tree, *body, label, nested_loops + 1, hides, out);
        }
        Node::Block { label: inner, .. } => {
            let hides = shadowed || (inner.is_some() && inner.as_deref() == label);
            for child in node.children() {
                collect_control(tree, child, label, nested_loops, hides, out);
            }
        }
        // Transfers never cross a closure boundary
        Node::Closure { .. } | Node::FunctionDecl { .. } => {}
        other => {
            for child in other.children() {
                collect_control(tree, child, label, nested_loops, shadowed, out);
            }
        }
    }
}

/// `return` statements of the subtree that belong to the enclosing function
pub fn returns_in(tree: &SyntaxTree, id: NodeId) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        match tree.get_node(current) {
            Some(Node::Return { value }) => {
                found.push(current);
                stack.extend(value);
            }
            Some(Node::Closure { .. }) => {}
            Some(node) => stack.extend(node.children().into_iter().rev()),
            None => {}
        }
    }
    found
}

/// Every name the subtree binds: lets, loop inductions, parameters
pub fn bound_names(tree: &SyntaxTree, id: NodeId) -> FxHashSet<String> {
    let mut names = FxHashSet::default();
    for node in tree.preorder(id) {
        match tree.get_node(node) {
            Some(Node::Let { name, .. }) => {
                names.insert(name.clone());
            }
            Some(Node::Loop { induction, .. }) => {
                names.insert(induction.clone());
            }
            Some(Node::Closure { params, .. }) | Some(Node::FunctionDecl { params, .. }) => {
                names.extend(params.iter().cloned());
            }
            _ => {}
        }
    }
    names
}

/// Local names in scope at `id`, up to the enclosing function
pub fn visible_bindings(tree: &SyntaxTree, id: NodeId) -> FxHashSet<String> {
    let mut names = FxHashSet::default();
    let mut child = id;
    for ancestor in tree.ancestors(id) {
        match tree.get_node(ancestor) {
            Some(Node::Block { stmts, .. }) => {
                for stmt in stmts.iter().take_while(|stmt| **stmt != child) {
                    if let Some(Node::Let { name, .. }) = tree.get_node(*stmt) {
                        names.insert(name.clone());
                    }
                }
            }
            Some(Node::Loop {
                induction, body, ..
            }) if *body == child => {
                names.insert(induction.clone());
            }
            Some(Node::Closure { params, .. }) => names.extend(params.iter().cloned()),
            Some(Node::FunctionDecl { params, .. }) => {
                names.extend(params.iter().cloned());
                break;
            }
            _ => {}
        }
        child = ancestor;
    }
    names
}

/// Variables the subtree reads or writes without binding them itself
pub fn free_variables(tree: &SyntaxTree, id: NodeId) -> FxHashSet<String> {
    let mut walker = FreeVariables {
        tree,
        scopes: vec![FxHashSet::default()],
        free: FxHashSet::default(),
    };
    walker.visit(id);
    walker.free
}

struct FreeVariables<'a> {
    tree: &'a SyntaxTree,
    scopes: Vec<FxHashSet<String>>,
    free: FxHashSet<String>,
}

impl FreeVariables<'_> {
    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn within(&mut self, names: impl IntoIterator<Item = String>, body: NodeId) {
        self.scopes.push(names.into_iter().collect());
        self.visit(body);
        self.scopes.pop();
    }

    fn visit(&mut self, id: NodeId) {
        let tree = self.tree;
        let node = match tree.get_node(id) {
            Some(node) => node,
            None => return,
        };
        match node {
            Node::Variable { name } => {
                if !self.is_bound(name) {
                    self.free.insert(name.clone());
                }
            }
            Node::Block { stmts, tail, .. } => {
                self.scopes.push(FxHashSet::default());
                for stmt in stmts {
                    self.visit(*stmt);
                }
                if let Some(tail) = tail {
                    self.visit(*tail);
                }
                self.scopes.pop();
            }
            Node::Let { name, init, .. } => {
                self.visit(*init);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone());
                }
            }
            Node::Loop {
                induction,
                start,
                end,
                step,
                body,
                ..
            } => {
                for bound in [start, end, step] {
                    self.visit(*bound);
                }
                self.within([induction.clone()], *body);
            }
            Node::Closure { params, body } | Node::FunctionDecl { params, body, .. } => {
                self.within(params.iter().cloned(), *body);
            }
            other => {
                for child in other.children() {
                    self.visit(child);
                }
            }
        }
    }
}

/// Whether some closure in the function captures a binding that is written
/// anywhere in the function, or a mutable global
pub fn has_mutable_capture(
    tree: &SyntaxTree,
    function: NodeId,
    mutable_globals: &FxHashSet<String>,
) -> bool {
    tree.preorder(function).into_iter().any(|id| {
        matches!(tree.get_node(id), Some(Node::Closure { .. }))
            && free_variables(tree, id).iter().any(|name| {
                mutable_globals.contains(name) || is_assigned(tree, function, name)
            })
    })
}

/// Hash of the subtree's structure; equal for structurally equal trees no
/// matter which handles they use
pub fn structural_hash(tree: &SyntaxTree, id: NodeId) -> u64 {
    let mut hasher = FxHasher::default();
    for node_id in tree.preorder(id) {
        let node = match tree.get_node(node_id) {
            Some(node) => node,
            None => continue,
        };
        std::mem::discriminant(node).hash(&mut hasher);
        node.children().len().hash(&mut hasher);
        match node {
            Node::Global { name, mutable, .. } | Node::Let { name, mutable, .. } => {
                name.hash(&mut hasher);
                mutable.hash(&mut hasher);
            }
            Node::FunctionDecl {
                name,
                params,
                variadic,
                ..
            } => {
                name.hash(&mut hasher);
                params.hash(&mut hasher);
                variadic.hash(&mut hasher);
            }
            Node::Block { label, tail, .. } => {
                label.hash(&mut hasher);
                tail.is_some().hash(&mut hasher);
            }
            Node::Assign { op, .. } => op.hash(&mut hasher),
            Node::Loop {
                label, induction, ..
            } => {
                label.hash(&mut hasher);
                induction.hash(&mut hasher);
            }
            Node::Break { label, .. } | Node::Continue { label } => label.hash(&mut hasher),
            Node::Literal(literal) => literal.hash(&mut hasher),
            Node::Variable { name } => name.hash(&mut hasher),
            Node::Unary { op, .. } => op.hash(&mut hasher),
            Node::Binary { op, .. } => op.hash(&mut hasher),
            Node::Call { callee, .. } => callee.hash(&mut hasher),
            Node::Closure { params, .. } => params.hash(&mut hasher),
            Node::Trap { reason } => reason.hash(&mut hasher),
            Node::If { else_branch, .. } => else_branch.is_some().hash(&mut hasher),
            Node::Return { value } => value.is_some().hash(&mut hasher),
            _ => {}
        }
    }
    hasher.finish()
}

/// Shape summary handed to the compiler oracle
pub fn body_shape(tree: &SyntaxTree, function: NodeId) -> BodyShape {
    let body = match tree.get_node(function) {
        Some(Node::FunctionDecl { body, .. }) => *body,
        _ => function,
    };
    let mut shape = BodyShape {
        structural_hash: structural_hash(tree, body),
        ..BodyShape::default()
    };
    for id in tree.preorder(body) {
        shape.node_count += 1;
        match tree.get_node(id) {
            Some(Node::Loop { .. }) => shape.loops += 1,
            Some(Node::Call { .. }) => shape.calls += 1,
            Some(Node::Return { .. }) => shape.returns += 1,
            Some(Node::Closure { .. }) => shape.closures += 1,
            _ => {}
        }
    }
    shape
}

#[cfg(test)]
#[path = "analysis_tests.rs"]
mod tests;
