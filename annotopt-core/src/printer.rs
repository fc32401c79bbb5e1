//! Debug emitter
//!
//! Renders a tree in a small Rust-like surface syntax. The same layout pass is
//! used by the builder to assign source spans and to place annotation
//! comments, so positions reported by the scanner refer to this text.

use crate::ast::{Node, NodeId, SyntaxTree};
use crate::error::{Error, Result};
use crate::source::{MetadataEntry, Span};
use rustc_hash::FxHashMap;
use std::fmt::Write as _;

const INDENT: &str = "    ";

/// Comments to place around nodes while laying out
#[derive(Debug, Clone, Default)]
pub struct Notes {
    /// Own lines before a statement, tail or module item
    pub before: FxHashMap<NodeId, Vec<String>>,
    /// Same line, after a statement
    pub trailing: FxHashMap<NodeId, Vec<String>>,
    /// Own lines before the closing brace of a block (or the end of the module)
    pub block_end: FxHashMap<NodeId, Vec<String>>,
    /// `/* ... */` right before an expression
    pub inline: FxHashMap<NodeId, Vec<String>>,
    /// `///` lines above a function; they form its leading block
    pub docs: FxHashMap<NodeId, Vec<String>>,
}

impl Notes {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.trailing.is_empty()
            && self.block_end.is_empty()
            && self.inline.is_empty()
            && self.docs.is_empty()
    }
}

/// Text plus everything recorded while producing it
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub text: String,
    pub spans: FxHashMap<NodeId, Span>,
    pub metadata: Vec<MetadataEntry>,
    pub leading_blocks: FxHashMap<NodeId, Span>,
}

/// Render the tree from its root
pub fn render(tree: &SyntaxTree) -> Result<String> {
    Ok(layout(tree, &Notes::default())?.text)
}

/// Render a single subtree, e.g. one function
pub fn render_node(tree: &SyntaxTree, id: NodeId) -> Result<String> {
    let notes = Notes::default();
    let mut printer = Printer::new(tree, &notes);
    printer.item_or_stmt(id)?;
    Ok(printer.out)
}

/// Lay out the tree, placing `notes` as comments
pub fn layout(tree: &SyntaxTree, notes: &Notes) -> Result<Layout> {
    let mut printer = Printer::new(tree, notes);
    if let Some(root) = tree.root {
        printer.item_or_stmt(root)?;
    }
    Ok(Layout {
        text: printer.out,
        spans: printer.spans,
        metadata: printer.metadata,
        leading_blocks: printer.leading_blocks,
    })
}

struct Printer<'a> {
    tree: &'a SyntaxTree,
    notes: &'a Notes,
    out: String,
    depth: usize,
    spans: FxHashMap<NodeId, Span>,
    metadata: Vec<MetadataEntry>,
    leading_blocks: FxHashMap<NodeId, Span>,
}

impl<'a> Printer<'a> {
    fn new(tree: &'a SyntaxTree, notes: &'a Notes) -> Self {
        Self {
            tree,
            notes,
            out: String::new(),
            depth: 0,
            spans: FxHashMap::default(),
            metadata: Vec::new(),
            leading_blocks: FxHashMap::default(),
        }
    }

    fn offset(&self) -> u32 {
        self.out.len() as u32
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
    }

    fn record(&mut self, id: NodeId, start: u32) {
        let end = self.offset();
        self.spans.insert(id, Span::new(start, end));
    }

    /// `marker` then the note text, recording the text as a metadata entry
    fn note(&mut self, marker: &str, text: &str, closer: &str) -> Span {
        self.out.push_str(marker);
        let start = self.offset();
        self.out.push_str(text);
        let span = Span::new(start, self.offset());
        self.metadata.push(MetadataEntry::new(span, text));
        self.out.push_str(closer);
        span
    }

    fn note_lines(&mut self, lines: Option<&Vec<String>>) {
        for line in lines.into_iter().flatten() {
            self.indent();
            self.note("// ", line, "\n");
        }
    }

    fn item_or_stmt(&mut self, id: NodeId) -> Result<()> {
        let tree = self.tree;
        match tree.node(id)? {
            Node::Module { items } => {
                let notes = self.notes;
                let start = self.offset();
                for item in items {
                    self.note_lines(notes.before.get(item));
                    self.item(*item)?;
                }
                self.note_lines(notes.block_end.get(&id));
                self.record(id, start);
                Ok(())
            }
            Node::FunctionDecl { .. } | Node::Global { .. } => self.item(id),
            _ => {
                self.stmt(id)?;
                Ok(())
            }
        }
    }

    fn item(&mut self, id: NodeId) -> Result<()> {
        let tree = self.tree;
        match tree.node(id)? {
            Node::Global {
                name,
                mutable,
                init,
            } => {
                self.indent();
                let start = self.offset();
                self.out.push_str("global ");
                if *mutable {
                    self.out.push_str("mut ");
                }
                self.out.push_str(name);
                self.out.push_str(" = ");
                self.expr(*init)?;
                self.out.push(';');
                self.record(id, start);
                self.out.push('\n');
            }
            Node::FunctionDecl {
                name,
                params,
                variadic,
                body,
            } => {
                let notes = self.notes;
                if let Some(docs) = notes.docs.get(&id) {
                    let block_start = self.offset();
                    for line in docs {
                        self.indent();
                        self.note("/// ", line, "\n");
                    }
                    let block_end = self.offset().saturating_sub(1);
                    self.leading_blocks
                        .insert(id, Span::new(block_start, block_end));
                }
                self.indent();
                let start = self.offset();
                let _ = write!(self.out, "fn {}(", name);
                for (index, param) in params.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    if *variadic && index + 1 == params.len() {
                        self.out.push_str("...");
                    }
                    self.out.push_str(param);
                }
                self.out.push_str(") ");
                self.block(*body)?;
                self.record(id, start);
                self.out.push('\n');
            }
            other => {
                return Err(Error::invariant(format!(
                    "{} is not a module item",
                    other.kind()
                )))
            }
        }
        Ok(())
    }

    /// One statement line. Returns false when nothing was printed.
    fn stmt(&mut self, id: NodeId) -> Result<bool> {
        let tree = self.tree;
        let node = tree.node(id)?;
        if matches!(node, Node::Nop) {
            return Ok(false);
        }
        self.indent();
        let start = self.offset();
        match node {
            Node::Let {
                name,
                mutable,
                init,
            } => {
                self.out.push_str("let ");
                if *mutable {
                    self.out.push_str("mut ");
                }
                self.out.push_str(name);
                self.out.push_str(" = ");
                self.expr(*init)?;
                self.out.push(';');
            }
            Node::Assign { target, op, value } => {
                self.expr(*target)?;
                match op {
                    Some(op) => {
                        let _ = write!(self.out, " {}= ", op.symbol());
                    }
                    None => self.out.push_str(" = "),
                }
                self.expr(*value)?;
                self.out.push(';');
            }
            Node::ExprStmt { expr } => {
                self.expr(*expr)?;
                self.out.push(';');
            }
            Node::If { .. } | Node::Loop { .. } | Node::Block { .. } => {
                self.expr(id)?;
            }
            Node::Return { value } => {
                self.out.push_str("return");
                if let Some(value) = value {
                    self.out.push(' ');
                    self.expr(*value)?;
                }
                self.out.push(';');
            }
            Node::Break { label, value } => {
                self.out.push_str("break");
                if let Some(label) = label {
                    let _ = write!(self.out, " '{}", label);
                }
                if let Some(value) = value {
                    self.out.push(' ');
                    self.expr(*value)?;
                }
                self.out.push(';');
            }
            Node::Continue { label } => {
                self.out.push_str("continue");
                if let Some(label) = label {
                    let _ = write!(self.out, " '{}", label);
                }
                self.out.push(';');
            }
            _ => {
                self.expr(id)?;
                self.out.push(';');
            }
        }
        if !self.spans.contains_key(&id) {
            self.record(id, start);
        }
        let notes = self.notes;
        if let Some(trailing) = notes.trailing.get(&id) {
            for text in trailing {
                self.note(" // ", text, "");
            }
        }
        self.out.push('\n');
        Ok(true)
    }

    /// `'label: { ... }` spanning several lines; the cursor is already placed
    fn block(&mut self, id: NodeId) -> Result<()> {
        let tree = self.tree;
        let (label, stmts, tail) = match tree.node(id)? {
            Node::Block { label, stmts, tail } => (label, stmts, tail),
            other => {
                return Err(Error::invariant(format!(
                    "expected a block, found {}",
                    other.kind()
                )))
            }
        };
        let notes = self.notes;
        let start = self.offset();
        if let Some(label) = label {
            let _ = write!(self.out, "'{}: ", label);
        }
        self.out.push_str("{\n");
        self.depth += 1;
        for stmt in stmts {
            self.note_lines(notes.before.get(stmt));
            self.stmt(*stmt)?;
        }
        if let Some(tail) = tail {
            self.note_lines(notes.before.get(tail));
            self.indent();
            self.expr(*tail)?;
            self.out.push('\n');
        }
        self.note_lines(notes.block_end.get(&id));
        self.depth -= 1;
        self.indent();
        self.out.push('}');
        self.record(id, start);
        Ok(())
    }

    fn operand(&mut self, id: NodeId) -> Result<()> {
        if matches!(
            self.tree.get_node(id),
            Some(Node::Binary { .. } | Node::Unary { .. } | Node::Closure { .. })
        ) {
            self.out.push('(');
            self.expr(id)?;
            self.out.push(')');
            Ok(())
        } else {
            self.expr(id)
        }
    }

    fn expr(&mut self, id: NodeId) -> Result<()> {
        let tree = self.tree;
        let notes = self.notes;
        if let Some(inline) = notes.inline.get(&id) {
            for text in inline {
                self.note("/* ", text, " */ ");
            }
        }
        let start = self.offset();
        match tree.node(id)? {
            Node::Literal(literal) => {
                let _ = write!(self.out, "{}", literal);
            }
            Node::Variable { name } => self.out.push_str(name),
            Node::Unary { op, operand } => {
                self.out.push_str(op.symbol());
                self.operand(*operand)?;
            }
            Node::Binary { op, lhs, rhs } => {
                self.operand(*lhs)?;
                let _ = write!(self.out, " {} ", op.symbol());
                self.operand(*rhs)?;
            }
            Node::Call { callee, args } => {
                let _ = write!(self.out, "{}(", callee);
                self.list(args)?;
                self.out.push(')');
            }
            Node::Index { base, index } => {
                self.operand(*base)?;
                self.out.push('[');
                self.expr(*index)?;
                self.out.push(']');
            }
            Node::Array { elements } => {
                self.out.push('[');
                self.list(elements)?;
                self.out.push(']');
            }
            Node::Closure { params, body } => {
                let _ = write!(self.out, "|{}| ", params.join(", "));
                self.expr(*body)?;
            }
            Node::Trap { reason } => {
                let _ = write!(self.out, "trap({:?})", reason);
            }
            Node::Block { .. } => self.block(id)?,
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.out.push_str("if ");
                self.expr(*condition)?;
                self.out.push(' ');
                self.block(*then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.out.push_str(" else ");
                    self.block(*else_branch)?;
                }
            }
            Node::Loop {
                label,
                induction,
                start: from,
                end,
                step,
                body,
            } => {
                if let Some(label) = label {
                    let _ = write!(self.out, "'{}: ", label);
                }
                let _ = write!(self.out, "for {} in ", induction);
                self.operand(*from)?;
                self.out.push_str("..");
                self.operand(*end)?;
                self.out.push_str(" step ");
                self.operand(*step)?;
                self.out.push(' ');
                self.block(*body)?;
            }
            other => {
                return Err(Error::invariant(format!(
                    "{} cannot be printed as an expression",
                    other.kind()
                )))
            }
        }
        self.record(id, start);
        Ok(())
    }

    fn list(&mut self, ids: &[NodeId]) -> Result<()> {
        for (index, id) in ids.iter().enumerate() {
            if index > 0 {
                self.out.push_str(", ");
            }
            self.expr(*id)?;
        }
        Ok(())
    }
}
