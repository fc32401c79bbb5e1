//! Programmatic front end
//!
//! Builds a [`SourceUnit`] the way a parser would hand it over: every node has
//! a source span in a laid-out text and annotations arrive as sidecar
//! metadata entries.
//!
//! ```
//! use annotopt_core::builder::{Expr, UnitBuilder};
//!
//! let mut unit = UnitBuilder::new("demo");
//! unit.function("total", &[], |b| {
//!     b.let_mut("sum", Expr::int(0));
//!     b.annotate("tool: unroll");
//!     b.for_range("i", Expr::int(0), Expr::int(4), |body| {
//!         body.assign_op("sum", annotopt_core::ast::BinaryOp::Add, Expr::var("i"));
//!     });
//!     b.ret(Expr::var("sum"));
//! });
//! let unit = unit.finish().unwrap();
//! assert_eq!(unit.metadata.len(), 1);
//! ```

use crate::ast::{BinaryOp, Literal, Node, NodeId, SyntaxTree, UnaryOp};
use crate::error::Result;
use crate::printer::{self, Notes};
use crate::source::{SourceMap, SourceUnit};

/// Expression description, lowered to nodes by [`UnitBuilder::finish`]
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Literal),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Closure(Vec<String>, Box<Expr>),
    Block(Box<BlockBuilder>),
    /// Expression preceded by an inline `/* ... */` annotation
    Annotated(String, Box<Expr>),
}

impl Expr {
    pub fn int(value: i64) -> Expr {
        Expr::Lit(Literal::Int(value))
    }

    pub fn bool(value: bool) -> Expr {
        Expr::Lit(Literal::Bool(value))
    }

    pub fn str(value: impl Into<String>) -> Expr {
        Expr::Lit(Literal::Str(value.into()))
    }

    pub fn unit() -> Expr {
        Expr::Lit(Literal::Unit)
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn call(callee: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Call(callee.into(), args.into_iter().collect())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, lhs, rhs)
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn neg(operand: Expr) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(operand))
    }

    pub fn not(operand: Expr) -> Expr {
        Expr::Unary(UnaryOp::Not, Box::new(operand))
    }

    pub fn index(base: Expr, index: Expr) -> Expr {
        Expr::Index(Box::new(base), Box::new(index))
    }

    pub fn array(elements: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Array(elements.into_iter().collect())
    }

    pub fn closure(params: &[&str], body: Expr) -> Expr {
        Expr::Closure(
            params.iter().map(|p| p.to_string()).collect(),
            Box::new(body),
        )
    }

    /// Block used as a value
    pub fn block(build: impl FnOnce(&mut BlockBuilder)) -> Expr {
        let mut block = BlockBuilder::default();
        build(&mut block);
        Expr::Block(Box::new(block))
    }

    /// Labeled block used as a value; leave it with `break 'label value`
    pub fn labeled_block(label: impl Into<String>, build: impl FnOnce(&mut BlockBuilder)) -> Expr {
        let mut block = BlockBuilder::labeled(label);
        build(&mut block);
        Expr::Block(Box::new(block))
    }

    /// `/* text */ expr`
    pub fn annotated(text: impl Into<String>, expr: Expr) -> Expr {
        Expr::Annotated(text.into(), Box::new(expr))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Let {
        name: String,
        mutable: bool,
        init: Expr,
    },
    Assign {
        target: Expr,
        op: Option<BinaryOp>,
        value: Expr,
    },
    Expr(Expr),
    If {
        condition: Expr,
        then_branch: BlockBuilder,
        else_branch: Option<BlockBuilder>,
    },
    Loop {
        label: Option<String>,
        induction: String,
        start: Expr,
        end: Expr,
        step: Expr,
        body: BlockBuilder,
    },
    Block(BlockBuilder),
    Return(Option<Expr>),
    Break {
        label: Option<String>,
        value: Option<Expr>,
    },
    Continue(Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Stmt(Stmt),
    /// Comment on its own line
    Note(String),
    /// Comment on the line of the previous statement
    Trailing(String),
}

/// Statement list under construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockBuilder {
    label: Option<String>,
    entries: Vec<Entry>,
    tail: Option<Expr>,
}

impl BlockBuilder {
    fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    fn nested(label: Option<String>, build: impl FnOnce(&mut BlockBuilder)) -> BlockBuilder {
        let mut block = BlockBuilder {
            label,
            ..BlockBuilder::default()
        };
        build(&mut block);
        block
    }

    fn push(&mut self, stmt: Stmt) -> &mut Self {
        self.entries.push(Entry::Stmt(stmt));
        self
    }

    /// Annotation on its own line, before whatever comes next
    pub fn annotate(&mut self, text: impl Into<String>) -> &mut Self {
        self.entries.push(Entry::Note(text.into()));
        self
    }

    /// Annotation at the end of the previous statement's line
    pub fn annotate_trailing(&mut self, text: impl Into<String>) -> &mut Self {
        self.entries.push(Entry::Trailing(text.into()));
        self
    }

    pub fn let_(&mut self, name: impl Into<String>, init: Expr) -> &mut Self {
        self.push(Stmt::Let {
            name: name.into(),
            mutable: false,
            init,
        })
    }

    pub fn let_mut(&mut self, name: impl Into<String>, init: Expr) -> &mut Self {
        self.push(Stmt::Let {
            name: name.into(),
            mutable: true,
            init,
        })
    }

    pub fn assign(&mut self, name: impl Into<String>, value: Expr) -> &mut Self {
        self.push(Stmt::Assign {
            target: Expr::Var(name.into()),
            op: None,
            value,
        })
    }

    pub fn assign_op(&mut self, name: impl Into<String>, op: BinaryOp, value: Expr) -> &mut Self {
        self.push(Stmt::Assign {
            target: Expr::Var(name.into()),
            op: Some(op),
            value,
        })
    }

    /// Assignment to an arbitrary place, e.g. `xs[i] = v`
    pub fn assign_to(&mut self, target: Expr, op: Option<BinaryOp>, value: Expr) -> &mut Self {
        self.push(Stmt::Assign { target, op, value })
    }

    pub fn expr(&mut self, expr: Expr) -> &mut Self {
        self.push(Stmt::Expr(expr))
    }

    /// `callee(args);`
    pub fn call(&mut self, callee: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> &mut Self {
        self.expr(Expr::call(callee, args))
    }

    pub fn if_then(&mut self, condition: Expr, then: impl FnOnce(&mut BlockBuilder)) -> &mut Self {
        self.push(Stmt::If {
            condition,
            then_branch: BlockBuilder::nested(None, then),
            else_branch: None,
        })
    }

    pub fn if_else(
        &mut self,
        condition: Expr,
        then: impl FnOnce(&mut BlockBuilder),
        otherwise: impl FnOnce(&mut BlockBuilder),
    ) -> &mut Self {
        self.push(Stmt::If {
            condition,
            then_branch: BlockBuilder::nested(None, then),
            else_branch: Some(BlockBuilder::nested(None, otherwise)),
        })
    }

    /// `for var in start..end step 1`
    pub fn for_range(
        &mut self,
        var: impl Into<String>,
        start: Expr,
        end: Expr,
        body: impl FnOnce(&mut BlockBuilder),
    ) -> &mut Self {
        self.for_step(var, start, end, Expr::int(1), body)
    }

    pub fn for_step(
        &mut self,
        var: impl Into<String>,
        start: Expr,
        end: Expr,
        step: Expr,
        body: impl FnOnce(&mut BlockBuilder),
    ) -> &mut Self {
        self.push(Stmt::Loop {
            label: None,
            induction: var.into(),
            start,
            end,
            step,
            body: BlockBuilder::nested(None, body),
        })
    }

    pub fn labeled_for(
        &mut self,
        label: impl Into<String>,
        var: impl Into<String>,
        start: Expr,
        end: Expr,
        step: Expr,
        body: impl FnOnce(&mut BlockBuilder),
    ) -> &mut Self {
        self.push(Stmt::Loop {
            label: Some(label.into()),
            induction: var.into(),
            start,
            end,
            step,
            body: BlockBuilder::nested(None, body),
        })
    }

    pub fn block(&mut self, body: impl FnOnce(&mut BlockBuilder)) -> &mut Self {
        self.push(Stmt::Block(BlockBuilder::nested(None, body)))
    }

    pub fn labeled_block(
        &mut self,
        label: impl Into<String>,
        body: impl FnOnce(&mut BlockBuilder),
    ) -> &mut Self {
        self.push(Stmt::Block(BlockBuilder::nested(Some(label.into()), body)))
    }

    pub fn ret(&mut self, value: Expr) -> &mut Self {
        self.push(Stmt::Return(Some(value)))
    }

    pub fn ret_unit(&mut self) -> &mut Self {
        self.push(Stmt::Return(None))
    }

    pub fn brk(&mut self) -> &mut Self {
        self.push(Stmt::Break {
            label: None,
            value: None,
        })
    }

    pub fn brk_to(&mut self, label: impl Into<String>, value: Option<Expr>) -> &mut Self {
        self.push(Stmt::Break {
            label: Some(label.into()),
            value,
        })
    }

    pub fn cont(&mut self) -> &mut Self {
        self.push(Stmt::Continue(None))
    }

    pub fn cont_to(&mut self, label: impl Into<String>) -> &mut Self {
        self.push(Stmt::Continue(Some(label.into())))
    }

    /// Value of the block
    pub fn tail(&mut self, value: Expr) -> &mut Self {
        self.tail = Some(value);
        self
    }
}

/// Function declaration under construction
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    name: String,
    params: Vec<String>,
    variadic: bool,
    docs: Vec<String>,
    body: BlockBuilder,
}

impl FunctionSpec {
    /// Line of the function's leading documentation block
    pub fn doc(&mut self, text: impl Into<String>) -> &mut Self {
        self.docs.push(text.into());
        self
    }

    /// The last parameter collects any remaining arguments
    pub fn variadic(&mut self) -> &mut Self {
        self.variadic = true;
        self
    }
}

#[derive(Debug, Clone)]
enum Item {
    Global {
        name: String,
        mutable: bool,
        init: Expr,
    },
    Function(usize),
    Note(String),
}

/// Builds one compilation unit
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    name: String,
    items: Vec<Item>,
    functions: Vec<FunctionSpec>,
}

impl UnitBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn global(&mut self, name: impl Into<String>, mutable: bool, init: Expr) -> &mut Self {
        self.items.push(Item::Global {
            name: name.into(),
            mutable,
            init,
        });
        self
    }

    /// Annotation on its own line between module items
    pub fn annotate(&mut self, text: impl Into<String>) -> &mut Self {
        self.items.push(Item::Note(text.into()));
        self
    }

    pub fn function(
        &mut self,
        name: impl Into<String>,
        params: &[&str],
        body: impl FnOnce(&mut BlockBuilder),
    ) -> &mut FunctionSpec {
        let index = self.functions.len();
        self.functions.push(FunctionSpec {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
            variadic: false,
            docs: Vec::new(),
            body: BlockBuilder::nested(None, body),
        });
        self.items.push(Item::Function(index));
        &mut self.functions[index]
    }

    pub fn finish(self) -> Result<SourceUnit> {
        Ok(self.finish_with_text()?.0)
    }

    /// The unit plus the laid-out text its spans refer to
    pub fn finish_with_text(self) -> Result<(SourceUnit, String)> {
        let mut lowering = Lowering::default();
        let mut items = Vec::new();
        let mut pending = Vec::new();
        let mut functions: Vec<Option<FunctionSpec>> = self.functions.into_iter().map(Some).collect();

        for item in self.items {
            let id = match item {
                Item::Note(text) => {
                    pending.push(text);
                    continue;
                }
                Item::Global {
                    name,
                    mutable,
                    init,
                } => {
                    let init = lowering.expr(init)?;
                    lowering.tree.add_node(Node::Global {
                        name,
                        mutable,
                        init,
                    })?
                }
                Item::Function(index) => {
                    let Some(spec) = functions.get_mut(index).and_then(Option::take) else {
                        continue;
                    };
                    let body = lowering.block(spec.body)?;
                    let id = lowering.tree.add_node(Node::FunctionDecl {
                        name: spec.name,
                        params: spec.params,
                        variadic: spec.variadic,
                        body,
                    })?;
                    if !spec.docs.is_empty() {
                        lowering.notes.docs.insert(id, spec.docs);
                    }
                    id
                }
            };
            if !pending.is_empty() {
                lowering.notes.before.insert(id, std::mem::take(&mut pending));
            }
            items.push(id);
        }

        let module = lowering.tree.add_node(Node::Module { items })?;
        lowering.tree.root = Some(module);
        if !pending.is_empty() {
            lowering.notes.block_end.insert(module, pending);
        }

        let Lowering { mut tree, notes } = lowering;
        let layout = printer::layout(&tree, &notes)?;
        for (id, span) in &layout.spans {
            tree.set_span(*id, *span);
        }
        let mut source_map = SourceMap::from_text(&layout.text);
        for (function, span) in &layout.leading_blocks {
            source_map.set_leading_block(*function, *span);
        }
        let unit = SourceUnit::new(self.name, tree, source_map, layout.metadata);
        Ok((unit, layout.text))
    }
}

#[derive(Default)]
struct Lowering {
    tree: SyntaxTree,
    notes: Notes,
}

impl Lowering {
    fn expr(&mut self, expr: Expr) -> Result<NodeId> {
        let node = match expr {
            Expr::Lit(literal) => Node::Literal(literal),
            Expr::Var(name) => Node::Variable { name },
            Expr::Unary(op, operand) => Node::Unary {
                op,
                operand: self.expr(*operand)?,
            },
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.expr(*lhs)?;
                let rhs = self.expr(*rhs)?;
                Node::Binary { op, lhs, rhs }
            }
            Expr::Call(callee, args) => Node::Call {
                callee,
                args: self.exprs(args)?,
            },
            Expr::Index(base, index) => {
                let base = self.expr(*base)?;
                let index = self.expr(*index)?;
                Node::Index { base, index }
            }
            Expr::Array(elements) => Node::Array {
                elements: self.exprs(elements)?,
            },
            Expr::Closure(params, body) => Node::Closure {
                params,
                body: self.expr(*body)?,
            },
            Expr::Block(block) => return self.block(*block),
            Expr::Annotated(text, inner) => {
                let id = self.expr(*inner)?;
                self.notes.inline.entry(id).or_default().push(text);
                return Ok(id);
            }
        };
        self.tree.add_node(node)
    }

    fn exprs(&mut self, exprs: Vec<Expr>) -> Result<Vec<NodeId>> {
        exprs.into_iter().map(|e| self.expr(e)).collect()
    }

    fn block(&mut self, block: BlockBuilder) -> Result<NodeId> {
        let mut stmts: Vec<NodeId> = Vec::new();
        let mut pending = Vec::new();
        for entry in block.entries {
            match entry {
                Entry::Stmt(stmt) => {
                    let id = self.stmt(stmt)?;
                    if !pending.is_empty() {
                        self.notes.before.insert(id, std::mem::take(&mut pending));
                    }
                    stmts.push(id);
                }
                Entry::Note(text) => pending.push(text),
                Entry::Trailing(text) => match stmts.last() {
                    Some(previous) => self.notes.trailing.entry(*previous).or_default().push(text),
                    None => pending.push(text),
                },
            }
        }
        let tail = match block.tail {
            Some(value) => {
                let id = self.expr(value)?;
                if !pending.is_empty() {
                    self.notes.before.insert(id, std::mem::take(&mut pending));
                }
                Some(id)
            }
            None => None,
        };
        let id = self.tree.add_node(Node::Block {
            label: block.label,
            stmts,
            tail,
        })?;
        if !pending.is_empty() {
            self.notes.block_end.insert(id, pending);
        }
        Ok(id)
    }

    fn stmt(&mut self, stmt: Stmt) -> Result<NodeId> {
        let node = match stmt {
            Stmt::Let {
                name,
                mutable,
                init,
            } => Node::Let {
                name,
                mutable,
                init: self.expr(init)?,
            },
            Stmt::Assign { target, op, value } => {
                let target = self.expr(target)?;
                let value = self.expr(value)?;
                Node::Assign { target, op, value }
            }
            Stmt::Expr(expr) => Node::ExprStmt {
                expr: self.expr(expr)?,
            },
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.expr(condition)?;
                let then_branch = self.block(then_branch)?;
                let else_branch = else_branch.map(|b| self.block(b)).transpose()?;
                Node::If {
                    condition,
                    then_branch,
                    else_branch,
                }
            }
            Stmt::Loop {
                label,
                induction,
                start,
                end,
                step,
                body,
            } => {
                let start = self.expr(start)?;
                let end = self.expr(end)?;
                let step = self.expr(step)?;
                let body = self.block(body)?;
                Node::Loop {
                    label,
                    induction,
                    start,
                    end,
                    step,
                    body,
                }
            }
            Stmt::Block(block) => return self.block(block),
            Stmt::Return(value) => Node::Return {
                value: value.map(|v| self.expr(v)).transpose()?,
            },
            Stmt::Break { label, value } => Node::Break {
                label,
                value: value.map(|v| self.expr(v)).transpose()?,
            },
            Stmt::Continue(label) => Node::Continue { label },
        };
        self.tree.add_node(node)
    }
}
