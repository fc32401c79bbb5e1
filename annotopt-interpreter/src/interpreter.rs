//! Tree-walking evaluator

use std::sync::Arc;
use std::thread;

use annotopt_core::ast::{BinaryOp, Node, NodeId, SyntaxTree, UnaryOp};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::environment::Environment;
use crate::error::{InterpreterError, InterpreterResult};
use crate::value::{Closure, Value};

const DEFAULT_MAX_STEPS: u64 = 10_000_000;
const DEFAULT_MAX_DEPTH: usize = 128;
const DEFAULT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Non-local exits travelling up the evaluation stack
enum Unwind {
    Return(Value),
    Break(Option<String>, Value),
    Continue(Option<String>),
    Error(InterpreterError),
}

impl From<InterpreterError> for Unwind {
    fn from(error: InterpreterError) -> Self {
        Unwind::Error(error)
    }
}

impl From<annotopt_core::Error> for Unwind {
    fn from(error: annotopt_core::Error) -> Self {
        Unwind::Error(error.into())
    }
}

type Eval<T> = Result<T, Unwind>;

/// Interpreter over one unit's tree
pub struct Interpreter<'t> {
    tree: &'t SyntaxTree,
    globals: Environment,
    functions: FxHashMap<String, NodeId>,
    output: Vec<Value>,
    steps: u64,
    max_steps: u64,
    depth: usize,
    max_depth: usize,
    stack_size: usize,
}

impl<'t> Interpreter<'t> {
    /// Load the unit and evaluate its globals in declaration order
    pub fn new(tree: &'t SyntaxTree) -> InterpreterResult<Self> {
        let mut interpreter = Self {
            tree,
            globals: Environment::new(),
            functions: FxHashMap::default(),
            output: Vec::new(),
            steps: 0,
            max_steps: DEFAULT_MAX_STEPS,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            stack_size: DEFAULT_STACK_SIZE,
        };
        let items = match tree.root.map(|root| tree.node(root)).transpose()? {
            Some(Node::Module { items }) => items.clone(),
            Some(_) | None => Vec::new(),
        };
        for item in items {
            match tree.node(item)? {
                Node::FunctionDecl { name, .. } => {
                    interpreter.functions.insert(name.clone(), item);
                }
                Node::Global {
                    name,
                    mutable,
                    init,
                } => {
                    let env = interpreter.globals.clone();
                    let value = interpreter.finish(|this| this.eval(*init, &env))?;
                    interpreter.globals.define(name.clone(), value, *mutable);
                }
                _ => {}
            }
        }
        Ok(interpreter)
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Nesting of function and closure calls before [`InterpreterError::StackOverflow`]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Native stack of the evaluation thread, in bytes
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Call a module function by name
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> InterpreterResult<Value> {
        self.finish(|this| this.call_function(name, args))
    }

    /// Values passed to `emit` so far
    pub fn output(&self) -> &[Value] {
        &self.output
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.lookup(name)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Evaluate on a worker thread that owns a stack of `stack_size` bytes
    fn finish<T: Send>(
        &mut self,
        run: impl FnOnce(&mut Self) -> Eval<T> + Send,
    ) -> InterpreterResult<T> {
        let stack_size = self.stack_size;
        thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("annotopt-eval".into())
                .stack_size(stack_size)
                .spawn_scoped(scope, move || self.settle(run))
                .map_err(InterpreterError::Spawn)?;
            match worker.join() {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            }
        })
    }

    fn settle<T>(&mut self, run: impl FnOnce(&mut Self) -> Eval<T>) -> InterpreterResult<T> {
        match run(self) {
            Ok(value) => Ok(value),
            Err(Unwind::Error(error)) => Err(error),
            Err(Unwind::Return(_)) => Err(InterpreterError::InvalidControlFlow(
                "return outside of a function".to_string(),
            )),
            Err(Unwind::Break(label, _)) => Err(InterpreterError::InvalidControlFlow(format!(
                "break {} escaped its function",
                label.unwrap_or_default()
            ))),
            Err(Unwind::Continue(label)) => Err(InterpreterError::InvalidControlFlow(format!(
                "continue {} escaped its function",
                label.unwrap_or_default()
            ))),
        }
    }

    fn tick(&mut self) -> Eval<()> {
        self.steps += 1;
        if self.steps > self.max_steps {
            debug!("step limit of {} reached", self.max_steps);
            return Err(InterpreterError::StepLimit.into());
        }
        Ok(())
    }

    fn call_function(&mut self, name: &str, args: Vec<Value>) -> Eval<Value> {
        let id = *self
            .functions
            .get(name)
            .ok_or_else(|| InterpreterError::UnknownFunction(name.to_string()))?;
        let tree = self.tree;
        let (params, variadic, body) = match tree.node(id)? {
            Node::FunctionDecl {
                params,
                variadic,
                body,
                ..
            } => (params, *variadic, *body),
            _ => return Err(InterpreterError::UnknownFunction(name.to_string()).into()),
        };
        trace!("call {}({} args)", name, args.len());
        let env = self.globals.extend();
        bind_params(&env, params, variadic, args)?;
        self.enter()?;
        let result = self.eval(body, &env);
        self.depth -= 1;
        match result {
            Ok(value) | Err(Unwind::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Eval<Value> {
        let env = closure.env.extend();
        bind_params(&env, &closure.params, false, args)?;
        self.enter()?;
        let result = self.eval(closure.body, &env);
        self.depth -= 1;
        match result {
            Ok(value) | Err(Unwind::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    fn enter(&mut self) -> Eval<()> {
        if self.depth >= self.max_depth {
            return Err(InterpreterError::StackOverflow.into());
        }
        self.depth += 1;
        Ok(())
    }

    fn exec(&mut self, id: NodeId, env: &Environment) -> Eval<()> {
        self.tick()?;
        let tree = self.tree;
        match tree.node(id)? {
            Node::Let {
                name,
                mutable,
                init,
            } => {
                let value = self.eval(*init, env)?;
                env.define(name.clone(), value, *mutable);
            }
            Node::Assign { target, op, value } => self.assign(*target, *op, *value, env)?,
            Node::ExprStmt { expr } => {
                self.eval(*expr, env)?;
            }
            Node::Nop => {}
            Node::Return { value } => {
                let value = match value {
                    Some(value) => self.eval(*value, env)?,
                    None => Value::Unit,
                };
                return Err(Unwind::Return(value));
            }
            Node::Break { label, value } => {
                let value = match value {
                    Some(value) => self.eval(*value, env)?,
                    None => Value::Unit,
                };
                return Err(Unwind::Break(label.clone(), value));
            }
            Node::Continue { label } => return Err(Unwind::Continue(label.clone())),
            _ => {
                self.eval(id, env)?;
            }
        }
        Ok(())
    }

    fn assign(
        &mut self,
        target: NodeId,
        op: Option<BinaryOp>,
        value: NodeId,
        env: &Environment,
    ) -> Eval<()> {
        let tree = self.tree;
        match tree.node(target)? {
            Node::Variable { name } => {
                let new_value = self.eval(value, env)?;
                let new_value = match op {
                    Some(op) => {
                        let current = env
                            .lookup(name)
                            .ok_or_else(|| InterpreterError::NameError(name.clone()))?;
                        binary(op, current, new_value)?
                    }
                    None => new_value,
                };
                env.assign(name, new_value)?;
            }
            Node::Index { base, index } => {
                let base = self.eval(*base, env)?;
                let index = self.eval(*index, env)?;
                let new_value = self.eval(value, env)?;
                let values = match &base {
                    Value::Array(values) => values.clone(),
                    _ => return Err(type_error("array", &base)),
                };
                let slot = checked_index(&index, values.read().len())?;
                let new_value = match op {
                    Some(op) => {
                        let current = values.read()[slot].clone();
                        binary(op, current, new_value)?
                    }
                    None => new_value,
                };
                values.write()[slot] = new_value;
            }
            other => {
                return Err(InterpreterError::TypeError(format!(
                    "cannot assign to {}",
                    other.kind()
                ))
                .into())
            }
        }
        Ok(())
    }

    fn eval(&mut self, id: NodeId, env: &Environment) -> Eval<Value> {
        self.tick()?;
        let tree = self.tree;
        match tree.node(id)? {
            Node::Literal(literal) => Ok(Value::from(literal)),
            Node::Variable { name } => env
                .lookup(name)
                .ok_or_else(|| InterpreterError::NameError(name.clone()).into()),
            Node::Unary { op, operand } => {
                let operand = self.eval(*operand, env)?;
                match (op, &operand) {
                    (UnaryOp::Neg, Value::Int(n)) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| InterpreterError::Overflow.into()),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, _) => Err(type_error("int", &operand)),
                    (UnaryOp::Not, _) => Err(type_error("bool", &operand)),
                }
            }
            Node::Binary { op, lhs, rhs } => {
                let lhs = self.eval(*lhs, env)?;
                match (op, &lhs) {
                    (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let rhs = self.eval(*rhs, env)?;
                Ok(binary(*op, lhs, rhs)?)
            }
            Node::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(*arg, env)?);
                }
                self.dispatch(callee, values, env)
            }
            Node::Index { base, index } => {
                let base = self.eval(*base, env)?;
                let index = self.eval(*index, env)?;
                match &base {
                    Value::Array(values) => {
                        let values = values.read();
                        let slot = checked_index(&index, values.len())?;
                        Ok(values[slot].clone())
                    }
                    _ => Err(type_error("array", &base)),
                }
            }
            Node::Array { elements } => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.eval(*element, env)?);
                }
                Ok(Value::array(values))
            }
            Node::Closure { params, body } => Ok(Value::Closure(Arc::new(Closure {
                params: params.clone(),
                body: *body,
                env: env.clone(),
            }))),
            Node::Trap { reason } => Err(InterpreterError::Trap(reason.clone()).into()),
            Node::Block { label, stmts, tail } => {
                let scope = env.extend();
                let result = self.block(stmts, *tail, &scope);
                match (result, label) {
                    (Err(Unwind::Break(Some(target), value)), Some(label)) if &target == label => {
                        Ok(value)
                    }
                    (result, _) => result,
                }
            }
            Node::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.eval(*condition, env)?;
                match condition {
                    Value::Bool(true) => self.eval(*then_branch, env),
                    Value::Bool(false) => match else_branch {
                        Some(else_branch) => self.eval(*else_branch, env),
                        None => Ok(Value::Unit),
                    },
                    other => Err(type_error("bool", &other)),
                }
            }
            Node::Loop {
                label,
                induction,
                start,
                end,
                step,
                body,
            } => {
                let start = self.int(*start, env)?;
                let end = self.int(*end, env)?;
                let step = self.int(*step, env)?;
                if step <= 0 {
                    return Err(InterpreterError::InvalidStep(step).into());
                }
                let mut current = start;
                while current < end {
                    let scope = env.extend();
                    scope.define(induction.clone(), Value::Int(current), true);
                    match self.eval(*body, &scope) {
                        Ok(_) => {}
                        Err(Unwind::Break(target, _)) if targets(&target, label) => break,
                        Err(Unwind::Continue(target)) if targets(&target, label) => {}
                        Err(other) => return Err(other),
                    }
                    current = match current.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Ok(Value::Unit)
            }
            other if other.is_statement() => {
                self.exec(id, env)?;
                Ok(Value::Unit)
            }
            other => Err(InterpreterError::TypeError(format!(
                "{} cannot be evaluated",
                other.kind()
            ))
            .into()),
        }
    }

    fn block(&mut self, stmts: &[NodeId], tail: Option<NodeId>, env: &Environment) -> Eval<Value> {
        for stmt in stmts {
            self.exec(*stmt, env)?;
        }
        match tail {
            Some(tail) => self.eval(tail, env),
            None => Ok(Value::Unit),
        }
    }

    fn int(&mut self, id: NodeId, env: &Environment) -> Eval<i64> {
        let value = self.eval(id, env)?;
        value.as_int().ok_or_else(|| type_error("int", &value))
    }

    fn dispatch(&mut self, callee: &str, args: Vec<Value>, env: &Environment) -> Eval<Value> {
        if let Some(Value::Closure(closure)) = env.lookup(callee) {
            return self.call_closure(&closure, args);
        }
        match callee {
            "emit" => {
                self.output.extend(args);
                Ok(Value::Unit)
            }
            "len" => match args.as_slice() {
                [Value::Array(values)] => Ok(Value::Int(values.read().len() as i64)),
                [Value::Str(s)] => Ok(Value::Int(s.len() as i64)),
                [other] => Err(type_error("array", other)),
                _ => Err(InterpreterError::ArityError {
                    expected: 1,
                    actual: args.len(),
                }
                .into()),
            },
            "push" => match args.as_slice() {
                [Value::Array(values), value] => {
                    values.write().push(value.clone());
                    Ok(Value::Unit)
                }
                [other, _] => Err(type_error("array", other)),
                _ => Err(InterpreterError::ArityError {
                    expected: 2,
                    actual: args.len(),
                }
                .into()),
            },
            _ => self.call_function(callee, args),
        }
    }
}

/// A break or continue label addresses a loop carrying `label`
fn targets(target: &Option<String>, label: &Option<String>) -> bool {
    match target {
        None => true,
        Some(target) => label.as_ref() == Some(target),
    }
}

fn bind_params(
    env: &Environment,
    params: &[String],
    variadic: bool,
    mut args: Vec<Value>,
) -> InterpreterResult<()> {
    let fixed = if variadic {
        params.len().saturating_sub(1)
    } else {
        params.len()
    };
    if args.len() < fixed || (!variadic && args.len() != fixed) {
        return Err(InterpreterError::ArityError {
            expected: fixed,
            actual: args.len(),
        });
    }
    let rest = args.split_off(fixed);
    for (param, arg) in params.iter().zip(args) {
        env.define(param.clone(), arg, true);
    }
    if variadic {
        if let Some(last) = params.last() {
            env.define(last.clone(), Value::array(rest), true);
        }
    }
    Ok(())
}

fn checked_index(index: &Value, length: usize) -> Eval<usize> {
    let index = index.as_int().ok_or_else(|| type_error("int", index))?;
    if index < 0 || index as usize >= length {
        return Err(InterpreterError::IndexOutOfBounds { index, length }.into());
    }
    Ok(index as usize)
}

fn type_error(expected: &str, found: &Value) -> Unwind {
    InterpreterError::TypeError(format!("expected {}, found {}", expected, found.type_name())).into()
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> InterpreterResult<Value> {
    let value = match (op, &lhs, &rhs) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Value::Str(Arc::from(format!("{}{}", a, b))),
        (BinaryOp::Add, Value::Int(a), Value::Int(b)) => {
            Value::Int(a.checked_add(*b).ok_or(InterpreterError::Overflow)?)
        }
        (BinaryOp::Sub, Value::Int(a), Value::Int(b)) => {
            Value::Int(a.checked_sub(*b).ok_or(InterpreterError::Overflow)?)
        }
        (BinaryOp::Mul, Value::Int(a), Value::Int(b)) => {
            Value::Int(a.checked_mul(*b).ok_or(InterpreterError::Overflow)?)
        }
        (BinaryOp::Div | BinaryOp::Rem, Value::Int(_), Value::Int(0)) => return Err(InterpreterError::DivisionByZero),
        (BinaryOp::Div, Value::Int(a), Value::Int(b)) => {
            Value::Int(a.checked_div(*b).ok_or(InterpreterError::Overflow)?)
        }
        (BinaryOp::Rem, Value::Int(a), Value::Int(b)) => {
            Value::Int(a.checked_rem(*b).ok_or(InterpreterError::Overflow)?)
        }
        (BinaryOp::Eq, _, _) => Value::Bool(lhs == rhs),
        (BinaryOp::Ne, _, _) => Value::Bool(lhs != rhs),
        (BinaryOp::Lt, Value::Int(a), Value::Int(b)) => Value::Bool(a < b),
        (BinaryOp::Le, Value::Int(a), Value::Int(b)) => Value::Bool(a <= b),
        (BinaryOp::Gt, Value::Int(a), Value::Int(b)) => Value::Bool(a > b),
        (BinaryOp::Ge, Value::Int(a), Value::Int(b)) => Value::Bool(a >= b),
        (BinaryOp::And | BinaryOp::Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(if op == BinaryOp::And {
            *a && *b
        } else {
            *a || *b
        }),
        _ => {
            return Err(InterpreterError::TypeError(format!(
                "cannot apply `{}` to {} and {}",
                op.symbol(),
                lhs.type_name(),
                rhs.type_name()
            )))
        }
    };
    Ok(value)
}
