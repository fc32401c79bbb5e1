//! Reference tree-walking interpreter for the annotopt syntax model
//!
//! Used to check that a rewritten unit behaves like the original one: same
//! return values, same globals, same `emit` output.

pub mod environment;
pub mod error;
pub mod interpreter;
pub mod value;

pub use environment::Environment;
pub use error::{InterpreterError, InterpreterResult};
pub use interpreter::Interpreter;
pub use value::Value;
