//! Error types for the interpreter

use thiserror::Error;

/// Result type for interpreter operations
pub type InterpreterResult<T> = Result<T, InterpreterError>;

/// Errors that can occur during interpretation
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// Variable not found
    #[error("Name error: {0}")]
    NameError(String),

    /// Function not found
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Type mismatch
    #[error("Type error: {0}")]
    TypeError(String),

    /// Invalid number of arguments
    #[error("Arity error: expected {expected} arguments, got {actual}")]
    ArityError { expected: usize, actual: usize },

    /// Assignment to a binding declared without `mut`
    #[error("Cannot assign twice to immutable binding `{0}`")]
    ImmutableBinding(String),

    /// Division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// Integer overflow
    #[error("Arithmetic overflow")]
    Overflow,

    /// Index out of bounds
    #[error("Index out of bounds: {index} (length: {length})")]
    IndexOutOfBounds { index: i64, length: usize },

    /// Counted loop with a step that is not positive
    #[error("Loop step must be positive, got {0}")]
    InvalidStep(i64),

    /// A trap placeholder was evaluated
    #[error("Trap reached: {0}")]
    Trap(String),

    /// break/continue/return that found no target
    #[error("Invalid control flow: {0}")]
    InvalidControlFlow(String),

    /// Stack overflow
    #[error("Stack overflow: maximum recursion depth exceeded")]
    StackOverflow,

    /// Evaluation step budget exhausted
    #[error("Evaluation step limit exceeded")]
    StepLimit,

    /// The evaluation thread could not be started
    #[error("Failed to start the evaluation thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Malformed tree
    #[error(transparent)]
    Core(#[from] annotopt_core::Error),
}
