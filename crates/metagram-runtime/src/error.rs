use thiserror::Error;

use crate::grammar::RuleHandle;

/// Failure inside an action block, always aborts the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionEvalError {
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),

    #[error("index {index} is out of range for a sequence of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("unknown builtin `{0}`")]
    UnknownBuiltin(String),

    #[error("`{name}` takes {expected} argument(s) but {found} were supplied")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("cannot apply `{op}` to {lhs} and {rhs}")]
    OperandMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("record has no field `{0}`")]
    MissingField(String),

    #[error("cannot convert {value} to {target}")]
    Conversion { value: String, target: &'static str },

    #[error("integer overflow")]
    Overflow,
}

/// Broken invariant of the compiled grammar or a resource limit, always fatal for the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("rule {0:?} does not exist in the grammar")]
    UnknownRule(RuleHandle),

    #[error("no rule named `{0}` to start matching from")]
    UnknownStart(String),

    #[error("nesting limit of {limit} rules exceeded while entering `{rule}`")]
    DepthLimit { rule: String, limit: u32 },
}

/// The start rule did not match the whole input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("input does not match the grammar at {line}:{column}")]
pub struct NoMatch {
    /// Byte offset of the furthest position the matcher reached.
    pub offset: usize,
    pub line: u32,
    pub column: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error(transparent)]
    NoMatch(#[from] NoMatch),

    #[error("action of rule `{rule}` failed: {error}")]
    Action {
        rule: String,
        #[source]
        error: ActionEvalError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RunError {
    pub fn is_no_match(&self) -> bool {
        matches!(self, RunError::NoMatch(_))
    }
}
