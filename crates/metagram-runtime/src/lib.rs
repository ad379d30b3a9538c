//! Matching engine and action interpreter for compiled metagram grammars.

pub mod action;
pub mod capture;
pub mod engine;
pub mod error;
pub mod expr;
pub mod grammar;
pub mod linemap;
pub mod value;

pub use capture::Capture;
pub use engine::RunOptions;
pub use error::{ActionEvalError, EngineError, NoMatch, RunError};
pub use grammar::{Action, Binding, Field, Grammar, Leaf, Pattern, Rule, RuleHandle, RuleRef, Sequence};
pub use value::{Record, Value};
