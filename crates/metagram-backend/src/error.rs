use std::{
    borrow::Cow,
    cell::{Ref, RefCell},
    fmt::Write,
};

use metagram_runtime::linemap::LineMap;
use thiserror::Error;

use crate::span::{Span, Spanned};

pub type Error = Cow<'static, str>;

/// Collects semantic diagnostics so that all of them can be reported at once.
#[derive(Default)]
pub struct ErrorAccumulator {
    errors: RefCell<Vec<Spanned<Error>>>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn error_static(&self, span: Span, err: &'static str) {
        self.errors
            .borrow_mut()
            .push(Spanned::new(err.into(), span));
    }
    pub fn error(&self, span: Span, err: impl ToString) {
        self.errors
            .borrow_mut()
            .push(Spanned::new(err.to_string().into(), span));
    }
    pub fn is_empty(&self) -> bool {
        self.errors.borrow().is_empty()
    }
    pub fn get(&self) -> Ref<'_, Vec<Spanned<Error>>> {
        self.errors.borrow()
    }
    /// Converts the collected errors into diagnostics sorted by their position.
    pub fn into_diagnostics(self, src: &str) -> Vec<Diagnostic> {
        let map = LineMap::new(src);
        let mut errors = self.errors.into_inner();
        errors.sort_by_key(|e| e.span.start());
        errors
            .into_iter()
            .map(|e| {
                let location = map.location(src, e.span.start() as usize);
                Diagnostic {
                    line: location.line,
                    column: location.column,
                    message: e.inner.into_owned(),
                }
            })
            .collect()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error(transparent)]
    Syntax(#[from] GrammarSyntaxError),
    #[error(transparent)]
    Semantic(#[from] GrammarSemanticError),
}

/// Malformed grammar source, compilation stops at the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error at {line}:{column}: {message}")]
pub struct GrammarSyntaxError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl GrammarSyntaxError {
    pub(crate) fn new(src: &str, error: Spanned<Error>) -> Self {
        let location = LineMap::new(src).location(src, error.span.start() as usize);
        Self {
            line: location.line,
            column: location.column,
            message: error.inner.into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// Every semantic problem found in a syntactically valid grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", render(.diagnostics))]
pub struct GrammarSemanticError {
    pub diagnostics: Vec<Diagnostic>,
}

impl GrammarSemanticError {
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.diagnostics.iter().map(|d| d.message.as_str())
    }
}

fn render(diagnostics: &[Diagnostic]) -> String {
    let mut buf = String::new();
    _ = write!(buf, "grammar has {} error(s)", diagnostics.len());
    for d in diagnostics {
        _ = write!(buf, "\n  {}:{}: {}", d.line, d.column, d.message);
    }
    buf
}

#[test]
fn test_diagnostics_are_sorted() {
    let src = "ab\ncd";
    let err = ErrorAccumulator::new();
    err.error_static(Span::new(4, 5), "second");
    err.error(Span::new(0, 1), format_args!("first {}", 1));

    let diagnostics = err.into_diagnostics(src);
    assert_eq!(
        diagnostics,
        vec![
            Diagnostic {
                line: 1,
                column: 1,
                message: "first 1".into()
            },
            Diagnostic {
                line: 2,
                column: 2,
                message: "second".into()
            },
        ]
    );

    let error = GrammarSemanticError { diagnostics };
    assert_eq!(
        error.to_string(),
        "grammar has 2 error(s)\n  1:1: first 1\n  2:2: second"
    );
}
