//! Compiler from metagram source text to a [`Grammar`].

pub mod ast;
pub mod check;
pub mod error;
pub mod lexer;
pub mod literal;
pub mod parser;
pub mod resolve;
pub mod span;

use log::debug;
use metagram_runtime::Grammar;

pub use error::{Diagnostic, GrammarError, GrammarSemanticError, GrammarSyntaxError};

/// Compiles grammar source. Syntax errors stop at the first one, semantic errors are all
/// collected and reported together.
pub fn compile(src: &str) -> Result<Grammar, GrammarError> {
    let file = parser::parse(src).map_err(|e| GrammarSyntaxError::new(src, e))?;
    debug!(
        "Parsed {} rules and {} start designations",
        file.rules.len(),
        file.starts.len()
    );

    let err = error::ErrorAccumulator::new();
    let lowered = resolve::lower(&file, &err);

    let nullable = check::nullable_rules(&lowered.rules);
    check::check_left_recursion(&lowered.rules, &lowered.spans, &nullable, &err);

    match lowered.start {
        Some(start) if err.is_empty() => {
            check::warn_nullable_repeats(&lowered.rules, &nullable);
            let grammar = Grammar::new(lowered.rules, start);
            debug!("Compiled grammar starting at `{}`", start.name(&grammar));
            Ok(grammar)
        }
        _ => {
            let diagnostics = err.into_diagnostics(src);
            debug!("Grammar has {} semantic errors", diagnostics.len());
            Err(GrammarSemanticError { diagnostics }.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let error = compile("meta { a := [x: str] => x; ").unwrap_err();
        assert_eq!(
            error,
            GrammarError::Syntax(GrammarSyntaxError {
                line: 1,
                column: 28,
                message: "expected rule definition, found end of input".into()
            })
        );

        let error = compile("meta {\n  a := [x: str] => y;\n  ---\n  a\n}").unwrap_err();
        let GrammarError::Semantic(semantic) = error else {
            panic!("expected a semantic error");
        };
        assert_eq!(
            semantic.diagnostics,
            vec![Diagnostic {
                line: 2,
                column: 20,
                message: "Unbound name `y`".into()
            }]
        );
    }

    #[test]
    fn test_grammar_display() {
        let grammar =
            compile("meta { line := [text: str] => text; doc := repeat line:\"l\" | !\"x\"; --- doc }")
                .unwrap();
        assert_eq!(
            grammar.to_string(),
            "meta {\n    line := [text <- str] => text;\n    doc := (repeat line:\"l\" | !\"x\");\n    ---\n    doc\n}"
        );
    }
}
