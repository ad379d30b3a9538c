use log::{debug, log_enabled, trace, Level};

use crate::{
    action::evaluate,
    capture::Capture,
    error::{EngineError, NoMatch, RunError},
    grammar::{Action, Grammar, Leaf, Pattern, RuleHandle, Sequence},
    linemap::LineMap,
    value::Value,
};

#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Maximum number of nested rule invocations.
    pub max_depth: u32,
    /// Rule to start from instead of the grammar's start rule.
    pub start: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_depth: 256,
            start: None,
        }
    }
}

/// Bindings of a sequence which is currently being matched.
#[derive(Default)]
pub(crate) struct Frame<'a> {
    pub(crate) slots: Vec<Option<Capture<'a>>>,
}

type MatchResult<'a> = Result<Option<Capture<'a>>, RunError>;

struct Matcher<'a> {
    grammar: &'a Grammar,
    input: &'a str,
    pos: usize,
    /// Furthest offset at which a leaf or a literal failed.
    furthest: usize,
    depth: u32,
    max_depth: u32,
    frames: Vec<Frame<'a>>,
    /// Index of the first frame of the rule being matched, actions cannot see past it.
    scope_base: usize,
    rule: RuleHandle,
}

impl<'a> Matcher<'a> {
    fn new(grammar: &'a Grammar, input: &'a str, max_depth: u32) -> Self {
        Self {
            grammar,
            input,
            pos: 0,
            furthest: 0,
            depth: 0,
            max_depth,
            frames: Vec::new(),
            scope_base: 0,
            rule: grammar.start(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn note_failure(&mut self) {
        self.furthest = self.furthest.max(self.pos);
    }

    fn no_match(&self) -> NoMatch {
        let offset = self.furthest.max(self.pos);
        let location = LineMap::new(self.input).location(self.input, offset);
        NoMatch {
            offset,
            line: location.line,
            column: location.column,
        }
    }

    fn call(&mut self, handle: RuleHandle) -> MatchResult<'a> {
        let grammar = self.grammar;
        let rule = grammar
            .rule(handle)
            .ok_or(EngineError::UnknownRule(handle))?;

        if self.depth >= self.max_depth {
            return Err(EngineError::DepthLimit {
                rule: rule.name.to_string(),
                limit: self.max_depth,
            }
            .into());
        }

        trace!("Entering {} at {}", rule.name, self.pos);

        let saved_base = std::mem::replace(&mut self.scope_base, self.frames.len());
        let saved_rule = std::mem::replace(&mut self.rule, handle);
        self.depth += 1;

        let result = self.pattern(&rule.pattern);

        self.depth -= 1;
        self.scope_base = saved_base;
        self.rule = saved_rule;

        if let (true, Ok(capture)) = (log_enabled!(Level::Trace), &result) {
            let status = if capture.is_some() { "matched" } else { "failed" };
            trace!("Leaving {} at {}, {status}", rule.name, self.pos);
        }
        result
    }

    fn pattern(&mut self, pattern: &'a Pattern) -> MatchResult<'a> {
        match pattern {
            Pattern::Leaf(leaf) => Ok(self.leaf(*leaf)),
            Pattern::Literal(text) => {
                let rest = self.rest();
                if rest.starts_with(&**text) {
                    self.pos += text.len();
                    Ok(Some(Capture::Text(&rest[..text.len()])))
                } else {
                    self.note_failure();
                    Ok(None)
                }
            }
            Pattern::Sequence(sequence) => self.sequence(sequence, None),
            Pattern::Action(action) => self.sequence(&action.sequence, Some(action)),
            Pattern::Repeat(inner) => {
                let mut items = Vec::new();
                loop {
                    let start = self.pos;
                    match self.pattern(inner)? {
                        Some(capture) if self.pos > start => items.push(capture),
                        // an iteration which consumed nothing would repeat forever
                        Some(_) => break,
                        None => {
                            self.pos = start;
                            break;
                        }
                    }
                }
                Ok(Some(Capture::List(items)))
            }
            Pattern::Choice(alternatives) => {
                let start = self.pos;
                for alternative in alternatives {
                    if let Some(capture) = self.pattern(alternative)? {
                        return Ok(Some(capture));
                    }
                    self.pos = start;
                }
                Ok(None)
            }
            Pattern::Not(inner) => {
                let start = self.pos;
                let furthest = self.furthest;
                let matched = self.pattern(inner)?.is_some();
                self.pos = start;
                self.furthest = furthest;
                if matched {
                    self.note_failure();
                    Ok(None)
                } else {
                    Ok(Some(Capture::Unit))
                }
            }
            Pattern::Rule(rule) => self.call(rule.rule),
        }
    }

    fn sequence(&mut self, sequence: &'a Sequence, action: Option<&'a Action>) -> MatchResult<'a> {
        let start = self.pos;
        let top = self.frames.len();
        self.frames.push(Frame {
            slots: vec![None; sequence.slots as usize],
        });

        for field in &sequence.fields {
            match self.pattern(&field.pattern)? {
                Some(capture) => {
                    if let Some(binding) = &field.binding {
                        if let Some(slot) = self.frames[top].slots.get_mut(binding.slot as usize) {
                            *slot = Some(capture);
                        }
                    }
                }
                None => {
                    self.frames.truncate(top);
                    self.pos = start;
                    return Ok(None);
                }
            }
        }

        let capture = match action {
            Some(action) => {
                let value = evaluate(action, &self.frames[self.scope_base..]).map_err(|error| {
                    RunError::Action {
                        rule: self.rule.name(self.grammar).to_owned(),
                        error,
                    }
                })?;
                Capture::Value(value)
            }
            None => {
                let slots = &mut self.frames[top].slots;
                let fields = sequence
                    .fields
                    .iter()
                    .filter_map(|field| field.binding.as_ref())
                    .filter_map(|binding| {
                        let capture = slots.get_mut(binding.slot as usize)?.take()?;
                        Some((&*binding.name, capture))
                    })
                    .collect();
                Capture::Record(fields)
            }
        };

        self.frames.truncate(top);
        Ok(Some(capture))
    }

    fn leaf(&mut self, leaf: Leaf) -> Option<Capture<'a>> {
        let capture = match leaf {
            Leaf::Str => self.line(),
            Leaf::F64 => self.number(false),
            Leaf::I64 => self.number(true),
        };
        if capture.is_none() {
            self.note_failure();
        }
        capture
    }

    fn line(&mut self) -> Option<Capture<'a>> {
        let rest = self.rest();
        if rest.is_empty() {
            return None;
        }

        let (line, consumed) = match rest.find('\n') {
            Some(i) => (&rest[..i], i + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        Some(Capture::Text(line.strip_suffix('\r').unwrap_or(line)))
    }

    /// Blanks around the number and a single line end after it are consumed.
    fn number(&mut self, integer: bool) -> Option<Capture<'a>> {
        let bytes = self.input.as_bytes();
        let skip_blank = |mut i: usize| {
            while matches!(bytes.get(i), Some(b' ' | b'\t')) {
                i += 1;
            }
            i
        };
        let digits = |mut i: usize| {
            let start = i;
            while bytes.get(i).is_some_and(u8::is_ascii_digit) {
                i += 1;
            }
            (i, i > start)
        };

        let start = skip_blank(self.pos);
        let mut i = start;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }

        let (end, mut any) = digits(i);
        i = end;

        if !integer {
            if bytes.get(i) == Some(&b'.') {
                let (end, fraction) = digits(i + 1);
                if fraction {
                    i = end;
                    any = true;
                }
            }
            if any && matches!(bytes.get(i), Some(b'e' | b'E')) {
                let mut j = i + 1;
                if matches!(bytes.get(j), Some(b'+' | b'-')) {
                    j += 1;
                }
                let (end, exponent) = digits(j);
                if exponent {
                    i = end;
                }
            }
        }

        if !any {
            return None;
        }

        let lexeme = &self.input[start..i];
        let capture = if integer {
            Capture::Int(lexeme.parse().ok()?)
        } else {
            Capture::Float(lexeme.parse().ok()?)
        };

        i = skip_blank(i);
        if bytes[i..].starts_with(b"\r\n") {
            i += 2;
        } else if bytes.get(i) == Some(&b'\n') {
            i += 1;
        }

        self.pos = i;
        Some(capture)
    }
}

impl Grammar {
    /// Matches the whole `input` against the start rule and returns the value it produces.
    pub fn run(&self, input: &str) -> Result<Value, RunError> {
        self.run_with(input, &RunOptions::default())
    }

    pub fn run_with(&self, input: &str, options: &RunOptions) -> Result<Value, RunError> {
        let start = match &options.start {
            Some(name) => self
                .find(name)
                .ok_or_else(|| EngineError::UnknownStart(name.clone()))?,
            None => self.start(),
        };

        debug!(
            "Running `{}` over {} bytes of input",
            start.name(self),
            input.len()
        );

        let mut matcher = Matcher::new(self, input, options.max_depth);
        match matcher.call(start)? {
            Some(capture) if matcher.pos == input.len() => Ok(capture.into_value()),
            _ => Err(matcher.no_match().into()),
        }
    }

    /// Matches `rule` against a prefix of `input`, returning the capture and the number of
    /// bytes consumed.
    pub fn match_rule<'a>(
        &'a self,
        rule: RuleHandle,
        input: &'a str,
        options: &RunOptions,
    ) -> Result<Option<(Capture<'a>, usize)>, RunError> {
        let mut matcher = Matcher::new(self, input, options.max_depth);
        let capture = matcher.call(rule)?;
        Ok(capture.map(|capture| (capture, matcher.pos)))
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::{EntityRef, PrimaryMap};

    use super::*;
    use crate::{
        error::ActionEvalError,
        expr::Expr,
        grammar::{Binding, Field, Rule, RuleRef},
    };

    fn bind(name: &str, slot: u32, pattern: Pattern) -> Field {
        Field {
            binding: Some(Binding {
                name: name.into(),
                slot,
            }),
            pattern,
        }
    }
    fn skip(pattern: Pattern) -> Field {
        Field {
            binding: None,
            pattern,
        }
    }
    fn seq(fields: Vec<Field>) -> Pattern {
        let slots = fields.iter().filter(|f| f.binding.is_some()).count() as u32;
        Pattern::Sequence(Sequence { fields, slots })
    }
    fn lit(text: &str) -> Pattern {
        Pattern::Literal(text.into())
    }
    fn rule(index: usize) -> Pattern {
        Pattern::Rule(RuleRef {
            rule: RuleHandle::new(index),
            rename: None,
        })
    }
    /// The first rule is the start rule.
    fn grammar(rules: Vec<(&str, Pattern)>) -> Grammar {
        let mut map = PrimaryMap::new();
        for (name, pattern) in rules {
            map.push(Rule {
                name: name.into(),
                pattern,
            });
        }
        Grammar::new(map, RuleHandle::new(0))
    }
    fn record(fields: Vec<(&str, Value)>) -> Value {
        Value::Record(fields.into_iter().collect())
    }

    #[test]
    fn sequence_builds_record() {
        let g = grammar(vec![(
            "person",
            seq(vec![
                bind("first", 0, Pattern::Leaf(Leaf::Str)),
                bind("age", 1, Pattern::Leaf(Leaf::F64)),
            ]),
        )]);

        assert_eq!(
            g.run("Ada\r\n36\n"),
            Ok(record(vec![
                ("first", Value::from("Ada")),
                ("age", Value::Float(36.0))
            ]))
        );
    }

    #[test]
    fn repeat_matches_zero_times() {
        let g = grammar(vec![
            ("doc", Pattern::Repeat(Box::new(rule(1)))),
            ("line", Pattern::Leaf(Leaf::Str)),
        ]);

        assert_eq!(g.run(""), Ok(Value::List(vec![])));
        assert_eq!(
            g.run("a\nb"),
            Ok(Value::List(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn failed_sequence_restores_position() {
        let g = grammar(vec![(
            "doc",
            Pattern::Choice(vec![
                seq(vec![bind("x", 0, lit("a")), bind("y", 1, lit("b"))]),
                seq(vec![bind("z", 0, lit("a")), bind("w", 1, lit("c"))]),
            ]),
        )]);

        assert_eq!(
            g.run("ac"),
            Ok(record(vec![
                ("z", Value::from("a")),
                ("w", Value::from("c"))
            ]))
        );
    }

    #[test]
    fn lookahead_stops_repetition() {
        // doc := [items <- repeat [!"end", text <- str], "end"]
        let line = seq(vec![
            skip(Pattern::Not(Box::new(lit("end")))),
            bind("text", 0, Pattern::Leaf(Leaf::Str)),
        ]);
        let g = grammar(vec![(
            "doc",
            seq(vec![
                bind("items", 0, Pattern::Repeat(Box::new(line))),
                skip(lit("end")),
            ]),
        )]);

        let value = g.run("a\nb\nend").unwrap();
        let items = value.as_record().unwrap().get("items").unwrap();
        assert_eq!(items.as_list().map(|a| a.len()), Some(2));
    }

    #[test]
    fn reports_furthest_failure() {
        let g = grammar(vec![(
            "doc",
            seq(vec![skip(lit("ab")), skip(lit("\n")), skip(lit("cd"))]),
        )]);

        let error = g.run("ab\ncx").unwrap_err();
        assert_eq!(
            error,
            RunError::NoMatch(NoMatch {
                offset: 3,
                line: 2,
                column: 1
            })
        );

        // trailing input
        let g = grammar(vec![("doc", lit("ab"))]);
        let error = g.run("abc").unwrap_err();
        assert_eq!(
            error,
            RunError::NoMatch(NoMatch {
                offset: 2,
                line: 1,
                column: 3
            })
        );
    }

    #[test]
    fn numbers() {
        let g = grammar(vec![(
            "doc",
            Pattern::Repeat(Box::new(Pattern::Choice(vec![
                Pattern::Leaf(Leaf::I64),
                Pattern::Leaf(Leaf::F64),
            ]))),
        )]);
        assert_eq!(
            g.run("12 -3\n"),
            Ok(Value::List(vec![Value::Int(12), Value::Int(-3)]))
        );

        let g = grammar(vec![("doc", Pattern::Repeat(Box::new(Pattern::Leaf(Leaf::F64))))]);
        assert_eq!(
            g.run(" -1.5e3 \r\n.5\n"),
            Ok(Value::List(vec![Value::Float(-1500.0), Value::Float(0.5)]))
        );

        // a dot without digits after it is not part of the number
        let g = grammar(vec![("doc", Pattern::Leaf(Leaf::F64))]);
        assert_eq!(
            g.match_rule(g.start(), "2.x\n", &RunOptions::default()),
            Ok(Some((Capture::Float(2.0), 1)))
        );
        assert!(g.run("2.\n").unwrap_err().is_no_match());
        assert!(g.run(".\n").unwrap_err().is_no_match());

        let g = grammar(vec![("doc", Pattern::Leaf(Leaf::I64))]);
        assert!(g.run("99999999999999999999").unwrap_err().is_no_match());
        assert!(g.run("-").unwrap_err().is_no_match());
    }

    #[test]
    fn depth_limit() {
        // r := (["x", r] | "y")
        let g = grammar(vec![(
            "r",
            Pattern::Choice(vec![seq(vec![skip(lit("x")), skip(rule(0))]), lit("y")]),
        )]);

        assert!(g.run("xxy").is_ok());

        let options = RunOptions {
            max_depth: 2,
            ..Default::default()
        };
        assert_eq!(
            g.run_with("xxy", &options),
            Err(RunError::Engine(EngineError::DepthLimit {
                rule: "r".into(),
                limit: 2
            }))
        );
    }

    #[test]
    fn engine_errors() {
        let g = grammar(vec![("doc", rule(7))]);
        assert_eq!(
            g.run(""),
            Err(RunError::Engine(EngineError::UnknownRule(RuleHandle::new(7))))
        );

        let options = RunOptions {
            start: Some("nope".into()),
            ..Default::default()
        };
        assert_eq!(
            g.run_with("", &options),
            Err(RunError::Engine(EngineError::UnknownStart("nope".into())))
        );
    }

    #[test]
    fn action_errors_name_the_rule() {
        let action = Action {
            sequence: Sequence::default(),
            body: Expr::Call {
                name: "nope".into(),
                args: vec![],
            },
            locals: 0,
        };
        let g = grammar(vec![("doc", Pattern::Action(action))]);

        assert_eq!(
            g.run(""),
            Err(RunError::Action {
                rule: "doc".into(),
                error: ActionEvalError::UnknownBuiltin("nope".into())
            })
        );
    }

    #[test]
    fn action_sees_enclosing_sequence_of_its_rule() {
        // doc := [a <- str, b <- [x <- str] => [a, x]]
        let inner = Action {
            sequence: Sequence {
                fields: vec![bind("x", 0, Pattern::Leaf(Leaf::Str))],
                slots: 1,
            },
            body: Expr::List(vec![
                Expr::Capture {
                    name: "a".into(),
                    depth: 1,
                    slot: 0,
                },
                Expr::Capture {
                    name: "x".into(),
                    depth: 0,
                    slot: 0,
                },
            ]),
            locals: 0,
        };
        let g = grammar(vec![(
            "doc",
            seq(vec![
                bind("a", 0, Pattern::Leaf(Leaf::Str)),
                bind("b", 1, Pattern::Action(inner)),
            ]),
        )]);

        assert_eq!(
            g.run("1\n2\n"),
            Ok(record(vec![
                ("a", Value::from("1")),
                (
                    "b",
                    Value::List(vec![Value::from("1"), Value::from("2")])
                )
            ]))
        );
    }

    #[test]
    fn match_rule_accepts_prefix() {
        let g = grammar(vec![("doc", lit("ab"))]);
        let (capture, len) = g
            .match_rule(g.start(), "abc", &RunOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(capture, Capture::Text("ab"));
        assert_eq!(len, 2);

        assert_eq!(
            g.match_rule(g.start(), "x", &RunOptions::default()),
            Ok(None)
        );
    }
}
