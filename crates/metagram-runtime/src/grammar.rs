use std::{
    collections::HashMap,
    fmt::{self, Display, Write},
};

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::expr::Expr;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleHandle(u32);

entity_impl! { RuleHandle }

impl RuleHandle {
    pub fn name(self, grammar: &Grammar) -> &str {
        grammar.rule(self).map_or("<unknown>", |rule| &rule.name)
    }
}

/// Typed leaf matchers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Leaf {
    /// Rest of the current line, the line terminator is consumed but not captured.
    Str,
    /// Floating point number.
    F64,
    /// Signed 64 bit integer.
    I64,
}

impl Leaf {
    pub fn from_name(name: &str) -> Option<Leaf> {
        match name {
            "str" => Some(Leaf::Str),
            "f64" => Some(Leaf::F64),
            "i64" => Some(Leaf::I64),
            _ => None,
        }
    }
    pub fn name(self) -> &'static str {
        match self {
            Leaf::Str => "str",
            Leaf::F64 => "f64",
            Leaf::I64 => "i64",
        }
    }
}

#[derive(Clone, Debug)]
pub enum Pattern {
    Leaf(Leaf),
    Literal(Box<str>),
    Sequence(Sequence),
    Repeat(Box<Pattern>),
    /// Ordered choice, the first alternative which matches wins.
    Choice(Vec<Pattern>),
    /// Negative lookahead, never consumes input.
    Not(Box<Pattern>),
    Rule(RuleRef),
    Action(Action),
}

impl Pattern {
    /// A pattern which never matches.
    pub fn fail() -> Pattern {
        Pattern::Choice(Vec::new())
    }
}

#[derive(Clone, Debug)]
pub struct RuleRef {
    pub rule: RuleHandle,
    /// The `:"name"` suffix.
    pub rename: Option<Box<str>>,
}

#[derive(Clone, Debug)]
pub struct Binding {
    /// Key of the field in the record built by a sequence without an action.
    pub name: Box<str>,
    pub slot: u32,
}

#[derive(Clone, Debug)]
pub struct Field {
    pub binding: Option<Binding>,
    pub pattern: Pattern,
}

#[derive(Clone, Debug, Default)]
pub struct Sequence {
    pub fields: Vec<Field>,
    /// Number of bound fields, slots are dense in `0..slots`.
    pub slots: u32,
}

#[derive(Clone, Debug)]
pub struct Action {
    pub sequence: Sequence,
    pub body: Expr,
    /// Size of the local table needed to evaluate `body`.
    pub locals: u32,
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub name: Box<str>,
    pub pattern: Pattern,
}

/// A compiled grammar, immutable and freely shareable between threads.
#[derive(Clone, Debug)]
pub struct Grammar {
    rules: PrimaryMap<RuleHandle, Rule>,
    names: HashMap<Box<str>, RuleHandle>,
    start: RuleHandle,
}

impl Grammar {
    pub fn new(rules: PrimaryMap<RuleHandle, Rule>, start: RuleHandle) -> Grammar {
        assert!(rules.is_valid(start), "Start rule is not part of the grammar");

        let mut names = HashMap::new();
        for (handle, rule) in rules.iter() {
            // duplicates are rejected by the compiler, keep the first one regardless
            names.entry(rule.name.clone()).or_insert(handle);
        }

        Grammar {
            rules,
            names,
            start,
        }
    }
    pub fn start(&self) -> RuleHandle {
        self.start
    }
    pub fn rule(&self, handle: RuleHandle) -> Option<&Rule> {
        self.rules.get(handle)
    }
    pub fn find(&self, name: &str) -> Option<RuleHandle> {
        self.names.get(name).copied()
    }
    pub fn iter(&self) -> cranelift_entity::Iter<'_, RuleHandle, Rule> {
        self.rules.iter()
    }
    pub fn len(&self) -> usize {
        self.rules.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "meta {{")?;
        for (_, rule) in self.rules.iter() {
            write!(f, "    {} := ", rule.name)?;
            rule.pattern.display_into(f, self, 1)?;
            writeln!(f, ";")?;
        }
        writeln!(f, "    ---")?;
        writeln!(f, "    {}", self.start.name(self))?;
        write!(f, "}}")
    }
}

impl Pattern {
    pub fn display_into(
        &self,
        buf: &mut dyn Write,
        grammar: &Grammar,
        level: usize,
    ) -> fmt::Result {
        match self {
            Pattern::Leaf(a) => buf.write_str(a.name()),
            Pattern::Literal(a) => write!(buf, "{a:?}"),
            Pattern::Sequence(seq) => seq.display_into(buf, grammar, level),
            Pattern::Repeat(a) => {
                buf.write_str("repeat ")?;
                a.display_into(buf, grammar, level)
            }
            Pattern::Choice(alternatives) => {
                buf.write_char('(')?;
                for (i, a) in alternatives.iter().enumerate() {
                    if i > 0 {
                        buf.write_str(" | ")?;
                    }
                    a.display_into(buf, grammar, level)?;
                }
                buf.write_char(')')
            }
            Pattern::Not(a) => {
                buf.write_char('!')?;
                a.display_into(buf, grammar, level)
            }
            Pattern::Rule(r) => {
                buf.write_str(r.rule.name(grammar))?;
                if let Some(rename) = &r.rename {
                    write!(buf, ":{rename:?}")?;
                }
                Ok(())
            }
            Pattern::Action(action) => {
                action.sequence.display_into(buf, grammar, level)?;
                buf.write_str(" => ")?;
                action.body.display_into(buf, level)
            }
        }
    }
}

impl Sequence {
    pub fn display_into(
        &self,
        buf: &mut dyn Write,
        grammar: &Grammar,
        level: usize,
    ) -> fmt::Result {
        buf.write_char('[')?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                buf.write_str(", ")?;
            }
            if let Some(binding) = &field.binding {
                write!(buf, "{} <- ", binding.name)?;
            }
            field.pattern.display_into(buf, grammar, level)?;
        }
        buf.write_char(']')
    }
}
