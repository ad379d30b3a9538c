//! Syntax tree of a grammar source file, names are unresolved.

use metagram_runtime::expr::{AssignOp, BinOp};

use crate::span::{Span, Spanned};

pub type Name = Spanned<Box<str>>;

#[derive(Clone, Debug)]
pub struct File {
    pub rules: Vec<RuleDef>,
    /// Every `---` separator, a well formed grammar has exactly one.
    pub separators: Vec<Span>,
    /// Patterns following the separator.
    pub starts: Vec<Pattern>,
    /// The closing `}` of the `meta` block.
    pub close: Span,
}

#[derive(Clone, Debug)]
pub struct RuleDef {
    pub name: Name,
    pub pattern: Pattern,
}

#[derive(Clone, Debug)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum PatternKind {
    /// A leaf type or a rule reference.
    Name(Box<str>),
    Literal(Box<str>),
    Sequence {
        fields: Vec<Field>,
        action: Option<Box<Expr>>,
    },
    Repeat(Box<Pattern>),
    Choice(Vec<Pattern>),
    Not(Box<Pattern>),
    /// `pattern:"name"`
    Rename(Box<Pattern>, Name),
}

impl Pattern {
    /// The name of the rule this pattern invokes, looking through `repeat`.
    pub fn callee(&self) -> Option<&str> {
        match &self.kind {
            PatternKind::Name(name) => Some(name),
            PatternKind::Repeat(inner) | PatternKind::Rename(inner, _) => inner.callee(),
            _ => None,
        }
    }

    /// The `:"name"` suffix, looking through `repeat`.
    pub fn rename(&self) -> Option<&Name> {
        match &self.kind {
            PatternKind::Rename(_, name) => Some(name),
            PatternKind::Repeat(inner) => inner.rename(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub label: Option<Name>,
    pub pattern: Pattern,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(Box<str>),
    Bool(bool),
    Null,
    Name(Box<str>),
    Index(Box<Expr>, Box<Expr>),
    Field(Box<Expr>, Name),
    Call(Name, Vec<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Record(Vec<(Name, Expr)>),
    Block(Block),
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub tail: Option<Box<Expr>>,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Let {
        name: Name,
        mutable: bool,
        value: Expr,
    },
    Assign {
        name: Name,
        op: AssignOp,
        value: Expr,
    },
    For {
        name: Name,
        start: Expr,
        end: Expr,
        body: Block,
    },
    If {
        cond: Expr,
        then: Block,
        otherwise: Option<Block>,
    },
    Break,
}
