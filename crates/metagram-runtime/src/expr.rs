//! Expression tree of action blocks.
//!
//! All names are resolved by the compiler: captures become `(depth, slot)` pairs into the
//! stack of sequences being matched, locals become slots in the per-evaluation local table.
//! The names are kept only for diagnostics and display.

use std::fmt::{self, Write};

use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
    pub fn is_comparison(self) -> bool {
        !matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul)
    }
}

#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Value),
    /// `depth` 0 is the sequence owning the action, 1 its enclosing sequence and so on.
    Capture {
        name: Box<str>,
        depth: u32,
        slot: u32,
    },
    Local {
        name: Box<str>,
        slot: u32,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        base: Box<Expr>,
        name: Box<str>,
    },
    /// Builtins are looked up by name when evaluated.
    Call {
        name: Box<str>,
        args: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    List(Vec<Expr>),
    Record(Vec<(Box<str>, Expr)>),
    Block(Block),
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub tail: Option<Box<Expr>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssignOp {
    /// `x = value`
    Set,
    /// `x += value`
    Append,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Let {
        name: Box<str>,
        slot: u32,
        value: Expr,
    },
    Assign {
        name: Box<str>,
        slot: u32,
        op: AssignOp,
        value: Expr,
    },
    /// `for name in start..end { body }`, the range is evaluated once.
    For {
        name: Box<str>,
        slot: u32,
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

fn indent(buf: &mut dyn Write, level: usize) -> fmt::Result {
    for _ in 0..level {
        buf.write_str("    ")?;
    }
    Ok(())
}

impl Expr {
    pub fn display_into(&self, buf: &mut dyn Write, level: usize) -> fmt::Result {
        match self {
            Expr::Literal(a) => write!(buf, "{a}"),
            Expr::Capture { name, .. } | Expr::Local { name, .. } => buf.write_str(name),
            Expr::Index { base, index } => {
                base.display_into(buf, level)?;
                buf.write_char('[')?;
                index.display_into(buf, level)?;
                buf.write_char(']')
            }
            Expr::Field { base, name } => {
                base.display_into(buf, level)?;
                write!(buf, ".{name}")
            }
            Expr::Call { name, args } => {
                write!(buf, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        buf.write_str(", ")?;
                    }
                    arg.display_into(buf, level)?;
                }
                buf.write_char(')')
            }
            Expr::Binary { op, lhs, rhs } => {
                buf.write_char('(')?;
                lhs.display_into(buf, level)?;
                write!(buf, " {} ", op.symbol())?;
                rhs.display_into(buf, level)?;
                buf.write_char(')')
            }
            Expr::List(items) => {
                buf.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.write_str(", ")?;
                    }
                    item.display_into(buf, level)?;
                }
                buf.write_char(']')
            }
            Expr::Record(fields) => {
                buf.write_char('{')?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        buf.write_char(',')?;
                    }
                    write!(buf, " {name}: ")?;
                    value.display_into(buf, level)?;
                }
                buf.write_str(" }")
            }
            Expr::Block(block) => block.display_into(buf, level),
        }
    }
}

impl Block {
    pub fn display_into(&self, buf: &mut dyn Write, level: usize) -> fmt::Result {
        buf.write_str("{\n")?;
        for stmt in &self.stmts {
            indent(buf, level + 1)?;
            stmt.display_into(buf, level + 1)?;
            buf.write_char('\n')?;
        }
        if let Some(tail) = &self.tail {
            indent(buf, level + 1)?;
            tail.display_into(buf, level + 1)?;
            buf.write_char('\n')?;
        }
        indent(buf, level)?;
        buf.write_char('}')
    }
}

impl Stmt {
    pub fn display_into(&self, buf: &mut dyn Write, level: usize) -> fmt::Result {
        match self {
            Stmt::Let { name, value, .. } => {
                write!(buf, "let mut {name} = ")?;
                value.display_into(buf, level)?;
                buf.write_char(';')
            }
            Stmt::Assign {
                name, op, value, ..
            } => {
                let op = match op {
                    AssignOp::Set => "=",
                    AssignOp::Append => "+=",
                };
                write!(buf, "{name} {op} ")?;
                value.display_into(buf, level)?;
                buf.write_char(';')
            }
            Stmt::For {
                name,
                start,
                end,
                body,
                ..
            } => {
                write!(buf, "for {name} in ")?;
                start.display_into(buf, level)?;
                buf.write_str("..")?;
                end.display_into(buf, level)?;
                buf.write_char(' ')?;
                body.display_into(buf, level)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                buf.write_str("if ")?;
                cond.display_into(buf, level)?;
                buf.write_char(' ')?;
                then.display_into(buf, level)?;
                if let Some(otherwise) = otherwise {
                    buf.write_str(" else ")?;
                    otherwise.display_into(buf, level)?;
                }
                Ok(())
            }
            Stmt::Break => buf.write_str("break;"),
        }
    }
}
