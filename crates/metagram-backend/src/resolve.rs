//! Lowers the syntax tree into the grammar model. Rule names become handles, labels become
//! slots in the frame of their sequence and action locals become slots in the local table.
//!
//! Rules form a single flat namespace. Inside a rule body an action sees the fields of its own
//! sequence and the fields of enclosing sequences matched before it, never anything from
//! another rule.

use std::collections::{hash_map::Entry, HashMap, HashSet};

use cranelift_entity::{EntityRef, PrimaryMap, SecondaryMap};
use metagram_runtime::{
    expr as e,
    grammar::{Action, Binding, Field, Leaf, Pattern, Rule, RuleHandle, RuleRef, Sequence},
    Value,
};

use crate::{
    ast::{self, ExprKind, Name, PatternKind, StmtKind},
    error::ErrorAccumulator,
    span::Span,
};

pub struct Lowered {
    pub rules: PrimaryMap<RuleHandle, Rule>,
    /// Span of each rule's name.
    pub spans: SecondaryMap<RuleHandle, Span>,
    pub start: Option<RuleHandle>,
}

pub struct ResolveCx<'a> {
    pub err: &'a ErrorAccumulator,
    pub name_to_rule: HashMap<&'a str, RuleHandle>,
}

impl<'a> ResolveCx<'a> {
    pub fn new(file: &'a ast::File, err: &'a ErrorAccumulator) -> ResolveCx<'a> {
        let mut name_to_rule = HashMap::new();

        // handles are assigned in definition order
        for (i, def) in file.rules.iter().enumerate() {
            let name = &*def.name.inner;
            if Leaf::from_name(name).is_some() {
                err.error(
                    def.name.span,
                    format_args!("Rule name `{name}` is reserved for a leaf type"),
                );
                continue;
            }
            match name_to_rule.entry(name) {
                Entry::Occupied(_) => {
                    err.error(def.name.span, format_args!("Duplicate rule name `{name}`"))
                }
                Entry::Vacant(v) => {
                    v.insert(RuleHandle::new(i));
                }
            }
        }

        ResolveCx { err, name_to_rule }
    }

    fn start(&self, file: &ast::File) -> Option<RuleHandle> {
        match file.separators.as_slice() {
            [] => {
                self.err
                    .error_static(file.close, "Missing `---` separator before the start rule");
                return None;
            }
            [_, extra @ ..] => {
                for &span in extra {
                    self.err.error_static(span, "Duplicate `---` separator");
                }
            }
        }

        let [first, rest @ ..] = file.starts.as_slice() else {
            self.err
                .error_static(file.close, "No start rule designated after `---`");
            return None;
        };

        for extra in rest {
            self.err
                .error_static(extra.span, "More than one start rule designated");
        }

        match &first.kind {
            PatternKind::Name(name) => {
                let handle = self.name_to_rule.get(&**name).copied();
                if handle.is_none() {
                    self.err
                        .error(first.span, format_args!("Unknown start rule `{name}`"));
                }
                handle
            }
            _ => {
                self.err
                    .error_static(first.span, "The start designation must be a rule name");
                None
            }
        }
    }
}

pub fn lower(file: &ast::File, err: &ErrorAccumulator) -> Lowered {
    let cx = ResolveCx::new(file, err);

    let mut rules = PrimaryMap::new();
    let mut spans = SecondaryMap::new();
    for def in &file.rules {
        let mut lowering = RuleLowering {
            cx: &cx,
            scopes: Vec::new(),
        };
        let pattern = lowering.pattern(&def.pattern);
        let handle = rules.push(Rule {
            name: def.name.inner.clone(),
            pattern,
        });
        spans[handle] = def.name.span;
    }

    Lowered {
        rules,
        spans,
        start: cx.start(file),
    }
}

/// Label name to slot, one scope per sequence being lowered.
type CaptureScope = HashMap<Box<str>, u32>;

struct RuleLowering<'c, 'a> {
    cx: &'c ResolveCx<'a>,
    scopes: Vec<CaptureScope>,
}

impl RuleLowering<'_, '_> {
    fn pattern(&mut self, pattern: &ast::Pattern) -> Pattern {
        match &pattern.kind {
            PatternKind::Name(name) => self.reference(name, pattern.span, None),
            PatternKind::Literal(text) => Pattern::Literal(text.clone()),
            PatternKind::Sequence { fields, action } => self.sequence(fields, action.as_deref()),
            PatternKind::Repeat(inner) => Pattern::Repeat(Box::new(self.pattern(inner))),
            PatternKind::Choice(alternatives) => {
                Pattern::Choice(alternatives.iter().map(|a| self.pattern(a)).collect())
            }
            PatternKind::Not(inner) => Pattern::Not(Box::new(self.pattern(inner))),
            PatternKind::Rename(inner, rename) => match &inner.kind {
                PatternKind::Name(name) if Leaf::from_name(name).is_none() => {
                    self.reference(name, inner.span, Some(rename.inner.clone()))
                }
                _ => {
                    self.cx.err.error_static(
                        rename.span,
                        "An override name can only follow a rule reference",
                    );
                    self.pattern(inner)
                }
            },
        }
    }

    fn reference(&self, name: &str, span: Span, rename: Option<Box<str>>) -> Pattern {
        if let Some(leaf) = Leaf::from_name(name) {
            return Pattern::Leaf(leaf);
        }
        match self.cx.name_to_rule.get(name) {
            Some(&rule) => Pattern::Rule(RuleRef { rule, rename }),
            None => {
                self.cx
                    .err
                    .error(span, format_args!("Unknown rule `{name}`"));
                Pattern::fail()
            }
        }
    }

    fn declare(&mut self, name: &str, span: Span, slot: u32) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        match scope.entry(name.into()) {
            Entry::Occupied(_) => self
                .cx
                .err
                .error(span, format_args!("Duplicate binding `{name}` in sequence")),
            Entry::Vacant(v) => {
                v.insert(slot);
            }
        }
    }

    fn sequence(&mut self, fields: &[ast::Field], action: Option<&ast::Expr>) -> Pattern {
        self.scopes.push(CaptureScope::new());

        let mut lowered = Vec::new();
        let mut slots = 0;
        for field in fields {
            // fields only see the bindings of the fields before them
            let pattern = self.pattern(&field.pattern);

            // the override name wins over the label, which wins over the callee's name
            let key = field
                .pattern
                .rename()
                .map(|r| (&*r.inner, r.span))
                .or(field.label.as_ref().map(|l| (&*l.inner, l.span)))
                .or_else(|| {
                    let callee = field.pattern.callee()?;
                    Leaf::from_name(callee)
                        .is_none()
                        .then_some((callee, field.pattern.span))
                });

            let binding = match key {
                Some((name, span)) => {
                    let slot = slots;
                    slots += 1;
                    self.declare(name, span, slot);
                    if let Some(label) = &field.label {
                        if &*label.inner != name {
                            self.declare(&label.inner, label.span, slot);
                        }
                    }
                    Some(Binding {
                        name: name.into(),
                        slot,
                    })
                }
                None => None,
            };

            lowered.push(Field { binding, pattern });
        }

        let sequence = Sequence {
            fields: lowered,
            slots,
        };
        let pattern = match action {
            Some(body) => {
                let mut lowering = ActionLowering {
                    err: self.cx.err,
                    captures: &self.scopes,
                    locals: vec![HashMap::new()],
                    next_local: 0,
                    loop_depth: 0,
                };
                let body = lowering.expr(body);
                Pattern::Action(Action {
                    sequence,
                    body,
                    locals: lowering.next_local,
                })
            }
            None => Pattern::Sequence(sequence),
        };

        self.scopes.pop();
        pattern
    }
}

#[derive(Clone, Copy)]
struct Local {
    slot: u32,
    mutable: bool,
}

enum Resolved {
    Local(Local),
    Capture { depth: u32, slot: u32 },
    Unbound,
}

struct ActionLowering<'s> {
    err: &'s ErrorAccumulator,
    captures: &'s [CaptureScope],
    locals: Vec<HashMap<Box<str>, Local>>,
    next_local: u32,
    /// Loops enclosing the current statement, expression blocks start over at zero.
    loop_depth: u32,
}

impl ActionLowering<'_> {
    fn lookup(&self, name: &str) -> Resolved {
        for scope in self.locals.iter().rev() {
            if let Some(&local) = scope.get(name) {
                return Resolved::Local(local);
            }
        }
        for (i, scope) in self.captures.iter().enumerate().rev() {
            if let Some(&slot) = scope.get(name) {
                let depth = (self.captures.len() - 1 - i) as u32;
                return Resolved::Capture { depth, slot };
            }
        }
        Resolved::Unbound
    }

    /// Every declaration gets a fresh slot so that shadowed locals stay intact.
    fn declare(&mut self, name: &Name, mutable: bool) -> u32 {
        let slot = self.next_local;
        self.next_local += 1;
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name.inner.clone(), Local { slot, mutable });
        }
        slot
    }

    fn unbound(&self, name: &str, span: Span) {
        self.err.error(span, format_args!("Unbound name `{name}`"));
    }

    fn expr(&mut self, expr: &ast::Expr) -> e::Expr {
        match &expr.kind {
            ExprKind::Int(a) => e::Expr::Literal(Value::Int(*a)),
            ExprKind::Float(a) => e::Expr::Literal(Value::Float(*a)),
            ExprKind::Str(a) => e::Expr::Literal(Value::Str(a.to_string())),
            ExprKind::Bool(a) => e::Expr::Literal(Value::Bool(*a)),
            ExprKind::Null => e::Expr::Literal(Value::Null),
            ExprKind::Name(name) => match self.lookup(name) {
                Resolved::Local(local) => e::Expr::Local {
                    name: name.clone(),
                    slot: local.slot,
                },
                Resolved::Capture { depth, slot } => e::Expr::Capture {
                    name: name.clone(),
                    depth,
                    slot,
                },
                Resolved::Unbound => {
                    self.unbound(name, expr.span);
                    e::Expr::Literal(Value::Null)
                }
            },
            ExprKind::Index(base, index) => e::Expr::Index {
                base: Box::new(self.expr(base)),
                index: Box::new(self.expr(index)),
            },
            ExprKind::Field(base, name) => e::Expr::Field {
                base: Box::new(self.expr(base)),
                name: name.inner.clone(),
            },
            ExprKind::Call(name, args) => e::Expr::Call {
                name: name.inner.clone(),
                args: args.iter().map(|a| self.expr(a)).collect(),
            },
            ExprKind::Binary(op, lhs, rhs) => e::Expr::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs)),
                rhs: Box::new(self.expr(rhs)),
            },
            ExprKind::List(items) => e::Expr::List(items.iter().map(|a| self.expr(a)).collect()),
            ExprKind::Record(fields) => {
                let mut seen = HashSet::new();
                let mut lowered = Vec::with_capacity(fields.len());
                for (name, value) in fields {
                    if !seen.insert(&*name.inner) {
                        self.err.error(
                            name.span,
                            format_args!("Duplicate field `{}` in record", name.inner),
                        );
                    }
                    lowered.push((name.inner.clone(), self.expr(value)));
                }
                e::Expr::Record(lowered)
            }
            ExprKind::Block(block) => {
                let loop_depth = std::mem::replace(&mut self.loop_depth, 0);
                let block = self.block(block);
                self.loop_depth = loop_depth;
                e::Expr::Block(block)
            }
        }
    }

    fn block(&mut self, block: &ast::Block) -> e::Block {
        self.locals.push(HashMap::new());
        let stmts = block.stmts.iter().map(|s| self.stmt(s)).collect();
        let tail = block.tail.as_ref().map(|t| Box::new(self.expr(t)));
        self.locals.pop();
        e::Block { stmts, tail }
    }

    fn stmt(&mut self, stmt: &ast::Stmt) -> e::Stmt {
        match &stmt.kind {
            StmtKind::Let {
                name,
                mutable,
                value,
            } => {
                // the initializer cannot see the variable it declares
                let value = self.expr(value);
                let slot = self.declare(name, *mutable);
                e::Stmt::Let {
                    name: name.inner.clone(),
                    slot,
                    value,
                }
            }
            StmtKind::Assign { name, op, value } => {
                let value = self.expr(value);
                let slot = match self.lookup(&name.inner) {
                    Resolved::Local(Local {
                        slot,
                        mutable: true,
                    }) => slot,
                    Resolved::Local(_) => {
                        self.err.error(
                            name.span,
                            format_args!("Cannot assign to `{}`, it is not declared `mut`", name.inner),
                        );
                        0
                    }
                    Resolved::Capture { .. } => {
                        self.err.error(
                            name.span,
                            format_args!("Cannot assign to capture `{}`", name.inner),
                        );
                        0
                    }
                    Resolved::Unbound => {
                        self.unbound(&name.inner, name.span);
                        0
                    }
                };
                e::Stmt::Assign {
                    name: name.inner.clone(),
                    slot,
                    op: *op,
                    value,
                }
            }
            StmtKind::For {
                name,
                start,
                end,
                body,
            } => {
                let start = self.expr(start);
                let end = self.expr(end);

                self.locals.push(HashMap::new());
                let slot = self.declare(name, false);
                self.loop_depth += 1;
                let body = self.block(body);
                self.loop_depth -= 1;
                self.locals.pop();

                e::Stmt::For {
                    name: name.inner.clone(),
                    slot,
                    start,
                    end,
                    body,
                }
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => e::Stmt::If {
                cond: self.expr(cond),
                then: self.block(then),
                otherwise: otherwise.as_ref().map(|b| self.block(b)),
            },
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.err
                        .error_static(stmt.span, "`break` outside of a loop");
                }
                e::Stmt::Break
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn lower_src(src: &str) -> (Lowered, Vec<String>) {
        let file = parse(src).unwrap();
        let err = ErrorAccumulator::new();
        let lowered = lower(&file, &err);
        let messages = err.get().iter().map(|e| e.inner.to_string()).collect();
        (lowered, messages)
    }

    #[test]
    fn test_bindings() {
        let (lowered, errors) = lower_src(
            r#"meta {
                line := [text: str] => text;
                doc := [title: str, lines <- repeat line:"body", line, "x", count: i64] => count;
                ---
                doc
            }"#,
        );
        assert!(errors.is_empty(), "{errors:?}");

        let doc = &lowered.rules[RuleHandle::new(1)];
        let Pattern::Action(action) = &doc.pattern else {
            panic!("expected an action");
        };
        let names: Vec<_> = action
            .sequence
            .fields
            .iter()
            .map(|f| f.binding.as_ref().map(|b| (&*b.name, b.slot)))
            .collect();
        assert_eq!(
            names,
            vec![
                Some(("title", 0)),
                Some(("body", 1)),
                Some(("line", 2)),
                None,
                Some(("count", 3))
            ]
        );
        assert_eq!(action.sequence.slots, 4);
        assert!(matches!(
            action.body,
            e::Expr::Capture {
                depth: 0,
                slot: 3,
                ..
            }
        ));
        assert_eq!(lowered.start, Some(RuleHandle::new(1)));
    }

    #[test]
    fn test_nested_scopes() {
        let (lowered, errors) = lower_src(
            r#"meta {
                doc := [a: str, b <- [x: str] => { let mut y = x; y += a; y }] => b;
                ---
                doc
            }"#,
        );
        assert!(errors.is_empty(), "{errors:?}");

        let Pattern::Action(outer) = &lowered.rules[RuleHandle::new(0)].pattern else {
            panic!("expected an action");
        };
        let Pattern::Action(inner) = &outer.sequence.fields[1].pattern else {
            panic!("expected an inner action");
        };
        assert_eq!(inner.locals, 1);
        let e::Expr::Block(block) = &inner.body else {
            panic!("expected a block");
        };
        assert!(matches!(
            &block.stmts[1],
            e::Stmt::Assign {
                value: e::Expr::Capture { depth: 1, slot: 0, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_semantic_errors() {
        let (_, errors) = lower_src(
            r#"meta {
                str := [x: str] => x;
                a := [x: str, x: f64] => y;
                a := missing;
                b := [n: i64] => { let k = 0; k = 1; n = 2; break; for i in 0..n { { break } } };
                c := [v: str] => { v: v, v: v };
                ---
                a
                b
            }"#,
        );
        assert_eq!(
            errors,
            vec![
                "Rule name `str` is reserved for a leaf type",
                "Duplicate rule name `a`",
                "Duplicate binding `x` in sequence",
                "Unbound name `y`",
                "Unknown rule `missing`",
                "Cannot assign to `k`, it is not declared `mut`",
                "Cannot assign to capture `n`",
                "`break` outside of a loop",
                "`break` outside of a loop",
                "Duplicate field `v` in record",
                "More than one start rule designated",
            ]
        );
    }

    #[test]
    fn test_start_errors() {
        let (_, errors) = lower_src("meta { a := str; b := f64; }");
        assert_eq!(errors, vec!["Missing `---` separator before the start rule"]);

        let (_, errors) = lower_src("meta { a := str; --- }");
        assert_eq!(errors, vec!["No start rule designated after `---`"]);

        let (_, errors) = lower_src("meta { a := str; --- repeat a }");
        assert_eq!(errors, vec!["The start designation must be a rule name"]);

        let (lowered, errors) = lower_src("meta { a := str; --- --- a }");
        assert_eq!(errors, vec!["Duplicate `---` separator"]);
        assert_eq!(lowered.start, Some(RuleHandle::new(0)));
    }
}
