//! Tree walking interpreter for action blocks.
//!
//! Captures are read in place through [`Operand`], only the parts of the capture tree an
//! expression actually produces are copied into owned values.

use crate::{
    capture::Capture,
    engine::Frame,
    error::ActionEvalError,
    expr::{AssignOp, BinOp, Block, Expr, Stmt},
    grammar::Action,
    value::{Record, Value},
};

type EvalResult<T> = Result<T, ActionEvalError>;

/// Evaluates the body of `action`, `frames` holds the bindings of the sequences being matched
/// with the action's own sequence last.
pub(crate) fn evaluate(action: &Action, frames: &[Frame<'_>]) -> EvalResult<Value> {
    let mut interpreter = Interpreter {
        frames,
        locals: vec![None; action.locals as usize],
    };
    interpreter.eval(&action.body)
}

enum Flow {
    Continue,
    Break,
}

enum Operand<'s, 'a> {
    Captured(&'s Capture<'a>),
    Borrowed(&'s Value),
    Owned(Value),
}

fn position(index: i64, len: usize) -> EvalResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or(ActionEvalError::IndexOutOfRange { index, len })
}

fn value_len(value: &Value) -> EvalResult<usize> {
    match value {
        Value::List(items) => Ok(items.len()),
        Value::Str(text) => Ok(text.chars().count()),
        other => Err(ActionEvalError::TypeMismatch {
            expected: "list or string",
            found: other.type_name(),
        }),
    }
}

impl<'s, 'a> Operand<'s, 'a> {
    fn type_name(&self) -> &'static str {
        match self {
            Operand::Captured(a) => a.type_name(),
            Operand::Borrowed(a) => a.type_name(),
            Operand::Owned(a) => a.type_name(),
        }
    }

    fn normalize(self) -> Self {
        match self {
            Operand::Captured(Capture::Value(value)) => Operand::Borrowed(value),
            other => other,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Operand::Captured(a) => a.to_value(),
            Operand::Borrowed(a) => a.clone(),
            Operand::Owned(a) => a,
        }
    }

    fn index(self, index: &Value) -> EvalResult<Self> {
        let index = match *index {
            Value::Int(a) => a,
            ref other => {
                return Err(ActionEvalError::TypeMismatch {
                    expected: "integer",
                    found: other.type_name(),
                })
            }
        };

        match self.normalize() {
            Operand::Captured(Capture::List(items)) => {
                Ok(Operand::Captured(&items[position(index, items.len())?]))
            }
            Operand::Borrowed(Value::List(items)) => {
                Ok(Operand::Borrowed(&items[position(index, items.len())?]))
            }
            Operand::Owned(Value::List(mut items)) => {
                let i = position(index, items.len())?;
                Ok(Operand::Owned(items.swap_remove(i)))
            }
            other => Err(ActionEvalError::TypeMismatch {
                expected: "list",
                found: other.type_name(),
            }),
        }
    }

    fn field(self, name: &str) -> EvalResult<Self> {
        let missing = || ActionEvalError::MissingField(name.to_owned());
        match self.normalize() {
            Operand::Captured(Capture::Record(fields)) => fields
                .iter()
                .find_map(|(n, c)| (*n == name).then_some(Operand::Captured(c)))
                .ok_or_else(missing),
            Operand::Borrowed(Value::Record(record)) => {
                record.get(name).map(Operand::Borrowed).ok_or_else(missing)
            }
            Operand::Owned(Value::Record(mut record)) => {
                record.remove(name).map(Operand::Owned).ok_or_else(missing)
            }
            other => Err(ActionEvalError::TypeMismatch {
                expected: "record",
                found: other.type_name(),
            }),
        }
    }

    fn len(self) -> EvalResult<usize> {
        match self.normalize() {
            Operand::Captured(Capture::List(items)) => Ok(items.len()),
            Operand::Captured(Capture::Text(text)) => Ok(text.chars().count()),
            Operand::Borrowed(value) => value_len(value),
            Operand::Owned(value) => value_len(&value),
            other => Err(ActionEvalError::TypeMismatch {
                expected: "list or string",
                found: other.type_name(),
            }),
        }
    }
}

struct Interpreter<'s, 'a> {
    frames: &'s [Frame<'a>],
    locals: Vec<Option<Value>>,
}

impl<'s, 'a> Interpreter<'s, 'a> {
    fn capture(&self, name: &str, depth: u32, slot: u32) -> EvalResult<&'s Capture<'a>> {
        let frames = self.frames;
        let undefined = || ActionEvalError::UndefinedVariable(name.to_owned());

        let index = frames
            .len()
            .checked_sub(depth as usize + 1)
            .ok_or_else(undefined)?;
        frames[index]
            .slots
            .get(slot as usize)
            .and_then(Option::as_ref)
            .ok_or_else(undefined)
    }

    fn local(&self, name: &str, slot: u32) -> EvalResult<&Value> {
        self.locals
            .get(slot as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| ActionEvalError::UndefinedVariable(name.to_owned()))
    }

    fn set_local(&mut self, name: &str, slot: u32, value: Value) -> EvalResult<()> {
        let local = self
            .locals
            .get_mut(slot as usize)
            .ok_or_else(|| ActionEvalError::UndefinedVariable(name.to_owned()))?;
        *local = Some(value);
        Ok(())
    }

    fn operand<'e>(&'e mut self, expr: &'e Expr) -> EvalResult<Operand<'e, 'a>> {
        match expr {
            Expr::Literal(value) => Ok(Operand::Borrowed(value)),
            Expr::Capture { name, depth, slot } => {
                Ok(Operand::Captured(self.capture(name, *depth, *slot)?))
            }
            Expr::Local { name, slot } => Ok(Operand::Borrowed(self.local(name, *slot)?)),
            Expr::Index { base, index } => {
                let index = self.eval(index)?;
                self.operand(base)?.index(&index)
            }
            Expr::Field { base, name } => self.operand(base)?.field(name),
            other => Ok(Operand::Owned(self.eval(other)?)),
        }
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Capture { .. } | Expr::Local { .. } | Expr::Index { .. } | Expr::Field { .. } => {
                Ok(self.operand(expr)?.into_value())
            }
            Expr::Call { name, args } => self.call(name, args),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs)
            }
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<EvalResult<Vec<_>>>()
                .map(Value::List),
            Expr::Record(fields) => {
                let mut record = Record::new();
                for (name, value) in fields {
                    let value = self.eval(value)?;
                    record.insert(&**name, value);
                }
                Ok(Value::Record(record))
            }
            Expr::Block(block) => {
                // the compiler rejects `break` outside of loops, so the flow is always Continue
                for stmt in &block.stmts {
                    self.exec(stmt)?;
                }
                match &block.tail {
                    Some(tail) => self.eval(tail),
                    None => Ok(Value::Null),
                }
            }
        }
    }

    fn exec_block(&mut self, block: &Block) -> EvalResult<Flow> {
        for stmt in &block.stmts {
            if let Flow::Break = self.exec(stmt)? {
                return Ok(Flow::Break);
            }
        }
        if let Some(tail) = &block.tail {
            self.eval(tail)?;
        }
        Ok(Flow::Continue)
    }

    fn exec(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        match stmt {
            Stmt::Let { name, slot, value }
            | Stmt::Assign {
                name,
                slot,
                op: AssignOp::Set,
                value,
            } => {
                let value = self.eval(value)?;
                self.set_local(name, *slot, value)?;
            }
            Stmt::Assign {
                name,
                slot,
                op: AssignOp::Append,
                value,
            } => {
                let rhs = self.eval(value)?;
                let current = self
                    .locals
                    .get_mut(*slot as usize)
                    .and_then(Option::take)
                    .ok_or_else(|| ActionEvalError::UndefinedVariable(name.to_string()))?;
                let value = append(current, rhs)?;
                self.set_local(name, *slot, value)?;
            }
            Stmt::For {
                name,
                slot,
                start,
                end,
                body,
            } => {
                let start = self.integer(start)?;
                let end = self.integer(end)?;
                for i in start..end {
                    self.set_local(name, *slot, Value::Int(i))?;
                    if let Flow::Break = self.exec_block(body)? {
                        break;
                    }
                }
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = match self.eval(cond)? {
                    Value::Bool(true) => Some(then),
                    Value::Bool(false) => otherwise.as_ref(),
                    other => {
                        return Err(ActionEvalError::TypeMismatch {
                            expected: "bool",
                            found: other.type_name(),
                        })
                    }
                };
                if let Some(branch) = branch {
                    return self.exec_block(branch);
                }
            }
            Stmt::Break => return Ok(Flow::Break),
        }
        Ok(Flow::Continue)
    }

    fn integer(&mut self, expr: &Expr) -> EvalResult<i64> {
        match self.eval(expr)? {
            Value::Int(a) => Ok(a),
            other => Err(ActionEvalError::TypeMismatch {
                expected: "integer",
                found: other.type_name(),
            }),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> EvalResult<Value> {
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ActionEvalError::Arity {
                    name: name.to_owned(),
                    expected,
                    found: args.len(),
                })
            }
        };

        match name {
            "len" => {
                arity(1)?;
                let len = self.operand(&args[0])?.len()?;
                i64::try_from(len)
                    .map(Value::Int)
                    .map_err(|_| ActionEvalError::Overflow)
            }
            "clone" => {
                arity(1)?;
                Ok(self.operand(&args[0])?.into_value())
            }
            "trim" => {
                arity(1)?;
                match self.eval(&args[0])? {
                    Value::Str(text) => Ok(Value::Str(text.trim().to_owned())),
                    other => Err(ActionEvalError::TypeMismatch {
                        expected: "string",
                        found: other.type_name(),
                    }),
                }
            }
            "str" => {
                arity(1)?;
                to_string(self.eval(&args[0])?)
            }
            "num" => {
                arity(1)?;
                to_float(self.eval(&args[0])?)
            }
            "int" => {
                arity(1)?;
                to_int(self.eval(&args[0])?)
            }
            _ => Err(ActionEvalError::UnknownBuiltin(name.to_owned())),
        }
    }
}

fn to_string(value: Value) -> EvalResult<Value> {
    match value {
        Value::Str(_) => Ok(value),
        Value::Null | Value::Bool(_) | Value::Int(_) => Ok(Value::Str(value.to_string())),
        Value::Float(a) => Ok(Value::Str(a.to_string())),
        other => Err(ActionEvalError::Conversion {
            value: other.to_string(),
            target: "string",
        }),
    }
}

fn to_float(value: Value) -> EvalResult<Value> {
    let error = |value: &Value| ActionEvalError::Conversion {
        value: value.to_string(),
        target: "float",
    };
    match value {
        Value::Float(_) => Ok(value),
        Value::Int(a) => Ok(Value::Float(a as f64)),
        Value::Str(ref text) => text
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| error(&value)),
        other => Err(error(&other)),
    }
}

fn to_int(value: Value) -> EvalResult<Value> {
    let error = |value: &Value| ActionEvalError::Conversion {
        value: value.to_string(),
        target: "integer",
    };
    match value {
        Value::Int(_) => Ok(value),
        Value::Float(a) => {
            if a.is_finite() && a.fract() == 0.0 && a.abs() < i64::MAX as f64 {
                Ok(Value::Int(a as i64))
            } else {
                Err(error(&value))
            }
        }
        Value::Str(ref text) => text
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| error(&value)),
        other => Err(error(&other)),
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match *value {
        Value::Int(a) => Some(a as f64),
        Value::Float(a) => Some(a),
        _ => None,
    }
}

fn mismatch(op: BinOp, lhs: &Value, rhs: &Value) -> ActionEvalError {
    ActionEvalError::OperandMismatch {
        op: op.symbol(),
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    }
}

/// `lhs += rhs`, strings and lists are extended in place.
fn append(lhs: Value, rhs: Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Str(mut a), Value::Str(b)) => {
            a.push_str(&b);
            Ok(Value::Str(a))
        }
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (lhs, rhs) => binary(BinOp::Add, lhs, rhs),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> EvalResult<Value> {
    if op.is_comparison() {
        return compare(op, &lhs, &rhs).map(Value::Bool);
    }

    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(mut a), Value::Str(b)) => {
            a.push_str(&b);
            Ok(Value::Str(a))
        }
        (BinOp::Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (op, Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                _ => a.checked_mul(b),
            };
            result.map(Value::Int).ok_or(ActionEvalError::Overflow)
        }
        (op, lhs, rhs) => match (as_float(&lhs), as_float(&rhs)) {
            (Some(a), Some(b)) => {
                let result = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    _ => a * b,
                };
                Ok(Value::Float(result))
            }
            _ => Err(mismatch(op, &lhs, &rhs)),
        },
    }
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> EvalResult<bool> {
    let equal = || match (as_float(lhs), as_float(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    };

    let ordering = match op {
        BinOp::Eq => return Ok(equal()),
        BinOp::Ne => return Ok(!equal()),
        _ => match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            _ => match (as_float(lhs), as_float(rhs)) {
                (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| mismatch(op, lhs, rhs))?,
                _ => return Err(mismatch(op, lhs, rhs)),
            },
        },
    };

    Ok(match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Sequence;

    fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }
    fn cap(name: &str, depth: u32, slot: u32) -> Expr {
        Expr::Capture {
            name: name.into(),
            depth,
            slot,
        }
    }
    fn local(name: &str, slot: u32) -> Expr {
        Expr::Local {
            name: name.into(),
            slot,
        }
    }
    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.into(),
            args,
        }
    }
    fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
    fn index(base: Expr, index: Expr) -> Expr {
        Expr::Index {
            base: Box::new(base),
            index: Box::new(index),
        }
    }
    fn action(body: Expr, locals: u32) -> Action {
        Action {
            sequence: Sequence::default(),
            body,
            locals,
        }
    }
    fn frame<'a>(slots: Vec<Capture<'a>>) -> Frame<'a> {
        Frame {
            slots: slots.into_iter().map(Some).collect(),
        }
    }

    /// let mut acc = ""; for i in 0..len(lines) { acc += lines[i] + "\n"; } { text: clone(acc) }
    fn accumulate() -> Action {
        let body = Block {
            stmts: vec![
                Stmt::Let {
                    name: "acc".into(),
                    slot: 0,
                    value: lit(""),
                },
                Stmt::For {
                    name: "i".into(),
                    slot: 1,
                    start: lit(0i64),
                    end: call("len", vec![cap("lines", 0, 0)]),
                    body: Block {
                        stmts: vec![Stmt::Assign {
                            name: "acc".into(),
                            slot: 0,
                            op: AssignOp::Append,
                            value: bin(
                                BinOp::Add,
                                index(cap("lines", 0, 0), local("i", 1)),
                                lit("\n"),
                            ),
                        }],
                        tail: None,
                    },
                },
            ],
            tail: Some(Box::new(Expr::Record(vec![(
                "text".into(),
                call("clone", vec![local("acc", 0)]),
            )]))),
        };
        action(Expr::Block(body), 2)
    }

    #[test]
    fn accumulates_lines() {
        let frames = [frame(vec![Capture::List(vec![
            Capture::Text("line1"),
            Capture::Text("line2"),
        ])])];

        let action = accumulate();
        let value = evaluate(&action, &frames).unwrap();
        let expected = Value::Record([("text", Value::from("line1\nline2\n"))].into_iter().collect());
        assert_eq!(value, expected);

        // a second evaluation starts from fresh locals
        assert_eq!(evaluate(&action, &frames).unwrap(), expected);

        let empty = [frame(vec![Capture::List(vec![])])];
        let value = evaluate(&action, &empty).unwrap();
        assert_eq!(value.as_record().unwrap().get("text"), Some(&Value::from("")));
    }

    #[test]
    fn reads_enclosing_frames() {
        let frames = [
            frame(vec![Capture::Text("outer")]),
            frame(vec![Capture::Int(2)]),
        ];
        let body = Expr::List(vec![cap("a", 1, 0), cap("b", 0, 0)]);
        let value = evaluate(&action(body, 0), &frames).unwrap();
        assert_eq!(value, Value::List(vec![Value::from("outer"), Value::Int(2)]));

        let body = cap("missing", 2, 0);
        assert_eq!(
            evaluate(&action(body, 0), &frames),
            Err(ActionEvalError::UndefinedVariable("missing".into()))
        );
    }

    #[test]
    fn field_access_on_captured_records() {
        let frames = [frame(vec![Capture::List(vec![Capture::Record(vec![
            ("name", Capture::Text("Ada")),
            ("age", Capture::Float(36.0)),
        ])])])];

        let body = Expr::Field {
            base: Box::new(index(cap("people", 0, 0), lit(0i64))),
            name: "age".into(),
        };
        assert_eq!(evaluate(&action(body, 0), &frames), Ok(Value::Float(36.0)));

        let body = Expr::Field {
            base: Box::new(index(cap("people", 0, 0), lit(0i64))),
            name: "photo".into(),
        };
        assert_eq!(
            evaluate(&action(body, 0), &frames),
            Err(ActionEvalError::MissingField("photo".into()))
        );
    }

    #[test]
    fn errors() {
        let frames = [frame(vec![Capture::List(vec![Capture::Text("x")])])];
        let run = |body: Expr| evaluate(&action(body, 0), &frames);

        assert_eq!(
            run(index(cap("xs", 0, 0), lit(1i64))),
            Err(ActionEvalError::IndexOutOfRange { index: 1, len: 1 })
        );
        assert_eq!(
            run(index(cap("xs", 0, 0), lit(-1i64))),
            Err(ActionEvalError::IndexOutOfRange { index: -1, len: 1 })
        );
        assert_eq!(
            run(call("upper", vec![lit("a")])),
            Err(ActionEvalError::UnknownBuiltin("upper".into()))
        );
        assert_eq!(
            run(call("len", vec![])),
            Err(ActionEvalError::Arity {
                name: "len".into(),
                expected: 1,
                found: 0
            })
        );
        assert_eq!(
            run(bin(BinOp::Add, lit("a"), lit(1i64))),
            Err(ActionEvalError::OperandMismatch {
                op: "+",
                lhs: "string",
                rhs: "integer"
            })
        );
        assert_eq!(
            run(call("len", vec![lit(1.5f64)])),
            Err(ActionEvalError::TypeMismatch {
                expected: "list or string",
                found: "float"
            })
        );
        assert_eq!(
            run(bin(BinOp::Add, lit(i64::MAX), lit(1i64))),
            Err(ActionEvalError::Overflow)
        );
    }

    #[test]
    fn arithmetic_and_conversions() {
        let frames: [Frame<'_>; 0] = [];
        let run = |body: Expr| evaluate(&action(body, 0), &frames);

        assert_eq!(run(bin(BinOp::Add, lit(1i64), lit(2i64))), Ok(Value::Int(3)));
        assert_eq!(run(bin(BinOp::Mul, lit(2i64), lit(1.5f64))), Ok(Value::Float(3.0)));
        assert_eq!(run(bin(BinOp::Eq, lit(36i64), lit(36.0f64))), Ok(Value::Bool(true)));
        assert_eq!(run(bin(BinOp::Lt, lit("a"), lit("b"))), Ok(Value::Bool(true)));
        assert_eq!(run(call("num", vec![lit(" 36.5 ")])), Ok(Value::Float(36.5)));
        assert_eq!(run(call("int", vec![lit(4.0f64)])), Ok(Value::Int(4)));
        assert_eq!(run(call("str", vec![lit(36.0f64)])), Ok(Value::from("36")));
        assert_eq!(run(call("trim", vec![lit("  x ")])), Ok(Value::from("x")));
        assert!(matches!(
            run(call("int", vec![lit(4.5f64)])),
            Err(ActionEvalError::Conversion { .. })
        ));
    }

    #[test]
    fn break_leaves_the_loop() {
        // let mut n = 0; for i in 0..10 { if i == 3 { break; } n += 1; } n
        let body = Block {
            stmts: vec![
                Stmt::Let {
                    name: "n".into(),
                    slot: 0,
                    value: lit(0i64),
                },
                Stmt::For {
                    name: "i".into(),
                    slot: 1,
                    start: lit(0i64),
                    end: lit(10i64),
                    body: Block {
                        stmts: vec![
                            Stmt::If {
                                cond: bin(BinOp::Eq, local("i", 1), lit(3i64)),
                                then: Block {
                                    stmts: vec![Stmt::Break],
                                    tail: None,
                                },
                                otherwise: None,
                            },
                            Stmt::Assign {
                                name: "n".into(),
                                slot: 0,
                                op: AssignOp::Append,
                                value: lit(1i64),
                            },
                        ],
                        tail: None,
                    },
                },
            ],
            tail: Some(Box::new(local("n", 0))),
        };
        assert_eq!(
            evaluate(&action(Expr::Block(body), 2), &[]),
            Ok(Value::Int(3))
        );
    }
}
