//! Recursive descent parser for grammar source.
//!
//! ```text
//! File     := 'meta' '{' (Rule | '---' | Choice ';'?)* '}'
//! Rule     := Ident ':=' Choice ';'
//! Choice   := Unary ('|' Unary)*
//! Unary    := 'repeat' Unary | '!' Unary | Primary (':' String)?
//! Primary  := Ident | String | '(' Choice ')' | '[' (Field ','?)* ']' ('=>' Expr)?
//! Field    := (Ident ':' | Ident '<-')? Choice
//! ```
//!
//! `name: "text"` is read as a rule reference with an override name, a label bound to a
//! literal is written `name <- "text"`.

use metagram_runtime::expr::{AssignOp, BinOp};

use crate::{
    ast::{Block, Expr, ExprKind, Field, File, Name, Pattern, PatternKind, RuleDef, Stmt, StmtKind},
    error::Error,
    lexer::{lex, Lexer, Token, TokenKind, TokenKind::*},
    literal::extract_literal,
    span::{Span, Spanned},
};

pub type PResult<T> = Result<T, Spanned<Error>>;

/// Limit on nested patterns, expressions and blocks, every later pass recurses over the tree.
const MAX_NESTING: u32 = 128;

pub fn parse(src: &str) -> PResult<File> {
    let tokens = lex(&mut Lexer::new(src.as_bytes()));
    Parser::new(src, tokens).file()
}

pub struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: u32,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, tokens: Vec<Token>) -> Parser<'a> {
        Parser {
            src,
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn nth(&self, lookahead: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + lookahead).map(|t| t.kind)
    }

    fn peek(&self) -> Option<TokenKind> {
        self.nth(0)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map_or(Span::at(self.src.len() as u32), |t| t.span)
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(Span::at(0), |t| t.span)
    }

    fn advance(&mut self) -> Span {
        let span = self.current_span();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        span
    }

    fn token(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected<T>(&self, expected: &str) -> PResult<T> {
        let found = match self.tokens.get(self.pos) {
            None => "end of input".to_owned(),
            Some(Token {
                kind: ErrorToken,
                span,
            }) => {
                let text = span.as_str(self.src);
                if text.starts_with('"') {
                    "unterminated string literal".to_owned()
                } else {
                    format!("invalid character `{text}`")
                }
            }
            Some(token) => token.kind.describe().to_owned(),
        };
        Err(Spanned::new(
            format!("expected {expected}, found {found}").into(),
            self.current_span(),
        ))
    }

    fn descend(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(Spanned::new("Nesting is too deep".into(), self.current_span()));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let depth = self.depth;
        self.descend()?;
        let result = parse(self);
        self.depth = depth;
        result
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Span> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            self.unexpected(kind.describe())
        }
    }

    fn ident(&mut self) -> PResult<Name> {
        let span = self.expect(Ident)?;
        Ok(Spanned::new(span.as_str(self.src).into(), span))
    }

    fn string(&mut self) -> PResult<Spanned<Box<str>>> {
        let span = self.expect(String)?;
        let text = extract_literal(self.src, span)?;
        Ok(Spanned::new(text.into(), span))
    }

    pub fn file(&mut self) -> PResult<File> {
        self.expect(MetaKeyword)?;
        self.expect(LCurly)?;

        let mut file = File {
            rules: Vec::new(),
            separators: Vec::new(),
            starts: Vec::new(),
            close: Span::default(),
        };

        while !self.at(RCurly) {
            if self.at(Dashes) {
                file.separators.push(self.advance());
            } else if self.at(Ident) && self.nth(1) == Some(Define) {
                file.rules.push(self.rule()?);
            } else if file.separators.is_empty() {
                return self.unexpected("rule definition");
            } else {
                file.starts.push(self.choice()?);
                if !self.token(Semicolon) {
                    self.token(Comma);
                }
            }
        }

        file.close = self.expect(RCurly)?;
        if self.peek().is_some() {
            return self.unexpected("end of input");
        }
        Ok(file)
    }

    fn rule(&mut self) -> PResult<RuleDef> {
        let name = self.ident()?;
        self.expect(Define)?;
        let pattern = self.choice()?;
        self.expect(Semicolon)?;
        Ok(RuleDef { name, pattern })
    }

    fn choice(&mut self) -> PResult<Pattern> {
        let first = self.unary()?;
        if !self.at(Pipe) {
            return Ok(first);
        }

        let mut alternatives = vec![first];
        while self.token(Pipe) {
            alternatives.push(self.unary()?);
        }
        let span = alternatives[0].span.join(self.prev_span());
        Ok(Pattern {
            kind: PatternKind::Choice(alternatives),
            span,
        })
    }

    fn unary(&mut self) -> PResult<Pattern> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> PResult<Pattern> {
        let start = self.current_span();
        let kind = if self.token(RepeatKeyword) {
            PatternKind::Repeat(Box::new(self.unary()?))
        } else if self.token(Bang) {
            PatternKind::Not(Box::new(self.unary()?))
        } else {
            let pattern = self.primary()?;
            if !(self.at(Colon) && self.nth(1) == Some(String)) {
                return Ok(pattern);
            }
            self.advance();
            PatternKind::Rename(Box::new(pattern), self.string()?)
        };
        Ok(Pattern {
            kind,
            span: start.join(self.prev_span()),
        })
    }

    fn primary(&mut self) -> PResult<Pattern> {
        let start = self.current_span();
        let kind = match self.peek() {
            Some(Ident) => PatternKind::Name(self.ident()?.inner),
            Some(String) => PatternKind::Literal(self.string()?.inner),
            Some(LParen) => {
                self.advance();
                let inner = self.choice()?;
                self.expect(RParen)?;
                inner.kind
            }
            Some(LBracket) => self.sequence()?,
            _ => return self.unexpected("pattern"),
        };
        Ok(Pattern {
            kind,
            span: start.join(self.prev_span()),
        })
    }

    fn sequence(&mut self) -> PResult<PatternKind> {
        self.expect(LBracket)?;
        let mut fields = Vec::new();
        while !self.at(RBracket) {
            fields.push(self.field()?);
            if !self.token(Comma) {
                break;
            }
        }
        self.expect(RBracket)?;

        let action = if self.token(FatArrow) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        Ok(PatternKind::Sequence { fields, action })
    }

    fn field(&mut self) -> PResult<Field> {
        let labeled = self.at(Ident)
            && match self.nth(1) {
                Some(Colon) => self.nth(2) != Some(String),
                Some(BindArrow) => true,
                _ => false,
            };

        let label = if labeled {
            let name = self.ident()?;
            self.advance();
            Some(name)
        } else {
            None
        };

        let pattern = self.choice()?;
        Ok(Field { label, pattern })
    }

    pub fn expr(&mut self) -> PResult<Expr> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(EqEq) => BinOp::Eq,
            Some(Ne) => BinOp::Ne,
            Some(Lt) => BinOp::Lt,
            Some(Le) => BinOp::Le,
            Some(Gt) => BinOp::Gt,
            Some(Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.additive()?;
        Ok(binary(op, lhs, rhs))
    }

    // operator chains build left-nested trees, each operator counts as a level
    fn additive(&mut self) -> PResult<Expr> {
        let depth = self.depth;
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Plus) => BinOp::Add,
                Some(Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            self.descend()?;
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let depth = self.depth;
        let mut lhs = self.postfix()?;
        while self.token(Star) {
            self.descend()?;
            let rhs = self.postfix()?;
            lhs = binary(BinOp::Mul, lhs, rhs);
        }
        self.depth = depth;
        Ok(lhs)
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let depth = self.depth;
        let mut expr = self.atom()?;
        loop {
            let start = expr.span;
            if self.at(LBracket) || self.at(Dot) {
                self.descend()?;
            }
            let kind = if self.token(LBracket) {
                let index = self.expr()?;
                self.expect(RBracket)?;
                ExprKind::Index(Box::new(expr), Box::new(index))
            } else if self.token(Dot) {
                let name = self.ident()?;
                ExprKind::Field(Box::new(expr), name)
            } else {
                self.depth = depth;
                return Ok(expr);
            };
            expr = Expr {
                kind,
                span: start.join(self.prev_span()),
            };
        }
    }

    fn atom(&mut self) -> PResult<Expr> {
        self.nested(Self::atom_inner)
    }

    fn atom_inner(&mut self) -> PResult<Expr> {
        let start = self.current_span();
        let kind = match self.peek() {
            Some(Number) => {
                let span = self.advance();
                self.number(span, false)?
            }
            Some(Minus) if self.nth(1) == Some(Number) => {
                self.advance();
                let span = self.advance();
                self.number(span, true)?
            }
            Some(String) => ExprKind::Str(self.string()?.inner),
            Some(TrueKeyword) => {
                self.advance();
                ExprKind::Bool(true)
            }
            Some(FalseKeyword) => {
                self.advance();
                ExprKind::Bool(false)
            }
            Some(NullKeyword) => {
                self.advance();
                ExprKind::Null
            }
            Some(Ident) => {
                let name = self.ident()?;
                if self.token(LParen) {
                    ExprKind::Call(name, self.exprs_until(RParen)?)
                } else {
                    ExprKind::Name(name.inner)
                }
            }
            Some(LParen) => {
                self.advance();
                let inner = self.expr()?;
                self.expect(RParen)?;
                inner.kind
            }
            Some(LBracket) => {
                self.advance();
                ExprKind::List(self.exprs_until(RBracket)?)
            }
            Some(LCurly) => self.curly()?,
            _ => return self.unexpected("expression"),
        };
        Ok(Expr {
            kind,
            span: start.join(self.prev_span()),
        })
    }

    fn number(&self, span: Span, negative: bool) -> PResult<ExprKind> {
        let text = span.as_str(self.src);
        let sign = if negative { "-" } else { "" };
        let text = format!("{sign}{text}");

        let kind = if text.contains('.') {
            text.parse().map(ExprKind::Float).ok()
        } else {
            text.parse().map(ExprKind::Int).ok()
        };
        kind.ok_or_else(|| Spanned::new("Integer literal is out of range".into(), span))
    }

    /// Comma separated expressions, consumes the closing token.
    fn exprs_until(&mut self, close: TokenKind) -> PResult<Vec<Expr>> {
        let mut exprs = Vec::new();
        while !self.at(close) {
            exprs.push(self.expr()?);
            if !self.token(Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(exprs)
    }

    /// `{}` and `{ name: ...` start a record, anything else is a block.
    fn curly(&mut self) -> PResult<ExprKind> {
        let is_record = self.nth(1) == Some(RCurly)
            || (self.nth(1) == Some(Ident) && self.nth(2) == Some(Colon));

        if !is_record {
            return Ok(ExprKind::Block(self.block()?));
        }

        self.expect(LCurly)?;
        let mut fields = Vec::new();
        while !self.at(RCurly) {
            let name = self.ident()?;
            self.expect(Colon)?;
            let value = self.expr()?;
            fields.push((name, value));
            if !self.token(Comma) {
                break;
            }
        }
        self.expect(RCurly)?;
        Ok(ExprKind::Record(fields))
    }

    fn block(&mut self) -> PResult<Block> {
        self.nested(Self::block_inner)
    }

    fn block_inner(&mut self) -> PResult<Block> {
        self.expect(LCurly)?;
        let mut block = Block::default();
        while !self.at(RCurly) {
            match self.peek() {
                Some(LetKeyword | ForKeyword | IfKeyword | BreakKeyword) => {
                    block.stmts.push(self.stmt()?)
                }
                Some(Ident) if matches!(self.nth(1), Some(Eq | PlusEq)) => {
                    block.stmts.push(self.stmt()?)
                }
                _ => {
                    // the value of the block, must be last
                    block.tail = Some(Box::new(self.expr()?));
                    break;
                }
            }
        }
        self.expect(RCurly)?;
        Ok(block)
    }

    /// Statements may omit the `;` before a closing `}`.
    fn semicolon(&mut self) -> PResult<()> {
        if self.token(Semicolon) || self.at(RCurly) {
            Ok(())
        } else {
            self.unexpected("`;`")
        }
    }

    fn stmt(&mut self) -> PResult<Stmt> {
        let start = self.current_span();
        let kind = match self.peek() {
            Some(LetKeyword) => {
                self.advance();
                let mutable = self.token(MutKeyword);
                let name = self.ident()?;
                self.expect(Eq)?;
                let value = self.expr()?;
                self.semicolon()?;
                StmtKind::Let {
                    name,
                    mutable,
                    value,
                }
            }
            Some(ForKeyword) => {
                self.advance();
                let name = self.ident()?;
                self.expect(InKeyword)?;
                let start = self.expr()?;
                self.expect(DotDot)?;
                let end = self.expr()?;
                let body = self.block()?;
                self.token(Semicolon);
                StmtKind::For {
                    name,
                    start,
                    end,
                    body,
                }
            }
            Some(IfKeyword) => {
                self.advance();
                let cond = self.expr()?;
                let then = self.block()?;
                let otherwise = if !self.token(ElseKeyword) {
                    None
                } else if self.at(IfKeyword) {
                    let nested = self.stmt()?;
                    Some(Block {
                        stmts: vec![nested],
                        tail: None,
                    })
                } else {
                    Some(self.block()?)
                };
                self.token(Semicolon);
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            Some(BreakKeyword) => {
                self.advance();
                self.semicolon()?;
                StmtKind::Break
            }
            Some(Ident) => {
                let name = self.ident()?;
                let op = if self.token(PlusEq) {
                    AssignOp::Append
                } else {
                    self.expect(Eq)?;
                    AssignOp::Set
                };
                let value = self.expr()?;
                self.semicolon()?;
                StmtKind::Assign { name, op, value }
            }
            _ => return self.unexpected("statement"),
        };
        Ok(Stmt {
            kind,
            span: start.join(self.prev_span()),
        })
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr {
        span: lhs.span.join(rhs.span),
        kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_at(src: &str) -> (Span, std::string::String) {
        let err = parse(src).unwrap_err();
        (err.span, err.inner.into_owned())
    }

    #[test]
    fn test_file() {
        let src = r#"
meta {
    line := [text: str] => text;
    person := [first: str, lines <- repeat line:"l", "end" | !str] => { first: first };
    -----
    person
}"#;
        let file = parse(src).unwrap();
        assert_eq!(file.rules.len(), 2);
        assert_eq!(file.separators.len(), 1);
        assert_eq!(file.starts.len(), 1);
        assert_eq!(&*file.rules[1].name.inner, "person");

        let PatternKind::Sequence { fields, action } = &file.rules[1].pattern.kind else {
            panic!("expected a sequence");
        };
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1].label.as_ref().map(|l| &*l.inner), Some("lines"));
        assert_eq!(fields[1].pattern.rename().map(|r| &*r.inner), Some("l"));
        assert_eq!(fields[1].pattern.callee(), Some("line"));
        assert!(fields[2].label.is_none());
        assert!(matches!(fields[2].pattern.kind, PatternKind::Choice(_)));
        assert!(matches!(
            action.as_deref(),
            Some(Expr {
                kind: ExprKind::Record(_),
                ..
            })
        ));
    }

    #[test]
    fn test_expressions() {
        let src = "meta { x := [] => { let mut s = \"\"; for i in 0..len(xs) { if xs[i].a == -1 { break } else if true { s += \"a\" } } s };\n---\nx }";
        let file = parse(src).unwrap();
        let PatternKind::Sequence {
            action: Some(action),
            ..
        } = &file.rules[0].pattern.kind
        else {
            panic!("expected an action");
        };
        let ExprKind::Block(block) = &action.kind else {
            panic!("expected a block");
        };
        assert_eq!(block.stmts.len(), 2);
        assert!(matches!(block.tail.as_deref().map(|t| &t.kind), Some(ExprKind::Name(n)) if &**n == "s"));
        assert!(matches!(
            block.stmts[0].kind,
            StmtKind::Let { mutable: true, .. }
        ));
    }

    #[test]
    fn test_precedence() {
        let mut p = Parser::new("1 + 2 * 3 < 10", lex(&mut Lexer::new(b"1 + 2 * 3 < 10")));
        let expr = p.expr().unwrap();
        let ExprKind::Binary(BinOp::Lt, lhs, _) = expr.kind else {
            panic!("expected a comparison");
        };
        let ExprKind::Binary(BinOp::Add, _, rhs) = lhs.kind else {
            panic!("expected an addition");
        };
        assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, ..)));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(
            error_at("meta { a := ; --- a }"),
            (Span::new(12, 13), "expected pattern, found `;`".into())
        );
        assert_eq!(
            error_at("meta { a := str --- a }"),
            (Span::new(16, 19), "expected `;`, found `---`".into())
        );
        assert_eq!(
            error_at("meta { a := \"x }"),
            (Span::new(12, 16), "expected pattern, found unterminated string literal".into())
        );
        assert_eq!(
            error_at("meta { a := str; }  }"),
            (Span::new(20, 21), "expected end of input, found `}`".into())
        );
        assert_eq!(
            error_at("meta { a := [] => 99999999999999999999; --- a }").1,
            "Integer literal is out of range"
        );
        assert_eq!(
            error_at("rules {}").1,
            "expected `meta`, found identifier"
        );
        assert_eq!(
            error_at("meta { str }").1,
            "expected rule definition, found identifier"
        );
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize| {
            format!(
                "meta {{ a := {}str{}; --- a }}",
                "(".repeat(depth),
                ")".repeat(depth)
            )
        };
        assert!(parse(&nested(100)).is_ok());

        let src = nested(100_000);
        let (span, message) = error_at(&src);
        assert_eq!(message, "Nesting is too deep");
        // the first paren past the limit
        assert_eq!(span, Span::new(12 + 128, 12 + 129));

        let chain = format!("meta {{ a := [] => {}1; --- a }}", "1 + ".repeat(10_000));
        assert_eq!(error_at(&chain).1, "Nesting is too deep");
        let chain = format!("meta {{ a := [] => {}1; --- a }}", "1 + ".repeat(100));
        assert!(parse(&chain).is_ok());

        let blocks = format!(
            "meta {{ a := [] => {}1{}; --- a }}",
            "{ ".repeat(10_000),
            " }".repeat(10_000)
        );
        assert_eq!(error_at(&blocks).1, "Nesting is too deep");
    }
}
