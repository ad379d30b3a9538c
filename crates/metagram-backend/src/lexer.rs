use crate::span::Span;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[rustfmt::skip]
pub enum TokenKind {
    Ident, String, Number,
    /// Three or more `-`, separates the rules from the start designation.
    Dashes,
    ErrorToken,

    LParen, RParen, LCurly, RCurly, LBracket, RBracket,
    Comma, Colon, Semicolon, Dot, DotDot, Pipe, Bang,
    Define, FatArrow, BindArrow,
    Plus, PlusEq, Minus, Star,
    Eq, EqEq, Ne, Lt, Le, Gt, Ge,

    MetaKeyword, RepeatKeyword, LetKeyword, MutKeyword, ForKeyword, InKeyword,
    IfKeyword, ElseKeyword, BreakKeyword, TrueKeyword, FalseKeyword, NullKeyword,
}

impl TokenKind {
    /// How the token is shown in syntax errors.
    pub fn describe(self) -> &'static str {
        use TokenKind::*;
        match self {
            Ident => "identifier",
            String => "string literal",
            Number => "number",
            Dashes => "`---`",
            ErrorToken => "invalid character",
            LParen => "`(`",
            RParen => "`)`",
            LCurly => "`{`",
            RCurly => "`}`",
            LBracket => "`[`",
            RBracket => "`]`",
            Comma => "`,`",
            Colon => "`:`",
            Semicolon => "`;`",
            Dot => "`.`",
            DotDot => "`..`",
            Pipe => "`|`",
            Bang => "`!`",
            Define => "`:=`",
            FatArrow => "`=>`",
            BindArrow => "`<-`",
            Plus => "`+`",
            PlusEq => "`+=`",
            Minus => "`-`",
            Star => "`*`",
            Eq => "`=`",
            EqEq => "`==`",
            Ne => "`!=`",
            Lt => "`<`",
            Le => "`<=`",
            Gt => "`>`",
            Ge => "`>=`",
            MetaKeyword => "`meta`",
            RepeatKeyword => "`repeat`",
            LetKeyword => "`let`",
            MutKeyword => "`mut`",
            ForKeyword => "`for`",
            InKeyword => "`in`",
            IfKeyword => "`if`",
            ElseKeyword => "`else`",
            BreakKeyword => "`break`",
            TrueKeyword => "`true`",
            FalseKeyword => "`false`",
            NullKeyword => "`null`",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub struct Lexer<'a> {
    str: &'a [u8],
    pos: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(str: &'a [u8]) -> Self {
        assert!(str.len() <= u32::MAX as usize);
        Self { str, pos: 0 }
    }

    pub fn pos(&self) -> u32 {
        self.pos
    }

    pub fn span_since(&self, start: u32) -> Span {
        Span::new(start, self.pos)
    }

    pub fn restore_pos(&mut self, pos: u32) {
        debug_assert!(pos as usize <= self.str.len());
        self.pos = pos;
    }

    pub fn is_empty(&self) -> bool {
        self.pos as usize == self.str.len()
    }

    pub fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    pub fn peek(&self) -> Option<u8> {
        self.str.get(self.pos as usize).copied()
    }

    pub fn peek_nth(&self, n: u32) -> Option<u8> {
        self.str.get((self.pos + n) as usize).copied()
    }

    pub fn consume(&mut self, value: u8) -> bool {
        if self.peek() == Some(value) {
            self.next();
            true
        } else {
            false
        }
    }

    pub fn consume_while(&mut self, predicate: impl Fn(u8) -> bool) -> Span {
        let start = self.pos();
        while let Some(c) = self.peek() {
            if predicate(c) {
                self.next();
            } else {
                break;
            }
        }
        self.span_since(start)
    }
}

fn keyword(ident: &[u8]) -> Option<TokenKind> {
    use TokenKind::*;
    let kind = match ident {
        b"meta" => MetaKeyword,
        b"repeat" => RepeatKeyword,
        b"let" => LetKeyword,
        b"mut" => MutKeyword,
        b"for" => ForKeyword,
        b"in" => InKeyword,
        b"if" => IfKeyword,
        b"else" => ElseKeyword,
        b"break" => BreakKeyword,
        b"true" => TrueKeyword,
        b"false" => FalseKeyword,
        b"null" => NullKeyword,
        _ => return None,
    };
    Some(kind)
}

/// Splits the grammar source into tokens, whitespace and `//` comments are dropped.
pub fn lex(l: &mut Lexer) -> Vec<Token> {
    use TokenKind::*;

    let mut tokens = Vec::new();
    while !l.is_empty() {
        let pos = l.pos();
        let Some(c) = l.next() else {
            break;
        };

        let kind = match c {
            b'\t' | b'\n' | b'\x0C' | b'\r' | b' ' => {
                l.consume_while(|c| c.is_ascii_whitespace());
                continue;
            }
            b'/' if l.peek() == Some(b'/') => {
                l.consume_while(|c| c != b'\n');
                continue;
            }
            b'"' => {
                // escapes are validated when the literal is extracted
                loop {
                    match l.next() {
                        Some(b'\\') => {
                            l.next();
                        }
                        Some(b'"') => break String,
                        Some(b'\n') | None => break ErrorToken,
                        Some(_) => {}
                    }
                }
            }
            b'0'..=b'9' => {
                l.consume_while(|c| c.is_ascii_digit());
                if l.peek() == Some(b'.') && l.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
                    l.next();
                    l.consume_while(|c| c.is_ascii_digit());
                }
                Number
            }
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => {
                l.consume_while(|c| matches!(c, b'_' | b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9'));
                let span = l.span_since(pos);
                keyword(&l.str[span.start() as usize..span.end() as usize]).unwrap_or(Ident)
            }
            b'-' => {
                if l.consume(b'-') {
                    if l.consume(b'-') {
                        l.consume_while(|c| c == b'-');
                        Dashes
                    } else {
                        // `--` is two minus signs
                        l.restore_pos(pos + 1);
                        Minus
                    }
                } else {
                    Minus
                }
            }
            b':' if l.consume(b'=') => Define,
            b':' => Colon,
            b'=' if l.consume(b'>') => FatArrow,
            b'=' if l.consume(b'=') => EqEq,
            b'=' => Eq,
            b'<' if l.consume(b'-') => BindArrow,
            b'<' if l.consume(b'=') => Le,
            b'<' => Lt,
            b'>' if l.consume(b'=') => Ge,
            b'>' => Gt,
            b'!' if l.consume(b'=') => Ne,
            b'!' => Bang,
            b'+' if l.consume(b'=') => PlusEq,
            b'+' => Plus,
            b'.' if l.consume(b'.') => DotDot,
            b'.' => Dot,
            b'*' => Star,
            b',' => Comma,
            b';' => Semicolon,
            b'|' => Pipe,
            b'(' => LParen,
            b')' => RParen,
            b'{' => LCurly,
            b'}' => RCurly,
            b'[' => LBracket,
            b']' => RBracket,
            _ => {
                // skip the rest of a multibyte character
                l.consume_while(|c| (c & 0b1100_0000) == 0b1000_0000);
                ErrorToken
            }
        };

        let span = l.span_since(pos);
        debug_assert!(!span.is_empty());
        tokens.push(Token { kind, span });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(&mut Lexer::new(src.as_bytes()))
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_rule_tokens() {
        assert_eq!(
            kinds("person := [age: f64, lines <- repeat line:\"l\"] => age; // comment\n-----"),
            vec![
                Ident, Define, LBracket, Ident, Colon, Ident, Comma, Ident, BindArrow,
                RepeatKeyword, Ident, Colon, String, RBracket, FatArrow, Ident, Semicolon, Dashes
            ]
        );
    }

    #[test]
    fn test_expression_tokens() {
        assert_eq!(
            kinds("for i in 0..len(xs) { s += xs[i] + \"\\n\"; } a.b <= -1.5 != x--"),
            vec![
                ForKeyword, Ident, InKeyword, Number, DotDot, Ident, LParen, Ident, RParen,
                LCurly, Ident, PlusEq, Ident, LBracket, Ident, RBracket, Plus, String,
                Semicolon, RCurly, Ident, Dot, Ident, Le, Minus, Number, Ne, Ident, Minus, Minus
            ]
        );
    }

    #[test]
    fn test_spans() {
        let src = "a  \"x\\\"y\" 12.5 é";
        let tokens = lex(&mut Lexer::new(src.as_bytes()));
        let text: Vec<_> = tokens.iter().map(|t| t.span.as_str(src)).collect();
        assert_eq!(text, vec!["a", "\"x\\\"y\"", "12.5", "é"]);
        assert_eq!(tokens[3].kind, ErrorToken);

        assert_eq!(kinds("\"open\nx"), vec![ErrorToken, Ident]);
    }
}
