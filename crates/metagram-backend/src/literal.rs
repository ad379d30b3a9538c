use crate::{
    error::Error,
    span::{Span, Spanned},
};

/// Decodes the body of a `"..."` token, `literal_span` covers the quotes.
pub fn extract_literal(src: &str, literal_span: Span) -> Result<String, Spanned<Error>> {
    let text = literal_span.as_str(src);
    let error = |offset: usize, message: Error| {
        let span = Span::at(literal_span.start() + offset as u32);
        Err(Spanned::new(message, span))
    };

    let Some(body) = text
        .strip_prefix('"')
        .and_then(|text| text.strip_suffix('"'))
    else {
        return error(text.len(), "Expected closing quote".into());
    };

    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((_, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = match chars.next() {
            Some((_, '\\')) => '\\',
            Some((_, '"')) => '"',
            Some((_, 'n')) => '\n',
            Some((_, 't')) => '\t',
            Some((_, 'r')) => '\r',
            Some((_, '0')) => '\0',
            Some((i, c)) => {
                return error(
                    i + 1,
                    format!("Unknown character escape '{}'", c.escape_default()).into(),
                )
            }
            None => return error(text.len(), "Expected closing quote".into()),
        };
        out.push(escaped);
    }

    Ok(out)
}

#[test]
fn test_extract() {
    let src = r#"x "a\n\"b\"\\" "\q""#;
    let literal = Span::new(2, 14);
    assert_eq!(extract_literal(src, literal).unwrap(), "a\n\"b\"\\");

    let bad = Span::new(15, 19);
    let err = extract_literal(src, bad).unwrap_err();
    assert_eq!(err.span, Span::at(17));
    assert_eq!(&*err.inner, "Unknown character escape 'q'");
}
