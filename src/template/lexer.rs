use super::TemplateError;

/// Piece of a template after comment removal
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment<'a> {
    Text(&'a str),
    /// Expression source between `{{` and `}}`; offset of its first byte
    Expr { source: &'a str, offset: usize },
}

/// Split a template into literal text and expression segments
pub(crate) fn segments(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let bytes = template.as_bytes();
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'{' => {
                push_text(&mut out, &template[text_start..i]);
                let body_start = i + 2;
                let body_end = find_expression_end(template, body_start)
                    .ok_or_else(|| TemplateError::syntax(i, "unterminated '{{'"))?;
                out.push(Segment::Expr {
                    source: &template[body_start..body_end],
                    offset: body_start,
                });
                i = body_end + 2;
                text_start = i;
            }
            b'#' => {
                push_text(&mut out, &template[text_start..i]);
                let end = template[i + 2..]
                    .find("#}")
                    .ok_or_else(|| TemplateError::syntax(i, "unterminated comment"))?;
                i = i + 2 + end + 2;
                text_start = i;
            }
            b'%' => {
                return Err(TemplateError::Disallowed(format!(
                    "statement block at offset {}",
                    i
                )));
            }
            _ => i += 1,
        }
    }
    push_text(&mut out, &template[text_start..]);
    Ok(out)
}

fn push_text<'a>(out: &mut Vec<Segment<'a>>, text: &'a str) {
    if !text.is_empty() {
        out.push(Segment::Text(text));
    }
}

/// Position of the closing `}}`, skipping over string literals
fn find_expression_end(template: &str, start: usize) -> Option<usize> {
    let bytes = template.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

/// Expression token
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Assign,
}

/// Tokenize an expression; offsets are absolute within the template
pub(crate) fn tokenize(source: &str, base: usize) -> Result<Vec<(Token, usize)>, TemplateError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, ch) = chars[i];
        let offset = base + pos;
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' | ')' | '[' | ']' | ',' | '.' | '+' | '-' | '=' => {
                // A dot followed by a digit starts a float
                if ch == '.' && chars.get(i + 1).map_or(false, |(_, c)| c.is_ascii_digit()) {
                    let (token, next) = number(&chars, i, base)?;
                    tokens.push((token, offset));
                    i = next;
                    continue;
                }
                let token = match ch {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    _ => Token::Assign,
                };
                tokens.push((token, offset));
                i += 1;
            }
            '\'' | '"' => {
                let mut value = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let c = chars[j].1;
                    if c == '\\' {
                        let escaped = chars
                            .get(j + 1)
                            .map(|(_, c)| *c)
                            .ok_or_else(|| TemplateError::syntax(offset, "unterminated string"))?;
                        value.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                        j += 2;
                    } else if c == ch {
                        closed = true;
                        j += 1;
                        break;
                    } else {
                        value.push(c);
                        j += 1;
                    }
                }
                if !closed {
                    return Err(TemplateError::syntax(offset, "unterminated string"));
                }
                tokens.push((Token::Str(value), offset));
                i = j;
            }
            c if c.is_ascii_digit() => {
                let (token, next) = number(&chars, i, base)?;
                tokens.push((token, offset));
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                while j < chars.len() && (chars[j].1.is_alphanumeric() || chars[j].1 == '_') {
                    j += 1;
                }
                let end = chars.get(j).map(|(p, _)| *p).unwrap_or(source.len());
                tokens.push((Token::Ident(source[pos..end].to_string()), offset));
                i = j;
            }
            other => {
                return Err(TemplateError::syntax(
                    offset,
                    format!("unexpected character '{}'", other),
                ));
            }
        }
    }
    Ok(tokens)
}

fn number(chars: &[(usize, char)], start: usize, base: usize) -> Result<(Token, usize), TemplateError> {
    let mut j = start;
    let mut text = String::new();
    let mut is_float = false;
    while j < chars.len() {
        let c = chars[j].1;
        if c.is_ascii_digit() || c == '_' {
            if c != '_' {
                text.push(c);
            }
        } else if c == '.' && !is_float {
            // `1.isoformat` is not a float; require a digit after the dot
            if !chars.get(j + 1).map_or(false, |(_, c)| c.is_ascii_digit()) && !text.is_empty() {
                break;
            }
            is_float = true;
            text.push(c);
        } else {
            break;
        }
        j += 1;
    }
    let offset = base + chars[start].0;
    let token = if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| TemplateError::syntax(offset, format!("invalid number '{}'", text)))?
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| TemplateError::syntax(offset, format!("invalid number '{}'", text)))?
    };
    Ok((token, j))
}
