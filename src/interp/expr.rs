//! Interpolation expression grammar
//!
//! ```text
//! template  := (literal | "\${" | "${" expr "}")*
//! expr      := reference | resolver ":" [arg ("," arg)*]
//! reference := "."* key ("." key)*
//! arg       := quoted-string | template
//! ```

use plab_override::split_top_level;

/// One piece of a template string
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Expr(Expr),
}

/// A `${...}` body
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `${a.b}`, `${.sibling}`, `${..uncle}`
    Reference {
        text: String,
        /// Number of leading dots (0 = absolute)
        up: usize,
        path: Vec<String>,
    },
    /// `${name:arg,...}`
    Call { name: String, args: Vec<Arg> },
}

/// A resolver argument
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub segments: Vec<Segment>,
    /// Quoted arguments are always strings
    pub quoted: bool,
}

/// Split a string into literal text and expressions.
pub fn parse_template(text: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("\\${") {
            literal.push_str("${");
            rest = after;
        } else if let Some(after) = rest.strip_prefix("${") {
            let end = find_closing(after).ok_or_else(|| format!("unterminated '${{' in '{}'", text))?;
            let expr = parse_expr(&after[..end])?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Expr(expr));
            rest = &after[end + 1..];
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                literal.push(c);
            }
            rest = chars.as_str();
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Byte offset of the `}` closing an expression body.
fn find_closing(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(idx),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn parse_expr(body: &str) -> Result<Expr, String> {
    let body = body.trim();
    if body.is_empty() {
        return Err("empty interpolation '${}'".to_string());
    }

    let parts = split_top_level(body, ':')?;
    if parts.len() > 1 {
        let name = parts[0].trim();
        if !is_resolver_name(name) {
            return Err(format!("invalid resolver name '{}'", name));
        }
        let arg_text = &body[parts[0].len() + 1..];
        let args = if arg_text.trim().is_empty() {
            Vec::new()
        } else {
            split_top_level(arg_text, ',')?
                .into_iter()
                .map(parse_arg)
                .collect::<Result<Vec<_>, _>>()?
        };
        return Ok(Expr::Call {
            name: name.to_string(),
            args,
        });
    }

    parse_reference(body)
}

fn parse_reference(text: &str) -> Result<Expr, String> {
    let up = text.chars().take_while(|c| *c == '.').count();
    let rest = &text[up..];

    let path = if rest.is_empty() {
        if up == 0 {
            return Err("empty reference".to_string());
        }
        Vec::new()
    } else {
        rest.split('.')
            .map(|segment| {
                let valid = !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
                if valid {
                    Ok(segment.to_string())
                } else {
                    Err(format!("invalid reference '{}'", text))
                }
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(Expr::Reference {
        text: text.to_string(),
        up,
        path,
    })
}

fn parse_arg(raw: &str) -> Result<Arg, String> {
    let text = raw.trim();
    let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"');

    if let Some(q) = quote {
        if text.len() >= 2 && text.ends_with(q) {
            let inner = text[1..text.len() - 1].replace(&format!("\\{}", q), &q.to_string());
            return Ok(Arg {
                segments: parse_template(&inner)?,
                quoted: true,
            });
        }
        return Err(format!("unterminated quoted argument {}", text));
    }

    Ok(Arg {
        segments: parse_template(text)?,
        quoted: false,
    })
}

fn is_resolver_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
