//! Value literal parser
//!
//! Parses the right-hand side of an override into config values:
//! - Scalars: `null`, `true`/`false`, integers, floats, quoted and bare strings
//! - Lists: `[a, b, [c]]`
//! - Dicts: `{k: v, other: [1, 2]}`
//! - Sweeps: bare comma lists `1,2,3`, `range(start, stop[, step])`, `choice(a, b)`
//!
//! Commas nested inside brackets, braces, parentheses, quotes or `${...}`
//! never split a value.

use serde_json::{Map, Number, Value};

/// Upper bound on the number of points a `range()` sweep may produce.
pub const MAX_RANGE_POINTS: usize = 10_000;

/// Parsed right-hand side of an override
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedValues {
    /// One value for plain assignments, several for sweeps
    pub values: Vec<Value>,
    /// True when the input was a comma list or a sweep function
    pub sweep: bool,
}

/// Parse an override right-hand side.
pub fn parse_value_list(input: &str) -> Result<ParsedValues, String> {
    let text = input.trim();

    if text.is_empty() {
        return Ok(ParsedValues {
            values: vec![Value::String(String::new())],
            sweep: false,
        });
    }

    if let Some(inner) = sweep_function_args(text, "range") {
        return Ok(ParsedValues {
            values: parse_range(inner)?,
            sweep: true,
        });
    }

    if let Some(inner) = sweep_function_args(text, "choice") {
        let values = split_top_level(inner, ',')?
            .into_iter()
            .map(parse_element)
            .collect::<Result<Vec<_>, _>>()?;
        if values.is_empty() {
            return Err("choice() needs at least one option".to_string());
        }
        return Ok(ParsedValues {
            values,
            sweep: true,
        });
    }

    let parts = split_top_level(text, ',')?;
    let sweep = parts.len() > 1;
    let values = parts
        .into_iter()
        .map(parse_element)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedValues { values, sweep })
}

/// Parse a single unquoted scalar token.
///
/// Anything that is not `null`, a boolean or a finite number stays a string.
pub fn parse_scalar(token: &str) -> Value {
    let text = token.trim();

    if text.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    if looks_numeric(text) {
        let cleaned: String = text.chars().filter(|c| *c != '_').collect();
        if let Ok(i) = cleaned.parse::<i64>() {
            return Value::Number(i.into());
        }
        if let Ok(f) = cleaned.parse::<f64>() {
            if let Some(n) = Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }

    Value::String(text.to_string())
}

/// Render a value back into override syntax.
///
/// Strings that would not survive a round trip as bare tokens are single-quoted.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if needs_quoting(s) {
                let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
                format!("'{}'", escaped)
            } else {
                s.clone()
            }
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", k, format_value(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}

fn needs_quoting(s: &str) -> bool {
    if s.is_empty() || s.trim() != s {
        return true;
    }
    if !matches!(parse_scalar(s), Value::String(_)) {
        return true;
    }
    if s.contains("${") {
        return s.contains(['\'', '"']);
    }
    s.contains([',', '[', ']', '{', '}', '(', ')', '\'', '"', ':', '\\'])
}

fn looks_numeric(text: &str) -> bool {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    body.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '.')
        && body.chars().any(|c| c.is_ascii_digit())
        && body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-' | '_'))
}

/// Return the argument text of `name(...)` when `text` is exactly such a call.
fn sweep_function_args<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    // `range(1,2),range(3,4)` is a list, not one call
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(inner)
}

fn parse_range(inner: &str) -> Result<Vec<Value>, String> {
    let args: Vec<Value> = split_top_level(inner, ',')?
        .into_iter()
        .map(parse_scalar)
        .collect();

    if args.len() < 2 || args.len() > 3 {
        return Err("range() takes (start, stop) or (start, stop, step)".to_string());
    }
    if args.iter().any(|a| !a.is_number()) {
        return Err("range() arguments must be numbers".to_string());
    }

    let all_int = args.iter().all(|a| a.is_i64());
    if all_int {
        let start = args[0].as_i64().unwrap_or_default();
        let stop = args[1].as_i64().unwrap_or_default();
        let step = args.get(2).and_then(Value::as_i64).unwrap_or(1);
        if step == 0 {
            return Err("range() step must not be zero".to_string());
        }
        let mut out = Vec::new();
        let mut current = start;
        while (step > 0 && current < stop) || (step < 0 && current > stop) {
            if out.len() >= MAX_RANGE_POINTS {
                return Err(format!("range() produces more than {} points", MAX_RANGE_POINTS));
            }
            out.push(Value::Number(current.into()));
            current = match current.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
        return Ok(out);
    }

    let start = args[0].as_f64().unwrap_or_default();
    let stop = args[1].as_f64().unwrap_or_default();
    let step = args.get(2).and_then(Value::as_f64).unwrap_or(1.0);
    if step == 0.0 {
        return Err("range() step must not be zero".to_string());
    }
    let count = ((stop - start) / step).ceil();
    if count > MAX_RANGE_POINTS as f64 {
        return Err(format!("range() produces more than {} points", MAX_RANGE_POINTS));
    }
    let mut out = Vec::new();
    for i in 0..(count.max(0.0) as usize) {
        let v = start + step * i as f64;
        let n = Number::from_f64(v).ok_or_else(|| "range() produced a non-finite value".to_string())?;
        out.push(Value::Number(n));
    }
    Ok(out)
}

/// Parse one list element (no top-level commas).
fn parse_element(raw: &str) -> Result<Value, String> {
    let text = raw.trim();

    if text.is_empty() {
        return Err("empty element in value list".to_string());
    }

    if text.starts_with('[') {
        let inner = text
            .strip_suffix(']')
            .map(|s| &s[1..])
            .ok_or_else(|| format!("unterminated list: {}", text))?;
        if inner.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        let items = split_top_level(inner, ',')?
            .into_iter()
            .map(parse_element)
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(items));
    }

    if text.starts_with('{') {
        let inner = text
            .strip_suffix('}')
            .map(|s| &s[1..])
            .ok_or_else(|| format!("unterminated dict: {}", text))?;
        let mut map = Map::new();
        if inner.trim().is_empty() {
            return Ok(Value::Object(map));
        }
        for entry in split_top_level(inner, ',')? {
            let mut kv = split_top_level(entry, ':')?;
            if kv.len() < 2 {
                return Err(format!("dict entry '{}' is missing ':'", entry.trim()));
            }
            let key_text = kv.remove(0).trim();
            let key = match parse_element(key_text)? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            // Re-join the value part so `{t: ${now:%H}}` keeps its inner colon
            let value_text = kv.join(":");
            map.insert(key, parse_element(&value_text)?);
        }
        return Ok(Value::Object(map));
    }

    if let Some(quote) = text.chars().next().filter(|c| *c == '\'' || *c == '"') {
        return parse_quoted(text, quote).map(Value::String);
    }

    Ok(parse_scalar(text))
}

fn parse_quoted(text: &str, quote: char) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = text.chars().skip(1);
    let mut closed = false;

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(n) if n == quote || n == '\\' => out.push(n),
                Some(n) => {
                    out.push('\\');
                    out.push(n);
                }
                None => return Err(format!("dangling escape in {}", text)),
            }
        } else if c == quote {
            closed = true;
            break;
        } else {
            out.push(c);
        }
    }

    if !closed {
        return Err(format!("unterminated quoted string: {}", text));
    }
    if chars.next().is_some() {
        return Err(format!("unexpected characters after quoted string: {}", text));
    }
    Ok(out)
}

/// Split on `sep` where it appears outside any nesting or quoting.
pub fn split_top_level(text: &str, sep: char) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

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
            '[' | '{' | '(' => stack.push(c),
            ']' | '}' | ')' => {
                let open = match c {
                    ']' => '[',
                    '}' => '{',
                    _ => '(',
                };
                if stack.pop() != Some(open) {
                    return Err(format!("unbalanced '{}' in {}", c, text));
                }
            }
            _ if c == sep && stack.is_empty() => {
                parts.push(&text[start..idx]);
                start = idx + c.len_utf8();
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err(format!("unterminated quoted string in {}", text));
    }
    if let Some(open) = stack.last() {
        return Err(format!("unclosed '{}' in {}", open, text));
    }

    parts.push(&text[start..]);
    Ok(parts)
}
