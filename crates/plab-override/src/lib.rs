//! Command-line override grammar for plab.
//!
//! An override amends a composed config tree after the defaults list has been
//! merged:
//!
//! ```text
//! fit.dist=lognorm            set an existing key
//! +fit.seed=7 / fit.seed+=7   add a key that must not exist yet
//! ++fit.seed=7                add or replace
//! ~viz.qq                     delete a key
//! fit=weibull_min,lognorm     sweep (one job per value under multirun)
//! ```

mod error;
mod value;

pub use error::OverrideSyntaxError;
pub use value::{
    format_value, parse_scalar, parse_value_list, split_top_level, ParsedValues, MAX_RANGE_POINTS,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an override does to its key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideOp {
    /// `key=value`: key must exist, types must be compatible
    Set,
    /// `+key=value` or `key+=value`: key must not exist
    Add,
    /// `++key=value`: add or replace, no checks
    ForceAdd,
    /// `~key` or `~key=value`: remove the key
    Delete,
}

impl OverrideOp {
    /// Prefix used when rendering the override back to text
    pub fn prefix(&self) -> &'static str {
        match self {
            OverrideOp::Set => "",
            OverrideOp::Add => "+",
            OverrideOp::ForceAdd => "++",
            OverrideOp::Delete => "~",
        }
    }
}

/// A parsed command-line override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Override {
    /// Dot-separated key, one element per nesting level
    pub key_path: Vec<String>,
    /// Assigned values; more than one only for sweeps
    pub values: Vec<Value>,
    /// Operation
    pub op: OverrideOp,
    /// True when written as a comma list or sweep function
    pub sweep: bool,
    /// Literal text the override was parsed from
    pub raw: String,
}

impl Override {
    /// Dotted key
    pub fn key(&self) -> String {
        self.key_path.join(".")
    }

    /// First key segment
    pub fn root_key(&self) -> &str {
        self.key_path.first().map(String::as_str).unwrap_or_default()
    }

    /// The single value of a non-sweep override (`None` for a bare delete)
    pub fn value(&self) -> Option<&Value> {
        self.values.first()
    }

    /// True when this override contributes an axis to a multirun sweep
    pub fn is_sweep_axis(&self) -> bool {
        self.values.len() > 1
    }

    /// Collapse a sweep into a single list value (used outside multirun).
    pub fn collapsed(&self) -> Override {
        if !self.sweep {
            return self.clone();
        }
        let list = Value::Array(self.values.clone());
        Override {
            key_path: self.key_path.clone(),
            values: vec![list.clone()],
            op: self.op,
            sweep: false,
            raw: format!("{}{}={}", self.op.prefix(), self.key(), format_value(&list)),
        }
    }

    /// Pin this override to one sweep point.
    pub fn with_value(&self, value: Value) -> Override {
        let raw = format!("{}{}={}", self.op.prefix(), self.key(), format_value(&value));
        Override {
            key_path: self.key_path.clone(),
            values: vec![value],
            op: self.op,
            sweep: false,
            raw,
        }
    }
}

impl std::fmt::Display for Override {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl std::str::FromStr for Override {
    type Err = OverrideSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_override(s)
    }
}

/// Parse a single override string.
pub fn parse_override(input: &str) -> Result<Override, OverrideSyntaxError> {
    let text = input.trim();
    let err = |reason: &str| OverrideSyntaxError::new(input, reason);

    if text.is_empty() {
        return Err(err("empty override"));
    }

    let (mut op, rest) = if let Some(rest) = text.strip_prefix("++") {
        (OverrideOp::ForceAdd, rest)
    } else if let Some(rest) = text.strip_prefix('+') {
        (OverrideOp::Add, rest)
    } else if let Some(rest) = text.strip_prefix('~') {
        (OverrideOp::Delete, rest)
    } else {
        (OverrideOp::Set, text)
    };

    let (key_text, value_text) = match rest.split_once('=') {
        Some((k, v)) => (k, Some(v)),
        None => (rest, None),
    };

    let key_text = match key_text.strip_suffix('+') {
        Some(stripped) if op == OverrideOp::Set => {
            op = OverrideOp::Add;
            stripped
        }
        Some(_) => return Err(err("'+=' cannot be combined with a '+', '++' or '~' prefix")),
        None => key_text,
    };

    let key_path = parse_key_path(key_text).map_err(|reason| err(&reason))?;

    let (values, sweep) = match (op, value_text) {
        (OverrideOp::Delete, None) => (Vec::new(), false),
        (_, None) => return Err(err("missing '=' (expected key=value)")),
        (_, Some(v)) => {
            let parsed = parse_value_list(v).map_err(|reason| err(&reason))?;
            (parsed.values, parsed.sweep)
        }
    };

    if op == OverrideOp::Delete && sweep {
        return Err(err("a delete override cannot sweep over values"));
    }

    Ok(Override {
        key_path,
        values,
        op,
        sweep,
        raw: text.to_string(),
    })
}

/// Parse every override, failing on the first malformed one.
pub fn parse_overrides<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<Override>, OverrideSyntaxError> {
    inputs.iter().map(|s| parse_override(s.as_ref())).collect()
}

fn parse_key_path(text: &str) -> Result<Vec<String>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("missing key".to_string());
    }

    text.split('.')
        .map(|segment| {
            if segment.is_empty() {
                return Err(format!("empty key segment in '{}'", text));
            }
            if let Some(bad) = segment
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
            {
                return Err(format!("invalid character '{}' in key '{}'", bad, text));
            }
            Ok(segment.to_string())
        })
        .collect()
}
