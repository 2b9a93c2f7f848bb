//! Named resolvers for `${name:args}` expressions

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveDateTime};
use serde_json::{Number, Value};

use crate::config::render_text;

/// Format used by `${now:}` when no format is given
pub const DEFAULT_NOW_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Signature of a resolver function
pub type ResolverFn = dyn Fn(&[Value], &ResolverContext) -> Result<Value, String> + Send + Sync;

/// Values shared by every resolver call of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverContext {
    /// Run start time; every `${now:...}` of a run sees the same instant
    pub now: NaiveDateTime,
}

/// Registry of resolvers by name
#[derive(Clone)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<String, Arc<ResolverFn>>,
    context: ResolverContext,
}

impl ResolverRegistry {
    /// Built-in resolvers with the current local time
    pub fn new() -> Self {
        Self::at(Local::now().naive_local())
    }

    /// Built-in resolvers with a fixed run start time
    pub fn at(now: NaiveDateTime) -> Self {
        let mut registry = Self::empty(now);
        registry.register("env", env);
        registry.register("oc.env", env);
        registry.register("now", now_resolver);
        registry.register("add", |args: &[Value], _: &ResolverContext| {
            fold_numbers("add", args, i64::checked_add, |a, b| a + b)
        });
        registry.register("mul", |args: &[Value], _: &ResolverContext| {
            fold_numbers("mul", args, i64::checked_mul, |a, b| a * b)
        });
        registry.register("sub", sub);
        registry.register("div", div);
        registry.register("concat", |args: &[Value], _: &ResolverContext| {
            Ok(Value::String(args.iter().map(render_text).collect()))
        });
        registry
    }

    /// No resolvers registered
    pub fn empty(now: NaiveDateTime) -> Self {
        Self {
            resolvers: BTreeMap::new(),
            context: ResolverContext { now },
        }
    }

    /// Register (or replace) a resolver.
    pub fn register<F>(&mut self, name: impl Into<String>, resolver: F)
    where
        F: Fn(&[Value], &ResolverContext) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.resolvers.insert(name.into(), Arc::new(resolver));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ResolverFn>> {
        self.resolvers.get(name)
    }

    pub fn context(&self) -> &ResolverContext {
        &self.context
    }

    pub fn names(&self) -> Vec<&str> {
        self.resolvers.keys().map(String::as_str).collect()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("resolvers", &self.names())
            .field("context", &self.context)
            .finish()
    }
}

/// `${env:NAME}` or `${env:NAME,default}`
fn env(args: &[Value], _: &ResolverContext) -> Result<Value, String> {
    let (name, default) = match args {
        [name] => (render_text(name), None),
        [name, default] => (render_text(name), Some(default)),
        _ => return Err("expected NAME or NAME,default".to_string()),
    };
    match std::env::var(&name) {
        Ok(value) => Ok(Value::String(value)),
        Err(_) => default
            .cloned()
            .ok_or_else(|| format!("environment variable '{}' is not set", name)),
    }
}

/// `${now:FORMAT}`, strftime syntax
fn now_resolver(args: &[Value], ctx: &ResolverContext) -> Result<Value, String> {
    let format = match args {
        [] => DEFAULT_NOW_FORMAT.to_string(),
        [format] => render_text(format),
        _ => return Err("expected a single format argument".to_string()),
    };
    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid time format '{}'", format));
    }
    let mut out = String::new();
    write!(out, "{}", ctx.now.format_with_items(items.iter()))
        .map_err(|_| format!("time format '{}' needs a time zone", format))?;
    Ok(Value::String(out))
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn to_num(resolver: &str, value: &Value) -> Result<Num, String> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().map(Num::Int).or_else(|| n.as_f64().map(Num::Float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Num::Int)
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Num::Float))
        }
        _ => None,
    };
    parsed.ok_or_else(|| format!("{} expects numbers, got {}", resolver, value))
}

fn float_value(x: f64) -> Result<Value, String> {
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| "result is not a finite number".to_string())
}

fn fold_numbers(
    resolver: &str,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, String> {
    let nums = args
        .iter()
        .map(|v| to_num(resolver, v))
        .collect::<Result<Vec<_>, _>>()?;
    let (first, rest) = nums
        .split_first()
        .ok_or_else(|| format!("{} needs at least one argument", resolver))?;

    let mut acc = *first;
    for n in rest {
        acc = match (acc, *n) {
            (Num::Int(a), Num::Int(b)) => Num::Int(
                int_op(a, b).ok_or_else(|| format!("integer overflow in {}", resolver))?,
            ),
            (a, b) => Num::Float(float_op(a.as_f64(), b.as_f64())),
        };
    }

    match acc {
        Num::Int(i) => Ok(Value::from(i)),
        Num::Float(f) => float_value(f),
    }
}

fn binary(resolver: &str, args: &[Value]) -> Result<(Num, Num), String> {
    match args {
        [a, b] => Ok((to_num(resolver, a)?, to_num(resolver, b)?)),
        _ => Err(format!("{} takes exactly two arguments", resolver)),
    }
}

fn sub(args: &[Value], _: &ResolverContext) -> Result<Value, String> {
    match binary("sub", args)? {
        (Num::Int(a), Num::Int(b)) => a
            .checked_sub(b)
            .map(Value::from)
            .ok_or_else(|| "integer overflow in sub".to_string()),
        (a, b) => float_value(a.as_f64() - b.as_f64()),
    }
}

fn div(args: &[Value], _: &ResolverContext) -> Result<Value, String> {
    let (a, b) = binary("div", args)?;
    if b.as_f64() == 0.0 {
        return Err("division by zero".to_string());
    }
    float_value(a.as_f64() / b.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn at() -> ResolverRegistry {
        let now = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 15)
            .unwrap();
        ResolverRegistry::at(now)
    }

    fn call(registry: &ResolverRegistry, name: &str, args: &[Value]) -> Result<Value, String> {
        let resolver = registry.get(name).unwrap();
        resolver(args, registry.context())
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            at().names(),
            vec!["add", "concat", "div", "env", "mul", "now", "oc.env", "sub"]
        );
    }

    #[test]
    fn test_now_formats() {
        let r = at();
        assert_eq!(call(&r, "now", &[]).unwrap(), json!("2024-05-01_12-30-15"));
        assert_eq!(call(&r, "now", &[json!("%Y-%m-%d")]).unwrap(), json!("2024-05-01"));
        assert_eq!(call(&r, "now", &[json!("%H-%M-%S")]).unwrap(), json!("12-30-15"));
    }

    #[test]
    fn test_now_invalid_format() {
        let err = call(&at(), "now", &[json!("%Q")]).unwrap_err();
        assert!(err.contains("invalid time format"));
    }

    #[test]
    fn test_now_zone_format_is_an_error() {
        for format in ["%Z", "%z", "run-%Y-%Z"] {
            let err = call(&at(), "now", &[json!(format)]).unwrap_err();
            assert!(err.contains("needs a time zone"), "{}: {}", format, err);
        }
    }

    #[test]
    fn test_env() {
        let r = at();
        let path = std::env::var("PATH").unwrap();
        assert_eq!(call(&r, "env", &[json!("PATH")]).unwrap(), json!(path));

        let missing = "PLAB_TEST_SURELY_UNSET_VARIABLE";
        assert_eq!(call(&r, "oc.env", &[json!(missing), json!(3)]).unwrap(), json!(3));
        assert!(call(&r, "env", &[json!(missing)]).unwrap_err().contains(missing));
    }

    #[test]
    fn test_arithmetic() {
        let r = at();
        assert_eq!(call(&r, "add", &[json!(1), json!(2), json!(3)]).unwrap(), json!(6));
        assert_eq!(call(&r, "add", &[json!(1), json!(0.5)]).unwrap(), json!(1.5));
        assert_eq!(call(&r, "mul", &[json!(4), json!("5")]).unwrap(), json!(20));
        assert_eq!(call(&r, "sub", &[json!(10), json!(4)]).unwrap(), json!(6));
        assert_eq!(call(&r, "div", &[json!(1), json!(4)]).unwrap(), json!(0.25));
    }

    #[test]
    fn test_arithmetic_errors() {
        let r = at();
        assert!(call(&r, "add", &[]).is_err());
        assert!(call(&r, "add", &[json!("x"), json!(1)]).is_err());
        assert!(call(&r, "sub", &[json!(1)]).is_err());
        assert!(call(&r, "div", &[json!(1), json!(0)]).unwrap_err().contains("division by zero"));
        assert!(call(&r, "add", &[json!(i64::MAX), json!(1)]).unwrap_err().contains("overflow"));
    }

    #[test]
    fn test_concat() {
        let r = at();
        assert_eq!(
            call(&r, "concat", &[json!("fit_"), json!(3), json!([1])]).unwrap(),
            json!("fit_3[1]")
        );
    }

    #[test]
    fn test_register_custom() {
        let mut r = at();
        r.register("upper", |args: &[Value], _: &ResolverContext| {
            Ok(json!(render_text(&args[0]).to_uppercase()))
        });
        assert_eq!(call(&r, "upper", &[json!("gamma")]).unwrap(), json!("GAMMA"));
    }
}
