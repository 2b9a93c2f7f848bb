//! Interpolation of `${...}` expressions
//!
//! - `${a.b}`: absolute reference
//! - `${.x}`, `${..x}`: relative to the node holding the string
//! - `${name:arg,...}`: resolver call, arguments may nest expressions
//! - `\${`: literal `${`
//!
//! A string that is exactly one expression takes the referenced value,
//! type included. Anything else is spliced into text. Each node is
//! resolved at most once per pass; re-entering a node that is still being
//! resolved is a cycle.

mod expr;
mod resolvers;

pub use expr::{parse_template, Arg, Expr, Segment};
pub use resolvers::{ResolverContext, ResolverFn, ResolverRegistry, DEFAULT_NOW_FORMAT};

use std::collections::HashMap;

use plab_override::parse_scalar;
use serde_json::{Map, Value};

use crate::config::{get_path, render_text};
use crate::error::InterpolationError;

/// Location reported for standalone templates
const TEMPLATE_LOCATION: &str = "<template>";

/// Resolves config trees against a resolver registry
#[derive(Debug, Clone, Copy)]
pub struct Interpolator<'r> {
    registry: &'r ResolverRegistry,
}

impl<'r> Interpolator<'r> {
    pub fn new(registry: &'r ResolverRegistry) -> Self {
        Self { registry }
    }

    /// Resolve every expression in `tree`.
    pub fn resolve(&self, tree: &Value) -> Result<Value, InterpolationError> {
        Pass::new(tree, self.registry).node(&[])
    }

    /// Resolve a standalone template string against `context`.
    ///
    /// Relative references resolve from the root of `context`.
    pub fn resolve_template(&self, template: &str, context: &Value) -> Result<Value, InterpolationError> {
        Pass::new(context, self.registry).string(template, &[TEMPLATE_LOCATION.to_string()])
    }
}

/// True when `text` contains an expression or escape
pub fn has_interpolation(text: &str) -> bool {
    text.contains("${")
}

/// State of one resolution pass
struct Pass<'a> {
    root: &'a Value,
    registry: &'a ResolverRegistry,
    memo: HashMap<Vec<String>, Value>,
    in_progress: Vec<Vec<String>>,
}

impl<'a> Pass<'a> {
    fn new(root: &'a Value, registry: &'a ResolverRegistry) -> Self {
        Self {
            root,
            registry,
            memo: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    fn node(&mut self, path: &[String]) -> Result<Value, InterpolationError> {
        if let Some(done) = self.memo.get(path) {
            return Ok(done.clone());
        }

        if let Some(start) = self.in_progress.iter().position(|p| p == path) {
            let chain = self.in_progress[start..]
                .iter()
                .map(|p| dotted(p))
                .chain(std::iter::once(dotted(path)))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(InterpolationError::Cycle {
                path: dotted(path),
                chain,
            });
        }

        let root = self.root;
        let node = get_path(root, path).ok_or_else(|| InterpolationError::UnresolvedReference {
            reference: dotted(path),
            from: dotted(path),
        })?;

        self.in_progress.push(path.to_vec());
        let result = self.evaluate(node, path);
        self.in_progress.pop();

        let value = result?;
        self.memo.insert(path.to_vec(), value.clone());
        Ok(value)
    }

    fn evaluate(&mut self, node: &'a Value, path: &[String]) -> Result<Value, InterpolationError> {
        match node {
            Value::String(s) if has_interpolation(s) => self.string(s, path),
            Value::Object(map) => {
                let mut out = Map::new();
                for key in map.keys() {
                    let child = child_path(path, key.clone());
                    out.insert(key.clone(), self.node(&child)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for idx in 0..items.len() {
                    out.push(self.node(&child_path(path, idx.to_string()))?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn string(&mut self, text: &str, location: &[String]) -> Result<Value, InterpolationError> {
        let segments = parse_template(text).map_err(|reason| InterpolationError::Syntax {
            from: dotted(location),
            reason,
        })?;

        match segments.as_slice() {
            [Segment::Expr(expr)] => self.expr(expr, location),
            _ => Ok(Value::String(self.splice(&segments, location)?)),
        }
    }

    fn splice(&mut self, segments: &[Segment], location: &[String]) -> Result<String, InterpolationError> {
        let mut out = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&render_text(&self.expr(expr, location)?)),
            }
        }
        Ok(out)
    }

    fn expr(&mut self, expr: &Expr, location: &[String]) -> Result<Value, InterpolationError> {
        match expr {
            Expr::Reference { text, up, path } => {
                let target = self.target(text, *up, path, location)?;
                self.node(&target)
            }
            Expr::Call { name, args } => {
                let registry = self.registry;
                let resolver = registry
                    .get(name)
                    .ok_or_else(|| InterpolationError::UnknownResolver {
                        name: name.clone(),
                        from: dotted(location),
                    })?;
                let values = args
                    .iter()
                    .map(|arg| self.arg(arg, location))
                    .collect::<Result<Vec<_>, _>>()?;
                resolver(&values, registry.context()).map_err(|reason| InterpolationError::Resolver {
                    name: name.clone(),
                    from: dotted(location),
                    reason,
                })
            }
        }
    }

    fn arg(&mut self, arg: &Arg, location: &[String]) -> Result<Value, InterpolationError> {
        if arg.quoted {
            return Ok(Value::String(self.splice(&arg.segments, location)?));
        }
        match arg.segments.as_slice() {
            [] => Ok(Value::String(String::new())),
            [Segment::Expr(expr)] => self.expr(expr, location),
            segments if segments.iter().all(|s| matches!(s, Segment::Literal(_))) => {
                Ok(parse_scalar(&self.splice(segments, location)?))
            }
            segments => Ok(Value::String(self.splice(segments, location)?)),
        }
    }

    /// Absolute path of a reference made from `location`.
    fn target(
        &self,
        text: &str,
        up: usize,
        path: &[String],
        location: &[String],
    ) -> Result<Vec<String>, InterpolationError> {
        let unresolved = || InterpolationError::UnresolvedReference {
            reference: text.to_string(),
            from: dotted(location),
        };

        let mut target = if up == 0 {
            Vec::new()
        } else {
            let keep = location.len().checked_sub(up).ok_or_else(unresolved)?;
            location[..keep].to_vec()
        };
        target.extend(path.iter().cloned());

        if get_path(self.root, &target).is_none() {
            return Err(unresolved());
        }
        Ok(target)
    }
}

fn child_path(path: &[String], key: String) -> Vec<String> {
    let mut child = path.to_vec();
    child.push(key);
    child
}

fn dotted(path: &[String]) -> String {
    path.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn registry() -> ResolverRegistry {
        let now = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap();
        ResolverRegistry::at(now)
    }

    fn resolve(tree: Value) -> Result<Value, InterpolationError> {
        let registry = registry();
        Interpolator::new(&registry).resolve(&tree)
    }

    #[test]
    fn test_no_expressions_is_identity() {
        let tree = json!({"fit": {"dist": "gamma", "mle": true}, "bins": [1, 2]});
        assert_eq!(resolve(tree.clone()).unwrap(), tree);
    }

    #[test]
    fn test_whole_string_reference_keeps_type() {
        let tree = json!({
            "extreme": {"threshold": 0.95, "block_size": 50},
            "report": {"t": "${extreme.threshold}", "params": "${extreme}"}
        });
        let out = resolve(tree).unwrap();
        assert_eq!(out["report"]["t"], json!(0.95));
        assert_eq!(out["report"]["params"], json!({"threshold": 0.95, "block_size": 50}));
    }

    #[test]
    fn test_spliced_reference_renders_text() {
        let tree = json!({
            "fit": {"dist": "lognorm"},
            "extreme": {"threshold": 0.95},
            "viz": {"file": "fit_${fit.dist}_${extreme.threshold}.png"}
        });
        let out = resolve(tree).unwrap();
        assert_eq!(out["viz"]["file"], "fit_lognorm_0.95.png");
    }

    #[test]
    fn test_chained_references() {
        let tree = json!({"a": "${b}", "b": "${c}", "c": 3});
        assert_eq!(resolve(tree).unwrap(), json!({"a": 3, "b": 3, "c": 3}));
    }

    #[test]
    fn test_relative_references() {
        let tree = json!({
            "data": {"path": "data/x.csv"},
            "fit": {"dist": "gamma", "label": "${.dist}", "src": "${..data.path}"}
        });
        let out = resolve(tree).unwrap();
        assert_eq!(out["fit"]["label"], "gamma");
        assert_eq!(out["fit"]["src"], "data/x.csv");
    }

    #[test]
    fn test_sequence_elements() {
        let tree = json!({"x": 1, "items": ["${x}", "n${x}"], "second": "${items.1}"});
        let out = resolve(tree).unwrap();
        assert_eq!(out["items"], json!([1, "n1"]));
        assert_eq!(out["second"], "n1");
    }

    #[test]
    fn test_escape_is_literal() {
        let out = resolve(json!({"a": 1, "b": "\\${a}"})).unwrap();
        assert_eq!(out["b"], "${a}");
    }

    #[test]
    fn test_resolvers_with_nested_arguments() {
        let tree = json!({
            "extreme": {"block_size": 50},
            "double": "${mul:${extreme.block_size},2}",
            "stamp": "run_${now:%Y%m%d}",
            "label": "${concat:${extreme.block_size},'-',x}"
        });
        let out = resolve(tree).unwrap();
        assert_eq!(out["double"], json!(100));
        assert_eq!(out["stamp"], "run_20240501");
        assert_eq!(out["label"], "50-x");
    }

    #[test]
    fn test_unresolved_reference() {
        let err = resolve(json!({"a": "${missing.key}"})).unwrap_err();
        assert_eq!(
            err,
            InterpolationError::UnresolvedReference {
                reference: "missing.key".to_string(),
                from: "a".to_string(),
            }
        );
    }

    #[test]
    fn test_relative_reference_above_root() {
        let err = resolve(json!({"a": "${...x}"})).unwrap_err();
        assert!(matches!(err, InterpolationError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_unknown_resolver() {
        let err = resolve(json!({"a": "${nope:1}"})).unwrap_err();
        assert_eq!(
            err,
            InterpolationError::UnknownResolver {
                name: "nope".to_string(),
                from: "a".to_string(),
            }
        );
    }

    #[test]
    fn test_resolver_failure() {
        let err = resolve(json!({"t": "${now:%Q}"})).unwrap_err();
        assert!(matches!(err, InterpolationError::Resolver { ref name, .. } if name == "now"));
    }

    #[test]
    fn test_syntax_error() {
        let err = resolve(json!({"a": "${b"})).unwrap_err();
        assert!(matches!(err, InterpolationError::Syntax { ref from, .. } if from == "a"));
    }

    #[test]
    fn test_cycle_detected() {
        let err = resolve(json!({"a": "${b}", "b": "${a}"})).unwrap_err();
        match err {
            InterpolationError::Cycle { path, chain } => {
                assert_eq!(path, "a");
                assert_eq!(chain, "a -> b -> a");
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = resolve(json!({"x": {"y": "${x}"}})).unwrap_err();
        assert!(matches!(err, InterpolationError::Cycle { .. }));
    }

    #[test]
    fn test_deterministic() {
        let tree = json!({"a": "${b}_${now:}", "b": "${mul:3,4}"});
        let registry = registry();
        let interp = Interpolator::new(&registry);
        let first = interp.resolve(&tree).unwrap();
        let second = interp.resolve(&tree).unwrap();
        assert_eq!(first, second);
        assert_eq!(first["a"], "12_2024-05-01_09-05-00");
        assert_eq!(interp.resolve(&first).unwrap(), first);
    }

    #[test]
    fn test_resolve_template() {
        let registry = registry();
        let context = json!({"plab": {"job": {"num": 3}}, "fit": {"dist": "gamma"}});
        let interp = Interpolator::new(&registry);

        let dir = interp
            .resolve_template("multirun/${now:%Y-%m-%d}/${plab.job.num}_${.fit.dist}", &context)
            .unwrap();
        assert_eq!(dir, json!("multirun/2024-05-01/3_gamma"));

        let num = interp.resolve_template("${plab.job.num}", &context).unwrap();
        assert_eq!(num, json!(3));
    }
}
