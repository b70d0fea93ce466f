//! Transform expression trees for inference rules.
//!
//! A transform definition is JSON. `"$.input.<dotted.path>"` strings are
//! references into the evaluation environment, `{"$fn": "<name>",
//! "args": [...]}` objects are library calls, other objects and arrays are
//! constructors over sub-expressions, and everything else is a literal.
//! Evaluation is bottom-up against an environment that maps `input` to the
//! file attribute tree.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{0} expects {1} argument(s)")]
    Arity(&'static str, &'static str),
    #[error("{0}")]
    Type(String),
}

// ── Expression tree ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Expr {
    /// `$.input.a.b` style reference; path segments after the `$.` prefix.
    Ref(Vec<String>),
    Call(Func, Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Split,
    Slice,
    Join,
    ToLowerCase,
    Replace,
    Get,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "split" => Some(Self::Split),
            "slice" => Some(Self::Slice),
            "join" => Some(Self::Join),
            "toLowerCase" => Some(Self::ToLowerCase),
            "replace" => Some(Self::Replace),
            "get" => Some(Self::Get),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Split => "split",
            Self::Slice => "slice",
            Self::Join => "join",
            Self::ToLowerCase => "toLowerCase",
            Self::Replace => "replace",
            Self::Get => "get",
        }
    }
}

/// Parse a JSON transform definition into an expression tree.
pub fn parse(def: &Value) -> Result<Expr, TransformError> {
    match def {
        Value::String(s) => match s.strip_prefix("$.") {
            Some(path) => Ok(Expr::Ref(path.split('.').map(str::to_string).collect())),
            None => Ok(Expr::Literal(def.clone())),
        },
        Value::Object(map) => match map.get("$fn") {
            Some(name_value) => {
                let name = name_value
                    .as_str()
                    .ok_or_else(|| TransformError::Type("$fn must be a string".into()))?;
                let func = Func::from_name(name)
                    .ok_or_else(|| TransformError::UnknownFunction(name.to_string()))?;
                let args = match map.get("args") {
                    Some(Value::Array(items)) => {
                        items.iter().map(parse).collect::<Result<Vec<_>, _>>()?
                    }
                    Some(other) => {
                        return Err(TransformError::Type(format!(
                            "args must be an array, got {other}"
                        )));
                    }
                    None => Vec::new(),
                };
                Ok(Expr::Call(func, args))
            }
            None => {
                let fields = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), parse(v)?)))
                    .collect::<Result<Vec<_>, TransformError>>()?;
                Ok(Expr::Object(fields))
            }
        },
        Value::Array(items) => Ok(Expr::Array(
            items.iter().map(parse).collect::<Result<Vec<_>, _>>()?,
        )),
        _ => Ok(Expr::Literal(def.clone())),
    }
}

/// Evaluate an expression against `env` (the environment tree; `input`
/// holds the file attributes).
pub fn eval(expr: &Expr, env: &Value) -> Result<Value, TransformError> {
    match expr {
        Expr::Ref(path) => Ok(lookup(env, path).cloned().unwrap_or(Value::Null)),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Array(items) => Ok(Value::Array(
            items.iter().map(|e| eval(e, env)).collect::<Result<Vec<_>, _>>()?,
        )),
        Expr::Object(fields) => {
            let mut out = Map::new();
            for (k, e) in fields {
                out.insert(k.clone(), eval(e, env)?);
            }
            Ok(Value::Object(out))
        }
        Expr::Call(func, args) => {
            let args = args.iter().map(|e| eval(e, env)).collect::<Result<Vec<_>, _>>()?;
            apply(*func, &args)
        }
    }
}

fn lookup<'v>(root: &'v Value, path: &[String]) -> Option<&'v Value> {
    let mut cur = root;
    for seg in path {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

// ── Library functions ─────────────────────────────────────────────────────────

fn apply(func: Func, args: &[Value]) -> Result<Value, TransformError> {
    match func {
        Func::Split => {
            let [s, sep] = two(func, args)?;
            let s = string_arg(func, s)?;
            let sep = string_arg(func, sep)?;
            Ok(Value::Array(s.split(sep).map(|p| Value::String(p.to_string())).collect()))
        }
        Func::Slice => {
            let (target, start, end) = slice_args(args)?;
            match target {
                Value::Array(items) => {
                    let (a, b) = resolve_range(items.len(), start, end);
                    Ok(Value::Array(items[a..b].to_vec()))
                }
                Value::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let (a, b) = resolve_range(chars.len(), start, end);
                    Ok(Value::String(chars[a..b].iter().collect()))
                }
                other => Err(TransformError::Type(format!(
                    "slice expects an array or string, got {other}"
                ))),
            }
        }
        Func::Join => {
            let [arr, sep] = two(func, args)?;
            let sep = string_arg(func, sep)?;
            let items = arr.as_array().ok_or_else(|| {
                TransformError::Type(format!("join expects an array, got {arr}"))
            })?;
            let parts: Vec<String> = items.iter().map(stringify).collect();
            Ok(Value::String(parts.join(sep)))
        }
        Func::ToLowerCase => {
            let [s] = one(func, args)?;
            Ok(Value::String(string_arg(func, s)?.to_lowercase()))
        }
        Func::Replace => {
            let [s, search, repl] = three(func, args)?;
            let s = string_arg(func, s)?;
            let search = string_arg(func, search)?;
            let repl = string_arg(func, repl)?;
            Ok(Value::String(s.replacen(search, repl, 1)))
        }
        Func::Get => {
            let [obj, path] = two(func, args)?;
            let path = string_arg(func, path)?;
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            Ok(lookup(obj, &segments).cloned().unwrap_or(Value::Null))
        }
    }
}

fn one(func: Func, args: &[Value]) -> Result<[&Value; 1], TransformError> {
    match args {
        [a] => Ok([a]),
        _ => Err(TransformError::Arity(func.name(), "1")),
    }
}

fn two(func: Func, args: &[Value]) -> Result<[&Value; 2], TransformError> {
    match args {
        [a, b] => Ok([a, b]),
        _ => Err(TransformError::Arity(func.name(), "2")),
    }
}

fn three(func: Func, args: &[Value]) -> Result<[&Value; 3], TransformError> {
    match args {
        [a, b, c] => Ok([a, b, c]),
        _ => Err(TransformError::Arity(func.name(), "3")),
    }
}

fn slice_args(args: &[Value]) -> Result<(&Value, i64, Option<i64>), TransformError> {
    match args {
        [t, start] => Ok((t, int_arg(start)?, None)),
        [t, start, end] => Ok((t, int_arg(start)?, Some(int_arg(end)?))),
        _ => Err(TransformError::Arity("slice", "2 or 3")),
    }
}

fn int_arg(v: &Value) -> Result<i64, TransformError> {
    v.as_i64()
        .ok_or_else(|| TransformError::Type(format!("expected an integer index, got {v}")))
}

fn string_arg<'v>(func: Func, v: &'v Value) -> Result<&'v str, TransformError> {
    v.as_str().ok_or_else(|| {
        TransformError::Type(format!("{} expects a string, got {v}", func.name()))
    })
}

/// Negative indices count from the end; both bounds clamp to the length.
fn resolve_range(len: usize, start: i64, end: Option<i64>) -> (usize, usize) {
    let norm = |i: i64| -> usize {
        if i < 0 {
            len.saturating_sub(i.unsigned_abs() as usize)
        } else {
            (i as usize).min(len)
        }
    };
    let a = norm(start);
    let b = norm(end.unwrap_or(len as i64));
    (a, b.max(a))
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
