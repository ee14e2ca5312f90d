// Copyright 2026 the DepFlow authors

//! Transform registry
//!
//! A process-wide, read-only table from function name to pure function.
//! Every transform takes a single argument mapping of already-resolved JSON
//! values and returns a value; `transform` nodes call through this table once
//! all of their parameters are available.
//!
//! Conventions used by the built-in library:
//!
//! - Binary arithmetic and comparison use keys `a` and `b`.
//! - Scaling operations use `amt` with `factor` / `divisor`; `addFactor` and
//!   `subFactor` are proportional adjustments (`amt * (1 ± factor)`).
//! - Collection operations use `items`, with `path` addressing into elements
//!   and `value` as the match target.
//! - `vectorOp` and `map` name an inner transform (`op` / `fn`) applied
//!   through this same table.
//!
//! Numeric results must be finite: JSON cannot carry `NaN` or infinities, so
//! a non-finite result is a [`Error::Transform`] rather than a silent stall.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};
use crate::path::get_at_path;

/// The resolved argument mapping a transform receives.
pub type TransformArgs = Map<String, Value>;

/// A pure transform function.
pub type TransformFn = fn(&str, &TransformArgs) -> Result<Value>;

static REGISTRY: LazyLock<HashMap<&'static str, TransformFn>> = LazyLock::new(|| {
    let mut table: HashMap<&'static str, TransformFn> = HashMap::new();
    // Arithmetic
    table.insert("add", t_add);
    table.insert("sub", t_sub);
    table.insert("mult", t_mult);
    table.insert("div", t_div);
    table.insert("addFactor", t_add_factor);
    table.insert("subFactor", t_sub_factor);
    table.insert("round", t_round);
    table.insert("ceil", t_ceil);
    table.insert("floor", t_floor);
    table.insert("min", t_min);
    table.insert("max", t_max);
    table.insert("clamp", t_clamp);
    table.insert("roundCurrency", t_round_currency);
    // Comparison
    table.insert("gt", t_gt);
    table.insert("lt", t_lt);
    table.insert("gte", t_gte);
    table.insert("lte", t_lte);
    table.insert("eq", t_eq);
    // Boolean
    table.insert("not", t_not);
    table.insert("andN", t_and_n);
    table.insert("orN", t_or_n);
    // Reduction
    table.insert("addN", t_add_n);
    table.insert("concat", t_concat);
    table.insert("concatArrays", t_concat_arrays);
    // Collection
    table.insert("filter", t_filter);
    table.insert("filterNot", t_filter_not);
    table.insert("find", t_find);
    table.insert("map", t_map);
    table.insert("vectorOp", t_vector_op);
    table.insert("pick", t_pick);
    table.insert("omit", t_omit);
    table.insert("merge", t_merge);
    table.insert("box", t_box);
    table.insert("addProp", t_add_prop);
    // Sentinels & predicates
    table.insert("isNonEmptyString", t_is_non_empty_string);
    table.insert("isNull", t_is_null);
    table.insert("ternary", t_ternary);
    table.insert("includes", t_includes);
    table
});

/// Look up a transform by name. `None` means the name is unregistered,
/// which is a declaration error at node-construction time.
#[must_use]
pub fn lookup(name: &str) -> Option<TransformFn> {
    REGISTRY.get(name).copied()
}

/// Whether `name` is a registered transform.
#[must_use]
pub fn contains(name: &str) -> bool {
    REGISTRY.contains_key(name)
}

/// Registered transform names, unordered.
#[must_use]
pub fn names() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}

/// Apply the named transform to an argument mapping.
pub fn apply(name: &str, args: &TransformArgs) -> Result<Value> {
    let func = lookup(name).ok_or_else(|| Error::Transform {
        func: name.to_string(),
        reason: "unknown transform".to_string(),
    })?;
    func(name, args)
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn fail(func: &str, reason: impl Into<String>) -> Error {
    Error::Transform {
        func: func.to_string(),
        reason: reason.into(),
    }
}

fn arg<'a>(func: &str, args: &'a TransformArgs, key: &str) -> Result<&'a Value> {
    args.get(key)
        .ok_or_else(|| fail(func, format!("missing argument '{key}'")))
}

fn num(func: &str, args: &TransformArgs, key: &str) -> Result<f64> {
    arg(func, args, key)?
        .as_f64()
        .ok_or_else(|| fail(func, format!("argument '{key}' is not a number")))
}

fn array<'a>(func: &str, args: &'a TransformArgs, key: &str) -> Result<&'a Vec<Value>> {
    arg(func, args, key)?
        .as_array()
        .ok_or_else(|| fail(func, format!("argument '{key}' is not an array")))
}

fn object<'a>(func: &str, args: &'a TransformArgs, key: &str) -> Result<&'a Map<String, Value>> {
    arg(func, args, key)?
        .as_object()
        .ok_or_else(|| fail(func, format!("argument '{key}' is not an object")))
}

fn string<'a>(func: &str, args: &'a TransformArgs, key: &str) -> Result<&'a str> {
    arg(func, args, key)?
        .as_str()
        .ok_or_else(|| fail(func, format!("argument '{key}' is not a string")))
}

fn finite(func: &str, x: f64) -> Result<Value> {
    Number::from_f64(x)
        .map(Value::Number)
        .ok_or_else(|| fail(func, format!("non-finite result {x}")))
}

/// JSON truthiness: `false`, `0`, `""` and `null` are falsy, everything else
/// (including empty containers) is truthy.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Value equality with numbers compared numerically, so `4` and `4.0` match.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn t_add(f: &str, args: &TransformArgs) -> Result<Value> {
    finite(f, num(f, args, "a")? + num(f, args, "b")?)
}

fn t_sub(f: &str, args: &TransformArgs) -> Result<Value> {
    finite(f, num(f, args, "a")? - num(f, args, "b")?)
}

fn t_mult(f: &str, args: &TransformArgs) -> Result<Value> {
    finite(f, num(f, args, "amt")? * num(f, args, "factor")?)
}

fn t_div(f: &str, args: &TransformArgs) -> Result<Value> {
    let divisor = num(f, args, "divisor")?;
    if divisor == 0.0 {
        return Err(fail(f, "division by zero"));
    }
    finite(f, num(f, args, "amt")? / divisor)
}

fn t_add_factor(f: &str, args: &TransformArgs) -> Result<Value> {
    let amt = num(f, args, "amt")?;
    finite(f, amt * (1.0 + num(f, args, "factor")?))
}

fn t_sub_factor(f: &str, args: &TransformArgs) -> Result<Value> {
    let amt = num(f, args, "amt")?;
    finite(f, amt * (1.0 - num(f, args, "factor")?))
}

fn t_round(f: &str, args: &TransformArgs) -> Result<Value> {
    finite(f, num(f, args, "amt")?.round())
}

fn t_ceil(f: &str, args: &TransformArgs) -> Result<Value> {
    finite(f, num(f, args, "amt")?.ceil())
}

fn t_floor(f: &str, args: &TransformArgs) -> Result<Value> {
    finite(f, num(f, args, "amt")?.floor())
}

fn t_min(f: &str, args: &TransformArgs) -> Result<Value> {
    finite(f, num(f, args, "a")?.min(num(f, args, "b")?))
}

fn t_max(f: &str, args: &TransformArgs) -> Result<Value> {
    finite(f, num(f, args, "a")?.max(num(f, args, "b")?))
}

fn t_clamp(f: &str, args: &TransformArgs) -> Result<Value> {
    let lo = num(f, args, "min")?;
    let hi = num(f, args, "max")?;
    if lo > hi {
        return Err(fail(f, format!("min {lo} exceeds max {hi}")));
    }
    finite(f, num(f, args, "amt")?.clamp(lo, hi))
}

fn t_round_currency(f: &str, args: &TransformArgs) -> Result<Value> {
    // Half away from zero, two decimal places.
    finite(f, (num(f, args, "amt")? * 100.0).round() / 100.0)
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

fn t_gt(f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(num(f, args, "a")? > num(f, args, "b")?))
}

fn t_lt(f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(num(f, args, "a")? < num(f, args, "b")?))
}

fn t_gte(f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(num(f, args, "a")? >= num(f, args, "b")?))
}

fn t_lte(f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(num(f, args, "a")? <= num(f, args, "b")?))
}

fn t_eq(f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(loose_eq(
        arg(f, args, "a")?,
        arg(f, args, "b")?,
    )))
}

// ---------------------------------------------------------------------------
// Boolean
// ---------------------------------------------------------------------------

fn t_not(f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(!truthy(arg(f, args, "value")?)))
}

fn t_and_n(_f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(args.values().all(truthy)))
}

fn t_or_n(_f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(args.values().any(truthy)))
}

// ---------------------------------------------------------------------------
// Reduction
// ---------------------------------------------------------------------------

fn t_add_n(f: &str, args: &TransformArgs) -> Result<Value> {
    let mut sum = 0.0;
    for (key, value) in args {
        sum += value
            .as_f64()
            .ok_or_else(|| fail(f, format!("argument '{key}' is not a number")))?;
    }
    finite(f, sum)
}

fn t_concat(_f: &str, args: &TransformArgs) -> Result<Value> {
    let mut out = String::new();
    for value in args.values() {
        match value {
            Value::String(s) => out.push_str(s),
            other => out.push_str(&other.to_string()),
        }
    }
    Ok(Value::String(out))
}

fn t_concat_arrays(f: &str, args: &TransformArgs) -> Result<Value> {
    let mut out = Vec::new();
    for (key, value) in args {
        let items = value
            .as_array()
            .ok_or_else(|| fail(f, format!("argument '{key}' is not an array")))?;
        out.extend(items.iter().cloned());
    }
    Ok(Value::Array(out))
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Shared matcher for `filter` / `filterNot` / `find`: apply `path` into the
/// element when given, then match against `value` when given, else test
/// truthiness.
fn element_matches(args: &TransformArgs, element: &Value) -> bool {
    let probed = match args.get("path").and_then(Value::as_str) {
        Some(path) => match get_at_path(element, path) {
            Some(v) => v,
            None => return false,
        },
        None => element,
    };
    match args.get("value") {
        Some(target) => loose_eq(probed, target),
        None => truthy(probed),
    }
}

fn t_filter(f: &str, args: &TransformArgs) -> Result<Value> {
    let items = array(f, args, "items")?;
    Ok(Value::Array(
        items
            .iter()
            .filter(|e| element_matches(args, e))
            .cloned()
            .collect(),
    ))
}

fn t_filter_not(f: &str, args: &TransformArgs) -> Result<Value> {
    let items = array(f, args, "items")?;
    Ok(Value::Array(
        items
            .iter()
            .filter(|e| !element_matches(args, e))
            .cloned()
            .collect(),
    ))
}

fn t_find(f: &str, args: &TransformArgs) -> Result<Value> {
    let items = array(f, args, "items")?;
    // No match is `null`, not absent: the search completed and found nothing.
    Ok(items
        .iter()
        .find(|e| element_matches(args, e))
        .cloned()
        .unwrap_or(Value::Null))
}

fn t_map(f: &str, args: &TransformArgs) -> Result<Value> {
    let items = array(f, args, "items")?;
    let inner = string(f, args, "fn")?;
    if !contains(inner) {
        return Err(fail(f, format!("unknown inner transform '{inner}'")));
    }
    let mut out = Vec::with_capacity(items.len());
    for element in items {
        let mut inner_args = args.clone();
        inner_args.remove("items");
        inner_args.remove("fn");
        inner_args.insert("item".to_string(), element.clone());
        out.push(apply(inner, &inner_args)?);
    }
    Ok(Value::Array(out))
}

fn t_vector_op(f: &str, args: &TransformArgs) -> Result<Value> {
    let a = array(f, args, "a")?;
    let b = array(f, args, "b")?;
    let op = string(f, args, "op")?;
    if a.len() != b.len() {
        return Err(fail(
            f,
            format!("length mismatch: a has {}, b has {}", a.len(), b.len()),
        ));
    }
    if !contains(op) {
        return Err(fail(f, format!("unknown inner transform '{op}'")));
    }
    let mut out = Vec::with_capacity(a.len());
    for (x, y) in a.iter().zip(b.iter()) {
        let mut inner_args = TransformArgs::new();
        inner_args.insert("a".to_string(), x.clone());
        inner_args.insert("b".to_string(), y.clone());
        out.push(apply(op, &inner_args)?);
    }
    Ok(Value::Array(out))
}

fn string_keys(f: &str, args: &TransformArgs) -> Result<Vec<String>> {
    let keys = array(f, args, "keys")?;
    keys.iter()
        .map(|k| {
            k.as_str()
                .map(str::to_string)
                .ok_or_else(|| fail(f, "argument 'keys' must contain strings"))
        })
        .collect()
}

fn t_pick(f: &str, args: &TransformArgs) -> Result<Value> {
    let from = object(f, args, "from")?;
    let keys = string_keys(f, args)?;
    let mut out = Map::new();
    for key in keys {
        if let Some(v) = from.get(&key) {
            out.insert(key, v.clone());
        }
    }
    Ok(Value::Object(out))
}

fn t_omit(f: &str, args: &TransformArgs) -> Result<Value> {
    let from = object(f, args, "from")?;
    let keys = string_keys(f, args)?;
    let mut out = from.clone();
    for key in &keys {
        out.remove(key);
    }
    Ok(Value::Object(out))
}

fn t_merge(f: &str, args: &TransformArgs) -> Result<Value> {
    let mut out = Map::new();
    for (key, value) in args {
        let piece = value
            .as_object()
            .ok_or_else(|| fail(f, format!("argument '{key}' is not an object")))?;
        for (k, v) in piece {
            out.insert(k.clone(), v.clone());
        }
    }
    Ok(Value::Object(out))
}

fn t_box(_f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Object(args.clone()))
}

fn t_add_prop(f: &str, args: &TransformArgs) -> Result<Value> {
    let mut out = object(f, args, "to")?.clone();
    let key = string(f, args, "key")?;
    out.insert(key.to_string(), arg(f, args, "value")?.clone());
    Ok(Value::Object(out))
}

// ---------------------------------------------------------------------------
// Sentinels & predicates
// ---------------------------------------------------------------------------

fn t_is_non_empty_string(f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(matches!(
        arg(f, args, "value")?,
        Value::String(s) if !s.is_empty()
    )))
}

fn t_is_null(f: &str, args: &TransformArgs) -> Result<Value> {
    Ok(Value::Bool(arg(f, args, "value")?.is_null()))
}

fn t_ternary(f: &str, args: &TransformArgs) -> Result<Value> {
    if truthy(arg(f, args, "test")?) {
        Ok(arg(f, args, "pass")?.clone())
    } else {
        Ok(arg(f, args, "fail")?.clone())
    }
}

fn t_includes(f: &str, args: &TransformArgs) -> Result<Value> {
    let target = arg(f, args, "value")?;
    match arg(f, args, "items")? {
        Value::Array(items) => Ok(Value::Bool(items.iter().any(|e| loose_eq(e, target)))),
        Value::String(haystack) => {
            let needle = target
                .as_str()
                .ok_or_else(|| fail(f, "argument 'value' must be a string for string search"))?;
            Ok(Value::Bool(haystack.contains(needle)))
        }
        _ => Err(fail(f, "argument 'items' is not an array or string")),
    }
}
