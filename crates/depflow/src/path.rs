// Copyright 2026 the DepFlow authors

//! Path addressing into nested JSON values
//!
//! A path is a non-empty dotted string. Segments that parse as non-negative
//! integers index arrays; every other segment names an object field. The
//! leading segment of a node-qualified path names a node; the remainder
//! addresses into that node's current value. A single `*` segment selects
//! every element of the array at that position.
//!
//! Field names that contain literal dots are escaped as `\.` so that
//! [`flatten`] and [`expand`] round-trip losslessly.
//!
//! "Absent" (a missing segment, a value that has not arrived yet) is
//! `Option::None` everywhere in this module; JSON `null` is a concrete value.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The wildcard path segment selecting all elements of an array.
pub const WILDCARD: &str = "*";

/// Escape literal dots in a single path segment (`a.b` → `a\.b`).
#[must_use]
pub fn escape_segment(segment: &str) -> String {
    segment.replace('.', "\\.")
}

/// Undo [`escape_segment`] (`a\.b` → `a.b`).
#[must_use]
pub fn unescape_segment(segment: &str) -> String {
    segment.replace("\\.", ".")
}

/// Split a path on unescaped dots, keeping segments in escaped form.
///
/// Segments are returned still-escaped; callers unescape individual segments
/// when using them as object keys.
#[must_use]
pub fn split_segments(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('\\');
                current.push(chars.next().unwrap_or('.'));
            }
            '.' => {
                segments.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}

/// Split a node-qualified path into the node id and the optional remainder.
///
/// The node id is the (unescaped) first segment; the remainder keeps its
/// escaping so it can be split again.
///
/// ```
/// use depflow::path::split_node_path;
///
/// assert_eq!(split_node_path("order"), ("order".to_string(), None));
/// assert_eq!(
///     split_node_path("order.lines.0.amount"),
///     ("order".to_string(), Some("lines.0.amount".to_string()))
/// );
/// ```
#[must_use]
pub fn split_node_path(path: &str) -> (String, Option<String>) {
    let segments = split_segments(path);
    let node_id = unescape_segment(&segments[0]);
    if segments.len() == 1 {
        (node_id, None)
    } else {
        (node_id, Some(segments[1..].join(".")))
    }
}

fn index_of(segment: &str) -> Option<usize> {
    // Reject "+1", "01" is fine (JS array indexing accepts it via string keys,
    // but declaration paths only ever use canonical indices).
    if segment.chars().all(|c| c.is_ascii_digit()) {
        segment.parse().ok()
    } else {
        None
    }
}

fn descend<'a>(value: &'a Value, raw_segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(&unescape_segment(raw_segment)),
        Value::Array(items) => index_of(raw_segment).and_then(|i| items.get(i)),
        _ => None,
    }
}

fn get_at_segments<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = descend(current, segment)?;
    }
    Some(current)
}

/// Read the value at `path`, segment by segment.
///
/// Returns `None` (absent) on any missing segment.
#[must_use]
pub fn get_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    get_at_segments(value, &split_segments(path))
}

/// Write `v` at `path`, descending only through containers that already
/// exist.
///
/// The final segment may create a new object key or append at an array's
/// end; a missing intermediate is an error. Intermediate containers are
/// created by [`expand`] before it calls this.
pub fn set_at_path(target: &mut Value, path: &str, v: Value) -> Result<()> {
    let segments = split_segments(path);
    let (last, intermediate) = segments
        .split_last()
        .expect("split_segments never returns an empty vec");

    let mut current = target;
    for segment in intermediate {
        current = match current {
            Value::Object(map) => map.get_mut(&unescape_segment(segment)),
            Value::Array(items) => index_of(segment).and_then(|i| items.get_mut(i)),
            _ => None,
        }
        .ok_or_else(|| Error::MissingIntermediate {
            path: path.to_string(),
            segment: unescape_segment(segment),
        })?;
    }

    match current {
        Value::Object(map) => {
            map.insert(unescape_segment(last), v);
            Ok(())
        }
        Value::Array(items) => {
            let index = index_of(last).ok_or_else(|| Error::MissingIntermediate {
                path: path.to_string(),
                segment: unescape_segment(last),
            })?;
            if index < items.len() {
                items[index] = v;
                Ok(())
            } else if index == items.len() {
                items.push(v);
                Ok(())
            } else {
                Err(Error::MissingIntermediate {
                    path: path.to_string(),
                    segment: unescape_segment(last),
                })
            }
        }
        _ => Err(Error::MissingIntermediate {
            path: path.to_string(),
            segment: unescape_segment(last),
        }),
    }
}

/// Read `path` from `value`, honoring a single `*` wildcard segment.
///
/// Without a wildcard this is [`get_at_path`]. With one, the prefix must
/// resolve to an array (else [`Error::WildcardOnNonArray`]); a trailing
/// wildcard yields the array itself, otherwise the suffix is applied to each
/// element. An element on which the suffix is missing makes the whole read
/// absent - a partially-populated collection is "not yet available", not a
/// shorter result.
///
/// More than one `*` is [`Error::MultipleWildcards`].
pub fn get_at_path_with_wildcard(value: &Value, path: &str) -> Result<Option<Value>> {
    let segments = split_segments(path);
    let wildcards = segments.iter().filter(|s| *s == WILDCARD).count();
    if wildcards > 1 {
        return Err(Error::MultipleWildcards(path.to_string()));
    }
    if wildcards == 0 {
        return Ok(get_at_segments(value, &segments).cloned());
    }

    let split = segments
        .iter()
        .position(|s| s == WILDCARD)
        .expect("wildcard counted above");
    let (before, rest) = segments.split_at(split);
    let after = &rest[1..];

    let base = if before.is_empty() {
        Some(value)
    } else {
        get_at_segments(value, before)
    };
    let Some(base) = base else {
        return Ok(None);
    };
    let Value::Array(items) = base else {
        return Err(Error::WildcardOnNonArray(path.to_string()));
    };

    if after.is_empty() {
        return Ok(Some(Value::Array(items.clone())));
    }

    let mut results = Vec::with_capacity(items.len());
    for item in items {
        match get_at_segments(item, after) {
            Some(v) => results.push(v.clone()),
            None => return Ok(None),
        }
    }
    Ok(Some(Value::Array(results)))
}

fn is_leaf(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => true,
    }
}

fn collect_into(value: &Value, prefix: &str, out: &mut Vec<String>) {
    if is_leaf(value) {
        if !prefix.is_empty() {
            out.push(prefix.to_string());
        }
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let segment = escape_segment(key);
                let path = if prefix.is_empty() {
                    segment
                } else {
                    format!("{prefix}.{segment}")
                };
                collect_into(child, &path, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = if prefix.is_empty() {
                    index.to_string()
                } else {
                    format!("{prefix}.{index}")
                };
                collect_into(child, &path, out);
            }
        }
        _ => unreachable!("non-containers are leaves"),
    }
}

/// Enumerate every leaf path of a nested value, depth first.
///
/// Object keys containing literal dots are escaped. Empty containers count
/// as leaves so that [`flatten`] / [`expand`] round-trip.
#[must_use]
pub fn collect_paths(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_into(value, "", &mut out);
    out
}

fn unescaped_path(path: &str) -> String {
    split_segments(path)
        .iter()
        .map(|s| unescape_segment(s))
        .collect::<Vec<_>>()
        .join(".")
}

/// Flatten a nested value into a `path → leaf` map.
///
/// When `keep` is given, only paths whose unescaped form appears in it are
/// retained.
#[must_use]
pub fn flatten(value: &Value, keep: Option<&[String]>) -> Map<String, Value> {
    let mut out = Map::new();
    for path in collect_paths(value) {
        if let Some(keep) = keep {
            if !keep.iter().any(|k| *k == unescaped_path(&path)) {
                continue;
            }
        }
        if let Some(leaf) = get_at_path(value, &path) {
            out.insert(path, leaf.clone());
        }
    }
    out
}

/// Container-creating leaf write used by [`expand`].
fn expand_one(target: &mut Value, path: &str, leaf: Value) -> Result<()> {
    let segments = split_segments(path);
    let mut current = &mut *target;
    for window in 0..segments.len() - 1 {
        let raw = &segments[window];
        let next_is_index = index_of(&segments[window + 1]).is_some();
        let empty_child = || {
            if next_is_index {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            }
        };
        match current {
            Value::Object(map) => {
                current = map
                    .entry(unescape_segment(raw))
                    .or_insert_with(empty_child);
            }
            Value::Array(items) => {
                let index = index_of(raw).ok_or_else(|| Error::MissingIntermediate {
                    path: path.to_string(),
                    segment: unescape_segment(raw),
                })?;
                while items.len() <= index {
                    items.push(empty_child());
                }
                current = &mut items[index];
            }
            _ => {
                return Err(Error::MissingIntermediate {
                    path: path.to_string(),
                    segment: unescape_segment(raw),
                })
            }
        }
    }
    // Intermediates now exist; the strict primitive does the final write.
    let remaining = segments.last().expect("non-empty path");
    set_at_path(current, remaining, leaf)
}

/// Rebuild a nested value from a `path → leaf` map (inverse of [`flatten`]).
///
/// When `keep` is given, only paths whose unescaped form appears in it
/// contribute.
pub fn expand(flat: &Map<String, Value>, keep: Option<&[String]>) -> Result<Value> {
    let mut root = if flat
        .keys()
        .next()
        .is_some_and(|first| index_of(&split_segments(first)[0]).is_some())
    {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    };
    for (path, leaf) in flat {
        if let Some(keep) = keep {
            if !keep.iter().any(|k| *k == unescaped_path(path)) {
                continue;
            }
        }
        expand_one(&mut root, path, leaf.clone())?;
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_node_path() {
        assert_eq!(split_node_path("a"), ("a".to_string(), None));
        assert_eq!(
            split_node_path("a.b.c"),
            ("a".to_string(), Some("b.c".to_string()))
        );
        // Escaped dot stays inside the node id.
        assert_eq!(
            split_node_path("lit\\.node.x"),
            ("lit.node".to_string(), Some("x".to_string()))
        );
    }

    #[test]
    fn test_get_at_path() {
        let v = json!({"a": {"b": [10, {"c": 20}]}});
        assert_eq!(get_at_path(&v, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_at_path(&v, "a.b.1.c"), Some(&json!(20)));
        assert_eq!(get_at_path(&v, "a.missing"), None);
        assert_eq!(get_at_path(&v, "a.b.7"), None);
        // Indexing an object by number is a field lookup, not an index.
        let v = json!({"0": "zero"});
        assert_eq!(get_at_path(&v, "0"), Some(&json!("zero")));
    }

    #[test]
    fn test_set_at_path_requires_intermediates() {
        let mut v = json!({"a": {}});
        set_at_path(&mut v, "a.b", json!(1)).unwrap();
        assert_eq!(v, json!({"a": {"b": 1}}));

        let err = set_at_path(&mut v, "a.x.y", json!(1)).unwrap_err();
        assert!(matches!(err, Error::MissingIntermediate { .. }));

        // Appending one past the end is allowed, skipping is not.
        let mut v = json!({"xs": [1]});
        set_at_path(&mut v, "xs.1", json!(2)).unwrap();
        assert_eq!(v, json!({"xs": [1, 2]}));
        assert!(set_at_path(&mut v, "xs.5", json!(9)).is_err());
    }

    #[test]
    fn test_wildcard_terminal_returns_the_array() {
        let v = json!({"things": [1, 2, 3]});
        assert_eq!(
            get_at_path_with_wildcard(&v, "things.*").unwrap(),
            Some(json!([1, 2, 3]))
        );
    }

    #[test]
    fn test_wildcard_maps_suffix_over_elements() {
        let v = json!({"things": [{"amount": 4}, {"amount": 2}]});
        assert_eq!(
            get_at_path_with_wildcard(&v, "things.*.amount").unwrap(),
            Some(json!([4, 2]))
        );
    }

    #[test]
    fn test_wildcard_partial_collection_is_absent() {
        let v = json!({"things": [{"amount": 4}, {}]});
        assert_eq!(
            get_at_path_with_wildcard(&v, "things.*.amount").unwrap(),
            None
        );
    }

    #[test]
    fn test_wildcard_errors() {
        let v = json!({"things": {"not": "an array"}});
        assert!(matches!(
            get_at_path_with_wildcard(&v, "things.*"),
            Err(Error::WildcardOnNonArray(_))
        ));
        let v = json!({"things": [[1], [2]]});
        assert!(matches!(
            get_at_path_with_wildcard(&v, "things.*.*"),
            Err(Error::MultipleWildcards(_))
        ));
    }

    #[test]
    fn test_wildcard_absent_prefix_propagates() {
        let v = json!({});
        assert_eq!(get_at_path_with_wildcard(&v, "missing.*").unwrap(), None);
    }

    #[test]
    fn test_collect_paths_escapes_dotted_keys() {
        let v = json!({"a.b": {"c": 1}, "d": [true]});
        assert_eq!(collect_paths(&v), vec!["a\\.b.c", "d.0"]);
    }

    #[test]
    fn test_flatten_expand_roundtrip() {
        let v = json!({
            "a.b": {"c": 1},
            "list": [{"x": 1}, {"x": 2}],
            "empty": {},
            "s": "leaf"
        });
        let flat = flatten(&v, None);
        assert_eq!(flat.get("a\\.b.c"), Some(&json!(1)));
        assert_eq!(expand(&flat, None).unwrap(), v);
    }

    #[test]
    fn test_flatten_keep_filters_by_unescaped_path() {
        let v = json!({"a.b": {"c": 1}, "other": 2});
        let keep = vec!["a.b.c".to_string()];
        let flat = flatten(&v, Some(&keep));
        assert_eq!(flat.len(), 1);
        assert_eq!(flat.get("a\\.b.c"), Some(&json!(1)));
    }

    #[test]
    fn test_expand_builds_arrays_from_index_segments() {
        let mut flat = Map::new();
        flat.insert("items.0.v".to_string(), json!("a"));
        flat.insert("items.1.v".to_string(), json!("b"));
        assert_eq!(
            expand(&flat, None).unwrap(),
            json!({"items": [{"v": "a"}, {"v": "b"}]})
        );
    }
}
