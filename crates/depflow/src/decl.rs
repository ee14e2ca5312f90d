// Copyright 2026 the DepFlow authors

//! Node declarations and graph preprocessing
//!
//! A graph definition is an ordered list of [`NodeDecl`]s, usually
//! deserialized from JSON. Shared fields (`name`, `type`, `aliases`,
//! `comments`, `isHidden`) are typed; kind-specific fields stay as raw JSON
//! until node construction so the preprocessor can rewrite them in place.
//!
//! Preprocessing runs on a deep clone of the user's definition and performs
//! three rewrites, in order:
//!
//! 1. every `aliases` entry appends a sibling `alias` node mirroring its
//!    owner,
//! 2. the synthetic `inputs` node is appended,
//! 3. every path-bearing field is normalized to its mapping form and every
//!    entry that does not reference a declared node is hoisted into a
//!    synthetic `static` node named `#literal#<owner>#<key>`.
//!
//! Nodes whose name begins with `#` are hidden from output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::path::{escape_segment, split_node_path};

/// Node kind tags, as they appear in the declaration `type` field.
pub mod kind {
    /// A literal value, forever.
    pub const STATIC: &str = "static";
    /// Annotation-only node; evaluates to its `comments` field.
    pub const COMMENTS: &str = "comments";
    /// Mirrors the value at another path.
    pub const ALIAS: &str = "alias";
    /// Mirrors a top-level input (defaults to the node's own name).
    pub const ECHO: &str = "echo";
    /// `object[propName]` once both operands resolve.
    pub const DEREFERENCE: &str = "dereference";
    /// A registered function applied to resolved parameters.
    pub const TRANSFORM: &str = "transform";
    /// The synthetic mutable mapping the run writes inputs into.
    pub const INPUTS: &str = "inputs";
    /// The value of a deferred once it completes.
    pub const ASYNC: &str = "async";
    /// Selects one of several nodes by comparing a test value to cases.
    pub const BRANCH: &str = "branch";
    /// An embedded child graph (or a template for one).
    pub const GRAPH: &str = "graph";
}

/// Name of the synthesized inputs node; reserved.
pub const INPUTS_NODE: &str = "inputs";

/// Prefix of synthesized hidden nodes.
pub const HIDDEN_PREFIX: char = '#';

/// The `cases` entry that marks a branch's default arm.
pub const BRANCH_DEFAULT: &str = "_default_";

/// One or many alias names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Aliases {
    /// A single alias.
    One(String),
    /// Several aliases.
    Many(Vec<String>),
}

impl Aliases {
    /// Iterate the alias names regardless of shape.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            Aliases::One(name) => std::slice::from_ref(name).iter(),
            Aliases::Many(names) => names.iter(),
        }
        .map(String::as_str)
    }
}

/// A single node declaration.
///
/// Kind-specific fields (`value`, `mirror`, `params`, …) live in `fields`
/// until node construction. Declarations built in code may attach a
/// [`Deferred`] for `async` nodes; JSON cannot express one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDecl {
    /// Unique node name within its graph.
    pub name: String,
    /// Node kind tag (see [`kind`]).
    #[serde(rename = "type")]
    pub kind: String,
    /// Names of sibling alias nodes to synthesize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Aliases>,
    /// Free-form annotation carried through to `comments` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Value>,
    /// Hide this node from visible state.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_hidden: bool,
    /// Kind-specific declaration fields, raw until construction.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Deferred payload for `async` nodes declared in code.
    #[serde(skip)]
    pub promise: Option<Deferred>,
    /// Declared shapes of path-bearing fields, recorded by preprocessing.
    /// List-shaped fields label their edges by entry index.
    #[serde(skip)]
    pub field_shapes: Vec<(&'static str, FieldShape)>,
}

impl NodeDecl {
    /// Start a declaration of the given kind.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            aliases: None,
            comments: None,
            is_hidden: false,
            fields: Map::new(),
            promise: None,
            field_shapes: Vec::new(),
        }
    }

    /// Attach a kind-specific field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    /// Attach alias names.
    #[must_use]
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = Some(Aliases::Many(
            aliases.iter().map(|s| (*s).to_string()).collect(),
        ));
        self
    }

    /// Hide the node from visible state.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    /// Attach the deferred an `async` node completes with.
    #[must_use]
    pub fn with_promise(mut self, deferred: Deferred) -> Self {
        self.promise = Some(deferred);
        self
    }
}

/// An ordered graph definition.
pub type GraphDef = Vec<NodeDecl>;

// ---------------------------------------------------------------------------
// Path-field descriptors
// ---------------------------------------------------------------------------

/// Describes one path-bearing declaration field of a node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathFieldSpec {
    /// Declaration field name.
    pub field: &'static str,
    /// Whether the field's entries address distinct sub-properties (the
    /// entry key is the edge's `srcPropName` directly).
    pub has_subproperties: bool,
}

const NO_PATH_FIELDS: &[PathFieldSpec] = &[];
const ALIAS_FIELDS: &[PathFieldSpec] = &[PathFieldSpec {
    field: "mirror",
    has_subproperties: false,
}];
const DEREFERENCE_FIELDS: &[PathFieldSpec] = &[
    PathFieldSpec {
        field: "objectPath",
        has_subproperties: false,
    },
    PathFieldSpec {
        field: "propNamePath",
        has_subproperties: false,
    },
];
const TRANSFORM_FIELDS: &[PathFieldSpec] = &[PathFieldSpec {
    field: "params",
    has_subproperties: true,
}];
const BRANCH_FIELDS: &[PathFieldSpec] = &[
    PathFieldSpec {
        field: "test",
        has_subproperties: false,
    },
    PathFieldSpec {
        field: "nodeNames",
        has_subproperties: false,
    },
];
const GRAPH_FIELDS: &[PathFieldSpec] = &[PathFieldSpec {
    field: "inputs",
    has_subproperties: true,
}];

/// The path-bearing fields of a node kind.
///
/// Used both by preprocessing (literal hoisting) and by edge collection.
/// Unknown kinds have no path fields; they fail node construction instead.
#[must_use]
pub fn path_fields(kind_tag: &str) -> &'static [PathFieldSpec] {
    match kind_tag {
        kind::ALIAS => ALIAS_FIELDS,
        kind::DEREFERENCE => DEREFERENCE_FIELDS,
        kind::TRANSFORM => TRANSFORM_FIELDS,
        kind::BRANCH => BRANCH_FIELDS,
        kind::GRAPH => GRAPH_FIELDS,
        _ => NO_PATH_FIELDS,
    }
}

// ---------------------------------------------------------------------------
// Path-definition normalization
// ---------------------------------------------------------------------------

/// The declared shape of a path-bearing field, kept for edge labelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// A single path string (key = path).
    Single,
    /// A list of paths (keys = paths, `srcPropName` = index).
    List,
    /// An explicit key → path mapping.
    Map,
}

/// A normalized path definition: ordered `(local key, raw entry)` pairs.
///
/// Before literal hoisting the entries may be arbitrary JSON; afterwards
/// every entry is a path string.
pub type RawPathDef = Vec<(String, Value)>;

/// A fully-normalized path definition: ordered `(local key, path)` pairs.
pub type PathDef = Vec<(String, String)>;

fn entry_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize a raw `pathDef` field into ordered `(key, entry)` pairs plus
/// its declared shape.
///
/// Accepted shapes: a single path string, a list of paths (key = path), or
/// a mapping of key → path. Non-string entries survive normalization and are
/// hoisted into literal nodes afterwards.
#[must_use]
pub fn normalize_path_def(raw: &Value) -> (RawPathDef, FieldShape) {
    match raw {
        Value::Array(items) => (
            items.iter().map(|v| (entry_key(v), v.clone())).collect(),
            FieldShape::List,
        ),
        Value::Object(map) => (
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            FieldShape::Map,
        ),
        other => (vec![(entry_key(other), other.clone())], FieldShape::Single),
    }
}

/// Read a preprocessed path-bearing field as `(key, path)` pairs.
///
/// After preprocessing every entry is a string; anything else indicates the
/// field bypassed preprocessing and is a declaration error.
pub fn read_path_def(owner: &str, field: &'static str, raw: &Value) -> Result<PathDef> {
    let (entries, _) = normalize_path_def(raw);
    entries
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(path) => Ok((key, path)),
            other => Err(Error::InvalidField {
                name: owner.to_string(),
                field,
                reason: format!("contains non-path entry {other}"),
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Synthesized literal node name for `owner`'s field entry `key`.
#[must_use]
pub fn literal_node_name(owner: &str, key: &str) -> String {
    format!("#literal#{owner}#{key}")
}

/// Preprocess a definition: expand aliases, append the `inputs` node,
/// normalize path-bearing fields and hoist literals.
///
/// The input definition is not mutated; the returned definition is what the
/// graph instantiates. `log_literals` logs every entry interpreted as a
/// literal rather than a node reference.
pub fn preprocess(def: &GraphDef, log_literals: bool) -> Result<GraphDef> {
    let mut out: GraphDef = def.clone();

    // 1. Alias nodes mirror their owner.
    let mut alias_nodes = Vec::new();
    for decl in &out {
        if let Some(aliases) = &decl.aliases {
            for alias in aliases.iter() {
                alias_nodes.push(
                    NodeDecl::new(alias, kind::ALIAS)
                        .with_field("mirror", Value::String(decl.name.clone())),
                );
            }
        }
    }
    out.extend(alias_nodes);

    // 2. The synthetic inputs node. The name is reserved outright; an echo
    //    node may share a name with a run *input*, but never with this node.
    if out.iter().any(|d| d.name == INPUTS_NODE) {
        return Err(Error::ReservedNodeName(INPUTS_NODE.to_string()));
    }
    out.push(NodeDecl::new(INPUTS_NODE, kind::INPUTS));

    // 3. Literal hoisting against the full post-alias name set.
    let names: std::collections::HashSet<String> =
        out.iter().map(|d| d.name.clone()).collect();
    let mut literal_nodes = Vec::new();
    for decl in &mut out {
        let owner = decl.name.clone();
        for spec in path_fields(&decl.kind) {
            let Some(raw) = decl.fields.get(spec.field) else {
                continue; // construction reports missing required fields
            };
            let (entries, shape) = normalize_path_def(raw);
            decl.field_shapes.push((spec.field, shape));
            let mut normalized = Map::new();
            for (key, entry) in entries {
                let reference = match &entry {
                    Value::String(path) => {
                        let (head, _) = split_node_path(path);
                        if names.contains(&head) {
                            Some(path.clone())
                        } else {
                            if log_literals {
                                tracing::info!(
                                    node = %owner,
                                    field = spec.field,
                                    literal = %path,
                                    "string does not name a node; treating as literal"
                                );
                            }
                            None
                        }
                    }
                    _ => None,
                };
                let path = match reference {
                    Some(path) => path,
                    None => {
                        let literal_name = literal_node_name(&owner, &key);
                        literal_nodes.push(
                            NodeDecl::new(&literal_name, kind::STATIC)
                                .with_field("value", entry),
                        );
                        // Dots inside the synthesized name are key text, not
                        // path separators.
                        escape_segment(&literal_name)
                    }
                };
                normalized.insert(key, Value::String(path));
            }
            decl.fields
                .insert(spec.field.to_string(), Value::Object(normalized));
        }
    }
    out.extend(literal_nodes);

    Ok(out)
}

/// Every distinct `inputs.`-relative path referenced by a definition's
/// path-bearing fields, in declaration order.
///
/// Works on raw (un-preprocessed) definitions too: only string entries can
/// reference inputs, and literal hoisting never produces one.
#[must_use]
pub fn collect_input_refs(def: &[NodeDecl]) -> Vec<String> {
    let mut refs = Vec::new();
    for decl in def {
        for spec in path_fields(&decl.kind) {
            let Some(raw) = decl.fields.get(spec.field) else {
                continue;
            };
            let (entries, _) = normalize_path_def(raw);
            for (_, entry) in entries {
                let Value::String(path) = entry else {
                    continue;
                };
                let (head, rest) = split_node_path(&path);
                if head == INPUTS_NODE {
                    if let Some(rest) = rest {
                        if !refs.contains(&rest) {
                            refs.push(rest);
                        }
                    }
                }
            }
        }
    }
    refs
}
