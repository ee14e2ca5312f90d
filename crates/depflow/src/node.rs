// Copyright 2026 the DepFlow authors

//! Node kinds and runtime node instances
//!
//! A [`DNode`] is the runtime form of a [`NodeDecl`]: the declaration, a
//! validated [`NodeKind`], and the normalized path-bearing fields. Node
//! kinds are a closed tagged union - the declaration format is data, so
//! there is nothing for a trait object to abstract over.
//!
//! Construction validates everything that can be known statically: unknown
//! kinds, missing required fields, unknown transform functions. Evaluation
//! itself lives on [`Graph`](crate::graph::Graph), which owns the node table
//! the accessors read through.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::decl::{self, kind, FieldShape, NodeDecl, PathDef};
use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::subgraph::SubgraphNode;
use crate::transforms;

/// Shared mutable slot backing `async` and `graph` nodes.
///
/// `None` is "not yet available". Writers hold the lock only to swap the
/// value; nothing awaits while locked.
pub(crate) type ValueCell = Arc<RwLock<Option<Value>>>;

/// Shared mutable mapping backing the `inputs` node.
pub(crate) type InputsCell = Arc<RwLock<Map<String, Value>>>;

/// The closed set of node kinds and their validated declaration data.
pub enum NodeKind {
    /// A literal value, forever.
    Static {
        /// The declared literal.
        value: Value,
    },
    /// Annotation node; evaluates to its comment text.
    Comments {
        /// The declared annotation.
        comments: Value,
    },
    /// Mirrors the value at a path.
    Alias {
        /// Path to mirror.
        mirror: String,
    },
    /// Mirrors `inputs.<input_name>`.
    Echo {
        /// Input key to mirror; defaults to the node's own name.
        input_name: String,
    },
    /// `object[propName]` once both operands resolve; a completed lookup
    /// that finds nothing is `null`, not absent.
    Dereference {
        /// Path to the object.
        object_path: String,
        /// Path to the property name.
        prop_name_path: String,
    },
    /// A registered transform applied once every parameter resolves.
    Transform {
        /// Registry name of the function.
        func: String,
        /// Ordered `(key, path)` parameters.
        params: PathDef,
    },
    /// The synthetic mutable mapping the run writes inputs into.
    Inputs {
        /// The mapping; starts empty.
        cell: InputsCell,
    },
    /// The value of a deferred once it completes.
    Async {
        /// The deferred attached to the declaration.
        deferred: Deferred,
        /// Where the driver writes the completed value.
        cell: ValueCell,
        /// Whether a completion task has been spawned for this run.
        started: AtomicBool,
    },
    /// Selects a node by comparing a test value against literal cases.
    Branch {
        /// Path to the test value.
        test: String,
        /// Literal case values; `"_default_"` marks the fallback arm.
        cases: Vec<Value>,
        /// Paths selected by case index.
        node_names: Vec<String>,
    },
    /// An embedded child graph, or a template for one.
    Graph(SubgraphNode),
}

impl NodeKind {
    /// The declaration tag for this kind.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Static { .. } => kind::STATIC,
            NodeKind::Comments { .. } => kind::COMMENTS,
            NodeKind::Alias { .. } => kind::ALIAS,
            NodeKind::Echo { .. } => kind::ECHO,
            NodeKind::Dereference { .. } => kind::DEREFERENCE,
            NodeKind::Transform { .. } => kind::TRANSFORM,
            NodeKind::Inputs { .. } => kind::INPUTS,
            NodeKind::Async { .. } => kind::ASYNC,
            NodeKind::Branch { .. } => kind::BRANCH,
            NodeKind::Graph(_) => kind::GRAPH,
        }
    }
}

/// A normalized path-bearing field of a node.
#[derive(Debug, Clone)]
pub struct NormalizedField {
    /// Declaration field name.
    pub field: &'static str,
    /// Entry keys are `srcPropName`s directly.
    pub has_subproperties: bool,
    /// Shape the user declared the field in.
    pub shape: FieldShape,
    /// Ordered `(key, path)` entries.
    pub entries: PathDef,
}

/// Runtime instance of a node declaration.
pub struct DNode {
    name: String,
    decl: NodeDecl,
    kind: NodeKind,
    path_defs: Vec<NormalizedField>,
}

impl DNode {
    /// Instantiate a preprocessed declaration.
    ///
    /// Fails on unknown kinds, missing required fields, malformed fields,
    /// and unknown transform functions.
    pub fn build(decl: NodeDecl) -> Result<Self> {
        let path_defs = normalized_fields(&decl)?;
        let kind = build_kind(&decl, &path_defs)?;
        Ok(Self {
            name: decl.name.clone(),
            decl,
            kind,
            path_defs,
        })
    }

    /// Node name, unique within its graph.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The validated kind.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The declaration this node was built from (post-preprocessing).
    #[must_use]
    pub fn decl(&self) -> &NodeDecl {
        &self.decl
    }

    /// Normalized path-bearing fields, for edge derivation and dependency
    /// diagnostics.
    #[must_use]
    pub fn path_defs(&self) -> &[NormalizedField] {
        &self.path_defs
    }

    /// Whether this node is synthesized-hidden (`#`-prefixed name).
    #[must_use]
    pub fn is_intermediate(&self) -> bool {
        self.name.starts_with(decl::HIDDEN_PREFIX)
    }

    /// Whether this node is a template subgraph.
    #[must_use]
    pub fn is_template(&self) -> bool {
        matches!(&self.kind, NodeKind::Graph(sub) if sub.is_template)
    }
}

impl fmt::Debug for DNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DNode")
            .field("name", &self.name)
            .field("kind", &self.kind.tag())
            .finish()
    }
}

fn normalized_fields(decl: &NodeDecl) -> Result<Vec<NormalizedField>> {
    let mut out = Vec::new();
    for spec in decl::path_fields(&decl.kind) {
        let Some(raw) = decl.fields.get(spec.field) else {
            continue;
        };
        let shape = decl
            .field_shapes
            .iter()
            .find(|(field, _)| *field == spec.field)
            .map_or(FieldShape::Map, |(_, shape)| *shape);
        out.push(NormalizedField {
            field: spec.field,
            has_subproperties: spec.has_subproperties,
            shape,
            entries: decl::read_path_def(&decl.name, spec.field, raw)?,
        });
    }
    Ok(out)
}

fn missing(decl: &NodeDecl, kind: &'static str, field: &'static str) -> Error {
    Error::MissingField {
        name: decl.name.clone(),
        kind,
        field,
    }
}

/// Read the single path of a non-subproperty field like `mirror` or `test`.
fn single_path(
    path_defs: &[NormalizedField],
    decl: &NodeDecl,
    kind: &'static str,
    field: &'static str,
) -> Result<String> {
    let normalized = path_defs
        .iter()
        .find(|n| n.field == field)
        .ok_or_else(|| missing(decl, kind, field))?;
    match normalized.entries.as_slice() {
        [(_, path)] => Ok(path.clone()),
        _ => Err(Error::InvalidField {
            name: decl.name.clone(),
            field,
            reason: format!("expects exactly one path, got {}", normalized.entries.len()),
        }),
    }
}

fn build_kind(decl: &NodeDecl, path_defs: &[NormalizedField]) -> Result<NodeKind> {
    match decl.kind.as_str() {
        kind::STATIC => Ok(NodeKind::Static {
            value: decl
                .fields
                .get("value")
                .cloned()
                .ok_or_else(|| missing(decl, kind::STATIC, "value"))?,
        }),
        kind::COMMENTS => Ok(NodeKind::Comments {
            comments: decl.comments.clone().unwrap_or(Value::Null),
        }),
        kind::ALIAS => Ok(NodeKind::Alias {
            mirror: single_path(path_defs, decl, kind::ALIAS, "mirror")?,
        }),
        kind::ECHO => Ok(NodeKind::Echo {
            input_name: decl
                .fields
                .get("inputName")
                .and_then(Value::as_str)
                .unwrap_or(&decl.name)
                .to_string(),
        }),
        kind::DEREFERENCE => Ok(NodeKind::Dereference {
            object_path: single_path(path_defs, decl, kind::DEREFERENCE, "objectPath")?,
            prop_name_path: single_path(path_defs, decl, kind::DEREFERENCE, "propNamePath")?,
        }),
        kind::TRANSFORM => {
            let func = decl
                .fields
                .get("fn")
                .and_then(Value::as_str)
                .ok_or_else(|| missing(decl, kind::TRANSFORM, "fn"))?
                .to_string();
            if !transforms::contains(&func) {
                return Err(Error::UnknownTransform {
                    name: decl.name.clone(),
                    func,
                });
            }
            let params = path_defs
                .iter()
                .find(|n| n.field == "params")
                .ok_or_else(|| missing(decl, kind::TRANSFORM, "params"))?
                .entries
                .clone();
            Ok(NodeKind::Transform { func, params })
        }
        kind::INPUTS => Ok(NodeKind::Inputs {
            cell: Arc::new(RwLock::new(Map::new())),
        }),
        kind::ASYNC => Ok(NodeKind::Async {
            deferred: decl
                .promise
                .clone()
                .ok_or_else(|| missing(decl, kind::ASYNC, "promise"))?,
            cell: Arc::new(RwLock::new(None)),
            started: AtomicBool::new(false),
        }),
        kind::BRANCH => {
            let cases = decl
                .fields
                .get("cases")
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| missing(decl, kind::BRANCH, "cases"))?;
            let node_names = path_defs
                .iter()
                .find(|n| n.field == "nodeNames")
                .ok_or_else(|| missing(decl, kind::BRANCH, "nodeNames"))?
                .entries
                .iter()
                .map(|(_, path)| path.clone())
                .collect();
            Ok(NodeKind::Branch {
                test: single_path(path_defs, decl, kind::BRANCH, "test")?,
                cases,
                node_names,
            })
        }
        kind::GRAPH => Ok(NodeKind::Graph(SubgraphNode::from_decl(decl, path_defs)?)),
        other => Err(Error::UnknownNodeKind {
            name: decl.name.clone(),
            kind: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn preprocessed(v: Value) -> NodeDecl {
        let decl: NodeDecl = serde_json::from_value(v).unwrap();
        let def = crate::decl::preprocess(&vec![decl], false).unwrap();
        def.into_iter().next().unwrap()
    }

    #[test]
    fn test_unknown_kind_fails() {
        let decl = NodeDecl::new("x", "mystery");
        let err = DNode::build(decl).unwrap_err();
        assert!(matches!(err, Error::UnknownNodeKind { .. }));
    }

    #[test]
    fn test_static_requires_value() {
        let err = DNode::build(NodeDecl::new("x", "static")).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingField { field: "value", .. }
        ));
        let node = DNode::build(
            NodeDecl::new("x", "static").with_field("value", json!({"a": 1})),
        )
        .unwrap();
        assert!(matches!(node.kind(), NodeKind::Static { .. }));
    }

    #[test]
    fn test_echo_defaults_input_name_to_node_name() {
        let node = DNode::build(NodeDecl::new("rate", "echo")).unwrap();
        match node.kind() {
            NodeKind::Echo { input_name } => assert_eq!(input_name, "rate"),
            other => panic!("expected echo, got {}", other.tag()),
        }
    }

    #[test]
    fn test_transform_validates_function_name() {
        let decl = preprocessed(json!({
            "name": "t",
            "type": "transform",
            "fn": "noSuchFn",
            "params": {"amt": "t"}
        }));
        let err = DNode::build(decl).unwrap_err();
        assert!(matches!(err, Error::UnknownTransform { .. }));
    }

    #[test]
    fn test_transform_params_keep_declaration_order() {
        let decl = preprocessed(json!({
            "name": "t",
            "type": "transform",
            "fn": "concat",
            "params": {"first": "t", "second": "t"}
        }));
        let node = DNode::build(decl).unwrap();
        match node.kind() {
            NodeKind::Transform { params, .. } => {
                let keys: Vec<_> = params.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["first", "second"]);
            }
            other => panic!("expected transform, got {}", other.tag()),
        }
    }

    #[test]
    fn test_async_requires_promise() {
        let err = DNode::build(NodeDecl::new("a", "async")).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingField { field: "promise", .. }
        ));
        let node = DNode::build(
            NodeDecl::new("a", "async").with_promise(Deferred::ready(json!(1))),
        )
        .unwrap();
        assert!(matches!(node.kind(), NodeKind::Async { .. }));
    }

    #[test]
    fn test_branch_fields() {
        let decl = preprocessed(json!({
            "name": "b",
            "type": "branch",
            "test": "b",
            "cases": ["a", "_default_"],
            "nodeNames": ["nodeA", "nodeB"]
        }));
        let node = DNode::build(decl).unwrap();
        match node.kind() {
            NodeKind::Branch {
                cases, node_names, ..
            } => {
                assert_eq!(cases.len(), 2);
                assert_eq!(node_names.len(), 2);
            }
            other => panic!("expected branch, got {}", other.tag()),
        }
    }

    #[test]
    fn test_intermediate_detection() {
        let node = DNode::build(
            NodeDecl::new("#literal#t#factor", "static").with_field("value", json!(3)),
        )
        .unwrap();
        assert!(node.is_intermediate());
    }
}
