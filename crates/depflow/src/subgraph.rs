// Copyright 2026 the DepFlow authors

//! Subgraph composition
//!
//! A `graph`-kind node embeds a child graph. Its definition is either
//! inline (an array of declarations) or the name of a *template* - a
//! `graph` node declared with `isTemplate: true`, never executed in place,
//! looked up in the enclosing graph or any ancestor.
//!
//! Inputs for the child come from an explicit `inputs` path definition, or
//! implicitly from every `inputs.<…>` path the child declaration
//! references. Each implicit reference resolves against, in order: a parent
//! node of that name, the parent run's inputs, the root run's inputs -
//! otherwise the run fails ("could not find node or pass-through input").
//!
//! Once every resolved input is present, the driver instantiates a fresh
//! child graph and runs it; the node's value is the child's settled state.
//! In `collectionMode: "map"` one child runs per element of the collection
//! input and the node's value is the ordered array of per-element states.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::{Map, Value};

use crate::decl::{self, GraphDef, NodeDecl, PathDef, INPUTS_NODE};
use crate::deferred::Input;
use crate::error::{Error, Result};
use crate::graph::{EvalCtx, Graph, RunInputs};
use crate::node::{DNode, NodeKind, NormalizedField, ValueCell};
use crate::path::{expand, split_node_path};

/// Where a subgraph's definition comes from.
pub enum GraphDefSource {
    /// The name of a template node (here or in an ancestor graph).
    Template(String),
    /// An inline list of declarations.
    Inline(GraphDef),
}

/// How a subgraph consumes its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    /// Instantiate the child once per element of the `collection` input.
    Map,
}

/// Runtime data of a `graph`-kind node.
pub struct SubgraphNode {
    pub(crate) def_source: GraphDefSource,
    pub(crate) explicit_inputs: Option<PathDef>,
    pub(crate) collection_mode: Option<CollectionMode>,
    pub(crate) is_template: bool,
    /// Definition to instantiate, fixed once the enclosing graph connects.
    pub(crate) resolved_def: OnceLock<GraphDef>,
    /// The child run's result (or ordered results in map mode).
    pub(crate) cell: ValueCell,
    /// Whether a child run has been spawned.
    pub(crate) started: AtomicBool,
}

impl SubgraphNode {
    /// Validate a `graph` declaration's fields.
    pub(crate) fn from_decl(decl: &NodeDecl, path_defs: &[NormalizedField]) -> Result<Self> {
        let def_source = match decl.fields.get("graphDef") {
            Some(Value::String(template)) => GraphDefSource::Template(template.clone()),
            Some(list @ Value::Array(_)) => {
                GraphDefSource::Inline(serde_json::from_value(list.clone())?)
            }
            Some(other) => {
                return Err(Error::InvalidField {
                    name: decl.name.clone(),
                    field: "graphDef",
                    reason: format!("must be a template name or declaration list, got {other}"),
                })
            }
            None => {
                return Err(Error::MissingField {
                    name: decl.name.clone(),
                    kind: decl::kind::GRAPH,
                    field: "graphDef",
                })
            }
        };
        let collection_mode = match decl.fields.get("collectionMode") {
            None => None,
            Some(Value::String(mode)) if mode == "map" => Some(CollectionMode::Map),
            Some(other) => {
                return Err(Error::InvalidField {
                    name: decl.name.clone(),
                    field: "collectionMode",
                    reason: format!("unknown mode {other}"),
                })
            }
        };
        Ok(Self {
            def_source,
            explicit_inputs: path_defs
                .iter()
                .find(|f| f.field == "inputs")
                .map(|f| f.entries.clone()),
            collection_mode,
            is_template: decl
                .fields
                .get("isTemplate")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            resolved_def: OnceLock::new(),
            cell: ValueCell::default(),
            started: AtomicBool::new(false),
        })
    }
}

/// Fix every subgraph node's definition: inline definitions directly,
/// template references by lookup in the node table or any ancestor.
pub(crate) fn resolve_templates(
    nodes: &std::collections::HashMap<String, DNode>,
    order: &[String],
    parent: Option<&Graph>,
) -> Result<()> {
    for name in order {
        let NodeKind::Graph(sub) = nodes[name].kind() else {
            continue;
        };
        match &sub.def_source {
            GraphDefSource::Inline(def) => {
                let _ = sub.resolved_def.set(def.clone());
            }
            GraphDefSource::Template(template) if !sub.is_template => {
                let def = find_template(nodes, parent, template).ok_or_else(|| {
                    Error::Resolution {
                        subgraph: name.clone(),
                        reference: template.clone(),
                    }
                })?;
                let _ = sub.resolved_def.set(def);
            }
            GraphDefSource::Template(_) => {} // a template aliasing a template is never executed
        }
    }
    Ok(())
}

fn find_template(
    nodes: &std::collections::HashMap<String, DNode>,
    parent: Option<&Graph>,
    template: &str,
) -> Option<GraphDef> {
    let node = match nodes.get(template) {
        Some(node) => Some(node),
        None => parent.and_then(|p| p.get_dnode(template, true)),
    }?;
    match node.kind() {
        NodeKind::Graph(sub) if sub.is_template => sub.resolved_def.get().cloned().or_else(|| {
            match &sub.def_source {
                GraphDefSource::Inline(def) => Some(def.clone()),
                GraphDefSource::Template(_) => None,
            }
        }),
        _ => None,
    }
}

/// Where one child input reads from, re-evaluated every driver pass until
/// all are present.
enum InputSource {
    /// A path evaluated on the parent graph.
    ParentPath(String),
    /// A key of the parent run's inputs.
    ParentInputs(String),
    /// A key of the root run's inputs.
    RootInputs(String),
}

impl Graph {
    /// Start a child run for every subgraph whose resolved inputs just
    /// became complete. Called once per driver pass.
    pub(crate) fn start_ready_subgraphs(&self, ctx: &mut EvalCtx) -> Result<()> {
        for name in &self.core.order {
            let NodeKind::Graph(sub) = self.core.nodes[name].kind() else {
                continue;
            };
            if sub.is_template || sub.started.load(Ordering::SeqCst) {
                continue;
            }
            let child_def = sub
                .resolved_def
                .get()
                .cloned()
                .ok_or_else(|| Error::Resolution {
                    subgraph: name.clone(),
                    reference: "graphDef".to_string(),
                })?;

            let sources = self.subgraph_input_sources(name, sub, &child_def)?;
            let mut resolved: Vec<(String, Value)> = Vec::with_capacity(sources.len());
            let mut ready = true;
            for (local, source) in &sources {
                match self.read_source(source, ctx)? {
                    Some(value) => resolved.push((local.clone(), value)),
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
            if !ready {
                continue;
            }

            sub.started.store(true, Ordering::SeqCst);
            tracing::debug!(
                graph = %self.core.name,
                subgraph = %name,
                inputs = resolved.len(),
                "subgraph inputs resolved; starting child run"
            );
            let parent = self.clone();
            let node_name = name.clone();
            let cell = Arc::clone(&sub.cell);
            let mode = sub.collection_mode;
            tokio::spawn(async move {
                match run_child(parent.clone(), node_name, child_def, resolved, mode).await {
                    Ok(value) => {
                        *cell.write().expect("subgraph cell poisoned") = Some(value);
                        parent.notify_changed();
                    }
                    Err(error) => parent.fail(error),
                }
            });
        }
        Ok(())
    }

    fn subgraph_input_sources(
        &self,
        node_name: &str,
        sub: &SubgraphNode,
        child_def: &GraphDef,
    ) -> Result<Vec<(String, InputSource)>> {
        if let Some(explicit) = &sub.explicit_inputs {
            return Ok(explicit
                .iter()
                .map(|(key, path)| {
                    (
                        strip_inputs_prefix(key).to_string(),
                        InputSource::ParentPath(path.clone()),
                    )
                })
                .collect());
        }

        let provided = self.provided_input_names();
        let root = self.root();
        let mut sources = Vec::new();
        for reference in decl::collect_input_refs(child_def) {
            let (head, _) = split_node_path(&reference);
            let source = if self.core.nodes.contains_key(&head) {
                InputSource::ParentPath(reference.clone())
            } else if provided.contains(&head) {
                InputSource::ParentInputs(reference.clone())
            } else if !std::ptr::eq(root, self) && root.provided_input_names().contains(&head) {
                InputSource::RootInputs(reference.clone())
            } else {
                return Err(Error::Resolution {
                    subgraph: node_name.to_string(),
                    reference,
                });
            };
            sources.push((reference, source));
        }
        Ok(sources)
    }

    fn read_source(&self, source: &InputSource, ctx: &mut EvalCtx) -> Result<Option<Value>> {
        match source {
            InputSource::ParentPath(path) => self.value_at(path, ctx),
            InputSource::ParentInputs(path) => {
                self.value_at(&format!("{INPUTS_NODE}.{path}"), ctx)
            }
            InputSource::RootInputs(path) => self
                .root()
                .value_at(&format!("{INPUTS_NODE}.{path}"), &mut EvalCtx::default()),
        }
    }
}

fn strip_inputs_prefix(local: &str) -> &str {
    local
        .strip_prefix("inputs.")
        .unwrap_or(local)
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Nest dotted local names into the structure the child's `inputs` node
/// sees, then split the top level into run inputs.
fn expand_resolved(pairs: &[(String, Value)]) -> Result<RunInputs> {
    if pairs.is_empty() {
        return Ok(RunInputs::new());
    }
    let mut flat = Map::new();
    for (local, value) in pairs {
        flat.insert(strip_inputs_prefix(local).to_string(), value.clone());
    }
    let expanded = expand(&flat, None)?;
    let Value::Object(top) = expanded else {
        return Ok(RunInputs::new());
    };
    Ok(top
        .into_iter()
        .map(|(k, v)| (k, Input::Value(v)))
        .collect())
}

async fn run_child(
    parent: Graph,
    node_name: String,
    def: GraphDef,
    resolved: Vec<(String, Value)>,
    mode: Option<CollectionMode>,
) -> Result<Value> {
    let mut options = parent.options().clone();
    options.depth += 1;

    match mode {
        None => {
            let inputs = expand_resolved(&resolved)?;
            let child = Graph::child(
                def,
                format!("{}.{}", parent.name(), node_name),
                &parent,
                options,
            )?;
            let state = child.run(inputs).await?;
            Ok(Value::Object(state))
        }
        Some(CollectionMode::Map) => {
            let collection_index = resolved
                .iter()
                .position(|(local, _)| local == "collection")
                .or_else(|| (resolved.len() == 1).then_some(0))
                .ok_or_else(|| Error::Resolution {
                    subgraph: node_name.clone(),
                    reference: "collection".to_string(),
                })?;
            let mut others = resolved;
            let (_, collection) = others.remove(collection_index);
            let Value::Array(elements) = collection else {
                return Err(Error::CollectionNotArray {
                    node: node_name,
                    got: value_type_name(&collection).to_string(),
                });
            };

            let base = expand_resolved(&others)?;
            let mut runs = Vec::with_capacity(elements.len());
            for (index, element) in elements.into_iter().enumerate() {
                let mut inputs = base.clone();
                if let Value::Object(fields) = &element {
                    for (key, value) in fields {
                        inputs.insert(key.clone(), Input::Value(value.clone()));
                    }
                }
                inputs.insert("item".to_string(), Input::Value(element));
                let child = Graph::child(
                    def.clone(),
                    format!("{}.{}[{}]", parent.name(), node_name, index),
                    &parent,
                    options.clone(),
                )?;
                runs.push(child.run(inputs));
            }
            let states = futures::future::try_join_all(runs).await?;
            Ok(Value::Array(states.into_iter().map(Value::Object).collect()))
        }
    }
}
