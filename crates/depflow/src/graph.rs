// Copyright 2026 the DepFlow authors

//! `Graph` - the node table and its reactive driver
//!
//! A [`Graph`] owns a table of [`DNode`]s built from a preprocessed
//! declaration list. Node values are computed on demand by walking declared
//! dependencies through the value-reading protocol ([`Graph::value_at`]);
//! evaluation within one pass is memoized so diamond-shaped graphs evaluate
//! each node once.
//!
//! [`Graph::run`] is the reactive driver: it writes the run inputs (awaiting
//! deferred ones on background tasks), then recomputes visible state every
//! time anything changes until no visible node is absent. Each non-terminal
//! pass fires `stepped`; settling fires `resolved`; any failure fires
//! `error` and rejects the run.
//!
//! `Graph` is a cheap-clone handle over shared internals, so completion
//! tasks and child runs can hold it across `await`s.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::decl::{self, FieldShape, GraphDef, BRANCH_DEFAULT, INPUTS_NODE};
use crate::deferred::Input;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventKind, GraphEvent, ListenerId};
use crate::node::{DNode, InputsCell, NodeKind};
use crate::path::{escape_segment, get_at_path_with_wildcard, split_node_path};
use crate::transforms;

/// The placeholder value a template node reads as; templates are never
/// executed in place.
pub const TEMPLATE_PLACEHOLDER: &str = "[template]";

/// A snapshot of visible node values, in declaration order.
pub type State = Map<String, Value>;

/// The mapping handed to [`Graph::run`].
pub type RunInputs = HashMap<String, Input>;

/// Convert a JSON object into run inputs (every value immediate).
///
/// Non-object values produce an empty mapping; a graph that expects inputs
/// will then fail with [`Error::MissingInputs`], which names what's missing.
#[must_use]
pub fn run_inputs_from_json(value: Value) -> RunInputs {
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, Input::Value(v)))
            .collect(),
        _ => RunInputs::new(),
    }
}

/// Evaluation and output options for a graph.
#[derive(Debug, Clone, Default)]
pub struct GraphOptions {
    /// Include the `inputs` node in visible state.
    pub echo_inputs: bool,
    /// Include template subgraph nodes in visible state.
    pub echo_templates: bool,
    /// Include `#`-prefixed synthetic nodes in visible state.
    pub echo_intermediates: bool,
    /// Log unresolved paths on every step.
    pub log_undefined_paths: bool,
    /// Log whenever a string field is interpreted as a literal.
    pub log_literals: bool,
    /// Nesting depth, for log context; child graphs run at `depth + 1`.
    pub depth: usize,
    /// Fail a run that has not settled within this duration.
    pub run_timeout: Option<Duration>,
}

/// A dependency edge derived from a declaration, for introspection only -
/// the driver never traverses edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DEdge {
    /// Node whose declaration references another node.
    pub src_node_id: String,
    /// The field key (or list index) holding the reference.
    pub src_prop_name: String,
    /// The referenced node.
    pub dst_node_id: String,
    /// Path into the referenced node's value, if any.
    pub dst_value_path: Option<String>,
}

pub(crate) struct GraphCore {
    pub(crate) name: String,
    pub(crate) options: GraphOptions,
    pub(crate) parent: Option<Graph>,
    pub(crate) nodes: HashMap<String, DNode>,
    pub(crate) order: Vec<String>,
    edges: Vec<DEdge>,
    inputs_cell: InputsCell,
    events: EventBus,
    changed: Notify,
    run_failed: Mutex<Option<Error>>,
    provided_inputs: RwLock<HashSet<String>>,
    running: AtomicBool,
}

/// A dependency graph: node table, derived edges, events, and the reactive
/// driver.
#[derive(Clone)]
pub struct Graph {
    pub(crate) core: Arc<GraphCore>,
}

/// Per-pass evaluation context: memoized node values plus a re-entrancy
/// guard that turns cyclic reads into absent reads.
#[derive(Default)]
pub(crate) struct EvalCtx {
    memo: HashMap<String, Option<Value>>,
    visiting: HashSet<String>,
}

impl Graph {
    /// Construct a top-level graph named `"root"`.
    pub fn new(def: GraphDef, options: GraphOptions) -> Result<Self> {
        Self::build(def, "root".to_string(), None, options)
    }

    /// Construct a named top-level graph.
    pub fn with_name(
        def: GraphDef,
        name: impl Into<String>,
        options: GraphOptions,
    ) -> Result<Self> {
        Self::build(def, name.into(), None, options)
    }

    /// Construct a child graph whose template lookups fall through to
    /// `parent` and its ancestors.
    pub(crate) fn child(
        def: GraphDef,
        name: String,
        parent: &Graph,
        options: GraphOptions,
    ) -> Result<Self> {
        Self::build(def, name, Some(parent.clone()), options)
    }

    fn build(
        def: GraphDef,
        name: String,
        parent: Option<Graph>,
        options: GraphOptions,
    ) -> Result<Self> {
        let decls = decl::preprocess(&def, options.log_literals)?;

        let mut nodes: HashMap<String, DNode> = HashMap::with_capacity(decls.len());
        let mut order = Vec::with_capacity(decls.len());
        for decl in decls {
            let node = DNode::build(decl)?;
            if nodes.contains_key(node.name()) {
                return Err(Error::DuplicateNodeName(node.name().to_string()));
            }
            order.push(node.name().to_string());
            nodes.insert(node.name().to_string(), node);
        }

        let inputs_cell = match nodes.get(INPUTS_NODE).map(DNode::kind) {
            Some(NodeKind::Inputs { cell }) => Arc::clone(cell),
            _ => unreachable!("preprocessing always injects the inputs node"),
        };

        crate::subgraph::resolve_templates(&nodes, &order, parent.as_ref())?;
        let edges = derive_edges(&nodes, &order);

        let graph = Graph {
            core: Arc::new(GraphCore {
                name,
                options,
                parent,
                nodes,
                order,
                edges,
                inputs_cell,
                events: EventBus::new(),
                changed: Notify::new(),
                run_failed: Mutex::new(None),
                provided_inputs: RwLock::new(HashSet::new()),
                running: AtomicBool::new(false),
            }),
        };
        graph.core.events.emit(&GraphEvent::Constructed);
        graph.core.events.emit(&GraphEvent::Connected);
        tracing::debug!(
            graph = %graph.core.name,
            depth = graph.core.options.depth,
            nodes = graph.core.order.len(),
            edges = graph.core.edges.len(),
            "graph connected"
        );
        Ok(graph)
    }

    /// Graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The options this graph evaluates under.
    #[must_use]
    pub fn options(&self) -> &GraphOptions {
        &self.core.options
    }

    /// The supergraph, when this graph is embedded.
    #[must_use]
    pub fn supergraph(&self) -> Option<&Graph> {
        self.core.parent.as_ref()
    }

    pub(crate) fn root(&self) -> &Graph {
        let mut current = self;
        while let Some(parent) = current.supergraph() {
            current = parent;
        }
        current
    }

    /// Look up a node by name, optionally walking supergraphs.
    #[must_use]
    pub fn get_dnode(&self, name: &str, search_ancestors: bool) -> Option<&DNode> {
        match self.core.nodes.get(name) {
            Some(node) => Some(node),
            None if search_ancestors => {
                self.supergraph().and_then(|p| p.get_dnode(name, true))
            }
            None => None,
        }
    }

    /// All nodes, in declaration order.
    #[must_use]
    pub fn get_dnodes(&self) -> Vec<&DNode> {
        self.core
            .order
            .iter()
            .map(|name| &self.core.nodes[name])
            .collect()
    }

    /// The derived dependency edges.
    #[must_use]
    pub fn get_dedges(&self) -> &[DEdge] {
        &self.core.edges
    }

    /// Register an event listener.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        self.core.events.on(kind, callback)
    }

    /// Register a listener removed after its first delivery.
    pub fn once<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&GraphEvent) + Send + Sync + 'static,
    {
        self.core.events.once(kind, callback)
    }

    /// Remove a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.core.events.off(id)
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Current value of a node, or `None` while its dependencies are absent.
    pub fn node_value(&self, name: &str) -> Result<Option<Value>> {
        if !self.core.nodes.contains_key(name) {
            return Err(Error::NodeNotFound(name.to_string()));
        }
        self.eval_node(name, &mut EvalCtx::default())
    }

    /// Declared dependency paths of `name` that currently read as absent.
    pub fn undefined_dependency_paths(&self, name: &str) -> Result<Vec<String>> {
        let Some(node) = self.core.nodes.get(name) else {
            return Err(Error::NodeNotFound(name.to_string()));
        };
        let mut ctx = EvalCtx::default();
        let mut undefined = Vec::new();
        for field in node.path_defs() {
            for (_, path) in &field.entries {
                if self.value_at(path, &mut ctx)?.is_none() {
                    undefined.push(path.clone());
                }
            }
        }
        Ok(undefined)
    }

    /// The value-reading protocol every node kind uses: split off the node
    /// id, look it up **in this graph only** (missing logs and reads as
    /// absent), then apply the wildcard-aware remainder.
    pub(crate) fn value_at(&self, path: &str, ctx: &mut EvalCtx) -> Result<Option<Value>> {
        let (node_id, value_path) = split_node_path(path);
        if !self.core.nodes.contains_key(&node_id) {
            tracing::warn!(
                graph = %self.core.name,
                path,
                node = %node_id,
                "path references a node that does not exist; reading as absent"
            );
            return Ok(None);
        }
        let Some(value) = self.eval_node(&node_id, ctx)? else {
            return Ok(None);
        };
        match value_path {
            None => Ok(Some(value)),
            Some(rest) => get_at_path_with_wildcard(&value, &rest),
        }
    }

    fn eval_node(&self, name: &str, ctx: &mut EvalCtx) -> Result<Option<Value>> {
        if let Some(memoized) = ctx.memo.get(name) {
            return Ok(memoized.clone());
        }
        if !ctx.visiting.insert(name.to_string()) {
            tracing::warn!(
                graph = %self.core.name,
                node = %name,
                "re-entrant read (cycle?); reading as absent"
            );
            return Ok(None);
        }
        let result = self.eval_kind(name, ctx);
        ctx.visiting.remove(name);
        if let Ok(value) = &result {
            ctx.memo.insert(name.to_string(), value.clone());
        }
        result
    }

    fn eval_kind(&self, name: &str, ctx: &mut EvalCtx) -> Result<Option<Value>> {
        let node = &self.core.nodes[name];
        match node.kind() {
            NodeKind::Static { value } => Ok(Some(value.clone())),
            NodeKind::Comments { comments } => Ok(Some(comments.clone())),
            NodeKind::Alias { mirror } => self.value_at(mirror, ctx),
            NodeKind::Echo { input_name } => {
                let path = format!("{INPUTS_NODE}.{}", escape_segment(input_name));
                self.value_at(&path, ctx)
            }
            NodeKind::Dereference {
                object_path,
                prop_name_path,
            } => self.eval_dereference(object_path, prop_name_path, ctx),
            NodeKind::Transform { func, params } => {
                let mut args = transforms::TransformArgs::new();
                for (key, path) in params {
                    match self.value_at(path, ctx)? {
                        Some(value) => {
                            args.insert(key.clone(), value);
                        }
                        None => return Ok(None),
                    }
                }
                transforms::apply(func, &args).map(Some)
            }
            NodeKind::Inputs { cell } => Ok(Some(Value::Object(
                cell.read().expect("inputs cell poisoned").clone(),
            ))),
            NodeKind::Async { cell, .. } => {
                Ok(cell.read().expect("async cell poisoned").clone())
            }
            NodeKind::Branch {
                test,
                cases,
                node_names,
            } => self.eval_branch(name, test, cases, node_names, ctx),
            NodeKind::Graph(sub) => {
                if sub.is_template {
                    Ok(Some(Value::String(TEMPLATE_PLACEHOLDER.to_string())))
                } else {
                    Ok(sub.cell.read().expect("subgraph cell poisoned").clone())
                }
            }
        }
    }

    /// A dereference whose operands exist resolves to `null` when the lookup
    /// finds nothing, so "looked up, nothing there" is distinguishable from
    /// "still waiting". Operand nodes that do not exist are an error at read
    /// time.
    fn eval_dereference(
        &self,
        object_path: &str,
        prop_name_path: &str,
        ctx: &mut EvalCtx,
    ) -> Result<Option<Value>> {
        for path in [object_path, prop_name_path] {
            let (head, _) = split_node_path(path);
            if !self.core.nodes.contains_key(&head) {
                return Err(Error::NodeNotFound(head));
            }
        }
        let Some(object) = self.value_at(object_path, ctx)? else {
            return Ok(None);
        };
        let Some(prop) = self.value_at(prop_name_path, ctx)? else {
            return Ok(None);
        };
        let found = match (&object, &prop) {
            (Value::Object(map), Value::String(key)) => map.get(key).cloned(),
            (Value::Object(map), other) => other
                .as_u64()
                .and_then(|i| map.get(&i.to_string()))
                .cloned(),
            (Value::Array(items), _) => prop
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| items.get(i))
                .cloned(),
            _ => None,
        };
        Ok(Some(found.unwrap_or(Value::Null)))
    }

    fn eval_branch(
        &self,
        name: &str,
        test: &str,
        cases: &[Value],
        node_names: &[String],
        ctx: &mut EvalCtx,
    ) -> Result<Option<Value>> {
        let Some(test_value) = self.value_at(test, ctx)? else {
            return Ok(None);
        };
        let index = cases
            .iter()
            .position(|case| transforms::loose_eq(case, &test_value))
            .or_else(|| {
                cases
                    .iter()
                    .position(|case| case.as_str() == Some(BRANCH_DEFAULT))
            });
        match index.and_then(|i| node_names.get(i)) {
            Some(path) => self.value_at(path, ctx),
            None => {
                tracing::warn!(
                    graph = %self.core.name,
                    node = %name,
                    test = %test_value,
                    "no case matched and no default arm; reading as absent"
                );
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // State readout
    // -----------------------------------------------------------------------

    fn is_visible(&self, node: &DNode) -> bool {
        let options = &self.core.options;
        if node.is_intermediate() && !options.echo_intermediates {
            return false;
        }
        if matches!(node.kind(), NodeKind::Inputs { .. }) && !options.echo_inputs {
            return false;
        }
        if node.decl().is_hidden {
            return false;
        }
        if node.is_template() && !options.echo_templates {
            return false;
        }
        true
    }

    /// Snapshot of current visible values (or all values with
    /// `include_hidden`), in declaration order. Absent nodes are omitted.
    pub fn get_state(&self, include_hidden: bool) -> Result<State> {
        let mut ctx = EvalCtx::default();
        let mut state = State::new();
        for name in &self.core.order {
            let node = &self.core.nodes[name];
            if !include_hidden && !self.is_visible(node) {
                continue;
            }
            if let Some(value) = self.eval_node(name, &mut ctx)? {
                state.insert(name.clone(), value);
            }
        }
        Ok(state)
    }

    /// One driver pass: visible state plus the names of visible nodes that
    /// are still absent.
    fn compute_step(&self, ctx: &mut EvalCtx) -> Result<(State, Vec<String>)> {
        let mut state = State::new();
        let mut undefined = Vec::new();
        for name in &self.core.order {
            let node = &self.core.nodes[name];
            if !self.is_visible(node) {
                continue;
            }
            match self.eval_node(name, ctx)? {
                Some(value) => {
                    state.insert(name.clone(), value);
                }
                None => undefined.push(name.clone()),
            }
        }
        Ok((state, undefined))
    }

    // -----------------------------------------------------------------------
    // The reactive driver
    // -----------------------------------------------------------------------

    /// Top-level input names this graph's declarations reference as
    /// `inputs.<name>…`.
    #[must_use]
    pub fn expected_inputs(&self) -> Vec<String> {
        let mut out = Vec::new();
        for name in &self.core.order {
            for field in self.core.nodes[name].path_defs() {
                for (_, path) in &field.entries {
                    let (head, rest) = split_node_path(path);
                    if head != INPUTS_NODE {
                        continue;
                    }
                    let Some(rest) = rest else { continue };
                    let (input, _) = split_node_path(&rest);
                    if !out.contains(&input) {
                        out.push(input);
                    }
                }
            }
        }
        out
    }

    /// Run the graph to fixpoint.
    ///
    /// Validates that every expected top-level input is provided, writes the
    /// inputs (spawning completion tasks for deferred ones), then recomputes
    /// on every change until no visible node is absent. The returned future
    /// is boxed so child graphs can recurse through it.
    pub fn run(&self, inputs: RunInputs) -> BoxFuture<'static, Result<State>> {
        let graph = self.clone();
        Box::pin(async move {
            if graph.core.running.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    graph = %graph.core.name,
                    "run re-entered before the previous run settled; behavior is undefined"
                );
            }
            let result = graph.drive(inputs).await;
            graph.core.running.store(false, Ordering::SeqCst);
            match &result {
                Ok(state) => graph.core.events.emit(&GraphEvent::Resolved {
                    state: state.clone(),
                }),
                Err(error) => graph.core.events.emit(&GraphEvent::Error {
                    message: error.to_string(),
                }),
            }
            result
        })
    }

    async fn drive(&self, inputs: RunInputs) -> Result<State> {
        let missing: Vec<String> = self
            .expected_inputs()
            .into_iter()
            .filter(|name| !inputs.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingInputs(missing));
        }
        for key in inputs.keys() {
            if let Some(node) = self.core.nodes.get(key) {
                if !matches!(node.kind(), NodeKind::Echo { .. }) {
                    return Err(Error::InputCollision(key.clone()));
                }
            }
        }

        *self
            .core
            .provided_inputs
            .write()
            .expect("run state poisoned") = inputs.keys().cloned().collect();
        *self.core.run_failed.lock().expect("run state poisoned") = None;

        for (key, input) in inputs {
            match input {
                Input::Value(value) => self.write_input(&key, value),
                Input::Deferred(deferred) => {
                    let graph = self.clone();
                    tokio::spawn(async move {
                        match deferred.wait().await {
                            Ok(value) => graph.write_input(&key, value),
                            Err(reason) => {
                                graph.fail(Error::DeferredFailed { name: key, reason });
                            }
                        }
                    });
                }
            }
        }
        self.start_async_nodes();

        let started_at = Instant::now();
        loop {
            // Register interest before reading anything so a write that
            // lands mid-pass wakes the next await instead of being lost.
            let notified = self.core.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(error) = self
                .core
                .run_failed
                .lock()
                .expect("run state poisoned")
                .take()
            {
                return Err(error);
            }

            let mut ctx = EvalCtx::default();
            self.start_ready_subgraphs(&mut ctx)?;
            let (state, undefined_paths) = self.compute_step(&mut ctx)?;
            if undefined_paths.is_empty() {
                tracing::debug!(graph = %self.core.name, "settled");
                return Ok(state);
            }
            if self.core.options.log_undefined_paths {
                tracing::info!(
                    graph = %self.core.name,
                    depth = self.core.options.depth,
                    undefined = ?undefined_paths,
                    "step left paths unresolved"
                );
            }
            self.core.events.emit(&GraphEvent::Stepped {
                state,
                undefined_paths,
            });

            match self.core.options.run_timeout {
                Some(limit) => {
                    let remaining = limit
                        .checked_sub(started_at.elapsed())
                        .ok_or(Error::SyncRunTimeout(limit))?;
                    if tokio::time::timeout(remaining, &mut notified).await.is_err() {
                        return Err(Error::SyncRunTimeout(limit));
                    }
                }
                None => notified.await,
            }
        }
    }

    fn start_async_nodes(&self) {
        for name in &self.core.order {
            let NodeKind::Async {
                deferred,
                cell,
                started,
            } = self.core.nodes[name].kind()
            else {
                continue;
            };
            if started.swap(true, Ordering::SeqCst) {
                continue;
            }
            let deferred = deferred.clone();
            let cell = Arc::clone(cell);
            let graph = self.clone();
            let name = name.clone();
            tokio::spawn(async move {
                match deferred.wait().await {
                    Ok(value) => {
                        *cell.write().expect("async cell poisoned") = Some(value);
                        graph.notify_changed();
                    }
                    Err(reason) => graph.fail(Error::DeferredFailed { name, reason }),
                }
            });
        }
    }

    /// Write one resolved input and wake the driver.
    pub(crate) fn write_input(&self, key: &str, value: Value) {
        self.core
            .inputs_cell
            .write()
            .expect("inputs cell poisoned")
            .insert(key.to_string(), value);
        self.notify_changed();
    }

    /// Record the first asynchronous failure and wake the driver.
    pub(crate) fn fail(&self, error: Error) {
        let mut slot = self.core.run_failed.lock().expect("run state poisoned");
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.notify_changed();
    }

    pub(crate) fn notify_changed(&self) {
        self.core.changed.notify_waiters();
    }

    /// Top-level input names the current run was given (immediate and
    /// deferred alike); used by subgraph pass-through resolution.
    pub(crate) fn provided_input_names(&self) -> HashSet<String> {
        self.core
            .provided_inputs
            .read()
            .expect("run state poisoned")
            .clone()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.core.name)
            .field("nodes", &self.core.order.len())
            .field("edges", &self.core.edges.len())
            .field("depth", &self.core.options.depth)
            .finish()
    }
}

fn derive_edges(nodes: &HashMap<String, DNode>, order: &[String]) -> Vec<DEdge> {
    let mut edges = Vec::new();
    for name in order {
        for field in nodes[name].path_defs() {
            for (index, (key, path)) in field.entries.iter().enumerate() {
                let (dst_node_id, dst_value_path) = split_node_path(path);
                let src_prop_name = if field.shape == FieldShape::List && !field.has_subproperties
                {
                    index.to_string()
                } else {
                    key.clone()
                };
                edges.push(DEdge {
                    src_node_id: name.clone(),
                    src_prop_name,
                    dst_node_id,
                    dst_value_path,
                });
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::NodeDecl;
    use serde_json::json;

    fn def(v: Value) -> GraphDef {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_construction_rejects_unknown_kind() {
        let err = Graph::new(
            def(json!([{"name": "x", "type": "wat"}])),
            GraphOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownNodeKind { .. }));
    }

    #[test]
    fn test_construction_rejects_duplicate_names() {
        let err = Graph::new(
            def(json!([
                {"name": "x", "type": "static", "value": 1},
                {"name": "x", "type": "static", "value": 2}
            ])),
            GraphOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateNodeName(_)));
    }

    #[test]
    fn test_static_and_alias_values() {
        let graph = Graph::new(
            def(json!([
                {"name": "greeting", "type": "static", "value": "hello"},
                {"name": "also", "type": "alias", "mirror": "greeting"}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        assert_eq!(graph.node_value("also").unwrap(), Some(json!("hello")));
    }

    #[test]
    fn test_aliases_field_produces_mirroring_nodes() {
        let graph = Graph::new(
            def(json!([
                {"name": "total", "type": "static", "value": 7, "aliases": ["sum"]}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        assert_eq!(graph.node_value("sum").unwrap(), Some(json!(7)));
    }

    #[test]
    fn test_transform_waits_for_absent_params() {
        let graph = Graph::new(
            def(json!([
                {"name": "t", "type": "transform", "fn": "mult",
                 "params": {"amt": "inputs.x", "factor": 3}}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        // Input not written yet: absent, not an error.
        assert_eq!(graph.node_value("t").unwrap(), None);
        graph.write_input("x", json!(4));
        assert_eq!(graph.node_value("t").unwrap(), Some(json!(12.0)));
    }

    #[test]
    fn test_literal_nodes_are_hidden_from_state() {
        let graph = Graph::new(
            def(json!([
                {"name": "t", "type": "transform", "fn": "mult",
                 "params": {"amt": "inputs.x", "factor": 3}}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        graph.write_input("x", json!(2));
        let state = graph.get_state(false).unwrap();
        assert_eq!(state.get("t"), Some(&json!(6.0)));
        assert!(!state.keys().any(|k| k.starts_with('#')));
        // But they are reachable when hidden nodes are included.
        let all = graph.get_state(true).unwrap();
        assert_eq!(all.get("#literal#t#factor"), Some(&json!(3)));
    }

    #[test]
    fn test_dereference_null_sentinel_and_missing_node() {
        let graph = Graph::new(
            def(json!([
                {"name": "obj", "type": "static", "value": {"a": 1}},
                {"name": "key", "type": "static", "value": "b"},
                {"name": "lookup", "type": "dereference",
                 "objectPath": "obj", "propNamePath": "key"}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        assert_eq!(graph.node_value("lookup").unwrap(), Some(json!(null)));
    }

    #[test]
    fn test_branch_selects_matching_case_and_default() {
        let graph = Graph::new(
            def(json!([
                {"name": "nodeA", "type": "static", "value": "from A"},
                {"name": "nodeB", "type": "static", "value": "from B"},
                {"name": "nodeC", "type": "static", "value": "fallback"},
                {"name": "b", "type": "branch",
                 "test": "inputs.mode",
                 "cases": ["a", "b", "_default_"],
                 "nodeNames": ["nodeA", "nodeB", "nodeC"]}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        graph.write_input("mode", json!("b"));
        assert_eq!(graph.node_value("b").unwrap(), Some(json!("from B")));
        graph.write_input("mode", json!("z"));
        assert_eq!(graph.node_value("b").unwrap(), Some(json!("fallback")));
    }

    #[test]
    fn test_branch_without_match_or_default_is_absent() {
        let graph = Graph::new(
            def(json!([
                {"name": "nodeA", "type": "static", "value": 1},
                {"name": "b", "type": "branch",
                 "test": "inputs.mode", "cases": ["a"], "nodeNames": ["nodeA"]}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        graph.write_input("mode", json!("nope"));
        assert_eq!(graph.node_value("b").unwrap(), None);
    }

    #[test]
    fn test_echo_shares_name_with_input() {
        let graph = Graph::new(
            def(json!([{"name": "rate", "type": "echo"}])),
            GraphOptions::default(),
        )
        .unwrap();
        graph.write_input("rate", json!(0.25));
        assert_eq!(graph.node_value("rate").unwrap(), Some(json!(0.25)));
    }

    #[test]
    fn test_expected_inputs_scan() {
        let graph = Graph::new(
            def(json!([
                {"name": "t", "type": "transform", "fn": "concat",
                 "params": ["inputs.first", "inputs.second"]},
                {"name": "a", "type": "alias", "mirror": "inputs.first"}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        assert_eq!(graph.expected_inputs(), vec!["first", "second"]);
    }

    #[test]
    fn test_edges_mirror_declared_reads() {
        let graph = Graph::new(
            def(json!([
                {"name": "arr", "type": "alias", "mirror": "inputs.things"},
                {"name": "t", "type": "transform", "fn": "mult",
                 "params": {"amt": "arr.0.amount", "factor": 2}}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        let edges = graph.get_dedges();
        assert!(edges.contains(&DEdge {
            src_node_id: "arr".to_string(),
            src_prop_name: "inputs.things".to_string(),
            dst_node_id: "inputs".to_string(),
            dst_value_path: Some("things".to_string()),
        }));
        assert!(edges.contains(&DEdge {
            src_node_id: "t".to_string(),
            src_prop_name: "amt".to_string(),
            dst_node_id: "arr".to_string(),
            dst_value_path: Some("0.amount".to_string()),
        }));
        // The hoisted literal is an edge target too.
        assert!(edges.iter().any(|e| {
            e.src_node_id == "t"
                && e.src_prop_name == "factor"
                && e.dst_node_id == "#literal#t#factor"
        }));
    }

    #[test]
    fn test_list_shaped_fields_label_edges_by_index() {
        let graph = Graph::new(
            def(json!([
                {"name": "x", "type": "static", "value": 1},
                {"name": "y", "type": "static", "value": 2},
                {"name": "b", "type": "branch",
                 "test": "inputs.mode", "cases": ["x", "y"], "nodeNames": ["x", "y"]}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        let labels: Vec<_> = graph
            .get_dedges()
            .iter()
            .filter(|e| e.src_node_id == "b" && e.dst_node_id != "inputs")
            .map(|e| e.src_prop_name.clone())
            .collect();
        assert_eq!(labels, vec!["0", "1"]);
    }

    #[test]
    fn test_programmatic_decl_builder() {
        let graph = Graph::new(
            vec![
                NodeDecl::new("base", "static").with_field("value", json!(10)),
                NodeDecl::new("doubled", "transform")
                    .with_field("fn", json!("mult"))
                    .with_field("params", json!({"amt": "base", "factor": 2})),
            ],
            GraphOptions::default(),
        )
        .unwrap();
        assert_eq!(graph.node_value("doubled").unwrap(), Some(json!(20.0)));
    }

    #[tokio::test]
    async fn test_run_rejects_missing_inputs() {
        let graph = Graph::new(
            def(json!([
                {"name": "a", "type": "alias", "mirror": "inputs.needed"}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        let err = graph.run(RunInputs::new()).await.unwrap_err();
        match err {
            Error::MissingInputs(names) => assert_eq!(names, vec!["needed"]),
            other => panic!("expected MissingInputs, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_rejects_input_collision() {
        let graph = Graph::new(
            def(json!([
                {"name": "x", "type": "static", "value": 1}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        let mut inputs = RunInputs::new();
        inputs.insert("x".to_string(), Input::Value(json!(2)));
        let err = graph.run(inputs).await.unwrap_err();
        assert!(matches!(err, Error::InputCollision(_)));
    }

    #[tokio::test]
    async fn test_run_settles_immediate_inputs() {
        let graph = Graph::new(
            def(json!([
                {"name": "t", "type": "transform", "fn": "mult",
                 "params": {"amt": "inputs.n", "factor": 3}}
            ])),
            GraphOptions::default(),
        )
        .unwrap();
        let mut inputs = RunInputs::new();
        inputs.insert("n".to_string(), Input::Value(json!(4)));
        let state = graph.run(inputs).await.unwrap();
        assert_eq!(state.get("t"), Some(&json!(12.0)));
    }
}
