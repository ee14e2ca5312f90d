// Copyright 2026 the DepFlow authors

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::float_cmp))]

//! # `DepFlow` - Reactive dependency-graph evaluation
//!
//! `DepFlow` evaluates serializable business logic: you describe a directed
//! dependency graph as JSON node declarations, hand it a mapping of named
//! inputs (any of which may arrive later as a [`Deferred`]), and the engine
//! recomputes every downstream node whenever something resolves until all
//! visible nodes have values.
//!
//! ## Key Concepts
//!
//! - **[`Graph`]**: the node table, derived edges, and the reactive driver
//! - **Nodes**: a closed set of kinds - literals, aliases, transforms,
//!   conditional branches, dynamic dereferences, embedded subgraphs
//! - **Paths**: dotted strings addressing into node values, with a single
//!   `*` wildcard selecting all elements of an array
//! - **Transforms**: a process-wide registry of pure functions applied once
//!   their parameters resolve
//!
//! ## Example
//!
//! ```rust,ignore
//! use depflow::{Deferred, Graph, GraphOptions, Input};
//! use serde_json::json;
//!
//! let def = serde_json::from_value(json!([
//!     {"name": "staticNode", "type": "static", "value": "hello, "},
//!     {"name": "concatExample", "type": "transform", "fn": "concat",
//!      "params": ["staticNode", "inputs.stringValue"]},
//!     {"name": "multiplyExample", "type": "transform", "fn": "mult",
//!      "params": {"amt": "inputs.numberValue", "factor": 3}}
//! ]))?;
//!
//! let graph = Graph::new(def, GraphOptions::default())?;
//! let mut inputs = depflow::RunInputs::new();
//! inputs.insert("stringValue".into(), Input::Deferred(Deferred::ready(json!("world"))));
//! inputs.insert("numberValue".into(), Input::Value(json!(4)));
//!
//! let state = graph.run(inputs).await?;
//! assert_eq!(state["concatExample"], json!("hello, world"));
//! assert_eq!(state["multiplyExample"], json!(12.0));
//! ```
//!
//! ## Reactive model
//!
//! Evaluation is single-threaded and cooperative: a recomputation pass
//! synchronously walks declared dependencies (memoized per pass), and the
//! driver suspends only on user-supplied deferreds and child-graph runs.
//! The sequence of `stepped` events is a prefix of the true dependency
//! order; a graph whose deferreds never resolve stalls (or fails with
//! [`Error::SyncRunTimeout`] when a timeout is configured).

pub mod decl;
pub mod deferred;
pub mod error;
pub mod event;
pub mod graph;
pub mod node;
pub mod path;
pub mod subgraph;
pub mod transforms;

pub use decl::{Aliases, FieldShape, GraphDef, NodeDecl, PathDef, PathFieldSpec};
pub use deferred::{Deferred, DeferredResult, Input};
pub use error::{Error, Result};
pub use event::{EventKind, GraphEvent, ListenerId};
pub use graph::{
    run_inputs_from_json, DEdge, Graph, GraphOptions, RunInputs, State, TEMPLATE_PLACEHOLDER,
};
pub use node::{DNode, NodeKind};
pub use subgraph::CollectionMode;
