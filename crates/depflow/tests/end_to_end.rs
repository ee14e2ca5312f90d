//! End-to-end tests that prove the evaluator works.
//!
//! These tests verify:
//! - Reactive settling with immediate and deferred inputs (MUST pass)
//! - Every node kind's observable semantics (MUST pass)
//! - Subgraph composition, including templates and map mode (MUST pass)
//!
//! Run with:
//! ```bash
//! cargo test -p depflow --test end_to_end
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(clippy::float_cmp)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use depflow::{
    Deferred, Error, EventKind, Graph, GraphDef, GraphOptions, Input, NodeDecl, RunInputs,
};

fn def(v: Value) -> GraphDef {
    serde_json::from_value(v).unwrap()
}

fn inputs(pairs: Vec<(&str, Input)>) -> RunInputs {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

// ============================================================================
// Reactive settling
// ============================================================================

#[tokio::test]
async fn test_concat_and_multiply_with_deferred_input() {
    let graph = Graph::new(
        def(json!([
            {"name": "staticNode", "type": "static", "value": "hello, "},
            {"name": "aliasNode", "type": "alias", "mirror": "inputs.stringValue"},
            {"name": "concatExample", "type": "transform", "fn": "concat",
             "params": ["staticNode", "inputs.stringValue"]},
            {"name": "multiplyExample", "type": "transform", "fn": "mult",
             "params": {"amt": "inputs.numberValue", "factor": 3}}
        ])),
        GraphOptions::default(),
    )
    .unwrap();

    let steps = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&steps);
    graph.on(EventKind::Stepped, move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
    });

    let state = graph
        .run(inputs(vec![
            (
                "stringValue",
                Input::Deferred(Deferred::after(Duration::from_millis(50), json!("world"))),
            ),
            ("numberValue", Input::Value(json!(4))),
        ]))
        .await
        .unwrap();

    assert_eq!(state.get("staticNode"), Some(&json!("hello, ")));
    assert_eq!(state.get("aliasNode"), Some(&json!("world")));
    assert_eq!(state.get("concatExample"), Some(&json!("hello, world")));
    assert_eq!(state.get("multiplyExample"), Some(&json!(12.0)));
    // The deferred held the graph unsettled for at least one step.
    assert!(steps.load(Ordering::SeqCst) >= 1);
    // Inputs and synthesized nodes stay out of the visible state.
    assert!(!state.contains_key("inputs"));
    assert!(!state.keys().any(|k| k.starts_with('#')));
}

#[tokio::test]
async fn test_resolved_event_carries_final_state() {
    let graph = Graph::new(
        def(json!([
            {"name": "n", "type": "alias", "mirror": "inputs.n"}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    graph.on(EventKind::Resolved, move |event| {
        if let depflow::GraphEvent::Resolved { state } = event {
            sink.lock().unwrap().push(state.clone());
        }
    });
    graph
        .run(inputs(vec![("n", Input::Value(json!(1)))]))
        .await
        .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("n"), Some(&json!(1)));
}

// ============================================================================
// Path wildcards
// ============================================================================

#[tokio::test]
async fn test_wildcard_extraction_over_collection() {
    let graph = Graph::new(
        def(json!([
            {"name": "arr", "type": "alias", "mirror": "inputs.things"},
            {"name": "amounts", "type": "transform", "fn": "concatArrays",
             "params": {"a": "arr.*.amount"}}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph
        .run(inputs(vec![(
            "things",
            Input::Value(json!([{"amount": 4}, {"amount": 2}])),
        )]))
        .await
        .unwrap();
    assert_eq!(state.get("amounts"), Some(&json!([4, 2])));
}

// ============================================================================
// Dereference
// ============================================================================

#[tokio::test]
async fn test_dereference_miss_resolves_to_null() {
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
    // null is a resolved value, so the run settles instead of stalling.
    let state = graph.run(RunInputs::new()).await.unwrap();
    assert_eq!(state.get("lookup"), Some(&json!(null)));
}

#[tokio::test]
async fn test_dereference_hit_reads_through_paths() {
    let graph = Graph::new(
        def(json!([
            {"name": "table", "type": "alias", "mirror": "inputs.rates"},
            {"name": "which", "type": "alias", "mirror": "inputs.kind"},
            {"name": "rate", "type": "dereference",
             "objectPath": "table", "propNamePath": "which"}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph
        .run(inputs(vec![
            ("rates", Input::Value(json!({"flat": 10, "steep": 25}))),
            ("kind", Input::Value(json!("steep"))),
        ]))
        .await
        .unwrap();
    assert_eq!(state.get("rate"), Some(&json!(25)));
}

// ============================================================================
// Subgraphs
// ============================================================================

#[tokio::test]
async fn test_subgraph_map_mode_instantiates_template_per_element() {
    let graph = Graph::new(
        def(json!([
            {"name": "mapItem", "type": "graph", "isTemplate": true, "graphDef": [
                {"name": "foo", "type": "transform", "fn": "mult",
                 "params": {"amt": "inputs.bar", "factor": 5}}
            ]},
            {"name": "result", "type": "graph", "graphDef": "mapItem",
             "collectionMode": "map", "inputs": "inputs.itemsToBeMapped.*"}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph
        .run(inputs(vec![(
            "itemsToBeMapped",
            Input::Value(json!([{"bar": 2}, {"bar": 3}, {"bar": 5}])),
        )]))
        .await
        .unwrap();
    assert_eq!(
        state.get("result"),
        Some(&json!([{"foo": 10.0}, {"foo": 15.0}, {"foo": 25.0}]))
    );
    // Templates stay hidden.
    assert!(!state.contains_key("mapItem"));
}

#[tokio::test]
async fn test_subgraph_map_mode_rejects_non_array_collection() {
    let graph = Graph::new(
        def(json!([
            {"name": "mapItem", "type": "graph", "isTemplate": true, "graphDef": [
                {"name": "foo", "type": "transform", "fn": "mult",
                 "params": {"amt": "inputs.bar", "factor": 5}}
            ]},
            {"name": "result", "type": "graph", "graphDef": "mapItem",
             "collectionMode": "map", "inputs": "inputs.itemsToBeMapped"}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let err = graph
        .run(inputs(vec![(
            "itemsToBeMapped",
            Input::Value(json!({"not": "an array"})),
        )]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CollectionNotArray { .. }));
}

#[tokio::test]
async fn test_subgraph_default_mode_with_pass_through_inputs() {
    // The child references inputs.n; the parent has no node `n`, so the
    // reference passes through to the parent run's inputs.
    let graph = Graph::new(
        def(json!([
            {"name": "child", "type": "graph", "graphDef": [
                {"name": "double", "type": "transform", "fn": "mult",
                 "params": {"amt": "inputs.n", "factor": 2}}
            ]}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph
        .run(inputs(vec![("n", Input::Value(json!(21)))]))
        .await
        .unwrap();
    assert_eq!(state.get("child"), Some(&json!({"double": 42.0})));
}

#[tokio::test]
async fn test_subgraph_explicit_inputs_resolve_against_parent_nodes() {
    let graph = Graph::new(
        def(json!([
            {"name": "base", "type": "static", "value": 7},
            {"name": "child", "type": "graph",
             "inputs": {"n": "base"},
             "graphDef": [
                {"name": "tripled", "type": "transform", "fn": "mult",
                 "params": {"amt": "inputs.n", "factor": 3}}
            ]}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph.run(RunInputs::new()).await.unwrap();
    assert_eq!(state.get("child"), Some(&json!({"tripled": 21.0})));
}

#[tokio::test]
async fn test_nested_subgraph_reaches_root_inputs() {
    // Two levels down, `inputs.deep` resolves against the root run.
    let graph = Graph::new(
        def(json!([
            {"name": "mid", "type": "graph", "graphDef": [
                {"name": "leaf", "type": "graph", "graphDef": [
                    {"name": "a", "type": "alias", "mirror": "inputs.deep"}
                ]}
            ]}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph
        .run(inputs(vec![("deep", Input::Value(json!(7)))]))
        .await
        .unwrap();
    assert_eq!(state.get("mid"), Some(&json!({"leaf": {"a": 7}})));
}

#[tokio::test]
async fn test_subgraph_unresolvable_input_rejects_run() {
    let graph = Graph::new(
        def(json!([
            {"name": "child", "type": "graph", "graphDef": [
                {"name": "a", "type": "alias", "mirror": "inputs.nowhere"}
            ]}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let err = graph.run(RunInputs::new()).await.unwrap_err();
    match err {
        Error::Resolution { reference, .. } => assert_eq!(reference, "nowhere"),
        other => panic!("expected Resolution, got {other}"),
    }
}

// ============================================================================
// Literal inference
// ============================================================================

#[tokio::test]
async fn test_literal_inference_synthesizes_hidden_static_node() {
    let graph = Graph::new(
        def(json!([
            {"name": "t", "type": "transform", "fn": "mult",
             "params": {"amt": "inputs.x", "factor": 3}}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph
        .run(inputs(vec![("x", Input::Value(json!(4)))]))
        .await
        .unwrap();
    assert_eq!(state.get("t"), Some(&json!(12.0)));
    assert!(!state.contains_key("#literal#t#factor"));

    let literal = graph.get_dnode("#literal#t#factor", false).unwrap();
    assert_eq!(
        graph.node_value(literal.name()).unwrap(),
        Some(json!(3))
    );
    // Including hidden nodes surfaces it.
    let echoed = graph.get_state(true).unwrap();
    assert_eq!(echoed.get("#literal#t#factor"), Some(&json!(3)));
}

// ============================================================================
// Branch
// ============================================================================

#[tokio::test]
async fn test_branch_falls_back_to_default_case() {
    let graph = Graph::new(
        def(json!([
            {"name": "nodeA", "type": "static", "value": "chose A"},
            {"name": "nodeB", "type": "static", "value": "chose B"},
            {"name": "nodeC", "type": "static", "value": "chose C"},
            {"name": "b", "type": "branch",
             "test": "inputs.mode",
             "cases": ["a", "b", "_default_"],
             "nodeNames": ["nodeA", "nodeB", "nodeC"]}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph
        .run(inputs(vec![("mode", Input::Value(json!("z")))]))
        .await
        .unwrap();
    assert_eq!(state.get("b"), Some(&json!("chose C")));
}

// ============================================================================
// Async nodes and failure paths
// ============================================================================

#[tokio::test]
async fn test_async_node_resolves_from_its_deferred() {
    let graph = Graph::new(
        vec![
            NodeDecl::new("fetched", "async")
                .with_promise(Deferred::after(Duration::from_millis(20), json!(99))),
            NodeDecl::new("doubled", "transform")
                .with_field("fn", json!("mult"))
                .with_field("params", json!({"amt": "fetched", "factor": 2})),
        ],
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph.run(RunInputs::new()).await.unwrap();
    assert_eq!(state.get("fetched"), Some(&json!(99)));
    assert_eq!(state.get("doubled"), Some(&json!(198.0)));
}

#[tokio::test]
async fn test_failing_deferred_rejects_run_and_fires_error() {
    let graph = Graph::new(
        def(json!([
            {"name": "a", "type": "alias", "mirror": "inputs.doomed"}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let errors = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&errors);
    graph.on(EventKind::Error, move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    let err = graph
        .run(inputs(vec![(
            "doomed",
            Input::Deferred(Deferred::failed("backend unavailable")),
        )]))
        .await
        .unwrap_err();
    match err {
        Error::DeferredFailed { name, reason } => {
            assert_eq!(name, "doomed");
            assert_eq!(reason, "backend unavailable");
        }
        other => panic!("expected DeferredFailed, got {other}"),
    }
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unresolvable_run_times_out_when_configured() {
    let graph = Graph::new(
        def(json!([
            {"name": "a", "type": "alias", "mirror": "inputs.never"}
        ])),
        GraphOptions {
            run_timeout: Some(Duration::from_millis(80)),
            ..GraphOptions::default()
        },
    )
    .unwrap();
    let err = graph
        .run(inputs(vec![(
            "never",
            Input::Deferred(Deferred::new(futures::future::pending())),
        )]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SyncRunTimeout(_)));
}

#[tokio::test]
async fn test_transform_failure_rejects_run() {
    let graph = Graph::new(
        def(json!([
            {"name": "bad", "type": "transform", "fn": "div",
             "params": {"amt": "inputs.n", "divisor": 0}}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let err = graph
        .run(inputs(vec![("n", Input::Value(json!(1)))]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transform { .. }));
}

// ============================================================================
// Options
// ============================================================================

#[tokio::test]
async fn test_echo_inputs_surfaces_the_inputs_node() {
    let graph = Graph::new(
        def(json!([
            {"name": "a", "type": "alias", "mirror": "inputs.n"}
        ])),
        GraphOptions {
            echo_inputs: true,
            ..GraphOptions::default()
        },
    )
    .unwrap();
    let state = graph
        .run(inputs(vec![("n", Input::Value(json!(5)))]))
        .await
        .unwrap();
    assert_eq!(state.get("inputs"), Some(&json!({"n": 5})));
}

#[tokio::test]
async fn test_is_hidden_nodes_stay_out_of_state() {
    let graph = Graph::new(
        def(json!([
            {"name": "secret", "type": "static", "value": 42, "isHidden": true},
            {"name": "shown", "type": "alias", "mirror": "secret"}
        ])),
        GraphOptions::default(),
    )
    .unwrap();
    let state = graph.run(RunInputs::new()).await.unwrap();
    assert!(!state.contains_key("secret"));
    assert_eq!(state.get("shown"), Some(&json!(42)));
}
