//! Basic DepFlow Example - Pricing a Line Item
//!
//! This example builds a small dependency graph from JSON, feeds it one
//! immediate and one deferred input, and prints the settled state.
//!
//! Run with:
//! ```bash
//! cargo run --package depflow --example basic_graph
//! ```

use std::time::Duration;

use depflow::{Deferred, EventKind, Graph, GraphOptions, Input, RunInputs};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let def = serde_json::from_value(json!([
        {"name": "label", "type": "static", "value": "subtotal: "},
        {"name": "qty", "type": "alias", "mirror": "inputs.quantity"},
        {"name": "subtotal", "type": "transform", "fn": "mult",
         "params": {"amt": "inputs.unitPrice", "factor": "inputs.quantity"}},
        {"name": "total", "type": "transform", "fn": "roundCurrency",
         "params": {"amt": "subtotal"}},
        {"name": "display", "type": "transform", "fn": "concat",
         "params": ["label", "total"]}
    ]))?;

    let graph = Graph::new(def, GraphOptions::default())?;
    graph.on(EventKind::Stepped, |event| {
        if let depflow::GraphEvent::Stepped {
            undefined_paths, ..
        } = event
        {
            println!("still waiting on: {undefined_paths:?}");
        }
    });

    let mut inputs = RunInputs::new();
    inputs.insert("quantity".to_string(), Input::Value(json!(3)));
    // The unit price arrives late, as if fetched from a catalog service.
    inputs.insert(
        "unitPrice".to_string(),
        Input::Deferred(Deferred::after(Duration::from_millis(300), json!(19.999))),
    );

    let state = graph.run(inputs).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
