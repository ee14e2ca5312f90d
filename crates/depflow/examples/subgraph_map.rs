//! Subgraph Map Example - One Template, Many Elements
//!
//! A template graph prices a single order line; the parent graph maps it
//! over a collection input, producing one child run per element with the
//! results in element order.
//!
//! Run with:
//! ```bash
//! cargo run --package depflow --example subgraph_map
//! ```

use depflow::{Graph, GraphOptions, Input, RunInputs};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let def = serde_json::from_value(json!([
        {"name": "priceLine", "type": "graph", "isTemplate": true, "graphDef": [
            {"name": "gross", "type": "transform", "fn": "mult",
             "params": {"amt": "inputs.unitPrice", "factor": "inputs.quantity"}},
            {"name": "net", "type": "transform", "fn": "subFactor",
             "params": {"amt": "gross", "factor": "inputs.discount"}}
        ]},
        {"name": "lines", "type": "graph", "graphDef": "priceLine",
         "collectionMode": "map", "inputs": "inputs.order.*"}
    ]))?;

    let graph = Graph::new(def, GraphOptions::default())?;
    let mut inputs = RunInputs::new();
    inputs.insert(
        "order".to_string(),
        Input::Value(json!([
            {"unitPrice": 10.0, "quantity": 2, "discount": 0.0},
            {"unitPrice": 99.5, "quantity": 1, "discount": 0.1},
            {"unitPrice": 4.25, "quantity": 12, "discount": 0.25}
        ])),
    );

    let state = graph.run(inputs).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
