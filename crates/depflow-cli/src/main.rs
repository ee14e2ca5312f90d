// Copyright 2026 the DepFlow authors
// Allow clippy warnings for CLI application
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! DepFlow CLI - evaluate a JSON graph definition to its settled state
//!
//! The first `--graph-definitions` file is the top-level graph; each
//! remaining file is embedded as a `graph` node named after its file stem.
//! Template files (`--templates`) embed the same way with `isTemplate`
//! set. The settled state prints as pretty JSON on stdout; load or run
//! failures exit non-zero with the error on stderr.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use depflow::{run_inputs_from_json, Graph, GraphDef, GraphOptions, NodeDecl, RunInputs};

/// Evaluate a dependency graph described as JSON node declarations.
#[derive(Parser)]
#[command(name = "depflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Graph definition files; the first is the top-level graph, the rest
    /// embed as graph nodes named after their file stems
    #[arg(long = "graph-definitions", value_name = "PATH", num_args = 1.., required = true)]
    graph_definitions: Vec<PathBuf>,

    /// Template definition files, embedded with isTemplate set
    #[arg(long, value_name = "PATH", num_args = 0..)]
    templates: Vec<PathBuf>,

    /// JSON file holding the run's input mapping
    #[arg(long, value_name = "PATH")]
    inputs: Option<PathBuf>,

    /// Include the inputs node in the output state
    #[arg(long)]
    echo_inputs: bool,

    /// Include template nodes in the output state
    #[arg(long)]
    echo_templates: bool,

    /// Log unresolved paths after every step
    #[arg(long)]
    log_undefined_paths: bool,

    /// Log string fields interpreted as literals rather than references
    #[arg(long)]
    log_literals: bool,

    /// Fail if the run has not settled after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn node_name_for(path: &Path) -> Result<String> {
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => bail!("cannot derive a node name from {}", path.display()),
    }
}

/// Embed a definition file as a `graph` node named after the file.
fn embedded_node(path: &Path, is_template: bool) -> Result<NodeDecl> {
    let def = load_json(path)?;
    if !def.is_array() {
        bail!(
            "{} must contain an array of node declarations",
            path.display()
        );
    }
    let mut decl = NodeDecl::new(node_name_for(path)?, "graph").with_field("graphDef", def);
    if is_template {
        decl = decl.with_field("isTemplate", Value::Bool(true));
    }
    Ok(decl)
}

fn build_definition(cli: &Cli) -> Result<GraphDef> {
    let (top, embedded) = cli
        .graph_definitions
        .split_first()
        .expect("clap enforces at least one graph definition");

    let mut def: GraphDef = serde_json::from_value(load_json(top)?)
        .with_context(|| format!("invalid graph definition in {}", top.display()))?;
    for path in embedded {
        def.push(embedded_node(path, false)?);
    }
    for path in &cli.templates {
        def.push(embedded_node(path, true)?);
    }
    Ok(def)
}

fn load_inputs(cli: &Cli) -> Result<RunInputs> {
    match &cli.inputs {
        Some(path) => {
            let value = load_json(path)?;
            if !value.is_object() {
                bail!("{} must contain a JSON object", path.display());
            }
            Ok(run_inputs_from_json(value))
        }
        None => Ok(RunInputs::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let def = build_definition(&cli)?;
    let inputs = load_inputs(&cli)?;
    let options = GraphOptions {
        echo_inputs: cli.echo_inputs,
        echo_templates: cli.echo_templates,
        log_undefined_paths: cli.log_undefined_paths,
        log_literals: cli.log_literals,
        run_timeout: cli.timeout_secs.map(Duration::from_secs),
        ..GraphOptions::default()
    };

    let graph = Graph::new(def, options).context("graph construction failed")?;
    tracing::info!(
        graph = graph.name(),
        nodes = graph.get_dnodes().len(),
        edges = graph.get_dedges().len(),
        inputs = inputs.len(),
        "graph connected; running"
    );
    let state = graph.run(inputs).await.context("run failed")?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
