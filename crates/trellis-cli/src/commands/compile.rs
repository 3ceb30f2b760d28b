//! Compile command implementation

use anyhow::{Context, Result};
use serde::Serialize;
use trellis::{parse, SelectionGraph};

#[derive(Serialize)]
struct CompileOutput<'a> {
    selection: String,
    graph: &'a SelectionGraph,
    inputs: Vec<String>,
}

pub fn execute(selection: &str, compact: bool) -> Result<()> {
    tracing::debug!("Compiling selection: {}", selection);

    let predicate = parse(selection).context("Failed to parse selection")?;
    let graph = SelectionGraph::compile(&predicate).context("Failed to compile selection")?;
    tracing::debug!(
        sources = graph.sources.len(),
        logic = graph.logic.len(),
        "Compiled graph"
    );

    let output = CompileOutput {
        selection: predicate.to_string(),
        graph: &graph,
        inputs: graph.input_keys(),
    };
    let json = if compact {
        serde_json::to_string(&output)?
    } else {
        serde_json::to_string_pretty(&output)?
    };
    println!("{}", json);
    Ok(())
}
