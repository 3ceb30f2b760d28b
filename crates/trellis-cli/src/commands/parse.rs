//! Parse command implementation

use anyhow::{Context, Result};
use trellis::parse;

pub fn execute(selection: &str) -> Result<()> {
    tracing::debug!("Parsing selection: {}", selection);

    let predicate = parse(selection).context("Failed to parse selection")?;
    println!("{}", predicate);
    if predicate.contains_negation() {
        println!("note: contains negation; usable for queries, not for subscriptions");
    }
    Ok(())
}
