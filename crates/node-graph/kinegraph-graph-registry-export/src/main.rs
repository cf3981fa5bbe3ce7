//! Dump the builtin node catalogue as JSON.
//!
//! Usage: `kinegraph-graph-registry-export [OUTPUT]`. Writes to stdout without an argument.

use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use kinegraph_graph_core::NodeTypeRegistry;

fn main() -> Result<()> {
    let catalogue = NodeTypeRegistry::builtin().export_json();
    let text = serde_json::to_string_pretty(&catalogue).context("serializing node catalogue")?;
    match std::env::args().nth(1) {
        Some(path) => {
            fs::write(&path, text).with_context(|| format!("writing {path}"))?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{text}").context("writing to stdout")?;
        }
    }
    Ok(())
}
