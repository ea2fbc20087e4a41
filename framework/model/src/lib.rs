use std::io::BufRead;
use std::path::Path;

use anyhow::Context;
use serde_json::Value;

pub mod category;
pub mod event;
pub mod fields;
pub mod health;
pub mod metrics;
pub mod query;

/// Load documents from a file
///
/// The file should contain one JSON object per line. Blank lines are skipped.
pub fn load_documents(path: &Path) -> anyhow::Result<Vec<Value>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    let mut documents = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document: Value = serde_json::from_str(&line)
            .with_context(|| format!("Invalid document on line {}", number + 1))?;
        documents.push(document);
    }
    Ok(documents)
}
