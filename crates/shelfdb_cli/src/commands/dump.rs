//! Dump command implementation.

use super::decode;
use shelfdb_codec::Object;
use shelfdb_core::{ResourceRole, Store};

/// Reads and decodes one resource file.
pub fn load(store: &Store, resource: &str) -> Result<Vec<Object>, Box<dyn std::error::Error>> {
    let bytes = store
        .backend()
        .read(resource)?
        .ok_or_else(|| format!("No resource {resource:?} in store"))?;
    Ok(decode(store.codec().as_ref(), &ResourceRole::of(resource), &bytes)?)
}

/// Runs the dump command.
pub fn run(store: &Store, resource: &str) -> Result<(), Box<dyn std::error::Error>> {
    let objects = load(store, resource)?;
    println!("{}", serde_json::to_string_pretty(&objects)?);
    Ok(())
}
