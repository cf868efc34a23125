//! Inspect command implementation.

use super::decode;
use serde::Serialize;
use shelfdb_core::{ResourceRole, Store};
use std::collections::BTreeMap;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Codec the files are read with.
    pub codec: String,
    /// Total size in bytes.
    pub total_size: u64,
    /// Every resource file.
    pub resources: Vec<ResourceStats>,
    /// Per-class totals.
    pub classes: BTreeMap<String, ClassStats>,
}

/// Statistics for a single resource file.
#[derive(Debug, Serialize)]
pub struct ResourceStats {
    /// Resource id.
    pub id: String,
    /// Role of the file (`class`, `object`, `references`, `index`, `fragment`).
    pub role: String,
    /// Number of entries.
    pub entries: usize,
    /// File size in bytes.
    pub size: u64,
}

/// Totals for one class.
#[derive(Debug, Default, Serialize)]
pub struct ClassStats {
    /// Stored objects, excluding references and index records.
    pub objects: usize,
    /// Number of files.
    pub files: usize,
    /// Total size in bytes.
    pub size: u64,
}

/// Collects statistics for every resource file in the store.
pub fn collect(store: &Store) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let backend = store.backend();
    let codec = store.codec();

    let mut result = InspectResult {
        path: store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        codec: codec.name().to_string(),
        total_size: 0,
        resources: Vec::new(),
        classes: BTreeMap::new(),
    };

    for key in backend.keys()? {
        let Some(bytes) = backend.read(&key)? else {
            continue;
        };
        let role = ResourceRole::of(&key);
        let entries = decode(codec.as_ref(), &role, &bytes)?.len();
        let size = bytes.len() as u64;

        let class = result.classes.entry(role.class().to_string()).or_default();
        class.files += 1;
        class.size += size;
        if matches!(
            role,
            ResourceRole::ClassFile { .. } | ResourceRole::ObjectFile { .. } | ResourceRole::Fragment { .. }
        ) {
            class.objects += entries;
        }

        result.total_size += size;
        result.resources.push(ResourceStats {
            id: key,
            role: role.name().to_string(),
            entries,
            size,
        });
    }

    Ok(result)
}

/// Runs the inspect command.
pub fn run(store: &Store, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(store)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_text_output(&result);
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("shelfdb Store Inspection");
    println!("========================");
    println!();
    println!("Path:  {}", result.path);
    println!("Codec: {}", result.codec);
    println!("Size:  {}", format_size(result.total_size));
    println!();
    println!("Classes:");
    for (name, class) in &result.classes {
        println!(
            "  {:<24} {:>8} objects {:>4} files {:>10}",
            name,
            class.objects,
            class.files,
            format_size(class.size)
        );
    }
    println!();
    println!("Resources:");
    for resource in &result.resources {
        println!(
            "  {:<48} {:<10} {:>8} entries {:>10}",
            resource.id,
            resource.role,
            resource.entries,
            format_size(resource.size)
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
