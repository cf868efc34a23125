//! Verify command implementation.

use shelfdb_core::{FragmentReport, Store};

/// Runs the verify command.
pub fn run(store: &Store, class: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying fragments of {class}");
    println!();

    let report = store.verify_fragments(class)?;
    print_report(&report);

    println!();
    if report.is_consistent() {
        println!("✓ Fragment verification passed");
        Ok(())
    } else {
        println!("✗ Fragment verification failed");
        Err("Verification failed".into())
    }
}

fn print_report(report: &FragmentReport) {
    println!("Index records: {}", report.indexed);
    println!("Fragments:     {}", report.fragments.len());
    for (fragment, count) in &report.fragments {
        println!("  {fragment}: {count} objects");
    }
    for id in &report.missing {
        println!("  missing from its fragment: {id}");
    }
    for id in &report.unindexed {
        println!("  not in the index: {id}");
    }
    for fragment in &report.over_capacity {
        println!("  over capacity: {fragment}");
    }
}
