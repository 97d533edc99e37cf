//! Scan command implementation

use crate::cli::ScanArgs;
use crate::commands::resolve_config;
use anyhow::Result;
use colored::Colorize;
use porter_core::Migrator;

/// Dry run: list every asset a migration would download, without fetching
/// or importing anything.
pub fn execute(args: ScanArgs) -> Result<()> {
    let config = resolve_config(&args.spec)?;
    let migrator = Migrator::new(config)?;
    let references = migrator.discover_assets()?;

    if references.is_empty() {
        println!("{}", "No asset references found.".dimmed());
        return Ok(());
    }

    for reference in &references {
        println!(
            "{}  {}  {}",
            reference.target_filename.cyan(),
            reference.source_url,
            format!("(from {})", reference.source_identity).dimmed()
        );
    }
    println!(
        "{} {} asset(s) would be downloaded",
        "Scan complete:".green().bold(),
        references.len()
    );
    Ok(())
}
