//! Migrate command implementation

use crate::cli::MigrateArgs;
use crate::commands::resolve_config;
use anyhow::{Context, Result};
use colored::Colorize;
use porter_core::{JsonLinesImporter, MigrationSummary, Migrator};

/// Run the full two-pass migration and print the final accounting.
pub async fn execute(args: MigrateArgs) -> Result<()> {
    let mut config = resolve_config(&args.spec)?;
    if args.continue_on_error {
        config.continue_on_error = true;
    }

    let mut importer = JsonLinesImporter::new(&args.target_dir)
        .with_context(|| format!("opening entity sink in {}", args.target_dir.display()))?;
    let mut migrator = Migrator::new(config)?;
    let summary = migrator.run(&mut importer).await?;

    print_summary(&summary, &args);
    Ok(())
}

fn print_summary(summary: &MigrationSummary, args: &MigrateArgs) {
    println!(
        "{} {} entities imported, {} assets fetched",
        "Migration complete:".green().bold(),
        summary.entities_imported,
        summary.assets_fetched
    );
    println!("Entities written to {}", args.target_dir.display());

    if !summary.asset_failures.is_empty() {
        println!(
            "{} {} asset(s) could not be fetched:",
            "Warning:".yellow().bold(),
            summary.asset_failures.len()
        );
        for failure in &summary.asset_failures {
            println!("  {} — {}", failure.source_url, failure.error);
        }
        println!("Re-run the migration to retry; satisfied assets are never re-fetched.");
    }

    if !summary.entity_failures.is_empty() {
        println!(
            "{} {} entity(ies) were rejected by the store:",
            "Warning:".yellow().bold(),
            summary.entity_failures.len()
        );
        for failure in &summary.entity_failures {
            println!("  {} — {}", failure.source_identity, failure.error);
        }
    }
}
