use crate::agent::initialize_database;
use crate::cli::Args;
use crate::ingest::{ self, flavor, sections, tables };
use crate::rag::database::{ CookingDb, IngestReport };

use log::{ info, warn };
use std::error::Error;
use std::path::Path;

/// Extracts the raw downloads and builds the vector index from them.
pub async fn run_setup(args: &Args, reset: bool) -> Result<IngestReport, Box<dyn Error + Send + Sync>> {
    let db = initialize_database(args).await?;
    build_index(&db, Path::new(&args.raw_data_dir), Path::new(&args.processed_data_dir), reset).await
}

pub async fn build_index(
    db: &CookingDb,
    raw_dir: &Path,
    processed_dir: &Path,
    reset: bool
) -> Result<IngestReport, Box<dyn Error + Send + Sync>> {
    info!("🚀 Starting misohelpful project setup...");
    ingest::ensure_dir(raw_dir)?;
    ingest::ensure_dir(processed_dir)?;

    info!("--- Extracting Data ---");
    let flavor_report = flavor::process_flavor_network(raw_dir, processed_dir)?;
    if flavor_report.ingredient_data.is_none() && flavor_report.cuisine_data.is_none() {
        warn!("No flavor network data extracted from {}", raw_dir.display());
    }
    sections::process_text_sections(raw_dir, processed_dir)?;
    tables::process_text_tables(raw_dir, processed_dir)?;

    info!("--- Building Vector Database ---");
    if reset {
        db.reset().await?;
    }
    let report = db.ingest_data(processed_dir).await?;
    for (kind, count) in &report.by_type {
        info!("  {}: {}", kind, count);
    }

    info!("✅ Setup complete! Run `misohelpful serve` to start.");
    Ok(report)
}
