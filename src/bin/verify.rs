// src/bin/verify.rs
//
// Compares the row count of every quarterly .dta file with its converted
// Parquet file. Read-only; files are inspected in parallel.

use anyhow::{Context, Result};
use enoe_panel::{config::PipelineConfig, dta, logging};
use glob::{glob, Pattern};
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Rows in the .dta, and in the .parquet when one exists.
fn count_pair(dta_path: &Path) -> Result<(usize, Option<usize>)> {
    let dta_rows = dta::read_header(dta_path)?.nobs as usize;
    let pq_path = dta_path.with_extension("parquet");
    if !pq_path.exists() {
        return Ok((dta_rows, None));
    }
    let file = File::open(&pq_path)
        .with_context(|| format!("Failed to open Parquet '{}'", pq_path.display()))?;
    let reader = SerializedFileReader::new(file)
        .with_context(|| format!("Failed to read Parquet '{}'", pq_path.display()))?;
    Ok((
        dta_rows,
        Some(reader.metadata().file_metadata().num_rows() as usize),
    ))
}

fn main() -> Result<()> {
    logging::init();
    let config = PipelineConfig::load()?;

    // 1) Find all quarter .dta files
    let dta_pattern = format!(
        "{}/*.dta",
        Pattern::escape(&config.quarters_dir.to_string_lossy())
    );
    let mut dta_paths: Vec<PathBuf> = glob(&dta_pattern)
        .with_context(|| format!("Failed to read glob pattern '{}'", dta_pattern))?
        .filter_map(|entry| entry.ok())
        .collect();
    if dta_paths.is_empty() {
        return Err(anyhow::anyhow!("No .dta files found under '{}'", dta_pattern));
    }
    dta_paths.sort();

    // 2) In parallel: header row counts vs Parquet metadata
    let counts: Vec<(usize, Option<usize>)> = dta_paths
        .par_iter()
        .map(|p| count_pair(p))
        .collect::<Result<Vec<_>>>()?;

    // 3) Print summary table
    println!(
        "\n{: <25} {:>12} {:>12} {:>10}",
        "File", "dta rows", "parquet", "status"
    );
    println!("{:-<62}", "");
    let mut mismatched = 0;
    let mut missing = 0;
    for (path, (dta_rows, pq_rows)) in dta_paths.iter().zip(&counts) {
        let name = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let (pq, status) = match pq_rows {
            None => {
                missing += 1;
                ("-".to_string(), "missing")
            }
            Some(n) if n == dta_rows => (n.to_string(), "ok"),
            Some(n) => {
                mismatched += 1;
                warn!(file = %name, dta_rows, parquet_rows = n, "row count mismatch");
                (n.to_string(), "MISMATCH")
            }
        };
        println!("{: <25} {:>12} {:>12} {:>10}", name, dta_rows, pq, status);
    }

    info!(
        files = dta_paths.len(),
        missing, mismatched, "verification finished"
    );
    Ok(())
}
