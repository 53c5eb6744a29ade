// src/process/mod.rs
pub mod coerce;
pub mod convert;
pub mod schema;
pub mod utils;
pub mod write;

use anyhow::{bail, Context, Result};
use arrow::record_batch::RecordBatch;
use glob::{glob, Pattern};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use coerce::{coerce_text_columns, CoercionReport};
pub use convert::{convert_dta_to_parquet, ConvertOutcome};
pub use write::{read_table, write_table};

/// One cohort's rows, named after its source file stem.
#[derive(Debug, Clone)]
pub struct CohortTable {
    pub name: String,
    pub batch: RecordBatch,
}

impl CohortTable {
    pub fn new(name: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            name: name.into(),
            batch,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

/// Files in `dir` (non-recursive) ending in `.<suffix>`, sorted by path.
pub fn discover_cohorts<P: AsRef<Path>>(dir: P, suffix: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        bail!("cohort directory {} does not exist", dir.display());
    }
    let pattern = format!(
        "{}/*.{}",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(suffix)
    );
    let mut paths: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("Failed to read glob pattern '{}'", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    debug!(count = paths.len(), %pattern, "discovered cohort files");
    Ok(paths)
}

/// Read one cohort file (`.dta` or `.parquet`).
pub fn load_cohort<P: AsRef<Path>>(path: P) -> Result<CohortTable> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("no file name in {}", path.display()))?;
    let batch = read_table(path).with_context(|| format!("loading cohort {}", name))?;
    Ok(CohortTable::new(name, batch))
}
