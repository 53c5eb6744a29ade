// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Optional override file, looked up in the working directory.
pub const CONFIG_FILE: &str = "enoe.yaml";

/// Every path and column name the pipeline uses. Defaults are the fixed
/// layout of the research project; `enoe.yaml` may replace any of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one cleaned file per cohort.
    pub cohorts_dir: PathBuf,
    /// Suffix used to discover cohort files.
    pub cohort_suffix: String,
    /// Stacked panel; `.parquet` or `.dta`.
    pub panel_path: PathBuf,
    /// Directory holding the quarterly `.dta` files and their conversions.
    pub quarters_dir: PathBuf,
    pub failed_cohorts_path: PathBuf,
    pub manifest_path: PathBuf,
    /// Recognized identifier columns; the first is the primary identifier.
    pub id_columns: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cohorts_dir: PathBuf::from("CleanCohorts"),
            cohort_suffix: "dta".to_string(),
            panel_path: PathBuf::from("output/combined_data.parquet"),
            quarters_dir: PathBuf::from("output"),
            failed_cohorts_path: PathBuf::from("output/failed_cohorts.txt"),
            manifest_path: PathBuf::from("config/quarters.yaml"),
            id_columns: vec![
                "person_id".to_string(),
                "household_id".to_string(),
                "dwelling_id".to_string(),
            ],
        }
    }
}

impl PipelineConfig {
    /// Defaults, overlaid with `path` when it exists.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Config from `enoe.yaml` in the working directory, if any.
    pub fn load() -> Result<Self> {
        Self::load_or_default(CONFIG_FILE)
    }

    pub fn primary_id(&self) -> Option<&str> {
        self.id_columns.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_yaml_keeps_other_defaults() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        writeln!(tmp, "cohorts_dir: /data/cohorts\nid_columns: [folio, hogar]")?;
        let cfg = PipelineConfig::load_or_default(tmp.path())?;
        assert_eq!(cfg.cohorts_dir, PathBuf::from("/data/cohorts"));
        assert_eq!(cfg.primary_id(), Some("folio"));
        assert_eq!(cfg.cohort_suffix, "dta");
        Ok(())
    }

    #[test]
    fn absent_file_means_defaults() -> Result<()> {
        let cfg = PipelineConfig::load_or_default("/nonexistent/enoe.yaml")?;
        assert_eq!(cfg, PipelineConfig::default());
        Ok(())
    }
}
