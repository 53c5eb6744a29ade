// src/bin/convert_quarters.rs
//
// Retries the cohorts listed in the failed-cohort log.

use anyhow::{Context, Result};
use enoe_panel::{
    config::PipelineConfig,
    history::FailedCohortLog,
    logging,
    manifest::Manifest,
    process::convert::convert_quarters,
};
use tracing::info;

fn main() -> Result<()> {
    logging::init();
    let config = PipelineConfig::load()?;
    let log = FailedCohortLog::new(&config.failed_cohorts_path);

    let Some(entries) = log.read()? else {
        info!(log = %log.path().display(), "no failed cohorts");
        return Ok(());
    };
    let manifest = Manifest::load(&config.manifest_path)?;
    info!("{} failed cohorts to retry", entries.len());

    for entry in entries {
        let quarters = manifest
            .quarters_for_start(entry.start_index)
            .with_context(|| format!("cohort {}", entry.number))?;
        info!(cohort = entry.number, start_index = entry.start_index, "retrying");
        convert_quarters(&config.quarters_dir, quarters)
            .with_context(|| format!("converting cohort {}", entry.number))?;
    }
    info!("retry complete");
    Ok(())
}
