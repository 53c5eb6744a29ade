// src/bin/convert_cohorts.rs
//
// Converts every manifest cohort's quarters from .dta to Parquet. A cohort
// with any failing quarter is recorded in the failed-cohort log.

use anyhow::Result;
use enoe_panel::{
    config::PipelineConfig,
    history::{FailedCohort, FailedCohortLog},
    logging,
    manifest::Manifest,
    process::convert::convert_quarters,
};
use tracing::{error, info};

fn main() -> Result<()> {
    logging::init();
    let config = PipelineConfig::load()?;
    let manifest = Manifest::load(&config.manifest_path)?;
    let log = FailedCohortLog::new(&config.failed_cohorts_path);
    info!("{} cohorts in manifest", manifest.len());

    let mut failed = 0;
    for (number, start_index, quarters) in manifest.iter() {
        info!(cohort = number, first = %quarters[0], "converting cohort");
        if let Err(err) = convert_quarters(&config.quarters_dir, quarters) {
            error!(cohort = number, "cohort failed: {:#}", err);
            log.append(FailedCohort {
                number,
                start_index,
            })?;
            failed += 1;
        }
    }

    if failed > 0 {
        info!(failed, log = %log.path().display(), "some cohorts failed");
    } else {
        info!("all cohorts converted");
    }
    Ok(())
}
