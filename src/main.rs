use anyhow::Result;
use enoe_panel::{config::PipelineConfig, logging, stack};
use tracing::info;

fn main() -> Result<()> {
    logging::init();
    let config = PipelineConfig::load()?;
    info!(
        cohorts_dir = %config.cohorts_dir.display(),
        panel = %config.panel_path.display(),
        "startup"
    );

    match stack::run(&config)? {
        Some(report) => info!(
            rows = report.total_rows,
            cohorts = report.cohorts.len(),
            "panel written"
        ),
        None => info!("nothing to do"),
    }
    Ok(())
}
