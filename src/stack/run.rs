use crate::{
    config::PipelineConfig,
    memory::MemoryProbe,
    process::{self, write_table},
    stack::{report_path, PanelStacker, StackReport},
};
use anyhow::{bail, Result};
use std::time::Instant;
use tracing::{info, warn};

/// Stack every cohort under `config.cohorts_dir` into `config.panel_path`.
///
/// Returns `None` without reading anything when the panel already exists.
pub fn run(config: &PipelineConfig) -> Result<Option<StackReport>> {
    if config.panel_path.exists() {
        info!(panel = %config.panel_path.display(), "panel already exists; skipping");
        return Ok(None);
    }

    // ─── 1) discover cohort files ────────────────────────────────────
    let files = process::discover_cohorts(&config.cohorts_dir, &config.cohort_suffix)?;
    if files.is_empty() {
        bail!(
            "no *.{} files under {}",
            config.cohort_suffix,
            config.cohorts_dir.display()
        );
    }
    info!("{} cohort files to stack", files.len());

    // ─── 2) load + shift one cohort at a time ────────────────────────
    let mut probe = MemoryProbe::new();
    let mut stacker = PanelStacker::new(&config.id_columns);
    let start = Instant::now();
    for path in &files {
        info!(file = %path.display(), "processing");
        let cohort = process::load_cohort(path)?;
        stacker.push(cohort)?;
        match probe.rss_gb() {
            Some(gb) => info!(rss_gb = %format!("{:.2}", gb), "memory usage"),
            None => warn!("resident-set size unavailable"),
        }
    }

    // ─── 3) concatenate, coerce, report ──────────────────────────────
    let panel = stacker.finish()?;
    let report = StackReport::new(&panel, &config.panel_path, config.primary_id())?;
    if let Some(stats) = &report.primary {
        info!(
            column = %stats.column,
            distinct = stats.distinct,
            rows = stats.rows,
            max_rows_per_id = stats.max_rows_per_id,
            "identifier uniqueness"
        );
    }
    if !panel.coercion.text_fallback.is_empty() {
        warn!(
            columns = ?panel.coercion.text_fallback,
            "columns kept as text"
        );
    }

    // ─── 4) persist ──────────────────────────────────────────────────
    write_table(&config.panel_path, &panel.batch)?;
    let report_file = report_path(&config.panel_path);
    report.write_json(&report_file)?;
    info!(
        panel = %config.panel_path.display(),
        report = %report_file.display(),
        elapsed = ?start.elapsed(),
        "done"
    );
    Ok(Some(report))
}
