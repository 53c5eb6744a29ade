use crate::{
    process::CoercionReport,
    stack::{CohortSummary, Offsets, Panel},
};
use anyhow::{Context, Result};
use arrow::{
    array::AsArray,
    compute::cast,
    datatypes::{DataType, Int64Type},
    record_batch::RecordBatch,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

/// How often each value of one identifier column occurs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniquenessStats {
    pub column: String,
    /// Distinct non-null values.
    pub distinct: usize,
    pub rows: usize,
    pub null_ids: usize,
    /// Largest number of rows sharing one value.
    pub max_rows_per_id: usize,
}

/// Counts for `column`; `None` when the panel has no such column.
pub fn uniqueness(batch: &RecordBatch, column: &str) -> Result<Option<UniquenessStats>> {
    let Ok(idx) = batch.schema().index_of(column) else {
        return Ok(None);
    };
    let ids = cast(batch.column(idx), &DataType::Int64)
        .with_context(|| format!("reading `{}` as integers", column))?;
    let ids = ids.as_primitive::<Int64Type>();

    let mut counts: HashMap<i64, usize> = HashMap::new();
    let mut null_ids = 0;
    for v in ids.iter() {
        match v {
            Some(v) => *counts.entry(v).or_default() += 1,
            None => null_ids += 1,
        }
    }
    Ok(Some(UniquenessStats {
        column: column.to_string(),
        distinct: counts.len(),
        rows: batch.num_rows(),
        null_ids,
        max_rows_per_id: counts.values().copied().max().unwrap_or(0),
    }))
}

/// `output/combined_data.parquet` → `output/combined_data.report.json`
pub fn report_path(panel_path: &Path) -> PathBuf {
    let stem = panel_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "panel".to_string());
    panel_path.with_file_name(format!("{}.report.json", stem))
}

/// Everything the operator needs to audit one stacking run.
#[derive(Debug, Clone, Serialize)]
pub struct StackReport {
    pub generated_at: DateTime<Utc>,
    pub panel_path: PathBuf,
    pub total_rows: usize,
    pub cohorts: Vec<CohortSummary>,
    pub final_offsets: Offsets,
    pub primary: Option<UniquenessStats>,
    pub coercion: CoercionReport,
}

impl StackReport {
    pub fn new(panel: &Panel, panel_path: &Path, primary_id: Option<&str>) -> Result<Self> {
        let primary = match primary_id {
            Some(col) => uniqueness(&panel.batch, col)?,
            None => None,
        };
        Ok(Self {
            generated_at: Utc::now(),
            panel_path: panel_path.to_path_buf(),
            total_rows: panel.num_rows(),
            cohorts: panel.cohorts.clone(),
            final_offsets: panel.offsets.clone(),
            primary,
            coercion: panel.coercion.clone(),
        })
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("serializing stack report")?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{process::CohortTable, stack::stack_cohorts};
    use arrow::{
        array::Int64Array,
        datatypes::{Field, Schema},
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    fn persons(values: Vec<Option<i64>>) -> Result<RecordBatch> {
        let schema = Schema::new(vec![Field::new("person_id", DataType::Int64, true)]);
        Ok(RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Int64Array::from(values))],
        )?)
    }

    #[test]
    fn counts_repeated_and_missing_ids() -> Result<()> {
        let batch = persons(vec![Some(1), Some(1), Some(2), None, Some(1)])?;
        let stats = uniqueness(&batch, "person_id")?.unwrap();
        assert_eq!(stats.distinct, 2);
        assert_eq!(stats.rows, 5);
        assert_eq!(stats.null_ids, 1);
        assert_eq!(stats.max_rows_per_id, 3);
        assert!(uniqueness(&batch, "household_id")?.is_none());
        Ok(())
    }

    #[test]
    fn report_lands_next_to_panel() -> Result<()> {
        assert_eq!(
            report_path(Path::new("output/combined_data.parquet")),
            PathBuf::from("output/combined_data.report.json")
        );

        let dir = tempdir()?;
        let panel = stack_cohorts(
            vec![
                CohortTable::new("A", persons(vec![Some(0), Some(1)])?),
                CohortTable::new("B", persons(vec![Some(0)])?),
            ],
            &["person_id"],
        )?;
        let panel_path = dir.path().join("panel.parquet");
        let report = StackReport::new(&panel, &panel_path, Some("person_id"))?;
        assert_eq!(report.primary.as_ref().map(|s| s.distinct), Some(3));

        let out = report_path(&panel_path);
        report.write_json(&out)?;
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out)?)?;
        assert_eq!(value["total_rows"], 3);
        assert_eq!(value["final_offsets"]["person_id"], 3);
        assert_eq!(value["cohorts"][1]["shifts"][0]["offset"], 2);
        Ok(())
    }
}
