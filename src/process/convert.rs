use crate::{dta, manifest::Quarter, process::write::write_parquet};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOutcome {
    /// Output already existed; nothing was read.
    Skipped,
    Written { rows: usize },
}

/// Convert one `.dta` file to Parquet unless `output` already exists.
#[instrument(level = "info", skip_all, fields(input = %input.as_ref().display()))]
pub fn convert_dta_to_parquet<P, Q>(input: P, output: Q) -> Result<ConvertOutcome>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let output = output.as_ref();
    if output.exists() {
        info!(output = %output.display(), "skipping, output already exists");
        return Ok(ConvertOutcome::Skipped);
    }

    let batch = dta::read_dta(input)?;
    let rows = batch.num_rows();
    write_parquet(output, &batch)?;
    info!(rows, output = %output.display(), "converted");
    Ok(ConvertOutcome::Written { rows })
}

/// `<dir>/<quarter>.dta` and `<dir>/<quarter>.parquet`.
pub fn quarter_paths(dir: &Path, quarter: Quarter) -> (PathBuf, PathBuf) {
    (
        dir.join(quarter.file_name("dta")),
        dir.join(quarter.file_name("parquet")),
    )
}

/// Convert every quarter in order, stopping at the first failure.
pub fn convert_quarters(dir: &Path, quarters: &[Quarter]) -> Result<Vec<ConvertOutcome>> {
    quarters
        .iter()
        .map(|&q| {
            let (input, output) = quarter_paths(dir, q);
            convert_dta_to_parquet(input, output)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{logging::init_test_logging, process::write::read_parquet};
    use anyhow::Context;
    use arrow::{
        array::Int8Array,
        datatypes::{DataType, Field, Schema},
        record_batch::RecordBatch,
    };
    use std::{fs, sync::Arc};
    use tempfile::tempdir;

    fn write_quarter(dir: &Path, q: Quarter, rows: usize) -> Result<()> {
        let schema = Schema::new(vec![Field::new("sex", DataType::Int8, true)]);
        let values: Vec<i8> = (0..rows).map(|i| (i % 2) as i8 + 1).collect();
        let batch = RecordBatch::try_new(Arc::new(schema), vec![Arc::new(Int8Array::from(values))])?;
        dta::write_dta_file(dir.join(q.file_name("dta")), &batch)
    }

    #[test]
    fn converts_then_skips() -> Result<()> {
        init_test_logging();
        let dir = tempdir()?;
        let q: Quarter = "2010_T3".parse()?;
        write_quarter(dir.path(), q, 4)?;

        let (input, output) = quarter_paths(dir.path(), q);
        assert_eq!(
            convert_dta_to_parquet(&input, &output)?,
            ConvertOutcome::Written { rows: 4 }
        );
        assert_eq!(read_parquet(&output)?.num_rows(), 4);

        fs::remove_file(&input).context("removing source")?;
        assert_eq!(convert_dta_to_parquet(&input, &output)?, ConvertOutcome::Skipped);
        Ok(())
    }

    #[test]
    fn missing_quarter_fails_the_batch() -> Result<()> {
        let dir = tempdir()?;
        let first: Quarter = "2011_T1".parse()?;
        write_quarter(dir.path(), first, 2)?;
        let quarters = [first, first.next()];
        assert!(convert_quarters(dir.path(), &quarters).is_err());
        assert!(dir.path().join("2011_T1.parquet").exists());
        Ok(())
    }
}
