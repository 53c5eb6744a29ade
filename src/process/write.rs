use crate::dta;
use anyhow::{bail, Context, Result};
use arrow::{array::RecordBatchReader, compute::concat_batches, record_batch::RecordBatch};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};
use std::{
    fs::{self, File},
    io::BufWriter,
    path::Path,
};
use tracing::debug;

const ZSTD_LEVEL: i32 = 3;

/// Write one batch as a ZSTD Parquet file, via `<path>.tmp` renamed into place.
pub fn write_parquet<P: AsRef<Path>>(path: P, batch: &RecordBatch) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("parquet.tmp");

    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(ZSTD_LEVEL)?))
        .build();
    let tmp_file = File::create(&tmp_path)
        .with_context(|| format!("creating temporary Parquet file {}", tmp_path.display()))?;
    let written = (|| -> Result<()> {
        let mut writer =
            ArrowWriter::try_new(BufWriter::new(tmp_file), batch.schema(), Some(props))
                .context("initializing Parquet writer")?;
        writer.write(batch).context("writing batch to Parquet")?;
        writer.close().context("closing Parquet writer")?;
        Ok(())
    })();
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    let file_size = fs::metadata(&tmp_path)
        .context("getting file metadata")?
        .len();
    fs::rename(&tmp_path, path).with_context(|| {
        format!("renaming {} -> {}", tmp_path.display(), path.display())
    })?;
    debug!(
        rows = batch.num_rows(),
        bytes = file_size,
        path = %path.display(),
        "parquet written"
    );
    Ok(())
}

/// Read every row group of a Parquet file into one batch.
pub fn read_parquet<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading Parquet metadata of {}", path.display()))?
        .build()?;
    let schema = reader.schema();
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("decoding {}", path.display()))?;
    concat_batches(&schema, &batches).context("joining Parquet row groups")
}

/// Persist `batch` in the format named by the path's extension.
pub fn write_table<P: AsRef<Path>>(path: P, batch: &RecordBatch) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => write_parquet(path, batch),
        Some("dta") => dta::write_dta_file(path, batch),
        _ => bail!(
            "unsupported output format for {} (expected .parquet or .dta)",
            path.display()
        ),
    }
}

/// Load a table in the format named by the path's extension.
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => read_parquet(path),
        Some("dta") => dta::read_dta(path),
        _ => bail!(
            "unsupported input format for {} (expected .parquet or .dta)",
            path.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{Array, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    fn batch() -> Result<RecordBatch> {
        let schema = Schema::new(vec![
            Field::new("person_id", DataType::Int64, true),
            Field::new("ent", DataType::Utf8, true),
        ]);
        Ok(RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![Some(0), None, Some(7)])),
                Arc::new(StringArray::from(vec!["Jalisco", "", "Colima"])),
            ],
        )?)
    }

    #[test]
    fn parquet_and_dta_by_extension() -> Result<()> {
        let dir = tempdir()?;
        let input = batch()?;

        let pq = dir.path().join("nested/panel.parquet");
        write_table(&pq, &input)?;
        assert!(!dir.path().join("nested/panel.parquet.tmp").exists());
        let back = read_table(&pq)?;
        assert_eq!(back.num_rows(), 3);
        let ids = back.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert!(ids.is_null(1));
        assert_eq!(ids.value(2), 7);

        let dta = dir.path().join("panel.dta");
        write_table(&dta, &input)?;
        let back = read_table(&dta)?;
        assert_eq!(back.num_rows(), 3);
        let ent = back.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(ent.value(2), "Colima");
        Ok(())
    }

    #[test]
    fn unknown_extension_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let err = write_table(dir.path().join("panel.csv"), &batch()?).unwrap_err();
        assert!(err.to_string().contains("unsupported output format"));
        Ok(())
    }
}
