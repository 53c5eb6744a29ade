//! Stata `.dta` codec.
//!
//! Reads releases 113–115 (fixed binary header) and 117–119 (tagged layout
//! with a section map) into a single Arrow [`RecordBatch`]; writes release 118.
//! Missing values of every kind become nulls. Value labels are not applied.

pub mod reader;
pub mod types;
pub mod writer;

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::Path,
};

pub use reader::{DtaHeader, DtaReader, Variable};
pub use types::{ByteOrder, Release, StorageType};
pub use writer::write_dta;

/// Read a whole `.dta` file.
pub fn read_dta<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    DtaReader::new(BufReader::new(file))
        .and_then(DtaReader::read_batch)
        .with_context(|| format!("reading {}", path.display()))
}

/// Parse descriptors only; cheap even for large files.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<DtaHeader> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = DtaReader::new(BufReader::new(file))
        .with_context(|| format!("reading header of {}", path.display()))?;
    Ok(reader.header().clone())
}

/// Write `batch` to `path` through a temporary file renamed into place.
pub fn write_dta_file<P: AsRef<Path>>(path: P, batch: &RecordBatch) -> Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("dta.tmp");
    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut w = BufWriter::new(file);
    if let Err(err) = write_dta(&mut w, batch) {
        drop(w);
        let _ = fs::remove_file(&tmp);
        return Err(err.context(format!("writing {}", tmp.display())));
    }
    drop(w);
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::{
        array::{Array, Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use std::{collections::HashMap, io::Cursor, sync::Arc};
    use tempfile::tempdir;

    fn sample_batch() -> Result<RecordBatch> {
        let mut label = HashMap::new();
        label.insert("label".to_string(), "edad del entrevistado".to_string());
        let schema = Schema::new(vec![
            Field::new("person_id", DataType::Int64, true),
            Field::new("eda", DataType::Int64, true).with_metadata(label),
            Field::new("ingocup", DataType::Float64, true),
            Field::new("ent", DataType::Utf8, true),
            Field::new("notes", DataType::Utf8, true),
        ]);
        let long = "x".repeat(3000);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![Some(0), Some(1), Some(70_000)])),
                Arc::new(Int64Array::from(vec![Some(34), None, Some(99)])),
                Arc::new(Float64Array::from(vec![Some(5200.5), None, Some(0.0)])),
                Arc::new(StringArray::from(vec![Some("Jalisco"), Some("Yucatán"), None])),
                Arc::new(StringArray::from(vec![Some(long.as_str()), Some(""), Some("b")])),
            ],
        )
        .map_err(Into::into)
    }

    #[test]
    fn written_file_reads_back() -> Result<()> {
        let batch = sample_batch()?;
        let mut buf = Cursor::new(Vec::new());
        write_dta(&mut buf, &batch)?;
        buf.set_position(0);

        let reader = DtaReader::new(buf)?;
        assert_eq!(reader.header().release, Release::R118);
        assert_eq!(reader.header().nobs, 3);
        let kinds: Vec<StorageType> = reader.variables().iter().map(|v| v.storage).collect();
        assert_eq!(
            kinds,
            vec![
                StorageType::Long,
                StorageType::Byte,
                StorageType::Double,
                StorageType::Str(8),
                StorageType::StrL,
            ]
        );
        assert_eq!(reader.variables()[1].label, "edad del entrevistado");

        let out = reader.read_batch()?;
        let ids = out.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(ids.values().to_vec(), vec![0, 1, 70_000]);

        let eda = out.column(1).as_any().downcast_ref::<Int8Array>().unwrap();
        assert_eq!(eda.value(0), 34);
        assert!(eda.is_null(1));

        let ing = out.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(ing.value(0), 5200.5);
        assert!(ing.is_null(1));

        let ent = out.column(3).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(ent.value(1), "Yucatán");
        assert_eq!(ent.value(2), "");

        let notes = out.column(4).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(notes.value(0).len(), 3000);
        assert_eq!(notes.value(1), "");
        assert_eq!(notes.value(2), "b");
        Ok(())
    }

    #[test]
    fn file_helpers_and_header_only_read() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("2007_T1.dta");
        write_dta_file(&path, &sample_batch()?)?;
        assert!(!dir.path().join("2007_T1.dta.tmp").exists());

        let header = read_header(&path)?;
        assert_eq!(header.nvar, 5);
        assert_eq!(header.nobs, 3);
        assert_eq!(read_dta(&path)?.num_rows(), 3);
        Ok(())
    }

    #[test]
    fn failed_write_leaves_no_temporary_file() -> Result<()> {
        let dir = tempdir()?;
        let name = "a_variable_name_well_over_thirty_two_bytes";
        let schema = Schema::new(vec![Field::new(name, DataType::Int8, true)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Int8Array::from(vec![1, 2]))],
        )?;

        let path = dir.path().join("2009_T2.dta");
        let err = write_dta_file(&path, &batch).unwrap_err();
        assert!(format!("{:#}", err).contains("not a valid Stata name"));
        assert!(!path.exists());
        assert!(!dir.path().join("2009_T2.dta.tmp").exists());
        Ok(())
    }

    /// Hand-assembled release 114, big-endian: one int and one str4 variable.
    fn release_114_bytes() -> Vec<u8> {
        let mut b = vec![114u8, 1, 1, 0];
        b.extend_from_slice(&2u16.to_be_bytes());
        b.extend_from_slice(&3u32.to_be_bytes());
        let pad = |b: &mut Vec<u8>, text: &[u8], width: usize| {
            b.extend_from_slice(text);
            b.resize(b.len() + width - text.len(), 0);
        };
        pad(&mut b, b"ENOE 2007", 81);
        pad(&mut b, b"01 Jan 2008 10:00", 18);
        b.extend_from_slice(&[252, 4]); // int, str4
        pad(&mut b, b"n_hog", 33);
        pad(&mut b, b"mun", 33);
        b.extend_from_slice(&[0u8; 6]); // sort list
        pad(&mut b, b"%8.0g", 49);
        pad(&mut b, b"%4s", 49);
        b.extend_from_slice(&[0u8; 66]); // value label names
        pad(&mut b, b"hogar", 81);
        pad(&mut b, b"", 81);
        b.extend_from_slice(&[0u8; 5]); // end of expansion fields
        for (v, s) in [(1i16, b"Le\xf3n"), (32_741, b"ab\0\0"), (-4, b"wxyz")] {
            b.extend_from_slice(&v.to_be_bytes());
            b.extend_from_slice(s);
        }
        b
    }

    #[test]
    fn reads_release_114_big_endian() -> Result<()> {
        let reader = DtaReader::new(Cursor::new(release_114_bytes()))?;
        assert_eq!(reader.header().byte_order, ByteOrder::Big);
        assert_eq!(reader.header().label, "ENOE 2007");
        assert_eq!(reader.variables()[0].label, "hogar");

        let batch = reader.read_batch()?;
        let n_hog = batch.column(0).as_any().downcast_ref::<Int16Array>().unwrap();
        assert_eq!(n_hog.value(0), 1);
        assert!(n_hog.is_null(1));
        assert_eq!(n_hog.value(2), -4);

        let mun = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(mun.value(0), "León");
        assert_eq!(mun.value(1), "ab");
        assert_eq!(mun.value(2), "wxyz");
        Ok(())
    }

    #[test]
    fn rejects_unknown_release() {
        let mut bytes = release_114_bytes();
        bytes[0] = 110;
        assert!(DtaReader::new(Cursor::new(bytes)).is_err());
    }
}
