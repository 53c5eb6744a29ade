// src/dta/writer.rs

use anyhow::{bail, Context, Result};
use arrow::{
    array::{Array, Float32Array, Float64Array, Int64Array, StringArray},
    compute::cast,
    datatypes::{DataType, Field},
    record_batch::RecordBatch,
};
use chrono::Local;
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

use super::types::*;

const RELEASE: Release = Release::R118;
const MAX_VARNAME_BYTES: usize = 32;
const MAX_DATASET_LABEL_BYTES: usize = 80;
const MAX_VARLABEL_BYTES: usize = 320;

/// A column prepared for encoding: its Stata storage type plus a typed view.
enum Encoded {
    Integer(StorageType, Int64Array),
    Float(Float32Array),
    Double(Float64Array),
    Text(StorageType, StringArray),
}

impl Encoded {
    fn storage(&self) -> StorageType {
        match self {
            Encoded::Integer(s, _) | Encoded::Text(s, _) => *s,
            Encoded::Float(_) => StorageType::Float,
            Encoded::Double(_) => StorageType::Double,
        }
    }

    fn prepare(field: &Field, array: &dyn Array) -> Result<Self> {
        let name = field.name();
        Ok(match array.data_type() {
            DataType::Float32 => Encoded::Float(downcast::<Float32Array>(array)?.clone()),
            DataType::Float64 => Encoded::Double(downcast::<Float64Array>(array)?.clone()),
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::Boolean => {
                let as_i64 = cast(array, &DataType::Int64)
                    .with_context(|| format!("casting `{}` to Int64", name))?;
                let values = downcast::<Int64Array>(as_i64.as_ref())?.clone();
                let (min, max) = values
                    .iter()
                    .flatten()
                    .fold((0i64, 0i64), |(lo, hi), v| (lo.min(v), hi.max(v)));
                Encoded::Integer(integer_storage(min, max), values)
            }
            DataType::UInt64 => {
                let as_f64 = cast(array, &DataType::Float64)
                    .with_context(|| format!("casting `{}` to Float64", name))?;
                Encoded::Double(downcast::<Float64Array>(as_f64.as_ref())?.clone())
            }
            _ => {
                let as_text = cast(array, &DataType::Utf8)
                    .with_context(|| format!("casting `{}` to text", name))?;
                let values = downcast::<StringArray>(as_text.as_ref())?.clone();
                let widest = values.iter().flatten().map(str::len).max().unwrap_or(0);
                let storage = if widest > MAX_STR_WIDTH {
                    StorageType::StrL
                } else {
                    StorageType::Str(widest.max(1) as u16)
                };
                Encoded::Text(storage, values)
            }
        })
    }

    fn encode(&self, row: usize, var_no: u32, out: &mut Vec<u8>) {
        match self {
            Encoded::Integer(storage, values) => {
                let v = (!values.is_null(row)).then(|| values.value(row));
                match storage {
                    StorageType::Byte => {
                        out.push(v.map(|x| x as i8).unwrap_or(BYTE_MISSING) as u8)
                    }
                    StorageType::Int => out.extend_from_slice(
                        &v.map(|x| x as i16).unwrap_or(INT_MISSING).to_le_bytes(),
                    ),
                    StorageType::Long => out.extend_from_slice(
                        &v.map(|x| x as i32).unwrap_or(LONG_MISSING).to_le_bytes(),
                    ),
                    _ => {
                        let bits = v
                            .map(|x| (x as f64).to_bits())
                            .unwrap_or(DOUBLE_MISSING_BITS);
                        out.extend_from_slice(&bits.to_le_bytes())
                    }
                }
            }
            Encoded::Float(values) => {
                let bits = if values.is_null(row) || float_is_missing(values.value(row)) {
                    FLOAT_MISSING_BITS
                } else {
                    values.value(row).to_bits()
                };
                out.extend_from_slice(&bits.to_le_bytes());
            }
            Encoded::Double(values) => {
                let bits = if values.is_null(row) || double_is_missing(values.value(row)) {
                    DOUBLE_MISSING_BITS
                } else {
                    values.value(row).to_bits()
                };
                out.extend_from_slice(&bits.to_le_bytes());
            }
            Encoded::Text(StorageType::StrL, values) => {
                let text = text_at(values, row);
                let key = if text.is_empty() {
                    0u64
                } else {
                    var_no as u64 | ((row as u64 + 1) << 16)
                };
                out.extend_from_slice(&key.to_le_bytes());
            }
            Encoded::Text(storage, values) => {
                let width = storage.width();
                let text = text_at(values, row).as_bytes();
                let n = text.len().min(width);
                out.extend_from_slice(&text[..n]);
                out.resize(out.len() + (width - n), 0);
            }
        }
    }
}

fn downcast<T: 'static>(array: &dyn Array) -> Result<&T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("unexpected array type {:?}", array.data_type()))
}

fn text_at(values: &StringArray, row: usize) -> &str {
    if values.is_null(row) {
        ""
    } else {
        values.value(row)
    }
}

/// Narrowest Stata integer type holding `min..=max`, or double.
fn integer_storage(min: i64, max: i64) -> StorageType {
    if min >= BYTE_MIN as i64 && max <= BYTE_MAX as i64 {
        StorageType::Byte
    } else if min >= INT_MIN as i64 && max <= INT_MAX as i64 {
        StorageType::Int
    } else if min >= LONG_MIN as i64 && max <= LONG_MAX as i64 {
        StorageType::Long
    } else {
        StorageType::Double
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn fixed(out: &mut Vec<u8>, text: &str, width: usize) {
    let text = truncate_utf8(text, width - 1).as_bytes();
    out.extend_from_slice(text);
    out.resize(out.len() + (width - text.len()), 0);
}

/// Write `batch` as a release-118, little-endian `.dta` stream.
pub fn write_dta<W: Write + Seek>(w: &mut W, batch: &RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let nvar = batch.num_columns();
    if nvar > i16::MAX as usize {
        bail!("{} variables exceed the release-118 limit", nvar);
    }

    let columns: Vec<Encoded> = schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(f, a)| Encoded::prepare(f, a.as_ref()))
        .collect::<Result<_>>()?;

    for field in schema.fields() {
        let name = field.name();
        if name.is_empty() || name.len() > MAX_VARNAME_BYTES {
            bail!("variable name `{}` is not a valid Stata name", name);
        }
    }

    let mut map = [0u64; 14];
    map[0] = w.stream_position()?;

    // header
    let mut head = Vec::new();
    head.extend_from_slice(b"<stata_dta><header><release>118</release>");
    head.extend_from_slice(b"<byteorder>LSF</byteorder><K>");
    head.extend_from_slice(&(nvar as u16).to_le_bytes());
    head.extend_from_slice(b"</K><N>");
    head.extend_from_slice(&(batch.num_rows() as u64).to_le_bytes());
    head.extend_from_slice(b"</N><label>");
    let label = schema
        .metadata()
        .get("label")
        .map(|s| truncate_utf8(s, MAX_DATASET_LABEL_BYTES))
        .unwrap_or("");
    head.extend_from_slice(&(label.len() as u16).to_le_bytes());
    head.extend_from_slice(label.as_bytes());
    head.extend_from_slice(b"</label><timestamp>");
    let stamp = Local::now().format("%d %b %Y %H:%M").to_string();
    head.push(stamp.len() as u8);
    head.extend_from_slice(stamp.as_bytes());
    head.extend_from_slice(b"</timestamp></header>");
    w.write_all(&head)?;

    // map placeholder, patched at the end
    map[1] = w.stream_position()?;
    w.write_all(b"<map>")?;
    w.write_all(&[0u8; 14 * 8])?;
    w.write_all(b"</map>")?;

    map[2] = w.stream_position()?;
    let mut section = b"<variable_types>".to_vec();
    for c in &columns {
        section.extend_from_slice(&c.storage().code().to_le_bytes());
    }
    section.extend_from_slice(b"</variable_types>");
    w.write_all(&section)?;

    map[3] = w.stream_position()?;
    let mut section = b"<varnames>".to_vec();
    for field in schema.fields() {
        fixed(&mut section, field.name(), RELEASE.varname_len());
    }
    section.extend_from_slice(b"</varnames>");
    w.write_all(&section)?;

    map[4] = w.stream_position()?;
    w.write_all(b"<sortlist>")?;
    w.write_all(&vec![0u8; (nvar + 1) * 2])?;
    w.write_all(b"</sortlist>")?;

    map[5] = w.stream_position()?;
    let mut section = b"<formats>".to_vec();
    for (field, c) in schema.fields().iter().zip(&columns) {
        let storage = c.storage();
        let kept = field
            .metadata()
            .get("format")
            .filter(|f| f.starts_with('%') && !f.ends_with('s'))
            .filter(|_| !matches!(storage, StorageType::Str(_) | StorageType::StrL));
        let format = kept.cloned().unwrap_or_else(|| storage.default_format());
        fixed(&mut section, &format, RELEASE.format_len());
    }
    section.extend_from_slice(b"</formats>");
    w.write_all(&section)?;

    map[6] = w.stream_position()?;
    w.write_all(b"<value_label_names>")?;
    w.write_all(&vec![0u8; nvar * RELEASE.varname_len()])?;
    w.write_all(b"</value_label_names>")?;

    map[7] = w.stream_position()?;
    let mut section = b"<variable_labels>".to_vec();
    for field in schema.fields() {
        let label = field.metadata().get("label").map(String::as_str).unwrap_or("");
        fixed(
            &mut section,
            truncate_utf8(label, MAX_VARLABEL_BYTES),
            RELEASE.varlabel_len(),
        );
    }
    section.extend_from_slice(b"</variable_labels>");
    w.write_all(&section)?;

    map[8] = w.stream_position()?;
    w.write_all(b"<characteristics></characteristics>")?;

    map[9] = w.stream_position()?;
    w.write_all(b"<data>")?;
    let row_width: usize = columns.iter().map(|c| c.storage().width()).sum();
    let mut record = Vec::with_capacity(row_width);
    for row in 0..batch.num_rows() {
        record.clear();
        for (i, c) in columns.iter().enumerate() {
            c.encode(row, i as u32 + 1, &mut record);
        }
        w.write_all(&record)?;
    }
    w.write_all(b"</data>")?;

    map[10] = w.stream_position()?;
    w.write_all(b"<strls>")?;
    let mut gso_count = 0usize;
    for (i, c) in columns.iter().enumerate() {
        if let Encoded::Text(StorageType::StrL, values) = c {
            for row in 0..values.len() {
                let text = text_at(values, row);
                if text.is_empty() {
                    continue;
                }
                let mut gso = b"GSO".to_vec();
                gso.extend_from_slice(&(i as u32 + 1).to_le_bytes());
                gso.extend_from_slice(&(row as u64 + 1).to_le_bytes());
                gso.push(130);
                gso.extend_from_slice(&(text.len() as u32 + 1).to_le_bytes());
                gso.extend_from_slice(text.as_bytes());
                gso.push(0);
                w.write_all(&gso)?;
                gso_count += 1;
            }
        }
    }
    w.write_all(b"</strls>")?;

    map[11] = w.stream_position()?;
    w.write_all(b"<value_labels></value_labels>")?;
    map[12] = w.stream_position()?;
    w.write_all(b"</stata_dta>")?;
    map[13] = w.stream_position()?;

    w.seek(SeekFrom::Start(map[1] + b"<map>".len() as u64))?;
    for offset in map {
        w.write_all(&offset.to_le_bytes())?;
    }
    w.seek(SeekFrom::Start(map[13]))?;
    w.flush()?;

    debug!(
        nvar,
        nobs = batch.num_rows(),
        strls = gso_count,
        bytes = map[13] - map[0],
        "wrote .dta"
    );
    Ok(())
}
