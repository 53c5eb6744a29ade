// src/dta/reader.rs

use anyhow::{bail, Context, Result};
use arrow::{
    array::{
        ArrayRef, Float32Builder, Float64Builder, Int16Builder, Int32Builder, Int8Builder,
        StringBuilder,
    },
    datatypes::{Field, Schema, SchemaRef},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use std::{
    collections::HashMap,
    io::{Read, Seek, SeekFrom},
    sync::Arc,
};
use tracing::{debug, trace};

use super::types::*;

/// Target size of one buffered slice of data records.
const READ_CHUNK_BYTES: usize = 8 << 20;

/// File-level facts from the header, available without touching the data.
#[derive(Debug, Clone)]
pub struct DtaHeader {
    pub release: Release,
    pub byte_order: ByteOrder,
    pub nvar: usize,
    pub nobs: u64,
    pub label: String,
    pub timestamp: String,
}

/// One variable descriptor.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub storage: StorageType,
    pub format: String,
    pub label: String,
}

/// Parses a `.dta` stream. Construction reads every descriptor and leaves the
/// stream positioned at the first data record.
pub struct DtaReader<R: Read + Seek> {
    inner: R,
    header: DtaHeader,
    variables: Vec<Variable>,
    /// Section offsets of the tagged layout (117+).
    map: Option<[u64; 14]>,
}

impl<R: Read + Seek> DtaReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let mut first = [0u8; 1];
        inner
            .read_exact(&mut first)
            .context("reading first byte of .dta")?;
        inner.seek(SeekFrom::Start(0))?;

        let mut reader = if first[0] == b'<' {
            Self::open_tagged(inner)?
        } else {
            Self::open_binary(inner)?
        };
        debug!(
            release = reader.header.release.number(),
            nvar = reader.header.nvar,
            nobs = reader.header.nobs,
            "parsed .dta descriptors"
        );
        reader.seek_to_data()?;
        Ok(reader)
    }

    pub fn header(&self) -> &DtaHeader {
        &self.header
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Arrow schema with `format` and `label` as field metadata.
    pub fn schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .variables
            .iter()
            .map(|v| {
                let mut meta = HashMap::new();
                meta.insert("format".to_string(), v.format.clone());
                if !v.label.is_empty() {
                    meta.insert("label".to_string(), v.label.clone());
                }
                Field::new(&v.name, v.storage.arrow_type(), true).with_metadata(meta)
            })
            .collect();
        let mut meta = HashMap::new();
        if !self.header.label.is_empty() {
            meta.insert("label".to_string(), self.header.label.clone());
        }
        Arc::new(Schema::new_with_metadata(fields, meta))
    }

    /// Decode every observation into one batch.
    pub fn read_batch(mut self) -> Result<RecordBatch> {
        let nobs = usize::try_from(self.header.nobs).context("observation count overflows usize")?;
        let order = self.header.byte_order;
        let release = self.header.release;

        let offsets: Vec<usize> = self
            .variables
            .iter()
            .scan(0usize, |acc, v| {
                let at = *acc;
                *acc += v.storage.width();
                Some(at)
            })
            .collect();
        let row_width: usize = self.variables.iter().map(|v| v.storage.width()).sum();

        let mut builders: Vec<ColumnBuilder> = self
            .variables
            .iter()
            .map(|v| ColumnBuilder::new(v.storage, nobs))
            .collect();

        if row_width > 0 {
            let rows_per_chunk = (READ_CHUNK_BYTES / row_width).max(1);
            let mut buf = vec![0u8; rows_per_chunk * row_width];
            let mut remaining = nobs;
            while remaining > 0 {
                let rows = remaining.min(rows_per_chunk);
                let chunk = &mut buf[..rows * row_width];
                self.inner
                    .read_exact(chunk)
                    .context("reading .dta data records")?;
                for record in chunk.chunks_exact(row_width) {
                    for ((builder, var), &at) in
                        builders.iter_mut().zip(&self.variables).zip(&offsets)
                    {
                        let raw = &record[at..at + var.storage.width()];
                        builder.append(raw, order, release);
                    }
                }
                remaining -= rows;
                trace!(remaining, "decoded chunk");
            }
        }

        let strls = if builders
            .iter()
            .any(|b| matches!(b, ColumnBuilder::StrL(_)))
        {
            self.read_strls()?
        } else {
            HashMap::new()
        };

        let schema = self.schema();
        let columns: Vec<ArrayRef> = builders
            .into_iter()
            .map(|b| b.finish(&strls))
            .collect::<Result<_>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(nobs));
        RecordBatch::try_new_with_options(schema, columns, &options)
            .context("assembling .dta record batch")
    }

    // ─── tagged layout (117, 118, 119) ─────────────────────────────────

    fn open_tagged(mut inner: R) -> Result<Self> {
        expect_tag(&mut inner, "<stata_dta>")?;
        expect_tag(&mut inner, "<header>")?;
        expect_tag(&mut inner, "<release>")?;
        let number = read_vec(&mut inner, 3)?;
        let number: u16 = std::str::from_utf8(&number)
            .ok()
            .and_then(|s| s.parse().ok())
            .context("release number is not numeric")?;
        let release = Release::from_number(number)?;
        expect_tag(&mut inner, "</release>")?;

        expect_tag(&mut inner, "<byteorder>")?;
        let byte_order = match read_vec(&mut inner, 3)?.as_slice() {
            b"MSF" => ByteOrder::Big,
            b"LSF" => ByteOrder::Little,
            other => bail!("unknown byte order {:?}", String::from_utf8_lossy(other)),
        };
        expect_tag(&mut inner, "</byteorder>")?;

        expect_tag(&mut inner, "<K>")?;
        let nvar = if release == Release::R119 {
            byte_order.u32(&read_vec(&mut inner, 4)?) as usize
        } else {
            byte_order.u16(&read_vec(&mut inner, 2)?) as usize
        };
        expect_tag(&mut inner, "</K>")?;

        expect_tag(&mut inner, "<N>")?;
        let nobs = if release == Release::R117 {
            byte_order.u32(&read_vec(&mut inner, 4)?) as u64
        } else {
            byte_order.u64(&read_vec(&mut inner, 8)?)
        };
        expect_tag(&mut inner, "</N>")?;

        expect_tag(&mut inner, "<label>")?;
        let label_len = if release == Release::R117 {
            read_vec(&mut inner, 1)?[0] as usize
        } else {
            byte_order.u16(&read_vec(&mut inner, 2)?) as usize
        };
        let label = decode_text(&read_vec(&mut inner, label_len)?, release);
        expect_tag(&mut inner, "</label>")?;

        expect_tag(&mut inner, "<timestamp>")?;
        let ts_len = read_vec(&mut inner, 1)?[0] as usize;
        let timestamp = decode_text(&read_vec(&mut inner, ts_len)?, release);
        expect_tag(&mut inner, "</timestamp>")?;
        expect_tag(&mut inner, "</header>")?;

        expect_tag(&mut inner, "<map>")?;
        let raw_map = read_vec(&mut inner, 14 * 8)?;
        let mut map = [0u64; 14];
        for (slot, raw) in map.iter_mut().zip(raw_map.chunks_exact(8)) {
            *slot = byte_order.u64(raw);
        }
        expect_tag(&mut inner, "</map>")?;

        expect_tag(&mut inner, "<variable_types>")?;
        let raw_types = read_vec(&mut inner, nvar * 2)?;
        let storage: Vec<StorageType> = raw_types
            .chunks_exact(2)
            .map(|c| StorageType::from_code(byte_order.u16(c)))
            .collect::<Result<_>>()?;
        expect_tag(&mut inner, "</variable_types>")?;

        expect_tag(&mut inner, "<varnames>")?;
        let names = read_fixed_texts(&mut inner, nvar, release.varname_len(), release)?;
        expect_tag(&mut inner, "</varnames>")?;

        expect_tag(&mut inner, "<sortlist>")?;
        let sort_width = if release == Release::R119 { 4 } else { 2 };
        read_vec(&mut inner, (nvar + 1) * sort_width)?;
        expect_tag(&mut inner, "</sortlist>")?;

        expect_tag(&mut inner, "<formats>")?;
        let formats = read_fixed_texts(&mut inner, nvar, release.format_len(), release)?;
        expect_tag(&mut inner, "</formats>")?;

        expect_tag(&mut inner, "<value_label_names>")?;
        read_vec(&mut inner, nvar * release.varname_len())?;
        expect_tag(&mut inner, "</value_label_names>")?;

        expect_tag(&mut inner, "<variable_labels>")?;
        let labels = read_fixed_texts(&mut inner, nvar, release.varlabel_len(), release)?;
        expect_tag(&mut inner, "</variable_labels>")?;

        let header = DtaHeader {
            release,
            byte_order,
            nvar,
            nobs,
            label,
            timestamp,
        };
        Ok(Self {
            inner,
            header,
            variables: zip_variables(names, storage, formats, labels),
            map: Some(map),
        })
    }

    /// Read the `<strls>` section into a (v, o) → text lookup.
    fn read_strls(&mut self) -> Result<HashMap<(u32, u64), String>> {
        let map = match self.map {
            Some(m) => m,
            None => return Ok(HashMap::new()),
        };
        let order = self.header.byte_order;
        let release = self.header.release;
        self.inner.seek(SeekFrom::Start(map[10]))?;
        expect_tag(&mut self.inner, "<strls>")?;

        let mut out = HashMap::new();
        loop {
            let lead = read_vec(&mut self.inner, 3)?;
            if lead.as_slice() != b"GSO" {
                if lead.as_slice() == b"</s" {
                    expect_tag(&mut self.inner, "trls>")?;
                    break;
                }
                bail!(
                    "malformed strL table: expected GSO, found {:?}",
                    String::from_utf8_lossy(&lead)
                );
            }
            let v = order.u32(&read_vec(&mut self.inner, 4)?);
            let o = if release == Release::R117 {
                order.u32(&read_vec(&mut self.inner, 4)?) as u64
            } else {
                order.u64(&read_vec(&mut self.inner, 8)?)
            };
            let kind = read_vec(&mut self.inner, 1)?[0];
            let len = order.u32(&read_vec(&mut self.inner, 4)?) as usize;
            let mut bytes = read_vec(&mut self.inner, len)?;
            if kind == 130 && bytes.last() == Some(&0) {
                bytes.pop();
            }
            let text = if release.is_utf8() || kind == 129 {
                String::from_utf8_lossy(&bytes).into_owned()
            } else {
                decode_text(&bytes, release)
            };
            out.insert((v, o), text);
        }
        debug!(count = out.len(), "read strL table");
        Ok(out)
    }

    // ─── binary layout (113, 114, 115) ─────────────────────────────────

    fn open_binary(mut inner: R) -> Result<Self> {
        let lead = read_vec(&mut inner, 4)?;
        let release = Release::from_number(lead[0] as u16)?;
        if release.is_tagged() {
            bail!("release {} without <stata_dta> tag", release.number());
        }
        let byte_order = match lead[1] {
            1 => ByteOrder::Big,
            2 => ByteOrder::Little,
            other => bail!("unknown byte order flag {}", other),
        };
        let nvar = byte_order.u16(&read_vec(&mut inner, 2)?) as usize;
        let nobs = byte_order.u32(&read_vec(&mut inner, 4)?) as u64;
        let label = decode_text(&read_vec(&mut inner, 81)?, release);
        let timestamp = decode_text(&read_vec(&mut inner, 18)?, release);

        let storage: Vec<StorageType> = read_vec(&mut inner, nvar)?
            .into_iter()
            .map(StorageType::from_old_code)
            .collect::<Result<_>>()?;
        let names = read_fixed_texts(&mut inner, nvar, 33, release)?;
        read_vec(&mut inner, (nvar + 1) * 2)?; // sort list
        let formats = read_fixed_texts(&mut inner, nvar, release.format_len(), release)?;
        read_vec(&mut inner, nvar * 33)?; // value label names
        let labels = read_fixed_texts(&mut inner, nvar, 81, release)?;

        // expansion fields, terminated by a zero type and zero length
        loop {
            let kind = read_vec(&mut inner, 1)?[0];
            let len = byte_order.u32(&read_vec(&mut inner, 4)?) as usize;
            if kind == 0 && len == 0 {
                break;
            }
            read_vec(&mut inner, len)?;
        }

        let header = DtaHeader {
            release,
            byte_order,
            nvar,
            nobs,
            label,
            timestamp,
        };
        Ok(Self {
            inner,
            header,
            variables: zip_variables(names, storage, formats, labels),
            map: None,
        })
    }

    fn seek_to_data(&mut self) -> Result<()> {
        if let Some(map) = self.map {
            self.inner.seek(SeekFrom::Start(map[9]))?;
            expect_tag(&mut self.inner, "<data>")?;
        }
        Ok(())
    }
}

fn zip_variables(
    names: Vec<String>,
    storage: Vec<StorageType>,
    formats: Vec<String>,
    labels: Vec<String>,
) -> Vec<Variable> {
    names
        .into_iter()
        .zip(storage)
        .zip(formats)
        .zip(labels)
        .map(|(((name, storage), format), label)| Variable {
            name,
            storage,
            format,
            label,
        })
        .collect()
}

fn read_vec<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)
        .with_context(|| format!("unexpected end of .dta reading {} bytes", n))?;
    Ok(buf)
}

fn expect_tag<R: Read>(r: &mut R, tag: &str) -> Result<()> {
    let got = read_vec(r, tag.len()).with_context(|| format!("reading {}", tag))?;
    if got.as_slice() != tag.as_bytes() {
        bail!(
            "expected {} but found {:?}",
            tag,
            String::from_utf8_lossy(&got)
        );
    }
    Ok(())
}

fn read_fixed_texts<R: Read>(
    r: &mut R,
    count: usize,
    width: usize,
    release: Release,
) -> Result<Vec<String>> {
    let raw = read_vec(r, count * width)?;
    Ok(raw
        .chunks_exact(width.max(1))
        .take(count)
        .map(|c| decode_text(c, release))
        .collect())
}

/// Split an 8-byte strL reference into (variable, observation).
fn decode_strl_ref(raw: &[u8], order: ByteOrder, release: Release) -> (u32, u64) {
    match release {
        Release::R117 => (order.u32(&raw[..4]), order.u32(&raw[4..8]) as u64),
        _ => {
            // v occupies the low-addressed bytes, so its place in the u64
            // depends on byte order.
            let v_bits = if release == Release::R118 { 16 } else { 24 };
            let x = order.u64(raw);
            match order {
                ByteOrder::Little => ((x & ((1 << v_bits) - 1)) as u32, x >> v_bits),
                ByteOrder::Big => (
                    (x >> (64 - v_bits)) as u32,
                    x & ((1 << (64 - v_bits)) - 1),
                ),
            }
        }
    }
}

enum ColumnBuilder {
    Int8(Int8Builder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Str(StringBuilder),
    StrL(Vec<(u32, u64)>),
}

impl ColumnBuilder {
    fn new(storage: StorageType, capacity: usize) -> Self {
        match storage {
            StorageType::Byte => ColumnBuilder::Int8(Int8Builder::with_capacity(capacity)),
            StorageType::Int => ColumnBuilder::Int16(Int16Builder::with_capacity(capacity)),
            StorageType::Long => ColumnBuilder::Int32(Int32Builder::with_capacity(capacity)),
            StorageType::Float => ColumnBuilder::Float32(Float32Builder::with_capacity(capacity)),
            StorageType::Double => ColumnBuilder::Float64(Float64Builder::with_capacity(capacity)),
            StorageType::Str(n) => {
                ColumnBuilder::Str(StringBuilder::with_capacity(capacity, capacity * n as usize))
            }
            StorageType::StrL => ColumnBuilder::StrL(Vec::with_capacity(capacity)),
        }
    }

    fn append(&mut self, raw: &[u8], order: ByteOrder, release: Release) {
        match self {
            ColumnBuilder::Int8(b) => {
                let v = raw[0] as i8;
                b.append_option((v <= BYTE_MAX).then_some(v));
            }
            ColumnBuilder::Int16(b) => {
                let v = order.i16(raw);
                b.append_option((v <= INT_MAX).then_some(v));
            }
            ColumnBuilder::Int32(b) => {
                let v = order.i32(raw);
                b.append_option((v <= LONG_MAX).then_some(v));
            }
            ColumnBuilder::Float32(b) => {
                let v = order.f32(raw);
                b.append_option((!float_is_missing(v)).then_some(v));
            }
            ColumnBuilder::Float64(b) => {
                let v = order.f64(raw);
                b.append_option((!double_is_missing(v)).then_some(v));
            }
            ColumnBuilder::Str(b) => b.append_value(decode_text(raw, release)),
            ColumnBuilder::StrL(refs) => refs.push(decode_strl_ref(raw, order, release)),
        }
    }

    fn finish(self, strls: &HashMap<(u32, u64), String>) -> Result<ArrayRef> {
        Ok(match self {
            ColumnBuilder::Int8(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Int16(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Int32(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Float32(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Float64(mut b) => Arc::new(b.finish()),
            ColumnBuilder::Str(mut b) => Arc::new(b.finish()),
            ColumnBuilder::StrL(refs) => {
                let mut b = StringBuilder::with_capacity(refs.len(), 0);
                for key in refs {
                    if key == (0, 0) {
                        b.append_value("");
                        continue;
                    }
                    let text = strls
                        .get(&key)
                        .with_context(|| format!("dangling strL reference {:?}", key))?;
                    b.append_value(text);
                }
                Arc::new(b.finish())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, StringArray};
    use std::io::Cursor;

    fn tagged(b: &mut Vec<u8>, name: &str, body: &[u8]) {
        b.extend_from_slice(format!("<{}>", name).as_bytes());
        b.extend_from_slice(body);
        b.extend_from_slice(format!("</{}>", name).as_bytes());
    }

    fn padded(text: &[u8], width: usize) -> Vec<u8> {
        let mut v = text.to_vec();
        v.resize(width, 0);
        v
    }

    /// Release 118, MSF, one strL variable: a GSO reference and an empty cell.
    fn release_118_msf_strl() -> Vec<u8> {
        let mut b = b"<stata_dta><header>".to_vec();
        tagged(&mut b, "release", b"118");
        tagged(&mut b, "byteorder", b"MSF");
        tagged(&mut b, "K", &1u16.to_be_bytes());
        tagged(&mut b, "N", &2u64.to_be_bytes());
        tagged(&mut b, "label", &0u16.to_be_bytes());
        tagged(&mut b, "timestamp", &[0]);
        b.extend_from_slice(b"</header>");

        let map_at = b.len() + "<map>".len();
        tagged(&mut b, "map", &[0u8; 14 * 8]);
        tagged(&mut b, "variable_types", &32768u16.to_be_bytes());
        tagged(&mut b, "varnames", &padded(b"comment", 129));
        tagged(&mut b, "sortlist", &[0u8; 4]);
        tagged(&mut b, "formats", &padded(b"%9s", 57));
        tagged(&mut b, "value_label_names", &[0u8; 129]);
        tagged(&mut b, "variable_labels", &[0u8; 321]);
        tagged(&mut b, "characteristics", b"");

        let data_at = b.len() as u64;
        let mut rows = Vec::new();
        // (v=1, o=1): v in the first two bytes, o in the last six.
        rows.extend_from_slice(&1u16.to_be_bytes());
        rows.extend_from_slice(&1u64.to_be_bytes()[2..]);
        rows.extend_from_slice(&[0u8; 8]);
        tagged(&mut b, "data", &rows);

        let strls_at = b.len() as u64;
        let mut gso = b"GSO".to_vec();
        gso.extend_from_slice(&1u32.to_be_bytes());
        gso.extend_from_slice(&1u64.to_be_bytes());
        gso.push(130);
        gso.extend_from_slice(&3u32.to_be_bytes());
        gso.extend_from_slice(b"hi\0");
        tagged(&mut b, "strls", &gso);
        b.extend_from_slice(b"</stata_dta>");

        b[map_at + 9 * 8..map_at + 10 * 8].copy_from_slice(&data_at.to_be_bytes());
        b[map_at + 10 * 8..map_at + 11 * 8].copy_from_slice(&strls_at.to_be_bytes());
        b
    }

    #[test]
    fn big_endian_strl_reference() -> Result<()> {
        let reader = DtaReader::new(Cursor::new(release_118_msf_strl()))?;
        assert_eq!(reader.header().byte_order, ByteOrder::Big);
        assert_eq!(reader.variables()[0].storage, StorageType::StrL);

        let batch = reader.read_batch()?;
        let comment = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(comment.value(0), "hi");
        assert_eq!(comment.value(1), "");
        Ok(())
    }

    #[test]
    fn strl_reference_layout_by_order_and_release() {
        let mut raw = [0u8; 8];
        raw[..2].copy_from_slice(&7u16.to_le_bytes());
        raw[2..].copy_from_slice(&9u64.to_le_bytes()[..6]);
        assert_eq!(decode_strl_ref(&raw, ByteOrder::Little, Release::R118), (7, 9));

        let mut raw = [0u8; 8];
        raw[..3].copy_from_slice(&5u32.to_be_bytes()[1..]);
        raw[3..].copy_from_slice(&11u64.to_be_bytes()[3..]);
        assert_eq!(decode_strl_ref(&raw, ByteOrder::Big, Release::R119), (5, 11));
    }
}
