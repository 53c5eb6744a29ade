use crate::process::utils::{clean_str, is_float};
use anyhow::{Context, Result};
use arrow::{
    array::{Array, ArrayRef, Float64Builder, Int64Builder, StringArray},
    compute::cast,
    datatypes::{DataType, Field, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Outcome of the text-column pass.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CoercionReport {
    /// Text columns whose every non-blank value parsed as a number.
    pub numeric: Vec<String>,
    /// Text columns left as text.
    pub text_fallback: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Int64,
    Float64,
    Text,
}

/// Decide a text column's final type from all of its values.
fn decide(values: &StringArray) -> Target {
    let mut target = Target::Int64;
    let mut seen = false;
    for raw in values.iter().flatten() {
        let s = clean_str(raw);
        if s.is_empty() {
            continue;
        }
        seen = true;
        if target == Target::Int64 && s.parse::<i64>().is_ok() {
            continue;
        }
        if !is_float(s) {
            return Target::Text;
        }
        target = Target::Float64;
    }
    if seen {
        target
    } else {
        Target::Text
    }
}

fn to_int64(values: &StringArray) -> ArrayRef {
    let mut b = Int64Builder::with_capacity(values.len());
    for raw in values.iter() {
        b.append_option(raw.and_then(|s| clean_str(s).parse().ok()));
    }
    Arc::new(b.finish())
}

fn to_float64(values: &StringArray) -> ArrayRef {
    let mut b = Float64Builder::with_capacity(values.len());
    for raw in values.iter() {
        b.append_option(raw.and_then(|s| clean_str(s).parse().ok()));
    }
    Arc::new(b.finish())
}

/// Give every text column a single numeric type where possible.
///
/// A column becomes `Int64` when all non-blank values are whole numbers,
/// `Float64` when they are all finite numbers, and stays `Utf8` otherwise.
/// Blank cells become null in converted columns.
pub fn coerce_text_columns(batch: &RecordBatch) -> Result<(RecordBatch, CoercionReport)> {
    let schema = batch.schema();
    let mut report = CoercionReport::default();
    let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        let text = match column.data_type() {
            DataType::Utf8 => column.clone(),
            DataType::LargeUtf8 | DataType::Utf8View => cast(column.as_ref(), &DataType::Utf8)
                .with_context(|| format!("normalizing text column `{}`", field.name()))?,
            _ => {
                fields.push(field.as_ref().clone());
                columns.push(column.clone());
                continue;
            }
        };
        let values = text
            .as_any()
            .downcast_ref::<StringArray>()
            .with_context(|| format!("column `{}` is not a string array", field.name()))?;

        let (dtype, array) = match decide(values) {
            Target::Int64 => (DataType::Int64, to_int64(values)),
            Target::Float64 => (DataType::Float64, to_float64(values)),
            Target::Text => {
                report.text_fallback.push(field.name().clone());
                fields.push(field.as_ref().clone().with_data_type(DataType::Utf8));
                columns.push(text);
                continue;
            }
        };
        debug!(column = %field.name(), ?dtype, "coerced text column");
        report.numeric.push(field.name().clone());
        fields.push(field.as_ref().clone().with_data_type(dtype));
        columns.push(array);
    }

    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    let out = RecordBatch::try_new_with_options(schema, columns, &options)
        .context("rebuilding batch after coercion")?;
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int32Array, Int64Array};

    fn batch() -> Result<RecordBatch> {
        let schema = Schema::new(vec![
            Field::new("ent", DataType::Utf8, true),
            Field::new("ingreso", DataType::Utf8, true),
            Field::new("mun", DataType::Utf8, true),
            Field::new("blank", DataType::Utf8, true),
            Field::new("eda", DataType::Int32, true),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(StringArray::from(vec![Some("01"), Some(" "), Some("32")])),
                Arc::new(StringArray::from(vec![Some("1200"), Some("350.5"), None])),
                Arc::new(StringArray::from(vec![Some("3"), Some("Guadalajara"), None])),
                Arc::new(StringArray::from(vec![Some(""), None, Some("  ")])),
                Arc::new(Int32Array::from(vec![20, 30, 40])),
            ],
        )
        .map_err(Into::into)
    }

    #[test]
    fn numeric_text_is_converted_and_rest_reported() -> Result<()> {
        let (out, report) = coerce_text_columns(&batch()?)?;
        assert_eq!(report.numeric, vec!["ent", "ingreso"]);
        assert_eq!(report.text_fallback, vec!["mun", "blank"]);

        let ent = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ent.value(0), 1);
        assert!(ent.is_null(1));
        assert_eq!(ent.value(2), 32);

        let ingreso = out.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(ingreso.value(0), 1200.0);
        assert_eq!(ingreso.value(1), 350.5);
        assert!(ingreso.is_null(2));

        assert_eq!(out.schema().field(2).data_type(), &DataType::Utf8);
        assert_eq!(out.schema().field(4).data_type(), &DataType::Int32);
        assert_eq!(out.num_rows(), 3);
        Ok(())
    }
}
