use anyhow::{Context, Result};
use arrow::{
    array::{new_null_array, ArrayRef},
    compute::cast,
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use std::{collections::HashMap, sync::Arc};

fn integer_bits(dt: &DataType) -> Option<u32> {
    Some(match dt {
        DataType::Int8 => 8,
        DataType::Int16 | DataType::UInt8 => 16,
        DataType::Int32 | DataType::UInt16 => 32,
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => 64,
        _ => return None,
    })
}

fn is_float(dt: &DataType) -> bool {
    matches!(dt, DataType::Float16 | DataType::Float32 | DataType::Float64)
}

fn is_numeric(dt: &DataType) -> bool {
    integer_bits(dt).is_some() || is_float(dt)
}

/// Narrowest type both `a` and `b` cast into without losing the column:
/// integers widen, integer + float is `Float64`, anything involving text
/// (or otherwise incompatible) is `Utf8`.
pub fn supertype(a: &DataType, b: &DataType) -> DataType {
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (DataType::Boolean, other) | (other, DataType::Boolean) if is_numeric(other) => {
            other.clone()
        }
        _ => match (integer_bits(a), integer_bits(b)) {
            (Some(x), Some(y)) => match x.max(y) {
                8 => DataType::Int8,
                16 => DataType::Int16,
                32 => DataType::Int32,
                _ => DataType::Int64,
            },
            _ if is_numeric(a) && is_numeric(b) => DataType::Float64,
            _ => DataType::Utf8,
        },
    }
}

/// Union of all fields, in order of first appearance, with widened types.
/// Every field is nullable since any cohort may lack it.
pub fn unify_schemas<'a, I>(schemas: I) -> Schema
where
    I: IntoIterator<Item = &'a Schema>,
{
    let mut fields: Vec<Field> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for schema in schemas {
        for f in schema.fields() {
            match index.get(f.name()) {
                Some(&i) => {
                    let widened = supertype(fields[i].data_type(), f.data_type());
                    if &widened != fields[i].data_type() {
                        fields[i] = fields[i].clone().with_data_type(widened);
                    }
                }
                None => {
                    index.insert(f.name().clone(), fields.len());
                    fields.push(f.as_ref().clone().with_nullable(true));
                }
            }
        }
    }

    Schema::new(fields)
}

/// Reshape `batch` to `target`: cast columns whose type differs and fill
/// columns it lacks with nulls.
pub fn align_batch(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
    let source = batch.schema();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(target.fields().len());
    for field in target.fields() {
        let column = match source.index_of(field.name()) {
            Ok(i) => {
                let arr = batch.column(i);
                if arr.data_type() == field.data_type() {
                    arr.clone()
                } else {
                    cast(arr.as_ref(), field.data_type()).with_context(|| {
                        format!(
                            "casting column `{}` from {:?} to {:?}",
                            field.name(),
                            arr.data_type(),
                            field.data_type()
                        )
                    })?
                }
            }
            Err(_) => new_null_array(field.data_type(), batch.num_rows()),
        };
        columns.push(column);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    RecordBatch::try_new_with_options(Arc::clone(target), columns, &options)
        .context("building aligned batch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int16Array, Int8Array, StringArray};

    #[test]
    fn supertype_rules() {
        use DataType::*;
        assert_eq!(supertype(&Int8, &Int32), Int32);
        assert_eq!(supertype(&UInt16, &Int16), Int32);
        assert_eq!(supertype(&Int16, &Float32), Float64);
        assert_eq!(supertype(&Float32, &Float32), Float32);
        assert_eq!(supertype(&Null, &Utf8), Utf8);
        assert_eq!(supertype(&Boolean, &Int8), Int8);
        assert_eq!(supertype(&Int64, &Utf8), Utf8);
    }

    #[test]
    fn unify_then_align() -> Result<()> {
        let a = Schema::new(vec![
            Field::new("eda", DataType::Int8, false),
            Field::new("ent", DataType::Utf8, true),
        ]);
        let b = Schema::new(vec![
            Field::new("eda", DataType::Int16, true),
            Field::new("sex", DataType::Int8, true),
        ]);
        let unified = Arc::new(unify_schemas([&a, &b]));
        let names: Vec<&str> = unified.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["eda", "ent", "sex"]);
        assert_eq!(unified.field(0).data_type(), &DataType::Int16);
        assert!(unified.field(0).is_nullable());

        let batch = RecordBatch::try_new(
            Arc::new(a),
            vec![
                Arc::new(Int8Array::from(vec![30, 41])),
                Arc::new(StringArray::from(vec!["01", "02"])),
            ],
        )?;
        let aligned = align_batch(&batch, &unified)?;
        let eda = aligned.column(0).as_any().downcast_ref::<Int16Array>().unwrap();
        assert_eq!(eda.value(1), 41);
        assert_eq!(aligned.column(2).null_count(), 2);
        Ok(())
    }
}
