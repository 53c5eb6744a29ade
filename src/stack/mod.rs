//! Panel stacking.
//!
//! Every cohort restarts its identifier numbering near zero. Stacking shifts
//! each recognized identifier column by a running offset so that values stay
//! unique across the whole panel, then concatenates the cohorts in order.
//!
//! The offset for a column after cohort *k* is one past the largest shifted
//! value seen in cohort *k*. Cohorts without the column (or with only nulls
//! in it) leave that offset alone.

pub mod report;
pub mod run;

use crate::process::{
    coerce_text_columns,
    schema::{align_batch, unify_schemas},
    utils::parse_integer,
    CohortTable, CoercionReport,
};
use anyhow::{anyhow, bail, Context, Result};
use arrow::{
    array::{Array, ArrayRef, AsArray, Int64Array, Int64Builder},
    compute::{cast, cast_with_options, concat_batches, CastOptions},
    datatypes::{DataType, Field, Float64Type, Int64Type, Schema},
    record_batch::{RecordBatch, RecordBatchOptions},
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info};

pub use report::{report_path, uniqueness, StackReport, UniquenessStats};
pub use run::run;

/// Running offset per recognized identifier column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Offsets(BTreeMap<String, i64>);

impl Offsets {
    /// Every column starts at zero.
    pub fn new<S: AsRef<str>>(id_columns: &[S]) -> Self {
        Self(
            id_columns
                .iter()
                .map(|c| (c.as_ref().to_string(), 0))
                .collect(),
        )
    }

    pub fn get(&self, column: &str) -> Option<i64> {
        self.0.get(column).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// What happened to one identifier column of one cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdShift {
    pub column: String,
    /// Offset added to every value.
    pub offset: i64,
    /// Largest value after shifting; `None` when the column held only nulls.
    pub max_after: Option<i64>,
    pub next_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CohortSummary {
    pub name: String,
    pub rows: usize,
    /// One entry per recognized column present in the cohort.
    pub shifts: Vec<IdShift>,
    /// Recognized columns this cohort lacks.
    pub missing: Vec<String>,
}

/// A cohort after shifting, with the offsets to use for the next one.
#[derive(Debug, Clone)]
pub struct ShiftedCohort {
    pub batch: RecordBatch,
    pub offsets: Offsets,
    pub summary: CohortSummary,
}

/// Identifier column as `Int64`, rejecting values that are not whole numbers.
fn identifier_values(array: &ArrayRef) -> Result<Int64Array> {
    match array.data_type() {
        DataType::Null => Ok(Int64Array::new_null(array.len())),
        DataType::Int64 => Ok(array.as_primitive::<Int64Type>().clone()),
        dt if dt.is_integer() => {
            let options = CastOptions {
                safe: false,
                ..Default::default()
            };
            let out = cast_with_options(array, &DataType::Int64, &options)?;
            Ok(out.as_primitive::<Int64Type>().clone())
        }
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let floats = cast(array, &DataType::Float64)?;
            let floats = floats.as_primitive::<Float64Type>();
            let mut b = Int64Builder::with_capacity(floats.len());
            for v in floats.iter() {
                match v {
                    None => b.append_null(),
                    Some(x)
                        if x.is_finite()
                            && x.fract() == 0.0
                            && x >= i64::MIN as f64
                            && x < i64::MAX as f64 =>
                    {
                        b.append_value(x as i64)
                    }
                    Some(x) => bail!("identifier value {} is not a whole number", x),
                }
            }
            Ok(b.finish())
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = cast(array, &DataType::Utf8)?;
            let text = text.as_string::<i32>();
            let mut b = Int64Builder::with_capacity(text.len());
            for raw in text.iter() {
                match raw.and_then(parse_integer) {
                    None => b.append_null(),
                    Some(Ok(v)) => b.append_value(v),
                    Some(Err(_)) => bail!(
                        "identifier value {:?} is not an integer",
                        raw.unwrap_or_default()
                    ),
                }
            }
            Ok(b.finish())
        }
        other => bail!("unsupported identifier type {:?}", other),
    }
}

/// Add `offset` to every non-null value; returns the shifted column and its max.
fn shift_values(values: &Int64Array, offset: i64) -> Result<(Int64Array, Option<i64>)> {
    let mut b = Int64Builder::with_capacity(values.len());
    let mut max_after: Option<i64> = None;
    for v in values.iter() {
        let Some(v) = v else {
            b.append_null();
            continue;
        };
        if v < 0 {
            bail!("negative identifier value {}", v);
        }
        let shifted = v
            .checked_add(offset)
            .ok_or_else(|| anyhow!("identifier {} + offset {} overflows i64", v, offset))?;
        max_after = Some(max_after.map_or(shifted, |m| m.max(shifted)));
        b.append_value(shifted);
    }
    Ok((b.finish(), max_after))
}

/// Shift the recognized identifier columns of one cohort.
///
/// Pure: `offsets` is not modified; the offsets for the following cohort
/// come back in [`ShiftedCohort::offsets`]. Columns present in `offsets` are
/// the recognized set.
pub fn shift_cohort(cohort: &CohortTable, offsets: &Offsets) -> Result<ShiftedCohort> {
    let schema = cohort.batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns: Vec<ArrayRef> = cohort.batch.columns().to_vec();
    let mut next = offsets.clone();
    let mut shifts = Vec::new();
    let mut missing = Vec::new();

    for (column, offset) in offsets.iter() {
        let Ok(idx) = schema.index_of(column) else {
            debug!(cohort = %cohort.name, column, "identifier column absent, offset unchanged");
            missing.push(column.to_string());
            continue;
        };
        let context = || format!("identifier column `{}` in cohort {}", column, cohort.name);
        let values = identifier_values(&columns[idx]).with_context(context)?;
        let (shifted, max_after) = shift_values(&values, offset).with_context(context)?;

        let next_offset = match max_after {
            Some(m) => m
                .checked_add(1)
                .ok_or_else(|| anyhow!("next offset overflows i64"))
                .with_context(context)?,
            None => offset,
        };
        next.0.insert(column.to_string(), next_offset);

        fields[idx] = fields[idx]
            .clone()
            .with_data_type(DataType::Int64)
            .with_nullable(true);
        columns[idx] = Arc::new(shifted);
        shifts.push(IdShift {
            column: column.to_string(),
            offset,
            max_after,
            next_offset,
        });
    }

    let rows = cohort.batch.num_rows();
    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    let batch = RecordBatch::try_new_with_options(schema, columns, &options)
        .with_context(|| format!("rebuilding cohort {}", cohort.name))?;

    Ok(ShiftedCohort {
        batch,
        offsets: next,
        summary: CohortSummary {
            name: cohort.name.clone(),
            rows,
            shifts,
            missing,
        },
    })
}

/// The stacked result.
#[derive(Debug, Clone)]
pub struct Panel {
    pub batch: RecordBatch,
    pub cohorts: Vec<CohortSummary>,
    pub offsets: Offsets,
    pub coercion: CoercionReport,
}

impl Panel {
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

/// Accumulates shifted cohorts, threading the offset state between them.
#[derive(Debug)]
pub struct PanelStacker {
    offsets: Offsets,
    shifted: Vec<RecordBatch>,
    cohorts: Vec<CohortSummary>,
}

impl PanelStacker {
    pub fn new<S: AsRef<str>>(id_columns: &[S]) -> Self {
        Self {
            offsets: Offsets::new(id_columns),
            shifted: Vec::new(),
            cohorts: Vec::new(),
        }
    }

    pub fn offsets(&self) -> &Offsets {
        &self.offsets
    }

    /// Number of cohorts pushed so far.
    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    pub fn push(&mut self, cohort: CohortTable) -> Result<&CohortSummary> {
        let ShiftedCohort {
            batch,
            offsets,
            summary,
        } = shift_cohort(&cohort, &self.offsets)?;
        drop(cohort);

        for s in &summary.shifts {
            debug!(
                cohort = %summary.name,
                column = %s.column,
                offset = s.offset,
                next_offset = s.next_offset,
                "shifted identifier"
            );
        }
        info!(cohort = %summary.name, rows = summary.rows, "cohort stacked");

        self.offsets = offsets;
        self.shifted.push(batch);
        self.cohorts.push(summary);
        Ok(&self.cohorts[self.cohorts.len() - 1])
    }

    /// Concatenate everything pushed, in push order, then coerce text columns.
    pub fn finish(self) -> Result<Panel> {
        let Self {
            offsets,
            shifted,
            cohorts,
        } = self;
        let Some(first) = shifted.first() else {
            bail!("no cohorts to stack");
        };

        let metadata = first.schema().metadata().clone();
        let schema = Arc::new(
            unify_schemas(shifted.iter().map(|b| b.schema_ref().as_ref())).with_metadata(metadata),
        );
        let aligned = shifted
            .iter()
            .zip(&cohorts)
            .map(|(b, c)| {
                align_batch(b, &schema).with_context(|| format!("aligning cohort {}", c.name))
            })
            .collect::<Result<Vec<_>>>()?;
        drop(shifted);

        let stacked = concat_batches(&schema, &aligned).context("concatenating cohorts")?;
        drop(aligned);

        let (batch, coercion) = coerce_text_columns(&stacked)?;
        info!(
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            cohorts = cohorts.len(),
            "panel assembled"
        );
        Ok(Panel {
            batch,
            cohorts,
            offsets,
            coercion,
        })
    }
}

/// Stack `cohorts` in iteration order.
pub fn stack_cohorts<I, S>(cohorts: I, id_columns: &[S]) -> Result<Panel>
where
    I: IntoIterator<Item = CohortTable>,
    S: AsRef<str>,
{
    let mut stacker = PanelStacker::new(id_columns);
    for cohort in cohorts {
        stacker.push(cohort)?;
    }
    stacker.finish()
}
