//! Conversions between the engine's row model and Arrow arrays.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BinaryBuilder, BooleanArray, BooleanBuilder, Float64Array,
    Float64Builder, Int32Array, Int32Builder, Int64Array, Int64Builder, RecordBatch, StringArray,
    StringBuilder, TimestampMicrosecondArray, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field as ArrowField, Schema, SchemaRef, TimeUnit};
use bytes::Bytes;

use super::{ColumnTypeMismatchSnafu, FormatError, ValueTypeMismatchSnafu, WidthMismatchSnafu};
use crate::value::{Cell, Datum, Row, RowSchema, ValueType};
use snafu::prelude::*;

/// Arrow data type used to store a value type.
pub fn arrow_data_type(value_type: ValueType) -> DataType {
    match value_type {
        ValueType::Bool => DataType::Boolean,
        ValueType::Int32 => DataType::Int32,
        ValueType::Int64 => DataType::Int64,
        ValueType::Float64 => DataType::Float64,
        ValueType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        ValueType::Text => DataType::Utf8,
        ValueType::Bytes => DataType::Binary,
    }
}

/// Arrow schema corresponding to a row schema. Used for CSV ingest and for
/// the uncompressed side of segment files.
pub fn arrow_schema(schema: &RowSchema) -> SchemaRef {
    let fields: Vec<ArrowField> = schema
        .fields()
        .iter()
        .map(|f| ArrowField::new(&f.name, arrow_data_type(f.value_type), true))
        .collect();
    Arc::new(Schema::new(fields))
}

macro_rules! build_primitive {
    ($builder:ty, $variant:path, $cells:expr, $column:expr, $expected:expr) => {{
        let mut builder = <$builder>::new();
        for cell in $cells {
            match cell {
                None => builder.append_null(),
                Some($variant(v)) => builder.append_value(v.clone()),
                Some(other) => {
                    return ValueTypeMismatchSnafu {
                        column: $column.to_string(),
                        expected: $expected,
                        actual: other.value_type(),
                    }
                    .fail();
                }
            }
        }
        Ok(Arc::new(builder.finish()) as ArrayRef)
    }};
}

/// Build one Arrow array from a column of cells.
pub fn cells_to_array(
    value_type: ValueType,
    cells: &[Cell],
    column: &str,
) -> Result<ArrayRef, FormatError> {
    match value_type {
        ValueType::Bool => build_primitive!(BooleanBuilder, Datum::Bool, cells, column, value_type),
        ValueType::Int32 => build_primitive!(Int32Builder, Datum::Int32, cells, column, value_type),
        ValueType::Int64 => build_primitive!(Int64Builder, Datum::Int64, cells, column, value_type),
        ValueType::Float64 => {
            build_primitive!(Float64Builder, Datum::Float64, cells, column, value_type)
        }
        ValueType::Timestamp => build_primitive!(
            TimestampMicrosecondBuilder,
            Datum::Timestamp,
            cells,
            column,
            value_type
        ),
        ValueType::Text => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                match cell {
                    None => builder.append_null(),
                    Some(Datum::Text(v)) => builder.append_value(v.as_ref()),
                    Some(other) => {
                        return ValueTypeMismatchSnafu {
                            column: column.to_string(),
                            expected: value_type,
                            actual: other.value_type(),
                        }
                        .fail();
                    }
                }
            }
            Ok(Arc::new(builder.finish()) as ArrayRef)
        }
        ValueType::Bytes => {
            let mut builder = BinaryBuilder::new();
            for cell in cells {
                match cell {
                    None => builder.append_null(),
                    Some(Datum::Bytes(v)) => builder.append_value(v.as_ref()),
                    Some(other) => {
                        return ValueTypeMismatchSnafu {
                            column: column.to_string(),
                            expected: value_type,
                            actual: other.value_type(),
                        }
                        .fail();
                    }
                }
            }
            Ok(Arc::new(builder.finish()) as ArrayRef)
        }
    }
}

macro_rules! read_primitive {
    ($array_ty:ty, $variant:path, $array:expr, $column:expr, $expected:expr) => {{
        let typed = $array
            .as_any()
            .downcast_ref::<$array_ty>()
            .context(ColumnTypeMismatchSnafu {
                column: $column.to_string(),
                expected: $expected,
            })?;
        Ok((0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    None
                } else {
                    Some($variant(typed.value(i).into()))
                }
            })
            .collect())
    }};
}

/// Read one Arrow array back into a column of cells.
pub fn array_to_cells(
    value_type: ValueType,
    array: &ArrayRef,
    column: &str,
) -> Result<Vec<Cell>, FormatError> {
    match value_type {
        ValueType::Bool => read_primitive!(BooleanArray, Datum::Bool, array, column, value_type),
        ValueType::Int32 => read_primitive!(Int32Array, Datum::Int32, array, column, value_type),
        ValueType::Int64 => read_primitive!(Int64Array, Datum::Int64, array, column, value_type),
        ValueType::Float64 => {
            read_primitive!(Float64Array, Datum::Float64, array, column, value_type)
        }
        ValueType::Timestamp => read_primitive!(
            TimestampMicrosecondArray,
            Datum::Timestamp,
            array,
            column,
            value_type
        ),
        ValueType::Text => {
            let typed = array
                .as_any()
                .downcast_ref::<StringArray>()
                .context(ColumnTypeMismatchSnafu {
                    column: column.to_string(),
                    expected: value_type,
                })?;
            Ok((0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        None
                    } else {
                        Some(Datum::Text(typed.value(i).into()))
                    }
                })
                .collect())
        }
        ValueType::Bytes => {
            let typed = array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .context(ColumnTypeMismatchSnafu {
                    column: column.to_string(),
                    expected: value_type,
                })?;
            Ok((0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        None
                    } else {
                        Some(Datum::Bytes(Bytes::copy_from_slice(typed.value(i))))
                    }
                })
                .collect())
        }
    }
}

/// Turn a record batch laid out like `schema` into engine rows.
pub fn batch_to_rows(schema: &RowSchema, batch: &RecordBatch) -> Result<Vec<Row>, FormatError> {
    ensure!(
        batch.num_columns() == schema.width(),
        WidthMismatchSnafu {
            expected: schema.width(),
            got: batch.num_columns(),
        }
    );

    let mut columns = Vec::with_capacity(schema.width());
    for (i, field) in schema.fields().iter().enumerate() {
        columns.push(array_to_cells(
            field.value_type,
            batch.column(i),
            &field.name,
        )?);
    }

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(columns.iter().map(|col| col[i].clone()).collect());
    }
    Ok(rows)
}
