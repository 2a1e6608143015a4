//! Scalar value model and row schemas.
//!
//! Rows inside the engine are plain `Vec<Cell>` laid out by a [`RowSchema`].
//! A [`Cell`] is `Option<Datum>` with `None` playing the role of SQL NULL, so
//! null handling is explicit at every seam. [`Datum`] carries a total order
//! (floats via `total_cmp`, cross-type via a type-rank tie-breaker) so sort
//! comparators never have to be fallible.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit IEEE float.
    Float64,
    /// Timestamp in microseconds since the Unix epoch, no timezone.
    Timestamp,
    /// UTF-8 text.
    Text,
    /// Raw bytes; also the carrier for compressed column streams.
    Bytes,
}

/// A single non-null scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    /// Boolean value.
    Bool(bool),
    /// 32-bit integer value.
    Int32(i32),
    /// 64-bit integer value.
    Int64(i64),
    /// 64-bit float value.
    Float64(f64),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    /// Text value.
    Text(Arc<str>),
    /// Byte-string value.
    Bytes(Bytes),
}

/// A nullable cell: `None` is SQL NULL.
pub type Cell = Option<Datum>;

/// A decoded row, laid out by the owning [`RowSchema`].
pub type Row = Vec<Cell>;

impl Datum {
    /// The logical type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Datum::Bool(_) => ValueType::Bool,
            Datum::Int32(_) => ValueType::Int32,
            Datum::Int64(_) => ValueType::Int64,
            Datum::Float64(_) => ValueType::Float64,
            Datum::Timestamp(_) => ValueType::Timestamp,
            Datum::Text(_) => ValueType::Text,
            Datum::Bytes(_) => ValueType::Bytes,
        }
    }

    /// Total order over datums.
    ///
    /// Same-type values compare naturally (floats via `total_cmp`); values of
    /// different types compare by a fixed type rank so the order is total and
    /// deterministic but otherwise meaningless. Mixed-type comparisons only
    /// arise from malformed segment data, never from planned sort keys.
    pub fn total_cmp(&self, other: &Datum) -> Ordering {
        use Datum::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int32(a), Int32(b)) => a.cmp(b),
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.total_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.as_ref().cmp(b.as_ref()),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (a, b) => type_rank(a).cmp(&type_rank(b)),
        }
    }
}

fn type_rank(d: &Datum) -> u8 {
    match d {
        Datum::Bool(_) => 0,
        Datum::Int32(_) => 1,
        Datum::Int64(_) => 2,
        Datum::Float64(_) => 3,
        Datum::Timestamp(_) => 4,
        Datum::Text(_) => 5,
        Datum::Bytes(_) => 6,
    }
}

/// One column of a row schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Column name, unique within the schema.
    pub name: String,
    /// Logical type.
    pub value_type: ValueType,
    /// The value decoded for rows that predate this column (for example a
    /// column added later with a default). `None` decodes as NULL.
    #[serde(default)]
    pub missing_default: Cell,
}

impl Field {
    /// A field with a NULL missing-value default.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            missing_default: None,
        }
    }
}

/// An ordered set of named, typed columns describing a row layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSchema {
    fields: Vec<Field>,
}

impl RowSchema {
    /// Build a schema from fields. Names are trusted to be unique; the
    /// catalog validates uniqueness when a table is created.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.fields.len()
    }

    /// All fields in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field at a zero-based offset.
    pub fn field(&self, offset: usize) -> Option<&Field> {
        self.fields.get(offset)
    }

    /// Zero-based offset of the column with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// An all-NULL row of this schema's width.
    pub fn empty_row(&self) -> Row {
        vec![None; self.fields.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_cmp_orders_same_type_values() {
        assert_eq!(
            Datum::Int64(1).total_cmp(&Datum::Int64(2)),
            Ordering::Less
        );
        assert_eq!(
            Datum::Text("b".into()).total_cmp(&Datum::Text("a".into())),
            Ordering::Greater
        );
        assert_eq!(
            Datum::Timestamp(5).total_cmp(&Datum::Timestamp(5)),
            Ordering::Equal
        );
    }

    #[test]
    fn total_cmp_is_total_over_floats() {
        assert_eq!(
            Datum::Float64(f64::NAN).total_cmp(&Datum::Float64(f64::NAN)),
            Ordering::Equal
        );
        assert_eq!(
            Datum::Float64(-0.0).total_cmp(&Datum::Float64(0.0)),
            Ordering::Less
        );
    }

    #[test]
    fn total_cmp_mixed_types_is_deterministic() {
        let a = Datum::Bool(true);
        let b = Datum::Text("x".into());
        assert_eq!(a.total_cmp(&b), Ordering::Less);
        assert_eq!(b.total_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn schema_lookup_by_name() {
        let schema = RowSchema::new(vec![
            Field::new("ts", ValueType::Timestamp),
            Field::new("device", ValueType::Text),
            Field::new("reading", ValueType::Float64),
        ]);
        assert_eq!(schema.index_of("device"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
        assert_eq!(schema.width(), 3);
        assert_eq!(schema.empty_row(), vec![None, None, None]);
    }
}
