//! Parsers for the small spec strings the CLI takes on the command line:
//! column lists, chunk intervals and order-by clauses.

use chrono::TimeDelta;
use chunkwise_core::planner::OrderByRequest;
use chunkwise_core::scan::sort::SortDirection;
use chunkwise_core::value::{Field, RowSchema, ValueType};
use snafu::prelude::*;

/// Errors from spec-string parsing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParseError {
    /// A column entry is not `name:type`.
    #[snafu(display("Invalid column spec '{entry}', expected name:type"))]
    InvalidColumn {
        /// The offending entry.
        entry: String,
    },

    /// Unknown column type name.
    #[snafu(display(
        "Unknown column type '{name}' (expected timestamp, int32, int64, float64, text, bool or bytes)"
    ))]
    UnknownType {
        /// The offending type name.
        name: String,
    },

    /// Interval spec that is not `<n><s|m|h|d>`.
    #[snafu(display("Invalid interval '{spec}', expected forms like 90s, 15m, 6h or 1d"))]
    InvalidInterval {
        /// The offending spec.
        spec: String,
    },

    /// Order-by clause that does not parse.
    #[snafu(display(
        "Invalid order spec '{spec}', expected 'column [asc|desc] [nulls_first|nulls_last]'"
    ))]
    InvalidOrder {
        /// The offending spec.
        spec: String,
    },
}

/// Parse `ts:timestamp,device:text,reading:float64` into a row schema.
pub fn parse_columns(spec: &str) -> Result<RowSchema, ParseError> {
    let mut fields = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        let (name, type_name) = entry.split_once(':').context(InvalidColumnSnafu {
            entry: entry.to_string(),
        })?;
        let value_type = parse_type(type_name.trim())?;
        fields.push(Field::new(name.trim(), value_type));
    }
    Ok(RowSchema::new(fields))
}

fn parse_type(name: &str) -> Result<ValueType, ParseError> {
    match name.to_ascii_lowercase().as_str() {
        "timestamp" => Ok(ValueType::Timestamp),
        "int32" | "int" => Ok(ValueType::Int32),
        "int64" | "bigint" => Ok(ValueType::Int64),
        "float64" | "double" => Ok(ValueType::Float64),
        "text" | "string" => Ok(ValueType::Text),
        "bool" | "boolean" => Ok(ValueType::Bool),
        "bytes" | "binary" => Ok(ValueType::Bytes),
        other => UnknownTypeSnafu {
            name: other.to_string(),
        }
        .fail(),
    }
}

/// Parse `90s`, `15m`, `6h` or `1d` into a chunk interval.
pub fn parse_interval(spec: &str) -> Result<TimeDelta, ParseError> {
    let spec = spec.trim();
    let split = spec.len().checked_sub(1).filter(|_| !spec.is_empty());
    let Some(split) = split else {
        return InvalidIntervalSnafu {
            spec: spec.to_string(),
        }
        .fail();
    };

    let (number, unit) = spec.split_at(split);
    let n: i64 = number.parse().map_err(|_| ParseError::InvalidInterval {
        spec: spec.to_string(),
    })?;
    if n <= 0 {
        return InvalidIntervalSnafu {
            spec: spec.to_string(),
        }
        .fail();
    }
    match unit {
        "s" => Ok(TimeDelta::seconds(n)),
        "m" => Ok(TimeDelta::minutes(n)),
        "h" => Ok(TimeDelta::hours(n)),
        "d" => Ok(TimeDelta::days(n)),
        _ => InvalidIntervalSnafu {
            spec: spec.to_string(),
        }
        .fail(),
    }
}

/// Parse one order clause: `ts`, `ts desc`, `ts asc nulls_last`, ...
/// Defaults mirror ORDER BY: ascending, and nulls last for ascending,
/// nulls first for descending.
pub fn parse_order(spec: &str) -> Result<OrderByRequest, ParseError> {
    let mut parts = spec.split_whitespace();
    let column = parts
        .next()
        .context(InvalidOrderSnafu {
            spec: spec.to_string(),
        })?
        .to_string();

    let mut direction = SortDirection::Asc;
    let mut nulls_first: Option<bool> = None;
    for token in parts {
        match token.to_ascii_lowercase().as_str() {
            "asc" => direction = SortDirection::Asc,
            "desc" => direction = SortDirection::Desc,
            "nulls_first" => nulls_first = Some(true),
            "nulls_last" => nulls_first = Some(false),
            _ => {
                return InvalidOrderSnafu {
                    spec: spec.to_string(),
                }
                .fail();
            }
        }
    }

    let nulls_first = nulls_first.unwrap_or(matches!(direction, SortDirection::Desc));
    Ok(OrderByRequest {
        column,
        direction,
        nulls_first,
    })
}

/// Parse a comma-separated list of order clauses.
pub fn parse_order_list(spec: &str) -> Result<Vec<OrderByRequest>, ParseError> {
    spec.split(',')
        .map(|clause| parse_order(clause.trim()))
        .collect()
}
