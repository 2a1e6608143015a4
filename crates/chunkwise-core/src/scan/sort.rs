//! Sort keys over decoded rows.
//!
//! A sort key names a 1-based output column together with a direction and an
//! explicit NULLS FIRST/LAST flag. Comparisons are infallible: datums carry
//! a total order, and the planner validated the attribute numbers.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::value::Cell;

/// Sort direction of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

impl SortDirection {
    /// The opposite direction.
    pub fn reversed(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// One key of a sort order over decoded rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// 1-based attribute number in the output row.
    pub attno: usize,
    /// Direction.
    pub direction: SortDirection,
    /// Whether NULL sorts before all values.
    pub nulls_first: bool,
}

/// Compare two cells under one sort key.
pub fn compare_cells(a: &Cell, b: &Cell, key: &SortKey) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => {
            if key.nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (Some(_), None) => {
            if key.nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Some(x), Some(y)) => {
            let ord = x.total_cmp(y);
            match key.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    }
}

/// Compare two rows under a sequence of sort keys, first difference wins.
pub fn compare_rows(a: &[Cell], b: &[Cell], keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = compare_cells(&a[key.attno - 1], &b[key.attno - 1], key);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
