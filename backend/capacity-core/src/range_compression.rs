// src/range_compression.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::aggregation::{series_by_user_project, CellKey};
use crate::calendar::{days_between, next_working_day, WorkingDayPolicy};
use crate::models::{ProjectKey, Range, UserKey};

/// When two consecutive entries belong to the same range.
#[derive(Clone, Copy)]
pub enum ContiguityPolicy<'a> {
    /// Only the literal next calendar day continues a range.
    CalendarDays,
    /// The next working day continues a range, so non-working days in
    /// between (a weekend, a holiday) do not break it.
    WorkingDays(&'a dyn WorkingDayPolicy),
}

impl<'a> ContiguityPolicy<'a> {
    pub fn is_contiguous(&self, previous: NaiveDate, next: NaiveDate) -> bool {
        if days_between(previous, next) == 1 {
            return true;
        }
        match self {
            ContiguityPolicy::CalendarDays => false,
            ContiguityPolicy::WorkingDays(policy) => {
                next > previous && next_working_day(previous, *policy) == Some(next)
            }
        }
    }
}

/// Collapses a date-ascending (date, fte) series for one (user, project)
/// into maximal runs of equal FTE.
///
/// Entries that are out of order or repeat a date never extend a range, so
/// unsorted input degrades into more ranges rather than wrong ones.
pub fn compress(day_values: &[(NaiveDate, Decimal)], contiguity: ContiguityPolicy<'_>) -> Vec<Range> {
    let mut ranges: Vec<Range> = Vec::new();
    let mut entries = day_values.iter();

    let Some(&(first_date, first_fte)) = entries.next() else {
        return ranges;
    };
    let mut current = Range::single(first_date, first_fte);

    for &(date, fte) in entries {
        if fte == current.fte && contiguity.is_contiguous(current.end_date, date) {
            current.end_date = date;
        } else {
            ranges.push(current);
            current = Range::single(date, fte);
        }
    }
    ranges.push(current);
    ranges
}

/// Compresses every (user, project) series found in per-cell values.
pub fn compress_cells(
    cells: &BTreeMap<CellKey, Decimal>,
    contiguity: ContiguityPolicy<'_>,
) -> BTreeMap<(UserKey, ProjectKey), Vec<Range>> {
    series_by_user_project(cells)
        .into_iter()
        .map(|(key, series)| (key, compress(&series, contiguity)))
        .collect()
}
