// src/aggregation.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

use crate::calendar::WorkingDayPolicy;
use crate::models::{Allocation, Classification, DateRange, DayTotal, ProjectKey, UserKey};

/// Anything strictly above this total is overloaded.
pub const OVERLOAD_ABOVE: Decimal = dec!(1.0);
/// Lowest total (inclusive) still considered nominal.
pub const NOMINAL_FROM: Decimal = dec!(0.8);

pub type UserDayKey = (UserKey, NaiveDate);
pub type CellKey = (UserKey, ProjectKey, NaiveDate);

pub fn classify(total_fte: Decimal) -> Classification {
    if total_fte > OVERLOAD_ABOVE {
        Classification::Overloaded
    } else if total_fte >= NOMINAL_FROM {
        Classification::Nominal
    } else if total_fte > Decimal::ZERO {
        Classification::Underutilized
    } else {
        Classification::Empty
    }
}

/// Groups rows by (user, date) across all projects.
pub fn aggregate_by_user_day(allocations: &[Allocation]) -> BTreeMap<UserDayKey, DayTotal> {
    let mut grouped: BTreeMap<UserDayKey, Vec<Allocation>> = BTreeMap::new();
    for allocation in allocations {
        grouped
            .entry((allocation.user_key.clone(), allocation.date))
            .or_default()
            .push(allocation.clone());
    }

    grouped
        .into_iter()
        .map(|((user_key, date), rows)| {
            let total = day_total(&user_key, date, rows);
            ((user_key, date), total)
        })
        .collect()
}

/// Per-cell FTE keyed by (user, project, date). This is the display value of
/// a calendar cell and the input of range compression.
pub fn aggregate_by_user_project_day(allocations: &[Allocation]) -> BTreeMap<CellKey, Decimal> {
    let mut cells: BTreeMap<CellKey, Decimal> = BTreeMap::new();
    for allocation in allocations {
        *cells
            .entry((
                allocation.user_key.clone(),
                allocation.project_key.clone(),
                allocation.date,
            ))
            .or_insert(Decimal::ZERO) += allocation.fte;
    }
    cells
}

/// Splits per-cell values into one date-ascending series per (user, project).
pub fn series_by_user_project(
    cells: &BTreeMap<CellKey, Decimal>,
) -> BTreeMap<(UserKey, ProjectKey), Vec<(NaiveDate, Decimal)>> {
    let mut series: BTreeMap<(UserKey, ProjectKey), Vec<(NaiveDate, Decimal)>> = BTreeMap::new();
    // BTreeMap order is (user, project, date), so each series is already sorted
    for ((user_key, project_key, date), fte) in cells {
        series
            .entry((user_key.clone(), project_key.clone()))
            .or_default()
            .push((*date, *fte));
    }
    series
}

/// Day totals for every user on every working day of the period, including
/// days with no allocations (classified `Empty`).
pub fn day_grid<P: WorkingDayPolicy + ?Sized>(
    allocations: &[Allocation],
    user_keys: &[UserKey],
    period: DateRange,
    policy: &P,
) -> Vec<DayTotal> {
    let mut by_user_day = aggregate_by_user_day(allocations);
    let mut grid = Vec::new();
    for user_key in user_keys {
        for date in period.days() {
            if !policy.is_working_day(date) {
                continue;
            }
            let total = by_user_day
                .remove(&(user_key.clone(), date))
                .unwrap_or_else(|| day_total(user_key, date, Vec::new()));
            grid.push(total);
        }
    }
    grid
}

fn day_total(user_key: &str, date: NaiveDate, allocations: Vec<Allocation>) -> DayTotal {
    let total_fte: Decimal = allocations.iter().map(|a| a.fte).sum();
    DayTotal {
        user_key: user_key.to_string(),
        date,
        classification: classify(total_fte),
        total_fte,
        allocations,
    }
}

#[cfg(test)]
mod aggregation_tests {
    use super::*;
    use crate::calendar::WeekendPolicy;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn alloc(user: &str, project: &str, date: &str, fte: Decimal) -> Allocation {
        Allocation::new(user, project, d(date), fte)
    }

    fn classify_rows(ftes: &[Decimal]) -> Classification {
        let rows: Vec<Allocation> = ftes
            .iter()
            .enumerate()
            .map(|(i, fte)| alloc("alice@x.com", &format!("P{}", i), "2024-01-02", *fte))
            .collect();
        let totals = aggregate_by_user_day(&rows);
        totals[&("alice@x.com".to_string(), d("2024-01-02"))].classification
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify_rows(&[dec!(0.5), dec!(0.3)]), Classification::Nominal);
        assert_eq!(classify_rows(&[dec!(0.4), dec!(0.3999)]), Classification::Underutilized);
        assert_eq!(classify_rows(&[dec!(0.6), dec!(0.4)]), Classification::Nominal);
        assert_eq!(classify_rows(&[dec!(0.6), dec!(0.4001)]), Classification::Overloaded);
        assert_eq!(classify_rows(&[dec!(0)]), Classification::Empty);
    }

    #[test]
    fn classify_direct_values() {
        assert_eq!(classify(dec!(0.8)), Classification::Nominal);
        assert_eq!(classify(dec!(0.7999)), Classification::Underutilized);
        assert_eq!(classify(dec!(1.0)), Classification::Nominal);
        assert_eq!(classify(dec!(1.0001)), Classification::Overloaded);
        assert_eq!(classify(dec!(0.0001)), Classification::Underutilized);
        assert_eq!(classify(Decimal::ZERO), Classification::Empty);
    }

    #[test]
    fn second_project_overloads_the_day() {
        let mut rows: Vec<Allocation> = ["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05"]
            .iter()
            .map(|date| alloc("alice@x.com", "ENG", date, dec!(1.0)))
            .collect();
        rows.push(alloc("alice@x.com", "OPS", "2024-01-03", dec!(0.5)));

        let totals = aggregate_by_user_day(&rows);

        let wednesday = &totals[&("alice@x.com".to_string(), d("2024-01-03"))];
        assert_eq!(wednesday.total_fte, dec!(1.5));
        assert_eq!(wednesday.classification, Classification::Overloaded);
        assert_eq!(wednesday.allocations.len(), 2);
        let thursday = &totals[&("alice@x.com".to_string(), d("2024-01-04"))];
        assert_eq!(thursday.classification, Classification::Nominal);
    }

    #[test]
    fn users_are_aggregated_separately() {
        let rows = vec![
            alloc("alice@x.com", "ENG", "2024-01-02", dec!(0.5)),
            alloc("bob@x.com", "ENG", "2024-01-02", dec!(0.7)),
        ];
        let totals = aggregate_by_user_day(&rows);
        assert_eq!(totals.len(), 2);
        assert_eq!(
            totals[&("bob@x.com".to_string(), d("2024-01-02"))].total_fte,
            dec!(0.7)
        );
    }

    #[test]
    fn per_cell_values_are_keyed_by_project() {
        let rows = vec![
            alloc("alice@x.com", "ENG", "2024-01-02", dec!(0.5)),
            alloc("alice@x.com", "OPS", "2024-01-02", dec!(0.25)),
            alloc("alice@x.com", "ENG", "2024-01-03", dec!(1)),
        ];
        let cells = aggregate_by_user_project_day(&rows);
        assert_eq!(cells.len(), 3);
        assert_eq!(
            cells[&("alice@x.com".to_string(), "OPS".to_string(), d("2024-01-02"))],
            dec!(0.25)
        );

        let series = series_by_user_project(&cells);
        assert_eq!(
            series[&("alice@x.com".to_string(), "ENG".to_string())],
            vec![(d("2024-01-02"), dec!(0.5)), (d("2024-01-03"), dec!(1))]
        );
    }

    #[test]
    fn day_grid_fills_empty_working_days() {
        let rows = vec![alloc("alice@x.com", "ENG", "2024-01-02", dec!(1))];
        let period = DateRange::new(d("2024-01-01"), d("2024-01-07")).unwrap();
        let users = vec!["alice@x.com".to_string(), "bob@x.com".to_string()];

        let grid = day_grid(&rows, &users, period, &WeekendPolicy::default());

        assert_eq!(grid.len(), 10);
        let empty_days = grid
            .iter()
            .filter(|day| day.classification == Classification::Empty)
            .count();
        assert_eq!(empty_days, 9);
        assert!(grid.iter().all(|day| day.date <= d("2024-01-05")));
    }
}
