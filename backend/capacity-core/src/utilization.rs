// src/utilization.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use crate::aggregation::{aggregate_by_user_day, classify};
use crate::errors::{AllocationError, Result};
use crate::models::{
    Allocation, Classification, DateRange, DayTotal, DayUtilization, ProjectKey, UserKey,
    UtilizationRecord,
};
use crate::ports::ActualTimeSource;

pub const DEFAULT_HOURS_PER_FTE_DAY: Decimal = dec!(8);

/// Upper bound for hours logged or planned on one day.
pub const MAX_HOURS_PER_DAY: Decimal = dec!(24);

const HUNDRED: Decimal = dec!(100);

pub type ActualHours = HashMap<(UserKey, NaiveDate), Decimal>;

/// `100 * spent / capacity`, or 0 when there is no capacity to measure against.
pub fn utilization_percent(hours_spent: Decimal, capacity_hours: Decimal) -> Result<Decimal> {
    if capacity_hours <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    HUNDRED
        .checked_mul(hours_spent)
        .and_then(|scaled| scaled.checked_div(capacity_hours))
        .ok_or_else(|| overflow("utilization percent"))
}

fn overflow(what: &str) -> AllocationError {
    AllocationError::Overflow(what.to_string())
}

fn checked_sum(mut values: impl Iterator<Item = Decimal>, what: &str) -> Result<Decimal> {
    values.try_fold(Decimal::ZERO, |total, value| {
        total.checked_add(value).ok_or_else(|| overflow(what))
    })
}

impl UtilizationRecord {
    /// Same thresholds as daily FTE classification, expressed in percent.
    pub fn status(&self) -> Classification {
        classify(self.utilization_percent / HUNDRED)
    }

    /// Days with logged hours but no planned capacity.
    pub fn unplanned_days(&self) -> Vec<NaiveDate> {
        self.days
            .iter()
            .filter(|day| day.capacity_hours.is_zero() && day.hours_spent > Decimal::ZERO)
            .map(|day| day.date)
            .collect()
    }
}

/// Planned capacity against logged hours, per user, over `period`.
///
/// A user appears when they have allocations or logged hours in the period.
/// The per-day breakdown lists every day with either; days without capacity
/// report 0% utilization. Values too large for `Decimal` give `Overflow`.
pub fn analyze(
    allocations: &[Allocation],
    actual_hours: &ActualHours,
    hours_per_fte_day: Decimal,
    period: DateRange,
) -> Result<Vec<UtilizationRecord>> {
    let in_period: Vec<Allocation> = allocations
        .iter()
        .filter(|a| period.contains(a.date))
        .cloned()
        .collect();
    let day_totals = aggregate_by_user_day(&in_period);

    let mut days_by_user: BTreeMap<UserKey, BTreeSet<NaiveDate>> = BTreeMap::new();
    for (user_key, date) in day_totals.keys() {
        days_by_user.entry(user_key.clone()).or_default().insert(*date);
    }
    for (user_key, date) in actual_hours.keys() {
        if period.contains(*date) {
            days_by_user.entry(user_key.clone()).or_default().insert(*date);
        }
    }

    let mut records = Vec::with_capacity(days_by_user.len());
    for (user_key, dates) in days_by_user {
        let mut days = Vec::with_capacity(dates.len());
        for date in dates {
            let key = (user_key.clone(), date);
            let total_fte = day_totals
                .get(&key)
                .map(|total| total.total_fte)
                .unwrap_or(Decimal::ZERO);
            let capacity_hours = total_fte
                .checked_mul(hours_per_fte_day)
                .ok_or_else(|| overflow("capacity hours"))?;
            let hours_spent = actual_hours.get(&key).copied().unwrap_or(Decimal::ZERO);
            days.push(DayUtilization {
                date,
                total_fte,
                capacity_hours,
                hours_spent,
                utilization_percent: utilization_percent(hours_spent, capacity_hours)?,
            });
        }

        let total_capacity_hours =
            checked_sum(days.iter().map(|day| day.capacity_hours), "total capacity hours")?;
        let total_hours_spent =
            checked_sum(days.iter().map(|day| day.hours_spent), "total hours spent")?;
        debug!(
            "Utilization for {}: capacity={}h, spent={}h over {} days",
            user_key,
            total_capacity_hours,
            total_hours_spent,
            days.len()
        );
        records.push(UtilizationRecord {
            utilization_percent: utilization_percent(total_hours_spent, total_capacity_hours)?,
            user_key,
            total_capacity_hours,
            total_hours_spent,
            days,
        });
    }

    info!(
        "Analyzed utilization for {} users between {} and {}",
        records.len(),
        period.start,
        period.end
    );
    Ok(records)
}

/// Pulls logged hours for each user from the time-tracking source.
pub async fn collect_actual_hours<S: ActualTimeSource + ?Sized>(
    source: &S,
    user_keys: &[UserKey],
    period: DateRange,
) -> Result<ActualHours> {
    let mut hours = ActualHours::new();
    for user_key in user_keys {
        for (date, spent) in source.hours_spent(user_key, period).await? {
            hours.insert((user_key.clone(), date), spent);
        }
    }
    Ok(hours)
}

// --- Overload Summary ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverloadEntry {
    pub user_key: UserKey,
    pub date: NaiveDate,
    pub total_fte: Decimal,
    pub classification: Classification,
    pub largest_project: Option<ProjectKey>,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverloadSummary {
    pub period: DateRange,
    pub overloaded: Vec<OverloadEntry>,
    pub underutilized: Vec<OverloadEntry>,
    pub total_overloaded_days: usize,
    pub total_underutilized_days: usize,
}

/// Flags overloaded and underutilized user-days in the period by planned FTE.
pub fn overload_summary(allocations: &[Allocation], period: DateRange) -> OverloadSummary {
    let in_period: Vec<Allocation> = allocations
        .iter()
        .filter(|a| period.contains(a.date))
        .cloned()
        .collect();

    let mut overloaded = Vec::new();
    let mut underutilized = Vec::new();
    for day in aggregate_by_user_day(&in_period).into_values() {
        match day.classification {
            Classification::Overloaded => overloaded.push(flag_entry(&day)),
            Classification::Underutilized => underutilized.push(flag_entry(&day)),
            Classification::Nominal | Classification::Empty => {}
        }
    }

    info!(
        "Overload summary {}..={}: {} overloaded, {} underutilized user-days",
        period.start,
        period.end,
        overloaded.len(),
        underutilized.len()
    );
    OverloadSummary {
        period,
        total_overloaded_days: overloaded.len(),
        total_underutilized_days: underutilized.len(),
        overloaded,
        underutilized,
    }
}

/// The allocation with the highest FTE that day; ties go to the lowest project key.
pub fn largest_contributor(day: &DayTotal) -> Option<&Allocation> {
    day.allocations.iter().min_by(|a, b| {
        b.fte
            .cmp(&a.fte)
            .then_with(|| a.project_key.cmp(&b.project_key))
    })
}

fn flag_entry(day: &DayTotal) -> OverloadEntry {
    let largest = largest_contributor(day);
    let contributor = largest
        .map(|a| format!("{} ({}) at {} FTE", a.project_name, a.project_key, a.fte.normalize()))
        .unwrap_or_else(|| "no project".to_string());

    let suggestion = match day.classification {
        Classification::Overloaded => {
            let excess = ((day.total_fte - Decimal::ONE) * HUNDRED).round_dp(1);
            format!(
                "Reduce allocation by {}%; largest contributor: {}",
                excess.normalize(),
                contributor
            )
        }
        _ => {
            let available = ((Decimal::ONE - day.total_fte) * HUNDRED).round_dp(1);
            format!(
                "Available capacity: {}%; largest current allocation: {}",
                available.normalize(),
                contributor
            )
        }
    };

    OverloadEntry {
        user_key: day.user_key.clone(),
        date: day.date,
        total_fte: day.total_fte,
        classification: day.classification,
        largest_project: largest.map(|a| a.project_key.clone()),
        suggestion,
    }
}
