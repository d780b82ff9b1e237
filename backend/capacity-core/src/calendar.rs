// src/calendar.rs
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

use crate::errors::{AllocationError, Result};

/// Upper bound when searching forward for the next working day.
const MAX_WORKING_DAY_SEARCH: u32 = 366;

// --- Working Day Policies ---

/// Decides whether allocations may be placed on a date.
pub trait WorkingDayPolicy: Send + Sync {
    fn is_working_day(&self, date: NaiveDate) -> bool;
}

impl<F> WorkingDayPolicy for F
where
    F: Fn(NaiveDate) -> bool + Send + Sync,
{
    fn is_working_day(&self, date: NaiveDate) -> bool {
        self(date)
    }
}

/// Fixed set of non-working weekdays. Defaults to Saturday and Sunday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekendPolicy {
    non_working: HashSet<Weekday>,
}

impl WeekendPolicy {
    pub fn new(non_working: impl IntoIterator<Item = Weekday>) -> Self {
        Self {
            non_working: non_working.into_iter().collect(),
        }
    }
}

impl Default for WeekendPolicy {
    fn default() -> Self {
        Self::new([Weekday::Sat, Weekday::Sun])
    }
}

impl WorkingDayPolicy for WeekendPolicy {
    fn is_working_day(&self, date: NaiveDate) -> bool {
        !self.non_working.contains(&date.weekday())
    }
}

/// Weekly policy plus explicit non-working dates (public holidays, office closures).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolidayCalendar {
    weekly: WeekendPolicy,
    holidays: HashSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(weekly: WeekendPolicy) -> Self {
        Self {
            weekly,
            holidays: HashSet::new(),
        }
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }
}

impl WorkingDayPolicy for HolidayCalendar {
    fn is_working_day(&self, date: NaiveDate) -> bool {
        self.weekly.is_working_day(date) && !self.is_holiday(date)
    }
}

// --- Date Math ---

pub fn is_working_day<P: WorkingDayPolicy + ?Sized>(date: NaiveDate, policy: &P) -> bool {
    policy.is_working_day(date)
}

/// Every calendar day from `start` to `end`, both inclusive.
pub fn enumerate_days(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    if start > end {
        return Err(AllocationError::InvalidRange { start, end });
    }
    let mut days = Vec::with_capacity((days_between(start, end) + 1) as usize);
    let mut current = start;
    loop {
        days.push(current);
        if current == end {
            break;
        }
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    Ok(days)
}

/// Signed number of days from `a` to `b`; `1` when `b` is the day after `a`.
pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (b - a).num_days()
}

pub fn working_days<P: WorkingDayPolicy + ?Sized>(
    start: NaiveDate,
    end: NaiveDate,
    policy: &P,
) -> Result<Vec<NaiveDate>> {
    Ok(enumerate_days(start, end)?
        .into_iter()
        .filter(|day| policy.is_working_day(*day))
        .collect())
}

/// First working day strictly after `date`, if one exists within a year.
pub fn next_working_day<P: WorkingDayPolicy + ?Sized>(
    date: NaiveDate,
    policy: &P,
) -> Option<NaiveDate> {
    let mut current = date;
    for _ in 0..MAX_WORKING_DAY_SEARCH {
        current = current.succ_opt()?;
        if policy.is_working_day(current) {
            return Some(current);
        }
    }
    None
}
