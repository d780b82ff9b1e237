// src/models.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::errors::{AllocationError, Result};

pub type UserKey = String;
pub type ProjectKey = String;
pub type AllocationId = String;

// --- Core Data Structures ---

/// One persisted row: the FTE fraction of a workday a user spends on a
/// project on a single calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Assigned by the repository; `None` before persistence.
    pub id: Option<AllocationId>,
    pub user_key: UserKey,
    pub user_display_name: String,
    pub project_key: ProjectKey,
    pub project_name: String,
    pub date: NaiveDate,
    pub fte: Decimal,
}

impl Allocation {
    pub fn new(user_key: &str, project_key: &str, date: NaiveDate, fte: Decimal) -> Self {
        Self {
            id: None,
            user_key: user_key.to_string(),
            user_display_name: user_key.to_string(),
            project_key: project_key.to_string(),
            project_name: project_key.to_string(),
            date,
            fte,
        }
    }

    pub fn user_display_name(mut self, name: &str) -> Self {
        self.user_display_name = name.to_string();
        self
    }

    pub fn project_name(mut self, name: &str) -> Self {
        self.project_name = name.to_string();
        self
    }

    pub fn key(&self) -> AllocationKey {
        AllocationKey {
            user_key: self.user_key.clone(),
            project_key: self.project_key.clone(),
            date: self.date,
        }
    }
}

/// The upsert target. At most one `Allocation` exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocationKey {
    pub user_key: UserKey,
    pub project_key: ProjectKey,
    pub date: NaiveDate,
}

impl std::fmt::Display for AllocationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.user_key, self.project_key, self.date)
    }
}

/// Inclusive calendar period. Construction rejects `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AllocationError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        // start <= end is guaranteed by construction.
        calendar::enumerate_days(self.start, self.end).unwrap_or_default()
    }
}

/// Query filter for the repository port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationFilter {
    pub period: DateRange,
    pub user_key: Option<UserKey>,
    pub project_key: Option<ProjectKey>,
}

impl AllocationFilter {
    pub fn period(period: DateRange) -> Self {
        Self {
            period,
            user_key: None,
            project_key: None,
        }
    }

    pub fn user(mut self, user_key: &str) -> Self {
        self.user_key = Some(user_key.to_string());
        self
    }

    pub fn project(mut self, project_key: &str) -> Self {
        self.project_key = Some(project_key.to_string());
        self
    }

    pub fn matches(&self, allocation: &Allocation) -> bool {
        if !self.period.contains(allocation.date) {
            return false;
        }
        if let Some(user_key) = &self.user_key {
            if &allocation.user_key != user_key {
                return false;
            }
        }
        if let Some(project_key) = &self.project_key {
            if &allocation.project_key != project_key {
                return false;
            }
        }
        true
    }
}

// --- Derived Structures ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Overloaded,
    Nominal,
    Underutilized,
    Empty,
}

/// All allocations of one user on one day, summed across projects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTotal {
    pub user_key: UserKey,
    pub date: NaiveDate,
    pub allocations: Vec<Allocation>,
    pub total_fte: Decimal,
    pub classification: Classification,
}

/// A maximal contiguous run of days with identical FTE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub fte: Decimal,
}

impl Range {
    pub fn single(date: NaiveDate, fte: Decimal) -> Self {
        Self {
            start_date: date,
            end_date: date,
            fte,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayUtilization {
    pub date: NaiveDate,
    pub total_fte: Decimal,
    pub capacity_hours: Decimal,
    pub hours_spent: Decimal,
    pub utilization_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationRecord {
    pub user_key: UserKey,
    pub total_capacity_hours: Decimal,
    pub total_hours_spent: Decimal,
    pub utilization_percent: Decimal,
    pub days: Vec<DayUtilization>,
}

// --- Directory Records ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub key: ProjectKey,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub key: UserKey,
    pub display_name: String,
    pub active: bool,
}
