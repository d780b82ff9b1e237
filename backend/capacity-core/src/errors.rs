// src/errors.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

// --- Validation Errors ---

/// Reason a single (date, fte) candidate was rejected.
///
/// Reported per day, never for a whole request, so it is `Clone` and can be
/// carried inside a `DayOutcome`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorReason {
    #[error("FTE {fte} is outside the allowed range [0, 1]")]
    OutOfRangeFte { fte: String },
    #[error("{date} is not a working day")]
    NonWorkingDay { date: NaiveDate },
}

impl ValidationErrorReason {
    pub fn out_of_range(fte: Decimal) -> Self {
        ValidationErrorReason::OutOfRangeFte {
            fte: fte.to_string(),
        }
    }
}

// --- Engine Errors ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrorReason),
    #[error("Allocation not found: {id}")]
    NotFound { id: String },
    #[error("Repository failure: {0}")]
    RepositoryFailure(String),
    #[error("Arithmetic overflow while computing {0}")]
    Overflow(String),
}

pub type Result<T> = std::result::Result<T, AllocationError>;

// --- Configuration Errors ---

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Unknown weekday name in CAPACITY_NON_WORKING_DAYS: {0}")]
    InvalidWeekday(String),
    #[error("Invalid holiday date in CAPACITY_HOLIDAYS: {0}")]
    InvalidHoliday(String),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

// --- CSV Import/Export Errors ---

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Line {line}: {reason}")]
    InvalidRow {
        line: usize,
        reason: ValidationErrorReason,
    },
    #[error("Line {line}: hours must be a number between 0 and 24, got {hours}")]
    InvalidHours { line: usize, hours: String },
    #[error("Line {line}: more than 24 hours logged for {user_key} on {date}")]
    DayOverBooked {
        line: usize,
        user_key: String,
        date: NaiveDate,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
