// src/lib.rs
pub mod aggregation;
pub mod allocation_service;
pub mod allocation_validation;
pub mod calendar;
pub mod config;
pub mod csv_io;
pub mod errors;
pub mod in_memory;
pub mod models;
pub mod ports;
pub mod range_compression;
pub mod range_expander;
pub mod utilization;

#[cfg(test)]
mod allocation_service_tests;

pub use allocation_service::{AllocationService, DeleteReport, ProjectRanges, RangeContiguity};
pub use calendar::{HolidayCalendar, WeekendPolicy, WorkingDayPolicy};
pub use config::CapacityConfig;
pub use errors::{AllocationError, ConfigError, CsvError, Result, ValidationErrorReason};
pub use models::*;
pub use range_expander::{AssignmentRequest, DayOutcome, ExpandReport};
