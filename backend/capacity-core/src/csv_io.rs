// src/csv_io.rs
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;
use tracing::{debug, info};

use crate::allocation_validation::parse_fte;
use crate::errors::CsvError;
use crate::models::Allocation;
use crate::utilization::{ActualHours, MAX_HOURS_PER_DAY};

// Header row counts as line 1.
const FIRST_DATA_LINE: usize = 2;

/// `id,user_key,user_display_name,project_key,project_name,date,fte`
#[derive(Debug, Deserialize)]
struct AllocationRow {
    #[serde(default)]
    id: Option<String>,
    user_key: String,
    #[serde(default)]
    user_display_name: Option<String>,
    project_key: String,
    #[serde(default)]
    project_name: Option<String>,
    date: NaiveDate,
    fte: String,
}

#[derive(Debug, Serialize)]
struct AllocationOutRow<'a> {
    id: &'a str,
    user_key: &'a str,
    user_display_name: &'a str,
    project_key: &'a str,
    project_name: &'a str,
    date: NaiveDate,
    fte: String,
}

/// `user_key,date,hours`
#[derive(Debug, Deserialize)]
struct HoursRow {
    user_key: String,
    date: NaiveDate,
    hours: String,
}

/// Reads allocation rows. Missing display labels fall back to the keys.
pub fn read_allocations<R: Read>(reader: R) -> Result<Vec<Allocation>, CsvError> {
    let mut csv_reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let mut allocations = Vec::new();
    for (index, row) in csv_reader.deserialize::<AllocationRow>().enumerate() {
        let line = index + FIRST_DATA_LINE;
        let row = row?;
        let fte = parse_fte(&row.fte).map_err(|reason| CsvError::InvalidRow { line, reason })?;

        let mut allocation = Allocation::new(&row.user_key, &row.project_key, row.date, fte);
        allocation.id = row.id.filter(|id| !id.is_empty());
        if let Some(name) = row.user_display_name.filter(|name| !name.is_empty()) {
            allocation = allocation.user_display_name(&name);
        }
        if let Some(name) = row.project_name.filter(|name| !name.is_empty()) {
            allocation = allocation.project_name(&name);
        }
        allocations.push(allocation);
    }

    info!("Read {} allocation rows", allocations.len());
    Ok(allocations)
}

pub fn write_allocations<W: Write>(writer: W, allocations: &[Allocation]) -> Result<(), CsvError> {
    let mut csv_writer = WriterBuilder::new().from_writer(writer);
    for allocation in allocations {
        csv_writer.serialize(AllocationOutRow {
            id: allocation.id.as_deref().unwrap_or(""),
            user_key: &allocation.user_key,
            user_display_name: &allocation.user_display_name,
            project_key: &allocation.project_key,
            project_name: &allocation.project_name,
            date: allocation.date,
            fte: allocation.fte.normalize().to_string(),
        })?;
    }
    csv_writer.flush()?;
    debug!("Wrote {} allocation rows", allocations.len());
    Ok(())
}

/// Reads logged hours. Several rows for the same user and day add up, and
/// the total for a user-day may not exceed `MAX_HOURS_PER_DAY`.
pub fn read_hours<R: Read>(reader: R) -> Result<ActualHours, CsvError> {
    let mut csv_reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let mut hours = ActualHours::new();
    let mut rows = 0;
    for (index, row) in csv_reader.deserialize::<HoursRow>().enumerate() {
        let line = index + FIRST_DATA_LINE;
        let row = row?;
        let spent = Decimal::from_str(&row.hours)
            .ok()
            .filter(|spent| *spent >= Decimal::ZERO && *spent <= MAX_HOURS_PER_DAY)
            .ok_or_else(|| CsvError::InvalidHours {
                line,
                hours: row.hours.clone(),
            })?;

        let total = hours
            .entry((row.user_key.clone(), row.date))
            .or_insert(Decimal::ZERO);
        if *total + spent > MAX_HOURS_PER_DAY {
            return Err(CsvError::DayOverBooked {
                line,
                user_key: row.user_key,
                date: row.date,
            });
        }
        *total += spent;
        rows += 1;
    }

    info!("Read {} hour rows covering {} user-days", rows, hours.len());
    Ok(hours)
}
