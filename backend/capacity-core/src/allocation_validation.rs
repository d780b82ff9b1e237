// src/allocation_validation.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

use crate::calendar::WorkingDayPolicy;
use crate::errors::ValidationErrorReason;
use crate::models::Allocation;

/// The part of an allocation write that the validator inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationCandidate {
    pub date: NaiveDate,
    pub fte: Decimal,
}

impl AllocationCandidate {
    pub fn new(date: NaiveDate, fte: Decimal) -> Self {
        Self { date, fte }
    }
}

impl From<&Allocation> for AllocationCandidate {
    fn from(allocation: &Allocation) -> Self {
        Self {
            date: allocation.date,
            fte: allocation.fte,
        }
    }
}

/// Checks a single (date, fte) pair. FTE bounds are checked before the
/// working-day policy, so an out-of-range FTE on a weekend reports
/// `OutOfRangeFte`.
pub fn validate<P: WorkingDayPolicy + ?Sized>(
    candidate: &AllocationCandidate,
    policy: &P,
) -> Result<(), ValidationErrorReason> {
    validate_fte(candidate.fte)?;
    if !policy.is_working_day(candidate.date) {
        debug!("Rejecting allocation on non-working day {}", candidate.date);
        return Err(ValidationErrorReason::NonWorkingDay {
            date: candidate.date,
        });
    }
    Ok(())
}

pub fn validate_allocation<P: WorkingDayPolicy + ?Sized>(
    allocation: &Allocation,
    policy: &P,
) -> Result<(), ValidationErrorReason> {
    validate(&AllocationCandidate::from(allocation), policy)
}

pub fn validate_fte(fte: Decimal) -> Result<(), ValidationErrorReason> {
    if fte < Decimal::ZERO || fte > Decimal::ONE {
        return Err(ValidationErrorReason::out_of_range(fte));
    }
    Ok(())
}

/// Parses an FTE arriving as text (CSV cell, CLI flag) straight into a
/// `Decimal`, so the value is validated exactly as written.
/// Scientific notation such as `5e-1` is accepted.
pub fn parse_fte(text: &str) -> Result<Decimal, ValidationErrorReason> {
    let text = text.trim();
    let fte = Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map_err(|_| ValidationErrorReason::OutOfRangeFte {
            fte: text.to_string(),
        })?;
    validate_fte(fte)?;
    Ok(fte.normalize())
}
