// src/range_expander.rs
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{watch, Mutex as TokioMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::allocation_validation::{validate, AllocationCandidate};
use crate::calendar::{self, WorkingDayPolicy};
use crate::errors::{AllocationError, Result, ValidationErrorReason};
use crate::models::{Allocation, AllocationKey, ProjectKey, UserKey};
use crate::ports::AllocationRepository;

// --- Request ---

/// "Assign `user` to `project` at `fte` for every working day from `start` to `end`."
/// A single-day assignment is `start == end`.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentRequest {
    pub user_key: UserKey,
    pub user_display_name: String,
    pub project_key: ProjectKey,
    pub project_name: String,
    pub fte: Decimal,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AssignmentRequest {
    pub fn new(
        user_key: &str,
        project_key: &str,
        fte: Decimal,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            user_key: user_key.to_string(),
            user_display_name: user_key.to_string(),
            project_key: project_key.to_string(),
            project_name: project_key.to_string(),
            fte,
            start,
            end,
        }
    }

    pub fn single_day(user_key: &str, project_key: &str, fte: Decimal, date: NaiveDate) -> Self {
        Self::new(user_key, project_key, fte, date, date)
    }

    pub fn user_display_name(mut self, name: &str) -> Self {
        self.user_display_name = name.to_string();
        self
    }

    pub fn project_name(mut self, name: &str) -> Self {
        self.project_name = name.to_string();
        self
    }

    pub fn key_for(&self, date: NaiveDate) -> AllocationKey {
        AllocationKey {
            user_key: self.user_key.clone(),
            project_key: self.project_key.clone(),
            date,
        }
    }

    pub fn allocation_for(&self, date: NaiveDate) -> Allocation {
        Allocation {
            id: None,
            user_key: self.user_key.clone(),
            user_display_name: self.user_display_name.clone(),
            project_key: self.project_key.clone(),
            project_name: self.project_name.clone(),
            date,
            fte: self.fte,
        }
    }
}

// --- Per-day Outcomes ---

#[derive(Debug, Clone, PartialEq)]
pub enum DayOutcome {
    Created,
    Updated { previous_fte: Decimal },
    /// Existing state already matched the request.
    Unchanged,
    /// An existing row was removed by a zero-FTE single-day write.
    Deleted,
    Skipped(ValidationErrorReason),
    Failed(AllocationError),
    /// Cancelled before this day was started; nothing was written.
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayResult {
    pub date: NaiveDate,
    pub outcome: DayOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

/// Every day of the request, in date order, with what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandReport {
    pub user_key: UserKey,
    pub project_key: ProjectKey,
    pub fte: Decimal,
    pub days: Vec<DayResult>,
}

impl ExpandReport {
    pub fn counts(&self) -> ExpandCounts {
        let mut counts = ExpandCounts::default();
        for day in &self.days {
            match day.outcome {
                DayOutcome::Created => counts.created += 1,
                DayOutcome::Updated { .. } | DayOutcome::Deleted => counts.updated += 1,
                DayOutcome::Skipped(_) => counts.skipped += 1,
                DayOutcome::Failed(_) => counts.failed += 1,
                DayOutcome::NotAttempted => counts.not_attempted += 1,
                DayOutcome::Unchanged => {}
            }
        }
        counts
    }

    pub fn created(&self) -> usize {
        self.counts().created
    }

    pub fn updated(&self) -> usize {
        self.counts().updated
    }

    pub fn skipped(&self) -> usize {
        self.counts().skipped
    }

    /// Days a caller may retry: failed ones and ones never attempted.
    pub fn retryable_days(&self) -> Vec<NaiveDate> {
        self.days
            .iter()
            .filter(|day| {
                matches!(
                    day.outcome,
                    DayOutcome::Failed(_) | DayOutcome::NotAttempted
                )
            })
            .map(|day| day.date)
            .collect()
    }

    pub fn applied_days(&self) -> Vec<NaiveDate> {
        self.days
            .iter()
            .filter(|day| {
                matches!(
                    day.outcome,
                    DayOutcome::Created | DayOutcome::Updated { .. } | DayOutcome::Deleted
                )
            })
            .map(|day| day.date)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.retryable_days().is_empty()
    }
}

// --- Write Serialization ---

/// One async mutex per (user, project, date). Two upserts for the same key
/// never interleave their read and write.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<Mutex<HashMap<AllocationKey, Arc<TokioMutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &AllocationKey) -> OwnedMutexGuard<()> {
        let key_lock = {
            let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(key.clone()).or_default().clone()
        };
        key_lock.lock_owned().await
    }

    /// Drops entries nobody is holding or waiting on.
    pub fn prune(&self) {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, key_lock| Arc::strong_count(key_lock) > 1);
    }

    pub fn tracked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// --- Cancellation ---

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_handle, signal) = Self::pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

#[derive(Clone)]
pub struct ExpandOptions {
    /// Maximum days in flight at once. `1` processes days strictly in order.
    pub concurrency: usize,
    pub locks: KeyedLocks,
    pub cancel: CancelSignal,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            locks: KeyedLocks::new(),
            cancel: CancelSignal::never(),
        }
    }
}

impl ExpandOptions {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn locks(mut self, locks: KeyedLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

// --- Expansion ---

pub async fn expand<R, P>(request: &AssignmentRequest, policy: &P, repo: &R) -> Result<ExpandReport>
where
    R: AllocationRepository + ?Sized,
    P: WorkingDayPolicy + ?Sized,
{
    expand_with(request, policy, repo, &ExpandOptions::default()).await
}

/// Turns the request into per-day upserts. `InvalidRange` is the only error
/// returned; everything else is reported against its day.
pub async fn expand_with<R, P>(
    request: &AssignmentRequest,
    policy: &P,
    repo: &R,
    options: &ExpandOptions,
) -> Result<ExpandReport>
where
    R: AllocationRepository + ?Sized,
    P: WorkingDayPolicy + ?Sized,
{
    let days = calendar::enumerate_days(request.start, request.end)?;
    info!(
        "Expanding assignment: User={}, Project={}, FTE={}, {}..={} ({} days)",
        request.user_key,
        request.project_key,
        request.fte,
        request.start,
        request.end,
        days.len()
    );
    Ok(expand_days(request, &days, policy, repo, options).await)
}

/// Applies the request to an explicit list of days, e.g. the
/// `retryable_days()` of an earlier report.
pub async fn expand_days<R, P>(
    request: &AssignmentRequest,
    days: &[NaiveDate],
    policy: &P,
    repo: &R,
    options: &ExpandOptions,
) -> ExpandReport
where
    R: AllocationRepository + ?Sized,
    P: WorkingDayPolicy + ?Sized,
{
    let mut results: Vec<DayResult> = stream::iter(
        days.iter()
            .map(|day| process_day(request, *day, policy, repo, options)),
    )
    .buffer_unordered(options.concurrency.max(1))
    .collect()
    .await;
    results.sort_by_key(|result| result.date);
    options.locks.prune();

    let report = ExpandReport {
        user_key: request.user_key.clone(),
        project_key: request.project_key.clone(),
        fte: request.fte,
        days: results,
    };
    let counts = report.counts();
    if counts.failed > 0 || counts.not_attempted > 0 {
        warn!(
            "Expansion for User={}, Project={} incomplete: {:?}",
            request.user_key, request.project_key, counts
        );
    } else {
        info!(
            "Expansion for User={}, Project={} finished: {:?}",
            request.user_key, request.project_key, counts
        );
    }
    report
}

async fn process_day<R, P>(
    request: &AssignmentRequest,
    day: NaiveDate,
    policy: &P,
    repo: &R,
    options: &ExpandOptions,
) -> DayResult
where
    R: AllocationRepository + ?Sized,
    P: WorkingDayPolicy + ?Sized,
{
    if options.cancel.is_cancelled() {
        return DayResult {
            date: day,
            outcome: DayOutcome::NotAttempted,
        };
    }

    match validate(&AllocationCandidate::new(day, request.fte), policy) {
        Ok(()) => {}
        Err(reason @ ValidationErrorReason::NonWorkingDay { .. }) => {
            debug!("Skipping {}: {}", day, reason);
            return DayResult {
                date: day,
                outcome: DayOutcome::Skipped(reason),
            };
        }
        Err(reason) => {
            warn!("Rejecting {} for User={}: {}", day, request.user_key, reason);
            return DayResult {
                date: day,
                outcome: DayOutcome::Failed(AllocationError::Validation(reason)),
            };
        }
    }

    let key = request.key_for(day);
    let _guard = options.locks.lock(&key).await;
    if options.cancel.is_cancelled() {
        return DayResult {
            date: day,
            outcome: DayOutcome::NotAttempted,
        };
    }

    let outcome = match upsert_day(request, day, repo).await {
        Ok(outcome) => {
            debug!("{} -> {:?}", key, outcome);
            outcome
        }
        Err(e) => {
            error!("Write failed for {}: {}", key, e);
            DayOutcome::Failed(e)
        }
    };
    DayResult { date: day, outcome }
}

/// Read-then-write for one key. Callers hold the key's lock.
async fn upsert_day<R>(request: &AssignmentRequest, day: NaiveDate, repo: &R) -> Result<DayOutcome>
where
    R: AllocationRepository + ?Sized,
{
    let existing = repo
        .find(&request.user_key, &request.project_key, day)
        .await?;
    match existing {
        Some(existing) if existing.fte == request.fte => Ok(DayOutcome::Unchanged),
        Some(existing) => {
            let mut row = request.allocation_for(day);
            row.id = existing.id.clone();
            repo.upsert(row).await?;
            Ok(DayOutcome::Updated {
                previous_fte: existing.fte,
            })
        }
        // Zero FTE means "no allocation", which is already the state
        None if request.fte.is_zero() => Ok(DayOutcome::Unchanged),
        None => {
            repo.upsert(request.allocation_for(day)).await?;
            Ok(DayOutcome::Created)
        }
    }
}
