// src/allocation_service.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregation::{aggregate_by_user_project_day, day_grid};
use crate::calendar::{WeekendPolicy, WorkingDayPolicy};
use crate::errors::{AllocationError, Result};
use crate::models::{
    Allocation, AllocationFilter, DateRange, DayTotal, ProjectKey, Range, UserKey,
    UtilizationRecord,
};
use crate::ports::{ActualTimeSource, AllocationRepository, ProjectDirectory, UserDirectory};
use crate::range_compression::{compress_cells, ContiguityPolicy};
use crate::range_expander::{
    expand_days, expand_with, AssignmentRequest, CancelSignal, DayOutcome, ExpandOptions,
    ExpandReport, KeyedLocks,
};
use crate::utilization::{analyze, collect_actual_hours};

/// How listed ranges treat non-working days between two rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RangeContiguity {
    /// Friday followed by Monday continues a range.
    #[default]
    WorkingDays,
    /// Any missing calendar day ends a range.
    CalendarDays,
}

/// Compressed ranges of one user on one project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRanges {
    pub user_key: UserKey,
    pub project_key: ProjectKey,
    pub project_name: String,
    pub ranges: Vec<Range>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowDeletion {
    pub allocation: Allocation,
    pub result: std::result::Result<(), AllocationError>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteReport {
    pub rows: Vec<RowDeletion>,
}

impl DeleteReport {
    pub fn deleted(&self) -> usize {
        self.rows.iter().filter(|row| row.result.is_ok()).count()
    }

    pub fn failed(&self) -> Vec<&RowDeletion> {
        self.rows.iter().filter(|row| row.result.is_err()).collect()
    }
}

/// Entry point for planners: writes go through the range expander with one
/// shared set of per-key locks, reads come back aggregated or compressed.
#[derive(Clone)]
pub struct AllocationService {
    repo: Arc<dyn AllocationRepository>,
    policy: Arc<dyn WorkingDayPolicy>,
    projects: Option<Arc<dyn ProjectDirectory>>,
    locks: KeyedLocks,
    concurrency: usize,
    contiguity: RangeContiguity,
}

impl AllocationService {
    pub fn new(repo: Arc<dyn AllocationRepository>) -> Self {
        Self {
            repo,
            policy: Arc::new(WeekendPolicy::default()),
            projects: None,
            locks: KeyedLocks::new(),
            concurrency: 1,
            contiguity: RangeContiguity::default(),
        }
    }

    pub fn policy(mut self, policy: Arc<dyn WorkingDayPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Project names in listed ranges are taken from this directory when set.
    pub fn projects(mut self, projects: Arc<dyn ProjectDirectory>) -> Self {
        self.projects = Some(projects);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn contiguity(mut self, contiguity: RangeContiguity) -> Self {
        self.contiguity = contiguity;
        self
    }

    fn expand_options(&self) -> ExpandOptions {
        ExpandOptions::default()
            .concurrency(self.concurrency)
            .locks(self.locks.clone())
    }

    fn contiguity_policy(&self) -> ContiguityPolicy<'_> {
        match self.contiguity {
            RangeContiguity::WorkingDays => ContiguityPolicy::WorkingDays(self.policy.as_ref()),
            RangeContiguity::CalendarDays => ContiguityPolicy::CalendarDays,
        }
    }

    // --- Writes ---

    pub async fn assign_range(&self, request: &AssignmentRequest) -> Result<ExpandReport> {
        expand_with(
            request,
            self.policy.as_ref(),
            self.repo.as_ref(),
            &self.expand_options(),
        )
        .await
    }

    /// Like `assign_range`, but stops starting new days once `cancel` is raised.
    pub async fn assign_range_cancellable(
        &self,
        request: &AssignmentRequest,
        cancel: CancelSignal,
    ) -> Result<ExpandReport> {
        let options = self.expand_options().cancel(cancel);
        expand_with(request, self.policy.as_ref(), self.repo.as_ref(), &options).await
    }

    /// Re-applies `request` to the failed and not-attempted days of `previous`.
    pub async fn retry(&self, request: &AssignmentRequest, previous: &ExpandReport) -> ExpandReport {
        let days = previous.retryable_days();
        info!(
            "Retrying {} days for User={}, Project={}",
            days.len(),
            request.user_key,
            request.project_key
        );
        expand_days(
            request,
            &days,
            self.policy.as_ref(),
            self.repo.as_ref(),
            &self.expand_options(),
        )
        .await
    }

    /// Single cell edit. A zero FTE removes the existing row.
    ///
    /// Unlike a range request, a rejected day is an error here.
    pub async fn assign_day(
        &self,
        user_key: &str,
        project_key: &str,
        date: NaiveDate,
        fte: Decimal,
    ) -> Result<DayOutcome> {
        let request = AssignmentRequest::single_day(user_key, project_key, fte, date);
        self.write_day(&request).await
    }

    /// `assign_day` with display labels carried onto the row. Only
    /// `request.start` is written.
    pub async fn write_day(&self, request: &AssignmentRequest) -> Result<DayOutcome> {
        let report = expand_days(
            request,
            &[request.start],
            self.policy.as_ref(),
            self.repo.as_ref(),
            &self.expand_options(),
        )
        .await;
        let outcome = report
            .days
            .into_iter()
            .next()
            .map(|day| day.outcome)
            .unwrap_or(DayOutcome::NotAttempted);

        match outcome {
            DayOutcome::Skipped(reason) => Err(AllocationError::Validation(reason)),
            DayOutcome::Failed(e) => Err(e),
            DayOutcome::Updated { .. } if request.fte.is_zero() => {
                info!(
                    "Removed allocation User={}, Project={}, Date={}",
                    request.user_key, request.project_key, request.start
                );
                Ok(DayOutcome::Deleted)
            }
            outcome => Ok(outcome),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.repo.delete_by_id(id).await?;
        info!("Deleted allocation {}", id);
        Ok(())
    }

    /// Deletes every row of `user` on `project` between `start` and `end`.
    /// Each row is reported on its own; one failure does not stop the rest.
    pub async fn delete_range(
        &self,
        user_key: &str,
        project_key: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DeleteReport> {
        let period = DateRange::new(start, end)?;
        let filter = AllocationFilter::period(period)
            .user(user_key)
            .project(project_key);
        let rows = self.repo.query(&filter).await?;

        let mut report = DeleteReport::default();
        for allocation in rows {
            let _guard = self.locks.lock(&allocation.key()).await;
            let result = match allocation.id.as_deref() {
                Some(id) => self.repo.delete_by_id(id).await,
                None => Err(AllocationError::RepositoryFailure(format!(
                    "row {} has no id",
                    allocation.key()
                ))),
            };
            if let Err(e) = &result {
                warn!("Could not delete {}: {}", allocation.key(), e);
            }
            report.rows.push(RowDeletion { allocation, result });
        }
        self.locks.prune();

        info!(
            "Deleted {} of {} allocations for User={}, Project={} between {} and {}",
            report.deleted(),
            report.rows.len(),
            user_key,
            project_key,
            start,
            end
        );
        Ok(report)
    }

    // --- Reads ---

    pub async fn list_ranges(&self, filter: &AllocationFilter) -> Result<Vec<ProjectRanges>> {
        let rows = self.repo.query(filter).await?;

        let mut names: HashMap<ProjectKey, String> = rows
            .iter()
            .map(|row| (row.project_key.clone(), row.project_name.clone()))
            .collect();
        if let Some(projects) = &self.projects {
            for project in projects.list_projects().await? {
                names.insert(project.key, project.name);
            }
        }

        let cells = aggregate_by_user_project_day(&rows);
        let compressed = compress_cells(&cells, self.contiguity_policy());
        Ok(compressed
            .into_iter()
            .map(|((user_key, project_key), ranges)| ProjectRanges {
                project_name: names
                    .get(&project_key)
                    .cloned()
                    .unwrap_or_else(|| project_key.clone()),
                user_key,
                project_key,
                ranges,
            })
            .collect())
    }

    /// One `DayTotal` per active user per working day of the filter's period.
    pub async fn calendar(
        &self,
        filter: &AllocationFilter,
        users: &dyn UserDirectory,
    ) -> Result<Vec<DayTotal>> {
        let user_keys: Vec<UserKey> = users
            .list_users()
            .await?
            .into_iter()
            .filter(|user| user.active)
            .filter(|user| filter.user_key.as_ref().map_or(true, |key| key == &user.key))
            .map(|user| user.key)
            .collect();
        let rows = self.repo.query(filter).await?;
        Ok(day_grid(&rows, &user_keys, filter.period, self.policy.as_ref()))
    }

    /// Planned capacity against logged hours for active users and anyone
    /// with allocations in the period.
    pub async fn utilization(
        &self,
        period: DateRange,
        users: &dyn UserDirectory,
        time_source: &dyn ActualTimeSource,
        hours_per_fte_day: Decimal,
    ) -> Result<Vec<UtilizationRecord>> {
        let rows = self.repo.query(&AllocationFilter::period(period)).await?;

        let mut user_keys: BTreeSet<UserKey> = users
            .list_users()
            .await?
            .into_iter()
            .filter(|user| user.active)
            .map(|user| user.key)
            .collect();
        user_keys.extend(rows.iter().map(|row| row.user_key.clone()));
        let user_keys: Vec<UserKey> = user_keys.into_iter().collect();

        let hours = collect_actual_hours(time_source, &user_keys, period).await?;
        analyze(&rows, &hours, hours_per_fte_day, period)
    }
}
