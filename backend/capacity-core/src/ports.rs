// src/ports.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::errors::Result;
use crate::models::{Allocation, AllocationFilter, DateRange, ProjectInfo, UserInfo};

/// Keyed allocation store.
///
/// Implementations must give a single caller read-your-writes consistency.
/// An `upsert` carrying `fte == 0` removes the row for that key instead of
/// storing a zero.
#[async_trait]
pub trait AllocationRepository: Send + Sync {
    async fn find(
        &self,
        user_key: &str,
        project_key: &str,
        date: NaiveDate,
    ) -> Result<Option<Allocation>>;

    /// Inserts or replaces the row for the allocation's (user, project, date)
    /// key and returns the stored row with its id.
    async fn upsert(&self, allocation: Allocation) -> Result<Allocation>;

    /// Fails with `NotFound` if no row has this id.
    async fn delete_by_id(&self, id: &str) -> Result<()>;

    async fn query(&self, filter: &AllocationFilter) -> Result<Vec<Allocation>>;
}

#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<ProjectInfo>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserInfo>>;
}

/// Hours actually logged, e.g. by a time-tracking integration.
#[async_trait]
pub trait ActualTimeSource: Send + Sync {
    async fn hours_spent(
        &self,
        user_key: &str,
        period: DateRange,
    ) -> Result<BTreeMap<NaiveDate, Decimal>>;
}
