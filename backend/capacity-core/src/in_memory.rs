// src/in_memory.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tracing::debug;

use crate::errors::{AllocationError, Result};
use crate::models::{
    Allocation, AllocationFilter, AllocationKey, DateRange, ProjectInfo, UserInfo, UserKey,
};
use crate::ports::{ActualTimeSource, AllocationRepository, ProjectDirectory, UserDirectory};

const ID_PREFIX: &str = "alloc-";

// --- Allocation Store ---

/// Allocation rows held in process memory, keyed by (user, project, date).
#[derive(Clone, Default)]
pub struct InMemoryAllocationRepository {
    rows: Arc<Mutex<HashMap<AllocationKey, Allocation>>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryAllocationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads rows as-is. Rows without an id get one; a later row for the
    /// same key replaces an earlier one.
    pub fn seeded(rows: impl IntoIterator<Item = Allocation>) -> Result<Self> {
        let repo = Self::new();
        let rows: Vec<Allocation> = rows.into_iter().filter(|row| !row.fte.is_zero()).collect();

        // Keep generated ids ahead of any imported ones
        let highest_imported = rows
            .iter()
            .filter_map(|row| row.id.as_deref())
            .filter_map(|id| id.strip_prefix(ID_PREFIX))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        repo.next_id.store(highest_imported, Ordering::SeqCst);

        {
            let mut guard = repo.lock_rows()?;
            for mut row in rows {
                if row.id.is_none() {
                    row.id = Some(repo.allocate_id());
                }
                guard.insert(row.key(), row);
            }
        }
        Ok(repo)
    }

    pub fn snapshot(&self) -> Result<Vec<Allocation>> {
        let guard = self.lock_rows()?;
        let mut rows: Vec<Allocation> = guard.values().cloned().collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }

    pub fn len(&self) -> usize {
        self.lock_rows().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_rows(&self) -> Result<MutexGuard<'_, HashMap<AllocationKey, Allocation>>> {
        self.rows
            .lock()
            .map_err(|_| AllocationError::RepositoryFailure("allocation store lock poisoned".into()))
    }

    fn allocate_id(&self) -> String {
        format!("{}{}", ID_PREFIX, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl AllocationRepository for InMemoryAllocationRepository {
    async fn find(
        &self,
        user_key: &str,
        project_key: &str,
        date: NaiveDate,
    ) -> Result<Option<Allocation>> {
        let key = AllocationKey {
            user_key: user_key.to_string(),
            project_key: project_key.to_string(),
            date,
        };
        Ok(self.lock_rows()?.get(&key).cloned())
    }

    async fn upsert(&self, mut allocation: Allocation) -> Result<Allocation> {
        let key = allocation.key();
        let mut guard = self.lock_rows()?;

        if allocation.fte.is_zero() {
            if let Some(removed) = guard.remove(&key) {
                debug!("Zero FTE write removed allocation {:?} for {}", removed.id, key);
            }
            allocation.id = None;
            return Ok(allocation);
        }

        allocation.id = match guard.get(&key).and_then(|existing| existing.id.clone()) {
            Some(existing_id) => Some(existing_id),
            None => Some(self.allocate_id()),
        };
        guard.insert(key, allocation.clone());
        Ok(allocation)
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        let mut guard = self.lock_rows()?;
        let key = guard
            .iter()
            .find(|(_, row)| row.id.as_deref() == Some(id))
            .map(|(key, _)| key.clone())
            .ok_or_else(|| AllocationError::NotFound { id: id.to_string() })?;
        guard.remove(&key);
        Ok(())
    }

    async fn query(&self, filter: &AllocationFilter) -> Result<Vec<Allocation>> {
        let guard = self.lock_rows()?;
        let mut rows: Vec<Allocation> = guard
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(rows)
    }
}

// --- Static Directories ---

#[derive(Debug, Clone, Default)]
pub struct StaticProjectDirectory {
    projects: Vec<ProjectInfo>,
}

impl StaticProjectDirectory {
    pub fn new(projects: Vec<ProjectInfo>) -> Self {
        Self { projects }
    }
}

#[async_trait]
impl ProjectDirectory for StaticProjectDirectory {
    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        Ok(self.projects.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: Vec<UserInfo>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<UserInfo>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn list_users(&self) -> Result<Vec<UserInfo>> {
        Ok(self.users.clone())
    }
}

/// Logged hours keyed by (user, date); several entries for the same day add up.
#[derive(Debug, Clone, Default)]
pub struct StaticTimeSource {
    hours: HashMap<(UserKey, NaiveDate), Decimal>,
}

impl StaticTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, user_key: &str, date: NaiveDate, hours: Decimal) {
        *self
            .hours
            .entry((user_key.to_string(), date))
            .or_insert(Decimal::ZERO) += hours;
    }
}

impl From<HashMap<(UserKey, NaiveDate), Decimal>> for StaticTimeSource {
    fn from(hours: HashMap<(UserKey, NaiveDate), Decimal>) -> Self {
        Self { hours }
    }
}

#[async_trait]
impl ActualTimeSource for StaticTimeSource {
    async fn hours_spent(
        &self,
        user_key: &str,
        period: DateRange,
    ) -> Result<BTreeMap<NaiveDate, Decimal>> {
        Ok(self
            .hours
            .iter()
            .filter(|((user, date), _)| user == user_key && period.contains(*date))
            .map(|((_, date), hours)| (*date, *hours))
            .collect())
    }
}
