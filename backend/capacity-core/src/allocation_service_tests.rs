// src/allocation_service_tests.rs

#[cfg(test)]
mod tests {
    use crate::allocation_service::*;
    use crate::errors::{AllocationError, Result, ValidationErrorReason};
    use crate::in_memory::{
        InMemoryAllocationRepository, StaticProjectDirectory, StaticTimeSource,
        StaticUserDirectory,
    };
    use crate::models::{
        Allocation, AllocationFilter, Classification, DateRange, ProjectInfo, Range, UserInfo,
    };
    use crate::ports::AllocationRepository;
    use crate::range_expander::{AssignmentRequest, DayOutcome};
    use crate::utilization::DEFAULT_HOURS_PER_FTE_DAY;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn user(key: &str, active: bool) -> UserInfo {
        UserInfo {
            key: key.to_string(),
            display_name: key.to_string(),
            active,
        }
    }

    fn alice_week(fte: rust_decimal::Decimal) -> Vec<Allocation> {
        ["2024-01-01", "2024-01-02", "2024-01-03", "2024-01-04", "2024-01-05"]
            .iter()
            .map(|date| Allocation::new("alice@x.com", "ENG", d(date), fte))
            .collect()
    }

    fn service_over(repo: &InMemoryAllocationRepository) -> AllocationService {
        AllocationService::new(Arc::new(repo.clone()))
    }

    // Fails writes on the listed dates, once each
    struct FailOnceRepository {
        inner: InMemoryAllocationRepository,
        failing_dates: Mutex<HashSet<NaiveDate>>,
    }

    // Refuses to delete the listed ids
    struct StickyRowsRepository {
        inner: InMemoryAllocationRepository,
        sticky_ids: HashSet<String>,
    }

    #[async_trait]
    impl AllocationRepository for FailOnceRepository {
        async fn find(
            &self,
            user_key: &str,
            project_key: &str,
            date: NaiveDate,
        ) -> Result<Option<Allocation>> {
            self.inner.find(user_key, project_key, date).await
        }

        async fn upsert(&self, allocation: Allocation) -> Result<Allocation> {
            let should_fail = self.failing_dates.lock().unwrap().remove(&allocation.date);
            if should_fail {
                return Err(AllocationError::RepositoryFailure("connection reset".into()));
            }
            self.inner.upsert(allocation).await
        }

        async fn delete_by_id(&self, id: &str) -> Result<()> {
            self.inner.delete_by_id(id).await
        }

        async fn query(&self, filter: &AllocationFilter) -> Result<Vec<Allocation>> {
            self.inner.query(filter).await
        }
    }

    #[async_trait]
    impl AllocationRepository for StickyRowsRepository {
        async fn find(
            &self,
            user_key: &str,
            project_key: &str,
            date: NaiveDate,
        ) -> Result<Option<Allocation>> {
            self.inner.find(user_key, project_key, date).await
        }

        async fn upsert(&self, allocation: Allocation) -> Result<Allocation> {
            self.inner.upsert(allocation).await
        }

        async fn delete_by_id(&self, id: &str) -> Result<()> {
            if self.sticky_ids.contains(id) {
                return Err(AllocationError::RepositoryFailure(format!("{} is locked", id)));
            }
            self.inner.delete_by_id(id).await
        }

        async fn query(&self, filter: &AllocationFilter) -> Result<Vec<Allocation>> {
            self.inner.query(filter).await
        }
    }

    // --- Single-day writes ---

    #[tokio::test]
    async fn cell_edit_lifecycle() {
        let repo = InMemoryAllocationRepository::new();
        let service = service_over(&repo);
        let tuesday = d("2024-01-02");

        let created = service.assign_day("alice@x.com", "ENG", tuesday, dec!(0.5)).await;
        assert_eq!(created, Ok(DayOutcome::Created));

        let updated = service.assign_day("alice@x.com", "ENG", tuesday, dec!(0.75)).await;
        assert_eq!(
            updated,
            Ok(DayOutcome::Updated {
                previous_fte: dec!(0.5)
            })
        );

        let same = service.assign_day("alice@x.com", "ENG", tuesday, dec!(0.75)).await;
        assert_eq!(same, Ok(DayOutcome::Unchanged));

        let deleted = service.assign_day("alice@x.com", "ENG", tuesday, dec!(0)).await;
        assert_eq!(deleted, Ok(DayOutcome::Deleted));
        assert!(repo.is_empty());

        let nothing_left = service.assign_day("alice@x.com", "ENG", tuesday, dec!(0)).await;
        assert_eq!(nothing_left, Ok(DayOutcome::Unchanged));
    }

    #[tokio::test]
    async fn cell_edit_rejects_weekend_and_bad_fte() {
        let repo = InMemoryAllocationRepository::new();
        let service = service_over(&repo);

        let saturday = service
            .assign_day("alice@x.com", "ENG", d("2024-01-06"), dec!(0.5))
            .await;
        assert_eq!(
            saturday,
            Err(AllocationError::Validation(ValidationErrorReason::NonWorkingDay {
                date: d("2024-01-06")
            }))
        );

        let too_much = service
            .assign_day("alice@x.com", "ENG", d("2024-01-02"), dec!(1.5))
            .await;
        assert_eq!(
            too_much,
            Err(AllocationError::Validation(
                ValidationErrorReason::out_of_range(dec!(1.5))
            ))
        );
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn write_day_keeps_display_labels() {
        let repo = InMemoryAllocationRepository::new();
        let service = service_over(&repo);
        let request = AssignmentRequest::single_day("alice@x.com", "ENG", dec!(1), d("2024-01-02"))
            .user_display_name("Alice")
            .project_name("Engine");

        service.write_day(&request).await.unwrap();

        let row = repo.snapshot().unwrap().remove(0);
        assert_eq!(row.user_display_name, "Alice");
        assert_eq!(row.project_name, "Engine");
    }

    // --- Deletion ---

    #[tokio::test]
    async fn delete_by_id_then_not_found() {
        let repo = InMemoryAllocationRepository::seeded(alice_week(dec!(1))).unwrap();
        let service = service_over(&repo);
        let id = repo.snapshot().unwrap()[0].id.clone().unwrap();

        service.delete(&id).await.unwrap();
        assert_eq!(repo.len(), 4);

        assert_eq!(
            service.delete(&id).await,
            Err(AllocationError::NotFound { id: id.clone() })
        );
    }

    #[tokio::test]
    async fn delete_range_only_touches_the_requested_rows() {
        let mut rows = alice_week(dec!(1));
        rows.push(Allocation::new("alice@x.com", "OPS", d("2024-01-03"), dec!(0.5)));
        rows.push(Allocation::new("bob@x.com", "ENG", d("2024-01-03"), dec!(1)));
        let repo = InMemoryAllocationRepository::seeded(rows).unwrap();
        let service = service_over(&repo);

        let report = service
            .delete_range("alice@x.com", "ENG", d("2024-01-02"), d("2024-01-04"))
            .await
            .unwrap();

        assert_eq!(report.deleted(), 3);
        assert!(report.failed().is_empty());
        let remaining = repo.snapshot().unwrap();
        assert_eq!(remaining.len(), 4);
        assert!(remaining
            .iter()
            .filter(|row| row.user_key == "alice@x.com" && row.project_key == "ENG")
            .all(|row| row.date == d("2024-01-01") || row.date == d("2024-01-05")));
    }

    #[tokio::test]
    async fn delete_range_rejects_reversed_range() {
        let repo = InMemoryAllocationRepository::new();
        let service = service_over(&repo);
        let result = service
            .delete_range("alice@x.com", "ENG", d("2024-01-05"), d("2024-01-01"))
            .await;
        assert_eq!(
            result,
            Err(AllocationError::InvalidRange {
                start: d("2024-01-05"),
                end: d("2024-01-01")
            })
        );
    }

    #[tokio::test]
    async fn delete_range_reports_each_failed_row() {
        let inner = InMemoryAllocationRepository::seeded(alice_week(dec!(1))).unwrap();
        let wednesday_id = inner
            .snapshot()
            .unwrap()
            .into_iter()
            .find(|row| row.date == d("2024-01-03"))
            .and_then(|row| row.id)
            .unwrap();
        let repo = StickyRowsRepository {
            inner: inner.clone(),
            sticky_ids: HashSet::from([wednesday_id.clone()]),
        };
        let service = AllocationService::new(Arc::new(repo));

        let report = service
            .delete_range("alice@x.com", "ENG", d("2024-01-01"), d("2024-01-05"))
            .await
            .unwrap();

        assert_eq!(report.rows.len(), 5);
        assert_eq!(report.deleted(), 4);
        let failed = report.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].allocation.id.as_deref(), Some(wednesday_id.as_str()));
        assert_eq!(inner.len(), 1);
    }

    // --- Range writes ---

    #[tokio::test]
    async fn retry_only_touches_failed_days() {
        let inner = InMemoryAllocationRepository::new();
        let repo = FailOnceRepository {
            inner: inner.clone(),
            failing_dates: Mutex::new(HashSet::from([d("2024-01-03")])),
        };
        let service = AllocationService::new(Arc::new(repo));
        let request =
            AssignmentRequest::new("alice@x.com", "ENG", dec!(1), d("2024-01-01"), d("2024-01-05"));

        let first = service.assign_range(&request).await.unwrap();
        assert_eq!(first.created(), 4);
        assert_eq!(first.retryable_days(), vec![d("2024-01-03")]);

        let second = service.retry(&request, &first).await;
        assert_eq!(second.days.len(), 1);
        assert_eq!(second.created(), 1);
        assert!(second.is_complete());
        assert_eq!(inner.len(), 5);
    }

    #[tokio::test]
    async fn concurrent_requests_through_cloned_services_share_key_locks() {
        let repo = InMemoryAllocationRepository::new();
        let service = service_over(&repo).concurrency(4);
        let other = service.clone();
        let request =
            AssignmentRequest::new("alice@x.com", "ENG", dec!(0.5), d("2024-01-01"), d("2024-01-12"));

        let (a, b) = tokio::join!(service.assign_range(&request), other.assign_range(&request));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.created() + b.created(), 10);
        assert_eq!(a.updated() + b.updated(), 0);
        assert_eq!(repo.len(), 10);
    }

    // --- Reads ---

    #[tokio::test]
    async fn list_ranges_bridges_weekends_by_default() {
        let mut rows = alice_week(dec!(1));
        rows.push(Allocation::new("alice@x.com", "ENG", d("2024-01-08"), dec!(1)));
        rows.push(Allocation::new("alice@x.com", "ENG", d("2024-01-09"), dec!(1)));
        rows.push(Allocation::new("alice@x.com", "OPS", d("2024-01-03"), dec!(0.5)));
        let repo = InMemoryAllocationRepository::seeded(rows).unwrap();
        let january = DateRange::new(d("2024-01-01"), d("2024-01-31")).unwrap();
        let filter = AllocationFilter::period(january).user("alice@x.com");

        let working = service_over(&repo).list_ranges(&filter).await.unwrap();
        assert_eq!(working.len(), 2);
        assert_eq!(working[0].project_key, "ENG");
        assert_eq!(
            working[0].ranges,
            vec![Range {
                start_date: d("2024-01-01"),
                end_date: d("2024-01-09"),
                fte: dec!(1)
            }]
        );
        assert_eq!(working[1].ranges, vec![Range::single(d("2024-01-03"), dec!(0.5))]);

        let calendar = service_over(&repo)
            .contiguity(RangeContiguity::CalendarDays)
            .list_ranges(&filter)
            .await
            .unwrap();
        assert_eq!(calendar[0].ranges.len(), 2);
    }

    #[tokio::test]
    async fn list_ranges_takes_names_from_project_directory() {
        let repo = InMemoryAllocationRepository::seeded(alice_week(dec!(1))).unwrap();
        let projects = StaticProjectDirectory::new(vec![ProjectInfo {
            key: "ENG".to_string(),
            name: "Engineering".to_string(),
        }]);
        let service = service_over(&repo).projects(Arc::new(projects));
        let january = DateRange::new(d("2024-01-01"), d("2024-01-31")).unwrap();

        let ranges = service
            .list_ranges(&AllocationFilter::period(january))
            .await
            .unwrap();

        assert_eq!(ranges[0].project_name, "Engineering");
    }

    #[tokio::test]
    async fn calendar_covers_active_users_on_working_days() {
        let mut rows = alice_week(dec!(1));
        rows.push(Allocation::new("alice@x.com", "OPS", d("2024-01-03"), dec!(0.5)));
        rows.push(Allocation::new("carol@x.com", "ENG", d("2024-01-03"), dec!(1)));
        let repo = InMemoryAllocationRepository::seeded(rows).unwrap();
        let users = StaticUserDirectory::new(vec![
            user("alice@x.com", true),
            user("bob@x.com", true),
            user("carol@x.com", false),
        ]);
        let week = DateRange::new(d("2024-01-01"), d("2024-01-07")).unwrap();

        let grid = service_over(&repo)
            .calendar(&AllocationFilter::period(week), &users)
            .await
            .unwrap();

        assert_eq!(grid.len(), 10);
        assert!(grid.iter().all(|day| day.user_key != "carol@x.com"));
        let overloaded: Vec<_> = grid
            .iter()
            .filter(|day| day.classification == Classification::Overloaded)
            .collect();
        assert_eq!(overloaded.len(), 1);
        assert_eq!(overloaded[0].date, d("2024-01-03"));
        assert_eq!(
            grid.iter()
                .filter(|day| day.user_key == "bob@x.com")
                .filter(|day| day.classification == Classification::Empty)
                .count(),
            5
        );
    }

    #[tokio::test]
    async fn calendar_respects_user_filter() {
        let repo = InMemoryAllocationRepository::seeded(alice_week(dec!(1))).unwrap();
        let users = StaticUserDirectory::new(vec![user("alice@x.com", true), user("bob@x.com", true)]);
        let week = DateRange::new(d("2024-01-01"), d("2024-01-07")).unwrap();

        let grid = service_over(&repo)
            .calendar(&AllocationFilter::period(week).user("bob@x.com"), &users)
            .await
            .unwrap();

        assert_eq!(grid.len(), 5);
        assert!(grid.iter().all(|day| day.total_fte.is_zero()));
    }

    #[tokio::test]
    async fn utilization_combines_directory_rows_and_logged_hours() {
        let repo = InMemoryAllocationRepository::seeded(alice_week(dec!(0.5))).unwrap();
        let users = StaticUserDirectory::new(vec![user("bob@x.com", true)]);
        let mut hours = StaticTimeSource::new();
        hours.record("alice@x.com", d("2024-01-02"), dec!(4));
        hours.record("alice@x.com", d("2024-01-03"), dec!(2));
        hours.record("bob@x.com", d("2024-01-04"), dec!(6));
        let week = DateRange::new(d("2024-01-01"), d("2024-01-07")).unwrap();

        let records = service_over(&repo)
            .utilization(week, &users, &hours, DEFAULT_HOURS_PER_FTE_DAY)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        let alice = &records[0];
        assert_eq!(alice.user_key, "alice@x.com");
        assert_eq!(alice.total_capacity_hours, dec!(20));
        assert_eq!(alice.total_hours_spent, dec!(6));
        assert_eq!(alice.utilization_percent, dec!(30));
        let bob = &records[1];
        assert_eq!(bob.utilization_percent, dec!(0));
        assert_eq!(bob.unplanned_days(), vec![d("2024-01-04")]);
    }
}
