//! Per-owner summary counts.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use taskpulse_core::{
    normalize_priority_counts, Result, TaskPredicate, TaskReport, TaskRepository,
};

/// Runs the three report queries concurrently.
#[derive(Clone)]
pub struct ReportAggregator {
    tasks: Arc<dyn TaskRepository>,
}

impl ReportAggregator {
    pub fn new(tasks: Arc<dyn TaskRepository>) -> Self {
        Self { tasks }
    }

    /// Completed and pending counts plus non-empty priority groups.
    ///
    /// Any failing query fails the whole report.
    pub async fn report(&self, owner_id: Uuid) -> Result<TaskReport> {
        let start = Instant::now();
        let (completed_count, pending_count, groups) = tokio::try_join!(
            self.tasks.count_by_owner(owner_id, TaskPredicate::Completed),
            self.tasks.count_by_owner(owner_id, TaskPredicate::Pending),
            self.tasks.group_count_by_priority(owner_id),
        )?;

        tracing::debug!(
            subsystem = "api",
            component = "report",
            owner_id = %owner_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Report aggregated"
        );

        Ok(TaskReport {
            completed_count,
            pending_count,
            counts_by_priority: normalize_priority_counts(groups),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use taskpulse_core::{
        Error, NewTask, Priority, PriorityCount, Task, TaskFilter, TaskStatus, UpdateTaskRequest,
    };
    use taskpulse_db::MemoryStore;

    #[tokio::test]
    async fn test_report_counts() {
        let store = MemoryStore::new();
        let owner = Uuid::now_v7();
        let rows = [
            (TaskStatus::Done, Priority::High),
            (TaskStatus::Done, Priority::Low),
            (TaskStatus::Todo, Priority::High),
            (TaskStatus::InProgress, Priority::High),
            (TaskStatus::Todo, Priority::Low),
        ];
        for (status, priority) in rows {
            store
                .tasks
                .insert(NewTask {
                    owner_id: owner,
                    title: "t".into(),
                    description: String::new(),
                    priority,
                    status,
                    due_date: None,
                })
                .await
                .unwrap();
        }

        let report = ReportAggregator::new(store.tasks.clone())
            .report(owner)
            .await
            .unwrap();
        assert_eq!(report.completed_count, 2);
        assert_eq!(report.pending_count, 3);
        assert_eq!(
            report.counts_by_priority,
            vec![
                PriorityCount {
                    priority: Priority::High,
                    count: 3
                },
                PriorityCount {
                    priority: Priority::Low,
                    count: 2
                },
            ]
        );
    }

    /// Counts work, grouping fails.
    struct BrokenGrouping(MemoryStore);

    #[async_trait]
    impl TaskRepository for BrokenGrouping {
        async fn insert(&self, task: NewTask) -> Result<Task> {
            self.0.tasks.insert(task).await
        }
        async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Task>> {
            self.0.tasks.get(owner_id, id).await
        }
        async fn get_any(&self, id: Uuid) -> Result<Option<Task>> {
            self.0.tasks.get_any(id).await
        }
        async fn update(
            &self,
            owner_id: Uuid,
            id: Uuid,
            update: &UpdateTaskRequest,
        ) -> Result<Option<Task>> {
            self.0.tasks.update(owner_id, id, update).await
        }
        async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
            self.0.tasks.delete(owner_id, id).await
        }
        async fn query_by_owner(&self, owner_id: Uuid, filter: &TaskFilter) -> Result<Vec<Task>> {
            self.0.tasks.query_by_owner(owner_id, filter).await
        }
        async fn count_by_owner(&self, owner_id: Uuid, predicate: TaskPredicate) -> Result<i64> {
            self.0.tasks.count_by_owner(owner_id, predicate).await
        }
        async fn group_count_by_priority(&self, _: Uuid) -> Result<Vec<PriorityCount>> {
            Err(Error::Store("group query failed".into()))
        }
        async fn due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Task>> {
            self.0.tasks.due_between(from, to).await
        }
    }

    #[tokio::test]
    async fn test_any_failing_query_fails_report() {
        let aggregator = ReportAggregator::new(Arc::new(BrokenGrouping(MemoryStore::new())));
        let err = aggregator.report(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[tokio::test]
    async fn test_empty_owner_report() {
        let store = MemoryStore::new();
        let report = ReportAggregator::new(store.tasks.clone())
            .report(Uuid::now_v7())
            .await
            .unwrap();
        assert_eq!(report.completed_count, 0);
        assert_eq!(report.pending_count, 0);
        assert!(report.counts_by_priority.is_empty());
    }
}
