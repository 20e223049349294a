// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Event sink and task store.
//!
//! The sink persists every step a task reports and derives the task's terminal
//! status from it:
//!
//! | Event | Task row |
//! |-------|----------|
//! | `CreateCluster` / `InstallKubernetes` = success | create task → `complete` |
//! | `InitRainbondRegion` = success | init task → `inited` |
//! | `UpdateKubernetes` = success | update task → `complete` |
//! | any step = failure | create, init and update task → `complete` |
//!
//! Task ids are unique across kinds, so a failure only ever touches the one
//! row that carries the id. An event dropped because its step already
//! succeeded changes nothing.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{EventMessage, EventWrite, StepStatus, TaskKind, TaskStatus};
use crate::persistence::{Persistence, TaskEventRecord, TaskTransition};
use crate::steps;

/// Task-row updates implied by one event.
pub fn transitions_for(step_type: &str, status: StepStatus) -> Vec<TaskTransition> {
    match (step_type, status) {
        (_, StepStatus::Failure) => vec![
            TaskTransition {
                kind: TaskKind::CreateKubernetes,
                status: TaskStatus::Complete,
            },
            TaskTransition {
                kind: TaskKind::InitRainbond,
                status: TaskStatus::Complete,
            },
            TaskTransition {
                kind: TaskKind::UpdateKubernetes,
                status: TaskStatus::Complete,
            },
        ],
        (steps::CREATE_CLUSTER | steps::INSTALL_KUBERNETES, StepStatus::Success) => {
            vec![TaskTransition {
                kind: TaskKind::CreateKubernetes,
                status: TaskStatus::Complete,
            }]
        }
        (steps::INIT_REGION, StepStatus::Success) => vec![TaskTransition {
            kind: TaskKind::InitRainbond,
            status: TaskStatus::Inited,
        }],
        (steps::UPDATE_KUBERNETES, StepStatus::Success) => vec![TaskTransition {
            kind: TaskKind::UpdateKubernetes,
            status: TaskStatus::Complete,
        }],
        _ => Vec::new(),
    }
}

/// Persists task events and keeps task rows in step with them.
#[derive(Clone)]
pub struct EventSink {
    persistence: Arc<dyn Persistence>,
}

impl EventSink {
    /// Create a sink over the given store.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Record one event; a single transaction.
    pub async fn record(&self, event: &EventMessage) -> Result<EventWrite> {
        let transitions = transitions_for(&event.step_type, event.status);
        let write = self.persistence.record_event(event, &transitions).await?;
        match write {
            EventWrite::Written => debug!(
                task_id = %event.task_id,
                step = %event.step_type,
                status = %event.status,
                "Task event recorded"
            ),
            EventWrite::Dropped => debug!(
                task_id = %event.task_id,
                step = %event.step_type,
                status = %event.status,
                "Task event dropped, step already succeeded"
            ),
        }
        Ok(write)
    }

    /// All events of a task in insertion order.
    ///
    /// Also settles a task row left in `pending`/`start` by a writer that
    /// crashed between the event write and the status update.
    pub async fn list_task_events(
        &self,
        enterprise_id: &str,
        task_id: &str,
    ) -> Result<Vec<TaskEventRecord>> {
        let events = self
            .persistence
            .list_task_events(enterprise_id, task_id)
            .await?;

        let mut transitions = Vec::new();
        for event in &events {
            match event.step_status() {
                Ok(status) => transitions.extend(transitions_for(&event.step_type, status)),
                Err(e) => warn!(
                    task_id = %task_id,
                    event_id = %event.event_id,
                    error = %e,
                    "Skipping event with unknown status"
                ),
            }
        }
        self.persistence
            .settle_task(enterprise_id, task_id, &transitions)
            .await?;

        Ok(events)
    }

    /// Underlying store.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{SqlitePersistence, TaskRecord};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_sink() -> (EventSink, Arc<dyn Persistence>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        crate::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");
        let persistence: Arc<dyn Persistence> = Arc::new(SqlitePersistence::new(pool));
        (EventSink::new(persistence.clone()), persistence)
    }

    fn event(task_id: &str, step: &str, status: StepStatus) -> EventMessage {
        EventMessage {
            enterprise_id: "E".to_string(),
            task_id: task_id.to_string(),
            step_type: step.to_string(),
            status,
            message: String::new(),
        }
    }

    async fn status_of(persistence: &Arc<dyn Persistence>, kind: TaskKind, id: &str) -> String {
        persistence
            .get_task(kind, "E", id)
            .await
            .expect("get task")
            .expect("task should exist")
            .status
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(
            transitions_for(steps::INSTALL_KUBERNETES, StepStatus::Success),
            vec![TaskTransition {
                kind: TaskKind::CreateKubernetes,
                status: TaskStatus::Complete
            }]
        );
        assert_eq!(
            transitions_for(steps::INIT_REGION, StepStatus::Success)[0].status,
            TaskStatus::Inited
        );
        assert_eq!(transitions_for(steps::CHECK_CLUSTER, StepStatus::Failure).len(), 3);
        assert!(transitions_for(steps::INIT_REGION, StepStatus::Start).is_empty());
        assert!(transitions_for(steps::CREATE_RDS, StepStatus::Success).is_empty());
    }

    #[tokio::test]
    async fn test_success_survives_replay_and_later_failure() {
        let (sink, persistence) = test_sink().await;
        let task = TaskRecord::new(TaskKind::InitRainbond, "E", "custom", "c1");
        persistence.create_task(&task).await.expect("create task");

        let success = event(&task.task_id, steps::INIT_REGION, StepStatus::Success);
        assert_eq!(sink.record(&success).await.expect("record"), EventWrite::Written);
        assert_eq!(sink.record(&success).await.expect("record"), EventWrite::Dropped);
        let failure = event(&task.task_id, steps::INIT_REGION, StepStatus::Failure);
        assert_eq!(sink.record(&failure).await.expect("record"), EventWrite::Dropped);

        let events = sink
            .list_task_events("E", &task.task_id)
            .await
            .expect("list");
        let init_region: Vec<_> = events
            .iter()
            .filter(|e| e.step_type == steps::INIT_REGION)
            .collect();
        assert_eq!(init_region.len(), 1);
        assert_eq!(init_region[0].status, "success");
        assert_eq!(
            status_of(&persistence, TaskKind::InitRainbond, &task.task_id).await,
            "inited"
        );
    }

    #[tokio::test]
    async fn test_failure_completes_the_task_of_that_id_only() {
        let (sink, persistence) = test_sink().await;
        let create = TaskRecord::new(TaskKind::CreateKubernetes, "E", "rke", "c1");
        let other = TaskRecord::new(TaskKind::CreateKubernetes, "E", "rke", "c2");
        persistence.create_task(&create).await.expect("create task");
        persistence.create_task(&other).await.expect("create task");

        sink.record(&event(&create.task_id, steps::INSTALL_KUBERNETES, StepStatus::Failure))
            .await
            .expect("record");

        assert_eq!(
            status_of(&persistence, TaskKind::CreateKubernetes, &create.task_id).await,
            "complete"
        );
        assert_eq!(
            status_of(&persistence, TaskKind::CreateKubernetes, &other.task_id).await,
            "pending"
        );
    }

    #[tokio::test]
    async fn test_update_success_routes_to_update_task() {
        let (sink, persistence) = test_sink().await;
        let update = TaskRecord::new(TaskKind::UpdateKubernetes, "E", "rke", "c1");
        persistence.create_task(&update).await.expect("create task");

        sink.record(&event(&update.task_id, steps::UPDATE_KUBERNETES, StepStatus::Success))
            .await
            .expect("record");

        assert_eq!(
            status_of(&persistence, TaskKind::UpdateKubernetes, &update.task_id).await,
            "complete"
        );
    }

    #[tokio::test]
    async fn test_listing_settles_dangling_task() {
        let (sink, persistence) = test_sink().await;
        let task = TaskRecord::new(TaskKind::CreateKubernetes, "E", "ack", "c1");
        persistence.create_task(&task).await.expect("create task");
        persistence
            .update_task_status(TaskKind::CreateKubernetes, "E", &task.task_id, TaskStatus::Start)
            .await
            .expect("update");

        // Simulate a writer that persisted the event but not the status change.
        persistence
            .record_event(
                &event(&task.task_id, steps::CREATE_CLUSTER, StepStatus::Success),
                &[],
            )
            .await
            .expect("record");
        assert_eq!(
            status_of(&persistence, TaskKind::CreateKubernetes, &task.task_id).await,
            "start"
        );

        let events = sink
            .list_task_events("E", &task.task_id)
            .await
            .expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(
            status_of(&persistence, TaskKind::CreateKubernetes, &task.task_id).await,
            "complete"
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers_keep_one_row_per_step() {
        let (sink, _persistence) = test_sink().await;
        let writes = (0..8).map(|i| {
            let sink = sink.clone();
            async move {
                let status = if i % 2 == 0 {
                    StepStatus::Start
                } else {
                    StepStatus::Success
                };
                sink.record(&event("t", steps::INIT, status)).await
            }
        });
        for result in futures::future::join_all(writes).await {
            result.expect("record");
        }

        let events = sink.list_task_events("E", "t").await.expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "success");
    }
}
