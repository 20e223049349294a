// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence layer for cloud-adaptor-core.
//!
//! One [`Persistence`] trait covers every table (credentials, cluster metadata,
//! platform overrides, tasks, events). [`sqlite::SqlitePersistence`] and
//! [`mysql::MySqlPersistence`] implement it; callers hold an
//! `Arc<dyn Persistence>` and never see the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{
    CloudCredential, ClusterState, CustomCluster, EventMessage, EventWrite, PlatformConfigOverride,
    RkeCluster, StepStatus, TaskKind, TaskStatus,
};

pub mod mysql;
pub mod sqlite;

pub use mysql::MySqlPersistence;
pub use sqlite::SqlitePersistence;

/// Task row. The three task kinds share one table, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRecord {
    /// Dash-less uuid-v4.
    pub task_id: String,
    /// One of [`TaskKind`].
    pub kind: String,
    pub enterprise_id: String,
    pub provider_name: String,
    pub cluster_id: String,
    /// One of [`TaskStatus`].
    pub status: String,
    /// Create tasks: requested cluster name.
    pub cluster_name: Option<String>,
    /// Create tasks: requested region.
    pub region_id: Option<String>,
    /// Create tasks: requested worker instance type.
    pub worker_resource_type: Option<String>,
    /// Create tasks: requested worker count.
    pub worker_num: Option<i32>,
    /// Update tasks: desired node count.
    pub node_number: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh `pending` task with no kind-specific fields set.
    pub fn new(
        kind: TaskKind,
        enterprise_id: &str,
        provider_name: &str,
        cluster_id: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: crate::model::new_id(),
            kind: kind.as_str().to_string(),
            enterprise_id: enterprise_id.to_string(),
            provider_name: provider_name.to_string(),
            cluster_id: cluster_id.to_string(),
            status: TaskStatus::Pending.as_str().to_string(),
            cluster_name: None,
            region_id: None,
            worker_resource_type: None,
            worker_num: None,
            node_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parsed task status.
    pub fn task_status(&self) -> Result<TaskStatus, CoreError> {
        Ok(self.status.parse()?)
    }

    /// Parsed task kind.
    pub fn task_kind(&self) -> Result<TaskKind, CoreError> {
        Ok(self.kind.parse()?)
    }
}

/// Event log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskEventRecord {
    /// Insertion sequence, breaks `created_at` ties.
    #[serde(skip)]
    pub id: i64,
    pub event_id: String,
    pub enterprise_id: String,
    pub task_id: String,
    pub step_type: String,
    /// One of [`StepStatus`].
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskEventRecord {
    /// Parsed step status.
    pub fn step_status(&self) -> Result<StepStatus, CoreError> {
        Ok(self.status.parse()?)
    }
}

/// A status change the sink applies to a task row together with an event write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTransition {
    /// Which task kind the row must have.
    pub kind: TaskKind,
    /// New status.
    pub status: TaskStatus,
}

/// Filter for [`Persistence::latest_task`].
#[derive(Debug, Clone, Default)]
pub struct TaskQuery<'a> {
    /// Restrict to one provider.
    pub provider_name: Option<&'a str>,
    /// Restrict to one cluster.
    pub cluster_id: Option<&'a str>,
}

/// Cluster metadata row for RKE clusters; node list stored as JSON text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct RkeClusterRow {
    pub cluster_id: String,
    pub name: String,
    pub enterprise_id: String,
    pub state: String,
    pub kubernetes_version: String,
    pub network_plugin: String,
    pub pod_cidr: String,
    pub service_cidr: String,
    pub node_list: String,
    pub kube_config: String,
    pub api_url: String,
    pub create_log_path: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RkeClusterRow> for RkeCluster {
    type Error = CoreError;

    fn try_from(row: RkeClusterRow) -> Result<Self, Self::Error> {
        Ok(RkeCluster {
            cluster_id: row.cluster_id,
            name: row.name,
            enterprise_id: row.enterprise_id,
            state: row.state.parse::<ClusterState>()?,
            kubernetes_version: row.kubernetes_version,
            network_plugin: row.network_plugin,
            pod_cidr: row.pod_cidr,
            service_cidr: row.service_cidr,
            node_list: serde_json::from_str(&row.node_list)?,
            kube_config: row.kube_config,
            api_url: row.api_url,
            create_log_path: row.create_log_path,
            created_at: row.created_at,
        })
    }
}

/// Cluster metadata row for imported clusters; EIPs stored as JSON text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CustomClusterRow {
    pub cluster_id: String,
    pub name: String,
    pub enterprise_id: String,
    pub kube_config: String,
    pub eips: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<CustomClusterRow> for CustomCluster {
    type Error = CoreError;

    fn try_from(row: CustomClusterRow) -> Result<Self, Self::Error> {
        Ok(CustomCluster {
            cluster_id: row.cluster_id,
            name: row.name,
            enterprise_id: row.enterprise_id,
            kube_config: row.kube_config,
            eips: serde_json::from_str(&row.eips)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CredentialRow {
    pub enterprise_id: String,
    pub provider_name: String,
    pub access_key: String,
    pub secret_key: String,
}

impl From<CredentialRow> for CloudCredential {
    fn from(row: CredentialRow) -> Self {
        CloudCredential {
            enterprise_id: row.enterprise_id,
            provider_name: row.provider_name,
            access_key: row.access_key,
            secret_key: row.secret_key,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct PlatformConfigRow {
    pub enterprise_id: String,
    pub cluster_id: String,
    pub config: String,
    pub updated_at: DateTime<Utc>,
}

impl From<PlatformConfigRow> for PlatformConfigOverride {
    fn from(row: PlatformConfigRow) -> Self {
        PlatformConfigOverride {
            enterprise_id: row.enterprise_id,
            cluster_id: row.cluster_id,
            config: row.config,
            updated_at: row.updated_at,
        }
    }
}

/// Storage operations needed by the engine.
///
/// Every method is a single statement or a single transaction; implementations
/// must be safe to call from many tasks at once.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    // ===== Credentials =====

    /// Insert or replace the credential for `(enterprise_id, provider_name)`.
    async fn put_credential(&self, credential: &CloudCredential) -> Result<(), CoreError>;

    /// Stored credential, if any.
    async fn get_credential(
        &self,
        enterprise_id: &str,
        provider_name: &str,
    ) -> Result<Option<CloudCredential>, CoreError>;

    // ===== RKE clusters =====

    /// Insert or replace an RKE cluster record keyed by `cluster_id`.
    async fn save_rke_cluster(&self, cluster: &RkeCluster) -> Result<(), CoreError>;

    /// RKE cluster by id, scoped to the enterprise.
    async fn get_rke_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<Option<RkeCluster>, CoreError>;

    /// All RKE clusters of an enterprise, newest first.
    async fn list_rke_clusters(&self, enterprise_id: &str) -> Result<Vec<RkeCluster>, CoreError>;

    /// Delete an RKE cluster record. Returns false when nothing was deleted.
    async fn delete_rke_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<bool, CoreError>;

    // ===== Custom clusters =====

    /// Insert or replace an imported cluster keyed by `cluster_id`.
    async fn save_custom_cluster(&self, cluster: &CustomCluster) -> Result<(), CoreError>;

    /// Imported cluster by id, scoped to the enterprise.
    async fn get_custom_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<Option<CustomCluster>, CoreError>;

    /// All imported clusters of an enterprise, newest first.
    async fn list_custom_clusters(
        &self,
        enterprise_id: &str,
    ) -> Result<Vec<CustomCluster>, CoreError>;

    /// Delete an imported cluster. Returns false when nothing was deleted.
    async fn delete_custom_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<bool, CoreError>;

    // ===== Platform overrides =====

    /// Insert or replace the override for `(enterprise_id, cluster_id)`.
    async fn put_platform_config(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
        config: &str,
    ) -> Result<(), CoreError>;

    /// Stored override, if any.
    async fn get_platform_config(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<Option<PlatformConfigOverride>, CoreError>;

    /// Remove the override of a deleted cluster.
    async fn delete_platform_config(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<(), CoreError>;

    // ===== Tasks =====

    /// Insert a new task row.
    async fn create_task(&self, task: &TaskRecord) -> Result<(), CoreError>;

    /// Task of the given kind, scoped to the enterprise.
    async fn get_task(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskRecord>, CoreError>;

    /// Most recently created task of the given kind matching the filter.
    async fn latest_task(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        query: TaskQuery<'_>,
    ) -> Result<Option<TaskRecord>, CoreError>;

    /// Tasks of the given kind whose status is one of `statuses`, newest first.
    async fn list_tasks(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRecord>, CoreError>;

    /// Set a task's status. Returns false when no row of that kind matched.
    async fn update_task_status(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<bool, CoreError>;

    /// Move a task from `pending` to `start`. Returns false when the row is
    /// missing or has already moved on.
    async fn mark_task_started(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        task_id: &str,
    ) -> Result<bool, CoreError>;

    // ===== Events =====

    /// Upsert an event and apply `transitions` to its task in one transaction.
    ///
    /// An existing row for the same `(enterprise_id, task_id, step_type)` whose
    /// status is `success` blocks the write; in that case no transition is
    /// applied and [`EventWrite::Dropped`] is returned. A written row carries
    /// a fresh `event_id`.
    async fn record_event(
        &self,
        event: &EventMessage,
        transitions: &[TaskTransition],
    ) -> Result<EventWrite, CoreError>;

    /// All events of a task in insertion order.
    async fn list_task_events(
        &self,
        enterprise_id: &str,
        task_id: &str,
    ) -> Result<Vec<TaskEventRecord>, CoreError>;

    /// Apply transitions to a task row still in `pending` or `start`.
    async fn settle_task(
        &self,
        enterprise_id: &str,
        task_id: &str,
        transitions: &[TaskTransition],
    ) -> Result<(), CoreError>;

    // ===== Health =====

    /// Check database connectivity.
    async fn health_check_db(&self) -> Result<bool, CoreError>;

    /// Close the connection pool. Later calls fail.
    async fn close(&self) {}
}
