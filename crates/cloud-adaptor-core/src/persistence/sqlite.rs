// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;
use crate::model::{
    CloudCredential, CustomCluster, EventMessage, EventWrite, PlatformConfigOverride, RkeCluster,
    TaskKind, TaskStatus,
};

use super::{
    CredentialRow, CustomClusterRow, Persistence, PlatformConfigRow, RkeClusterRow, TaskEventRecord,
    TaskQuery, TaskRecord, TaskTransition,
};

/// File name of the database inside `DB_PATH`.
pub const DATABASE_FILE: &str = "cloudadaptor.db";

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The caller is responsible for running [`crate::migrations::run_sqlite`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Private in-memory database with migrations applied.
    ///
    /// Uses a single connection, since every connection to `sqlite::memory:`
    /// opens its own database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;
        crate::migrations::run_sqlite(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying pool, for shutdown.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn status_placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn put_credential(&self, credential: &CloudCredential) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO cloud_credentials
                (enterprise_id, provider_name, access_key, secret_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(enterprise_id, provider_name) DO UPDATE SET
                access_key = excluded.access_key,
                secret_key = excluded.secret_key,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.enterprise_id)
        .bind(&credential.provider_name)
        .bind(&credential.access_key)
        .bind(&credential.secret_key)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_credential(
        &self,
        enterprise_id: &str,
        provider_name: &str,
    ) -> Result<Option<CloudCredential>, CoreError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT enterprise_id, provider_name, access_key, secret_key
            FROM cloud_credentials
            WHERE enterprise_id = ? AND provider_name = ?
            "#,
        )
        .bind(enterprise_id)
        .bind(provider_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn save_rke_cluster(&self, cluster: &RkeCluster) -> Result<(), CoreError> {
        let node_list = serde_json::to_string(&cluster.node_list)?;
        sqlx::query(
            r#"
            INSERT INTO rke_clusters
                (cluster_id, name, enterprise_id, state, kubernetes_version, network_plugin,
                 pod_cidr, service_cidr, node_list, kube_config, api_url, create_log_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cluster_id) DO UPDATE SET
                name = excluded.name,
                state = excluded.state,
                kubernetes_version = excluded.kubernetes_version,
                network_plugin = excluded.network_plugin,
                pod_cidr = excluded.pod_cidr,
                service_cidr = excluded.service_cidr,
                node_list = excluded.node_list,
                kube_config = excluded.kube_config,
                api_url = excluded.api_url,
                create_log_path = excluded.create_log_path
            "#,
        )
        .bind(&cluster.cluster_id)
        .bind(&cluster.name)
        .bind(&cluster.enterprise_id)
        .bind(cluster.state.as_str())
        .bind(&cluster.kubernetes_version)
        .bind(&cluster.network_plugin)
        .bind(&cluster.pod_cidr)
        .bind(&cluster.service_cidr)
        .bind(node_list)
        .bind(&cluster.kube_config)
        .bind(&cluster.api_url)
        .bind(&cluster.create_log_path)
        .bind(cluster.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_rke_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<Option<RkeCluster>, CoreError> {
        let row = sqlx::query_as::<_, RkeClusterRow>(
            r#"
            SELECT cluster_id, name, enterprise_id, state, kubernetes_version, network_plugin,
                   pod_cidr, service_cidr, node_list, kube_config, api_url, create_log_path, created_at
            FROM rke_clusters
            WHERE enterprise_id = ? AND cluster_id = ?
            "#,
        )
        .bind(enterprise_id)
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RkeCluster::try_from).transpose()
    }

    async fn list_rke_clusters(&self, enterprise_id: &str) -> Result<Vec<RkeCluster>, CoreError> {
        let rows = sqlx::query_as::<_, RkeClusterRow>(
            r#"
            SELECT cluster_id, name, enterprise_id, state, kubernetes_version, network_plugin,
                   pod_cidr, service_cidr, node_list, kube_config, api_url, create_log_path, created_at
            FROM rke_clusters
            WHERE enterprise_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(enterprise_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RkeCluster::try_from).collect()
    }

    async fn delete_rke_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM rke_clusters WHERE enterprise_id = ? AND cluster_id = ?")
            .bind(enterprise_id)
            .bind(cluster_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_custom_cluster(&self, cluster: &CustomCluster) -> Result<(), CoreError> {
        let eips = serde_json::to_string(&cluster.eips)?;
        sqlx::query(
            r#"
            INSERT INTO custom_clusters (cluster_id, name, enterprise_id, kube_config, eips, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(cluster_id) DO UPDATE SET
                name = excluded.name,
                kube_config = excluded.kube_config,
                eips = excluded.eips
            "#,
        )
        .bind(&cluster.cluster_id)
        .bind(&cluster.name)
        .bind(&cluster.enterprise_id)
        .bind(&cluster.kube_config)
        .bind(eips)
        .bind(cluster.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_custom_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<Option<CustomCluster>, CoreError> {
        let row = sqlx::query_as::<_, CustomClusterRow>(
            r#"
            SELECT cluster_id, name, enterprise_id, kube_config, eips, created_at
            FROM custom_clusters
            WHERE enterprise_id = ? AND cluster_id = ?
            "#,
        )
        .bind(enterprise_id)
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CustomCluster::try_from).transpose()
    }

    async fn list_custom_clusters(
        &self,
        enterprise_id: &str,
    ) -> Result<Vec<CustomCluster>, CoreError> {
        let rows = sqlx::query_as::<_, CustomClusterRow>(
            r#"
            SELECT cluster_id, name, enterprise_id, kube_config, eips, created_at
            FROM custom_clusters
            WHERE enterprise_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(enterprise_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CustomCluster::try_from).collect()
    }

    async fn delete_custom_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<bool, CoreError> {
        let result =
            sqlx::query("DELETE FROM custom_clusters WHERE enterprise_id = ? AND cluster_id = ?")
                .bind(enterprise_id)
                .bind(cluster_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn put_platform_config(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
        config: &str,
    ) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO platform_configs (enterprise_id, cluster_id, config, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(enterprise_id, cluster_id) DO UPDATE SET
                config = excluded.config,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(enterprise_id)
        .bind(cluster_id)
        .bind(config)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_platform_config(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<Option<PlatformConfigOverride>, CoreError> {
        let row = sqlx::query_as::<_, PlatformConfigRow>(
            r#"
            SELECT enterprise_id, cluster_id, config, updated_at
            FROM platform_configs
            WHERE enterprise_id = ? AND cluster_id = ?
            "#,
        )
        .bind(enterprise_id)
        .bind(cluster_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn delete_platform_config(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM platform_configs WHERE enterprise_id = ? AND cluster_id = ?")
            .bind(enterprise_id)
            .bind(cluster_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_task(&self, task: &TaskRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (task_id, kind, enterprise_id, provider_name, cluster_id, status, cluster_name,
                 region_id, worker_resource_type, worker_num, node_number, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.kind)
        .bind(&task.enterprise_id)
        .bind(&task.provider_name)
        .bind(&task.cluster_id)
        .bind(&task.status)
        .bind(&task.cluster_name)
        .bind(&task.region_id)
        .bind(&task.worker_resource_type)
        .bind(task.worker_num)
        .bind(task.node_number)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_task(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        task_id: &str,
    ) -> Result<Option<TaskRecord>, CoreError> {
        let record = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT * FROM tasks
            WHERE kind = ? AND enterprise_id = ? AND task_id = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(enterprise_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn latest_task(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        query: TaskQuery<'_>,
    ) -> Result<Option<TaskRecord>, CoreError> {
        let record = sqlx::query_as::<_, TaskRecord>(
            r#"
            SELECT * FROM tasks
            WHERE kind = ? AND enterprise_id = ?
              AND (? IS NULL OR provider_name = ?)
              AND (? IS NULL OR cluster_id = ?)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .bind(enterprise_id)
        .bind(query.provider_name)
        .bind(query.provider_name)
        .bind(query.cluster_id)
        .bind(query.cluster_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_tasks(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<TaskRecord>, CoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM tasks WHERE kind = ? AND enterprise_id = ? AND status IN ({}) \
             ORDER BY created_at DESC",
            status_placeholders(statuses.len())
        );
        let mut query = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(kind.as_str())
            .bind(enterprise_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn update_task_status(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = ?, updated_at = ?
            WHERE kind = ? AND enterprise_id = ? AND task_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(kind.as_str())
        .bind(enterprise_id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_task_started(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        task_id: &str,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = ?, updated_at = ?
            WHERE kind = ? AND enterprise_id = ? AND task_id = ? AND status = ?
            "#,
        )
        .bind(TaskStatus::Start.as_str())
        .bind(Utc::now())
        .bind(kind.as_str())
        .bind(enterprise_id)
        .bind(task_id)
        .bind(TaskStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_event(
        &self,
        event: &EventMessage,
        transitions: &[TaskTransition],
    ) -> Result<EventWrite, CoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // The WHERE clause on the update arm leaves a `success` row untouched.
        let result = sqlx::query(
            r#"
            INSERT INTO task_events
                (event_id, enterprise_id, task_id, step_type, status, message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(enterprise_id, task_id, step_type) DO UPDATE SET
                event_id = excluded.event_id,
                status = excluded.status,
                message = excluded.message,
                updated_at = excluded.updated_at
            WHERE task_events.status <> 'success'
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&event.enterprise_id)
        .bind(&event.task_id)
        .bind(&event.step_type)
        .bind(event.status.as_str())
        .bind(&event.message)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.commit().await?;
            return Ok(EventWrite::Dropped);
        }

        for transition in transitions {
            sqlx::query(
                r#"
                UPDATE tasks SET status = ?, updated_at = ?
                WHERE kind = ? AND enterprise_id = ? AND task_id = ?
                "#,
            )
            .bind(transition.status.as_str())
            .bind(now)
            .bind(transition.kind.as_str())
            .bind(&event.enterprise_id)
            .bind(&event.task_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(EventWrite::Written)
    }

    async fn list_task_events(
        &self,
        enterprise_id: &str,
        task_id: &str,
    ) -> Result<Vec<TaskEventRecord>, CoreError> {
        let events = sqlx::query_as::<_, TaskEventRecord>(
            r#"
            SELECT id, event_id, enterprise_id, task_id, step_type, status, message,
                   created_at, updated_at
            FROM task_events
            WHERE enterprise_id = ? AND task_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(enterprise_id)
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn settle_task(
        &self,
        enterprise_id: &str,
        task_id: &str,
        transitions: &[TaskTransition],
    ) -> Result<(), CoreError> {
        if transitions.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for transition in transitions {
            sqlx::query(
                r#"
                UPDATE tasks SET status = ?, updated_at = ?
                WHERE kind = ? AND enterprise_id = ? AND task_id = ?
                  AND status IN ('pending', 'start')
                "#,
            )
            .bind(transition.status.as_str())
            .bind(now)
            .bind(transition.kind.as_str())
            .bind(enterprise_id)
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterState, ConfigNode, NodeRole, StepStatus};

    /// Create an in-memory SQLite pool for testing.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        crate::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    fn event(task_id: &str, step: &str, status: StepStatus) -> EventMessage {
        EventMessage {
            enterprise_id: "E1".to_string(),
            task_id: task_id.to_string(),
            step_type: step.to_string(),
            status,
            message: format!("{} {}", step, status),
        }
    }

    #[tokio::test]
    async fn test_credential_upsert_replaces_keys() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let mut cred = CloudCredential {
            enterprise_id: "E1".into(),
            provider_name: "ack".into(),
            access_key: "ak1".into(),
            secret_key: "sk1".into(),
        };
        persistence.put_credential(&cred).await.expect("put");
        cred.access_key = "ak2".into();
        persistence.put_credential(&cred).await.expect("put again");

        let stored = persistence
            .get_credential("E1", "ack")
            .await
            .expect("get")
            .expect("credential should exist");
        assert_eq!(stored.access_key, "ak2");
        assert!(
            persistence
                .get_credential("E1", "tke")
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_rke_cluster_round_trip() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let cluster = RkeCluster {
            cluster_id: "c1".into(),
            name: "prod".into(),
            enterprise_id: "E1".into(),
            state: ClusterState::Installing,
            kubernetes_version: "v1.19.6".into(),
            network_plugin: "calico".into(),
            pod_cidr: "10.42.0.0/16".into(),
            service_cidr: "10.43.0.0/16".into(),
            node_list: vec![ConfigNode {
                ip: "192.168.1.10".into(),
                internal_ip: "10.0.0.10".into(),
                ssh_user: "docker".into(),
                ssh_port: 22,
                docker_socket_path: "/var/run/docker.sock".into(),
                roles: vec![NodeRole::Controlplane, NodeRole::Etcd, NodeRole::Worker],
            }],
            kube_config: String::new(),
            api_url: String::new(),
            create_log_path: "/tmp/rke/prod/create.log".into(),
            created_at: Utc::now(),
        };
        persistence.save_rke_cluster(&cluster).await.expect("save");

        let mut updated = cluster.clone();
        updated.state = ClusterState::Running;
        updated.kube_config = "apiVersion: v1".into();
        persistence.save_rke_cluster(&updated).await.expect("update");

        let loaded = persistence
            .get_rke_cluster("E1", "c1")
            .await
            .expect("get")
            .expect("cluster should exist");
        assert_eq!(loaded.state, ClusterState::Running);
        assert_eq!(loaded.node_list, cluster.node_list);
        assert_eq!(persistence.list_rke_clusters("E1").await.expect("list").len(), 1);
        assert!(persistence.get_rke_cluster("E2", "c1").await.expect("get").is_none());

        assert!(persistence.delete_rke_cluster("E1", "c1").await.expect("delete"));
        assert!(!persistence.delete_rke_cluster("E1", "c1").await.expect("delete"));
    }

    #[tokio::test]
    async fn test_platform_config_is_one_row_per_cluster() {
        let persistence = SqlitePersistence::new(test_pool().await);
        persistence
            .put_platform_config("E1", "c1", "a: 1")
            .await
            .expect("put");
        persistence
            .put_platform_config("E1", "c1", "a: 2")
            .await
            .expect("put");
        let stored = persistence
            .get_platform_config("E1", "c1")
            .await
            .expect("get")
            .expect("override should exist");
        assert_eq!(stored.config, "a: 2");

        persistence
            .delete_platform_config("E1", "c1")
            .await
            .expect("delete");
        assert!(
            persistence
                .get_platform_config("E1", "c1")
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_task_lookup_is_scoped_by_kind() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let task = TaskRecord::new(TaskKind::InitRainbond, "E1", "custom", "c1");
        persistence.create_task(&task).await.expect("create");

        assert!(
            persistence
                .get_task(TaskKind::CreateKubernetes, "E1", &task.task_id)
                .await
                .expect("get")
                .is_none()
        );
        assert!(
            !persistence
                .update_task_status(TaskKind::UpdateKubernetes, "E1", &task.task_id, TaskStatus::Complete)
                .await
                .expect("update")
        );
        assert!(
            persistence
                .update_task_status(TaskKind::InitRainbond, "E1", &task.task_id, TaskStatus::Start)
                .await
                .expect("update")
        );

        let latest = persistence
            .latest_task(
                TaskKind::InitRainbond,
                "E1",
                TaskQuery {
                    provider_name: Some("custom"),
                    cluster_id: Some("c1"),
                },
            )
            .await
            .expect("latest")
            .expect("task should exist");
        assert_eq!(latest.status, "start");

        let running = persistence
            .list_tasks(
                TaskKind::InitRainbond,
                "E1",
                &[TaskStatus::Pending, TaskStatus::Start],
            )
            .await
            .expect("list");
        assert_eq!(running.len(), 1);
    }

    #[tokio::test]
    async fn test_success_event_is_never_overwritten() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let task = TaskRecord::new(TaskKind::InitRainbond, "E1", "custom", "c1");
        persistence.create_task(&task).await.expect("create");
        let inited = [TaskTransition {
            kind: TaskKind::InitRainbond,
            status: TaskStatus::Inited,
        }];

        let first = persistence
            .record_event(&event(&task.task_id, "InitRainbondRegion", StepStatus::Success), &inited)
            .await
            .expect("record");
        let second = persistence
            .record_event(
                &event(&task.task_id, "InitRainbondRegion", StepStatus::Failure),
                &[TaskTransition {
                    kind: TaskKind::InitRainbond,
                    status: TaskStatus::Complete,
                }],
            )
            .await
            .expect("record");
        assert_eq!(first, EventWrite::Written);
        assert_eq!(second, EventWrite::Dropped);

        let events = persistence
            .list_task_events("E1", &task.task_id)
            .await
            .expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "success");

        let stored = persistence
            .get_task(TaskKind::InitRainbond, "E1", &task.task_id)
            .await
            .expect("get")
            .expect("task should exist");
        assert_eq!(stored.status, "inited");
    }

    #[tokio::test]
    async fn test_start_event_is_overwritten_in_place() {
        let persistence = SqlitePersistence::new(test_pool().await);
        persistence
            .record_event(&event("t1", "Init", StepStatus::Start), &[])
            .await
            .expect("record");
        persistence
            .record_event(&event("t1", "CheckCluster", StepStatus::Start), &[])
            .await
            .expect("record");
        let before = persistence.list_task_events("E1", "t1").await.expect("list");
        persistence
            .record_event(&event("t1", "Init", StepStatus::Success), &[])
            .await
            .expect("record");

        let events = persistence.list_task_events("E1", "t1").await.expect("list");
        let steps: Vec<_> = events
            .iter()
            .map(|e| (e.step_type.as_str(), e.status.as_str()))
            .collect();
        assert_eq!(steps, vec![("Init", "success"), ("CheckCluster", "start")]);
        // An accepted overwrite gets a new event id; a dropped write keeps it.
        assert_ne!(events[0].event_id, before[0].event_id);
        assert_eq!(events[1].event_id, before[1].event_id);

        let written = persistence
            .record_event(&event("t1", "Init", StepStatus::Failure), &[])
            .await
            .expect("record");
        assert_eq!(written, EventWrite::Dropped);
        let after = persistence.list_task_events("E1", "t1").await.expect("list");
        assert_eq!(after[0].event_id, events[0].event_id);
    }

    #[tokio::test]
    async fn test_settle_task_leaves_terminal_rows_alone() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let task = TaskRecord::new(TaskKind::InitRainbond, "E1", "custom", "c1");
        persistence.create_task(&task).await.expect("create");
        persistence
            .update_task_status(TaskKind::InitRainbond, "E1", &task.task_id, TaskStatus::Inited)
            .await
            .expect("update");

        persistence
            .settle_task(
                "E1",
                &task.task_id,
                &[TaskTransition {
                    kind: TaskKind::InitRainbond,
                    status: TaskStatus::Complete,
                }],
            )
            .await
            .expect("settle");

        let stored = persistence
            .get_task(TaskKind::InitRainbond, "E1", &task.task_id)
            .await
            .expect("get")
            .expect("task should exist");
        assert_eq!(stored.status, "inited");
    }

    #[tokio::test]
    async fn test_mark_started_only_moves_pending_tasks() {
        let persistence = SqlitePersistence::new(test_pool().await);
        let fresh = TaskRecord::new(TaskKind::InitRainbond, "E1", "custom", "c1");
        let finished = TaskRecord::new(TaskKind::InitRainbond, "E1", "custom", "c1");
        persistence.create_task(&fresh).await.expect("create");
        persistence.create_task(&finished).await.expect("create");
        persistence
            .update_task_status(TaskKind::InitRainbond, "E1", &finished.task_id, TaskStatus::Complete)
            .await
            .expect("update");

        assert!(
            persistence
                .mark_task_started(TaskKind::InitRainbond, "E1", &fresh.task_id)
                .await
                .expect("mark")
        );
        assert!(
            !persistence
                .mark_task_started(TaskKind::InitRainbond, "E1", &finished.task_id)
                .await
                .expect("mark")
        );
        assert!(
            !persistence
                .mark_task_started(TaskKind::CreateKubernetes, "E1", &fresh.task_id)
                .await
                .expect("mark")
        );

        let status = |id: String| {
            let persistence = &persistence;
            async move {
                persistence
                    .get_task(TaskKind::InitRainbond, "E1", &id)
                    .await
                    .expect("get")
                    .expect("task should exist")
                    .status
            }
        };
        assert_eq!(status(fresh.task_id.clone()).await, "start");
        assert_eq!(status(finished.task_id.clone()).await, "complete");
    }

    #[tokio::test]
    async fn test_from_path_creates_database_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(DATABASE_FILE);
        let persistence = SqlitePersistence::from_path(&path).await.expect("open");
        assert!(persistence.health_check_db().await.expect("health"));
        assert!(path.exists());
    }
}
