// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! MySQL-backed persistence implementation.

use chrono::Utc;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;

use crate::error::CoreError;
use crate::model::{
    CloudCredential, CustomCluster, EventMessage, EventWrite, PlatformConfigOverride, RkeCluster,
    TaskKind, TaskStatus,
};

use super::{
    CredentialRow, CustomClusterRow, Persistence, PlatformConfigRow, RkeClusterRow, TaskEventRecord,
    TaskQuery, TaskRecord, TaskTransition,
};

/// Insert or overwrite one event row in a single statement.
///
/// A `success` row keeps every column. MySQL assigns left to right and later
/// expressions see earlier assignments, so `status` must come last. An
/// accepted write always carries a fresh `event_id`.
const UPSERT_EVENT: &str = r#"
    INSERT INTO task_events
        (event_id, enterprise_id, task_id, step_type, status, message, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON DUPLICATE KEY UPDATE
        event_id = IF(status = 'success', event_id, VALUES(event_id)),
        message = IF(status = 'success', message, VALUES(message)),
        updated_at = IF(status = 'success', updated_at, VALUES(updated_at)),
        status = IF(status = 'success', status, VALUES(status))
"#;

/// MySQL-backed persistence provider.
#[derive(Clone)]
pub struct MySqlPersistence {
    pool: MySqlPool,
}

impl MySqlPersistence {
    /// Create a new MySQL persistence provider from an existing pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and run all migrations.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to MySQL: {}", e),
            })?;

        crate::migrations::run_mysql(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying pool, for shutdown.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for MySqlPersistence {
    async fn put_credential(&self, credential: &CloudCredential) -> Result<(), CoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO cloud_credentials
                (enterprise_id, provider_name, access_key, secret_key, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                access_key = VALUES(access_key),
                secret_key = VALUES(secret_key),
                updated_at = VALUES(updated_at)
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
            ON DUPLICATE KEY UPDATE
                name = VALUES(name),
                state = VALUES(state),
                kubernetes_version = VALUES(kubernetes_version),
                network_plugin = VALUES(network_plugin),
                pod_cidr = VALUES(pod_cidr),
                service_cidr = VALUES(service_cidr),
                node_list = VALUES(node_list),
                kube_config = VALUES(kube_config),
                api_url = VALUES(api_url),
                create_log_path = VALUES(create_log_path)
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
            ON DUPLICATE KEY UPDATE
                name = VALUES(name),
                kube_config = VALUES(kube_config),
                eips = VALUES(eips)
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
            ON DUPLICATE KEY UPDATE
                config = VALUES(config),
                updated_at = VALUES(updated_at)
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
            "SELECT * FROM tasks WHERE kind = ? AND enterprise_id = ? AND task_id = ?",
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
            vec!["?"; statuses.len()].join(", ")
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
        // MySQL reports 0 affected rows for a no-op update, so check existence separately.
        let exists: Option<(String,)> = sqlx::query_as(
            "SELECT task_id FROM tasks WHERE kind = ? AND enterprise_id = ? AND task_id = ?",
        )
        .bind(kind.as_str())
        .bind(enterprise_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_none() {
            return Ok(false);
        }

        sqlx::query(
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

        Ok(true)
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

        let event_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(UPSERT_EVENT)
            .bind(&event_id)
            .bind(&event.enterprise_id)
            .bind(&event.task_id)
            .bind(&event.step_type)
            .bind(event.status.as_str())
            .bind(&event.message)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        // The upsert holds the row lock, so this reads what it left behind.
        let (stored_id,): (String,) = sqlx::query_as(
            r#"
            SELECT event_id FROM task_events
            WHERE enterprise_id = ? AND task_id = ? AND step_type = ?
            "#,
        )
        .bind(&event.enterprise_id)
        .bind(&event.task_id)
        .bind(&event.step_type)
        .fetch_one(&mut *tx)
        .await?;

        if stored_id != event_id {
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
