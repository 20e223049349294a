// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task submission and task queries.

use cloud_adaptor_core::model::{TaskKind, TaskStatus, new_id};
use cloud_adaptor_core::persistence::{TaskEventRecord, TaskQuery, TaskRecord};
use tracing::info;

use super::{ClusterUsecase, CreateClusterRequest, InitClusterRequest, UpdateClusterRequest};
use crate::adaptor::rke::{validate_cluster_name, validate_nodes};
use crate::adaptor::{ExpansionNodeRequest, KubernetesClusterConfig, Provider};
use crate::bus::TaskEnvelope;
use crate::error::{Error, Result};
use crate::task::{CreateClusterPayload, InitClusterPayload, UpdateClusterPayload};

impl ClusterUsecase {
    /// Submit a create (or import) task.
    pub async fn create_kubernetes_cluster(
        &self,
        enterprise_id: &str,
        request: CreateClusterRequest,
    ) -> Result<TaskRecord> {
        if request.name.trim().is_empty() {
            return Err(Error::BadRequest("cluster name is required".to_string()));
        }
        let provider: Provider = request.provider_name.parse()?;
        match provider {
            Provider::Custom if request.kubeconfig.trim().is_empty() => {
                return Err(Error::KubeConfigCannotEmpty);
            }
            Provider::Rke => {
                validate_cluster_name(&request.name)?;
                validate_nodes(&request.nodes)?;
            }
            _ => {}
        }
        self.adaptor(enterprise_id, provider.as_str()).await?;

        // Managed clusters get their id from the vendor.
        let cluster_id = match provider {
            Provider::Ack => String::new(),
            Provider::Rke | Provider::Custom => new_id(),
        };
        let config = KubernetesClusterConfig {
            cluster_id: cluster_id.clone(),
            cluster_name: request.name.clone(),
            region_id: request.region_id,
            vpc_id: request.vpc_id,
            vswitch_id: request.vswitch_id,
            worker_resource_type: request.worker_resource_type,
            worker_num: request.worker_num,
            kubernetes_version: request.kubernetes_version,
            network_plugin: request.network_plugin,
            pod_cidr: request.pod_cidr,
            service_cidr: request.service_cidr,
            nodes: request.nodes,
            kubeconfig: request.kubeconfig,
            eips: request.eip,
        };
        self.submit_create(enterprise_id, provider, config).await
    }

    /// Re-run the installer of an existing RKE cluster.
    pub async fn reinstall_kubernetes_cluster(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<TaskRecord> {
        let record = self
            .persistence
            .get_rke_cluster(enterprise_id, cluster_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("rke cluster {}", cluster_id)))?;
        let config = KubernetesClusterConfig {
            cluster_id: record.cluster_id,
            cluster_name: record.name,
            kubernetes_version: record.kubernetes_version,
            network_plugin: record.network_plugin,
            pod_cidr: record.pod_cidr,
            service_cidr: record.service_cidr,
            nodes: record.node_list,
            ..Default::default()
        };
        self.submit_create(enterprise_id, Provider::Rke, config).await
    }

    async fn submit_create(
        &self,
        enterprise_id: &str,
        provider: Provider,
        config: KubernetesClusterConfig,
    ) -> Result<TaskRecord> {
        let mut task = TaskRecord::new(
            TaskKind::CreateKubernetes,
            enterprise_id,
            provider.as_str(),
            &config.cluster_id,
        );
        task.cluster_name = Some(config.cluster_name.clone());
        task.region_id = Some(config.region_id.clone()).filter(|r| !r.is_empty());
        task.worker_resource_type =
            Some(config.worker_resource_type.clone()).filter(|r| !r.is_empty());
        task.worker_num = Some(config.worker_num as i32);
        self.persistence.create_task(&task).await?;

        self.producer
            .send_create(TaskEnvelope::new(
                enterprise_id,
                &task.task_id,
                CreateClusterPayload {
                    provider_name: provider.to_string(),
                    config,
                },
            ))
            .await?;
        self.mark_started(&mut task).await?;
        info!(enterprise_id, task_id = %task.task_id, provider = %provider, "Create task submitted");
        Ok(task)
    }

    /// Submit a platform init task.
    pub async fn init_rainbond_region(
        &self,
        enterprise_id: &str,
        request: InitClusterRequest,
    ) -> Result<TaskRecord> {
        if request.cluster_id.is_empty() {
            return Err(Error::BadRequest("cluster id is required".to_string()));
        }
        let provider: Provider = request.provider_name.parse()?;
        self.adaptor(enterprise_id, provider.as_str()).await?;
        if !request.retry {
            self.ensure_last_task_complete(TaskKind::InitRainbond, enterprise_id, &request.cluster_id)
                .await?;
        }

        let mut task = TaskRecord::new(
            TaskKind::InitRainbond,
            enterprise_id,
            provider.as_str(),
            &request.cluster_id,
        );
        self.persistence.create_task(&task).await?;
        self.producer
            .send_init(TaskEnvelope::new(
                enterprise_id,
                &task.task_id,
                InitClusterPayload {
                    provider_name: provider.to_string(),
                    cluster_id: request.cluster_id.clone(),
                },
            ))
            .await?;
        self.mark_started(&mut task).await?;
        info!(
            enterprise_id,
            task_id = %task.task_id,
            cluster_id = %request.cluster_id,
            retry = request.retry,
            "Init task submitted"
        );
        Ok(task)
    }

    /// Submit a node expansion task. RKE only.
    pub async fn update_kubernetes_cluster(
        &self,
        enterprise_id: &str,
        request: UpdateClusterRequest,
    ) -> Result<TaskRecord> {
        let provider: Provider = request.provider_name.parse()?;
        if provider != Provider::Rke {
            return Err(Error::NotSupportUpdateKubernetes(provider.to_string()));
        }
        validate_nodes(&request.nodes)?;
        self.persistence
            .get_rke_cluster(enterprise_id, &request.cluster_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("rke cluster {}", request.cluster_id)))?;
        self.ensure_last_task_complete(
            TaskKind::UpdateKubernetes,
            enterprise_id,
            &request.cluster_id,
        )
        .await?;

        let mut task = TaskRecord::new(
            TaskKind::UpdateKubernetes,
            enterprise_id,
            provider.as_str(),
            &request.cluster_id,
        );
        task.node_number = Some(request.nodes.len() as i32);
        self.persistence.create_task(&task).await?;
        self.producer
            .send_update(TaskEnvelope::new(
                enterprise_id,
                &task.task_id,
                UpdateClusterPayload {
                    provider_name: provider.to_string(),
                    request: ExpansionNodeRequest {
                        cluster_id: request.cluster_id.clone(),
                        nodes: request.nodes,
                    },
                },
            ))
            .await?;
        self.mark_started(&mut task).await?;
        info!(enterprise_id, task_id = %task.task_id, cluster_id = %request.cluster_id, "Update task submitted");
        Ok(task)
    }

    async fn ensure_last_task_complete(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<()> {
        let last = self
            .persistence
            .latest_task(
                kind,
                enterprise_id,
                TaskQuery {
                    cluster_id: Some(cluster_id),
                    ..Default::default()
                },
            )
            .await?;
        if let Some(last) = last
            && !last.task_status()?.is_terminal()
        {
            return Err(Error::LastTaskNotComplete(cluster_id.to_string()));
        }
        Ok(())
    }

    /// The bus accepted the message. A handler that already settled the task
    /// keeps its status.
    async fn mark_started(&self, task: &mut TaskRecord) -> Result<()> {
        let kind = task.task_kind()?;
        self.persistence
            .mark_task_started(kind, &task.enterprise_id, &task.task_id)
            .await?;
        if let Some(stored) = self
            .persistence
            .get_task(kind, &task.enterprise_id, &task.task_id)
            .await?
        {
            *task = stored;
        }
        Ok(())
    }

    /// Ordered event log of a task.
    pub async fn list_task_events(
        &self,
        enterprise_id: &str,
        task_id: &str,
    ) -> Result<Vec<TaskEventRecord>> {
        Ok(self.sink.list_task_events(enterprise_id, task_id).await?)
    }

    /// Most recent create task of a provider.
    pub async fn get_last_create_task(
        &self,
        enterprise_id: &str,
        provider_name: &str,
    ) -> Result<Option<TaskRecord>> {
        let provider: Provider = provider_name.parse()?;
        Ok(self
            .persistence
            .latest_task(
                TaskKind::CreateKubernetes,
                enterprise_id,
                TaskQuery {
                    provider_name: Some(provider.as_str()),
                    ..Default::default()
                },
            )
            .await?)
    }

    pub async fn get_create_task(&self, enterprise_id: &str, task_id: &str) -> Result<TaskRecord> {
        self.task(TaskKind::CreateKubernetes, enterprise_id, task_id).await
    }

    /// Latest init task of a cluster.
    pub async fn get_init_task(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
        provider_name: Option<&str>,
    ) -> Result<TaskRecord> {
        self.latest_for_cluster(TaskKind::InitRainbond, enterprise_id, cluster_id, provider_name)
            .await
    }

    /// Init tasks that have not terminated yet.
    pub async fn list_running_init_tasks(&self, enterprise_id: &str) -> Result<Vec<TaskRecord>> {
        Ok(self
            .persistence
            .list_tasks(
                TaskKind::InitRainbond,
                enterprise_id,
                &[TaskStatus::Pending, TaskStatus::Start],
            )
            .await?)
    }

    /// Operator override of an init task's status.
    pub async fn update_init_task_status(
        &self,
        enterprise_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<TaskRecord> {
        let updated = self
            .persistence
            .update_task_status(TaskKind::InitRainbond, enterprise_id, task_id, status)
            .await?;
        if !updated {
            return Err(Error::NotFound(format!("init task {}", task_id)));
        }
        info!(enterprise_id, task_id, status = %status, "Init task status overridden");
        self.task(TaskKind::InitRainbond, enterprise_id, task_id).await
    }

    /// Latest update task of a cluster.
    pub async fn get_update_task(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
        provider_name: Option<&str>,
    ) -> Result<TaskRecord> {
        self.latest_for_cluster(
            TaskKind::UpdateKubernetes,
            enterprise_id,
            cluster_id,
            provider_name,
        )
        .await
    }

    async fn task(&self, kind: TaskKind, enterprise_id: &str, task_id: &str) -> Result<TaskRecord> {
        self.persistence
            .get_task(kind, enterprise_id, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} task {}", kind, task_id)))
    }

    async fn latest_for_cluster(
        &self,
        kind: TaskKind,
        enterprise_id: &str,
        cluster_id: &str,
        provider_name: Option<&str>,
    ) -> Result<TaskRecord> {
        self.persistence
            .latest_task(
                kind,
                enterprise_id,
                TaskQuery {
                    provider_name: provider_name.filter(|p| !p.is_empty()),
                    cluster_id: Some(cluster_id),
                },
            )
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} task of cluster {}", kind, cluster_id)))
    }
}
