// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Platform init: check the cluster, prepare provider resources, install the
//! operator and follow the installation until the regional API answers.

use std::sync::Arc;
use std::time::Duration;

use cloud_adaptor_core::model::{ClusterState, StepStatus};
use cloud_adaptor_core::persistence::Persistence;
use cloud_adaptor_core::steps;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::StepEmitter;
use crate::adaptor::CloudAdaptor;
use crate::error::{Error, Result};
use crate::operator::{
    CHAOS_NODE_ANNOTATION, GATEWAY_NODE_ANNOTATION, KubeConnector, PlatformInstall,
    PlatformStatus, TargetCluster, select_nodes,
};

/// Readiness poll interval.
pub const INIT_TICK: Duration = Duration::from_secs(5);
/// Readiness deadline.
pub const INIT_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Which readiness milestones have been reported so far.
///
/// Milestones are reported in order and each exactly once, so a snapshot that
/// is already fully ready yields every transition at once.
#[derive(Debug, Default)]
pub struct InitProgress {
    operator: bool,
    image_hub: bool,
    package: bool,
}

impl InitProgress {
    /// Events implied by a new snapshot.
    pub fn observe(&mut self, status: &PlatformStatus) -> Vec<(&'static str, StepStatus, String)> {
        let mut events = Vec::new();
        if !self.operator && status.operator_ready {
            self.operator = true;
            events.push((
                steps::INIT_REGION_OPERATOR,
                StepStatus::Success,
                "operator is running".to_string(),
            ));
            events.push((
                steps::INIT_REGION_IMAGE_HUB,
                StepStatus::Start,
                "waiting for the image hub".to_string(),
            ));
        }
        if self.operator
            && !self.image_hub
            && let Some(domain) = status.image_hub_domain()
        {
            self.image_hub = true;
            events.push((
                steps::INIT_REGION_IMAGE_HUB,
                StepStatus::Success,
                format!("image hub {} is ready", domain),
            ));
            events.push((
                steps::INIT_REGION_PACKAGE,
                StepStatus::Start,
                "handling platform images".to_string(),
            ));
        }
        if self.image_hub && !self.package && status.package_completed() {
            self.package = true;
            events.push((
                steps::INIT_REGION_PACKAGE,
                StepStatus::Success,
                "platform images are ready".to_string(),
            ));
            events.push((
                steps::INIT_REGION_CONFIG,
                StepStatus::Start,
                "waiting for the region api".to_string(),
            ));
        }
        events
    }

    pub fn package_ready(&self) -> bool {
        self.package
    }
}

/// Install the platform onto one cluster.
pub struct InitTask {
    adaptor: Arc<dyn CloudAdaptor>,
    connector: Arc<dyn KubeConnector>,
    persistence: Arc<dyn Persistence>,
    enterprise_id: String,
    cluster_id: String,
    tick: Duration,
    deadline: Duration,
}

impl InitTask {
    pub fn new(
        adaptor: Arc<dyn CloudAdaptor>,
        connector: Arc<dyn KubeConnector>,
        persistence: Arc<dyn Persistence>,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Self {
        Self {
            adaptor,
            connector,
            persistence,
            enterprise_id: enterprise_id.to_string(),
            cluster_id: cluster_id.to_string(),
            tick: INIT_TICK,
            deadline: INIT_DEADLINE,
        }
    }

    pub fn with_timing(mut self, tick: Duration, deadline: Duration) -> Self {
        self.tick = tick;
        self.deadline = deadline;
        self
    }

    pub(super) async fn run(&self, cancel: &CancellationToken, emitter: &StepEmitter) -> Result<()> {
        emitter.start(steps::INIT, "init region task started").await;
        emitter
            .success(steps::INIT, format!("cluster {}", self.cluster_id))
            .await;

        emitter.start(steps::CHECK_CLUSTER, "checking kubernetes cluster").await;
        let cluster = self
            .adaptor
            .describe_cluster(&self.enterprise_id, &self.cluster_id)
            .await?;
        if cluster.state != ClusterState::Running {
            return Err(Error::ClusterNotReady(format!(
                "cluster state is {}",
                cluster.state
            )));
        }
        if cluster.master_endpoint.is_empty() {
            return Err(Error::ClusterNotReady(
                "cluster has no master endpoint".to_string(),
            ));
        }
        if cluster.disable_rainbond_init {
            return Err(Error::ClusterNotReady(format!(
                "kubernetes version {} is not supported",
                cluster.kubernetes_version
            )));
        }
        let kubeconfig = self
            .adaptor
            .get_kube_config(&self.enterprise_id, &self.cluster_id)
            .await?;
        let target = self.connector.connect(&kubeconfig).await?;
        let nodes = target.list_nodes().await?;
        if nodes.is_empty() {
            return Err(Error::ClusterNotReady("cluster has no nodes".to_string()));
        }
        emitter
            .success(
                steps::CHECK_CLUSTER,
                format!("{} nodes, version {}", nodes.len(), cluster.kubernetes_version),
            )
            .await;

        let gateway_nodes = select_nodes(&nodes, GATEWAY_NODE_ANNOTATION);
        let chaos_nodes = select_nodes(&nodes, CHAOS_NODE_ANNOTATION);
        let init_config = self
            .adaptor
            .get_rainbond_init_config(
                cancel,
                &self.enterprise_id,
                &cluster,
                &gateway_nodes,
                &chaos_nodes,
                emitter,
            )
            .await?;
        let overrides = self
            .persistence
            .get_platform_config(&self.enterprise_id, &self.cluster_id)
            .await?
            .map(|o| o.config);

        emitter
            .start(steps::INIT_REGION_OPERATOR, "installing the region operator")
            .await;
        target
            .install_platform(
                cancel,
                &PlatformInstall {
                    enterprise_id: self.enterprise_id.clone(),
                    cluster_id: self.cluster_id.clone(),
                    init_config,
                    gateway_nodes,
                    chaos_nodes,
                    overrides,
                },
            )
            .await?;

        self.wait_ready(cancel, target.as_ref(), emitter).await?;

        emitter.start(steps::INIT_REGION, "finishing region init").await;
        emitter.success(steps::INIT_REGION, "region is ready").await;
        info!(
            enterprise_id = %self.enterprise_id,
            cluster_id = %self.cluster_id,
            "Region installed"
        );
        Ok(())
    }

    async fn wait_ready(
        &self,
        cancel: &CancellationToken,
        target: &dyn TargetCluster,
        emitter: &StepEmitter,
    ) -> Result<()> {
        let deadline = Instant::now() + self.deadline;
        let mut progress = InitProgress::default();
        loop {
            match target.platform_status().await {
                Ok(status) => {
                    for (step, step_status, message) in progress.observe(&status) {
                        emitter.emit(step, message, step_status).await;
                    }
                    if progress.package_ready()
                        && let Some(config) = &status.region_config
                    {
                        if target.region_api_healthy(config).await {
                            emitter
                                .success(steps::INIT_REGION_CONFIG, "region api is healthy")
                                .await;
                            return Ok(());
                        }
                        debug!(cluster_id = %self.cluster_id, "Region api not healthy yet");
                    }
                }
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    warn!(cluster_id = %self.cluster_id, error = %e, "Failed to read platform status")
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout("region to become ready".to_string()));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
    }
}
