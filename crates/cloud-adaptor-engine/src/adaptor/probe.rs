// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reachability and platform probes for listed clusters.

use std::sync::Arc;
use std::time::Duration;

use cloud_adaptor_core::model::{Cluster, ClusterState};
use futures::future::join_all;
use tracing::debug;

use crate::config::KubeVersionRange;
use crate::error::{Error, Result};
use crate::operator::KubeConnector;
use crate::operator::kube::kubeconfig_server;

/// Per-probe deadline.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

struct Observation {
    platform_installed: bool,
    version: String,
    node_count: usize,
}

/// Fills the derived fields of a [`Cluster`] from its live API.
#[derive(Clone)]
pub struct ClusterProbe {
    connector: Arc<dyn KubeConnector>,
    versions: KubeVersionRange,
    timeout: Duration,
}

impl ClusterProbe {
    pub fn new(connector: Arc<dyn KubeConnector>, versions: KubeVersionRange) -> Self {
        Self {
            connector,
            versions,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connector(&self) -> &Arc<dyn KubeConnector> {
        &self.connector
    }

    async fn observe(&self, kubeconfig: &str) -> Result<Observation> {
        let target = self.connector.connect(kubeconfig).await?;
        let platform_installed = target.platform_installed().await?;
        let version = target.server_version().await?;
        let node_count = target.list_nodes().await?.len();
        Ok(Observation {
            platform_installed,
            version,
            node_count,
        })
    }

    /// Probe one cluster. A running cluster that does not answer within the
    /// deadline is reported `offline`.
    pub async fn hydrate(&self, mut cluster: Cluster, kubeconfig: Option<&str>) -> Cluster {
        if let Some(kubeconfig) = kubeconfig.filter(|k| !k.is_empty()) {
            if cluster.master_endpoint.is_empty()
                && let Some(server) = kubeconfig_server(kubeconfig)
            {
                cluster.master_endpoint = server;
            }

            let observed = tokio::time::timeout(self.timeout, self.observe(kubeconfig))
                .await
                .unwrap_or_else(|_| Err(Error::Timeout("cluster probe".to_string())));
            match observed {
                Ok(obs) => {
                    cluster.platform_installed = obs.platform_installed;
                    if !obs.version.is_empty() {
                        cluster.kubernetes_version = obs.version;
                    }
                    cluster.size_nodes = obs.node_count as u32;
                }
                Err(e) => {
                    debug!(cluster_id = %cluster.cluster_id, error = %e, "Cluster probe failed");
                    if cluster.state == ClusterState::Running {
                        cluster.state = ClusterState::Offline;
                    }
                }
            }
        }

        cluster.disable_rainbond_init = !cluster.kubernetes_version.is_empty()
            && !self.versions.contains(&cluster.kubernetes_version);
        cluster
    }

    /// Refuse to delete a cluster that runs the platform or cannot be asked.
    ///
    /// Without a kubeconfig there is nothing to ask and the delete proceeds.
    pub async fn ensure_deletable(&self, cluster_id: &str, kubeconfig: Option<&str>) -> Result<()> {
        let Some(kubeconfig) = kubeconfig.filter(|k| !k.is_empty()) else {
            return Ok(());
        };
        let check = async {
            let target = self.connector.connect(kubeconfig).await?;
            target.platform_installed().await
        };
        match tokio::time::timeout(self.timeout, check).await {
            Ok(Ok(false)) => Ok(()),
            Ok(Ok(true)) => Err(Error::ClusterNotAllowDelete(cluster_id.to_string())),
            Ok(Err(e)) => Err(Error::KubeApi(format!(
                "cannot tell whether cluster {} runs the platform: {}",
                cluster_id, e
            ))),
            Err(_) => Err(Error::KubeApi(format!(
                "cluster {} did not answer within {:?}",
                cluster_id, self.timeout
            ))),
        }
    }

    /// Probe many clusters concurrently.
    pub async fn hydrate_all(&self, clusters: Vec<(Cluster, Option<String>)>) -> Vec<Cluster> {
        join_all(
            clusters
                .into_iter()
                .map(|(cluster, kubeconfig)| async move {
                    self.hydrate(cluster, kubeconfig.as_deref()).await
                }),
        )
        .await
    }
}
