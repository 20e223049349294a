// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Imported clusters backed by a user-supplied kubeconfig.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cloud_adaptor_core::model::{Cluster, ClusterState, CustomCluster};
use cloud_adaptor_core::persistence::Persistence;
use cloud_adaptor_core::steps;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ClusterProbe, CloudAdaptor, KubernetesClusterConfig, Provider};
use crate::error::{Error, Result};
use crate::operator::{NodeInfo, RainbondInitConfig};
use crate::task::StepEmitter;

/// Adaptor for the `custom` provider.
pub struct CustomAdaptor {
    persistence: Arc<dyn Persistence>,
    probe: ClusterProbe,
}

impl CustomAdaptor {
    pub fn new(persistence: Arc<dyn Persistence>, probe: ClusterProbe) -> Self {
        Self { persistence, probe }
    }

    async fn record(&self, enterprise_id: &str, cluster_id: &str) -> Result<CustomCluster> {
        self.persistence
            .get_custom_cluster(enterprise_id, cluster_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("cluster {}", cluster_id)))
    }
}

fn to_cluster(record: &CustomCluster) -> Cluster {
    Cluster {
        cluster_id: record.cluster_id.clone(),
        name: record.name.clone(),
        enterprise_id: record.enterprise_id.clone(),
        provider_name: Provider::Custom.to_string(),
        state: ClusterState::Running,
        eips: record.eips.clone(),
        created_at: Some(record.created_at),
        ..Default::default()
    }
}

#[async_trait]
impl CloudAdaptor for CustomAdaptor {
    fn provider(&self) -> Provider {
        Provider::Custom
    }

    async fn list_clusters(&self, enterprise_id: &str) -> Result<Vec<Cluster>> {
        let records = self.persistence.list_custom_clusters(enterprise_id).await?;
        let items = records
            .iter()
            .map(|r| (to_cluster(r), Some(r.kube_config.clone())))
            .collect();
        Ok(self.probe.hydrate_all(items).await)
    }

    async fn describe_cluster(&self, enterprise_id: &str, cluster_id: &str) -> Result<Cluster> {
        let record = self.record(enterprise_id, cluster_id).await?;
        Ok(self
            .probe
            .hydrate(to_cluster(&record), Some(&record.kube_config))
            .await)
    }

    async fn create_rainbond_kubernetes(
        &self,
        _cancel: &CancellationToken,
        enterprise_id: &str,
        config: &KubernetesClusterConfig,
        emitter: &StepEmitter,
    ) -> Result<Cluster> {
        emitter
            .start(steps::CREATE_CLUSTER, "importing cluster from kubeconfig")
            .await;
        if config.kubeconfig.trim().is_empty() {
            return Err(Error::KubeConfigCannotEmpty);
        }

        let target = self.probe.connector().connect(&config.kubeconfig).await?;
        let version = target.server_version().await?;

        let record = CustomCluster {
            cluster_id: config.cluster_id.clone(),
            name: config.cluster_name.clone(),
            enterprise_id: enterprise_id.to_string(),
            kube_config: config.kubeconfig.clone(),
            eips: config.eips.clone(),
            created_at: Utc::now(),
        };
        self.persistence.save_custom_cluster(&record).await?;
        info!(
            enterprise_id = %enterprise_id,
            cluster_id = %record.cluster_id,
            version = %version,
            "Custom cluster imported"
        );

        emitter
            .success(
                steps::CREATE_CLUSTER,
                format!("cluster imported, kubernetes {}", version),
            )
            .await;
        Ok(self
            .probe
            .hydrate(to_cluster(&record), Some(&record.kube_config))
            .await)
    }

    async fn get_kube_config(&self, enterprise_id: &str, cluster_id: &str) -> Result<String> {
        Ok(self.record(enterprise_id, cluster_id).await?.kube_config)
    }

    async fn delete_cluster(&self, enterprise_id: &str, cluster_id: &str) -> Result<()> {
        let record = self.record(enterprise_id, cluster_id).await?;
        self.probe
            .ensure_deletable(cluster_id, Some(&record.kube_config))
            .await?;
        self.persistence
            .delete_custom_cluster(enterprise_id, cluster_id)
            .await?;
        self.persistence
            .delete_platform_config(enterprise_id, cluster_id)
            .await?;
        info!(enterprise_id = %enterprise_id, cluster_id = %cluster_id, "Custom cluster deleted");
        Ok(())
    }

    async fn get_rainbond_init_config(
        &self,
        _cancel: &CancellationToken,
        enterprise_id: &str,
        cluster: &Cluster,
        gateway_nodes: &[NodeInfo],
        _chaos_nodes: &[NodeInfo],
        _emitter: &StepEmitter,
    ) -> Result<RainbondInitConfig> {
        let record = self.record(enterprise_id, &cluster.cluster_id).await?;
        let eips = if record.eips.is_empty() {
            gateway_eips(gateway_nodes)
        } else {
            record.eips
        };
        Ok(RainbondInitConfig {
            eips,
            ..Default::default()
        })
    }
}

/// External address of each gateway node, else its internal one.
pub(crate) fn gateway_eips(nodes: &[NodeInfo]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|n| {
            [&n.external_ip, &n.internal_ip]
                .into_iter()
                .find(|ip| !ip.is_empty())
                .cloned()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KubeVersionRange;
    use crate::testing::{MockConnector, MockTargetCluster, collect_messages, test_persistence};
    use cloud_adaptor_core::model::StepStatus;

    async fn adaptor(connector: MockConnector) -> (CustomAdaptor, Arc<dyn Persistence>) {
        let persistence = test_persistence().await;
        let probe = ClusterProbe::new(Arc::new(connector), KubeVersionRange::default());
        (CustomAdaptor::new(persistence.clone(), probe), persistence)
    }

    fn config(kubeconfig: &str) -> KubernetesClusterConfig {
        KubernetesClusterConfig {
            cluster_id: "c1".to_string(),
            cluster_name: "c1".to_string(),
            kubeconfig: kubeconfig.to_string(),
            eips: vec!["1.2.3.4".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_import_stores_record() {
        let connector = MockConnector::new();
        connector.register("kc", MockTargetCluster::new().with_nodes(2));
        let (adaptor, persistence) = adaptor(connector).await;

        let (emitter, messages) = collect_messages();
        let cluster = adaptor
            .create_rainbond_kubernetes(&CancellationToken::new(), "E1", &config("kc"), &emitter)
            .await
            .expect("import");
        drop(emitter);

        assert_eq!(cluster.state, ClusterState::Running);
        assert_eq!(cluster.size_nodes, 2);
        assert_eq!(cluster.eips, vec!["1.2.3.4"]);
        assert!(persistence.get_custom_cluster("E1", "c1").await.expect("get").is_some());

        let messages = messages.await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].step_type, steps::CREATE_CLUSTER);
        assert_eq!(messages[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_import_rejects_empty_kubeconfig() {
        let (adaptor, _) = adaptor(MockConnector::new()).await;
        let (emitter, _messages) = collect_messages();
        let err = adaptor
            .create_rainbond_kubernetes(&CancellationToken::new(), "E1", &config("  "), &emitter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KubeConfigCannotEmpty));
    }

    #[tokio::test]
    async fn test_delete_blocked_while_platform_installed() {
        let target = MockTargetCluster::new();
        let connector = MockConnector::new();
        connector.register("kc", target.clone());
        let (adaptor, persistence) = adaptor(connector).await;
        let (emitter, _messages) = collect_messages();
        adaptor
            .create_rainbond_kubernetes(&CancellationToken::new(), "E1", &config("kc"), &emitter)
            .await
            .expect("import");

        target.set_platform_installed(true);
        let err = adaptor.delete_cluster("E1", "c1").await.unwrap_err();
        assert_eq!(err.name(), "ErrClusterNotAllowDelete");

        target.set_platform_installed(false);
        persistence
            .put_platform_config("E1", "c1", "enableHA: true")
            .await
            .expect("put config");
        adaptor.delete_cluster("E1", "c1").await.expect("delete");
        assert!(persistence.get_custom_cluster("E1", "c1").await.expect("get").is_none());
        assert!(persistence.get_platform_config("E1", "c1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_kept() {
        let (adaptor, persistence) = adaptor(MockConnector::new()).await;
        persistence
            .save_custom_cluster(&CustomCluster {
                cluster_id: "c1".to_string(),
                name: "c1".to_string(),
                enterprise_id: "E1".to_string(),
                kube_config: "kc-gone".to_string(),
                eips: Vec::new(),
                created_at: Utc::now(),
            })
            .await
            .expect("save");

        let err = adaptor.delete_cluster("E1", "c1").await.unwrap_err();
        assert_eq!(err.name(), "ErrorKubeAPI");
        assert!(persistence.get_custom_cluster("E1", "c1").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_describe_unknown_cluster() {
        let (adaptor, _) = adaptor(MockConnector::new()).await;
        let err = adaptor.describe_cluster("E1", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_gateway_eips_prefer_external() {
        let nodes = vec![
            NodeInfo {
                external_ip: "1.1.1.1".to_string(),
                internal_ip: "10.0.0.1".to_string(),
                ..Default::default()
            },
            NodeInfo {
                internal_ip: "10.0.0.2".to_string(),
                ..Default::default()
            },
        ];
        assert_eq!(gateway_eips(&nodes), vec!["1.1.1.1", "10.0.0.2"]);
    }
}
