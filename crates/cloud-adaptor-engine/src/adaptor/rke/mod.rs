// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! On-premise clusters installed with RKE over SSH.
//!
//! Each cluster owns `<config_dir>/rke/<name>/` holding `cluster.yml`, the
//! installer state, `kube_config_cluster.yml` and `create.log`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cloud_adaptor_core::model::{
    Cluster, ClusterState, ConfigNode, DEFAULT_NETWORK_PLUGIN, DEFAULT_POD_CIDR,
    DEFAULT_SERVICE_CIDR, NodeListError, RkeCluster, validate_node_roles,
};
use cloud_adaptor_core::persistence::Persistence;
use cloud_adaptor_core::steps;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::custom::gateway_eips;
use super::{ClusterProbe, CloudAdaptor, ExpansionNodeRequest, KubernetesClusterConfig, Provider};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::operator::kube::kubeconfig_server;
use crate::operator::{NodeInfo, RainbondInitConfig};
use crate::task::StepEmitter;

pub mod installer;
pub mod manifest;
pub mod ssh;

pub use installer::{ClusterInstaller, RkeBinary};

/// Adaptor for the `rke` provider.
pub struct RkeAdaptor {
    persistence: Arc<dyn Persistence>,
    probe: ClusterProbe,
    installer: Arc<dyn ClusterInstaller>,
    settings: Arc<EngineConfig>,
    ssh_dir: Option<PathBuf>,
}

impl RkeAdaptor {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        probe: ClusterProbe,
        installer: Arc<dyn ClusterInstaller>,
        settings: Arc<EngineConfig>,
    ) -> Self {
        Self {
            persistence,
            probe,
            installer,
            settings,
            ssh_dir: None,
        }
    }

    pub fn with_ssh_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ssh_dir = Some(dir.into());
        self
    }

    async fn record(&self, enterprise_id: &str, cluster_id: &str) -> Result<RkeCluster> {
        self.persistence
            .get_rke_cluster(enterprise_id, cluster_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("cluster {}", cluster_id)))
    }

    async fn hydrate(&self, record: &RkeCluster) -> Cluster {
        self.probe
            .hydrate(to_cluster(record), probe_kubeconfig(record))
            .await
    }

    /// Write the manifest and run the installer for the record's node list.
    /// The record ends `running` with a kubeconfig, or `failed`.
    async fn install(
        &self,
        cancel: &CancellationToken,
        record: &mut RkeCluster,
        dir: &Path,
        step: &str,
        emitter: &StepEmitter,
    ) -> Result<Cluster> {
        emitter
            .start(
                step,
                format!("installing kubernetes on {} nodes", record.node_list.len()),
            )
            .await;

        match self.run_installer(cancel, record, dir).await {
            Ok(kubeconfig) => {
                record.api_url = kubeconfig_server(&kubeconfig).unwrap_or_default();
                record.kube_config = kubeconfig;
                record.state = ClusterState::Running;
                self.persistence.save_rke_cluster(record).await?;
                info!(
                    enterprise_id = %record.enterprise_id,
                    cluster_id = %record.cluster_id,
                    api_url = %record.api_url,
                    "RKE cluster is running"
                );
                emitter.success(step, "kubernetes cluster is running").await;
                Ok(self.hydrate(record).await)
            }
            Err(e) => {
                record.state = ClusterState::Failed;
                if let Err(save_err) = self.persistence.save_rke_cluster(record).await {
                    error!(
                        cluster_id = %record.cluster_id,
                        error = %save_err,
                        "Failed to mark RKE cluster failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_installer(
        &self,
        cancel: &CancellationToken,
        record: &RkeCluster,
        dir: &Path,
    ) -> Result<String> {
        tokio::fs::create_dir_all(dir).await?;
        let ssh_dir = match &self.ssh_dir {
            Some(dir) => dir.clone(),
            None => ssh::default_ssh_dir()?,
        };
        let keypair = ssh::ensure_keypair(ssh_dir).await?;
        let manifest = manifest::build_manifest(record, &keypair.private_key_path);
        manifest::write_manifest(dir, &manifest).await?;
        self.installer.up(cancel, dir).await
    }
}

fn to_cluster(record: &RkeCluster) -> Cluster {
    Cluster {
        cluster_id: record.cluster_id.clone(),
        name: record.name.clone(),
        enterprise_id: record.enterprise_id.clone(),
        provider_name: Provider::Rke.to_string(),
        state: record.state,
        kubernetes_version: record.kubernetes_version.clone(),
        master_endpoint: record.api_url.clone(),
        pod_cidr: record.pod_cidr.clone(),
        service_cidr: record.service_cidr.clone(),
        network_plugin: record.network_plugin.clone(),
        size_nodes: record.node_list.len() as u32,
        create_log_path: record.create_log_path.clone(),
        created_at: Some(record.created_at),
        ..Default::default()
    }
}

/// Only running clusters are worth a live probe.
fn probe_kubeconfig(record: &RkeCluster) -> Option<&str> {
    (record.state == ClusterState::Running && !record.kube_config.is_empty())
        .then_some(record.kube_config.as_str())
}

fn node_list_error(err: NodeListError) -> Error {
    match err {
        NodeListError::MissingRole(_) => Error::ClusterNodeRoleMiss(err.to_string()),
        other => Error::IncorrectRkeConfig(other.to_string()),
    }
}

fn or_default(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// Reject node lists RKE cannot install.
pub fn validate_nodes(nodes: &[ConfigNode]) -> Result<()> {
    if nodes.is_empty() {
        return Err(Error::IncorrectRkeConfig("node list is empty".to_string()));
    }
    validate_node_roles(nodes).map_err(node_list_error)
}

/// Reject cluster names that are not DNS labels.
///
/// The name doubles as the directory of the cluster state, so `/`, `.` and
/// uppercase never get through.
pub fn validate_cluster_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    let edge_ok = |b: Option<&u8>| b.is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    let valid = !bytes.is_empty()
        && bytes.len() <= 63
        && edge_ok(bytes.first())
        && edge_ok(bytes.last())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-');
    if !valid {
        return Err(Error::ConfigInvalid(format!(
            "cluster name {:?} must be a lowercase DNS label",
            name
        )));
    }
    Ok(())
}

fn apply_nodes(record: &mut RkeCluster, nodes: &[ConfigNode]) -> Result<()> {
    validate_nodes(nodes)?;
    record.set_nodes(nodes.to_vec()).map_err(node_list_error)
}

#[async_trait]
impl CloudAdaptor for RkeAdaptor {
    fn provider(&self) -> Provider {
        Provider::Rke
    }

    async fn list_clusters(&self, enterprise_id: &str) -> Result<Vec<Cluster>> {
        let records = self.persistence.list_rke_clusters(enterprise_id).await?;
        let items = records
            .iter()
            .map(|r| (to_cluster(r), probe_kubeconfig(r).map(str::to_string)))
            .collect();
        Ok(self.probe.hydrate_all(items).await)
    }

    async fn describe_cluster(&self, enterprise_id: &str, cluster_id: &str) -> Result<Cluster> {
        let record = self.record(enterprise_id, cluster_id).await?;
        Ok(self.hydrate(&record).await)
    }

    async fn create_rainbond_kubernetes(
        &self,
        cancel: &CancellationToken,
        enterprise_id: &str,
        config: &KubernetesClusterConfig,
        emitter: &StepEmitter,
    ) -> Result<Cluster> {
        let dir = self.settings.rke_cluster_dir(&config.cluster_name)?;
        let existing = self
            .persistence
            .get_rke_cluster(enterprise_id, &config.cluster_id)
            .await?;

        let mut record = match existing {
            Some(record) => {
                if record.state == ClusterState::Failed && dir.exists() {
                    warn!(dir = %dir.display(), "Clearing state of failed RKE install");
                    tokio::fs::remove_dir_all(&dir).await?;
                }
                record
            }
            None => RkeCluster {
                cluster_id: config.cluster_id.clone(),
                name: config.cluster_name.clone(),
                enterprise_id: enterprise_id.to_string(),
                state: ClusterState::Initial,
                kubernetes_version: config.kubernetes_version.clone(),
                network_plugin: or_default(&config.network_plugin, DEFAULT_NETWORK_PLUGIN),
                pod_cidr: or_default(&config.pod_cidr, DEFAULT_POD_CIDR),
                service_cidr: or_default(&config.service_cidr, DEFAULT_SERVICE_CIDR),
                node_list: Vec::new(),
                kube_config: String::new(),
                api_url: String::new(),
                create_log_path: dir.join(installer::LOG_FILE).display().to_string(),
                created_at: Utc::now(),
            },
        };

        apply_nodes(&mut record, &config.nodes)?;
        record.state = ClusterState::Installing;
        self.persistence.save_rke_cluster(&record).await?;

        self.install(cancel, &mut record, &dir, steps::INSTALL_KUBERNETES, emitter)
            .await
    }

    async fn get_kube_config(&self, enterprise_id: &str, cluster_id: &str) -> Result<String> {
        let record = self.record(enterprise_id, cluster_id).await?;
        if record.kube_config.is_empty() {
            return Err(Error::NotFound(format!("kubeconfig of cluster {}", cluster_id)));
        }
        Ok(record.kube_config)
    }

    async fn delete_cluster(&self, enterprise_id: &str, cluster_id: &str) -> Result<()> {
        let record = self.record(enterprise_id, cluster_id).await?;
        self.probe
            .ensure_deletable(cluster_id, probe_kubeconfig(&record))
            .await?;
        self.persistence
            .delete_rke_cluster(enterprise_id, cluster_id)
            .await?;
        self.persistence
            .delete_platform_config(enterprise_id, cluster_id)
            .await?;

        match self.settings.rke_cluster_dir(&record.name) {
            Ok(dir) => match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to remove RKE cluster dir")
                }
            },
            Err(e) => warn!(name = %record.name, error = %e, "Leaving RKE state on disk"),
        }
        info!(enterprise_id = %enterprise_id, cluster_id = %cluster_id, "RKE cluster deleted");
        Ok(())
    }

    async fn get_rainbond_init_config(
        &self,
        _cancel: &CancellationToken,
        _enterprise_id: &str,
        _cluster: &Cluster,
        gateway_nodes: &[NodeInfo],
        _chaos_nodes: &[NodeInfo],
        _emitter: &StepEmitter,
    ) -> Result<RainbondInitConfig> {
        Ok(RainbondInitConfig {
            eips: gateway_eips(gateway_nodes),
            ..Default::default()
        })
    }

    async fn expansion_node(
        &self,
        cancel: &CancellationToken,
        enterprise_id: &str,
        request: &ExpansionNodeRequest,
        emitter: &StepEmitter,
    ) -> Result<Option<Cluster>> {
        let mut record = self.record(enterprise_id, &request.cluster_id).await?;
        apply_nodes(&mut record, &request.nodes)?;
        record.state = ClusterState::Installing;
        self.persistence.save_rke_cluster(&record).await?;

        let dir = self.settings.rke_cluster_dir(&record.name)?;
        self.install(cancel, &mut record, &dir, steps::UPDATE_KUBERNETES, emitter)
            .await
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KubeVersionRange;
    use crate::testing::{
        MockConnector, MockInstaller, MockTargetCluster, collect_messages, test_persistence,
    };
    use cloud_adaptor_core::model::{NodeRole, StepStatus};

    const KUBECONFIG: &str = "apiVersion: v1\nclusters:\n- cluster:\n    server: https://10.0.0.1:6443\n  name: local\n";

    struct Fixture {
        adaptor: RkeAdaptor,
        persistence: Arc<dyn Persistence>,
        installer: MockInstaller,
        _dir: tempfile::TempDir,
    }

    async fn fixture(installer: MockInstaller) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let persistence = test_persistence().await;
        let connector = MockConnector::new();
        connector.register(KUBECONFIG, MockTargetCluster::new().with_nodes(1));
        let settings = Arc::new(EngineConfig {
            config_dir: dir.path().join("config"),
            ..Default::default()
        });
        let probe = ClusterProbe::new(Arc::new(connector), KubeVersionRange::default());
        let adaptor = RkeAdaptor::new(
            persistence.clone(),
            probe,
            Arc::new(installer.clone()),
            settings,
        )
        .with_ssh_dir(dir.path().join("ssh"));
        Fixture {
            adaptor,
            persistence,
            installer,
            _dir: dir,
        }
    }

    fn node(ip: &str, roles: &[NodeRole]) -> ConfigNode {
        ConfigNode {
            ip: ip.to_string(),
            internal_ip: String::new(),
            ssh_user: "docker".to_string(),
            ssh_port: 22,
            docker_socket_path: "/var/run/docker.sock".to_string(),
            roles: roles.to_vec(),
        }
    }

    fn config(nodes: Vec<ConfigNode>) -> KubernetesClusterConfig {
        KubernetesClusterConfig {
            cluster_id: "c1".to_string(),
            cluster_name: "prod".to_string(),
            nodes,
            ..Default::default()
        }
    }

    fn all_in_one() -> Vec<ConfigNode> {
        vec![node(
            "10.0.0.1",
            &[NodeRole::Controlplane, NodeRole::Etcd, NodeRole::Worker],
        )]
    }

    #[tokio::test]
    async fn test_create_installs_and_records_kubeconfig() {
        let fx = fixture(MockInstaller::new(KUBECONFIG)).await;
        let (emitter, messages) = collect_messages();

        let cluster = fx
            .adaptor
            .create_rainbond_kubernetes(&CancellationToken::new(), "E1", &config(all_in_one()), &emitter)
            .await
            .expect("create");
        drop(emitter);

        assert_eq!(cluster.state, ClusterState::Running);
        assert_eq!(cluster.master_endpoint, "https://10.0.0.1:6443");
        assert_eq!(fx.installer.runs(), 1);

        let record = fx
            .persistence
            .get_rke_cluster("E1", "c1")
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.state, ClusterState::Running);
        assert_eq!(record.network_plugin, DEFAULT_NETWORK_PLUGIN);
        assert!(record.create_log_path.ends_with("rke/prod/create.log"));

        let messages = messages.await;
        assert_eq!(messages[0].step_type, steps::INSTALL_KUBERNETES);
        assert_eq!(messages[0].status, StepStatus::Start);
        assert_eq!(messages[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_missing_role_is_rejected_before_install() {
        let fx = fixture(MockInstaller::new(KUBECONFIG)).await;
        let (emitter, _messages) = collect_messages();

        let err = fx
            .adaptor
            .create_rainbond_kubernetes(
                &CancellationToken::new(),
                "E1",
                &config(vec![node("10.0.0.1", &[NodeRole::Worker])]),
                &emitter,
            )
            .await
            .unwrap_err();
        assert_eq!(err.name(), "ErrClusterNodeRoleMiss");
        assert_eq!(fx.installer.runs(), 0);
    }

    #[tokio::test]
    async fn test_installer_failure_marks_cluster_failed() {
        let fx = fixture(MockInstaller::failing()).await;
        let (emitter, _messages) = collect_messages();

        fx.adaptor
            .create_rainbond_kubernetes(&CancellationToken::new(), "E1", &config(all_in_one()), &emitter)
            .await
            .unwrap_err();

        let record = fx
            .persistence
            .get_rke_cluster("E1", "c1")
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.state, ClusterState::Failed);

        let cluster = fx.adaptor.describe_cluster("E1", "c1").await.expect("describe");
        assert_eq!(cluster.state, ClusterState::Failed);
        let err = fx.adaptor.get_kube_config("E1", "c1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_expansion_reinstalls_with_new_nodes() {
        let fx = fixture(MockInstaller::new(KUBECONFIG)).await;
        let (emitter, messages) = collect_messages();
        fx.adaptor
            .create_rainbond_kubernetes(&CancellationToken::new(), "E1", &config(all_in_one()), &emitter)
            .await
            .expect("create");

        let mut nodes = all_in_one();
        nodes.push(node("10.0.0.2", &[NodeRole::Worker]));
        let cluster = fx
            .adaptor
            .expansion_node(
                &CancellationToken::new(),
                "E1",
                &ExpansionNodeRequest {
                    cluster_id: "c1".to_string(),
                    nodes,
                },
                &emitter,
            )
            .await
            .expect("expand")
            .expect("cluster");
        drop(emitter);

        assert_eq!(fx.installer.runs(), 2);
        let record = fx
            .persistence
            .get_rke_cluster("E1", "c1")
            .await
            .expect("get")
            .expect("record");
        assert_eq!(record.node_list.len(), 2);
        assert_eq!(cluster.state, ClusterState::Running);

        let messages = messages.await;
        assert!(
            messages
                .iter()
                .any(|m| m.step_type == steps::UPDATE_KUBERNETES && m.status == StepStatus::Success)
        );
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_dir() {
        let fx = fixture(MockInstaller::new(KUBECONFIG)).await;
        let (emitter, _messages) = collect_messages();
        fx.adaptor
            .create_rainbond_kubernetes(&CancellationToken::new(), "E1", &config(all_in_one()), &emitter)
            .await
            .expect("create");
        let dir = fx.adaptor.settings.rke_cluster_dir("prod").expect("dir");
        assert!(dir.join(installer::CLUSTER_FILE).exists());

        fx.adaptor.delete_cluster("E1", "c1").await.expect("delete");
        assert!(fx.persistence.get_rke_cluster("E1", "c1").await.expect("get").is_none());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_delete_never_escapes_state_dir() {
        let fx = fixture(MockInstaller::new(KUBECONFIG)).await;
        let config_dir = fx.adaptor.settings.config_dir.clone();
        let keep = config_dir.join("rke").join("other");
        std::fs::create_dir_all(&keep).expect("mkdir");
        std::fs::write(config_dir.join("marker"), "x").expect("write");
        fx.persistence
            .save_rke_cluster(&RkeCluster {
                cluster_id: "c9".to_string(),
                name: "..".to_string(),
                enterprise_id: "E1".to_string(),
                state: ClusterState::Failed,
                kubernetes_version: String::new(),
                network_plugin: DEFAULT_NETWORK_PLUGIN.to_string(),
                pod_cidr: DEFAULT_POD_CIDR.to_string(),
                service_cidr: DEFAULT_SERVICE_CIDR.to_string(),
                node_list: Vec::new(),
                kube_config: String::new(),
                api_url: String::new(),
                create_log_path: String::new(),
                created_at: Utc::now(),
            })
            .await
            .expect("save");

        fx.adaptor.delete_cluster("E1", "c9").await.expect("delete");
        assert!(fx.persistence.get_rke_cluster("E1", "c9").await.expect("get").is_none());
        assert!(keep.exists());
        assert!(config_dir.join("marker").exists());
    }

    #[tokio::test]
    async fn test_unreachable_cluster_is_kept() {
        let fx = fixture(MockInstaller::new("kc-elsewhere")).await;
        let (emitter, _messages) = collect_messages();
        fx.adaptor
            .create_rainbond_kubernetes(&CancellationToken::new(), "E1", &config(all_in_one()), &emitter)
            .await
            .expect("create");
        let dir = fx.adaptor.settings.rke_cluster_dir("prod").expect("dir");

        let err = fx.adaptor.delete_cluster("E1", "c1").await.unwrap_err();
        assert_eq!(err.name(), "ErrorKubeAPI");
        assert!(fx.persistence.get_rke_cluster("E1", "c1").await.expect("get").is_some());
        assert!(dir.exists());
    }

    #[test]
    fn test_cluster_name_is_dns_label() {
        for name in ["prod", "p1", "a-b-c", "0x"] {
            assert!(validate_cluster_name(name).is_ok(), "{}", name);
        }
        let long = "a".repeat(64);
        for name in ["", ".", "..", "a/b", "a.b", "-a", "a-", "Prod", long.as_str()] {
            let err = validate_cluster_name(name).unwrap_err();
            assert_eq!(err.name(), "ErrConfigInvalid", "{:?}", name);
        }
    }
}
