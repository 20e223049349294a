// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Platform operator driver.
//!
//! Installs the platform control plane onto a ready Kubernetes cluster through
//! the operator chart and its custom resources, reports readiness snapshots
//! and uninstalls it again. The Kubernetes side sits behind two traits:
//!
//! - [`KubeConnector`] turns a kubeconfig into a [`TargetCluster`]
//! - [`TargetCluster`] is everything the engine does against one cluster
//!
//! [`kube::KubeClusterConnector`] is the real implementation; tests use the
//! mocks in [`crate::testing`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

mod cluster_spec;
pub mod crd;
pub mod helm;
pub mod kube;
pub mod suffix;

pub use cluster_spec::{build_cluster_spec, merge_json};

/// Namespace the platform lives in.
pub const NAMESPACE: &str = "rbd-system";
/// ConfigMap whose presence marks an installed platform.
pub const REGION_CONFIG: &str = "region-config";
/// Operator deployment, helm release and clusterrolebinding name.
pub const OPERATOR_NAME: &str = "rainbond-operator";
/// Node annotation selecting gateway nodes.
pub const GATEWAY_NODE_ANNOTATION: &str = "rainbond.io/gateway-node";
/// Node annotation selecting chaos (CI) nodes.
pub const CHAOS_NODE_ANNOTATION: &str = "rainbond.io/chaos-node";
/// Node annotation overriding the external address.
pub const EXTERNAL_ADDRESS_ANNOTATION: &str = "k8s.io/externalAddressAnnotation";

/// A node of the target cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub internal_ip: String,
    pub external_ip: String,
    pub annotations: BTreeMap<String, String>,
    pub ready: bool,
}

impl NodeInfo {
    fn flagged(&self, annotation: &str) -> bool {
        self.annotations.get(annotation).map(String::as_str) == Some("true")
    }

    /// Node as written into the cluster custom resource.
    pub fn to_k8s_node(&self) -> crd::K8sNode {
        crd::K8sNode {
            name: self.name.clone(),
            internal_ip: self.internal_ip.clone(),
            external_ip: self.external_ip.clone(),
        }
    }
}

/// Nodes annotated with `annotation=true`, else the first two nodes.
pub fn select_nodes(nodes: &[NodeInfo], annotation: &str) -> Vec<NodeInfo> {
    let flagged: Vec<NodeInfo> = nodes
        .iter()
        .filter(|n| n.flagged(annotation))
        .cloned()
        .collect();
    if !flagged.is_empty() {
        return flagged;
    }
    nodes.iter().take(2).cloned().collect()
}

/// Dependent resources a provider prepared for the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RainbondInitConfig {
    pub enable_ha: bool,
    /// Public addresses in front of the gateway nodes.
    pub eips: Vec<String>,
    pub region_database: Option<crd::Database>,
    /// NFS mount domain backing the read-write-many volume.
    pub nas_server: Option<String>,
    /// Block storage class backing the read-write-once volume.
    pub rwo_storage_class: Option<String>,
}

/// Contents of `rbd-system/region-config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub entries: BTreeMap<String, String>,
}

impl RegionConfig {
    pub fn api_address(&self) -> Option<&str> {
        self.get("apiAddress")
    }

    pub fn ca_pem(&self) -> Option<&str> {
        self.get("ca.pem")
    }

    pub fn client_pem(&self) -> Option<&str> {
        self.get("client.pem")
    }

    pub fn client_key_pem(&self) -> Option<&str> {
        self.get("client.key.pem")
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Readiness snapshot of an installation.
#[derive(Debug, Clone, Default)]
pub struct PlatformStatus {
    /// Operator deployment has at least one ready replica.
    pub operator_ready: bool,
    pub cluster: Option<crd::RainbondCluster>,
    pub package: Option<crd::RainbondPackage>,
    pub volume: Option<crd::RainbondVolume>,
    pub region_config: Option<RegionConfig>,
}

impl PlatformStatus {
    /// Image hub domain once the operator has filled it in.
    pub fn image_hub_domain(&self) -> Option<&str> {
        self.cluster
            .as_ref()?
            .spec
            .image_hub
            .as_ref()
            .map(|hub| hub.domain.as_str())
            .filter(|d| !d.is_empty())
    }

    pub fn package_completed(&self) -> bool {
        self.package.as_ref().is_some_and(|p| p.is_completed())
    }
}

/// Everything needed to install the platform onto one cluster.
#[derive(Debug, Clone, Default)]
pub struct PlatformInstall {
    pub enterprise_id: String,
    pub cluster_id: String,
    pub init_config: RainbondInitConfig,
    pub gateway_nodes: Vec<NodeInfo>,
    pub chaos_nodes: Vec<NodeInfo>,
    /// Stored platform override, YAML.
    pub overrides: Option<String>,
}

/// Opens a [`TargetCluster`] from a kubeconfig.
#[async_trait]
pub trait KubeConnector: Send + Sync {
    /// Fails with [`crate::Error::KubeApi`] when the kubeconfig is unusable.
    async fn connect(&self, kubeconfig: &str) -> Result<Arc<dyn TargetCluster>>;
}

/// Operations against one Kubernetes cluster.
#[async_trait]
pub trait TargetCluster: Send + Sync {
    /// Reported server version, e.g. `v1.19.6`.
    async fn server_version(&self) -> Result<String>;

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Whether `rbd-system` holds the `region-config` ConfigMap.
    async fn platform_installed(&self) -> Result<bool>;

    async fn region_config(&self) -> Result<Option<RegionConfig>>;

    /// Run the install protocol up to and including the custom resources.
    async fn install_platform(
        &self,
        cancel: &CancellationToken,
        install: &PlatformInstall,
    ) -> Result<()>;

    /// Snapshot for the readiness loop. A missing cluster, package or volume
    /// resource is reported as [`crate::Error::NotFound`].
    async fn platform_status(&self) -> Result<PlatformStatus>;

    /// HTTPS probe of the regional API with the credentials in `config`.
    async fn region_api_healthy(&self, config: &RegionConfig) -> bool;

    /// Remove the platform and wait for its namespace to disappear.
    async fn uninstall_platform(&self, cancel: &CancellationToken) -> Result<()>;
}
