// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provider adaptors.
//!
//! One [`CloudAdaptor`] contract over three provider families:
//!
//! | Provider | Implementation | Credential |
//! |----------|----------------|------------|
//! | `ack` | [`managed::ManagedAdaptor`] over [`managed::aliyun::AliyunVendor`] | required |
//! | `rke` | [`rke::RkeAdaptor`] | none |
//! | `custom` | [`custom::CustomAdaptor`] | none |
//!
//! Adaptors are cheap and stateless per credential; [`AdaptorResolver`]
//! builds one per call.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use cloud_adaptor_core::model::{Cluster, ConfigNode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::operator::{NodeInfo, RainbondInitConfig};
use crate::task::StepEmitter;

pub mod custom;
mod factory;
pub mod managed;
mod probe;
pub mod rke;

pub use factory::{AdaptorFactory, AdaptorResolver, DefaultAdaptorFactory};
pub use probe::{ClusterProbe, PROBE_TIMEOUT};

/// Supported provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Alibaba Cloud managed Kubernetes.
    Ack,
    /// On-premise clusters installed with RKE over SSH.
    Rke,
    /// Imported clusters backed by a user kubeconfig.
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ack => "ack",
            Provider::Rke => "rke",
            Provider::Custom => "custom",
        }
    }

    /// Whether adaptors of this provider need a stored credential.
    pub fn needs_credential(&self) -> bool {
        matches!(self, Provider::Ack)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ack" => Ok(Provider::Ack),
            "rke" => Ok(Provider::Rke),
            "custom" => Ok(Provider::Custom),
            other => Err(Error::ProviderNotSupport(other.to_string())),
        }
    }
}

/// Everything a create task needs to provision or import a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesClusterConfig {
    /// Assigned at submission for RKE and custom; managed clusters get the
    /// vendor's id once created.
    pub cluster_id: String,
    pub cluster_name: String,
    pub region_id: String,
    pub vpc_id: String,
    pub vswitch_id: String,
    pub worker_resource_type: String,
    pub worker_num: u32,
    pub kubernetes_version: String,
    pub network_plugin: String,
    pub pod_cidr: String,
    pub service_cidr: String,
    /// RKE node manifest.
    pub nodes: Vec<ConfigNode>,
    /// Custom clusters: the kubeconfig to import.
    pub kubeconfig: String,
    /// Custom clusters: public addresses of the gateway.
    pub eips: Vec<String>,
}

/// New node manifest for an RKE cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpansionNodeRequest {
    pub cluster_id: String,
    pub nodes: Vec<ConfigNode>,
}

/// Capability set of one provider for one credential.
///
/// Long-running operations take the task's cancellation token and report
/// progress through the emitter. They only emit `start` and `success`; the
/// task turns a returned error into the failure event of the step that was
/// open.
#[async_trait]
pub trait CloudAdaptor: Send + Sync {
    fn provider(&self) -> Provider;

    /// Every cluster visible to the credential, probed in parallel.
    async fn list_clusters(&self, enterprise_id: &str) -> Result<Vec<Cluster>>;

    /// Fully hydrated cluster; [`Error::NotFound`] for an unknown id.
    async fn describe_cluster(&self, enterprise_id: &str, cluster_id: &str) -> Result<Cluster>;

    /// Provision network, subnet and cluster; returns once it is running.
    async fn create_rainbond_kubernetes(
        &self,
        cancel: &CancellationToken,
        enterprise_id: &str,
        config: &KubernetesClusterConfig,
        emitter: &StepEmitter,
    ) -> Result<Cluster>;

    /// Administrative kubeconfig.
    async fn get_kube_config(&self, enterprise_id: &str, cluster_id: &str) -> Result<String>;

    /// Refused with [`Error::ClusterNotAllowDelete`] while the platform is installed.
    async fn delete_cluster(&self, enterprise_id: &str, cluster_id: &str) -> Result<()>;

    /// Provision what the platform depends on (database, file storage, load
    /// balancer, security group).
    async fn get_rainbond_init_config(
        &self,
        cancel: &CancellationToken,
        enterprise_id: &str,
        cluster: &Cluster,
        gateway_nodes: &[NodeInfo],
        chaos_nodes: &[NodeInfo],
        emitter: &StepEmitter,
    ) -> Result<RainbondInitConfig>;

    /// Re-run the installer with a new node list. Only RKE does anything.
    async fn expansion_node(
        &self,
        _cancel: &CancellationToken,
        _enterprise_id: &str,
        _request: &ExpansionNodeRequest,
        _emitter: &StepEmitter,
    ) -> Result<Option<Cluster>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("ack".parse::<Provider>().expect("ack"), Provider::Ack);
        assert_eq!("rke".parse::<Provider>().expect("rke"), Provider::Rke);
        assert_eq!("custom".parse::<Provider>().expect("custom"), Provider::Custom);

        let err = "gke".parse::<Provider>().unwrap_err();
        assert_eq!(err.name(), "ErrorProviderNotSupport");
    }

    #[test]
    fn test_only_managed_needs_credential() {
        assert!(Provider::Ack.needs_credential());
        assert!(!Provider::Rke.needs_credential());
        assert!(!Provider::Custom.needs_credential());
    }

    #[test]
    fn test_cluster_config_defaults_missing_fields() {
        let config: KubernetesClusterConfig =
            serde_json::from_str(r#"{"cluster_name":"c1","kubeconfig":"x"}"#).expect("parse");
        assert_eq!(config.cluster_name, "c1");
        assert!(config.nodes.is_empty());
        assert_eq!(config.worker_num, 0);
    }
}
