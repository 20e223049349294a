// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain entities shared by every layer of the cloud adaptor.
//!
//! Persistence rows live in [`crate::persistence`]; the types here are what
//! adaptors, tasks and the HTTP layer exchange.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default pod CIDR for RKE-provisioned clusters.
pub const DEFAULT_POD_CIDR: &str = "10.42.0.0/16";
/// Default service CIDR for RKE-provisioned clusters.
pub const DEFAULT_SERVICE_CIDR: &str = "10.43.0.0/16";
/// Default CNI plugin for RKE-provisioned clusters.
pub const DEFAULT_NETWORK_PLUGIN: &str = "flannel";

/// Generate a task or cluster identifier: uuid-v4 without dashes.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The error returned when a string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                #[allow(missing_docs)]
                $variant,
            )+
        }

        impl $name {
            /// Wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError::new($kind, other)),
                }
            }
        }
    };
}

string_enum!(
    /// The three task kinds the engine runs.
    TaskKind, "task kind", {
        CreateKubernetes => "create_kubernetes",
        InitRainbond => "init_rainbond",
        UpdateKubernetes => "update_kubernetes",
    }
);

string_enum!(
    /// Lifecycle of a task row.
    ///
    /// `pending` → `start` once the bus accepted the message → `complete`
    /// (or `inited` for a successful platform init).
    TaskStatus, "task status", {
        Pending => "pending",
        Start => "start",
        Complete => "complete",
        Inited => "inited",
    }
);

impl TaskStatus {
    /// Whether the task has terminated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Inited)
    }
}

string_enum!(
    /// Status carried by a step event.
    StepStatus, "step status", {
        Start => "start",
        Success => "success",
        Failure => "failure",
    }
);

string_enum!(
    /// Provider-agnostic cluster state.
    ClusterState, "cluster state", {
        Initial => "initial",
        Installing => "installing",
        Running => "running",
        Offline => "offline",
        Failed => "failed",
    }
);

string_enum!(
    /// Role an RKE node plays in the cluster.
    NodeRole, "node role", {
        Controlplane => "controlplane",
        Etcd => "etcd",
        Worker => "worker",
    }
);

/// Stored access credential for a managed-cloud provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudCredential {
    /// Owning enterprise.
    pub enterprise_id: String,
    /// Provider the key belongs to.
    pub provider_name: String,
    /// Vendor access key id.
    pub access_key: String,
    /// Vendor secret. Replaced by [`CloudCredential::digest`] before leaving the server.
    pub secret_key: String,
}

impl CloudCredential {
    /// `hex(md5(secret || enterprise_id))`.
    pub fn digest(&self) -> String {
        secret_digest(&self.secret_key, &self.enterprise_id)
    }

    /// Copy of this credential with the secret replaced by its digest.
    pub fn redacted(&self) -> Self {
        Self {
            secret_key: self.digest(),
            ..self.clone()
        }
    }
}

/// Keyed digest of a secret, used by clients to check a secret they hold.
pub fn secret_digest(secret: &str, enterprise_id: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(secret.as_bytes());
    hasher.update(enterprise_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// A Kubernetes cluster as seen through any provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    pub name: String,
    pub enterprise_id: String,
    pub provider_name: String,
    pub state: ClusterState,
    pub kubernetes_version: String,
    pub master_endpoint: String,
    pub pod_cidr: String,
    pub service_cidr: String,
    pub network_plugin: String,
    pub region_id: String,
    pub zone_id: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub size_nodes: u32,
    /// True iff `rbd-system/region-config` exists on the cluster.
    pub platform_installed: bool,
    /// Set when the cluster's Kubernetes version is outside the supported range.
    pub disable_rainbond_init: bool,
    pub create_log_path: String,
    pub eips: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::Initial
    }
}

/// One host in an RKE node manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    /// Address used for SSH.
    pub ip: String,
    /// Address used for in-cluster traffic; defaults to `ip`.
    #[serde(default)]
    pub internal_ip: String,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_docker_socket")]
    pub docker_socket_path: String,
    pub roles: Vec<NodeRole>,
}

fn default_ssh_user() -> String {
    "docker".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

impl ConfigNode {
    /// Whether this node carries `role`.
    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }

    /// Internal address, falling back to the SSH address.
    pub fn internal_address(&self) -> &str {
        if self.internal_ip.is_empty() {
            &self.ip
        } else {
            &self.internal_ip
        }
    }
}

/// Why an RKE node list was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeListError {
    /// No node carries the role.
    #[error("node list has no {0} node")]
    MissingRole(NodeRole),
    /// etcd needs an odd member count for quorum.
    #[error("etcd node count must be odd, got {0}")]
    EvenEtcd(usize),
    /// Two entries share the same address.
    #[error("duplicate node address {0}")]
    DuplicateAddress(String),
}

/// Check the RKE node-list invariant: at least one controlplane, one worker
/// and one etcd node, with an odd number of etcd nodes.
pub fn validate_node_roles(nodes: &[ConfigNode]) -> Result<(), NodeListError> {
    for role in [NodeRole::Controlplane, NodeRole::Etcd, NodeRole::Worker] {
        if !nodes.iter().any(|n| n.has_role(role)) {
            return Err(NodeListError::MissingRole(role));
        }
    }
    let etcd = nodes.iter().filter(|n| n.has_role(NodeRole::Etcd)).count();
    if etcd % 2 == 0 {
        return Err(NodeListError::EvenEtcd(etcd));
    }
    let mut seen = std::collections::HashSet::new();
    for node in nodes {
        if !seen.insert(node.ip.as_str()) {
            return Err(NodeListError::DuplicateAddress(node.ip.clone()));
        }
    }
    Ok(())
}

/// On-premise cluster provisioned by RKE over SSH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RkeCluster {
    pub cluster_id: String,
    pub name: String,
    pub enterprise_id: String,
    pub state: ClusterState,
    pub kubernetes_version: String,
    pub network_plugin: String,
    pub pod_cidr: String,
    pub service_cidr: String,
    pub node_list: Vec<ConfigNode>,
    pub kube_config: String,
    pub api_url: String,
    pub create_log_path: String,
    pub created_at: DateTime<Utc>,
}

impl RkeCluster {
    /// Replace the node list, enforcing the role invariant.
    pub fn set_nodes(&mut self, nodes: Vec<ConfigNode>) -> Result<(), NodeListError> {
        validate_node_roles(&nodes)?;
        self.node_list = nodes;
        Ok(())
    }
}

/// Imported cluster backed by a user-supplied kubeconfig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCluster {
    pub cluster_id: String,
    pub name: String,
    pub enterprise_id: String,
    pub kube_config: String,
    pub eips: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-cluster YAML overriding the default `RainbondCluster` spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfigOverride {
    pub enterprise_id: String,
    pub cluster_id: String,
    /// Raw YAML as supplied by the user.
    pub config: String,
    pub updated_at: DateTime<Utc>,
}

/// One progress event reported by a running task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    pub enterprise_id: String,
    pub task_id: String,
    pub step_type: String,
    pub status: StepStatus,
    pub message: String,
}

/// Whether a sink write changed the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventWrite {
    /// A row was inserted or overwritten.
    Written,
    /// An existing `success` row blocked the write.
    Dropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ip: &str, roles: &[NodeRole]) -> ConfigNode {
        ConfigNode {
            ip: ip.to_string(),
            internal_ip: String::new(),
            ssh_user: default_ssh_user(),
            ssh_port: 22,
            docker_socket_path: default_docker_socket(),
            roles: roles.to_vec(),
        }
    }

    #[test]
    fn test_single_all_in_one_node_is_valid() {
        let nodes = vec![node(
            "10.0.0.1",
            &[NodeRole::Controlplane, NodeRole::Etcd, NodeRole::Worker],
        )];
        assert!(validate_node_roles(&nodes).is_ok());
    }

    #[test]
    fn test_worker_only_nodes_are_rejected() {
        let nodes = vec![
            node("10.0.0.1", &[NodeRole::Worker]),
            node("10.0.0.2", &[NodeRole::Worker]),
        ];
        assert_eq!(
            validate_node_roles(&nodes),
            Err(NodeListError::MissingRole(NodeRole::Controlplane))
        );
    }

    #[test]
    fn test_even_etcd_count_is_rejected() {
        let nodes = vec![
            node("10.0.0.1", &[NodeRole::Controlplane, NodeRole::Etcd]),
            node("10.0.0.2", &[NodeRole::Etcd, NodeRole::Worker]),
        ];
        assert_eq!(validate_node_roles(&nodes), Err(NodeListError::EvenEtcd(2)));
    }

    #[test]
    fn test_duplicate_address_is_rejected() {
        let nodes = vec![
            node(
                "10.0.0.1",
                &[NodeRole::Controlplane, NodeRole::Etcd, NodeRole::Worker],
            ),
            node("10.0.0.1", &[NodeRole::Worker]),
        ];
        assert!(matches!(
            validate_node_roles(&nodes),
            Err(NodeListError::DuplicateAddress(_))
        ));
    }

    #[test]
    fn test_set_nodes_keeps_old_list_on_error() {
        let valid = vec![node(
            "10.0.0.1",
            &[NodeRole::Controlplane, NodeRole::Etcd, NodeRole::Worker],
        )];
        let mut cluster = RkeCluster {
            cluster_id: new_id(),
            name: "c1".into(),
            enterprise_id: "e1".into(),
            state: ClusterState::Running,
            kubernetes_version: String::new(),
            network_plugin: DEFAULT_NETWORK_PLUGIN.into(),
            pod_cidr: DEFAULT_POD_CIDR.into(),
            service_cidr: DEFAULT_SERVICE_CIDR.into(),
            node_list: valid.clone(),
            kube_config: String::new(),
            api_url: String::new(),
            create_log_path: String::new(),
            created_at: Utc::now(),
        };
        assert!(
            cluster
                .set_nodes(vec![node("10.0.0.2", &[NodeRole::Worker])])
                .is_err()
        );
        assert_eq!(cluster.node_list, valid);
    }

    #[test]
    fn test_secret_digest_is_md5_of_secret_then_enterprise() {
        // md5("secretE1")
        let cred = CloudCredential {
            enterprise_id: "E1".into(),
            provider_name: "ack".into(),
            access_key: "ak".into(),
            secret_key: "secret".into(),
        };
        let digest = cred.digest();
        assert_eq!(digest.len(), 32);
        assert_eq!(digest, secret_digest("secret", "E1"));
        assert_ne!(digest, secret_digest("secret", "E2"));
        assert_eq!(cred.redacted().secret_key, digest);
        assert_eq!(cred.redacted().access_key, "ak");
    }

    #[test]
    fn test_string_enums_round_trip_through_text() {
        assert_eq!("inited".parse::<TaskStatus>().unwrap(), TaskStatus::Inited);
        assert_eq!(TaskKind::InitRainbond.as_str(), "init_rainbond");
        assert!("bogus".parse::<StepStatus>().is_err());
        assert!(TaskStatus::Complete.is_terminal());
        assert!(!TaskStatus::Start.is_terminal());
        assert_eq!(
            serde_json::to_string(&ClusterState::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn test_new_id_has_no_dashes() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
