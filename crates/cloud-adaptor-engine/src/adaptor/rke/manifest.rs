// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RKE `cluster.yml` generation.

use std::net::Ipv4Addr;
use std::path::Path;

use cloud_adaptor_core::model::{NodeRole, RkeCluster};
use serde::Serialize;

use super::installer::CLUSTER_FILE;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RkeManifest {
    pub cluster_name: String,
    pub nodes: Vec<RkeNode>,
    pub services: RkeServices,
    pub network: RkeNetwork,
    pub ingress: RkeIngress,
    pub ssh_key_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kubernetes_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RkeNode {
    pub address: String,
    pub internal_address: String,
    pub port: String,
    pub user: String,
    pub role: Vec<NodeRole>,
    pub docker_socket: String,
    pub ssh_key_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RkeServices {
    #[serde(rename = "kube-api")]
    pub kube_api: KubeApiService,
    #[serde(rename = "kube-controller")]
    pub kube_controller: KubeControllerService,
    pub kubelet: KubeletService,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KubeApiService {
    pub service_cluster_ip_range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KubeControllerService {
    pub cluster_cidr: String,
    pub service_cluster_ip_range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KubeletService {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster_dns_server: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RkeNetwork {
    pub plugin: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RkeIngress {
    pub provider: String,
}

/// Cluster DNS address: the tenth host of the service range.
fn dns_server(service_cidr: &str) -> Option<String> {
    let (base, _) = service_cidr.split_once('/')?;
    let base: Ipv4Addr = base.parse().ok()?;
    Some(Ipv4Addr::from(u32::from(base) + 10).to_string())
}

/// Manifest for the record's current node list.
pub fn build_manifest(cluster: &RkeCluster, ssh_key_path: &Path) -> RkeManifest {
    let key_path = ssh_key_path.display().to_string();
    RkeManifest {
        cluster_name: cluster.name.clone(),
        nodes: cluster
            .node_list
            .iter()
            .map(|node| RkeNode {
                address: node.ip.clone(),
                internal_address: node.internal_address().to_string(),
                port: node.ssh_port.to_string(),
                user: node.ssh_user.clone(),
                role: node.roles.clone(),
                docker_socket: node.docker_socket_path.clone(),
                ssh_key_path: key_path.clone(),
            })
            .collect(),
        services: RkeServices {
            kube_api: KubeApiService {
                service_cluster_ip_range: cluster.service_cidr.clone(),
            },
            kube_controller: KubeControllerService {
                cluster_cidr: cluster.pod_cidr.clone(),
                service_cluster_ip_range: cluster.service_cidr.clone(),
            },
            kubelet: KubeletService {
                cluster_dns_server: dns_server(&cluster.service_cidr).unwrap_or_default(),
            },
        },
        network: RkeNetwork {
            plugin: cluster.network_plugin.clone(),
        },
        ingress: RkeIngress {
            provider: "none".to_string(),
        },
        ssh_key_path: key_path,
        kubernetes_version: cluster.kubernetes_version.clone(),
    }
}

/// Write `cluster.yml` into `dir`.
pub async fn write_manifest(dir: &Path, manifest: &RkeManifest) -> Result<()> {
    let yaml = serde_yaml::to_string(manifest)?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(CLUSTER_FILE), yaml).await?;
    Ok(())
}
