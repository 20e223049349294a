// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vendor-neutral view of the cloud resources a managed cluster needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Managed Kubernetes cluster as reported by the vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorCluster {
    pub cluster_id: String,
    pub name: String,
    /// Vendor state, e.g. `running`, `initial`, `failed`.
    pub state: String,
    pub region_id: String,
    pub zone_id: String,
    pub vpc_id: String,
    pub vswitch_id: String,
    pub security_group_id: String,
    pub pod_cidr: String,
    pub service_cidr: String,
    pub network_plugin: String,
    pub kubernetes_version: String,
    pub size: u32,
    pub created: String,
}

/// Parameters of a new managed cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterRequest {
    pub name: String,
    pub region_id: String,
    pub zone_id: String,
    pub vpc_id: String,
    pub vswitch_id: String,
    pub worker_instance_type: String,
    pub worker_num: u32,
    pub kubernetes_version: String,
    pub network_plugin: String,
    pub pod_cidr: String,
    pub service_cidr: String,
    /// Root password of the worker instances.
    pub login_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zone {
    pub zone_id: String,
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vpc {
    pub vpc_id: String,
    pub cidr_block: String,
    pub description: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VSwitch {
    pub vswitch_id: String,
    pub vpc_id: String,
    pub zone_id: String,
    pub cidr_block: String,
    pub description: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbInstance {
    pub instance_id: String,
    pub description: String,
    pub status: String,
    pub connection_string: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbInstanceRequest {
    pub region_id: String,
    pub zone_id: String,
    pub vpc_id: String,
    pub vswitch_id: String,
    /// Comma-separated CIDRs allowed to connect.
    pub security_ip_list: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSystem {
    pub file_system_id: String,
    pub description: String,
    pub zone_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTarget {
    pub domain: String,
    pub vswitch_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancer {
    pub load_balancer_id: String,
    pub name: String,
    pub address: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VServerGroup {
    pub group_id: String,
    pub name: String,
}

/// The vendor operations a managed adaptor relies on. Implementations map
/// credential errors to [`crate::Error::AccessKeyNotMatch`], unknown objects
/// to [`crate::Error::NotFound`] and everything else to
/// [`crate::Error::CloudApi`].
#[async_trait]
pub trait VendorApi: Send + Sync {
    // Kubernetes

    async fn list_clusters(&self) -> Result<Vec<VendorCluster>>;
    async fn describe_cluster(&self, cluster_id: &str) -> Result<VendorCluster>;
    /// Returns the new cluster id.
    async fn create_cluster(&self, request: &ClusterRequest) -> Result<String>;
    async fn get_kube_config(&self, cluster_id: &str) -> Result<String>;
    async fn delete_cluster(&self, cluster_id: &str) -> Result<()>;

    // Compute

    /// Zones of `region_id` and whether `instance_type` can be bought there.
    async fn available_zones(&self, region_id: &str, instance_type: &str) -> Result<Vec<Zone>>;
    /// Instance ids for the given private addresses.
    async fn instance_ids_by_private_ip(
        &self,
        region_id: &str,
        vpc_id: &str,
        ips: &[String],
    ) -> Result<Vec<String>>;
    /// Allow inbound TCP on `port_range` (`from/to`). An existing identical
    /// rule is not an error.
    async fn authorize_security_group(
        &self,
        region_id: &str,
        security_group_id: &str,
        port_range: &str,
    ) -> Result<()>;

    // Network

    async fn list_vpcs(&self, region_id: &str) -> Result<Vec<Vpc>>;
    async fn create_vpc(&self, region_id: &str, cidr_block: &str, description: &str)
    -> Result<String>;
    async fn list_vswitches(&self, region_id: &str, vpc_id: &str) -> Result<Vec<VSwitch>>;
    async fn create_vswitch(
        &self,
        region_id: &str,
        vpc_id: &str,
        zone_id: &str,
        cidr_block: &str,
        description: &str,
    ) -> Result<String>;

    // Database

    async fn list_db_instances(&self, region_id: &str) -> Result<Vec<DbInstance>>;
    async fn create_db_instance(&self, request: &DbInstanceRequest) -> Result<String>;
    /// Existing accounts and databases are not errors.
    async fn create_db_account(
        &self,
        region_id: &str,
        instance_id: &str,
        account: &str,
        password: &str,
    ) -> Result<()>;
    async fn create_database(
        &self,
        region_id: &str,
        instance_id: &str,
        name: &str,
        account: &str,
    ) -> Result<()>;

    // File storage

    /// Zones of `region_id` with NFS capacity.
    async fn nas_zones(&self, region_id: &str) -> Result<Vec<String>>;
    async fn list_file_systems(&self, region_id: &str) -> Result<Vec<FileSystem>>;
    async fn create_file_system(
        &self,
        region_id: &str,
        zone_id: &str,
        description: &str,
    ) -> Result<String>;
    async fn list_mount_targets(
        &self,
        region_id: &str,
        file_system_id: &str,
    ) -> Result<Vec<MountTarget>>;
    /// Returns the mount target domain.
    async fn create_mount_target(
        &self,
        region_id: &str,
        file_system_id: &str,
        vpc_id: &str,
        vswitch_id: &str,
    ) -> Result<String>;

    // Load balancing

    async fn list_load_balancers(&self, region_id: &str) -> Result<Vec<LoadBalancer>>;
    async fn create_load_balancer(&self, region_id: &str, name: &str) -> Result<String>;
    async fn list_vserver_groups(
        &self,
        region_id: &str,
        load_balancer_id: &str,
    ) -> Result<Vec<VServerGroup>>;
    /// Backend group forwarding to `port` on every instance.
    async fn create_vserver_group(
        &self,
        region_id: &str,
        load_balancer_id: &str,
        name: &str,
        instance_ids: &[String],
        port: u16,
    ) -> Result<String>;
    /// TCP listener on `port` backed by the group, started. An existing
    /// listener is not an error.
    async fn create_tcp_listener(
        &self,
        region_id: &str,
        load_balancer_id: &str,
        port: u16,
        vserver_group_id: &str,
    ) -> Result<()>;
}
