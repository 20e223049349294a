// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory vendor whose resources become ready immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::vendor::*;
use crate::error::{Error, Result};

pub const KUBECONFIG: &str = "apiVersion: v1\nclusters:\n- cluster:\n    server: https://47.0.0.1:6443\n  name: ack\n";

#[derive(Default)]
struct State {
    zones: BTreeMap<String, Vec<Zone>>,
    nas_zones: Vec<String>,
    instances: BTreeMap<String, String>,
    clusters: Vec<VendorCluster>,
    cluster_requests: Vec<ClusterRequest>,
    deleted: BTreeSet<String>,
    vpcs: Vec<Vpc>,
    vswitches: Vec<VSwitch>,
    db_instances: Vec<DbInstance>,
    db_whitelist: String,
    file_systems: Vec<FileSystem>,
    mount_targets: BTreeMap<String, Vec<MountTarget>>,
    load_balancers: Vec<LoadBalancer>,
    vserver_groups: Vec<VServerGroup>,
    listener_ports: Vec<u16>,
    security_rules: Vec<String>,
}

#[derive(Clone, Default)]
pub struct MockVendor {
    state: Arc<Mutex<State>>,
}

impl MockVendor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mock vendor state")
    }

    pub fn set_zones(&self, instance_type: &str, zones: &[(&str, bool)]) {
        self.state().zones.insert(
            instance_type.to_string(),
            zones
                .iter()
                .map(|(zone_id, available)| Zone {
                    zone_id: zone_id.to_string(),
                    available: *available,
                })
                .collect(),
        );
    }

    pub fn set_nas_zones(&self, zones: &[&str]) {
        self.state().nas_zones = zones.iter().map(|z| z.to_string()).collect();
    }

    pub fn add_instance(&self, private_ip: &str, instance_id: &str) {
        self.state()
            .instances
            .insert(private_ip.to_string(), instance_id.to_string());
    }

    pub fn cluster_requests(&self) -> Vec<ClusterRequest> {
        self.state().cluster_requests.clone()
    }

    pub fn cluster_deleted(&self, cluster_id: &str) -> bool {
        self.state().deleted.contains(cluster_id)
    }

    pub fn vpcs(&self) -> Vec<Vpc> {
        self.state().vpcs.clone()
    }

    pub fn vswitches(&self) -> Vec<VSwitch> {
        self.state().vswitches.clone()
    }

    pub fn db_instance_count(&self) -> usize {
        self.state().db_instances.len()
    }

    pub fn db_whitelist(&self) -> String {
        self.state().db_whitelist.clone()
    }

    pub fn file_system_count(&self) -> usize {
        self.state().file_systems.len()
    }

    pub fn load_balancer_count(&self) -> usize {
        self.state().load_balancers.len()
    }

    pub fn listener_ports(&self) -> Vec<u16> {
        self.state().listener_ports.clone()
    }

    pub fn security_rules(&self) -> Vec<String> {
        self.state().security_rules.clone()
    }
}

#[async_trait]
impl VendorApi for MockVendor {
    async fn list_clusters(&self) -> Result<Vec<VendorCluster>> {
        Ok(self.state().clusters.clone())
    }

    async fn describe_cluster(&self, cluster_id: &str) -> Result<VendorCluster> {
        self.state()
            .clusters
            .iter()
            .find(|c| c.cluster_id == cluster_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("cluster {}", cluster_id)))
    }

    async fn create_cluster(&self, request: &ClusterRequest) -> Result<String> {
        let mut state = self.state();
        let cluster_id = format!("c{}", state.clusters.len() + 1);
        state.clusters.push(VendorCluster {
            cluster_id: cluster_id.clone(),
            name: request.name.clone(),
            state: "running".to_string(),
            region_id: request.region_id.clone(),
            zone_id: request.zone_id.clone(),
            vpc_id: request.vpc_id.clone(),
            vswitch_id: request.vswitch_id.clone(),
            security_group_id: "sg-1".to_string(),
            pod_cidr: request.pod_cidr.clone(),
            service_cidr: request.service_cidr.clone(),
            network_plugin: request.network_plugin.clone(),
            kubernetes_version: "1.18.8-aliyun.1".to_string(),
            size: request.worker_num,
            created: "2021-01-01T00:00:00+08:00".to_string(),
        });
        state.cluster_requests.push(request.clone());
        Ok(cluster_id)
    }

    async fn get_kube_config(&self, _cluster_id: &str) -> Result<String> {
        Ok(KUBECONFIG.to_string())
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        let mut state = self.state();
        state.clusters.retain(|c| c.cluster_id != cluster_id);
        state.deleted.insert(cluster_id.to_string());
        Ok(())
    }

    async fn available_zones(&self, _region_id: &str, instance_type: &str) -> Result<Vec<Zone>> {
        Ok(self
            .state()
            .zones
            .get(instance_type)
            .cloned()
            .unwrap_or_default())
    }

    async fn instance_ids_by_private_ip(
        &self,
        _region_id: &str,
        _vpc_id: &str,
        ips: &[String],
    ) -> Result<Vec<String>> {
        let state = self.state();
        Ok(ips
            .iter()
            .filter_map(|ip| state.instances.get(ip).cloned())
            .collect())
    }

    async fn authorize_security_group(
        &self,
        _region_id: &str,
        _security_group_id: &str,
        port_range: &str,
    ) -> Result<()> {
        self.state().security_rules.push(port_range.to_string());
        Ok(())
    }

    async fn list_vpcs(&self, _region_id: &str) -> Result<Vec<Vpc>> {
        Ok(self.state().vpcs.clone())
    }

    async fn create_vpc(&self, _region_id: &str, cidr_block: &str, description: &str) -> Result<String> {
        let mut state = self.state();
        let vpc_id = format!("vpc-{}", state.vpcs.len() + 1);
        state.vpcs.push(Vpc {
            vpc_id: vpc_id.clone(),
            cidr_block: cidr_block.to_string(),
            description: description.to_string(),
            status: "Available".to_string(),
        });
        Ok(vpc_id)
    }

    async fn list_vswitches(&self, _region_id: &str, vpc_id: &str) -> Result<Vec<VSwitch>> {
        Ok(self
            .state()
            .vswitches
            .iter()
            .filter(|v| v.vpc_id == vpc_id)
            .cloned()
            .collect())
    }

    async fn create_vswitch(
        &self,
        _region_id: &str,
        vpc_id: &str,
        zone_id: &str,
        cidr_block: &str,
        description: &str,
    ) -> Result<String> {
        let mut state = self.state();
        let vswitch_id = format!("vsw-{}", state.vswitches.len() + 1);
        state.vswitches.push(VSwitch {
            vswitch_id: vswitch_id.clone(),
            vpc_id: vpc_id.to_string(),
            zone_id: zone_id.to_string(),
            cidr_block: cidr_block.to_string(),
            description: description.to_string(),
            status: "Available".to_string(),
        });
        Ok(vswitch_id)
    }

    async fn list_db_instances(&self, _region_id: &str) -> Result<Vec<DbInstance>> {
        Ok(self.state().db_instances.clone())
    }

    async fn create_db_instance(&self, request: &DbInstanceRequest) -> Result<String> {
        let mut state = self.state();
        let instance_id = format!("rm-{}", state.db_instances.len() + 1);
        state.db_instances.push(DbInstance {
            instance_id: instance_id.clone(),
            description: request.description.clone(),
            status: "Running".to_string(),
            connection_string: format!("{}.mysql.rds.aliyuncs.com", instance_id),
            port: 3306,
        });
        state.db_whitelist = request.security_ip_list.clone();
        Ok(instance_id)
    }

    async fn create_db_account(
        &self,
        _region_id: &str,
        _instance_id: &str,
        _account: &str,
        _password: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn create_database(
        &self,
        _region_id: &str,
        _instance_id: &str,
        _name: &str,
        _account: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn nas_zones(&self, _region_id: &str) -> Result<Vec<String>> {
        Ok(self.state().nas_zones.clone())
    }

    async fn list_file_systems(&self, _region_id: &str) -> Result<Vec<FileSystem>> {
        Ok(self.state().file_systems.clone())
    }

    async fn create_file_system(
        &self,
        _region_id: &str,
        zone_id: &str,
        description: &str,
    ) -> Result<String> {
        let mut state = self.state();
        let id = format!("fs-{}", state.file_systems.len() + 1);
        state.file_systems.push(FileSystem {
            file_system_id: id.clone(),
            description: description.to_string(),
            zone_id: zone_id.to_string(),
        });
        Ok(id)
    }

    async fn list_mount_targets(
        &self,
        _region_id: &str,
        file_system_id: &str,
    ) -> Result<Vec<MountTarget>> {
        Ok(self
            .state()
            .mount_targets
            .get(file_system_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_mount_target(
        &self,
        _region_id: &str,
        file_system_id: &str,
        _vpc_id: &str,
        vswitch_id: &str,
    ) -> Result<String> {
        let domain = format!("{}.cn-hangzhou.nas.aliyuncs.com", file_system_id);
        self.state()
            .mount_targets
            .entry(file_system_id.to_string())
            .or_default()
            .push(MountTarget {
                domain: domain.clone(),
                vswitch_id: vswitch_id.to_string(),
                status: "Active".to_string(),
            });
        Ok(domain)
    }

    async fn list_load_balancers(&self, _region_id: &str) -> Result<Vec<LoadBalancer>> {
        Ok(self.state().load_balancers.clone())
    }

    async fn create_load_balancer(&self, _region_id: &str, name: &str) -> Result<String> {
        let mut state = self.state();
        let id = format!("lb-{}", state.load_balancers.len() + 1);
        state.load_balancers.push(LoadBalancer {
            load_balancer_id: id.clone(),
            name: name.to_string(),
            address: "47.0.0.10".to_string(),
            status: "active".to_string(),
        });
        Ok(id)
    }

    async fn list_vserver_groups(
        &self,
        _region_id: &str,
        _load_balancer_id: &str,
    ) -> Result<Vec<VServerGroup>> {
        Ok(self.state().vserver_groups.clone())
    }

    async fn create_vserver_group(
        &self,
        _region_id: &str,
        _load_balancer_id: &str,
        name: &str,
        _instance_ids: &[String],
        _port: u16,
    ) -> Result<String> {
        let mut state = self.state();
        let id = format!("rsp-{}", state.vserver_groups.len() + 1);
        state.vserver_groups.push(VServerGroup {
            group_id: id.clone(),
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn create_tcp_listener(
        &self,
        _region_id: &str,
        _load_balancer_id: &str,
        port: u16,
        _vserver_group_id: &str,
    ) -> Result<()> {
        self.state().listener_ports.push(port);
        Ok(())
    }
}
