// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Managed Kubernetes on a public cloud.
//!
//! [`ManagedAdaptor`] owns the provisioning policy and talks to the vendor
//! only through [`VendorApi`]. Every resource it creates carries the
//! description `rainbond-region-<resource>_<id>` and is looked up by that tag
//! before anything new is created, so a retried task picks up where the
//! previous attempt stopped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloud_adaptor_core::model::{Cluster, ClusterState};
use cloud_adaptor_core::persistence::Persistence;
use cloud_adaptor_core::steps;
use futures::future::join_all;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ClusterProbe, CloudAdaptor, KubernetesClusterConfig, Provider};
use crate::error::{Error, Result};
use crate::operator::crd::Database;
use crate::operator::{NodeInfo, RainbondInitConfig};
use crate::poll::poll_until;
use crate::task::StepEmitter;

pub mod aliyun;
#[cfg(test)]
mod mock;
pub mod vendor;

use vendor::{ClusterRequest, DbInstanceRequest, VSwitch, VendorApi, VendorCluster, Vpc};

pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/8";
pub const DEFAULT_VSWITCH_CIDR: &str = "10.22.0.0/16";
/// Subnet created for file storage when the cluster zone has no NFS capacity.
pub const NAS_VSWITCH_CIDR: &str = "10.23.0.0/16";
pub const DEFAULT_POD_CIDR: &str = "172.20.0.0/16";
pub const DEFAULT_SERVICE_CIDR: &str = "172.21.0.0/20";
pub const DEFAULT_NETWORK_PLUGIN: &str = "terway-eniip";
/// Ports fronted by the load balancer.
pub const GATEWAY_PORTS: [u16; 4] = [80, 443, 8443, 6060];
/// Inbound rules opened on the cluster security group.
pub const SECURITY_GROUP_RANGES: [&str; 5] =
    ["80/80", "443/443", "8443/8443", "6060/6060", "10000/11000"];

const DB_ACCOUNT: &str = "rainbond";
const DB_NAME: &str = "region";
const RESOURCE_TICK: Duration = Duration::from_secs(5);
const RESOURCE_DEADLINE: Duration = Duration::from_secs(10 * 60);
const CLUSTER_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Worker instance families, smallest generation first.
const INSTANCE_FAMILIES: &[(&str, &[&str])] = &[
    ("2C8G", &["ecs.g6.large", "ecs.g5.large", "ecs.sn2ne.large"]),
    ("4C16G", &["ecs.g6.xlarge", "ecs.g5.xlarge", "ecs.sn2ne.xlarge"]),
    ("8C32G", &["ecs.g6.2xlarge", "ecs.g5.2xlarge", "ecs.sn2ne.2xlarge"]),
];

/// Vendor description of a resource owned by `id`.
pub fn resource_tag(resource: &str, id: &str) -> String {
    format!("rainbond-region-{}_{}", resource, id)
}

/// Candidate instance types for a worker resource type; an unknown value is
/// taken as a literal instance type.
pub fn instance_candidates(resource_type: &str) -> Vec<String> {
    let key = if resource_type.is_empty() { "4C16G" } else { resource_type };
    INSTANCE_FAMILIES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, types)| types.iter().map(|t| t.to_string()).collect())
        .unwrap_or_else(|| vec![key.to_string()])
}

/// Stable password derived from the credential secret.
pub(crate) fn derived_password(secret: &str, salt: &str) -> Result<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Other(format!("invalid hmac key: {}", e)))?;
    mac.update(salt.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(format!("Rb{}#", &digest[..14]))
}

fn cluster_state(state: &str) -> ClusterState {
    match state {
        "running" => ClusterState::Running,
        "initial" | "scaling" | "upgrading" | "updating" => ClusterState::Installing,
        "failed" => ClusterState::Failed,
        _ => ClusterState::Offline,
    }
}

/// Adaptor for managed-cloud providers.
pub struct ManagedAdaptor {
    provider: Provider,
    vendor: Arc<dyn VendorApi>,
    persistence: Arc<dyn Persistence>,
    probe: ClusterProbe,
    secret: String,
    tick: Duration,
}

impl ManagedAdaptor {
    pub fn new(
        provider: Provider,
        vendor: Arc<dyn VendorApi>,
        persistence: Arc<dyn Persistence>,
        probe: ClusterProbe,
        secret: &str,
    ) -> Self {
        Self {
            provider,
            vendor,
            persistence,
            probe,
            secret: secret.to_string(),
            tick: RESOURCE_TICK,
        }
    }

    /// Status poll interval; defaults to 5 s.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    fn to_cluster(&self, enterprise_id: &str, vc: &VendorCluster) -> Cluster {
        Cluster {
            cluster_id: vc.cluster_id.clone(),
            name: vc.name.clone(),
            enterprise_id: enterprise_id.to_string(),
            provider_name: self.provider.to_string(),
            state: cluster_state(&vc.state),
            kubernetes_version: vc.kubernetes_version.clone(),
            pod_cidr: vc.pod_cidr.clone(),
            service_cidr: vc.service_cidr.clone(),
            network_plugin: vc.network_plugin.clone(),
            region_id: vc.region_id.clone(),
            zone_id: vc.zone_id.clone(),
            vpc_id: vc.vpc_id.clone(),
            subnet_id: vc.vswitch_id.clone(),
            security_group_id: vc.security_group_id.clone(),
            size_nodes: vc.size,
            created_at: DateTime::parse_from_rfc3339(&vc.created)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            ..Default::default()
        }
    }

    /// Kubeconfig of a running cluster; `None` when unavailable.
    async fn running_kubeconfig(&self, vc: &VendorCluster) -> Option<String> {
        if cluster_state(&vc.state) != ClusterState::Running {
            return None;
        }
        match self.vendor.get_kube_config(&vc.cluster_id).await {
            Ok(kubeconfig) => Some(kubeconfig),
            Err(e) => {
                debug!(cluster_id = %vc.cluster_id, error = %e, "Kubeconfig unavailable");
                None
            }
        }
    }

    async fn wait<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        deadline: Duration,
        check: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        poll_until(cancel, self.tick, deadline, what, check).await
    }

    /// First candidate instance type with an available zone.
    async fn select_instance(&self, region_id: &str, resource_type: &str) -> Result<(String, String)> {
        for instance_type in instance_candidates(resource_type) {
            let zones = self.vendor.available_zones(region_id, &instance_type).await?;
            if let Some(zone) = zones.into_iter().find(|z| z.available) {
                return Ok((instance_type, zone.zone_id));
            }
            debug!(region_id, instance_type = %instance_type, "No zone has capacity");
        }
        Err(Error::CloudApi(format!(
            "no zone in {} can provide {} workers",
            region_id, resource_type
        )))
    }

    async fn ensure_vpc(&self, cancel: &CancellationToken, region_id: &str, tag: &str) -> Result<Vpc> {
        let existing = self
            .vendor
            .list_vpcs(region_id)
            .await?
            .into_iter()
            .find(|v| v.description == tag);
        let vpc_id = match existing {
            Some(vpc) => vpc.vpc_id,
            None => {
                let id = self.vendor.create_vpc(region_id, DEFAULT_VPC_CIDR, tag).await?;
                info!(region_id, vpc_id = %id, "VPC created");
                id
            }
        };
        let (vendor, vpc_id) = (&self.vendor, &vpc_id);
        self.wait(cancel, "vpc", RESOURCE_DEADLINE, move || async move {
            Ok(vendor
                .list_vpcs(region_id)
                .await?
                .into_iter()
                .find(|v| &v.vpc_id == vpc_id && v.status == "Available"))
        })
        .await
    }

    async fn ensure_vswitch(
        &self,
        cancel: &CancellationToken,
        region_id: &str,
        vpc_id: &str,
        zone_id: &str,
        cidr_block: &str,
        tag: &str,
    ) -> Result<VSwitch> {
        let existing = self
            .vendor
            .list_vswitches(region_id, vpc_id)
            .await?
            .into_iter()
            .find(|v| v.description == tag);
        let vswitch_id = match existing {
            Some(vswitch) => vswitch.vswitch_id,
            None => {
                let id = self
                    .vendor
                    .create_vswitch(region_id, vpc_id, zone_id, cidr_block, tag)
                    .await?;
                info!(region_id, vswitch_id = %id, zone_id, "VSwitch created");
                id
            }
        };
        let (vendor, vswitch_id) = (&self.vendor, &vswitch_id);
        self.wait(cancel, "vswitch", RESOURCE_DEADLINE, move || async move {
            Ok(vendor
                .list_vswitches(region_id, vpc_id)
                .await?
                .into_iter()
                .find(|v| &v.vswitch_id == vswitch_id && v.status == "Available"))
        })
        .await
    }

    async fn wait_cluster_running(
        &self,
        cancel: &CancellationToken,
        cluster_id: &str,
    ) -> Result<VendorCluster> {
        let vendor = &self.vendor;
        self.wait(cancel, "kubernetes cluster", CLUSTER_DEADLINE, move || async move {
            let vc = vendor.describe_cluster(cluster_id).await?;
            match cluster_state(&vc.state) {
                ClusterState::Running => Ok(Some(vc)),
                ClusterState::Failed => Err(Error::CloudApi(format!(
                    "cluster {} failed to provision",
                    cluster_id
                ))),
                _ => Ok(None),
            }
        })
        .await
    }

    async fn create_database(
        &self,
        cancel: &CancellationToken,
        cluster: &Cluster,
        vpc_cidr: &str,
        emitter: &StepEmitter,
    ) -> Result<Database> {
        emitter.start(steps::CREATE_RDS, "creating region database").await;
        let region_id = cluster.region_id.as_str();
        let tag = resource_tag("rds", &cluster.cluster_id);

        let existing = self
            .vendor
            .list_db_instances(region_id)
            .await?
            .into_iter()
            .find(|db| db.description == tag);
        let instance_id = match existing {
            Some(db) => db.instance_id,
            None => {
                let whitelist = [cluster.pod_cidr.as_str(), vpc_cidr]
                    .into_iter()
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
                    .join(",");
                self.vendor
                    .create_db_instance(&DbInstanceRequest {
                        region_id: region_id.to_string(),
                        zone_id: cluster.zone_id.clone(),
                        vpc_id: cluster.vpc_id.clone(),
                        vswitch_id: cluster.subnet_id.clone(),
                        security_ip_list: whitelist,
                        description: tag.clone(),
                    })
                    .await?
            }
        };
        let (vendor, id) = (&self.vendor, &instance_id);
        let instance = self
            .wait(cancel, "database instance", RESOURCE_DEADLINE, move || async move {
                Ok(vendor
                    .list_db_instances(region_id)
                    .await?
                    .into_iter()
                    .find(|db| {
                        &db.instance_id == id
                            && db.status == "Running"
                            && !db.connection_string.is_empty()
                    }))
            })
            .await?;

        let password = derived_password(&self.secret, &cluster.cluster_id)?;
        self.vendor
            .create_db_account(region_id, &instance_id, DB_ACCOUNT, &password)
            .await?;
        self.vendor
            .create_database(region_id, &instance_id, DB_NAME, DB_ACCOUNT)
            .await?;
        emitter
            .success(steps::CREATE_RDS, format!("database {} ready", instance_id))
            .await;

        Ok(Database {
            host: instance.connection_string,
            port: instance.port,
            username: DB_ACCOUNT.to_string(),
            password,
            name: DB_NAME.to_string(),
        })
    }

    /// File system and a mount target reachable from the cluster network.
    /// Returns the mount domain.
    async fn create_file_storage(
        &self,
        cancel: &CancellationToken,
        cluster: &Cluster,
        emitter: &StepEmitter,
    ) -> Result<String> {
        emitter.start(steps::CREATE_NAS, "creating file storage").await;
        let region_id = cluster.region_id.as_str();
        let tag = resource_tag("nas", &cluster.cluster_id);

        let existing = self
            .vendor
            .list_file_systems(region_id)
            .await?
            .into_iter()
            .find(|fs| fs.description == tag);
        let (file_system_id, zone_id) = match existing {
            Some(fs) => (fs.file_system_id, fs.zone_id),
            None => {
                let zones = self.vendor.nas_zones(region_id).await?;
                let zone_id = if zones.contains(&cluster.zone_id) {
                    cluster.zone_id.clone()
                } else {
                    zones.into_iter().next().ok_or_else(|| {
                        Error::CloudApi(format!("no zone in {} offers file storage", region_id))
                    })?
                };
                let id = self
                    .vendor
                    .create_file_system(region_id, &zone_id, &tag)
                    .await?;
                (id, zone_id)
            }
        };
        emitter
            .success(steps::CREATE_NAS, format!("file system {} ready", file_system_id))
            .await;

        emitter
            .start(steps::CREATE_NAS_MOUNT, "creating file storage mount target")
            .await;
        let vswitch_id = if zone_id == cluster.zone_id {
            cluster.subnet_id.clone()
        } else {
            self.ensure_vswitch(
                cancel,
                region_id,
                &cluster.vpc_id,
                &zone_id,
                NAS_VSWITCH_CIDR,
                &resource_tag("nas-vswitch", &cluster.cluster_id),
            )
            .await?
            .vswitch_id
        };

        let targets = self
            .vendor
            .list_mount_targets(region_id, &file_system_id)
            .await?;
        if !targets.iter().any(|t| t.vswitch_id == vswitch_id) {
            self.vendor
                .create_mount_target(region_id, &file_system_id, &cluster.vpc_id, &vswitch_id)
                .await?;
        }
        let (vendor, fs_id, vsw_id) = (&self.vendor, &file_system_id, &vswitch_id);
        let target = self
            .wait(cancel, "mount target", RESOURCE_DEADLINE, move || async move {
                Ok(vendor
                    .list_mount_targets(region_id, fs_id)
                    .await?
                    .into_iter()
                    .find(|t| &t.vswitch_id == vsw_id && t.status == "Active"))
            })
            .await?;
        emitter
            .success(steps::CREATE_NAS_MOUNT, format!("mount target {} ready", target.domain))
            .await;
        Ok(target.domain)
    }

    /// Load balancer in front of the gateway nodes. Returns its address.
    async fn create_gateway_balancer(
        &self,
        cancel: &CancellationToken,
        cluster: &Cluster,
        gateway_nodes: &[NodeInfo],
        emitter: &StepEmitter,
    ) -> Result<String> {
        emitter
            .start(steps::CREATE_LOAD_BALANCER, "creating gateway load balancer")
            .await;
        let region_id = cluster.region_id.as_str();
        let tag = resource_tag("slb", &cluster.cluster_id);

        let existing = self
            .vendor
            .list_load_balancers(region_id)
            .await?
            .into_iter()
            .find(|lb| lb.name == tag);
        let lb_id = match existing {
            Some(lb) => lb.load_balancer_id,
            None => self.vendor.create_load_balancer(region_id, &tag).await?,
        };
        let (vendor, id) = (&self.vendor, &lb_id);
        let lb = self
            .wait(cancel, "load balancer", RESOURCE_DEADLINE, move || async move {
                Ok(vendor
                    .list_load_balancers(region_id)
                    .await?
                    .into_iter()
                    .find(|lb| {
                        &lb.load_balancer_id == id
                            && lb.status.eq_ignore_ascii_case("active")
                            && !lb.address.is_empty()
                    }))
            })
            .await?;
        emitter
            .success(steps::CREATE_LOAD_BALANCER, format!("load balancer {} ready", lb.address))
            .await;

        emitter
            .start(steps::BOUND_LOAD_BALANCER, "registering gateway nodes")
            .await;
        let ips: Vec<String> = gateway_nodes
            .iter()
            .map(|n| n.internal_ip.clone())
            .filter(|ip| !ip.is_empty())
            .collect();
        let instance_ids = self
            .vendor
            .instance_ids_by_private_ip(region_id, &cluster.vpc_id, &ips)
            .await?;
        if instance_ids.is_empty() {
            return Err(Error::CloudApi(format!(
                "no instances found for gateway nodes {:?}",
                ips
            )));
        }

        let groups = self.vendor.list_vserver_groups(region_id, &lb_id).await?;
        for port in GATEWAY_PORTS {
            let name = format!("rainbond-region-{}", port);
            let group_id = match groups.iter().find(|g| g.name == name) {
                Some(group) => group.group_id.clone(),
                None => {
                    self.vendor
                        .create_vserver_group(region_id, &lb_id, &name, &instance_ids, port)
                        .await?
                }
            };
            self.vendor
                .create_tcp_listener(region_id, &lb_id, port, &group_id)
                .await?;
        }
        emitter
            .success(
                steps::BOUND_LOAD_BALANCER,
                format!("{} gateway nodes registered", instance_ids.len()),
            )
            .await;
        Ok(lb.address)
    }

    async fn open_security_group(&self, cluster: &Cluster, emitter: &StepEmitter) -> Result<()> {
        emitter
            .start(steps::SET_SECURITY_GROUP, "opening gateway ports")
            .await;
        for range in SECURITY_GROUP_RANGES {
            self.vendor
                .authorize_security_group(&cluster.region_id, &cluster.security_group_id, range)
                .await?;
        }
        emitter
            .success(steps::SET_SECURITY_GROUP, "gateway ports opened")
            .await;
        Ok(())
    }
}

#[async_trait]
impl CloudAdaptor for ManagedAdaptor {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn list_clusters(&self, enterprise_id: &str) -> Result<Vec<Cluster>> {
        let clusters = self.vendor.list_clusters().await?;
        let items = join_all(clusters.iter().map(|vc| async move {
            (
                self.to_cluster(enterprise_id, vc),
                self.running_kubeconfig(vc).await,
            )
        }))
        .await;
        Ok(self.probe.hydrate_all(items).await)
    }

    async fn describe_cluster(&self, enterprise_id: &str, cluster_id: &str) -> Result<Cluster> {
        let vc = self.vendor.describe_cluster(cluster_id).await?;
        let kubeconfig = self.running_kubeconfig(&vc).await;
        Ok(self
            .probe
            .hydrate(self.to_cluster(enterprise_id, &vc), kubeconfig.as_deref())
            .await)
    }

    async fn create_rainbond_kubernetes(
        &self,
        cancel: &CancellationToken,
        enterprise_id: &str,
        config: &KubernetesClusterConfig,
        emitter: &StepEmitter,
    ) -> Result<Cluster> {
        let region_id = config.region_id.as_str();
        if region_id.is_empty() {
            return Err(Error::BadRequest("region_id is required".to_string()));
        }

        let reusable = self
            .vendor
            .list_clusters()
            .await?
            .into_iter()
            .find(|vc| vc.name == config.cluster_name && cluster_state(&vc.state) != ClusterState::Failed);
        if let Some(vc) = reusable {
            info!(cluster_id = %vc.cluster_id, name = %vc.name, "Reusing existing cluster");
            emitter
                .start(steps::CREATE_CLUSTER, format!("waiting for cluster {}", vc.cluster_id))
                .await;
            self.wait_cluster_running(cancel, &vc.cluster_id).await?;
            emitter
                .success(steps::CREATE_CLUSTER, "kubernetes cluster is running")
                .await;
            return self.describe_cluster(enterprise_id, &vc.cluster_id).await;
        }

        let (instance_type, zone_id) = self
            .select_instance(region_id, &config.worker_resource_type)
            .await?;

        let vpc_id = if config.vpc_id.is_empty() {
            emitter.start(steps::CREATE_VPC, "creating vpc").await;
            let vpc = self
                .ensure_vpc(cancel, region_id, &resource_tag("vpc", &config.cluster_name))
                .await?;
            emitter
                .success(steps::CREATE_VPC, format!("vpc {} ready", vpc.vpc_id))
                .await;
            vpc.vpc_id
        } else {
            config.vpc_id.clone()
        };

        let vswitch_id = if config.vswitch_id.is_empty() {
            emitter.start(steps::CREATE_VSWITCH, "creating vswitch").await;
            let vswitch = self
                .ensure_vswitch(
                    cancel,
                    region_id,
                    &vpc_id,
                    &zone_id,
                    DEFAULT_VSWITCH_CIDR,
                    &resource_tag("vswitch", &config.cluster_name),
                )
                .await?;
            emitter
                .success(steps::CREATE_VSWITCH, format!("vswitch {} ready", vswitch.vswitch_id))
                .await;
            vswitch.vswitch_id
        } else {
            config.vswitch_id.clone()
        };

        emitter
            .start(steps::CREATE_CLUSTER, "creating kubernetes cluster")
            .await;
        let or = |value: &str, default: &str| {
            if value.is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        };
        let cluster_id = self
            .vendor
            .create_cluster(&ClusterRequest {
                name: config.cluster_name.clone(),
                region_id: region_id.to_string(),
                zone_id,
                vpc_id,
                vswitch_id,
                worker_instance_type: instance_type,
                worker_num: config.worker_num.max(1),
                kubernetes_version: config.kubernetes_version.clone(),
                network_plugin: or(&config.network_plugin, DEFAULT_NETWORK_PLUGIN),
                pod_cidr: or(&config.pod_cidr, DEFAULT_POD_CIDR),
                service_cidr: or(&config.service_cidr, DEFAULT_SERVICE_CIDR),
                login_password: derived_password(&self.secret, &config.cluster_name)?,
            })
            .await?;
        info!(enterprise_id, cluster_id = %cluster_id, "Managed cluster creation accepted");

        self.wait_cluster_running(cancel, &cluster_id).await?;
        emitter
            .success(steps::CREATE_CLUSTER, "kubernetes cluster is running")
            .await;
        self.describe_cluster(enterprise_id, &cluster_id).await
    }

    async fn get_kube_config(&self, _enterprise_id: &str, cluster_id: &str) -> Result<String> {
        self.vendor.get_kube_config(cluster_id).await
    }

    async fn delete_cluster(&self, enterprise_id: &str, cluster_id: &str) -> Result<()> {
        let vc = self.vendor.describe_cluster(cluster_id).await?;
        let kubeconfig = self.running_kubeconfig(&vc).await;
        self.probe
            .ensure_deletable(cluster_id, kubeconfig.as_deref())
            .await?;
        self.vendor.delete_cluster(cluster_id).await?;
        self.persistence
            .delete_platform_config(enterprise_id, cluster_id)
            .await?;
        info!(enterprise_id, cluster_id, "Managed cluster deletion requested");
        Ok(())
    }

    async fn get_rainbond_init_config(
        &self,
        cancel: &CancellationToken,
        _enterprise_id: &str,
        cluster: &Cluster,
        gateway_nodes: &[NodeInfo],
        _chaos_nodes: &[NodeInfo],
        emitter: &StepEmitter,
    ) -> Result<RainbondInitConfig> {
        let vpc_cidr = self
            .vendor
            .list_vpcs(&cluster.region_id)
            .await?
            .into_iter()
            .find(|v| v.vpc_id == cluster.vpc_id)
            .map(|v| v.cidr_block)
            .unwrap_or_default();

        let database = self.create_database(cancel, cluster, &vpc_cidr, emitter).await?;
        let nas_server = self.create_file_storage(cancel, cluster, emitter).await?;
        let address = self
            .create_gateway_balancer(cancel, cluster, gateway_nodes, emitter)
            .await?;
        self.open_security_group(cluster, emitter).await?;

        Ok(RainbondInitConfig {
            enable_ha: true,
            eips: vec![address],
            region_database: Some(database),
            nas_server: Some(nas_server),
            rwo_storage_class: Some("alicloud-disk-available".to_string()),
        })
    }
}
