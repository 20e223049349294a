// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Alibaba Cloud: ACK clusters with ECS, VPC, RDS, NAS and SLB resources.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use super::vendor::*;
use crate::error::{Error, Result};

mod client;

pub use client::{AliyunClient, ApiError, Endpoints, Service};

const PAGE_SIZE: &str = "50";
const DB_ENGINE_VERSION: &str = "5.7";
const DB_INSTANCE_CLASS: &str = "rds.mysql.s2.large";
const DB_STORAGE_GB: &str = "20";
const SLB_SPEC: &str = "slb.s1.small";

/// Nested list `value[outer][inner][]` as the RPC APIs return them.
fn items<'a>(value: &'a Value, outer: &str, inner: &str) -> &'a [Value] {
    value[outer][inner]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn text(value: &Value, key: &str) -> String {
    match &value[key] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn required(value: &Value, key: &str, action: &str) -> Result<String> {
    let out = text(value, key);
    if out.is_empty() {
        return Err(Error::CloudApi(format!("{} response lacks {}", action, key)));
    }
    Ok(out)
}

/// Cluster as returned by the container service.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsCluster {
    cluster_id: String,
    name: String,
    state: String,
    region_id: String,
    zone_id: String,
    vpc_id: String,
    vswitch_id: String,
    security_group_id: String,
    current_version: String,
    size: u32,
    created: String,
    subnet_cidr: String,
    parameters: serde_json::Map<String, Value>,
}

impl From<CsCluster> for VendorCluster {
    fn from(c: CsCluster) -> Self {
        let param = |key: &str| {
            c.parameters
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        VendorCluster {
            service_cidr: param("ServiceCIDR"),
            network_plugin: param("Network"),
            cluster_id: c.cluster_id,
            name: c.name,
            state: c.state,
            region_id: c.region_id,
            zone_id: c.zone_id,
            vpc_id: c.vpc_id,
            vswitch_id: c.vswitch_id,
            security_group_id: c.security_group_id,
            pod_cidr: c.subnet_cidr,
            kubernetes_version: c.current_version,
            size: c.size,
            created: c.created,
        }
    }
}

/// [`VendorApi`] over the Alibaba Cloud OpenAPI.
pub struct AliyunVendor {
    client: AliyunClient,
}

impl AliyunVendor {
    pub fn new(http: reqwest::Client, access_key: &str, secret_key: &str) -> Self {
        Self::with_endpoints(http, access_key, secret_key, Endpoints::default())
    }

    pub fn with_endpoints(
        http: reqwest::Client,
        access_key: &str,
        secret_key: &str,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            client: AliyunClient::new(http, access_key, secret_key, endpoints),
        }
    }
}

#[async_trait]
impl VendorApi for AliyunVendor {
    async fn list_clusters(&self) -> Result<Vec<VendorCluster>> {
        let value = self.client.roa(Method::GET, "/clusters", None).await?;
        let clusters: Vec<CsCluster> = serde_json::from_value(value)?;
        Ok(clusters
            .into_iter()
            .filter(|c| c.state != "deleted")
            .map(VendorCluster::from)
            .collect())
    }

    async fn describe_cluster(&self, cluster_id: &str) -> Result<VendorCluster> {
        let value = self
            .client
            .roa(Method::GET, &format!("/clusters/{}", cluster_id), None)
            .await?;
        let cluster: CsCluster = serde_json::from_value(value)?;
        Ok(cluster.into())
    }

    async fn create_cluster(&self, request: &ClusterRequest) -> Result<String> {
        let body = json!({
            "name": request.name,
            "cluster_type": "ManagedKubernetes",
            "region_id": request.region_id,
            "zone_id": request.zone_id,
            "vpcid": request.vpc_id,
            "vswitch_ids": [request.vswitch_id],
            "worker_vswitch_ids": [request.vswitch_id],
            "worker_instance_types": [request.worker_instance_type],
            "num_of_nodes": request.worker_num,
            "worker_system_disk_category": "cloud_efficiency",
            "worker_system_disk_size": 120,
            "kubernetes_version": request.kubernetes_version,
            "container_cidr": request.pod_cidr,
            "service_cidr": request.service_cidr,
            "addons": [{ "name": request.network_plugin }],
            "login_password": request.login_password,
            "snat_entry": true,
            "endpoint_public_access": true,
        });
        let value = self.client.roa(Method::POST, "/clusters", Some(&body)).await?;
        required(&value, "cluster_id", "CreateCluster")
    }

    async fn get_kube_config(&self, cluster_id: &str) -> Result<String> {
        let value = self
            .client
            .roa(Method::GET, &format!("/k8s/{}/user_config", cluster_id), None)
            .await?;
        required(&value, "config", "DescribeClusterUserKubeconfig")
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        self.client
            .roa(Method::DELETE, &format!("/clusters/{}", cluster_id), None)
            .await?;
        Ok(())
    }

    async fn available_zones(&self, region_id: &str, instance_type: &str) -> Result<Vec<Zone>> {
        let value = self
            .client
            .rpc(
                Service::Ecs,
                region_id,
                "DescribeAvailableResource",
                &[
                    ("DestinationResource", "InstanceType".to_string()),
                    ("InstanceChargeType", "PostPaid".to_string()),
                    ("InstanceType", instance_type.to_string()),
                ],
            )
            .await?;
        Ok(items(&value, "AvailableZones", "AvailableZone")
            .iter()
            .map(|z| Zone {
                zone_id: text(z, "ZoneId"),
                available: text(z, "Status") == "Available"
                    && text(z, "StatusCategory") != "SoldOut",
            })
            .collect())
    }

    async fn instance_ids_by_private_ip(
        &self,
        region_id: &str,
        vpc_id: &str,
        ips: &[String],
    ) -> Result<Vec<String>> {
        if ips.is_empty() {
            return Ok(Vec::new());
        }
        let value = self
            .client
            .rpc(
                Service::Ecs,
                region_id,
                "DescribeInstances",
                &[
                    ("VpcId", vpc_id.to_string()),
                    ("PrivateIpAddresses", serde_json::to_string(ips)?),
                    ("PageSize", "100".to_string()),
                ],
            )
            .await?;
        Ok(items(&value, "Instances", "Instance")
            .iter()
            .map(|i| text(i, "InstanceId"))
            .filter(|id| !id.is_empty())
            .collect())
    }

    async fn authorize_security_group(
        &self,
        region_id: &str,
        security_group_id: &str,
        port_range: &str,
    ) -> Result<()> {
        self.client
            .rpc_tolerating(
                Service::Ecs,
                region_id,
                "AuthorizeSecurityGroup",
                &[
                    ("SecurityGroupId", security_group_id.to_string()),
                    ("IpProtocol", "tcp".to_string()),
                    ("PortRange", port_range.to_string()),
                    ("SourceCidrIp", "0.0.0.0/0".to_string()),
                ],
                &["InvalidPermission.Duplicate"],
            )
            .await
    }

    async fn list_vpcs(&self, region_id: &str) -> Result<Vec<Vpc>> {
        let value = self
            .client
            .rpc(
                Service::Vpc,
                region_id,
                "DescribeVpcs",
                &[("PageSize", PAGE_SIZE.to_string())],
            )
            .await?;
        Ok(items(&value, "Vpcs", "Vpc")
            .iter()
            .map(|v| Vpc {
                vpc_id: text(v, "VpcId"),
                cidr_block: text(v, "CidrBlock"),
                description: text(v, "Description"),
                status: text(v, "Status"),
            })
            .collect())
    }

    async fn create_vpc(&self, region_id: &str, cidr_block: &str, description: &str) -> Result<String> {
        let value = self
            .client
            .rpc(
                Service::Vpc,
                region_id,
                "CreateVpc",
                &[
                    ("CidrBlock", cidr_block.to_string()),
                    ("VpcName", description.to_string()),
                    ("Description", description.to_string()),
                ],
            )
            .await?;
        required(&value, "VpcId", "CreateVpc")
    }

    async fn list_vswitches(&self, region_id: &str, vpc_id: &str) -> Result<Vec<VSwitch>> {
        let value = self
            .client
            .rpc(
                Service::Vpc,
                region_id,
                "DescribeVSwitches",
                &[
                    ("VpcId", vpc_id.to_string()),
                    ("PageSize", PAGE_SIZE.to_string()),
                ],
            )
            .await?;
        Ok(items(&value, "VSwitches", "VSwitch")
            .iter()
            .map(|v| VSwitch {
                vswitch_id: text(v, "VSwitchId"),
                vpc_id: text(v, "VpcId"),
                zone_id: text(v, "ZoneId"),
                cidr_block: text(v, "CidrBlock"),
                description: text(v, "Description"),
                status: text(v, "Status"),
            })
            .collect())
    }

    async fn create_vswitch(
        &self,
        region_id: &str,
        vpc_id: &str,
        zone_id: &str,
        cidr_block: &str,
        description: &str,
    ) -> Result<String> {
        let value = self
            .client
            .rpc(
                Service::Vpc,
                region_id,
                "CreateVSwitch",
                &[
                    ("VpcId", vpc_id.to_string()),
                    ("ZoneId", zone_id.to_string()),
                    ("CidrBlock", cidr_block.to_string()),
                    ("VSwitchName", description.to_string()),
                    ("Description", description.to_string()),
                ],
            )
            .await?;
        required(&value, "VSwitchId", "CreateVSwitch")
    }

    async fn list_db_instances(&self, region_id: &str) -> Result<Vec<DbInstance>> {
        let value = self
            .client
            .rpc(
                Service::Rds,
                region_id,
                "DescribeDBInstances",
                &[("PageSize", "100".to_string())],
            )
            .await?;
        Ok(items(&value, "Items", "DBInstance")
            .iter()
            .map(|db| DbInstance {
                instance_id: text(db, "DBInstanceId"),
                description: text(db, "DBInstanceDescription"),
                status: text(db, "DBInstanceStatus"),
                connection_string: text(db, "ConnectionString"),
                port: text(db, "Port").parse().unwrap_or(3306),
            })
            .collect())
    }

    async fn create_db_instance(&self, request: &DbInstanceRequest) -> Result<String> {
        let value = self
            .client
            .rpc(
                Service::Rds,
                &request.region_id,
                "CreateDBInstance",
                &[
                    ("ZoneId", request.zone_id.clone()),
                    ("Engine", "MySQL".to_string()),
                    ("EngineVersion", DB_ENGINE_VERSION.to_string()),
                    ("DBInstanceClass", DB_INSTANCE_CLASS.to_string()),
                    ("DBInstanceStorage", DB_STORAGE_GB.to_string()),
                    ("DBInstanceNetType", "Intranet".to_string()),
                    ("InstanceNetworkType", "VPC".to_string()),
                    ("PayType", "Postpaid".to_string()),
                    ("VPCId", request.vpc_id.clone()),
                    ("VSwitchId", request.vswitch_id.clone()),
                    ("SecurityIPList", request.security_ip_list.clone()),
                    ("DBInstanceDescription", request.description.clone()),
                ],
            )
            .await?;
        required(&value, "DBInstanceId", "CreateDBInstance")
    }

    async fn create_db_account(
        &self,
        region_id: &str,
        instance_id: &str,
        account: &str,
        password: &str,
    ) -> Result<()> {
        self.client
            .rpc_tolerating(
                Service::Rds,
                region_id,
                "CreateAccount",
                &[
                    ("DBInstanceId", instance_id.to_string()),
                    ("AccountName", account.to_string()),
                    ("AccountPassword", password.to_string()),
                    ("AccountType", "Normal".to_string()),
                ],
                &["InvalidAccountName.Duplicate"],
            )
            .await
    }

    async fn create_database(
        &self,
        region_id: &str,
        instance_id: &str,
        name: &str,
        account: &str,
    ) -> Result<()> {
        self.client
            .rpc_tolerating(
                Service::Rds,
                region_id,
                "CreateDatabase",
                &[
                    ("DBInstanceId", instance_id.to_string()),
                    ("DBName", name.to_string()),
                    ("CharacterSetName", "utf8mb4".to_string()),
                ],
                &["InvalidDBName.Duplicate"],
            )
            .await?;
        self.client
            .rpc_tolerating(
                Service::Rds,
                region_id,
                "GrantAccountPrivilege",
                &[
                    ("DBInstanceId", instance_id.to_string()),
                    ("AccountName", account.to_string()),
                    ("DBName", name.to_string()),
                    ("AccountPrivilege", "ReadWrite".to_string()),
                ],
                &["InvalidAccountPrivilege.Duplicate"],
            )
            .await
    }

    async fn nas_zones(&self, region_id: &str) -> Result<Vec<String>> {
        let value = self
            .client
            .rpc(Service::Nas, region_id, "DescribeZones", &[])
            .await?;
        let offers_nfs = |zone: &Value| {
            ["Capacity", "Performance"].iter().any(|tier| {
                zone[*tier]["Protocol"]
                    .as_array()
                    .is_some_and(|p| p.iter().any(|v| v.as_str().is_some_and(|s| s.eq_ignore_ascii_case("nfs"))))
            })
        };
        Ok(items(&value, "Zones", "Zone")
            .iter()
            .filter(|z| offers_nfs(z))
            .map(|z| text(z, "ZoneId"))
            .collect())
    }

    async fn list_file_systems(&self, region_id: &str) -> Result<Vec<FileSystem>> {
        let value = self
            .client
            .rpc(
                Service::Nas,
                region_id,
                "DescribeFileSystems",
                &[("PageSize", "100".to_string())],
            )
            .await?;
        Ok(items(&value, "FileSystems", "FileSystem")
            .iter()
            .map(|fs| FileSystem {
                file_system_id: text(fs, "FileSystemId"),
                description: text(fs, "Description"),
                zone_id: text(fs, "ZoneId"),
            })
            .collect())
    }

    async fn create_file_system(
        &self,
        region_id: &str,
        zone_id: &str,
        description: &str,
    ) -> Result<String> {
        let value = self
            .client
            .rpc(
                Service::Nas,
                region_id,
                "CreateFileSystem",
                &[
                    ("ProtocolType", "NFS".to_string()),
                    ("StorageType", "Capacity".to_string()),
                    ("ZoneId", zone_id.to_string()),
                    ("Description", description.to_string()),
                ],
            )
            .await?;
        required(&value, "FileSystemId", "CreateFileSystem")
    }

    async fn list_mount_targets(
        &self,
        region_id: &str,
        file_system_id: &str,
    ) -> Result<Vec<MountTarget>> {
        let value = self
            .client
            .rpc(
                Service::Nas,
                region_id,
                "DescribeMountTargets",
                &[("FileSystemId", file_system_id.to_string())],
            )
            .await?;
        Ok(items(&value, "MountTargets", "MountTarget")
            .iter()
            .map(|t| MountTarget {
                domain: text(t, "MountTargetDomain"),
                vswitch_id: text(t, "VswId"),
                status: text(t, "Status"),
            })
            .collect())
    }

    async fn create_mount_target(
        &self,
        region_id: &str,
        file_system_id: &str,
        vpc_id: &str,
        vswitch_id: &str,
    ) -> Result<String> {
        let value = self
            .client
            .rpc(
                Service::Nas,
                region_id,
                "CreateMountTarget",
                &[
                    ("FileSystemId", file_system_id.to_string()),
                    ("AccessGroupName", "DEFAULT_VPC_GROUP_NAME".to_string()),
                    ("NetworkType", "Vpc".to_string()),
                    ("VpcId", vpc_id.to_string()),
                    ("VSwitchId", vswitch_id.to_string()),
                ],
            )
            .await?;
        required(&value, "MountTargetDomain", "CreateMountTarget")
    }

    async fn list_load_balancers(&self, region_id: &str) -> Result<Vec<LoadBalancer>> {
        let value = self
            .client
            .rpc(
                Service::Slb,
                region_id,
                "DescribeLoadBalancers",
                &[("PageSize", PAGE_SIZE.to_string())],
            )
            .await?;
        Ok(items(&value, "LoadBalancers", "LoadBalancer")
            .iter()
            .map(|lb| LoadBalancer {
                load_balancer_id: text(lb, "LoadBalancerId"),
                name: text(lb, "LoadBalancerName"),
                address: text(lb, "Address"),
                status: text(lb, "LoadBalancerStatus"),
            })
            .collect())
    }

    async fn create_load_balancer(&self, region_id: &str, name: &str) -> Result<String> {
        let value = self
            .client
            .rpc(
                Service::Slb,
                region_id,
                "CreateLoadBalancer",
                &[
                    ("LoadBalancerName", name.to_string()),
                    ("AddressType", "internet".to_string()),
                    ("InternetChargeType", "paybytraffic".to_string()),
                    ("LoadBalancerSpec", SLB_SPEC.to_string()),
                ],
            )
            .await?;
        required(&value, "LoadBalancerId", "CreateLoadBalancer")
    }

    async fn list_vserver_groups(
        &self,
        region_id: &str,
        load_balancer_id: &str,
    ) -> Result<Vec<VServerGroup>> {
        let value = self
            .client
            .rpc(
                Service::Slb,
                region_id,
                "DescribeVServerGroups",
                &[("LoadBalancerId", load_balancer_id.to_string())],
            )
            .await?;
        Ok(items(&value, "VServerGroups", "VServerGroup")
            .iter()
            .map(|g| VServerGroup {
                group_id: text(g, "VServerGroupId"),
                name: text(g, "VServerGroupName"),
            })
            .collect())
    }

    async fn create_vserver_group(
        &self,
        region_id: &str,
        load_balancer_id: &str,
        name: &str,
        instance_ids: &[String],
        port: u16,
    ) -> Result<String> {
        let backends: Vec<Value> = instance_ids
            .iter()
            .map(|id| json!({ "ServerId": id, "Port": port, "Weight": 100, "Type": "ecs" }))
            .collect();
        let value = self
            .client
            .rpc(
                Service::Slb,
                region_id,
                "CreateVServerGroup",
                &[
                    ("LoadBalancerId", load_balancer_id.to_string()),
                    ("VServerGroupName", name.to_string()),
                    ("BackendServers", serde_json::to_string(&backends)?),
                ],
            )
            .await?;
        required(&value, "VServerGroupId", "CreateVServerGroup")
    }

    async fn create_tcp_listener(
        &self,
        region_id: &str,
        load_balancer_id: &str,
        port: u16,
        vserver_group_id: &str,
    ) -> Result<()> {
        self.client
            .rpc_tolerating(
                Service::Slb,
                region_id,
                "CreateLoadBalancerTCPListener",
                &[
                    ("LoadBalancerId", load_balancer_id.to_string()),
                    ("ListenerPort", port.to_string()),
                    ("BackendServerPort", port.to_string()),
                    ("Bandwidth", "-1".to_string()),
                    ("VServerGroupId", vserver_group_id.to_string()),
                ],
                &["ListenerAlreadyExists"],
            )
            .await?;
        self.client
            .rpc(
                Service::Slb,
                region_id,
                "StartLoadBalancerListener",
                &[
                    ("LoadBalancerId", load_balancer_id.to_string()),
                    ("ListenerPort", port.to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn vendor(server: &MockServer) -> AliyunVendor {
        AliyunVendor::with_endpoints(
            reqwest::Client::new(),
            "ak",
            "sk",
            Endpoints::single(&server.uri()),
        )
    }

    #[tokio::test]
    async fn test_list_vpcs_signs_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(query_param("Action", "DescribeVpcs"))
            .and(query_param("RegionId", "cn-hangzhou"))
            .and(query_param("AccessKeyId", "ak"))
            .and(query_param("SignatureMethod", "HMAC-SHA1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Vpcs": {"Vpc": [{
                    "VpcId": "vpc-1",
                    "CidrBlock": "10.0.0.0/8",
                    "Description": "rainbond-region-vpc_prod",
                    "Status": "Available"
                }]},
                "RequestId": "r1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let vpcs = vendor(&server).await.list_vpcs("cn-hangzhou").await.expect("vpcs");
        assert_eq!(vpcs.len(), 1);
        assert_eq!(vpcs[0].vpc_id, "vpc-1");
        assert_eq!(vpcs[0].status, "Available");
    }

    #[tokio::test]
    async fn test_wrong_key_maps_to_access_key_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "Code": "InvalidAccessKeyId.NotFound",
                "Message": "Specified access key is not found."
            })))
            .mount(&server)
            .await;

        let err = vendor(&server)
            .await
            .available_zones("cn-hangzhou", "ecs.g6.large")
            .await
            .unwrap_err();
        assert_eq!(err.name(), "ErrorAccessKeyNotMatch");
    }

    #[tokio::test]
    async fn test_duplicate_rule_is_tolerated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("Action", "AuthorizeSecurityGroup"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "Code": "InvalidPermission.Duplicate",
                "Message": "The specified rule exists."
            })))
            .mount(&server)
            .await;

        vendor(&server)
            .await
            .authorize_security_group("cn-hangzhou", "sg-1", "80/80")
            .await
            .expect("duplicate rule is fine");
    }

    #[tokio::test]
    async fn test_nas_zones_filter_on_nfs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("Action", "DescribeZones"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Zones": {"Zone": [
                    {"ZoneId": "cn-hangzhou-g", "Capacity": {"Protocol": ["SMB"]}},
                    {"ZoneId": "cn-hangzhou-h", "Capacity": {"Protocol": ["nfs", "smb"]}}
                ]}
            })))
            .mount(&server)
            .await;

        let zones = vendor(&server).await.nas_zones("cn-hangzhou").await.expect("zones");
        assert_eq!(zones, vec!["cn-hangzhou-h"]);
    }

    #[tokio::test]
    async fn test_cluster_calls_use_roa() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/clusters"))
            .and(header_exists("authorization"))
            .and(header_exists("content-md5"))
            .and(body_partial_json(json!({
                "name": "prod",
                "cluster_type": "ManagedKubernetes",
                "num_of_nodes": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cluster_id": "c-123",
                "task_id": "T-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/clusters/c-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cluster_id": "c-123",
                "name": "prod",
                "state": "running",
                "current_version": "1.18.8-aliyun.1",
                "subnet_cidr": "172.20.0.0/16",
                "size": 3,
                "parameters": {"ServiceCIDR": "172.21.0.0/20"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/k8s/c-123/user_config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"config": "apiVersion: v1"})))
            .mount(&server)
            .await;

        let vendor = vendor(&server).await;
        let id = vendor
            .create_cluster(&ClusterRequest {
                name: "prod".to_string(),
                worker_num: 3,
                ..Default::default()
            })
            .await
            .expect("create");
        assert_eq!(id, "c-123");

        let cluster = vendor.describe_cluster(&id).await.expect("describe");
        assert_eq!(cluster.state, "running");
        assert_eq!(cluster.pod_cidr, "172.20.0.0/16");
        assert_eq!(cluster.service_cidr, "172.21.0.0/20");

        let kubeconfig = vendor.get_kube_config(&id).await.expect("kubeconfig");
        assert_eq!(kubeconfig, "apiVersion: v1");
    }

    #[tokio::test]
    async fn test_unknown_cluster_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clusters/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "ErrorClusterNotFound",
                "message": "cluster missing not found"
            })))
            .mount(&server)
            .await;

        let err = vendor(&server)
            .await
            .describe_cluster("missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
