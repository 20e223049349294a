// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! [`KubeConnector`] and [`TargetCluster`] backed by a real API server.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim,
};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::api::storage::v1::{CSIDriver, StorageClass};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cluster_spec::suffix_host_ip;
use super::crd::{
    CLUSTER_NAME, CsiPluginSource, PACKAGE_NAME, RainbondCluster, RainbondClusterSpec,
    RainbondPackage, RainbondPackageSpec, RainbondVolume, RainbondVolumeSpec, RbdComponent,
    StorageClassParameters, VOLUME_RWO_NAME, VOLUME_RWX_NAME,
};
use super::helm::{HelmCli, HelmFailure};
use super::suffix::{SUFFIX_CONFIGMAP, SuffixIdentity, resolve_suffix_host};
use super::{
    EXTERNAL_ADDRESS_ANNOTATION, KubeConnector, NAMESPACE, NodeInfo, OPERATOR_NAME,
    PlatformInstall, PlatformStatus, RainbondInitConfig, REGION_CONFIG, RegionConfig,
    TargetCluster, build_cluster_spec,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::poll::poll_until;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const INSTALL_POLL_INTERVAL: Duration = Duration::from_secs(5);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(600);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const SUFFIX_BACKOFF: Duration = Duration::from_secs(2);
const PACKAGE_PATH: &str = "/opt/rainbond/pkg/tgz/rainbond.tgz";
/// Label carried by storage classes and CSI drivers the operator creates.
const CREATOR_SELECTOR: &str = "creator=Rainbond";

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

async fn create_if_absent<K>(api: &Api<K>, obj: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(e) if is_conflict(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn delete_if_present<K>(api: &Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn delete_all<K>(api: &Api<K>) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api
        .delete_collection(&DeleteParams::default(), &ListParams::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Server URL of the first cluster entry of a kubeconfig.
pub fn kubeconfig_server(kubeconfig: &str) -> Option<String> {
    let parsed = Kubeconfig::from_yaml(kubeconfig).ok()?;
    parsed
        .clusters
        .into_iter()
        .find_map(|named| named.cluster.and_then(|c| c.server))
}

/// Connects to clusters through kube-rs.
#[derive(Clone)]
pub struct KubeClusterConnector {
    settings: Arc<EngineConfig>,
    http: reqwest::Client,
}

impl KubeClusterConnector {
    pub fn new(settings: Arc<EngineConfig>, http: reqwest::Client) -> Self {
        Self { settings, http }
    }
}

#[async_trait]
impl KubeConnector for KubeClusterConnector {
    async fn connect(&self, kubeconfig: &str) -> Result<Arc<dyn TargetCluster>> {
        let parsed = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|e| Error::KubeApi(format!("invalid kubeconfig: {}", e)))?;
        let mut config = kube::Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::KubeApi(format!("invalid kubeconfig: {}", e)))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);
        let client = Client::try_from(config)?;

        Ok(Arc::new(KubeTargetCluster {
            client,
            kubeconfig: kubeconfig.to_string(),
            settings: self.settings.clone(),
            http: self.http.clone(),
            helm: HelmCli::new(&self.settings.helm_path, &self.settings.chart_path),
        }))
    }
}

/// One connected cluster.
pub struct KubeTargetCluster {
    client: Client,
    kubeconfig: String,
    settings: Arc<EngineConfig>,
    http: reqwest::Client,
    helm: HelmCli,
}

impl KubeTargetCluster {
    fn namespaced<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), NAMESPACE)
    }

    async fn ensure_namespace(&self) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        create_if_absent(&namespaces, &namespace).await
    }

    async fn install_chart(&self, kubeconfig_path: &Path) -> Result<()> {
        let repo = &self.settings.install_image_repo;
        let version = &self.settings.operator_version;
        match self.helm.install_operator(kubeconfig_path, repo, version).await {
            Ok(()) => Ok(()),
            Err((HelmFailure::AlreadyExists, e)) => {
                info!(error = %e, "Operator chart already present");
                Ok(())
            }
            Err((HelmFailure::StillInUse, e)) => {
                warn!(error = %e, "Stale operator binding, retrying chart install");
                let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
                delete_if_present(&bindings, OPERATOR_NAME).await?;
                match self.helm.install_operator(kubeconfig_path, repo, version).await {
                    Ok(()) | Err((HelmFailure::AlreadyExists, _)) => Ok(()),
                    Err((_, e)) => Err(e),
                }
            }
            Err((_, e)) => Err(e),
        }
    }

    async fn suffix_identity(&self) -> Result<SuffixIdentity> {
        let configmaps: Api<ConfigMap> = self.namespaced();
        if let Some(existing) = configmaps.get_opt(SUFFIX_CONFIGMAP).await?
            && let Some(identity) = existing.data.as_ref().and_then(SuffixIdentity::from_data)
        {
            return Ok(identity);
        }

        let identity = SuffixIdentity::generate();
        let configmap = ConfigMap {
            metadata: ObjectMeta {
                name: Some(SUFFIX_CONFIGMAP.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(identity.to_data()),
            ..Default::default()
        };
        match configmaps.create(&PostParams::default(), &configmap).await {
            Ok(_) => Ok(identity),
            // Another writer got there first; use theirs.
            Err(e) if is_conflict(&e) => configmaps
                .get(SUFFIX_CONFIGMAP)
                .await?
                .data
                .as_ref()
                .and_then(SuffixIdentity::from_data)
                .ok_or_else(|| Error::KubeApi(format!("{} has no identity", SUFFIX_CONFIGMAP))),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_cluster(&self, spec: RainbondClusterSpec) -> Result<()> {
        let api: Api<RainbondCluster> = self.namespaced();
        let mut desired = RainbondCluster::new(CLUSTER_NAME, spec);
        match api.get_opt(CLUSTER_NAME).await? {
            Some(existing) => {
                desired.metadata.resource_version = existing.metadata.resource_version;
                api.replace(CLUSTER_NAME, &PostParams::default(), &desired)
                    .await?;
            }
            None => {
                api.create(&PostParams::default(), &desired).await?;
            }
        }
        Ok(())
    }

    async fn get_required<K>(&self, name: &str) -> Result<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = self.namespaced();
        api.get(name).await.map_err(|e| {
            if is_not_found(&e) {
                Error::NotFound(format!("{} {}/{}", K::kind(&Default::default()), NAMESPACE, name))
            } else {
                e.into()
            }
        })
    }

    async fn wait_namespace_gone(&self, cancel: &CancellationToken) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        poll_until(
            cancel,
            INSTALL_POLL_INTERVAL,
            INSTALL_TIMEOUT,
            "namespace deletion",
            || {
                let namespaces = namespaces.clone();
                async move { Ok(namespaces.get_opt(NAMESPACE).await?.is_none().then_some(())) }
            },
        )
        .await
    }
}

/// Volumes requested for an installation.
pub fn volume_resources(init: &RainbondInitConfig) -> Vec<RainbondVolume> {
    let labels = |mode: &str| {
        Some(BTreeMap::from([
            ("belongTo".to_string(), OPERATOR_NAME.to_string()),
            ("accessModes".to_string(), mode.to_string()),
        ]))
    };

    let rwx_spec = match &init.nas_server {
        Some(server) => RainbondVolumeSpec {
            storage_class_parameters: Some(StorageClassParameters {
                provisioner: "nasplugin.csi.alibabacloud.com".to_string(),
                parameters: BTreeMap::from([
                    ("volumeAs".to_string(), "subpath".to_string()),
                    ("server".to_string(), format!("{}:/", server)),
                ]),
            }),
            csi_plugin: Some(CsiPluginSource {
                aliyun_nas: Some(BTreeMap::new()),
                ..Default::default()
            }),
            storage_request: 1,
            ..Default::default()
        },
        None => RainbondVolumeSpec {
            csi_plugin: Some(CsiPluginSource {
                nfs: Some(BTreeMap::new()),
                ..Default::default()
            }),
            storage_request: 1,
            ..Default::default()
        },
    };
    let mut rwx = RainbondVolume::new(VOLUME_RWX_NAME, rwx_spec);
    rwx.metadata.labels = labels("rwx");
    let mut volumes = vec![rwx];

    if let Some(class) = &init.rwo_storage_class {
        let mut rwo = RainbondVolume::new(
            VOLUME_RWO_NAME,
            RainbondVolumeSpec {
                storage_class_name: Some(class.clone()),
                storage_request: 21,
                ..Default::default()
            },
        );
        rwo.metadata.labels = labels("rwo");
        volumes.push(rwo);
    }
    volumes
}

#[async_trait]
impl TargetCluster for KubeTargetCluster {
    async fn server_version(&self) -> Result<String> {
        Ok(self.client.apiserver_version().await?.git_version)
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|node| {
                let annotations = node.metadata.annotations.unwrap_or_default();
                let mut info = NodeInfo {
                    name: node.metadata.name.unwrap_or_default(),
                    ..Default::default()
                };
                if let Some(status) = node.status {
                    for address in status.addresses.unwrap_or_default() {
                        match address.type_.as_str() {
                            "InternalIP" => info.internal_ip = address.address,
                            "ExternalIP" => info.external_ip = address.address,
                            _ => {}
                        }
                    }
                    info.ready = status
                        .conditions
                        .unwrap_or_default()
                        .iter()
                        .any(|c| c.type_ == "Ready" && c.status == "True");
                }
                if let Some(external) = annotations
                    .get(EXTERNAL_ADDRESS_ANNOTATION)
                    .filter(|v| !v.is_empty())
                {
                    info.external_ip = external.clone();
                }
                info.annotations = annotations;
                info
            })
            .collect())
    }

    async fn platform_installed(&self) -> Result<bool> {
        let configmaps: Api<ConfigMap> = self.namespaced();
        let list = configmaps.list(&ListParams::default()).await?;
        Ok(list
            .items
            .iter()
            .any(|cm| cm.metadata.name.as_deref() == Some(REGION_CONFIG)))
    }

    async fn region_config(&self) -> Result<Option<RegionConfig>> {
        let configmaps: Api<ConfigMap> = self.namespaced();
        Ok(configmaps.get_opt(REGION_CONFIG).await?.map(|cm| RegionConfig {
            entries: cm.data.unwrap_or_default(),
        }))
    }

    async fn install_platform(
        &self,
        cancel: &CancellationToken,
        install: &PlatformInstall,
    ) -> Result<()> {
        let mut scratch = tempfile::Builder::new()
            .prefix("kubeconfig-")
            .tempfile()?;
        scratch.write_all(self.kubeconfig.as_bytes())?;
        scratch.flush()?;

        self.ensure_namespace().await?;

        let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        delete_if_present(&bindings, OPERATOR_NAME).await?;

        self.install_chart(scratch.path()).await?;

        poll_until(
            cancel,
            INSTALL_POLL_INTERVAL,
            INSTALL_TIMEOUT,
            "operator clusterrolebinding",
            || {
                let bindings = bindings.clone();
                async move { Ok(bindings.get_opt(OPERATOR_NAME).await?.map(|_| ())) }
            },
        )
        .await?;
        debug!(cluster_id = %install.cluster_id, "Operator clusterrolebinding present");

        let mut spec = build_cluster_spec(&self.settings, install)?;
        if spec.suffix_http_host.is_empty()
            && let Some(ip) = suffix_host_ip(&spec)
        {
            let identity = self.suffix_identity().await?;
            spec.suffix_http_host = resolve_suffix_host(
                &self.http,
                &self.settings.suffix_naming_service,
                &identity,
                &ip,
                SUFFIX_BACKOFF,
            )
            .await;
        }
        self.apply_cluster(spec).await?;

        let volumes: Api<RainbondVolume> = self.namespaced();
        for volume in volume_resources(&install.init_config) {
            create_if_absent(&volumes, &volume).await?;
        }

        let packages: Api<RainbondPackage> = self.namespaced();
        let package = RainbondPackage::new(
            PACKAGE_NAME,
            RainbondPackageSpec {
                pkg_path: PACKAGE_PATH.to_string(),
            },
        );
        create_if_absent(&packages, &package).await?;

        info!(
            enterprise_id = %install.enterprise_id,
            cluster_id = %install.cluster_id,
            "Platform resources applied"
        );
        Ok(())
    }

    async fn platform_status(&self) -> Result<PlatformStatus> {
        let deployments: Api<Deployment> = self.namespaced();
        let operator_ready = deployments
            .get_opt(OPERATOR_NAME)
            .await?
            .and_then(|d| d.status)
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
            >= 1;

        let cluster = self.get_required::<RainbondCluster>(CLUSTER_NAME).await?;
        let package = self.get_required::<RainbondPackage>(PACKAGE_NAME).await?;
        let volume = self.get_required::<RainbondVolume>(VOLUME_RWX_NAME).await?;

        Ok(PlatformStatus {
            operator_ready,
            cluster: Some(cluster),
            package: Some(package),
            volume: Some(volume),
            region_config: self.region_config().await?,
        })
    }

    async fn region_api_healthy(&self, config: &RegionConfig) -> bool {
        let (Some(address), Some(ca), Some(cert), Some(key)) = (
            config.api_address(),
            config.ca_pem(),
            config.client_pem(),
            config.client_key_pem(),
        ) else {
            return false;
        };

        let mut identity_pem = cert.as_bytes().to_vec();
        identity_pem.push(b'\n');
        identity_pem.extend_from_slice(key.as_bytes());

        let client = match (
            reqwest::Certificate::from_pem(ca.as_bytes()),
            reqwest::Identity::from_pem(&identity_pem),
        ) {
            (Ok(ca), Ok(identity)) => reqwest::Client::builder()
                .add_root_certificate(ca)
                .identity(identity)
                .timeout(HEALTH_TIMEOUT)
                .build(),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Region config carries unusable certificates");
                return false;
            }
        };
        let client = match client {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Failed to build region API client");
                return false;
            }
        };

        let url = format!("{}/v2/health", address.trim_end_matches('/'));
        match client.get(&url).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(url = %url, error = %e, "Region API not healthy yet");
                false
            }
        }
    }

    async fn uninstall_platform(&self, cancel: &CancellationToken) -> Result<()> {
        info!("Uninstalling platform");
        delete_all(&self.namespaced::<RbdComponent>()).await?;
        delete_all(&self.namespaced::<RainbondPackage>()).await?;
        delete_all(&self.namespaced::<RainbondVolume>()).await?;

        let claims: Api<PersistentVolumeClaim> = self.namespaced();
        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        for claim in claims.list(&ListParams::default()).await?.items {
            if let Some(volume) = claim.spec.as_ref().and_then(|s| s.volume_name.as_deref()) {
                delete_if_present(&volumes, volume).await?;
            }
            if let Some(name) = claim.metadata.name.as_deref() {
                delete_if_present(&claims, name).await?;
            }
        }

        let labelled = ListParams::default().labels(CREATOR_SELECTOR);
        let classes: Api<StorageClass> = Api::all(self.client.clone());
        for class in classes.list(&labelled).await?.items {
            if let Some(name) = class.metadata.name.as_deref() {
                delete_if_present(&classes, name).await?;
            }
        }
        let drivers: Api<CSIDriver> = Api::all(self.client.clone());
        for driver in drivers.list(&labelled).await?.items {
            if let Some(name) = driver.metadata.name.as_deref() {
                delete_if_present(&drivers, name).await?;
            }
        }

        let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        delete_if_present(&bindings, OPERATOR_NAME).await?;
        delete_if_present(&self.namespaced::<RainbondCluster>(), CLUSTER_NAME).await?;

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        delete_if_present(&namespaces, NAMESPACE).await?;
        self.wait_namespace_gone(cancel).await?;
        info!("Platform uninstalled");
        Ok(())
    }
}
