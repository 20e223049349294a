// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Test doubles for adaptors, installers and target clusters.
//!
//! Available to unit tests and, through the `testing` feature, to other
//! crates' integration tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cloud_adaptor_core::model::{CloudCredential, Cluster, ClusterState};
use cloud_adaptor_core::persistence::{Persistence, SqlitePersistence};
use cloud_adaptor_core::steps;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adaptor::rke::ClusterInstaller;
use crate::adaptor::{
    AdaptorFactory, CloudAdaptor, ExpansionNodeRequest, KubernetesClusterConfig, Provider,
};
use crate::error::{Error, Result};
use crate::operator::crd::{
    self, Condition, ImageHub, RainbondCluster, RainbondClusterSpec, RainbondPackage,
    RainbondPackageSpec, RainbondPackageStatus,
};
use crate::operator::{
    KubeConnector, NodeInfo, PlatformInstall, PlatformStatus, RainbondInitConfig, RegionConfig,
    TargetCluster,
};
use crate::task::{CHANNEL_CAPACITY, Message, StepEmitter};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fresh in-memory store with migrations applied.
pub async fn test_persistence() -> Arc<dyn Persistence> {
    match SqlitePersistence::in_memory().await {
        Ok(persistence) => Arc::new(persistence),
        Err(e) => panic!("in-memory sqlite: {}", e),
    }
}

/// Emitter whose messages are collected until every clone is dropped.
pub fn collect_messages() -> (StepEmitter, BoxFuture<'static, Vec<Message>>) {
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(message) = rx.recv().await {
            out.push(message);
        }
        out
    });
    (
        StepEmitter::new(tx),
        async move { collector.await.unwrap_or_default() }.boxed(),
    )
}

/// Snapshot of a platform that finished installing.
pub fn ready_platform_status() -> PlatformStatus {
    let spec = RainbondClusterSpec {
        image_hub: Some(ImageHub {
            domain: "goodrain.me".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut package = RainbondPackage::new(crd::PACKAGE_NAME, RainbondPackageSpec::default());
    package.status = Some(RainbondPackageStatus {
        conditions: vec![Condition {
            type_: "Ready".to_string(),
            status: "Completed".to_string(),
            ..Default::default()
        }],
    });
    PlatformStatus {
        operator_ready: true,
        cluster: Some(RainbondCluster::new(crd::CLUSTER_NAME, spec)),
        package: Some(package),
        volume: None,
        region_config: Some(RegionConfig {
            entries: BTreeMap::from([(
                "apiAddress".to_string(),
                "https://10.0.0.1:8443".to_string(),
            )]),
        }),
    }
}

enum ScriptedStatus {
    Status(PlatformStatus),
    NotFound,
}

struct TargetState {
    version: String,
    nodes: usize,
    delay: Duration,
    platform_installed: bool,
    region_config: Option<RegionConfig>,
    region_healthy: bool,
    statuses: VecDeque<ScriptedStatus>,
    installs: Vec<PlatformInstall>,
    uninstalls: usize,
}

/// In-memory [`TargetCluster`]. Clones share state.
#[derive(Clone)]
pub struct MockTargetCluster {
    state: Arc<Mutex<TargetState>>,
}

impl Default for MockTargetCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTargetCluster {
    /// One ready node, version `v1.18.3`, no platform.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TargetState {
                version: "v1.18.3".to_string(),
                nodes: 1,
                delay: Duration::ZERO,
                platform_installed: false,
                region_config: None,
                region_healthy: true,
                statuses: VecDeque::new(),
                installs: Vec::new(),
                uninstalls: 0,
            })),
        }
    }

    pub fn with_version(self, version: &str) -> Self {
        lock(&self.state).version = version.to_string();
        self
    }

    pub fn with_nodes(self, nodes: usize) -> Self {
        lock(&self.state).nodes = nodes;
        self
    }

    /// Every API call sleeps this long first.
    pub fn with_delay(self, delay: Duration) -> Self {
        lock(&self.state).delay = delay;
        self
    }

    pub fn set_platform_installed(&self, installed: bool) {
        lock(&self.state).platform_installed = installed;
    }

    pub fn set_region_config(&self, config: Option<RegionConfig>) {
        lock(&self.state).region_config = config;
    }

    pub fn set_region_healthy(&self, healthy: bool) {
        lock(&self.state).region_healthy = healthy;
    }

    /// Queue a readiness snapshot. Snapshots are served in order; the last one
    /// repeats.
    pub fn script_status(&self, status: PlatformStatus) {
        lock(&self.state)
            .statuses
            .push_back(ScriptedStatus::Status(status));
    }

    /// Queue a missing custom resource.
    pub fn script_not_found(&self) {
        lock(&self.state).statuses.push_back(ScriptedStatus::NotFound);
    }

    pub fn installs(&self) -> Vec<PlatformInstall> {
        lock(&self.state).installs.clone()
    }

    pub fn uninstalls(&self) -> usize {
        lock(&self.state).uninstalls
    }

    async fn pause(&self) {
        let delay = lock(&self.state).delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl TargetCluster for MockTargetCluster {
    async fn server_version(&self) -> Result<String> {
        self.pause().await;
        Ok(lock(&self.state).version.clone())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        self.pause().await;
        let count = lock(&self.state).nodes;
        Ok((0..count)
            .map(|i| NodeInfo {
                name: format!("node-{}", i + 1),
                internal_ip: format!("10.0.0.{}", i + 1),
                ready: true,
                ..Default::default()
            })
            .collect())
    }

    async fn platform_installed(&self) -> Result<bool> {
        self.pause().await;
        Ok(lock(&self.state).platform_installed)
    }

    async fn region_config(&self) -> Result<Option<RegionConfig>> {
        self.pause().await;
        Ok(lock(&self.state).region_config.clone())
    }

    async fn install_platform(
        &self,
        _cancel: &CancellationToken,
        install: &PlatformInstall,
    ) -> Result<()> {
        self.pause().await;
        lock(&self.state).installs.push(install.clone());
        Ok(())
    }

    async fn platform_status(&self) -> Result<PlatformStatus> {
        self.pause().await;
        let mut state = lock(&self.state);
        let next = if state.statuses.len() > 1 {
            state.statuses.pop_front()
        } else {
            None
        };
        let current = next.as_ref().or(state.statuses.front());
        match current {
            Some(ScriptedStatus::Status(status)) => Ok(status.clone()),
            Some(ScriptedStatus::NotFound) => Err(Error::NotFound(
                "rainbondcluster rbd-system/rainbondcluster".to_string(),
            )),
            None => Ok(PlatformStatus::default()),
        }
    }

    async fn region_api_healthy(&self, _config: &RegionConfig) -> bool {
        self.pause().await;
        lock(&self.state).region_healthy
    }

    async fn uninstall_platform(&self, _cancel: &CancellationToken) -> Result<()> {
        self.pause().await;
        let mut state = lock(&self.state);
        state.uninstalls += 1;
        state.platform_installed = false;
        state.region_config = None;
        Ok(())
    }
}

/// Maps kubeconfig strings to mock clusters. Anything unregistered fails to
/// connect.
#[derive(Clone, Default)]
pub struct MockConnector {
    targets: Arc<Mutex<HashMap<String, MockTargetCluster>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kubeconfig: &str, target: MockTargetCluster) {
        lock(&self.targets).insert(kubeconfig.to_string(), target);
    }
}

#[async_trait]
impl KubeConnector for MockConnector {
    async fn connect(&self, kubeconfig: &str) -> Result<Arc<dyn TargetCluster>> {
        match lock(&self.targets).get(kubeconfig) {
            Some(target) => Ok(Arc::new(target.clone())),
            None => Err(Error::KubeApi("invalid kubeconfig".to_string())),
        }
    }
}

/// [`ClusterInstaller`] that answers with a fixed kubeconfig.
#[derive(Clone)]
pub struct MockInstaller {
    kubeconfig: Option<String>,
    runs: Arc<AtomicUsize>,
}

impl MockInstaller {
    pub fn new(kubeconfig: &str) -> Self {
        Self {
            kubeconfig: Some(kubeconfig.to_string()),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            kubeconfig: None,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterInstaller for MockInstaller {
    async fn up(&self, _cancel: &CancellationToken, _cluster_dir: &Path) -> Result<String> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.kubeconfig
            .clone()
            .ok_or_else(|| Error::Other("rke up failed: exit status 1".to_string()))
    }
}

struct AdaptorState {
    clusters: Vec<(Cluster, String)>,
    fail_create: Option<String>,
    panic_create: bool,
    create_delay: Duration,
    expansions: usize,
}

/// Scripted [`CloudAdaptor`]. Clones share state.
#[derive(Clone)]
pub struct MockAdaptor {
    provider: Provider,
    state: Arc<Mutex<AdaptorState>>,
}

impl MockAdaptor {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(AdaptorState {
                clusters: Vec::new(),
                fail_create: None,
                panic_create: false,
                create_delay: Duration::ZERO,
                expansions: 0,
            })),
        }
    }

    /// Known cluster and the kubeconfig returned for it.
    pub fn with_cluster(self, cluster: Cluster, kubeconfig: &str) -> Self {
        lock(&self.state)
            .clusters
            .push((cluster, kubeconfig.to_string()));
        self
    }

    pub fn failing_create(self, message: &str) -> Self {
        lock(&self.state).fail_create = Some(message.to_string());
        self
    }

    pub fn panicking_create(self) -> Self {
        lock(&self.state).panic_create = true;
        self
    }

    /// Create waits this long, or until cancelled.
    pub fn with_create_delay(self, delay: Duration) -> Self {
        lock(&self.state).create_delay = delay;
        self
    }

    pub fn expansions(&self) -> usize {
        lock(&self.state).expansions
    }

    fn find(&self, cluster_id: &str) -> Result<(Cluster, String)> {
        lock(&self.state)
            .clusters
            .iter()
            .find(|(c, _)| c.cluster_id == cluster_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("cluster {}", cluster_id)))
    }
}

#[async_trait]
impl CloudAdaptor for MockAdaptor {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn list_clusters(&self, _enterprise_id: &str) -> Result<Vec<Cluster>> {
        Ok(lock(&self.state)
            .clusters
            .iter()
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn describe_cluster(&self, _enterprise_id: &str, cluster_id: &str) -> Result<Cluster> {
        Ok(self.find(cluster_id)?.0)
    }

    async fn create_rainbond_kubernetes(
        &self,
        cancel: &CancellationToken,
        enterprise_id: &str,
        config: &KubernetesClusterConfig,
        emitter: &StepEmitter,
    ) -> Result<Cluster> {
        emitter
            .start(steps::CREATE_CLUSTER, "creating kubernetes cluster")
            .await;
        let (fail, panic, delay) = {
            let state = lock(&self.state);
            (state.fail_create.clone(), state.panic_create, state.create_delay)
        };
        if panic {
            panic!("scripted adaptor panic");
        }
        if let Some(message) = fail {
            return Err(Error::CloudApi(message));
        }
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let cluster = Cluster {
            cluster_id: config.cluster_id.clone(),
            name: config.cluster_name.clone(),
            enterprise_id: enterprise_id.to_string(),
            provider_name: self.provider.to_string(),
            state: ClusterState::Running,
            ..Default::default()
        };
        lock(&self.state)
            .clusters
            .push((cluster.clone(), config.kubeconfig.clone()));
        emitter
            .success(steps::CREATE_CLUSTER, "kubernetes cluster is running")
            .await;
        Ok(cluster)
    }

    async fn get_kube_config(&self, _enterprise_id: &str, cluster_id: &str) -> Result<String> {
        Ok(self.find(cluster_id)?.1)
    }

    async fn delete_cluster(&self, _enterprise_id: &str, cluster_id: &str) -> Result<()> {
        let (cluster, _) = self.find(cluster_id)?;
        if cluster.platform_installed {
            return Err(Error::ClusterNotAllowDelete(cluster_id.to_string()));
        }
        lock(&self.state)
            .clusters
            .retain(|(c, _)| c.cluster_id != cluster_id);
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
            eips: gateway_nodes.iter().map(|n| n.internal_ip.clone()).collect(),
            ..Default::default()
        })
    }

    async fn expansion_node(
        &self,
        _cancel: &CancellationToken,
        _enterprise_id: &str,
        request: &ExpansionNodeRequest,
        emitter: &StepEmitter,
    ) -> Result<Option<Cluster>> {
        if self.provider != Provider::Rke {
            return Ok(None);
        }
        emitter
            .start(steps::UPDATE_KUBERNETES, "updating kubernetes cluster")
            .await;
        lock(&self.state).expansions += 1;
        emitter
            .success(steps::UPDATE_KUBERNETES, "kubernetes cluster updated")
            .await;
        Ok(Some(Cluster {
            cluster_id: request.cluster_id.clone(),
            state: ClusterState::Running,
            ..Default::default()
        }))
    }
}

/// Factory handing out [`MockAdaptor`]s. Registered adaptors are shared;
/// other providers get a fresh one per call.
#[derive(Clone, Default)]
pub struct MockAdaptorFactory {
    adaptors: Arc<Mutex<HashMap<Provider, MockAdaptor>>>,
}

impl MockAdaptorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adaptor(self, adaptor: MockAdaptor) -> Self {
        lock(&self.adaptors).insert(adaptor.provider, adaptor);
        self
    }
}

impl AdaptorFactory for MockAdaptorFactory {
    fn build(
        &self,
        provider: Provider,
        _credential: Option<&CloudCredential>,
    ) -> Result<Arc<dyn CloudAdaptor>> {
        let adaptor = lock(&self.adaptors)
            .get(&provider)
            .cloned()
            .unwrap_or_else(|| MockAdaptor::new(provider));
        Ok(Arc::new(adaptor))
    }
}
