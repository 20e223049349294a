// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster usecase: one method per user intent.
//!
//! Methods resolve the adaptor for the requested provider (loading the
//! credential where one is needed), translate lower-level failures into the
//! typed error codes of [`Error`], and never wait for a task to finish.
//! Task submissions persist the task row before publishing it, so a crash in
//! between leaves a visible `pending` row.

use std::path::PathBuf;
use std::sync::Arc;

use cloud_adaptor_core::EventSink;
use cloud_adaptor_core::model::ConfigNode;
use cloud_adaptor_core::persistence::Persistence;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::adaptor::{AdaptorResolver, CloudAdaptor};
use crate::bus::TaskProducer;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::operator::KubeConnector;

mod access;
mod cluster;
mod tasks;

pub use access::AccessKeyRequest;
pub use cluster::{PlatformConfig, RegionConfigView};

/// Body of a create-cluster request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateClusterRequest {
    #[serde(alias = "providerName")]
    pub provider_name: String,
    pub name: String,
    #[serde(alias = "regionID")]
    pub region_id: String,
    #[serde(alias = "vpcID")]
    pub vpc_id: String,
    #[serde(alias = "vSwitchID")]
    pub vswitch_id: String,
    #[serde(alias = "workerResourceType")]
    pub worker_resource_type: String,
    #[serde(alias = "workerNum")]
    pub worker_num: u32,
    #[serde(alias = "kubernetesVersion")]
    pub kubernetes_version: String,
    #[serde(alias = "networkPlugin")]
    pub network_plugin: String,
    #[serde(alias = "podCIDR")]
    pub pod_cidr: String,
    #[serde(alias = "serviceCIDR")]
    pub service_cidr: String,
    /// RKE node manifest.
    #[serde(alias = "nodeList")]
    pub nodes: Vec<ConfigNode>,
    /// Imported clusters only.
    pub kubeconfig: String,
    /// Public gateway addresses of an imported cluster.
    #[serde(alias = "eips")]
    pub eip: Vec<String>,
}

/// Body of an init-platform request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitClusterRequest {
    #[serde(alias = "providerName")]
    pub provider_name: String,
    #[serde(alias = "clusterID")]
    pub cluster_id: String,
    /// Submit even if the previous init task has not terminated.
    pub retry: bool,
}

/// Body of an update-cluster request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateClusterRequest {
    #[serde(alias = "providerName")]
    pub provider_name: String,
    #[serde(alias = "clusterID")]
    pub cluster_id: String,
    #[serde(alias = "nodeList")]
    pub nodes: Vec<ConfigNode>,
}

/// Programmatic surface of the engine.
pub struct ClusterUsecase {
    resolver: AdaptorResolver,
    persistence: Arc<dyn Persistence>,
    sink: EventSink,
    producer: Arc<dyn TaskProducer>,
    connector: Arc<dyn KubeConnector>,
    settings: Arc<EngineConfig>,
    ssh_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl ClusterUsecase {
    pub fn new(
        resolver: AdaptorResolver,
        persistence: Arc<dyn Persistence>,
        producer: Arc<dyn TaskProducer>,
        connector: Arc<dyn KubeConnector>,
        settings: Arc<EngineConfig>,
    ) -> Self {
        Self {
            resolver,
            sink: EventSink::new(persistence.clone()),
            persistence,
            producer,
            connector,
            settings,
            ssh_dir: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Directory holding the server's SSH keypair; defaults to `~/.ssh`.
    pub fn with_ssh_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ssh_dir = Some(dir.into());
        self
    }

    /// Token that aborts long synchronous calls such as uninstall.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn adaptor(&self, enterprise_id: &str, provider_name: &str) -> Result<Arc<dyn CloudAdaptor>> {
        self.resolver.resolve(enterprise_id, provider_name).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::adaptor::AdaptorFactory;
    use crate::bus::{TaskQueues, in_process};
    use crate::testing::{MockAdaptorFactory, MockConnector, test_persistence};

    pub(crate) struct Fixture {
        pub usecase: ClusterUsecase,
        pub persistence: Arc<dyn Persistence>,
        pub queues: TaskQueues,
        pub connector: MockConnector,
        pub dir: tempfile::TempDir,
    }

    pub(crate) async fn fixture_with(factory: impl AdaptorFactory + 'static) -> Fixture {
        let persistence = test_persistence().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = MockConnector::new();
        let settings = EngineConfig {
            config_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let (producer, queues) = in_process();
        let usecase = ClusterUsecase::new(
            AdaptorResolver::new(persistence.clone(), Arc::new(factory)),
            persistence.clone(),
            Arc::new(producer),
            Arc::new(connector.clone()),
            Arc::new(settings),
        )
        .with_ssh_dir(dir.path().join("ssh"));
        Fixture {
            usecase,
            persistence,
            queues,
            connector,
            dir,
        }
    }

    pub(crate) async fn fixture() -> Fixture {
        fixture_with(MockAdaptorFactory::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_accept_camel_case_aliases() {
        let request: InitClusterRequest = serde_json::from_value(serde_json::json!({
            "providerName": "custom",
            "clusterID": "c1",
            "retry": true
        }))
        .expect("decode");
        assert_eq!(request.provider_name, "custom");
        assert_eq!(request.cluster_id, "c1");
        assert!(request.retry);

        let request: CreateClusterRequest = serde_json::from_value(serde_json::json!({
            "name": "c1",
            "provider_name": "custom",
            "kubeconfig": "kc",
            "eip": ["1.2.3.4"]
        }))
        .expect("decode");
        assert_eq!(request.eip, vec!["1.2.3.4".to_string()]);
        assert!(request.nodes.is_empty());
    }
}
