// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for cloud-adaptor-engine.
//!
//! [`EngineRuntime`] wires persistence, the message bus, the task handlers and
//! the [`ClusterUsecase`] together so the engine can run inside any tokio
//! application. The HTTP server is one such application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cloud_adaptor_core::persistence::SqlitePersistence;
//! use cloud_adaptor_engine::config::EngineConfig;
//! use cloud_adaptor_engine::runtime::{BusConfig, EngineRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::from_path("/tmp/cloudadaptor.db").await?);
//!
//!     let runtime = EngineRuntime::builder()
//!         .persistence(persistence)
//!         .settings(EngineConfig::from_env()?)
//!         .bus(BusConfig::InProcess)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let clusters = runtime.usecase().list_clusters("E1", "custom").await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cloud_adaptor_core::persistence::Persistence;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::adaptor::rke::{ClusterInstaller, RkeBinary};
use crate::adaptor::{AdaptorFactory, AdaptorResolver, DefaultAdaptorFactory};
use crate::bus::{self, NsqConsumer, NsqProducer, TaskProducer, TaskQueues};
use crate::config::EngineConfig;
use crate::handler::TaskHandler;
use crate::operator::KubeConnector;
use crate::operator::kube::KubeClusterConnector;
use crate::task::TaskFactory;
use crate::usecase::ClusterUsecase;

/// How long [`EngineRuntime::shutdown`] waits for running tasks to close.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Message bus selection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BusConfig {
    /// Bounded channels inside this process.
    #[default]
    InProcess,
    /// NSQ topics `cloud-create`, `cloud-init` and `cloud-update`.
    Nsq {
        /// `host:port` of nsqlookupd's HTTP interface.
        lookupd: String,
        /// `host:port` of nsqd's TCP interface.
        nsqd: String,
    },
}

/// Builder for an [`EngineRuntime`].
#[derive(Default)]
pub struct EngineRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    settings: Option<EngineConfig>,
    bus: BusConfig,
    connector: Option<Arc<dyn KubeConnector>>,
    installer: Option<Arc<dyn ClusterInstaller>>,
    adaptor_factory: Option<Arc<dyn AdaptorFactory>>,
    ssh_dir: Option<PathBuf>,
    init_timing: Option<(Duration, Duration)>,
}

impl EngineRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the engine settings.
    ///
    /// Default: [`EngineConfig::default`]
    pub fn settings(mut self, settings: EngineConfig) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Select the message bus.
    ///
    /// Default: [`BusConfig::InProcess`]
    pub fn bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    /// Replace the connector used to reach target clusters.
    pub fn connector(mut self, connector: Arc<dyn KubeConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the RKE installer.
    ///
    /// Default: the `rke` binary at `RKE_PATH`.
    pub fn installer(mut self, installer: Arc<dyn ClusterInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Replace the adaptor factory. `installer` is then unused.
    pub fn adaptor_factory(mut self, factory: Arc<dyn AdaptorFactory>) -> Self {
        self.adaptor_factory = Some(factory);
        self
    }

    /// Directory holding the SSH keypair.
    ///
    /// Default: `~/.ssh`
    pub fn ssh_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ssh_dir = Some(dir.into());
        self
    }

    /// Tick and deadline of the platform readiness loop.
    pub fn init_timing(mut self, tick: Duration, deadline: Duration) -> Self {
        self.init_timing = Some((tick, deadline));
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        if let BusConfig::Nsq { lookupd, nsqd } = &self.bus
            && (lookupd.is_empty() || nsqd.is_empty())
        {
            anyhow::bail!("nsq bus needs both a lookupd and an nsqd address");
        }

        Ok(EngineRuntimeConfig {
            persistence,
            settings: Arc::new(self.settings.unwrap_or_default()),
            bus: self.bus,
            connector: self.connector,
            installer: self.installer,
            adaptor_factory: self.adaptor_factory,
            ssh_dir: self.ssh_dir,
            init_timing: self.init_timing,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    settings: Arc<EngineConfig>,
    bus: BusConfig,
    connector: Option<Arc<dyn KubeConnector>>,
    installer: Option<Arc<dyn ClusterInstaller>>,
    adaptor_factory: Option<Arc<dyn AdaptorFactory>>,
    ssh_dir: Option<PathBuf>,
    init_timing: Option<(Duration, Duration)>,
}

impl EngineRuntimeConfig {
    /// Start the bus and the task handlers.
    pub async fn start(self) -> Result<EngineRuntime> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(KubeClusterConnector::new(self.settings.clone(), http.clone()))
        });

        let factory = match self.adaptor_factory {
            Some(factory) => factory,
            None => {
                let installer = self.installer.unwrap_or_else(|| {
                    Arc::new(RkeBinary::new(self.settings.rke_path.clone()))
                });
                let mut factory = DefaultAdaptorFactory::new(
                    self.persistence.clone(),
                    connector.clone(),
                    installer,
                    self.settings.clone(),
                    http.clone(),
                );
                if let Some(dir) = &self.ssh_dir {
                    factory = factory.with_ssh_dir(dir.clone());
                }
                Arc::new(factory)
            }
        };
        let resolver = AdaptorResolver::new(self.persistence.clone(), factory);

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (producer, queues): (Arc<dyn TaskProducer>, TaskQueues) = match &self.bus {
            BusConfig::InProcess => {
                let (producer, queues) = bus::in_process();
                (Arc::new(producer), queues)
            }
            BusConfig::Nsq { lookupd, nsqd } => {
                let producer = NsqProducer::new(nsqd.clone());
                let queues = NsqConsumer::new(http.clone(), lookupd.clone())
                    .subscribe(cancel.clone(), &tracker);
                (Arc::new(producer), queues)
            }
        };

        let mut tasks = TaskFactory::new(
            resolver.clone(),
            connector.clone(),
            self.persistence.clone(),
        );
        if let Some((tick, deadline)) = self.init_timing {
            tasks = tasks.with_init_timing(tick, deadline);
        }
        let handler = Arc::new(TaskHandler::new(
            tasks,
            self.persistence.clone(),
            tracker.clone(),
            cancel.clone(),
        ));
        handler.start(queues);

        let mut usecase = ClusterUsecase::new(
            resolver,
            self.persistence.clone(),
            producer,
            connector,
            self.settings.clone(),
        )
        .with_cancel(cancel.clone());
        if let Some(dir) = &self.ssh_dir {
            usecase = usecase.with_ssh_dir(dir.clone());
        }

        info!(
            bus = match self.bus {
                BusConfig::InProcess => "in-process",
                BusConfig::Nsq { .. } => "nsq",
            },
            rainbond_version = %self.settings.rainbond_version,
            "EngineRuntime started"
        );

        Ok(EngineRuntime {
            usecase: Arc::new(usecase),
            handler,
            persistence: self.persistence,
            cancel,
            tracker,
        })
    }
}

/// A running engine.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EngineRuntime {
    usecase: Arc<ClusterUsecase>,
    handler: Arc<TaskHandler>,
    persistence: Arc<dyn Persistence>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl EngineRuntime {
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The programmatic surface of the engine.
    pub fn usecase(&self) -> &Arc<ClusterUsecase> {
        &self.usecase
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Number of tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.handler.in_flight()
    }

    /// Cancel running tasks and wait for them to emit `Close`.
    pub async fn shutdown(self) -> Result<()> {
        info!(in_flight = self.handler.in_flight(), "EngineRuntime shutting down...");
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.handler.in_flight(),
                "Tasks still running after drain timeout"
            );
        }
        info!("EngineRuntime shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_persistence;

    #[test]
    fn test_build_requires_persistence() {
        let err = EngineRuntime::builder().build().err().expect("should fail");
        assert!(err.to_string().contains("persistence"));
    }

    #[tokio::test]
    async fn test_nsq_needs_addresses() {
        let err = EngineRuntime::builder()
            .persistence(test_persistence().await)
            .bus(BusConfig::Nsq {
                lookupd: "127.0.0.1:4161".to_string(),
                nsqd: String::new(),
            })
            .build()
            .err()
            .expect("should fail");
        assert!(err.to_string().contains("nsqd"));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runtime = EngineRuntime::builder()
            .persistence(test_persistence().await)
            .build()
            .expect("build")
            .start()
            .await
            .expect("start");
        assert_eq!(runtime.in_flight(), 0);
        runtime.shutdown().await.expect("shutdown");
    }
}
