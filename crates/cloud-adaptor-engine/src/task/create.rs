// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use cloud_adaptor_core::steps;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::StepEmitter;
use crate::adaptor::{CloudAdaptor, KubernetesClusterConfig};
use crate::error::Result;

/// Provision (or import) a Kubernetes cluster through one adaptor.
pub struct CreateTask {
    adaptor: Arc<dyn CloudAdaptor>,
    enterprise_id: String,
    config: KubernetesClusterConfig,
}

impl CreateTask {
    pub fn new(
        adaptor: Arc<dyn CloudAdaptor>,
        enterprise_id: &str,
        config: KubernetesClusterConfig,
    ) -> Self {
        Self {
            adaptor,
            enterprise_id: enterprise_id.to_string(),
            config,
        }
    }

    pub(super) async fn run(&self, cancel: &CancellationToken, emitter: &StepEmitter) -> Result<()> {
        emitter.start(steps::INIT, "create kubernetes task started").await;
        emitter
            .success(
                steps::INIT,
                format!("using provider {}", self.adaptor.provider()),
            )
            .await;

        let cluster = self
            .adaptor
            .create_rainbond_kubernetes(cancel, &self.enterprise_id, &self.config, emitter)
            .await?;
        info!(
            enterprise_id = %self.enterprise_id,
            cluster_id = %cluster.cluster_id,
            provider = %self.adaptor.provider(),
            "Kubernetes cluster ready"
        );
        Ok(())
    }
}
