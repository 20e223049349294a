// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use cloud_adaptor_core::steps;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::StepEmitter;
use crate::adaptor::{CloudAdaptor, ExpansionNodeRequest, Provider};
use crate::error::{Error, Result};

/// Re-run the installer of an RKE cluster with a new node list.
pub struct UpdateTask {
    adaptor: Arc<dyn CloudAdaptor>,
    enterprise_id: String,
    request: ExpansionNodeRequest,
}

impl UpdateTask {
    pub fn new(
        adaptor: Arc<dyn CloudAdaptor>,
        enterprise_id: &str,
        request: ExpansionNodeRequest,
    ) -> Self {
        Self {
            adaptor,
            enterprise_id: enterprise_id.to_string(),
            request,
        }
    }

    pub(super) async fn run(&self, cancel: &CancellationToken, emitter: &StepEmitter) -> Result<()> {
        emitter.start(steps::INIT, "update kubernetes task started").await;
        let provider = self.adaptor.provider();
        if provider != Provider::Rke {
            return Err(Error::NotSupportUpdateKubernetes(provider.to_string()));
        }
        emitter
            .success(steps::INIT, format!("{} nodes requested", self.request.nodes.len()))
            .await;

        if let Some(cluster) = self
            .adaptor
            .expansion_node(cancel, &self.enterprise_id, &self.request, emitter)
            .await?
        {
            info!(
                enterprise_id = %self.enterprise_id,
                cluster_id = %cluster.cluster_id,
                "Kubernetes cluster updated"
            );
        }
        Ok(())
    }
}
