// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credentials and node bootstrap.

use cloud_adaptor_core::model::CloudCredential;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::ClusterUsecase;
use crate::adaptor::Provider;
use crate::adaptor::rke::ssh::{default_ssh_dir, ensure_keypair, init_node_command};
use crate::error::{Error, Result};

/// Body of a store-credential request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessKeyRequest {
    #[serde(alias = "providerName")]
    pub provider_name: String,
    #[serde(alias = "accessKey")]
    pub access_key: String,
    #[serde(alias = "secretKey")]
    pub secret_key: String,
}

impl ClusterUsecase {
    /// Store (or replace) the enterprise's credential for a provider.
    pub async fn put_access_key(
        &self,
        enterprise_id: &str,
        request: AccessKeyRequest,
    ) -> Result<CloudCredential> {
        let provider: Provider = request.provider_name.parse()?;
        if request.access_key.is_empty() || request.secret_key.is_empty() {
            return Err(Error::BadRequest(
                "access_key and secret_key are required".to_string(),
            ));
        }
        let credential = CloudCredential {
            enterprise_id: enterprise_id.to_string(),
            provider_name: provider.to_string(),
            access_key: request.access_key,
            secret_key: request.secret_key,
        };
        self.persistence.put_credential(&credential).await?;
        info!(enterprise_id, provider = %provider, "Access key stored");
        Ok(credential.redacted())
    }

    /// Stored credential with the secret replaced by its digest.
    pub async fn get_access_key(
        &self,
        enterprise_id: &str,
        provider_name: &str,
    ) -> Result<CloudCredential> {
        let provider: Provider = provider_name.parse()?;
        self.persistence
            .get_credential(enterprise_id, provider.as_str())
            .await?
            .map(|c| c.redacted())
            .ok_or_else(|| Error::NotSetAccessKey(provider.to_string()))
    }

    /// Command that authorizes this server's SSH key on a new node.
    pub async fn init_node_cmd(&self) -> Result<String> {
        let dir = match &self.ssh_dir {
            Some(dir) => dir.clone(),
            None => default_ssh_dir()?,
        };
        let keypair = ensure_keypair(dir).await?;
        Ok(init_node_command(&keypair.public_key))
    }
}
