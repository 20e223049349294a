// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adaptor construction and credential resolution.

use std::path::PathBuf;
use std::sync::Arc;

use cloud_adaptor_core::model::CloudCredential;
use cloud_adaptor_core::persistence::Persistence;

use super::custom::CustomAdaptor;
use super::managed::ManagedAdaptor;
use super::managed::aliyun::AliyunVendor;
use super::rke::{ClusterInstaller, RkeAdaptor};
use super::{ClusterProbe, CloudAdaptor, Provider};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::operator::KubeConnector;

/// Builds an adaptor for a provider and, where needed, its credential.
pub trait AdaptorFactory: Send + Sync {
    fn build(
        &self,
        provider: Provider,
        credential: Option<&CloudCredential>,
    ) -> Result<Arc<dyn CloudAdaptor>>;
}

/// Production factory.
pub struct DefaultAdaptorFactory {
    persistence: Arc<dyn Persistence>,
    connector: Arc<dyn KubeConnector>,
    installer: Arc<dyn ClusterInstaller>,
    settings: Arc<EngineConfig>,
    http: reqwest::Client,
    ssh_dir: Option<PathBuf>,
}

impl DefaultAdaptorFactory {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        connector: Arc<dyn KubeConnector>,
        installer: Arc<dyn ClusterInstaller>,
        settings: Arc<EngineConfig>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            persistence,
            connector,
            installer,
            settings,
            http,
            ssh_dir: None,
        }
    }

    /// Directory holding the SSH keypair used by RKE; defaults to `~/.ssh`.
    pub fn with_ssh_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ssh_dir = Some(dir.into());
        self
    }

    fn probe(&self) -> ClusterProbe {
        ClusterProbe::new(self.connector.clone(), self.settings.kubernetes_versions)
    }
}

impl AdaptorFactory for DefaultAdaptorFactory {
    fn build(
        &self,
        provider: Provider,
        credential: Option<&CloudCredential>,
    ) -> Result<Arc<dyn CloudAdaptor>> {
        match provider {
            Provider::Custom => Ok(Arc::new(CustomAdaptor::new(
                self.persistence.clone(),
                self.probe(),
            ))),
            Provider::Rke => {
                let mut adaptor = RkeAdaptor::new(
                    self.persistence.clone(),
                    self.probe(),
                    self.installer.clone(),
                    self.settings.clone(),
                );
                if let Some(dir) = &self.ssh_dir {
                    adaptor = adaptor.with_ssh_dir(dir.clone());
                }
                Ok(Arc::new(adaptor))
            }
            Provider::Ack => {
                let credential =
                    credential.ok_or_else(|| Error::NotFoundAccessKey(provider.to_string()))?;
                let vendor = AliyunVendor::new(
                    self.http.clone(),
                    &credential.access_key,
                    &credential.secret_key,
                );
                Ok(Arc::new(ManagedAdaptor::new(
                    provider,
                    Arc::new(vendor),
                    self.persistence.clone(),
                    self.probe(),
                    &credential.secret_key,
                )))
            }
        }
    }
}

/// Resolves `(enterprise, provider name)` to an adaptor, loading the
/// credential for providers that need one.
#[derive(Clone)]
pub struct AdaptorResolver {
    persistence: Arc<dyn Persistence>,
    factory: Arc<dyn AdaptorFactory>,
}

impl AdaptorResolver {
    pub fn new(persistence: Arc<dyn Persistence>, factory: Arc<dyn AdaptorFactory>) -> Self {
        Self {
            persistence,
            factory,
        }
    }

    pub async fn resolve(
        &self,
        enterprise_id: &str,
        provider_name: &str,
    ) -> Result<Arc<dyn CloudAdaptor>> {
        let provider: Provider = provider_name.parse()?;
        if !provider.needs_credential() {
            return self.factory.build(provider, None);
        }

        let credential = self
            .persistence
            .get_credential(enterprise_id, provider.as_str())
            .await?
            .filter(|c| !c.access_key.is_empty() && !c.secret_key.is_empty())
            .ok_or_else(|| Error::NotFoundAccessKey(provider.to_string()))?;
        self.factory.build(provider, Some(&credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockAdaptorFactory, test_persistence};

    #[tokio::test]
    async fn test_managed_provider_needs_credential() {
        let persistence = test_persistence().await;
        let resolver = AdaptorResolver::new(persistence.clone(), Arc::new(MockAdaptorFactory::new()));

        let err = resolver.resolve("E1", "ack").await.err().expect("should fail");
        assert_eq!(err.name(), "ErrorNotFoundAccessKey");

        persistence
            .put_credential(&CloudCredential {
                enterprise_id: "E1".to_string(),
                provider_name: "ack".to_string(),
                access_key: "ak".to_string(),
                secret_key: "sk".to_string(),
            })
            .await
            .expect("put credential");
        let adaptor = resolver.resolve("E1", "ack").await.expect("resolve");
        assert_eq!(adaptor.provider(), Provider::Ack);
    }

    #[tokio::test]
    async fn test_rke_and_custom_skip_credentials() {
        let persistence = test_persistence().await;
        let resolver = AdaptorResolver::new(persistence, Arc::new(MockAdaptorFactory::new()));

        assert!(resolver.resolve("E1", "rke").await.is_ok());
        assert!(resolver.resolve("E1", "custom").await.is_ok());
        let err = resolver.resolve("E1", "eks").await.err().expect("should fail");
        assert_eq!(err.name(), "ErrorProviderNotSupport");
    }
}
