// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;

use cloud_adaptor_core::model::Cluster;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ClusterUsecase;
use crate::error::{Error, Result};
use crate::operator::crd::RainbondClusterSpec;

/// The `rbd-system/region-config` ConfigMap as a map and as YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionConfigView {
    pub configs: BTreeMap<String, String>,
    pub config_yaml: String,
}

/// Platform override of one cluster, as YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub cluster_id: String,
    pub config: String,
}

impl ClusterUsecase {
    pub async fn list_clusters(
        &self,
        enterprise_id: &str,
        provider_name: &str,
    ) -> Result<Vec<Cluster>> {
        let adaptor = self.adaptor(enterprise_id, provider_name).await?;
        adaptor.list_clusters(enterprise_id).await
    }

    pub async fn get_cluster(
        &self,
        enterprise_id: &str,
        provider_name: &str,
        cluster_id: &str,
    ) -> Result<Cluster> {
        let adaptor = self.adaptor(enterprise_id, provider_name).await?;
        adaptor.describe_cluster(enterprise_id, cluster_id).await
    }

    /// Delete a cluster that does not host the platform.
    pub async fn delete_cluster(
        &self,
        enterprise_id: &str,
        provider_name: &str,
        cluster_id: &str,
    ) -> Result<()> {
        let adaptor = self.adaptor(enterprise_id, provider_name).await?;
        adaptor.delete_cluster(enterprise_id, cluster_id).await?;
        info!(enterprise_id, provider = provider_name, cluster_id, "Cluster deleted");
        Ok(())
    }

    pub async fn get_kube_config(
        &self,
        enterprise_id: &str,
        provider_name: &str,
        cluster_id: &str,
    ) -> Result<String> {
        let adaptor = self.adaptor(enterprise_id, provider_name).await?;
        adaptor.get_kube_config(enterprise_id, cluster_id).await
    }

    /// Installer output of an RKE cluster. Empty until the installer ran.
    pub async fn get_create_log(&self, enterprise_id: &str, cluster_id: &str) -> Result<String> {
        let record = self
            .persistence
            .get_rke_cluster(enterprise_id, cluster_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("rke cluster {}", cluster_id)))?;
        if record.create_log_path.is_empty() {
            return Ok(String::new());
        }
        match tokio::fs::read_to_string(&record.create_log_path).await {
            Ok(log) => Ok(log),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_region_config(
        &self,
        enterprise_id: &str,
        provider_name: &str,
        cluster_id: &str,
    ) -> Result<RegionConfigView> {
        let kubeconfig = self
            .get_kube_config(enterprise_id, provider_name, cluster_id)
            .await?;
        let target = self
            .connector
            .connect(&kubeconfig)
            .await
            .map_err(|e| Error::KubeApi(e.to_string()))?;
        let config = target
            .region_config()
            .await
            .map_err(|e| Error::GetRegionStatus(e.to_string()))?
            .ok_or_else(|| Error::GetRegionStatus("region-config not found".to_string()))?;
        Ok(RegionConfigView {
            config_yaml: serde_yaml::to_string(&config.entries)?,
            configs: config.entries,
        })
    }

    /// Store a platform override after checking it parses as a cluster spec.
    pub async fn set_platform_config(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
        config: &str,
    ) -> Result<PlatformConfig> {
        serde_yaml::from_str::<RainbondClusterSpec>(config)
            .map_err(|e| Error::ConfigInvalid(e.to_string()))?;
        self.persistence
            .put_platform_config(enterprise_id, cluster_id, config)
            .await?;
        info!(enterprise_id, cluster_id, "Platform config override stored");
        Ok(PlatformConfig {
            cluster_id: cluster_id.to_string(),
            config: config.to_string(),
        })
    }

    /// The stored override, or the defaults an init task would start from.
    pub async fn get_platform_config(
        &self,
        enterprise_id: &str,
        cluster_id: &str,
    ) -> Result<PlatformConfig> {
        if let Some(stored) = self
            .persistence
            .get_platform_config(enterprise_id, cluster_id)
            .await?
        {
            return Ok(PlatformConfig {
                cluster_id: stored.cluster_id,
                config: stored.config,
            });
        }
        let defaults = RainbondClusterSpec {
            install_version: self.settings.rainbond_version.clone(),
            rainbond_image_repository: self.settings.install_image_repo.clone(),
            ..Default::default()
        };
        Ok(PlatformConfig {
            cluster_id: cluster_id.to_string(),
            config: serde_yaml::to_string(&defaults)?,
        })
    }

    /// Remove the platform from a cluster. Blocks until the namespace is gone.
    pub async fn uninstall_region(
        &self,
        enterprise_id: &str,
        provider_name: &str,
        cluster_id: &str,
    ) -> Result<()> {
        if self.settings.disable_uninstall_region {
            warn!(enterprise_id, cluster_id, "Region uninstall is disabled, skipping");
            return Ok(());
        }
        let kubeconfig = self
            .get_kube_config(enterprise_id, provider_name, cluster_id)
            .await
            .map_err(|e| Error::KubeApi(e.to_string()))?;
        let target = self.connector.connect(&kubeconfig).await?;
        target.uninstall_platform(&self.cancel).await?;
        info!(enterprise_id, cluster_id, "Region uninstalled");
        Ok(())
    }
}
