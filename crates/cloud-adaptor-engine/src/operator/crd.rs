// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Custom resources reconciled by the platform operator (`rainbond.io/v1alpha1`).
//!
//! Only the fields the engine writes or reads are modelled. Anything else a
//! platform override sets on the cluster spec is carried through `extra`.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Name of the single `RainbondCluster` object.
pub const CLUSTER_NAME: &str = "rainbondcluster";
/// Name of the single `RainbondPackage` object.
pub const PACKAGE_NAME: &str = "rainbondpackage";
/// Read-write-many volume, always created.
pub const VOLUME_RWX_NAME: &str = "rainbondvolumerwx";
/// Read-write-once volume, created when a block storage class is known.
pub const VOLUME_RWO_NAME: &str = "rainbondvolumerwo";

/// Install mode the engine always requests.
pub const INSTALL_MODE_WITHOUT_PACKAGE: &str = "WithoutPackage";
/// Cache mode used when the override leaves it unset.
pub const CACHE_MODE_HOSTPATH: &str = "hostpath";

/// Desired state of the platform installation.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[kube(
    group = "rainbond.io",
    version = "v1alpha1",
    kind = "RainbondCluster",
    namespaced,
    status = "RainbondClusterStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RainbondClusterSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub install_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub install_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rainbond_image_repository: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix_http_host: String,
    #[serde(default, rename = "gatewayIngressIPs", skip_serializing_if = "Vec::is_empty")]
    pub gateway_ingress_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes_for_gateway: Vec<K8sNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes_for_chaos: Vec<K8sNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_hub: Option<ImageHub>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_database: Option<Database>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_database: Option<Database>,
    #[serde(default, rename = "enableHA")]
    pub enable_ha: bool,
    /// Fields set by an override that the engine does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Node placement entry.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct K8sNode {
    pub name: String,
    #[serde(rename = "internalIP", default)]
    pub internal_ip: String,
    #[serde(rename = "externalIP", default)]
    pub external_ip: String,
}

/// Image registry used by the platform.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ImageHub {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Database connection for the region or the UI.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Database {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RainbondClusterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition reported by the operator.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Platform image package handling.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[kube(
    group = "rainbond.io",
    version = "v1alpha1",
    kind = "RainbondPackage",
    namespaced,
    status = "RainbondPackageStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RainbondPackageSpec {
    #[serde(default)]
    pub pkg_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RainbondPackageStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl RainbondPackage {
    /// Whether the package reports `Ready=Completed`.
    pub fn is_completed(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "Completed")
        })
    }
}

/// Storage the platform components claim volumes from.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[kube(
    group = "rainbond.io",
    version = "v1alpha1",
    kind = "RainbondVolume",
    namespaced,
    status = "RainbondVolumeStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RainbondVolumeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_parameters: Option<StorageClassParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csi_plugin: Option<CsiPluginSource>,
    #[serde(default)]
    pub storage_request: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StorageClassParameters {
    pub provisioner: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsiPluginSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfs: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliyun_nas: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RainbondVolumeStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A platform component; only deleted by the engine.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[kube(
    group = "rainbond.io",
    version = "v1alpha1",
    kind = "RbdComponent",
    namespaced,
    schema = "disabled"
)]
pub struct RbdComponentSpec {
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_completion() {
        let mut package = RainbondPackage::new(PACKAGE_NAME, RainbondPackageSpec::default());
        assert!(!package.is_completed());

        package.status = Some(RainbondPackageStatus {
            conditions: vec![Condition {
                type_: "Ready".to_string(),
                status: "Running".to_string(),
                ..Default::default()
            }],
        });
        assert!(!package.is_completed());

        package.status = Some(RainbondPackageStatus {
            conditions: vec![Condition {
                type_: "Ready".to_string(),
                status: "Completed".to_string(),
                ..Default::default()
            }],
        });
        assert!(package.is_completed());
    }

    #[test]
    fn test_cluster_spec_keeps_unknown_fields() {
        let yaml = "installMode: WithoutPackage\nenableHA: true\nnodesForGateway:\n- name: n1\n  internalIP: 10.0.0.1\netcdConfig:\n  endpoints: [a]\n";
        let spec: RainbondClusterSpec = serde_yaml::from_str(yaml).expect("parse");
        assert!(spec.enable_ha);
        assert_eq!(spec.nodes_for_gateway[0].internal_ip, "10.0.0.1");
        assert!(spec.extra.contains_key("etcdConfig"));

        let json = serde_json::to_value(&spec).expect("serialize");
        assert_eq!(json["installMode"], "WithoutPackage");
        assert_eq!(json["etcdConfig"]["endpoints"][0], "a");
    }
}
