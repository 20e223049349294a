// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Desired `RainbondCluster` spec for an installation.

use serde_json::Value;

use super::PlatformInstall;
use super::crd::{CACHE_MODE_HOSTPATH, INSTALL_MODE_WITHOUT_PACKAGE, RainbondClusterSpec};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Defaults, then the stored override, then what the provider prepared.
///
/// Nodes and ingress addresses from the override win over the computed ones;
/// the install mode is always `WithoutPackage`.
pub fn build_cluster_spec(
    settings: &EngineConfig,
    install: &PlatformInstall,
) -> Result<RainbondClusterSpec> {
    let mut spec = RainbondClusterSpec {
        install_version: settings.rainbond_version.clone(),
        rainbond_image_repository: settings.install_image_repo.clone(),
        ..Default::default()
    };

    if let Some(yaml) = install.overrides.as_deref().filter(|y| !y.trim().is_empty()) {
        let patch: Value =
            serde_yaml::from_str(yaml).map_err(|e| Error::ConfigInvalid(e.to_string()))?;
        let mut base = serde_json::to_value(&spec)?;
        merge_json(&mut base, patch);
        spec = serde_json::from_value(base).map_err(|e| Error::ConfigInvalid(e.to_string()))?;
    }

    let init = &install.init_config;
    if let Some(db) = &init.region_database {
        spec.region_database = Some(db.clone());
    }
    if spec.nodes_for_gateway.is_empty() {
        spec.nodes_for_gateway = install.gateway_nodes.iter().map(|n| n.to_k8s_node()).collect();
    }
    if spec.nodes_for_chaos.is_empty() {
        spec.nodes_for_chaos = install.chaos_nodes.iter().map(|n| n.to_k8s_node()).collect();
    }
    if spec.gateway_ingress_ips.is_empty() {
        spec.gateway_ingress_ips = init.eips.clone();
    }
    spec.enable_ha |= init.enable_ha;

    spec.install_mode = INSTALL_MODE_WITHOUT_PACKAGE.to_string();
    if spec.cache_mode.is_empty() {
        spec.cache_mode = CACHE_MODE_HOSTPATH.to_string();
    }
    Ok(spec)
}

/// Address the suffix host resolves to: first ingress IP, else the first
/// gateway node's external or internal address.
pub(crate) fn suffix_host_ip(spec: &RainbondClusterSpec) -> Option<String> {
    if let Some(ip) = spec.gateway_ingress_ips.iter().find(|ip| !ip.is_empty()) {
        return Some(ip.clone());
    }
    spec.nodes_for_gateway.first().and_then(|node| {
        [&node.external_ip, &node.internal_ip]
            .into_iter()
            .find(|ip| !ip.is_empty())
            .cloned()
    })
}

/// Deep-merge `patch` into `base`. Objects merge key by key; any other value
/// replaces.
pub fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::crd::Database;
    use crate::operator::{NodeInfo, RainbondInitConfig};
    use serde_json::json;

    fn install() -> PlatformInstall {
        PlatformInstall {
            enterprise_id: "E".to_string(),
            cluster_id: "c1".to_string(),
            init_config: RainbondInitConfig {
                eips: vec!["1.2.3.4".to_string()],
                region_database: Some(Database {
                    host: "rds.local".to_string(),
                    port: 3306,
                    username: "rainbond".to_string(),
                    password: "pw".to_string(),
                    name: "region".to_string(),
                }),
                ..Default::default()
            },
            gateway_nodes: vec![NodeInfo {
                name: "n1".to_string(),
                internal_ip: "10.0.0.1".to_string(),
                ..Default::default()
            }],
            chaos_nodes: vec![NodeInfo {
                name: "n2".to_string(),
                internal_ip: "10.0.0.2".to_string(),
                ..Default::default()
            }],
            overrides: None,
        }
    }

    #[test]
    fn test_defaults_and_attachments() {
        let settings = EngineConfig::default();
        let spec = build_cluster_spec(&settings, &install()).expect("spec");

        assert_eq!(spec.install_mode, "WithoutPackage");
        assert_eq!(spec.cache_mode, "hostpath");
        assert_eq!(spec.install_version, settings.rainbond_version);
        assert_eq!(spec.gateway_ingress_ips, vec!["1.2.3.4"]);
        assert_eq!(spec.nodes_for_gateway[0].name, "n1");
        assert_eq!(spec.nodes_for_chaos[0].internal_ip, "10.0.0.2");
        assert_eq!(spec.region_database.as_ref().map(|d| d.port), Some(3306));
        assert_eq!(suffix_host_ip(&spec).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_override_merges_and_install_mode_is_forced() {
        let mut req = install();
        req.overrides = Some(
            "installMode: WithPackage\ncacheMode: pvc\nnodesForGateway:\n- name: pinned\n  internalIP: 10.0.0.9\nimageHub:\n  domain: hub.example.com\n"
                .to_string(),
        );
        let spec = build_cluster_spec(&EngineConfig::default(), &req).expect("spec");

        assert_eq!(spec.install_mode, "WithoutPackage");
        assert_eq!(spec.cache_mode, "pvc");
        assert_eq!(spec.nodes_for_gateway.len(), 1);
        assert_eq!(spec.nodes_for_gateway[0].name, "pinned");
        assert_eq!(
            spec.image_hub.as_ref().map(|h| h.domain.as_str()),
            Some("hub.example.com")
        );
    }

    #[test]
    fn test_invalid_override_is_config_error() {
        let mut req = install();
        req.overrides = Some("enableHA: [not, a, bool]".to_string());
        let err = build_cluster_spec(&EngineConfig::default(), &req).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn test_suffix_ip_falls_back_to_gateway_node() {
        let mut req = install();
        req.init_config.eips.clear();
        let spec = build_cluster_spec(&EngineConfig::default(), &req).expect("spec");
        assert_eq!(suffix_host_ip(&spec).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_merge_json() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "d": [1]});
        merge_json(&mut base, json!({"a": {"c": 3}, "d": [2], "e": true}));
        assert_eq!(base, json!({"a": {"b": 1, "c": 3}, "d": [2], "e": true}));
    }
}
