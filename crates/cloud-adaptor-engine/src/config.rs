// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-wide engine settings.
//!
//! Loaded once at startup, wrapped in an `Arc` and never mutated afterwards.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

/// Default image repository for the operator and platform images.
pub const DEFAULT_IMAGE_REPO: &str = "registry.cn-hangzhou.aliyuncs.com/goodrain";
/// Default platform version.
pub const DEFAULT_RAINBOND_VERSION: &str = "v5.3.0-release";
/// Default naming service for suffix HTTP hosts.
pub const DEFAULT_SUFFIX_NAMING_SERVICE: &str = "http://domain.grapps.cn";

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// State root; RKE clusters live under `<config_dir>/rke/<name>`.
    pub config_dir: PathBuf,
    /// `helm` executable.
    pub helm_path: PathBuf,
    /// Operator chart directory.
    pub chart_path: PathBuf,
    /// `rke` executable.
    pub rke_path: PathBuf,
    /// Image repository for operator and platform images.
    pub install_image_repo: String,
    /// Platform version installed by init tasks.
    pub rainbond_version: String,
    /// Operator image tag.
    pub operator_version: String,
    /// Skip platform uninstall entirely.
    pub disable_uninstall_region: bool,
    /// Base URL of the suffix-host naming service.
    pub suffix_naming_service: String,
    /// Kubernetes versions the platform can be installed on.
    pub kubernetes_versions: KubeVersionRange,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/tmp"),
            helm_path: PathBuf::from("helm"),
            chart_path: PathBuf::from("/app/chart"),
            rke_path: PathBuf::from("rke"),
            install_image_repo: DEFAULT_IMAGE_REPO.to_string(),
            rainbond_version: DEFAULT_RAINBOND_VERSION.to_string(),
            operator_version: DEFAULT_RAINBOND_VERSION.to_string(),
            disable_uninstall_region: false,
            suffix_naming_service: DEFAULT_SUFFIX_NAMING_SERVICE.to_string(),
            kubernetes_versions: KubeVersionRange::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let path_var = |key: &str, default: PathBuf| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(default)
        };
        let string_var = |key: &str, default: String| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let rainbond_version = string_var("RAINBOND_VERSION", defaults.rainbond_version);
        let operator_version = string_var("OPERATOR_VERSION", rainbond_version.clone());

        let disable_uninstall_region = std::env::var("DISABLE_UNINSTALL_REGION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let kubernetes_versions = match std::env::var("SUPPORTED_KUBERNETES_VERSIONS") {
            Ok(v) if !v.is_empty() => v.parse().map_err(|_| {
                ConfigError::Invalid(
                    "SUPPORTED_KUBERNETES_VERSIONS",
                    "expected <major.minor>-<major.minor>",
                )
            })?,
            _ => defaults.kubernetes_versions,
        };

        Ok(Self {
            config_dir: path_var("CONFIG_DIR", defaults.config_dir),
            helm_path: path_var("HELM_PATH", defaults.helm_path),
            chart_path: path_var("CHART_PATH", defaults.chart_path),
            rke_path: path_var("RKE_PATH", defaults.rke_path),
            install_image_repo: string_var("INSTALL_IMAGE_REPO", defaults.install_image_repo),
            rainbond_version,
            operator_version,
            disable_uninstall_region,
            suffix_naming_service: string_var(
                "SUFFIX_NAMING_SERVICE",
                defaults.suffix_naming_service,
            ),
            kubernetes_versions,
        })
    }

    /// Directory holding the state of one RKE cluster.
    ///
    /// The name must be a single plain path component so the result always
    /// stays below `<config_dir>/rke`.
    pub fn rke_cluster_dir(&self, cluster_name: &str) -> crate::error::Result<PathBuf> {
        let mut components = Path::new(cluster_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part == cluster_name => {
                Ok(self.config_dir.join("rke").join(part))
            }
            _ => Err(Error::ConfigInvalid(format!(
                "cluster name {:?} is not a plain directory name",
                cluster_name
            ))),
        }
    }
}

/// Inclusive `major.minor` range of supported Kubernetes versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KubeVersionRange {
    pub min: (u32, u32),
    pub max: (u32, u32),
}

impl Default for KubeVersionRange {
    fn default() -> Self {
        Self {
            min: (1, 16),
            max: (1, 19),
        }
    }
}

impl KubeVersionRange {
    /// Whether a reported version such as `v1.19.6-aliyun.1` lies in the range.
    /// Unparseable versions are outside.
    pub fn contains(&self, version: &str) -> bool {
        match parse_major_minor(version) {
            Some(v) => v >= self.min && v <= self.max,
            None => false,
        }
    }
}

impl fmt::Display for KubeVersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}-{}.{}",
            self.min.0, self.min.1, self.max.0, self.max.1
        )
    }
}

impl FromStr for KubeVersionRange {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s.split_once('-').ok_or(())?;
        let min = parse_major_minor(min).ok_or(())?;
        let max = parse_major_minor(max).ok_or(())?;
        if min > max {
            return Err(());
        }
        Ok(Self { min, max })
    }
}

/// `v1.19.6-aliyun.1` → `(1, 19)`.
pub fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let version = version.trim().trim_start_matches('v');
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts
        .next()?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    Some((major, minor.parse().ok()?))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    /// An environment variable has an unusable value.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    const VARS: &[&str] = &[
        "CONFIG_DIR",
        "HELM_PATH",
        "CHART_PATH",
        "RKE_PATH",
        "INSTALL_IMAGE_REPO",
        "RAINBOND_VERSION",
        "OPERATOR_VERSION",
        "DISABLE_UNINSTALL_REGION",
        "SUFFIX_NAMING_SERVICE",
        "SUPPORTED_KUBERNETES_VERSIONS",
    ];

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        for var in VARS {
            guard.remove(var);
        }

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.config_dir, PathBuf::from("/tmp"));
        assert_eq!(config.helm_path, PathBuf::from("helm"));
        assert_eq!(config.install_image_repo, DEFAULT_IMAGE_REPO);
        assert_eq!(config.operator_version, DEFAULT_RAINBOND_VERSION);
        assert!(!config.disable_uninstall_region);
        assert_eq!(config.kubernetes_versions, KubeVersionRange::default());
        assert_eq!(
            config.rke_cluster_dir("c1").unwrap(),
            PathBuf::from("/tmp/rke/c1")
        );
    }

    #[test]
    fn test_rke_cluster_dir_stays_below_config_dir() {
        let config = EngineConfig {
            config_dir: PathBuf::from("/data"),
            ..Default::default()
        };
        for name in ["", ".", "..", "a/b", "a/../x", "../etc", "/abs", "c1/"] {
            let err = config.rke_cluster_dir(name).unwrap_err();
            assert_eq!(err.name(), "ErrConfigInvalid", "name {:?}", name);
        }
        assert_eq!(
            config.rke_cluster_dir("prod-1").unwrap(),
            PathBuf::from("/data/rke/prod-1")
        );
    }

    #[test]
    fn test_operator_version_follows_rainbond_version() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        for var in VARS {
            guard.remove(var);
        }
        guard.set("RAINBOND_VERSION", "v5.4.0-release");
        guard.set("DISABLE_UNINSTALL_REGION", "true");
        guard.set("SUPPORTED_KUBERNETES_VERSIONS", "1.16-1.22");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.rainbond_version, "v5.4.0-release");
        assert_eq!(config.operator_version, "v5.4.0-release");
        assert!(config.disable_uninstall_region);
        assert_eq!(config.kubernetes_versions.max, (1, 22));
    }

    #[test]
    fn test_invalid_version_range() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        for var in VARS {
            guard.remove(var);
        }
        guard.set("SUPPORTED_KUBERNETES_VERSIONS", "1.19-1.16");

        let result = EngineConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::Invalid("SUPPORTED_KUBERNETES_VERSIONS", _))
        ));
    }

    #[test]
    fn test_version_range_contains() {
        let range = KubeVersionRange::default();
        assert!(range.contains("v1.16.15"));
        assert!(range.contains("v1.19.6-aliyun.1"));
        assert!(range.contains("1.18+"));
        assert!(!range.contains("v1.20.0"));
        assert!(!range.contains("v1.15.12"));
        assert!(!range.contains("garbage"));
        assert_eq!(range.to_string(), "1.16-1.19");
    }
}
