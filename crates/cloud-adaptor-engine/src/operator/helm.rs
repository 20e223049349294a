// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operator chart installation through the `helm` binary.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use super::{NAMESPACE, OPERATOR_NAME};
use crate::error::{Error, Result};

/// How a failed `helm install` should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelmFailure {
    /// The release is already there.
    AlreadyExists,
    /// A stale clusterrolebinding blocks the install.
    StillInUse,
    Other,
}

/// Classify helm's stderr.
pub fn classify_failure(stderr: &str) -> HelmFailure {
    if stderr.contains("already exists") {
        HelmFailure::AlreadyExists
    } else if stderr.contains("still in use") {
        HelmFailure::StillInUse
    } else {
        HelmFailure::Other
    }
}

/// Wrapper around the helm CLI.
#[derive(Debug, Clone)]
pub struct HelmCli {
    helm_path: PathBuf,
    chart_path: PathBuf,
}

impl HelmCli {
    pub fn new(helm_path: impl Into<PathBuf>, chart_path: impl Into<PathBuf>) -> Self {
        Self {
            helm_path: helm_path.into(),
            chart_path: chart_path.into(),
        }
    }

    /// Arguments of the operator install.
    pub fn install_args(&self, kubeconfig: &Path, image_repo: &str, version: &str) -> Vec<String> {
        vec![
            "install".to_string(),
            OPERATOR_NAME.to_string(),
            self.chart_path.display().to_string(),
            "--namespace".to_string(),
            NAMESPACE.to_string(),
            "--kubeconfig".to_string(),
            kubeconfig.display().to_string(),
            "--set".to_string(),
            format!("operator.image.name={}/{}", image_repo, OPERATOR_NAME),
            "--set".to_string(),
            format!("operator.image.tag={}", version),
        ]
    }

    /// Install the operator chart. On failure the error carries helm's stderr
    /// and the [`HelmFailure`] class.
    pub async fn install_operator(
        &self,
        kubeconfig: &Path,
        image_repo: &str,
        version: &str,
    ) -> std::result::Result<(), (HelmFailure, Error)> {
        let args = self.install_args(kubeconfig, image_repo, version);
        debug!(helm = %self.helm_path.display(), ?args, "Running helm install");

        let output = Command::new(&self.helm_path)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| (HelmFailure::Other, Error::Io(e)))?;

        if output.status.success() {
            info!(version = %version, "Operator chart installed");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err((
            classify_failure(&stderr),
            Error::KubeApi(format!("helm install failed: {}", stderr)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("Error: cannot re-use a name that is still in use"),
            HelmFailure::StillInUse
        );
        assert_eq!(
            classify_failure(
                "Error: rendered manifests contain a resource that already exists"
            ),
            HelmFailure::AlreadyExists
        );
        assert_eq!(classify_failure("Error: timed out"), HelmFailure::Other);
    }

    #[test]
    fn test_install_args() {
        let helm = HelmCli::new("helm", "/app/chart");
        let args = helm.install_args(
            Path::new("/tmp/kubeconfig"),
            "registry.example.com/goodrain",
            "v5.3.0-release",
        );
        assert_eq!(&args[..3], ["install", "rainbond-operator", "/app/chart"]);
        assert!(args.contains(&"rbd-system".to_string()));
        assert!(args.contains(&"operator.image.name=registry.example.com/goodrain/rainbond-operator".to_string()));
        assert!(args.contains(&"operator.image.tag=v5.3.0-release".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let helm = HelmCli::new("/nonexistent/helm-binary", "/app/chart");
        let err = helm
            .install_operator(Path::new("/tmp/kubeconfig"), "repo", "v1")
            .await
            .unwrap_err();
        assert_eq!(err.0, HelmFailure::Other);
        assert!(matches!(err.1, Error::Io(_)));
    }
}
