// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Running the RKE installer.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Node manifest inside a cluster directory.
pub const CLUSTER_FILE: &str = "cluster.yml";
/// Installer output, appended to on every run.
pub const LOG_FILE: &str = "create.log";
/// Kubeconfig written by a successful `up`.
pub const KUBECONFIG_FILE: &str = "kube_config_cluster.yml";

/// Brings a cluster described by `<dir>/cluster.yml` up.
#[async_trait]
pub trait ClusterInstaller: Send + Sync {
    /// Run the installer in `cluster_dir`, appending output to `create.log`.
    /// Returns the generated kubeconfig.
    async fn up(&self, cancel: &CancellationToken, cluster_dir: &Path) -> Result<String>;
}

/// The `rke` binary.
#[derive(Debug, Clone)]
pub struct RkeBinary {
    path: PathBuf,
}

impl RkeBinary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ClusterInstaller for RkeBinary {
    async fn up(&self, cancel: &CancellationToken, cluster_dir: &Path) -> Result<String> {
        let log_path = cluster_dir.join(LOG_FILE);
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let stderr = stdout.try_clone()?;

        info!(dir = %cluster_dir.display(), "Running rke up");
        let mut child = Command::new(&self.path)
            .arg("up")
            .arg("--config")
            .arg(CLUSTER_FILE)
            .current_dir(cluster_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()?;

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill rke");
                }
                return Err(Error::Cancelled);
            }
            status = child.wait() => status?,
        };

        if !status.success() {
            return Err(Error::Other(format!(
                "rke up failed ({}), see {}",
                status,
                log_path.display()
            )));
        }

        let kubeconfig = tokio::fs::read_to_string(cluster_dir.join(KUBECONFIG_FILE)).await?;
        info!(dir = %cluster_dir.display(), "rke up finished");
        Ok(kubeconfig)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn fake_rke(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("rke");
        std::fs::write(&path, format!("#!/bin/sh\n{}", script)).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    #[tokio::test]
    async fn test_up_reads_back_kubeconfig_and_logs() {
        let bin = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let rke = RkeBinary::new(fake_rke(
            bin.path(),
            "echo \"installing $2 $3\"\necho 'apiVersion: v1' > kube_config_cluster.yml\n",
        ));

        let kubeconfig = rke
            .up(&CancellationToken::new(), work.path())
            .await
            .expect("up");
        assert_eq!(kubeconfig.trim(), "apiVersion: v1");

        let log = std::fs::read_to_string(work.path().join(LOG_FILE)).expect("log");
        assert!(log.contains("installing --config cluster.yml"));
    }

    #[tokio::test]
    async fn test_failed_run_is_error() {
        let bin = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let rke = RkeBinary::new(fake_rke(bin.path(), "echo 'ssh: unreachable' >&2\nexit 1\n"));

        let err = rke
            .up(&CancellationToken::new(), work.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rke up failed"));
        let log = std::fs::read_to_string(work.path().join(LOG_FILE)).expect("log");
        assert!(log.contains("ssh: unreachable"));
    }

    #[tokio::test]
    async fn test_cancel_kills_installer() {
        let bin = tempfile::tempdir().expect("tempdir");
        let work = tempfile::tempdir().expect("tempdir");
        let rke = RkeBinary::new(fake_rke(bin.path(), "sleep 30\n"));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = rke.up(&cancel, work.path()).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
