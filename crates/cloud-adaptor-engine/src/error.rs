// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for cloud-adaptor-engine.
//!
//! Every variant maps onto one wire code of the HTTP surface via
//! [`Error::name`] and [`Error::code`]. Variants that describe a problem with
//! the request map to 4xx statuses; everything else is a server error.

use cloud_adaptor_core::CoreError;
use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed or incomplete request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A cluster, task or config entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The enterprise never stored a credential for the provider.
    #[error("Access key is not set for provider {0}")]
    NotSetAccessKey(String),

    /// A stored credential exists but is empty.
    #[error("Access key not found for provider {0}")]
    NotFoundAccessKey(String),

    /// The vendor rejected the stored credential.
    #[error("Access key does not match: {0}")]
    AccessKeyNotMatch(String),

    /// Unknown provider name.
    #[error("Provider {0} is not supported")]
    ProviderNotSupport(String),

    /// The vendor account lacks the service role needed for managed clusters.
    #[error("Cluster service role does not exist: {0}")]
    ClusterRoleNotExist(String),

    /// Target cluster unreachable or its API failed.
    #[error("Kubernetes API error: {0}")]
    KubeApi(String),

    /// Target cluster does not satisfy init preconditions.
    #[error("Cluster is not ready: {0}")]
    ClusterNotReady(String),

    /// Region config missing or unreadable.
    #[error("Failed to get region status: {0}")]
    GetRegionStatus(String),

    /// The cluster still hosts the platform.
    #[error("Cluster {0} has the region installed and cannot be deleted")]
    ClusterNotAllowDelete(String),

    /// A non-terminal task of the same kind exists for the cluster.
    #[error("The last task of cluster {0} has not completed")]
    LastTaskNotComplete(String),

    /// Platform override is not valid YAML for the cluster spec.
    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    /// Imported cluster request without a kubeconfig.
    #[error("Kubeconfig can not be empty")]
    KubeConfigCannotEmpty,

    /// The RKE node manifest is unusable.
    #[error("Incorrect RKE config: {0}")]
    IncorrectRkeConfig(String),

    /// The RKE node manifest lacks a required role.
    #[error("Cluster node role missing: {0}")]
    ClusterNodeRoleMiss(String),

    /// Node expansion requested for a provider other than RKE.
    #[error("Provider {0} does not support updating kubernetes")]
    NotSupportUpdateKubernetes(String),

    /// Vendor API returned an error.
    #[error("Cloud API error: {0}")]
    CloudApi(String),

    /// A task was cancelled before it finished.
    #[error("Task cancelled")]
    Cancelled,

    /// A bounded wait ran out.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Core persistence operation failed.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Outbound HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Message bus failure.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::KubeApi(err.to_string())
    }
}

impl Error {
    /// Wire name of the error.
    pub fn name(&self) -> &'static str {
        match self {
            Error::BadRequest(_) | Error::Json(_) => "BadRequest",
            Error::NotFound(_) => "NotFound",
            Error::Core(e) if e.is_not_found() => "NotFound",
            Error::NotSetAccessKey(_) => "ErrorNotSetAccessKey",
            Error::NotFoundAccessKey(_) => "ErrorNotFoundAccessKey",
            Error::AccessKeyNotMatch(_) => "ErrorAccessKeyNotMatch",
            Error::ProviderNotSupport(_) => "ErrorProviderNotSupport",
            Error::ClusterRoleNotExist(_) => "ErrorClusterRoleNotExist",
            Error::KubeApi(_) | Error::ClusterNotReady(_) => "ErrorKubeAPI",
            Error::GetRegionStatus(_) => "ErrorGetRegionStatus",
            Error::ClusterNotAllowDelete(_) => "ErrClusterNotAllowDelete",
            Error::LastTaskNotComplete(_) => "ErrorLastTaskNotComplete",
            Error::ConfigInvalid(_) | Error::Yaml(_) => "ErrConfigInvalid",
            Error::KubeConfigCannotEmpty => "ErrKubeConfigCannotEmpty",
            Error::IncorrectRkeConfig(_) => "ErrIncorrectRKEConfig",
            Error::ClusterNodeRoleMiss(_) => "ErrClusterNodeRoleMiss",
            Error::NotSupportUpdateKubernetes(_) => "ErrNotSupportUpdateKubernetes",
            _ => "ServerErr",
        }
    }

    /// Numeric wire code carried in the response envelope.
    pub fn code(&self) -> u32 {
        match self.name() {
            "BadRequest" => 400,
            "NotFound" => 404,
            "ErrorNotSetAccessKey" => 7001,
            "ErrorNotFoundAccessKey" => 7002,
            "ErrorAccessKeyNotMatch" => 7003,
            "ErrorProviderNotSupport" => 7004,
            "ErrorClusterRoleNotExist" => 7005,
            "ErrorKubeAPI" => 7006,
            "ErrorGetRegionStatus" => 7007,
            "ErrClusterNotAllowDelete" => 7008,
            "ErrorLastTaskNotComplete" => 7009,
            "ErrConfigInvalid" => 7010,
            "ErrKubeConfigCannotEmpty" => 7011,
            "ErrIncorrectRKEConfig" => 7012,
            "ErrClusterNodeRoleMiss" => 7013,
            "ErrNotSupportUpdateKubernetes" => 7014,
            _ => 500,
        }
    }

    /// HTTP status the error is reported with.
    pub fn http_status(&self) -> u16 {
        match self.name() {
            "NotFound" => 404,
            "ErrorKubeAPI" | "ErrorGetRegionStatus" | "ServerErr" => 500,
            _ => 400,
        }
    }

    /// Whether the error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        self.name() == "NotFound"
    }
}

/// Result type using the engine Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_and_statuses() {
        let err = Error::ClusterNodeRoleMiss("worker".to_string());
        assert_eq!(err.name(), "ErrClusterNodeRoleMiss");
        assert_eq!(err.http_status(), 400);

        let err = Error::LastTaskNotComplete("c1".to_string());
        assert_eq!(err.name(), "ErrorLastTaskNotComplete");
        assert_eq!(err.code(), 7009);

        let err = Error::GetRegionStatus("missing".to_string());
        assert_eq!(err.http_status(), 500);

        assert_eq!(Error::Cancelled.name(), "ServerErr");
        assert_eq!(Error::Cancelled.code(), 500);
    }

    #[test]
    fn test_core_not_found_maps_to_not_found() {
        let err: Error = CoreError::not_found("task", "t1").into();
        assert_eq!(err.name(), "NotFound");
        assert_eq!(err.http_status(), 404);
        assert!(err.is_not_found());
    }
}
