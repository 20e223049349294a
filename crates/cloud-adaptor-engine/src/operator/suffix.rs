// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Suffix HTTP host allocation through the external naming service.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// ConfigMap holding the stable naming-service identity.
pub const SUFFIX_CONFIGMAP: &str = "rbd-suffix-host";
/// Attempts before falling back to the built-in default.
pub const MAX_ATTEMPTS: u32 = 3;

/// `(uuid, auth)` pair identifying this installation to the naming service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixIdentity {
    pub uuid: String,
    pub auth: String,
}

impl SuffixIdentity {
    /// Fresh identity.
    pub fn generate() -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            auth: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Read back from ConfigMap data; `None` unless both keys are set.
    pub fn from_data(data: &BTreeMap<String, String>) -> Option<Self> {
        let uuid = data.get("uuid").filter(|v| !v.is_empty())?;
        let auth = data.get("auth").filter(|v| !v.is_empty())?;
        Some(Self {
            uuid: uuid.clone(),
            auth: auth.clone(),
        })
    }

    pub fn to_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("uuid".to_string(), self.uuid.clone()),
            ("auth".to_string(), self.auth.clone()),
        ])
    }
}

/// Default used when the naming service stays unreachable.
pub fn fallback_host(ip: &str) -> String {
    format!("{}.nip.io", ip)
}

/// One `POST {base}/domain/new`; a 200 body is the domain.
pub async fn request_domain(
    http: &reqwest::Client,
    base_url: &str,
    identity: &SuffixIdentity,
    ip: &str,
) -> Result<String> {
    let url = format!("{}/domain/new", base_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .timeout(Duration::from_secs(5))
        .form(&[
            ("uuid", identity.uuid.as_str()),
            ("ip", ip),
            ("type", "False"),
            ("auth", identity.auth.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(Error::Other(format!(
            "naming service returned {}: {}",
            status, body
        )));
    }
    let domain = body.trim().trim_matches('"').to_string();
    if domain.is_empty() {
        return Err(Error::Other("naming service returned an empty domain".to_string()));
    }
    Ok(domain)
}

/// Ask the naming service up to [`MAX_ATTEMPTS`] times, then fall back.
pub async fn resolve_suffix_host(
    http: &reqwest::Client,
    base_url: &str,
    identity: &SuffixIdentity,
    ip: &str,
    backoff: Duration,
) -> String {
    for attempt in 1..=MAX_ATTEMPTS {
        match request_domain(http, base_url, identity, ip).await {
            Ok(domain) => return domain,
            Err(e) => {
                warn!(attempt, ip = %ip, error = %e, "Suffix host request failed");
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    fallback_host(ip)
}
