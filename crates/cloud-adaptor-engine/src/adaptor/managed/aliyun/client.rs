// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signed transport for the Alibaba Cloud OpenAPI.
//!
//! Two request styles are in use: RPC (query-string actions, signed over the
//! sorted parameters) for ECS, VPC, RDS, NAS and SLB, and ROA (REST paths,
//! signed over method, headers and resource) for the container service.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::Method;
use serde_json::Value;
use sha1::Sha1;
use tracing::debug;

use crate::error::{Error, Result};

const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const SIGNATURE_VERSION: &str = "1.0";
const CS_API_VERSION: &str = "2015-12-15";

/// Products addressed through RPC calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Ecs,
    Vpc,
    Rds,
    Nas,
    Slb,
}

impl Service {
    fn version(&self) -> &'static str {
        match self {
            Service::Ecs => "2014-05-26",
            Service::Vpc => "2016-04-28",
            Service::Rds => "2014-08-15",
            Service::Nas => "2017-06-26",
            Service::Slb => "2014-05-15",
        }
    }
}

/// Base URLs per product. `{region}` is replaced with the call's region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub ecs: String,
    pub vpc: String,
    pub rds: String,
    pub nas: String,
    pub slb: String,
    pub cs: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            ecs: "https://ecs.aliyuncs.com".to_string(),
            vpc: "https://vpc.aliyuncs.com".to_string(),
            rds: "https://rds.aliyuncs.com".to_string(),
            nas: "https://nas.{region}.aliyuncs.com".to_string(),
            slb: "https://slb.aliyuncs.com".to_string(),
            cs: "https://cs.aliyuncs.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Every product served from one base URL.
    pub fn single(base: &str) -> Self {
        Self {
            ecs: base.to_string(),
            vpc: base.to_string(),
            rds: base.to_string(),
            nas: base.to_string(),
            slb: base.to_string(),
            cs: base.to_string(),
        }
    }

    fn rpc(&self, service: Service, region_id: &str) -> String {
        let base = match service {
            Service::Ecs => &self.ecs,
            Service::Vpc => &self.vpc,
            Service::Rds => &self.rds,
            Service::Nas => &self.nas,
            Service::Slb => &self.slb,
        };
        base.replace("{region}", region_id)
            .trim_end_matches('/')
            .to_string()
    }
}

/// Error reported by the API itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        let code = err.code.as_str();
        match code {
            "InvalidAccessKeyId"
            | "InvalidAccessKeyId.NotFound"
            | "InvalidAccessKeyId.Inactive"
            | "SignatureDoesNotMatch"
            | "IncompleteSignature" => Error::AccessKeyNotMatch(err.message),
            _ if code.contains("RoleNotExist") => Error::ClusterRoleNotExist(err.message),
            _ if err.status == 404 || code.contains("NotFound") => Error::NotFound(err.message),
            _ => Error::CloudApi(format!("{}: {}", err.code, err.message)),
        }
    }
}

/// RFC 3986 encoding as the signature scheme expects it.
pub fn percent_encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Sorted `k=v&...` with both sides encoded.
pub fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// String signed for an RPC call.
pub fn rpc_string_to_sign(method: &str, params: &BTreeMap<String, String>) -> String {
    format!(
        "{}&{}&{}",
        method,
        percent_encode("/"),
        percent_encode(&canonical_query(params))
    )
}

/// String signed for a ROA call; `headers` keys are lowercase.
pub fn roa_string_to_sign(method: &str, headers: &BTreeMap<String, String>, resource: &str) -> String {
    let header = |name: &str| headers.get(name).map(String::as_str).unwrap_or_default();
    let mut out = format!(
        "{}\n{}\n{}\n{}\n{}\n",
        method,
        header("accept"),
        header("content-md5"),
        header("content-type"),
        header("date"),
    );
    for (key, value) in headers.range("x-acs-".to_string()..) {
        if !key.starts_with("x-acs-") {
            break;
        }
        out.push_str(&format!("{}:{}\n", key, value));
    }
    out.push_str(resource);
    out
}

/// Base64 HMAC-SHA1.
pub fn sign(key: &str, string_to_sign: &str) -> Result<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Other(format!("invalid signing key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn parse_api_error(status: u16, body: &str) -> ApiError {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let field = |upper: &str, lower: &str| {
        value
            .get(upper)
            .or_else(|| value.get(lower))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let code = field("Code", "code");
    let message = field("Message", "message");
    ApiError {
        status,
        code: if code.is_empty() { format!("HTTP{}", status) } else { code },
        message: if message.is_empty() { body.to_string() } else { message },
    }
}

/// Credentialed API client.
#[derive(Clone)]
pub struct AliyunClient {
    http: reqwest::Client,
    access_key: String,
    secret_key: String,
    endpoints: Endpoints,
}

impl AliyunClient {
    pub fn new(http: reqwest::Client, access_key: &str, secret_key: &str, endpoints: Endpoints) -> Self {
        Self {
            http,
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            endpoints,
        }
    }

    /// RPC action; an API error is returned as the inner `Err`.
    pub async fn try_rpc(
        &self,
        service: Service,
        region_id: &str,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<std::result::Result<Value, ApiError>> {
        let mut query: BTreeMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let common = [
            ("Action", action.to_string()),
            ("Version", service.version().to_string()),
            ("Format", "JSON".to_string()),
            ("AccessKeyId", self.access_key.clone()),
            ("SignatureMethod", SIGNATURE_METHOD.to_string()),
            ("SignatureVersion", SIGNATURE_VERSION.to_string()),
            ("SignatureNonce", uuid::Uuid::new_v4().to_string()),
            (
                "Timestamp",
                Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ),
        ];
        for (k, v) in common {
            query.insert(k.to_string(), v);
        }
        if !region_id.is_empty() {
            query
                .entry("RegionId".to_string())
                .or_insert_with(|| region_id.to_string());
        }

        let signature = sign(
            &format!("{}&", self.secret_key),
            &rpc_string_to_sign("GET", &query),
        )?;
        let url = format!(
            "{}/?{}&Signature={}",
            self.endpoints.rpc(service, region_id),
            canonical_query(&query),
            percent_encode(&signature)
        );

        debug!(?service, action, "Aliyun RPC call");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Ok(Err(parse_api_error(status.as_u16(), &body)));
        }
        Ok(Ok(serde_json::from_str(&body)?))
    }

    pub async fn rpc(
        &self,
        service: Service,
        region_id: &str,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        Ok(self.try_rpc(service, region_id, action, params).await??)
    }

    /// RPC action whose listed error codes count as success.
    pub async fn rpc_tolerating(
        &self,
        service: Service,
        region_id: &str,
        action: &str,
        params: &[(&str, String)],
        tolerated: &[&str],
    ) -> Result<()> {
        match self.try_rpc(service, region_id, action, params).await? {
            Ok(_) => Ok(()),
            Err(e) if tolerated.contains(&e.code.as_str()) => {
                debug!(action, code = %e.code, "Tolerated API error");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Container service call.
    pub async fn roa(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let body = body.map(serde_json::to_vec).transpose()?;
        let mut headers = BTreeMap::from([
            ("accept".to_string(), "application/json".to_string()),
            (
                "date".to_string(),
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            ),
            (
                "x-acs-signature-method".to_string(),
                SIGNATURE_METHOD.to_string(),
            ),
            (
                "x-acs-signature-nonce".to_string(),
                uuid::Uuid::new_v4().to_string(),
            ),
            (
                "x-acs-signature-version".to_string(),
                SIGNATURE_VERSION.to_string(),
            ),
            ("x-acs-version".to_string(), CS_API_VERSION.to_string()),
        ]);
        if let Some(bytes) = &body {
            headers.insert(
                "content-md5".to_string(),
                STANDARD.encode(Md5::digest(bytes)),
            );
            headers.insert("content-type".to_string(), "application/json".to_string());
        }

        let signature = sign(
            &self.secret_key,
            &roa_string_to_sign(method.as_str(), &headers, path),
        )?;

        let url = format!("{}{}", self.endpoints.cs.trim_end_matches('/'), path);
        debug!(%method, path, "Aliyun ROA call");
        let mut request = self.http.request(method, url).header(
            "authorization",
            format!("acs {}:{}", self.access_key, signature),
        );
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(bytes) = body {
            request = request.body(bytes);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(parse_api_error(status.as_u16(), &text).into());
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_string_to_sign() {
        let params = BTreeMap::from([
            ("Action".to_string(), "DescribeRegions".to_string()),
            ("Timestamp".to_string(), "2016-02-23T12:46:24Z".to_string()),
            ("AccessKeyId".to_string(), "testid".to_string()),
        ]);
        assert_eq!(
            rpc_string_to_sign("GET", &params),
            "GET&%2F&AccessKeyId%3Dtestid%26Action%3DDescribeRegions%26Timestamp%3D2016-02-23T12%253A46%253A24Z"
        );
    }

    #[test]
    fn test_percent_encode_matches_rfc3986() {
        assert_eq!(percent_encode("a b*c~d/e"), "a%20b%2Ac~d%2Fe");
    }

    #[test]
    fn test_roa_string_to_sign_orders_acs_headers() {
        let headers = BTreeMap::from([
            ("accept".to_string(), "application/json".to_string()),
            ("date".to_string(), "Mon, 01 Feb 2021 00:00:00 GMT".to_string()),
            ("x-acs-version".to_string(), "2015-12-15".to_string()),
            ("x-acs-signature-method".to_string(), "HMAC-SHA1".to_string()),
        ]);
        assert_eq!(
            roa_string_to_sign("GET", &headers, "/clusters"),
            "GET\napplication/json\n\n\nMon, 01 Feb 2021 00:00:00 GMT\n\
             x-acs-signature-method:HMAC-SHA1\nx-acs-version:2015-12-15\n/clusters"
        );
    }

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign("secret&", "GET&%2F&x").expect("sign");
        assert_eq!(a, sign("secret&", "GET&%2F&x").expect("sign"));
        assert_ne!(a, sign("other&", "GET&%2F&x").expect("sign"));
        assert_eq!(STANDARD.decode(&a).expect("base64").len(), 20);
    }

    #[test]
    fn test_error_mapping() {
        let err: Error = parse_api_error(
            404,
            r#"{"Code":"InvalidAccessKeyId.NotFound","Message":"Specified access key is not found."}"#,
        )
        .into();
        assert_eq!(err.name(), "ErrorAccessKeyNotMatch");

        let err: Error = parse_api_error(
            400,
            r#"{"code":"ErrorRamRoleNotExist","message":"AliyunCSDefaultRole does not exist"}"#,
        )
        .into();
        assert_eq!(err.name(), "ErrorClusterRoleNotExist");

        let err: Error = parse_api_error(404, r#"{"code":"ErrorClusterNotFound"}"#).into();
        assert!(err.is_not_found());

        let err: Error = parse_api_error(500, "gateway exploded").into();
        assert_eq!(err.to_string(), "Cloud API error: HTTP500: gateway exploded");
    }
}
