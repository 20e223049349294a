// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cloud_adaptor_engine::Error;
use serde::Serialize;
use tracing::error;

/// Error envelope returned by every handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: u32,
    pub msg: String,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Serialize)]
struct Envelope<'a> {
    code: u32,
    msg: &'a str,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: 400,
            msg: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: 404,
            msg: msg.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if err.name() == "ServerErr" {
            error!(error = ?err, "Unhandled server error");
            return Self {
                status,
                code: err.code(),
                msg: "ServerErr".to_string(),
            };
        }
        Self {
            status,
            code: err.code(),
            msg: format!("{}: {}", err.name(), err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(Envelope {
            code: self.code,
            msg: &self.msg,
        });
        (self.status, body).into_response()
    }
}
