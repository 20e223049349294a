// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface of the cloud adaptor.
//!
//! Handlers only decode the request, call one [`ClusterUsecase`] method and
//! encode the result. Failures leave as the `{code, msg}` envelope of
//! [`ApiError`].

use std::sync::Arc;

use axum::Router;
use cloud_adaptor_engine::usecase::ClusterUsecase;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

mod access;
mod clusters;
mod error;
mod tasks;

pub use error::{ApiError, ApiResult};

/// Prefix every route is mounted under.
pub const API_PREFIX: &str = "/enterprise-server/api/v1";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub usecase: Arc<ClusterUsecase>,
}

impl AppState {
    pub fn new(usecase: Arc<ClusterUsecase>) -> Self {
        Self { usecase }
    }
}

/// `?provider_name=` selector shared by several routes.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ProviderQuery {
    #[serde(alias = "providerName")]
    pub provider_name: String,
}

impl ProviderQuery {
    pub(crate) fn optional(&self) -> Option<&str> {
        (!self.provider_name.is_empty()).then_some(self.provider_name.as_str())
    }
}

/// Full application router, ready to serve.
pub fn build_router(state: AppState) -> Router {
    let api = Router::<AppState>::new()
        .merge(clusters::router())
        .merge(tasks::router())
        .merge(access::router());
    Router::<AppState>::new()
        .nest(API_PREFIX, api)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::not_found("no such route")
}
