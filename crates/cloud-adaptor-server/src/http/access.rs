// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use cloud_adaptor_core::model::CloudCredential;
use cloud_adaptor_engine::usecase::AccessKeyRequest;
use serde::Serialize;

use super::{ApiResult, AppState, ProviderQuery};

#[derive(Debug, Serialize)]
pub(crate) struct InitNodeCmd {
    pub cmd: String,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/enterprises/{eid}/accesskey",
            get(get_access_key).post(put_access_key),
        )
        .route("/init_node_cmd", get(init_node_cmd))
}

async fn put_access_key(
    State(state): State<AppState>,
    Path(eid): Path<String>,
    payload: Result<Json<AccessKeyRequest>, JsonRejection>,
) -> ApiResult<Json<CloudCredential>> {
    let Json(request) = payload?;
    Ok(Json(state.usecase.put_access_key(&eid, request).await?))
}

async fn get_access_key(
    State(state): State<AppState>,
    Path(eid): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<CloudCredential>> {
    let credential = state
        .usecase
        .get_access_key(&eid, &query.provider_name)
        .await?;
    Ok(Json(credential))
}

async fn init_node_cmd(State(state): State<AppState>) -> ApiResult<Json<InitNodeCmd>> {
    let cmd = state.usecase.init_node_cmd().await?;
    Ok(Json(InitNodeCmd { cmd }))
}
