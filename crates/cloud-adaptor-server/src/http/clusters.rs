// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use cloud_adaptor_core::model::Cluster;
use cloud_adaptor_core::persistence::TaskRecord;
use cloud_adaptor_engine::usecase::{CreateClusterRequest, PlatformConfig, RegionConfigView};
use serde::{Deserialize, Serialize};

use super::{ApiResult, AppState, ProviderQuery};

#[derive(Debug, Serialize)]
pub(crate) struct KubeConfigResponse {
    pub config: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlatformConfigBody {
    pub config: String,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/enterprises/{eid}/kclusters",
            get(list_clusters).post(create_cluster),
        )
        .route(
            "/enterprises/{eid}/kclusters/{cluster_id}",
            get(get_cluster).delete(delete_cluster),
        )
        .route(
            "/enterprises/{eid}/kclusters/{cluster_id}/reinstall",
            post(reinstall_cluster),
        )
        .route(
            "/enterprises/{eid}/kclusters/{cluster_id}/createlog",
            get(create_log),
        )
        .route(
            "/enterprises/{eid}/kclusters/{cluster_id}/kubeconfig",
            get(kube_config),
        )
        .route(
            "/enterprises/{eid}/kclusters/{cluster_id}/regionconfig",
            get(region_config),
        )
        .route(
            "/enterprises/{eid}/kclusters/{cluster_id}/rainbondcluster",
            get(get_platform_config).put(set_platform_config),
        )
        .route(
            "/enterprises/{eid}/kclusters/{cluster_id}/uninstall",
            post(uninstall_region),
        )
}

async fn list_clusters(
    State(state): State<AppState>,
    Path(eid): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<Vec<Cluster>>> {
    let clusters = state
        .usecase
        .list_clusters(&eid, &query.provider_name)
        .await?;
    Ok(Json(clusters))
}

async fn create_cluster(
    State(state): State<AppState>,
    Path(eid): Path<String>,
    payload: Result<Json<CreateClusterRequest>, JsonRejection>,
) -> ApiResult<Json<TaskRecord>> {
    let Json(request) = payload?;
    let task = state
        .usecase
        .create_kubernetes_cluster(&eid, request)
        .await?;
    Ok(Json(task))
}

async fn get_cluster(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<Cluster>> {
    let cluster = state
        .usecase
        .get_cluster(&eid, &query.provider_name, &cluster_id)
        .await?;
    Ok(Json(cluster))
}

async fn delete_cluster(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<StatusCode> {
    state
        .usecase
        .delete_cluster(&eid, &query.provider_name, &cluster_id)
        .await?;
    Ok(StatusCode::OK)
}

async fn reinstall_cluster(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
) -> ApiResult<Json<TaskRecord>> {
    let task = state
        .usecase
        .reinstall_kubernetes_cluster(&eid, &cluster_id)
        .await?;
    Ok(Json(task))
}

async fn create_log(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
) -> ApiResult<String> {
    Ok(state.usecase.get_create_log(&eid, &cluster_id).await?)
}

async fn kube_config(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<KubeConfigResponse>> {
    let config = state
        .usecase
        .get_kube_config(&eid, &query.provider_name, &cluster_id)
        .await?;
    Ok(Json(KubeConfigResponse { config }))
}

async fn region_config(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<RegionConfigView>> {
    let view = state
        .usecase
        .get_region_config(&eid, &query.provider_name, &cluster_id)
        .await?;
    Ok(Json(view))
}

async fn get_platform_config(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
) -> ApiResult<Json<PlatformConfig>> {
    let config = state
        .usecase
        .get_platform_config(&eid, &cluster_id)
        .await?;
    Ok(Json(config))
}

async fn set_platform_config(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
    payload: Result<Json<PlatformConfigBody>, JsonRejection>,
) -> ApiResult<Json<PlatformConfig>> {
    let Json(body) = payload?;
    let config = state
        .usecase
        .set_platform_config(&eid, &cluster_id, &body.config)
        .await?;
    Ok(Json(config))
}

async fn uninstall_region(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<StatusCode> {
    state
        .usecase
        .uninstall_region(&eid, &query.provider_name, &cluster_id)
        .await?;
    Ok(StatusCode::OK)
}
