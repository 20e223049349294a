// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use cloud_adaptor_core::model::TaskStatus;
use cloud_adaptor_core::persistence::{TaskEventRecord, TaskRecord};
use cloud_adaptor_engine::usecase::{InitClusterRequest, UpdateClusterRequest};
use serde::Deserialize;

use super::{ApiResult, AppState, ProviderQuery};

#[derive(Debug, Deserialize)]
pub(crate) struct TaskStatusBody {
    pub status: TaskStatus,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/enterprises/{eid}/last-ck-task", get(last_create_task))
        .route("/enterprises/{eid}/ck-task/{task_id}", get(create_task))
        .route("/enterprises/{eid}/tasks/{task_id}/events", get(task_events))
        .route("/enterprises/{eid}/init-cluster", post(init_cluster))
        .route("/enterprises/{eid}/init-task/{cluster_id}", get(init_task))
        .route("/enterprises/{eid}/init-tasks", get(running_init_tasks))
        .route(
            "/enterprises/{eid}/init-tasks/{task_id}/status",
            put(update_init_task_status),
        )
        .route("/enterprises/{eid}/update-cluster", post(update_cluster))
        .route(
            "/enterprises/{eid}/update-cluster/{cluster_id}",
            get(update_task),
        )
}

/// `null` when the provider never had a create task.
async fn last_create_task(
    State(state): State<AppState>,
    Path(eid): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<Option<TaskRecord>>> {
    let task = state
        .usecase
        .get_last_create_task(&eid, &query.provider_name)
        .await?;
    Ok(Json(task))
}

async fn create_task(
    State(state): State<AppState>,
    Path((eid, task_id)): Path<(String, String)>,
) -> ApiResult<Json<TaskRecord>> {
    Ok(Json(state.usecase.get_create_task(&eid, &task_id).await?))
}

async fn task_events(
    State(state): State<AppState>,
    Path((eid, task_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<TaskEventRecord>>> {
    Ok(Json(state.usecase.list_task_events(&eid, &task_id).await?))
}

async fn init_cluster(
    State(state): State<AppState>,
    Path(eid): Path<String>,
    payload: Result<Json<InitClusterRequest>, JsonRejection>,
) -> ApiResult<Json<TaskRecord>> {
    let Json(request) = payload?;
    Ok(Json(state.usecase.init_rainbond_region(&eid, request).await?))
}

async fn init_task(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<TaskRecord>> {
    let task = state
        .usecase
        .get_init_task(&eid, &cluster_id, query.optional())
        .await?;
    Ok(Json(task))
}

async fn running_init_tasks(
    State(state): State<AppState>,
    Path(eid): Path<String>,
) -> ApiResult<Json<Vec<TaskRecord>>> {
    Ok(Json(state.usecase.list_running_init_tasks(&eid).await?))
}

async fn update_init_task_status(
    State(state): State<AppState>,
    Path((eid, task_id)): Path<(String, String)>,
    payload: Result<Json<TaskStatusBody>, JsonRejection>,
) -> ApiResult<Json<TaskRecord>> {
    let Json(body) = payload?;
    let task = state
        .usecase
        .update_init_task_status(&eid, &task_id, body.status)
        .await?;
    Ok(Json(task))
}

async fn update_cluster(
    State(state): State<AppState>,
    Path(eid): Path<String>,
    payload: Result<Json<UpdateClusterRequest>, JsonRejection>,
) -> ApiResult<Json<TaskRecord>> {
    let Json(request) = payload?;
    Ok(Json(
        state.usecase.update_kubernetes_cluster(&eid, request).await?,
    ))
}

async fn update_task(
    State(state): State<AppState>,
    Path((eid, cluster_id)): Path<(String, String)>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<Json<TaskRecord>> {
    let task = state
        .usecase
        .get_update_task(&eid, &cluster_id, query.optional())
        .await?;
    Ok(Json(task))
}
