//! Prebuild config endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
};
use serde::Deserialize;

use super::ApiError;
use crate::SharedState;
use crate::prebuild::{CreatePrebuildSpec, PrebuildDTO, PrebuildFilter};
use crate::template::WorkspaceTemplateFilter;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub template: Option<String>,
    pub repository_url: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

/// GET /api/prebuilds
pub async fn list_prebuilds(
    AxumState(state): AxumState<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PrebuildDTO>>, ApiError> {
    let templates = WorkspaceTemplateFilter {
        name: query.template,
        repository_url: query.repository_url,
    };
    let prebuilds = PrebuildFilter {
        branch: query.branch,
        ..PrebuildFilter::default()
    };
    Ok(Json(state.manager.list(&templates, &prebuilds).await?))
}

/// GET /api/templates/{name}/prebuilds/{id}
pub async fn find_prebuild(
    AxumState(state): AxumState<SharedState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<PrebuildDTO>, ApiError> {
    let found = state
        .manager
        .find(
            &WorkspaceTemplateFilter::by_name(name),
            &PrebuildFilter::by_id(id),
        )
        .await?;
    Ok(Json(found))
}

/// PUT /api/templates/{name}/prebuilds
pub async fn set_prebuild(
    AxumState(state): AxumState<SharedState>,
    Path(name): Path<String>,
    Json(spec): Json<CreatePrebuildSpec>,
) -> Result<Json<PrebuildDTO>, ApiError> {
    let cancel = state.shutdown.child_token();
    Ok(Json(state.manager.set(&name, spec, &cancel).await?))
}

/// DELETE /api/templates/{name}/prebuilds/{id}
pub async fn delete_prebuild(
    AxumState(state): AxumState<SharedState>,
    Path((name, id)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    let cancel = state.shutdown.child_token();
    state.manager.delete(&name, &id, query.force, &cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}
