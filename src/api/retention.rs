use axum::{
    extract::{Query, State as AxumState},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use super::ApiError;
use crate::SharedState;
use crate::build::BuildFilter;

#[derive(Debug, Default, Deserialize)]
pub struct RetentionQuery {
    pub prebuild_id: Option<String>,
}

/// POST /api/retention - run retention now, optionally for one prebuild
pub async fn enforce_retention(
    AxumState(state): AxumState<SharedState>,
    Query(query): Query<RetentionQuery>,
) -> Result<StatusCode, ApiError> {
    info!(prebuild_id = ?query.prebuild_id, "On-demand retention requested");
    let filter = query.prebuild_id.map(BuildFilter::by_prebuild);
    let cancel = state.shutdown.child_token();
    state
        .retention
        .enforce_retention_policy(filter, &cancel)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
