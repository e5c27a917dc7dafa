//! HTTP surface over the prebuild services

pub mod prebuilds;
pub mod retention;
pub mod webhook;

use axum::{
    Json, Router,
    extract::State as AxumState,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::Utc;
use serde_json::json;
use tracing::error;

use crate::SharedState;
use crate::error::PrebuildError;

pub use prebuilds::{delete_prebuild, find_prebuild, list_prebuilds, set_prebuild};
pub use retention::enforce_retention;
pub use webhook::handle_git_event;

/// Maps service errors onto HTTP statuses
#[derive(Debug)]
pub struct ApiError(pub PrebuildError);

impl From<PrebuildError> for ApiError {
    fn from(err: PrebuildError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PrebuildError::NotFound(_) => StatusCode::NOT_FOUND,
            PrebuildError::Validation(_) => StatusCode::BAD_REQUEST,
            PrebuildError::Conflict(_) => StatusCode::CONFLICT,
            PrebuildError::ProviderResolution { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PrebuildError::Aggregate(_) => StatusCode::MULTI_STATUS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self.0 {
            PrebuildError::Aggregate(agg) => json!({
                "error": format!("{} failed for {} item(s)", agg.operation, agg.failures.len()),
                "failures": agg
                    .failures
                    .iter()
                    .map(|f| json!({"id": f.item_id, "error": f.cause.to_string()}))
                    .collect::<Vec<_>>(),
            }),
            other => json!({"error": other.to_string()}),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
        }
        (status, Json(body)).into_response()
    }
}

/// Health check
pub async fn root(AxumState(state): AxumState<SharedState>) -> Json<serde_json::Value> {
    let uptime = Utc::now() - state.started_at;
    Json(json!({
        "status": "ok",
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": uptime.num_seconds(),
    }))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/webhook/git-event", post(handle_git_event))
        .route("/api/prebuilds", get(list_prebuilds))
        .route("/api/templates/{name}/prebuilds", put(set_prebuild))
        .route(
            "/api/templates/{name}/prebuilds/{id}",
            get(find_prebuild).delete(delete_prebuild),
        )
        .route("/api/retention", post(enforce_retention))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, Response};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;

    use crate::service::{GitEventProcessor, PrebuildConfigManager, RetentionEnforcer};
    use crate::testing::Harness;
    use crate::{AppConfig, AppState, SharedState};

    pub fn state(h: &Harness, webhook_secret: Option<&str>) -> SharedState {
        let timeout = Duration::from_secs(5);
        let mut config: AppConfig = toml::from_str("").expect("empty config parses");
        config.server.webhook_secret = webhook_secret.map(String::from);

        Arc::new(AppState {
            manager: PrebuildConfigManager::new(
                h.store.clone(),
                h.git.clone(),
                h.builds.clone(),
                timeout,
            ),
            processor: GitEventProcessor::new(
                h.store.clone(),
                h.git.clone(),
                h.builds.clone(),
                timeout,
            ),
            retention: RetentionEnforcer::new(h.store.clone(), h.builds.clone(), timeout),
            config,
            started_at: Utc::now(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }
}
