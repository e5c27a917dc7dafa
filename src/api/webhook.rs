//! Inbound git event endpoint

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
};
use tracing::{info, warn};

use super::ApiError;
use crate::SharedState;
use crate::error::PrebuildError;
use crate::webhook::{GitEventData, SIGNATURE_HEADER, verify_signature};

/// POST /webhook/git-event
pub async fn handle_git_event(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if let Some(secret) = state
        .config
        .server
        .webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        match signature {
            Some(sig) if verify_signature(secret, &body, sig) => {}
            Some(_) => {
                warn!("Rejected git event with invalid signature");
                return Ok(StatusCode::UNAUTHORIZED);
            }
            None => {
                warn!("Rejected git event without {} header", SIGNATURE_HEADER);
                return Ok(StatusCode::UNAUTHORIZED);
            }
        }
    }

    let event: GitEventData = serde_json::from_slice(&body)
        .map_err(|e| PrebuildError::Validation(format!("Invalid git event payload: {}", e)))?;
    info!(
        repository = %event.url,
        branch = %event.branch,
        sha = %event.sha,
        files = event.affected_files.len(),
        "Received git event"
    );

    let cancel = state.shutdown.child_token();
    state.processor.process_git_event(&event, &cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}
