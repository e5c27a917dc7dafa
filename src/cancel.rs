//! Deadline and cancellation handling for gateway calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{PrebuildError, Result};

/// Run a gateway call, giving up when `token` fires or `timeout` elapses.
pub async fn guarded<T, F>(token: &CancellationToken, timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PrebuildError::Cancelled(format!("{} was cancelled", what))),
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(PrebuildError::Cancelled(format!(
                "{} timed out after {}s",
                what,
                timeout.as_secs_f64()
            ))),
        },
    }
}
