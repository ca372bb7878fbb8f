//! Optional per-operation time limits.

use std::future::Future;
use std::time::Duration;

use crate::domain::{DockhandError, Result};

/// Await `fut`, failing with [`DockhandError::Timeout`] once `limit` elapses.
/// Without a limit the future runs to completion.
///
/// The future is dropped on timeout, so nothing it would have produced is
/// observable afterwards.
pub async fn with_timeout<F, T>(operation: &str, limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| DockhandError::Timeout {
                operation: operation.to_string(),
                limit_secs: limit.as_secs(),
            })?,
    }
}
