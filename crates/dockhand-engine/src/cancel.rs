//! Cancellation of suspending engine calls.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};

/// Runs `call` until it completes or `token` fires, whichever comes first.
///
/// A fired token wins ties, so a call is never started once the token
/// has already been cancelled.
///
/// # Errors
///
/// Returns [`EngineError::Cancelled`] when the token fires, otherwise the
/// call's own result.
pub async fn cancellable<T, F>(token: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(EngineError::Cancelled),
        res = call => res,
    }
}
