use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;

/// Failure surfaced to awaiters of a tracked call.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The tracked work itself failed. Carries the original error so the
    /// call site's ordinary error handling still works.
    #[error("call failed: {0}")]
    Failed(Arc<anyhow::Error>),

    /// The driver died without settling (the work panicked, or the runtime
    /// was torn down mid-flight).
    #[error("call detached before settling")]
    Detached,
}

/// Settled outcome of a tracked call.
pub type CallOutcome = Result<Value, CallError>;

type SharedOutcome = Shared<BoxFuture<'static, CallOutcome>>;

/// Handle to a tracked call.
///
/// Clones share one underlying outcome; awaiting any clone yields the same
/// resolved value or failure. The identifier rides along so callers that did
/// not supply one can still retain and release the call.
#[derive(Clone)]
pub struct CallHandle {
    id: Arc<str>,
    outcome: SharedOutcome,
}

impl CallHandle {
    pub(crate) fn new(id: &str, outcome: BoxFuture<'static, CallOutcome>) -> Self {
        Self {
            id: Arc::from(id),
            outcome: outcome.shared(),
        }
    }

    /// Identifier this call is tracked under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Await the settled outcome without consuming the handle.
    pub async fn outcome(&self) -> CallOutcome {
        self.outcome.clone().await
    }
}

impl Future for CallHandle {
    type Output = CallOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().outcome.poll_unpin(cx)
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn clones_share_one_outcome() {
        let handle = CallHandle::new("call-1", async { Ok(json!({"n": 7})) }.boxed());
        let clone = handle.clone();

        assert_eq!(handle.outcome().await.unwrap(), json!({"n": 7}));
        assert_eq!(clone.await.unwrap(), json!({"n": 7}));
    }

    #[tokio::test]
    async fn failures_clone_too() {
        let handle = CallHandle::new(
            "call-1",
            async { Err(CallError::Failed(Arc::new(anyhow::anyhow!("boom")))) }.boxed(),
        );

        let first = handle.outcome().await.unwrap_err();
        let second = handle.outcome().await.unwrap_err();
        assert!(first.to_string().contains("boom"));
        assert!(second.to_string().contains("boom"));
    }
}
