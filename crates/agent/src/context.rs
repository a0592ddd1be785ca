//! Per-turn context: identity and cancellation for one unit of work.
//!
//! A [`TurnContext`] is created for each coordinator turn and handed down
//! the call chain. Specialists run under a child context, so cancelling a
//! turn also stops every nested loop it started, while a specialist can
//! never cancel its parent.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

tokio::task_local! {
    /// The context of the loop currently invoking a capability. Set around
    /// each capability call so a nested agent can inherit cancellation
    /// without widening the `Tool` interface.
    static CURRENT: TurnContext;
}

#[derive(Debug, Clone)]
pub struct TurnContext {
    /// Correlates log lines across nested loops.
    pub turn_id: String,

    cancellation: CancellationToken,
}

impl TurnContext {
    pub fn new() -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Build a context around an existing token (e.g. one wired to Ctrl+C).
    pub fn with_token(cancellation: CancellationToken) -> Self {
        Self {
            turn_id: Uuid::new_v4().to_string(),
            cancellation,
        }
    }

    /// A context that shares this turn's id and is cancelled with it.
    pub fn child(&self) -> Self {
        Self {
            turn_id: self.turn_id.clone(),
            cancellation: self.cancellation.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the turn is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Run `fut` with this context visible to [`TurnContext::inherit`].
    pub(crate) async fn scope<F: std::future::Future>(&self, fut: F) -> F::Output {
        CURRENT.scope(self.clone(), fut).await
    }

    /// A child of the context of the capability call in progress, or a
    /// fresh context when called outside any loop.
    pub fn inherit() -> Self {
        CURRENT.try_with(TurnContext::child).unwrap_or_default()
    }
}

impl Default for TurnContext {
    fn default() -> Self {
        Self::new()
    }
}
