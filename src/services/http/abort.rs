//! Cooperative abort primitives
//!
//! An [`AbortController`] owns the right to abort; an [`AbortSignal`] only
//! observes. Both wrap a [`CancellationToken`] plus the reason recorded by the
//! first abort, so every observer sees the same reason.

use std::{fmt, sync::Arc};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Reason used when the caller cancels without giving one
pub const DEFAULT_CANCEL_REASON: &str = "Cancel";

/// Why a request was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AbortReason {
    /// The request timer elapsed (milliseconds)
    Timeout(u64),

    /// The caller cancelled
    Cancelled(String),
}

impl AbortReason {
    /// Caller cancellation with a reason
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }
}

impl Default for AbortReason {
    fn default() -> Self {
        Self::Cancelled(DEFAULT_CANCEL_REASON.to_string())
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(ms) => write!(f, "timeout of {ms}ms"),
            Self::Cancelled(reason) => f.write_str(reason),
        }
    }
}

#[derive(Debug, Default)]
struct AbortState {
    token: CancellationToken,
    reason: OnceCell<AbortReason>,
}

/// Triggers an abort; cloning shares the same state
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    state: Arc<AbortState>,
}

/// Read-only view of an [`AbortController`]
#[derive(Debug, Clone)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortController {
    /// Create a controller that has not been aborted
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort with `reason`.
    ///
    /// Only the first call records a reason; later calls are no-ops. Returns
    /// whether this call was the one that aborted.
    pub fn abort(&self, reason: AbortReason) -> bool {
        let first = self.state.reason.set(reason).is_ok();
        self.state.token.cancel();
        first
    }

    /// Observer for this controller
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            state: Arc::clone(&self.state),
        }
    }

    /// Whether an abort happened
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// The recorded reason, once aborted
    #[must_use]
    pub fn reason(&self) -> Option<AbortReason> {
        self.state.reason.get().cloned()
    }

    /// Resolves with the reason once aborted
    pub async fn aborted(&self) -> AbortReason {
        wait_aborted(&self.state).await
    }
}

impl AbortSignal {
    /// Whether the owning controller aborted
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state.token.is_cancelled()
    }

    /// The recorded reason, once aborted
    #[must_use]
    pub fn reason(&self) -> Option<AbortReason> {
        self.state.reason.get().cloned()
    }

    /// Resolves with the reason once aborted
    pub async fn aborted(&self) -> AbortReason {
        wait_aborted(&self.state).await
    }
}

async fn wait_aborted(state: &AbortState) -> AbortReason {
    state.token.cancelled().await;
    // the reason is stored before the token fires
    state.reason.get().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let controller = AbortController::new();
        assert!(!controller.is_aborted());
        assert_eq!(controller.reason(), None);

        assert!(controller.abort(AbortReason::Timeout(100)));
        assert!(!controller.abort(AbortReason::cancelled("late")));

        assert!(controller.is_aborted());
        assert_eq!(controller.reason(), Some(AbortReason::Timeout(100)));
    }

    #[test]
    fn test_signal_observes_controller() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());

        controller.abort(AbortReason::cancelled("closed"));
        assert!(signal.is_aborted());
        assert_eq!(signal.reason(), Some(AbortReason::cancelled("closed")));
    }

    #[tokio::test]
    async fn test_aborted_resolves_with_reason() {
        let controller = AbortController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move { signal.aborted().await });
        controller.abort(AbortReason::Timeout(5));

        assert_eq!(waiter.await.unwrap(), AbortReason::Timeout(5));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(AbortReason::Timeout(30000).to_string(), "timeout of 30000ms");
        assert_eq!(AbortReason::default().to_string(), "Cancel");
    }
}
