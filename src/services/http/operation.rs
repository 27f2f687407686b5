//! Cancellable request operations

use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

use tokio::task::JoinHandle;
use tracing::debug;

use super::abort::{AbortController, AbortReason, AbortSignal, DEFAULT_CANCEL_REASON};
use crate::error::{AssistError, Result};

/// A pending request paired with its cancellation control.
///
/// Await it to get the outcome. [`cancel`](Self::cancel) can be called any
/// number of times, before or after completion; only the first call before
/// completion has an effect, and it settles the operation with
/// [`AssistError::Aborted`] the same way a timeout does.
#[derive(Debug)]
pub struct CancellableOperation<T> {
    handle: JoinHandle<Result<T>>,
    controller: AbortController,
}

/// Clonable handle that cancels an operation from elsewhere
#[derive(Debug, Clone)]
pub struct Canceller {
    controller: AbortController,
}

impl Canceller {
    /// Cancel with the default reason
    pub fn cancel(&self) {
        self.cancel_with(DEFAULT_CANCEL_REASON);
    }

    /// Cancel with a caller-supplied reason
    pub fn cancel_with(&self, reason: impl Into<String>) {
        if self.controller.abort(AbortReason::cancelled(reason)) {
            debug!("operation cancelled");
        }
    }
}

impl<T: Send + 'static> CancellableOperation<T> {
    /// Run `work` on the runtime, aborting it through `controller`
    pub(crate) fn spawn<F>(controller: AbortController, work: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(work),
            controller,
        }
    }
}

impl<T> CancellableOperation<T> {
    /// Cancel with the default reason
    pub fn cancel(&self) {
        self.canceller().cancel();
    }

    /// Cancel with a caller-supplied reason
    pub fn cancel_with(&self, reason: impl Into<String>) {
        self.canceller().cancel_with(reason);
    }

    /// Handle that can cancel this operation after it has been moved
    #[must_use]
    pub fn canceller(&self) -> Canceller {
        Canceller {
            controller: self.controller.clone(),
        }
    }

    /// Whether the operation has settled
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for CancellableOperation<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.handle).poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(err) => Poll::Ready(Err(AssistError::Other(format!(
                "request task failed: {err}"
            )))),
        }
    }
}

/// Drive `work` until it finishes or an abort arrives.
///
/// An abort of `controller`, or of the linked caller `signal` (forwarded to
/// `controller` with the caller's reason), settles the call as
/// [`AssistError::Aborted`]. If `work` fails while `controller` is aborted,
/// the abort reason replaces the failure.
pub(crate) async fn guard<T, F>(
    controller: &AbortController,
    signal: Option<AbortSignal>,
    work: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let outcome = tokio::select! {
        biased;
        reason = controller.aborted() => Err(AssistError::Aborted(reason)),
        reason = linked(signal.as_ref()) => {
            controller.abort(reason);
            Err(AssistError::Aborted(controller.reason().unwrap_or_default()))
        }
        result = work => result,
    };

    match outcome {
        Err(err) if controller.is_aborted() && err.abort_reason().is_none() => {
            debug!(error = %err, "failure superseded by abort");
            Err(AssistError::Aborted(controller.reason().unwrap_or_default()))
        }
        other => other,
    }
}

async fn linked(signal: Option<&AbortSignal>) -> AbortReason {
    match signal {
        Some(signal) => signal.aborted().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn slow(controller: &AbortController) -> CancellableOperation<&'static str> {
        let inner = controller.clone();
        CancellableOperation::spawn(controller.clone(), async move {
            guard(&inner, None, async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("done")
            })
            .await
        })
    }

    #[tokio::test]
    async fn test_cancel_settles_with_reason() {
        let controller = AbortController::new();
        let operation = slow(&controller);

        operation.cancel_with("panel closed");
        operation.cancel_with("second call");

        let err = operation.await.unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(&AbortReason::cancelled("panel closed"))
        );
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let controller = AbortController::new();
        let inner = controller.clone();
        let operation = CancellableOperation::spawn(controller, async move {
            guard(&inner, None, async { Ok(7) }).await
        });

        while !operation.is_finished() {
            tokio::task::yield_now().await;
        }
        let canceller = operation.canceller();
        canceller.cancel();
        canceller.cancel();

        assert_eq!(operation.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_linked_signal_forwards_reason() {
        let caller = AbortController::new();
        let controller = AbortController::new();
        let inner = controller.clone();
        let signal = caller.signal();
        let operation = CancellableOperation::spawn(controller.clone(), async move {
            guard(&inner, Some(signal), std::future::pending::<Result<()>>()).await
        });

        caller.abort(AbortReason::cancelled("route change"));

        let err = operation.await.unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(&AbortReason::cancelled("route change"))
        );
        assert_eq!(
            controller.reason(),
            Some(AbortReason::cancelled("route change"))
        );
    }

    #[tokio::test]
    async fn test_abort_takes_precedence_over_failure() {
        let controller = AbortController::new();
        let result: Result<()> = guard(&controller, None, async {
            controller.abort(AbortReason::Timeout(50));
            Err(AssistError::Other("connection reset".into()))
        })
        .await;

        assert!(result.unwrap_err().is_timeout());
    }
}
