use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::*;

/// Transport for one action kind.
pub trait Dispatcher: Send + Sync + 'static {
    /// The action kind this dispatcher serves.
    fn kind(&self) -> ActionKind;

    /// Deliver the payload for `action`.
    ///
    /// Returns the (optional) response payload on success. Any error is a
    /// dispatch failure subject to the action's retry policy.
    fn dispatch<'a>(
        &'a self,
        action: &'a SubmissionAction,
        payload: &'a SubmissionPayload,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<serde_json::Value>>;
}

/// Fire-and-forget sink for lifecycle events.
///
/// Implementations must not block and must swallow their own errors.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: FlowEvent);
}
