use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::info;

use formflow_core::error::Result;
use formflow_core::traits::Dispatcher;
use formflow_core::types::{ActionKind, ActionTarget, SubmissionAction, SubmissionPayload};

use crate::http::HttpTransport;

/// Sends the raw payload to a caller-provided endpoint.
///
/// A custom action with only a `handler` name and no endpoint is logged
/// and treated as delivered.
pub struct CustomDispatcher {
    transport: HttpTransport,
}

impl CustomDispatcher {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

impl Dispatcher for CustomDispatcher {
    fn kind(&self) -> ActionKind {
        ActionKind::Custom
    }

    fn dispatch<'a>(
        &'a self,
        action: &'a SubmissionAction,
        payload: &'a SubmissionPayload,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let ActionTarget::Custom { handler, endpoint } = &action.target else {
                return Err(crate::target_mismatch(action, ActionKind::Custom));
            };
            let Some(endpoint) = endpoint else {
                info!(
                    action = %action.label(),
                    handler = handler.as_deref().unwrap_or("none"),
                    "Custom action has no endpoint, nothing to send"
                );
                return Ok(serde_json::Value::Null);
            };
            let body = serde_json::to_value(payload)?;
            self.transport
                .send(action.label(), endpoint, &body, &cancel)
                .await
        })
    }
}
