use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use formflow_core::error::{FormError, Result};
use formflow_core::traits::Dispatcher;
use formflow_core::types::{ActionKind, ActionTarget, SubmissionAction, SubmissionPayload};

use crate::http::HttpTransport;
use crate::template;

/// POSTs (or PUTs/PATCHes) the submission to an HTTP endpoint.
pub struct WebhookDispatcher {
    transport: HttpTransport,
}

impl WebhookDispatcher {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

/// The full payload, or the rendered `body_template` when one is set.
pub(crate) fn build_body(
    action: &SubmissionAction,
    body_template: Option<&str>,
    payload: &SubmissionPayload,
) -> Result<serde_json::Value> {
    match body_template {
        Some(tpl) => serde_json::from_str(&template::render_json(tpl, payload)).map_err(|e| {
            FormError::dispatch(
                action.label(),
                format!("body template is not valid JSON: {}", e),
            )
        }),
        None => Ok(serde_json::to_value(payload)?),
    }
}

impl Dispatcher for WebhookDispatcher {
    fn kind(&self) -> ActionKind {
        ActionKind::Webhook
    }

    fn dispatch<'a>(
        &'a self,
        action: &'a SubmissionAction,
        payload: &'a SubmissionPayload,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let ActionTarget::Webhook {
                endpoint,
                body_template,
            } = &action.target
            else {
                return Err(crate::target_mismatch(action, ActionKind::Webhook));
            };
            let body = build_body(action, body_template.as_deref(), payload)?;
            self.transport
                .send(action.label(), endpoint, &body, &cancel)
                .await
        })
    }
}
