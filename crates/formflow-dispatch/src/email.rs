use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::info;

use formflow_core::error::{FormError, Result};
use formflow_core::traits::Dispatcher;
use formflow_core::types::{ActionKind, ActionTarget, SubmissionAction, SubmissionPayload};

use crate::http::HttpTransport;
use crate::template;

const DEFAULT_SUBJECT: &str = "New form submission";

/// Hands the submission to an HTTP mail relay.
///
/// Without a relay the action succeeds as a logged no-op.
pub struct EmailDispatcher {
    transport: HttpTransport,
}

impl EmailDispatcher {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

pub(crate) fn build_mail(
    to: &[String],
    subject: Option<&str>,
    payload: &SubmissionPayload,
) -> serde_json::Value {
    serde_json::json!({
        "to": to,
        "subject": subject
            .map(|s| template::render(s, payload))
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
        "text": template::summary(payload),
    })
}

impl Dispatcher for EmailDispatcher {
    fn kind(&self) -> ActionKind {
        ActionKind::Email
    }

    fn dispatch<'a>(
        &'a self,
        action: &'a SubmissionAction,
        payload: &'a SubmissionPayload,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let ActionTarget::Email { to, subject, relay } = &action.target else {
                return Err(crate::target_mismatch(action, ActionKind::Email));
            };
            if to.is_empty() {
                return Err(FormError::dispatch(action.label(), "no recipients"));
            }
            let Some(relay) = relay else {
                info!(action = %action.label(), recipients = to.len(), "No mail relay configured, skipping send");
                return Ok(serde_json::Value::Null);
            };
            let body = build_mail(to, subject.as_deref(), payload);
            self.transport
                .send(action.label(), relay, &body, &cancel)
                .await
        })
    }
}
