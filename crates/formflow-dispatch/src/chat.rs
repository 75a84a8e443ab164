use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use formflow_core::error::Result;
use formflow_core::traits::Dispatcher;
use formflow_core::types::{ActionKind, ActionTarget, SubmissionAction, SubmissionPayload};

use crate::http::HttpTransport;
use crate::template;

/// Posts a message to a Slack-style incoming webhook.
pub struct ChatDispatcher {
    transport: HttpTransport,
}

impl ChatDispatcher {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

pub(crate) fn build_message(
    channel: Option<&str>,
    message_template: Option<&str>,
    payload: &SubmissionPayload,
) -> serde_json::Value {
    let text = match message_template {
        Some(tpl) => template::render(tpl, payload),
        None => template::summary(payload),
    };
    let mut body = serde_json::json!({ "text": text });
    if let Some(channel) = channel {
        body["channel"] = serde_json::Value::String(channel.to_string());
    }
    body
}

impl Dispatcher for ChatDispatcher {
    fn kind(&self) -> ActionKind {
        ActionKind::Chat
    }

    fn dispatch<'a>(
        &'a self,
        action: &'a SubmissionAction,
        payload: &'a SubmissionPayload,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let ActionTarget::Chat {
                endpoint,
                channel,
                message_template,
            } = &action.target
            else {
                return Err(crate::target_mismatch(action, ActionKind::Chat));
            };
            let body = build_message(channel.as_deref(), message_template.as_deref(), payload);
            self.transport
                .send(action.label(), endpoint, &body, &cancel)
                .await
        })
    }
}
