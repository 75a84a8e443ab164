use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use formflow_core::error::Result;
use formflow_core::traits::Dispatcher;
use formflow_core::types::{ActionKind, ActionTarget, SubmissionAction, SubmissionPayload};

use crate::http::HttpTransport;

/// Appends one row per submission through a sheets-style values API.
pub struct SpreadsheetDispatcher {
    transport: HttpTransport,
}

impl SpreadsheetDispatcher {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

/// `{"values": [[...]]}` with one cell per column. Without explicit columns
/// every answer is written, ordered by field id. Missing answers are empty
/// cells; the submission timestamp is appended last.
pub(crate) fn build_row(columns: &[String], payload: &SubmissionPayload) -> serde_json::Value {
    let ids: Vec<String> = if columns.is_empty() {
        payload
            .form_data
            .sorted()
            .into_iter()
            .map(|(id, _)| id.clone())
            .collect()
    } else {
        columns.to_vec()
    };

    let mut row: Vec<String> = ids
        .iter()
        .map(|id| {
            payload
                .form_data
                .get(id)
                .map(|v| v.to_string())
                .unwrap_or_default()
        })
        .collect();
    row.push(payload.timestamp.to_rfc3339());

    serde_json::json!({ "values": [row] })
}

impl Dispatcher for SpreadsheetDispatcher {
    fn kind(&self) -> ActionKind {
        ActionKind::Spreadsheet
    }

    fn dispatch<'a>(
        &'a self,
        action: &'a SubmissionAction,
        payload: &'a SubmissionPayload,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let ActionTarget::Spreadsheet { endpoint, columns } = &action.target else {
                return Err(crate::target_mismatch(action, ActionKind::Spreadsheet));
            };
            let body = build_row(columns, payload);
            self.transport
                .send(action.label(), endpoint, &body, &cancel)
                .await
        })
    }
}
