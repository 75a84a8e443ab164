//! Dispatchers delivering submissions to external systems.

pub mod chat;
pub mod custom;
pub mod dry_run;
pub mod email;
pub mod http;
pub mod spreadsheet;
pub mod template;
pub mod webhook;

use std::sync::Arc;

use formflow_core::config::HttpConfig;
use formflow_core::error::{FormError, Result};
use formflow_core::types::{ActionKind, SubmissionAction};
use formflow_flow::registry::DispatcherRegistry;

pub use chat::ChatDispatcher;
pub use custom::CustomDispatcher;
pub use dry_run::{dry_run_registry, DryRunDispatcher};
pub use email::EmailDispatcher;
pub use http::HttpTransport;
pub use spreadsheet::SpreadsheetDispatcher;
pub use webhook::WebhookDispatcher;

/// A registry with the HTTP-backed dispatcher for every action kind,
/// all sharing one client.
pub fn standard_registry(config: &HttpConfig) -> Result<DispatcherRegistry> {
    let transport = HttpTransport::new(config)?;
    Ok(DispatcherRegistry::new()
        .with(Arc::new(WebhookDispatcher::new(transport.clone())))
        .with(Arc::new(EmailDispatcher::new(transport.clone())))
        .with(Arc::new(SpreadsheetDispatcher::new(transport.clone())))
        .with(Arc::new(ChatDispatcher::new(transport.clone())))
        .with(Arc::new(CustomDispatcher::new(transport))))
}

fn target_mismatch(action: &SubmissionAction, expected: ActionKind) -> FormError {
    FormError::dispatch(
        action.label(),
        format!(
            "{} dispatcher received a {} target",
            expected,
            action.kind()
        ),
    )
}
