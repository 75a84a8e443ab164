use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::info;

use formflow_core::error::Result;
use formflow_core::traits::Dispatcher;
use formflow_core::types::{ActionKind, SubmissionAction, SubmissionPayload};

use formflow_flow::registry::DispatcherRegistry;

/// Logs what would be sent and reports success. Used by `run --dry-run`.
pub struct DryRunDispatcher {
    kind: ActionKind,
}

impl DryRunDispatcher {
    pub fn new(kind: ActionKind) -> Self {
        Self { kind }
    }
}

impl Dispatcher for DryRunDispatcher {
    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn dispatch<'a>(
        &'a self,
        action: &'a SubmissionAction,
        payload: &'a SubmissionPayload,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            let body = serde_json::to_value(payload)?;
            info!(
                action = %action.label(),
                kind = %self.kind,
                payload = %body,
                "Dry run, not sending"
            );
            Ok(serde_json::json!({ "dry_run": true }))
        })
    }
}

/// A registry where every kind is a [`DryRunDispatcher`].
pub fn dry_run_registry() -> DispatcherRegistry {
    ActionKind::ALL
        .into_iter()
        .fold(DispatcherRegistry::new(), |registry, kind| {
            registry.with(std::sync::Arc::new(DryRunDispatcher::new(kind)))
        })
}
