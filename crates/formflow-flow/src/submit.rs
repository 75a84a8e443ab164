use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use formflow_core::error::{FormError, Result};
use formflow_core::types::{SubmissionAction, SubmissionOutcome};

use crate::navigator::Navigator;
use crate::orchestrator::ActionOrchestrator;

/// What a submission did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionReport {
    /// No actions configured; the form counts as submitted.
    NoActions,
    Completed(SubmissionOutcome),
}

impl SubmissionReport {
    pub fn succeeded(&self) -> bool {
        match self {
            Self::NoActions => true,
            Self::Completed(outcome) => outcome.overall_success,
        }
    }

    pub fn outcome(&self) -> Option<&SubmissionOutcome> {
        match self {
            Self::NoActions => None,
            Self::Completed(outcome) => Some(outcome),
        }
    }
}

/// Submit a finished session.
///
/// The session must have reached its end through a validated `advance`;
/// sitting on the last field is not enough. Answers and history are left
/// untouched, so a failed submission can be retried as is.
pub async fn submit(
    navigator: &Navigator,
    actions: &[SubmissionAction],
    orchestrator: &ActionOrchestrator,
    parallel: bool,
    cancel: &CancellationToken,
) -> Result<SubmissionReport> {
    if !navigator.session().terminal() {
        return Err(FormError::NotComplete(
            navigator.current_field_id().to_string(),
        ));
    }

    if actions.is_empty() {
        info!(session_id = %navigator.session_id(), "No submission actions configured");
        return Ok(SubmissionReport::NoActions);
    }

    let mut snapshot = navigator.snapshot();
    if let Some(metadata) = orchestrator.metadata() {
        snapshot = snapshot.with_metadata(metadata.clone());
    }

    let outcome = orchestrator
        .run(&snapshot, actions, parallel, cancel)
        .await?;
    Ok(SubmissionReport::Completed(outcome))
}
