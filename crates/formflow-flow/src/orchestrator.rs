use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use formflow_core::config::{RetryConfig, SubmissionConfig};
use formflow_core::error::{FormError, Result};
use formflow_core::traits::EventSink;
use formflow_core::types::{
    ActionResult, FlowEvent, OnError, OnSuccess, SubmissionAction, SubmissionOutcome,
    SubmissionSnapshot,
};

use crate::condition::ConditionEvaluator;
use crate::registry::DispatcherRegistry;
use crate::retry::calculate_backoff;

/// Actions that will run, and the ones whose condition did not pass.
#[derive(Debug)]
pub struct ExecutionPlan<'a> {
    /// Enabled actions with passing conditions, in execution order.
    pub eligible: Vec<&'a SubmissionAction>,
    /// Names of enabled actions gated out by their condition.
    pub skipped: Vec<String>,
}

/// Runs submission actions against a finished session.
///
/// Holds only immutable configuration; every run's state lives on the stack
/// of [`ActionOrchestrator::run`], so one orchestrator can serve many runs.
pub struct ActionOrchestrator {
    retry: RetryConfig,
    evaluator: ConditionEvaluator,
    registry: DispatcherRegistry,
    sink: Arc<dyn EventSink>,
    metadata: Option<serde_json::Value>,
}

impl ActionOrchestrator {
    pub fn new(
        retry: RetryConfig,
        evaluator: ConditionEvaluator,
        registry: DispatcherRegistry,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            retry,
            evaluator,
            registry,
            sink,
            metadata: None,
        }
    }

    /// Build from the `[submission]` config section.
    pub fn from_config(
        config: &SubmissionConfig,
        registry: DispatcherRegistry,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let orchestrator = Self::new(
            config.retry.clone(),
            ConditionEvaluator::new(config.condition_policy),
            registry,
            sink,
        );
        match &config.metadata {
            Some(metadata) => orchestrator.with_metadata(metadata.clone()),
            None => orchestrator,
        }
    }

    /// Metadata attached to snapshots taken by [`crate::submit::submit`].
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }

    pub fn registry(&self) -> &DispatcherRegistry {
        &self.registry
    }

    /// Filter to enabled actions, sort by `order` (stable), then gate on conditions.
    pub fn plan<'a>(
        &self,
        snapshot: &SubmissionSnapshot,
        actions: &'a [SubmissionAction],
    ) -> ExecutionPlan<'a> {
        let mut enabled: Vec<&SubmissionAction> = actions.iter().filter(|a| a.enabled).collect();
        enabled.sort_by_key(|a| a.order);

        let mut eligible = Vec::with_capacity(enabled.len());
        let mut skipped = Vec::new();
        for action in enabled {
            let passed = match self
                .evaluator
                .try_evaluate(action.condition.as_deref(), &snapshot.answers)
            {
                Ok(passed) => passed,
                Err(e) => {
                    let fallback = self.evaluator.fallback();
                    warn!(
                        action = %action.label(),
                        error = %e,
                        fallback,
                        "Malformed action condition"
                    );
                    self.sink.emit(FlowEvent::ConditionError {
                        expression: action.condition.clone().unwrap_or_default(),
                        message: e.to_string(),
                    });
                    fallback
                }
            };
            if passed {
                eligible.push(action);
            } else {
                debug!(action = %action.label(), "Condition not met, skipping action");
                self.sink.emit(FlowEvent::ActionSkipped {
                    action: action.label().to_string(),
                });
                skipped.push(action.label().to_string());
            }
        }

        ExecutionPlan { eligible, skipped }
    }

    /// Run every eligible action and aggregate the results.
    ///
    /// In parallel mode `on_success = stop` and `on_error = stop` have no
    /// effect: every eligible action is dispatched. Returns
    /// `FormError::Cancelled` if `cancel` fires before all actions settle;
    /// partial results are dropped.
    pub async fn run(
        &self,
        snapshot: &SubmissionSnapshot,
        actions: &[SubmissionAction],
        parallel: bool,
        cancel: &CancellationToken,
    ) -> Result<SubmissionOutcome> {
        if cancel.is_cancelled() {
            return Err(FormError::Cancelled);
        }

        let start = Instant::now();
        let plan = self.plan(snapshot, actions);

        info!(
            session_id = %snapshot.session_id,
            eligible = plan.eligible.len(),
            skipped = plan.skipped.len(),
            parallel,
            "Starting submission"
        );
        self.sink.emit(FlowEvent::SubmissionStarted {
            session_id: snapshot.session_id.clone(),
            action_count: plan.eligible.len(),
            parallel,
        });

        let results = if parallel {
            self.run_parallel(snapshot, &plan.eligible, cancel).await?
        } else {
            self.run_sequential(snapshot, &plan.eligible, cancel).await?
        };

        let outcome = SubmissionOutcome::from_results(
            results,
            plan.skipped,
            start.elapsed().as_millis() as u64,
        );

        info!(
            session_id = %snapshot.session_id,
            overall_success = outcome.overall_success,
            succeeded = outcome.success_count,
            failed = outcome.failure_count,
            skipped = outcome.skipped_count,
            elapsed_ms = outcome.total_elapsed_ms,
            "Submission finished"
        );
        self.sink.emit(FlowEvent::SubmissionFinished {
            session_id: snapshot.session_id.clone(),
            overall_success: outcome.overall_success,
            success_count: outcome.success_count,
            failure_count: outcome.failure_count,
            skipped_count: outcome.skipped_count,
        });

        Ok(outcome)
    }

    /// One at a time, in plan order, honouring stop directives.
    async fn run_sequential(
        &self,
        snapshot: &SubmissionSnapshot,
        eligible: &[&SubmissionAction],
        cancel: &CancellationToken,
    ) -> Result<Vec<ActionResult>> {
        let mut results = Vec::with_capacity(eligible.len());

        for action in eligible {
            let result = self.execute(action, snapshot, cancel).await?;
            let succeeded = result.succeeded;
            results.push(result);

            if succeeded && action.on_success == OnSuccess::Stop {
                info!(action = %action.label(), "Action succeeded with on_success = stop, ending submission");
                break;
            }
            if !succeeded && action.on_error == OnError::Stop {
                warn!(action = %action.label(), "Action failed with on_error = stop, ending submission");
                break;
            }
        }

        Ok(results)
    }

    /// All at once; waits for every action to settle.
    async fn run_parallel(
        &self,
        snapshot: &SubmissionSnapshot,
        eligible: &[&SubmissionAction],
        cancel: &CancellationToken,
    ) -> Result<Vec<ActionResult>> {
        let ignored_stops = eligible
            .iter()
            .filter(|a| a.on_success == OnSuccess::Stop || a.on_error == OnError::Stop)
            .count();
        if ignored_stops > 0 {
            debug!(count = ignored_stops, "Stop directives have no effect in parallel mode");
        }

        let futs: Vec<_> = eligible
            .iter()
            .map(|action| self.execute(action, snapshot, cancel))
            .collect();

        futures::future::join_all(futs).await.into_iter().collect()
    }

    /// Dispatch one action, retrying per its `on_error` policy.
    ///
    /// Transport failures become a failed [`ActionResult`]; the only error
    /// returned is cancellation.
    async fn execute(
        &self,
        action: &SubmissionAction,
        snapshot: &SubmissionSnapshot,
        cancel: &CancellationToken,
    ) -> Result<ActionResult> {
        let start = Instant::now();
        let label = action.label().to_string();
        let mut result = ActionResult {
            action_id: action.id.clone(),
            action_name: label.clone(),
            kind: action.kind(),
            succeeded: false,
            payload: None,
            error: None,
            attempts: 0,
            retry_delays_ms: Vec::new(),
            elapsed_ms: 0,
        };

        let Some(dispatcher) = self.registry.get(action.kind()) else {
            let e = FormError::DispatcherMissing(action.kind().to_string());
            warn!(action = %label, error = %e, "Action cannot be dispatched");
            self.sink.emit(FlowEvent::ActionFailed {
                action: label,
                attempts: 0,
                error: e.to_string(),
            });
            result.error = Some(e.to_string());
            return Ok(result);
        };

        let payload = snapshot.payload_for(action);
        let max_attempts = action.max_attempts();

        loop {
            result.attempts += 1;
            let attempt = result.attempts;
            debug!(action = %label, attempt, max_attempts, "Dispatching action");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FormError::Cancelled),
                r = dispatcher.dispatch(action, &payload, cancel.clone()) => r,
            };

            match outcome {
                Ok(response) => {
                    info!(action = %label, kind = %action.kind(), attempts = attempt, "Action succeeded");
                    self.sink.emit(FlowEvent::ActionSucceeded {
                        action: label,
                        attempts: attempt,
                    });
                    result.succeeded = true;
                    result.payload = (!response.is_null()).then_some(response);
                    result.elapsed_ms = start.elapsed().as_millis() as u64;
                    return Ok(result);
                }
                Err(e) if attempt < max_attempts => {
                    let backoff = calculate_backoff(attempt, &self.retry);
                    let backoff_ms = backoff.as_millis() as u64;
                    warn!(
                        action = %label,
                        attempt,
                        max_attempts,
                        backoff_ms,
                        error = %e,
                        "Retrying action"
                    );
                    self.sink.emit(FlowEvent::ActionRetrying {
                        action: label.clone(),
                        attempt,
                        backoff_ms,
                        error: e.to_string(),
                    });
                    result.retry_delays_ms.push(backoff_ms);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FormError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    warn!(action = %label, attempts = attempt, error = %e, "Action failed");
                    self.sink.emit(FlowEvent::ActionFailed {
                        action: label,
                        attempts: attempt,
                        error: e.to_string(),
                    });
                    result.error = Some(e.to_string());
                    result.elapsed_ms = start.elapsed().as_millis() as u64;
                    return Ok(result);
                }
            }
        }
    }
}
