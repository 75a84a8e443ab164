//! Shared mocks and fixtures for formflow tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use formflow_core::error::{FormError, Result};
use formflow_core::traits::{Dispatcher, EventSink};
use formflow_core::types::{
    ActionKind, ActionTarget, Field, FieldKind, FlowEvent, SubmissionAction, SubmissionPayload,
};

/// Shared log of action names in the order they were dispatched.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Dispatcher that replays a scripted sequence of outcomes.
///
/// Each call pops the next outcome; once the script runs out every call
/// succeeds with `null`.
pub struct MockDispatcher {
    kind: ActionKind,
    script: Mutex<VecDeque<std::result::Result<serde_json::Value, String>>>,
    failing: Mutex<Vec<String>>,
    calls: AtomicUsize,
    log: CallLog,
    payloads: Mutex<Vec<SubmissionPayload>>,
    delay: Option<Duration>,
}

impl MockDispatcher {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            script: Mutex::new(VecDeque::new()),
            failing: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
            payloads: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn webhook() -> Self {
        Self::new(ActionKind::Webhook)
    }

    /// Queue a successful response.
    pub fn then_ok(self, response: serde_json::Value) -> Self {
        self.lock_script().push_back(Ok(response));
        self
    }

    /// Queue a failure.
    pub fn then_err(self, message: impl Into<String>) -> Self {
        self.lock_script().push_back(Err(message.into()));
        self
    }

    /// Always fail for the named action, regardless of the script.
    pub fn failing_for(self, action_name: impl Into<String>) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action_name.into());
        self
    }

    /// Record into an existing log, to observe ordering across dispatchers.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Action names dispatched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn payloads(&self) -> Vec<SubmissionPayload> {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_script(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<std::result::Result<serde_json::Value, String>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Dispatcher for MockDispatcher {
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
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(action.label().to_string());
            self.payloads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(payload.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let forced_failure = self
                .failing
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .any(|name| name == action.label());
            if forced_failure {
                return Err(FormError::dispatch(action.label(), "mock failure"));
            }

            match self.lock_script().pop_front() {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(FormError::dispatch(action.label(), message)),
                None => Ok(serde_json::Value::Null),
            }
        })
    }
}

/// Event sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<FlowEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Event names in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(FlowEvent::name)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: FlowEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

// ── Fixtures ────────────────────────────────────────────────────

/// Q1 (required Yes/No) branches Yes -> Q3, No -> Q2; Q2 and Q3 are text.
pub fn branching_form() -> Vec<Field> {
    vec![
        Field::new("q1", FieldKind::SingleSelect)
            .with_label("Are you a customer?")
            .required()
            .with_options(["Yes", "No"])
            .branch("Yes", "q3")
            .branch("No", "q2"),
        Field::new("q2", FieldKind::Text).with_label("How did you hear about us?"),
        Field::new("q3", FieldKind::Text).with_label("Account number"),
    ]
}

/// A webhook action aimed at a local URL.
pub fn webhook_action(name: &str) -> SubmissionAction {
    SubmissionAction::new(
        name,
        ActionTarget::webhook(format!("http://localhost/{}", name)),
    )
}
