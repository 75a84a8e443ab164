use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Fields ──────────────────────────────────────────────────────

/// The kind of question a field asks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Email,
    Number,
    #[serde(alias = "radio")]
    SingleSelect,
    #[serde(alias = "checkbox")]
    MultiSelect,
    #[serde(alias = "textarea")]
    LongText,
    ChoiceList,
    ProcessStep,
    Informational,
}

impl FieldKind {
    /// Kinds whose answer is picked from `options`.
    pub fn is_choice(&self) -> bool {
        matches!(self, Self::SingleSelect | Self::MultiSelect | Self::ChoiceList)
    }

    /// Whether the kind collects an answer at all.
    /// Informational and process-step fields are display-only.
    pub fn collects_answer(&self) -> bool {
        !matches!(self, Self::ProcessStep | Self::Informational)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Email => "email",
            Self::Number => "number",
            Self::SingleSelect => "single_select",
            Self::MultiSelect => "multi_select",
            Self::LongText => "long_text",
            Self::ChoiceList => "choice_list",
            Self::ProcessStep => "process_step",
            Self::Informational => "informational",
        };
        f.write_str(s)
    }
}

/// One question or step of the questionnaire.
///
/// Authored externally; unknown attributes in the source document are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    #[serde(default)]
    pub kind: FieldKind,
    /// Prompt shown to the user.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    /// Stringified answer -> next field id.
    #[serde(default, alias = "conditionalNext")]
    pub conditional_next: HashMap<String, String>,
    #[serde(default, alias = "defaultNext", skip_serializing_if = "Option::is_none")]
    pub default_next: Option<String>,
    #[serde(default, alias = "suppressAutoAdvance")]
    pub suppress_auto_advance: bool,
}

impl Field {
    pub fn new(id: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            kind,
            label: String::new(),
            required: false,
            options: vec![],
            conditional_next: HashMap::new(),
            default_next: None,
            suppress_auto_advance: false,
        }
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Route to `target` when the answer stringifies to `answer`.
    pub fn branch(mut self, answer: impl Into<String>, target: impl Into<String>) -> Self {
        self.conditional_next.insert(answer.into(), target.into());
        self
    }

    pub fn with_default_next(mut self, target: impl Into<String>) -> Self {
        self.default_next = Some(target.into());
        self
    }

    pub fn suppress_auto_advance(mut self) -> Self {
        self.suppress_auto_advance = true;
        self
    }

    /// Prompt text, falling back to the id.
    pub fn prompt(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

// ── Answers ─────────────────────────────────────────────────────

/// A single answer value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Text(String),
    Number(f64),
    Many(Vec<String>),
}

impl AnswerValue {
    /// Empty strings (after trimming) and empty selections count as unanswered.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(n) => n.is_nan(),
            Self::Many(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    /// Canonical string form used for conditional-branch lookups.
    pub fn stringify(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => format_number(*n),
            Self::Many(items) => items.join(","),
        }
    }

    /// The individual selected values (one element for scalars).
    pub fn parts(&self) -> Vec<String> {
        match self {
            Self::Many(items) => items.clone(),
            other => vec![other.stringify()],
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Many(_) => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Many(items) => write!(f, "{}", items.join(", ")),
            other => write!(f, "{}", other.stringify()),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for AnswerValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<Vec<String>> for AnswerValue {
    fn from(items: Vec<String>) -> Self {
        Self::Many(items)
    }
}

impl From<Vec<&str>> for AnswerValue {
    fn from(items: Vec<&str>) -> Self {
        Self::Many(items.into_iter().map(String::from).collect())
    }
}

/// Field id -> answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSet(HashMap<String, AnswerValue>);

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field_id: &str) -> Option<&AnswerValue> {
        self.0.get(field_id)
    }

    /// Insert or overwrite an answer.
    pub fn insert(&mut self, field_id: impl Into<String>, value: AnswerValue) {
        self.0.insert(field_id.into(), value);
    }

    pub fn remove(&mut self, field_id: &str) -> Option<AnswerValue> {
        self.0.remove(field_id)
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.0.contains_key(field_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AnswerValue)> {
        self.0.iter()
    }

    /// Answers sorted by field id, for deterministic rendering.
    pub fn sorted(&self) -> Vec<(&String, &AnswerValue)> {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl<K: Into<String>, V: Into<AnswerValue>> FromIterator<(K, V)> for AnswerSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Ordered, never-empty list of visited field ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NavigationHistory(Vec<String>);

impl NavigationHistory {
    /// Start a history at the first field.
    pub fn new(first: impl Into<String>) -> Self {
        Self(vec![first.into()])
    }

    pub fn push(&mut self, field_id: impl Into<String>) {
        self.0.push(field_id.into());
    }

    /// Pop the tail, never dropping below one entry.
    pub fn pop(&mut self) -> Option<String> {
        if self.0.len() > 1 {
            self.0.pop()
        } else {
            None
        }
    }

    pub fn current(&self) -> &str {
        // Never empty: constructed with one entry and `pop` keeps it.
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

// ── Submission actions ──────────────────────────────────────────

/// What to do after an action succeeds (sequential mode only).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnSuccess {
    #[default]
    Continue,
    Stop,
}

/// What to do after an action fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Continue,
    Stop,
    Retry,
}

/// Action kind, one dispatcher per kind.
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Webhook,
    Email,
    Spreadsheet,
    Chat,
    Custom,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        Self::Webhook,
        Self::Email,
        Self::Spreadsheet,
        Self::Chat,
        Self::Custom,
    ];
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Webhook => "webhook",
            Self::Email => "email",
            Self::Spreadsheet => "spreadsheet",
            Self::Chat => "chat",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }
}

/// An HTTP endpoint with optional header injection and bearer auth.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpTarget {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl HttpTarget {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Kind-specific destination of an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionTarget {
    Webhook {
        endpoint: HttpTarget,
        /// Optional body template with `{{field_id}}` placeholders.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body_template: Option<String>,
    },
    Email {
        to: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject: Option<String>,
        /// HTTP relay that actually sends the mail. Without it the action is a no-op.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relay: Option<HttpTarget>,
    },
    Spreadsheet {
        endpoint: HttpTarget,
        /// Column order as field ids. Empty means every answer, by field id.
        #[serde(default)]
        columns: Vec<String>,
    },
    Chat {
        endpoint: HttpTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_template: Option<String>,
    },
    Custom {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handler: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<HttpTarget>,
    },
}

impl ActionTarget {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Webhook { .. } => ActionKind::Webhook,
            Self::Email { .. } => ActionKind::Email,
            Self::Spreadsheet { .. } => ActionKind::Spreadsheet,
            Self::Chat { .. } => ActionKind::Chat,
            Self::Custom { .. } => ActionKind::Custom,
        }
    }

    /// A plain POST webhook.
    pub fn webhook(url: impl Into<String>) -> Self {
        Self::Webhook {
            endpoint: HttpTarget::post(url),
            body_template: None,
        }
    }
}

/// One external side effect run when the form is submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionAction {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ascending execution order; ties keep declaration order.
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, alias = "onSuccess")]
    pub on_success: OnSuccess,
    #[serde(default, alias = "onError")]
    pub on_error: OnError,
    #[serde(default = "default_retry_attempts", alias = "retryAttempts")]
    pub retry_attempts: u32,
    #[serde(default, alias = "includeMetadata")]
    pub include_metadata: bool,
    pub target: ActionTarget,
}

fn default_enabled() -> bool { true }
fn default_retry_attempts() -> u32 { 1 }

impl SubmissionAction {
    pub fn new(name: impl Into<String>, target: ActionTarget) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            enabled: true,
            order: 0,
            condition: None,
            on_success: OnSuccess::Continue,
            on_error: OnError::Continue,
            retry_attempts: 1,
            include_metadata: false,
            target,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_on_success(mut self, on_success: OnSuccess) -> Self {
        self.on_success = on_success;
        self
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    /// Retry on error up to `attempts` total attempts.
    pub fn with_retry(mut self, attempts: u32) -> Self {
        self.on_error = OnError::Retry;
        self.retry_attempts = attempts;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.target.kind()
    }

    /// Total attempts allowed; more than one only under `on_error = retry`.
    pub fn max_attempts(&self) -> u32 {
        match self.on_error {
            OnError::Retry => self.retry_attempts.max(1),
            _ => 1,
        }
    }

    /// Identifier for logs and results.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

// ── Submission payload and results ──────────────────────────────

/// Read-only copy of a finished session, captured when submission starts.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionSnapshot {
    pub session_id: SessionId,
    pub answers: AnswerSet,
    pub history: Vec<String>,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SubmissionSnapshot {
    pub fn new(session_id: SessionId, answers: AnswerSet, history: Vec<String>) -> Self {
        Self {
            session_id,
            answers,
            history,
            captured_at: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build the payload for one action. Metadata is attached only on opt-in.
    pub fn payload_for(&self, action: &SubmissionAction) -> SubmissionPayload {
        SubmissionPayload {
            form_data: self.answers.clone(),
            navigation_path: self.history.clone(),
            timestamp: self.captured_at,
            session_id: self.session_id.clone(),
            metadata: if action.include_metadata {
                self.metadata.clone()
            } else {
                None
            },
        }
    }
}

/// The body handed to each dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub form_data: AnswerSet,
    pub navigation_path: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Result of running a single action, retries included.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub action_id: String,
    pub action_name: String,
    pub kind: ActionKind,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    /// Backoff waited before each retry, in milliseconds.
    pub retry_delays_ms: Vec<u64>,
    pub elapsed_ms: u64,
}

/// Aggregated result of a submission run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmissionOutcome {
    /// Executed actions in completion order (sorted order when sequential).
    pub results: Vec<ActionResult>,
    /// Names of actions whose condition did not pass.
    pub skipped: Vec<String>,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    /// True iff at least one action ran and none failed.
    pub overall_success: bool,
    pub total_elapsed_ms: u64,
}

impl SubmissionOutcome {
    pub fn from_results(results: Vec<ActionResult>, skipped: Vec<String>, total_elapsed_ms: u64) -> Self {
        let success_count = results.iter().filter(|r| r.succeeded).count();
        let failure_count = results.len() - success_count;
        Self {
            skipped_count: skipped.len(),
            overall_success: failure_count == 0 && success_count > 0,
            success_count,
            failure_count,
            results,
            skipped,
            total_elapsed_ms,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionResult> {
        self.results.iter().filter(|r| !r.succeeded)
    }

    /// Summarize a failed aggregate as a single error.
    pub fn into_result(self) -> crate::error::Result<Self> {
        if self.failure_count == 0 {
            return Ok(self);
        }
        let details = self
            .failures()
            .map(|r| {
                format!(
                    "{}: {}",
                    r.action_name,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        Err(crate::error::FormError::Orchestration {
            failures: self.failure_count,
            details,
        })
    }
}

// ── Lifecycle events ────────────────────────────────────────────

/// Direction of a navigation step.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Back,
}

/// Structured lifecycle events for analytics sinks.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    FormStarted {
        session_id: SessionId,
        first_field: String,
    },
    FieldAnswered {
        session_id: SessionId,
        field_id: String,
    },
    Navigated {
        session_id: SessionId,
        from: String,
        to: String,
        direction: Direction,
    },
    ValidationFailed {
        session_id: SessionId,
        field_id: String,
        reason: String,
    },
    FormCompleted {
        session_id: SessionId,
        path_length: usize,
    },
    SessionHealed {
        session_id: SessionId,
        missing_field: String,
    },
    FormRestarted {
        session_id: SessionId,
    },
    ConditionError {
        expression: String,
        message: String,
    },
    SubmissionStarted {
        session_id: SessionId,
        action_count: usize,
        parallel: bool,
    },
    ActionSkipped {
        action: String,
    },
    ActionRetrying {
        action: String,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },
    ActionSucceeded {
        action: String,
        attempts: u32,
    },
    ActionFailed {
        action: String,
        attempts: u32,
        error: String,
    },
    SubmissionFinished {
        session_id: SessionId,
        overall_success: bool,
        success_count: usize,
        failure_count: usize,
        skipped_count: usize,
    },
}

impl FlowEvent {
    /// Event name as sent to analytics sinks.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FormStarted { .. } => "form_started",
            Self::FieldAnswered { .. } => "field_answered",
            Self::Navigated { .. } => "navigated",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::FormCompleted { .. } => "form_completed",
            Self::SessionHealed { .. } => "session_healed",
            Self::FormRestarted { .. } => "form_restarted",
            Self::ConditionError { .. } => "condition_error",
            Self::SubmissionStarted { .. } => "submission_started",
            Self::ActionSkipped { .. } => "action_skipped",
            Self::ActionRetrying { .. } => "action_retrying",
            Self::ActionSucceeded { .. } => "action_succeeded",
            Self::ActionFailed { .. } => "action_failed",
            Self::SubmissionFinished { .. } => "submission_finished",
        }
    }

    /// The structured payload, without the `event` tag.
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("event");
        }
        value
    }
}
