use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use formflow_core::error::{FormError, Result};
use formflow_core::traits::EventSink;
use formflow_core::types::{
    AnswerSet, AnswerValue, Direction, Field, FieldKind, FlowEvent, NavigationHistory, SessionId,
    SubmissionSnapshot,
};

use crate::graph::FieldGraph;

/// Why the current field blocks advancing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    Required,
    InvalidEmail,
    NotANumber,
    UnknownOption(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "This field is required"),
            Self::InvalidEmail => write!(f, "Enter a valid email address"),
            Self::NotANumber => write!(f, "Enter a number"),
            Self::UnknownOption(opt) => write!(f, "'{}' is not one of the options", opt),
        }
    }
}

/// Outcome of [`Navigator::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Moved to another field.
    Moved { from: String, to: String },
    /// No further field follows; the form is ready to submit.
    Terminal,
    /// The current field failed validation; nothing changed.
    Rejected {
        field_id: String,
        issue: ValidationIssue,
    },
}

/// Mutable state of one questionnaire run.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    current_field_id: String,
    answers: AnswerSet,
    history: NavigationHistory,
    validation_failed: bool,
    terminal: bool,
}

impl Session {
    fn start(first: &str) -> Self {
        Self {
            id: SessionId::new(),
            current_field_id: first.to_string(),
            answers: AnswerSet::new(),
            history: NavigationHistory::new(first),
            validation_failed: false,
            terminal: false,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn current_field_id(&self) -> &str {
        &self.current_field_id
    }

    pub fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    pub fn history(&self) -> &NavigationHistory {
        &self.history
    }

    pub fn validation_failed(&self) -> bool {
        self.validation_failed
    }

    /// Whether the last `advance` reached the end of the form.
    pub fn terminal(&self) -> bool {
        self.terminal
    }
}

/// State machine over a [`FieldGraph`].
///
/// Synchronous: every operation completes before returning. The session is
/// only mutated through these methods.
pub struct Navigator {
    graph: FieldGraph,
    session: Session,
    sink: Arc<dyn EventSink>,
}

impl Navigator {
    /// Start a session at the first field.
    pub fn new(graph: FieldGraph, sink: Arc<dyn EventSink>) -> Self {
        let session = Session::start(&graph.first().id);
        sink.emit(FlowEvent::FormStarted {
            session_id: session.id.clone(),
            first_field: session.current_field_id.clone(),
        });
        Self {
            graph,
            session,
            sink,
        }
    }

    pub fn from_fields(fields: Vec<Field>, sink: Arc<dyn EventSink>) -> Result<Self> {
        Ok(Self::new(FieldGraph::new(fields)?, sink))
    }

    pub fn graph(&self) -> &FieldGraph {
        &self.graph
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session.id
    }

    pub fn current_field_id(&self) -> &str {
        &self.session.current_field_id
    }

    /// The active field. Falls back to the first field if the current id no
    /// longer resolves; the next mutating call resets the session onto it.
    pub fn current_field(&self) -> &Field {
        self.graph
            .get(&self.session.current_field_id)
            .unwrap_or_else(|| self.graph.first())
    }

    pub fn answers(&self) -> &AnswerSet {
        &self.session.answers
    }

    pub fn history(&self) -> &NavigationHistory {
        &self.session.history
    }

    pub fn validation_failed(&self) -> bool {
        self.session.validation_failed
    }

    /// (step number, total fields) for a progress indicator.
    pub fn progress(&self) -> (usize, usize) {
        (self.session.history.len(), self.graph.len())
    }

    /// Store an answer for any field. Never blocks on validation.
    pub fn submit_answer(&mut self, field_id: &str, value: AnswerValue) -> Result<()> {
        self.heal();
        if !self.graph.contains(field_id) {
            return Err(FormError::UnknownField(field_id.to_string()));
        }

        let is_current = field_id == self.session.current_field_id;
        if is_current {
            if !value.is_empty() {
                self.session.validation_failed = false;
            }
            // A changed answer may change where the form goes next.
            self.session.terminal = false;
        }
        self.session.answers.insert(field_id, value);

        debug!(field_id, "Answer recorded");
        self.sink.emit(FlowEvent::FieldAnswered {
            session_id: self.session.id.clone(),
            field_id: field_id.to_string(),
        });
        Ok(())
    }

    /// Store an answer and, for single-choice fields whose answer resolves a
    /// branch, advance immediately unless the field suppresses auto-advance.
    pub fn select(&mut self, field_id: &str, value: AnswerValue) -> Result<Option<Advance>> {
        self.submit_answer(field_id, value)?;
        if field_id == self.session.current_field_id && self.should_auto_advance() {
            return Ok(Some(self.advance(None)));
        }
        Ok(None)
    }

    /// Whether the current answer alone decides the next field.
    pub fn should_auto_advance(&self) -> bool {
        let field = self.current_field();
        if field.suppress_auto_advance
            || !matches!(field.kind, FieldKind::SingleSelect | FieldKind::ChoiceList)
        {
            return false;
        }
        self.session
            .answers
            .get(&field.id)
            .is_some_and(|answer| self.branch_target(field, answer).is_some())
    }

    /// Validate the current field and move to the next one.
    ///
    /// `override_value` is validated in place of the stored answer and only
    /// replaces it when the advance goes through.
    pub fn advance(&mut self, override_value: Option<AnswerValue>) -> Advance {
        self.heal();
        let current = self.session.current_field_id.clone();

        let candidate = override_value
            .as_ref()
            .or_else(|| self.session.answers.get(&current));
        if let Some(issue) = validate(self.current_field(), candidate) {
            self.session.validation_failed = true;
            debug!(field_id = %current, issue = %issue, "Advance rejected");
            self.sink.emit(FlowEvent::ValidationFailed {
                session_id: self.session.id.clone(),
                field_id: current.clone(),
                reason: issue.to_string(),
            });
            return Advance::Rejected {
                field_id: current,
                issue,
            };
        }

        if let Some(value) = override_value {
            self.session.answers.insert(current.as_str(), value);
        }
        self.session.validation_failed = false;
        match self.resolve_next().map(str::to_string) {
            Some(next) => {
                debug!(from = %current, to = %next, "Advanced");
                self.session.history.push(next.clone());
                self.session.current_field_id = next.clone();
                self.session.terminal = false;
                self.sink.emit(FlowEvent::Navigated {
                    session_id: self.session.id.clone(),
                    from: current.clone(),
                    to: next.clone(),
                    direction: Direction::Forward,
                });
                Advance::Moved {
                    from: current,
                    to: next,
                }
            }
            None => {
                debug!(field_id = %current, "Reached terminal state");
                self.session.terminal = true;
                self.sink.emit(FlowEvent::FormCompleted {
                    session_id: self.session.id.clone(),
                    path_length: self.session.history.len(),
                });
                Advance::Terminal
            }
        }
    }

    /// Step back one entry in the history. Returns the new current field,
    /// or `None` when already at the first entry.
    pub fn retreat(&mut self) -> Option<String> {
        self.heal();
        let from = self.session.history.pop()?;
        let to = self.session.history.current().to_string();
        self.session.current_field_id = to.clone();
        self.session.validation_failed = false;
        self.session.terminal = false;

        debug!(from = %from, to = %to, "Retreated");
        self.sink.emit(FlowEvent::Navigated {
            session_id: self.session.id.clone(),
            from,
            to: to.clone(),
            direction: Direction::Back,
        });
        self.heal();
        Some(self.session.current_field_id.clone())
    }

    /// True iff advancing now would not reach another field.
    /// Does not validate and does not mutate.
    pub fn is_terminal(&self) -> bool {
        self.resolve_next().is_none()
    }

    /// Next field id given present answers: branch, then default, then linear order.
    pub fn resolve_next(&self) -> Option<&str> {
        let field = self.current_field();

        if let Some(answer) = self.session.answers.get(&field.id) {
            if let Some(target) = self.branch_target(field, answer) {
                return Some(target);
            }
        }

        if let Some(target) = field.default_next.as_deref() {
            if self.graph.contains(target) {
                return Some(target);
            }
            warn!(field_id = %field.id, next_field = %target, "default_next points at a missing field");
        }

        self.graph.linear_next(&field.id).map(|f| f.id.as_str())
    }

    /// Branch target for an answer. Multi-select answers try the joined
    /// value first, then each selected option in order.
    fn branch_target<'a>(&'a self, field: &'a Field, answer: &AnswerValue) -> Option<&'a str> {
        if field.conditional_next.is_empty() {
            return None;
        }
        let mut keys = vec![answer.stringify()];
        if let AnswerValue::Many(items) = answer {
            keys.extend(items.iter().cloned());
        }
        for key in keys {
            if let Some(target) = field.conditional_next.get(&key) {
                if self.graph.contains(target) {
                    return Some(target.as_str());
                }
                warn!(field_id = %field.id, answer = %key, next_field = %target, "Branch points at a missing field");
            }
        }
        None
    }

    /// Validation problem with the current field's answer, if any.
    pub fn validate_current(&self) -> Option<ValidationIssue> {
        let field = self.current_field();
        validate(field, self.session.answers.get(&field.id))
    }

    /// Throw away answers and history and start over.
    pub fn restart(&mut self) {
        self.session = Session::start(&self.graph.first().id);
        self.sink.emit(FlowEvent::FormRestarted {
            session_id: self.session.id.clone(),
        });
    }

    /// Swap in a new field list. The session self-heals if its current field
    /// disappeared.
    pub fn replace_fields(&mut self, fields: Vec<Field>) -> Result<()> {
        self.graph = FieldGraph::new(fields)?;
        self.heal();
        Ok(())
    }

    /// Read-only copy of answers and history for submission.
    pub fn snapshot(&self) -> SubmissionSnapshot {
        SubmissionSnapshot::new(
            self.session.id.clone(),
            self.session.answers.clone(),
            self.session.history.to_vec(),
        )
    }

    /// Reset onto the first field if the current id no longer resolves.
    fn heal(&mut self) {
        if self.graph.contains(&self.session.current_field_id) {
            return;
        }
        let missing = std::mem::take(&mut self.session.current_field_id);
        let first = self.graph.first().id.clone();
        warn!(missing_field = %missing, reset_to = %first, "Current field vanished, resetting session");

        self.session.current_field_id = first.clone();
        self.session.history = NavigationHistory::new(first);
        self.session.validation_failed = false;
        self.session.terminal = false;
        self.sink.emit(FlowEvent::SessionHealed {
            session_id: self.session.id.clone(),
            missing_field: missing,
        });
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"))
}

fn validate(field: &Field, answer: Option<&AnswerValue>) -> Option<ValidationIssue> {
    if !field.kind.collects_answer() {
        return None;
    }
    let Some(answer) = answer.filter(|a| !a.is_empty()) else {
        return field.required.then_some(ValidationIssue::Required);
    };

    match field.kind {
        FieldKind::Email => {
            let text = answer.stringify();
            (!email_pattern().is_match(text.trim())).then_some(ValidationIssue::InvalidEmail)
        }
        FieldKind::Number => answer
            .as_number()
            .is_none()
            .then_some(ValidationIssue::NotANumber),
        kind if kind.is_choice() && !field.options.is_empty() => answer
            .parts()
            .into_iter()
            .find(|part| !field.options.contains(part))
            .map(ValidationIssue::UnknownOption),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formflow_core::event::NullSink;

    fn nav(fields: Vec<Field>) -> Navigator {
        Navigator::from_fields(fields, Arc::new(NullSink)).unwrap()
    }

    fn branching() -> Vec<Field> {
        vec![
            Field::new("q1", FieldKind::SingleSelect)
                .required()
                .with_options(["Yes", "No"])
                .branch("Yes", "q3")
                .branch("No", "q2"),
            Field::new("q2", FieldKind::Text),
            Field::new("q3", FieldKind::Text),
        ]
    }

    #[test]
    fn test_starts_at_first_field() {
        let n = nav(branching());
        assert_eq!(n.current_field_id(), "q1");
        assert_eq!(n.history().as_slice(), ["q1"]);
        assert!(!n.validation_failed());
        assert_eq!(n.progress(), (1, 3));
    }

    #[test]
    fn test_branch_yes_and_no() {
        let mut n = nav(branching());
        n.submit_answer("q1", "Yes".into()).unwrap();
        assert_eq!(
            n.advance(None),
            Advance::Moved {
                from: "q1".into(),
                to: "q3".into()
            }
        );
        assert_eq!(n.current_field_id(), "q3");

        let mut n = nav(branching());
        n.advance(Some("No".into()));
        assert_eq!(n.current_field_id(), "q2");
    }

    #[test]
    fn test_required_blocks_advance() {
        let mut n = nav(branching());
        let result = n.advance(None);
        assert_eq!(
            result,
            Advance::Rejected {
                field_id: "q1".into(),
                issue: ValidationIssue::Required
            }
        );
        assert_eq!(n.current_field_id(), "q1");
        assert!(n.validation_failed());

        n.advance(Some("   ".into()));
        assert_eq!(n.current_field_id(), "q1");

        n.submit_answer("q1", "No".into()).unwrap();
        assert!(!n.validation_failed());
        n.advance(None);
        assert_eq!(n.current_field_id(), "q2");
    }

    #[test]
    fn test_rejected_override_keeps_previous_answer() {
        let mut n = nav(vec![
            Field::new("email", FieldKind::Email).required(),
            Field::new("b", FieldKind::Text),
        ]);
        n.submit_answer("email", "ada@example.com".into()).unwrap();
        assert!(matches!(
            n.advance(Some("not-an-email".into())),
            Advance::Rejected { issue: ValidationIssue::InvalidEmail, .. }
        ));
        assert_eq!(
            n.answers().get("email").map(|a| a.stringify()),
            Some("ada@example.com".to_string())
        );
        assert_eq!(n.history().len(), 1);

        n.advance(Some("grace@example.com".into()));
        assert_eq!(n.current_field_id(), "b");
        assert_eq!(
            n.answers().get("email").map(|a| a.stringify()),
            Some("grace@example.com".to_string())
        );
    }

    #[test]
    fn test_submit_answer_never_validates() {
        let mut n = nav(branching());
        n.submit_answer("q1", "".into()).unwrap();
        assert!(!n.validation_failed());
        assert!(n.submit_answer("nope", "x".into()).is_err());
    }

    #[test]
    fn test_default_next_then_linear() {
        let mut n = nav(vec![
            Field::new("a", FieldKind::Text)
                .branch("skip", "d")
                .with_default_next("c"),
            Field::new("b", FieldKind::Text),
            Field::new("c", FieldKind::Text),
            Field::new("d", FieldKind::Text),
        ]);
        n.advance(Some("anything".into()));
        assert_eq!(n.current_field_id(), "c");
        n.advance(None);
        assert_eq!(n.current_field_id(), "d");
        assert!(n.is_terminal());
    }

    #[test]
    fn test_dangling_references_fall_back() {
        let mut n = nav(vec![
            Field::new("a", FieldKind::Text)
                .branch("x", "ghost")
                .with_default_next("also-ghost"),
            Field::new("b", FieldKind::Text),
        ]);
        assert_eq!(n.advance(Some("x".into())), Advance::Moved {
            from: "a".into(),
            to: "b".into()
        });
    }

    #[test]
    fn test_terminal_keeps_state() {
        let mut n = nav(branching());
        n.advance(Some("Yes".into()));
        assert!(n.is_terminal());
        assert_eq!(n.advance(Some("done".into())), Advance::Terminal);
        assert!(n.session().terminal());
        assert_eq!(n.current_field_id(), "q3");
        assert_eq!(n.history().as_slice(), ["q1", "q3"]);
        assert_eq!(n.answers().len(), 2);
    }

    #[test]
    fn test_is_terminal_does_not_mutate() {
        let n = nav(branching());
        assert!(!n.is_terminal());
        assert_eq!(n.history().len(), 1);
    }

    #[test]
    fn test_retreat() {
        let mut n = nav(branching());
        assert_eq!(n.retreat(), None);
        assert_eq!(n.history().len(), 1);

        n.advance(Some("No".into()));
        n.advance(Some("text".into()));
        assert_eq!(n.current_field_id(), "q3");
        assert_eq!(n.history().as_slice(), ["q1", "q2", "q3"]);

        assert_eq!(n.retreat().as_deref(), Some("q2"));
        assert_eq!(n.retreat().as_deref(), Some("q1"));
        assert_eq!(n.retreat(), None);
        assert_eq!(n.current_field_id(), "q1");
        assert_eq!(n.answers().get("q1"), Some(&AnswerValue::from("No")));
    }

    #[test]
    fn test_retreat_then_advance_round_trip() {
        let mut n = nav(branching());
        n.advance(Some("Yes".into()));
        let before = n.current_field_id().to_string();
        n.retreat();
        n.advance(Some("Yes".into()));
        assert_eq!(n.current_field_id(), before);
        assert_eq!(n.history().as_slice(), ["q1", "q3"]);
    }

    #[test]
    fn test_retreat_clears_validation_flag() {
        let mut n = nav(vec![
            Field::new("a", FieldKind::Text),
            Field::new("b", FieldKind::Text).required(),
        ]);
        n.advance(None);
        n.advance(None);
        assert!(n.validation_failed());
        n.retreat();
        assert!(!n.validation_failed());
    }

    #[test]
    fn test_format_validation() {
        let mut n = nav(vec![
            Field::new("email", FieldKind::Email),
            Field::new("age", FieldKind::Number),
            Field::new("plan", FieldKind::SingleSelect).with_options(["free", "pro"]),
            Field::new("end", FieldKind::Informational).required(),
        ]);
        assert!(matches!(
            n.advance(Some("not-an-email".into())),
            Advance::Rejected { issue: ValidationIssue::InvalidEmail, .. }
        ));
        n.advance(Some("ada@example.com".into()));
        assert_eq!(n.current_field_id(), "age");

        assert!(matches!(
            n.advance(Some("forty".into())),
            Advance::Rejected { issue: ValidationIssue::NotANumber, .. }
        ));
        n.advance(Some("42".into()));
        assert_eq!(n.current_field_id(), "plan");

        assert_eq!(
            n.advance(Some("enterprise".into())),
            Advance::Rejected {
                field_id: "plan".into(),
                issue: ValidationIssue::UnknownOption("enterprise".into())
            }
        );
        n.advance(Some("pro".into()));
        // Informational fields never block, even when marked required.
        assert_eq!(n.advance(None), Advance::Terminal);
    }

    #[test]
    fn test_optional_empty_field_advances() {
        let mut n = nav(vec![
            Field::new("email", FieldKind::Email),
            Field::new("b", FieldKind::Text),
        ]);
        assert!(matches!(n.advance(None), Advance::Moved { .. }));
    }

    #[test]
    fn test_multi_select_branching() {
        let mut n = nav(vec![
            Field::new("topics", FieldKind::MultiSelect)
                .with_options(["rust", "go", "wasm"])
                .branch("go", "go-details")
                .branch("rust,wasm", "combo"),
            Field::new("plain", FieldKind::Text),
            Field::new("go-details", FieldKind::Text),
            Field::new("combo", FieldKind::Text),
        ]);
        n.advance(Some(vec!["rust", "go"].into()));
        assert_eq!(n.current_field_id(), "go-details");

        n.retreat();
        n.advance(Some(vec!["rust", "wasm"].into()));
        assert_eq!(n.current_field_id(), "combo");

        n.retreat();
        n.advance(Some(vec!["rust"].into()));
        assert_eq!(n.current_field_id(), "plain");
    }

    #[test]
    fn test_select_auto_advances() {
        let mut n = nav(branching());
        let result = n.select("q1", "Yes".into()).unwrap();
        assert_eq!(
            result,
            Some(Advance::Moved {
                from: "q1".into(),
                to: "q3".into()
            })
        );
    }

    #[test]
    fn test_select_respects_suppress_auto_advance() {
        let mut fields = branching();
        fields[0] = fields[0].clone().suppress_auto_advance();
        let mut n = nav(fields);
        assert_eq!(n.select("q1", "Yes".into()).unwrap(), None);
        assert_eq!(n.current_field_id(), "q1");
        n.advance(None);
        assert_eq!(n.current_field_id(), "q3");
    }

    #[test]
    fn test_select_without_branch_does_not_advance() {
        let mut n = nav(vec![
            Field::new("a", FieldKind::SingleSelect).with_options(["x", "y"]),
            Field::new("b", FieldKind::Text),
        ]);
        assert_eq!(n.select("a", "x".into()).unwrap(), None);
    }

    #[test]
    fn test_self_heals_after_field_removal() {
        let mut n = nav(branching());
        n.advance(Some("Yes".into()));
        assert_eq!(n.current_field_id(), "q3");

        n.replace_fields(vec![
            Field::new("q1", FieldKind::Text),
            Field::new("q2", FieldKind::Text),
        ])
        .unwrap();
        assert_eq!(n.current_field_id(), "q1");
        assert_eq!(n.history().as_slice(), ["q1"]);
        // Answers survive the reset.
        assert!(n.answers().contains("q1"));
    }

    #[test]
    fn test_restart() {
        let mut n = nav(branching());
        let first_session = n.session_id().clone();
        n.advance(Some("No".into()));
        n.restart();
        assert_eq!(n.current_field_id(), "q1");
        assert!(n.answers().is_empty());
        assert_ne!(n.session_id(), &first_session);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut n = nav(branching());
        n.advance(Some("No".into()));
        let snap = n.snapshot();
        n.submit_answer("q2", "late".into()).unwrap();
        assert!(!snap.answers.contains("q2"));
        assert_eq!(snap.history, vec!["q1", "q2"]);
    }
}
