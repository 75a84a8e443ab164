pub mod condition;
pub mod graph;
pub mod navigator;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod submit;

pub use condition::{Condition, ConditionError, ConditionEvaluator};
pub use graph::{FieldGraph, GraphIssue};
pub use navigator::{Advance, Navigator, Session, ValidationIssue};
pub use orchestrator::{ActionOrchestrator, ExecutionPlan};
pub use registry::DispatcherRegistry;
pub use retry::calculate_backoff;
pub use submit::{submit, SubmissionReport};
