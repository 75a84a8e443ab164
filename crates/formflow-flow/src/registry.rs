use std::collections::HashMap;
use std::sync::Arc;

use formflow_core::traits::Dispatcher;
use formflow_core::types::ActionKind;

/// One dispatcher per action kind.
#[derive(Default, Clone)]
pub struct DispatcherRegistry {
    dispatchers: HashMap<ActionKind, Arc<dyn Dispatcher>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatcher under its own kind, replacing any previous one.
    pub fn register(&mut self, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatchers.insert(dispatcher.kind(), dispatcher);
    }

    pub fn with(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.register(dispatcher);
        self
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Dispatcher>> {
        self.dispatchers.get(&kind).cloned()
    }

    /// Kinds with no registered dispatcher.
    pub fn missing_kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|k| !self.dispatchers.contains_key(k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use formflow_core::error::Result;
    use formflow_core::types::{SubmissionAction, SubmissionPayload};
    use tokio_util::sync::CancellationToken;

    struct Fixed(ActionKind);

    impl Dispatcher for Fixed {
        fn kind(&self) -> ActionKind {
            self.0
        }

        fn dispatch<'a>(
            &'a self,
            _action: &'a SubmissionAction,
            _payload: &'a SubmissionPayload,
            _cancel: CancellationToken,
        ) -> BoxFuture<'a, Result<serde_json::Value>> {
            Box::pin(async { Ok(serde_json::Value::Null) })
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = DispatcherRegistry::new()
            .with(Arc::new(Fixed(ActionKind::Webhook)))
            .with(Arc::new(Fixed(ActionKind::Chat)));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(ActionKind::Webhook).is_some());
        assert!(registry.get(ActionKind::Email).is_none());
        assert_eq!(
            registry.missing_kinds(),
            vec![ActionKind::Email, ActionKind::Spreadsheet, ActionKind::Custom]
        );
    }
}
