use std::collections::HashMap;

use serde::Serialize;

use formflow_core::error::{FormError, Result};
use formflow_core::types::Field;

/// Ordered collection of fields with id lookup.
///
/// Linear order is the fallback traversal when a field has no resolvable
/// conditional or default successor.
#[derive(Debug, Clone)]
pub struct FieldGraph {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

/// A structural problem found by [`FieldGraph::check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum GraphIssue {
    /// A `conditional_next` entry points at a missing field.
    DanglingBranch {
        field_id: String,
        answer: String,
        target: String,
    },
    /// `default_next` points at a missing field.
    DanglingDefault { field_id: String, target: String },
    /// A branch answer is not one of the field's declared options.
    UnknownBranchOption { field_id: String, answer: String },
    /// A field that no path from the first field can reach.
    Unreachable { field_id: String },
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DanglingBranch {
                field_id,
                answer,
                target,
            } => write!(
                f,
                "{}: branch '{}' points at missing field '{}' (falls back to default/linear order)",
                field_id, answer, target
            ),
            Self::DanglingDefault { field_id, target } => write!(
                f,
                "{}: default_next points at missing field '{}' (falls back to linear order)",
                field_id, target
            ),
            Self::UnknownBranchOption { field_id, answer } => write!(
                f,
                "{}: branch answer '{}' is not one of the field's options",
                field_id, answer
            ),
            Self::Unreachable { field_id } => {
                write!(f, "{}: not reachable from the first field", field_id)
            }
        }
    }
}

impl FieldGraph {
    /// Build a graph. Fails on an empty list or duplicate ids.
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        if fields.is_empty() {
            return Err(FormError::EmptyForm);
        }
        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.id.clone(), i).is_some() {
                return Err(FormError::DuplicateField(field.id.clone()));
            }
        }
        Ok(Self { fields, index })
    }

    pub fn first(&self) -> &Field {
        &self.fields[0]
    }

    pub fn get(&self, id: &str) -> Option<&Field> {
        self.index.get(id).map(|&i| &self.fields[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// The field after `id` in declaration order.
    pub fn linear_next(&self, id: &str) -> Option<&Field> {
        self.position(id).and_then(|i| self.fields.get(i + 1))
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field ids `field` can move to: every valid branch target plus the fallback.
    fn successors<'a>(&'a self, field: &'a Field) -> Vec<&'a str> {
        let mut out: Vec<&str> = field
            .conditional_next
            .values()
            .map(String::as_str)
            .filter(|t| self.contains(t))
            .collect();
        match field.default_next.as_deref().filter(|t| self.contains(t)) {
            Some(target) => out.push(target),
            None => {
                if let Some(next) = self.linear_next(&field.id) {
                    out.push(&next.id);
                }
            }
        }
        out
    }

    /// Report dangling references and unreachable fields.
    ///
    /// None of these are fatal at runtime; navigation falls back to linear
    /// order. They are surfaced for authors.
    pub fn check(&self) -> Vec<GraphIssue> {
        let mut issues = Vec::new();

        for field in &self.fields {
            let mut branches: Vec<_> = field.conditional_next.iter().collect();
            branches.sort();
            for (answer, target) in branches {
                if !self.contains(target) {
                    issues.push(GraphIssue::DanglingBranch {
                        field_id: field.id.clone(),
                        answer: answer.clone(),
                        target: target.clone(),
                    });
                }
                if !field.options.is_empty() && !field.options.contains(answer) {
                    issues.push(GraphIssue::UnknownBranchOption {
                        field_id: field.id.clone(),
                        answer: answer.clone(),
                    });
                }
            }
            if let Some(target) = &field.default_next {
                if !self.contains(target) {
                    issues.push(GraphIssue::DanglingDefault {
                        field_id: field.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        // Reachability over every possible successor.
        let mut seen = vec![false; self.fields.len()];
        let mut stack = vec![0usize];
        while let Some(i) = stack.pop() {
            if std::mem::replace(&mut seen[i], true) {
                continue;
            }
            for next in self.successors(&self.fields[i]) {
                if let Some(j) = self.position(next) {
                    if !seen[j] {
                        stack.push(j);
                    }
                }
            }
        }
        for (i, field) in self.fields.iter().enumerate() {
            if !seen[i] {
                issues.push(GraphIssue::Unreachable {
                    field_id: field.id.clone(),
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formflow_core::types::FieldKind;

    fn fields() -> Vec<Field> {
        vec![
            Field::new("q1", FieldKind::SingleSelect)
                .with_options(["Yes", "No"])
                .branch("Yes", "q3")
                .branch("No", "q2"),
            Field::new("q2", FieldKind::Text),
            Field::new("q3", FieldKind::Text),
        ]
    }

    #[test]
    fn test_lookup_and_linear_order() {
        let graph = FieldGraph::new(fields()).unwrap();
        assert_eq!(graph.first().id, "q1");
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.linear_next("q1").map(|f| f.id.as_str()), Some("q2"));
        assert!(graph.linear_next("q3").is_none());
        assert!(graph.linear_next("missing").is_none());
        assert_eq!(graph.position("q3"), Some(2));
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(matches!(FieldGraph::new(vec![]), Err(FormError::EmptyForm)));
        let dup = vec![
            Field::new("a", FieldKind::Text),
            Field::new("a", FieldKind::Email),
        ];
        assert!(matches!(
            FieldGraph::new(dup),
            Err(FormError::DuplicateField(id)) if id == "a"
        ));
    }

    #[test]
    fn test_clean_graph_has_no_issues() {
        let graph = FieldGraph::new(fields()).unwrap();
        assert!(graph.check().is_empty());
    }

    #[test]
    fn test_reports_dangling_references() {
        let graph = FieldGraph::new(vec![
            Field::new("q1", FieldKind::SingleSelect)
                .with_options(["Yes", "No"])
                .branch("Yes", "ghost")
                .branch("Maybe", "q2")
                .with_default_next("nowhere"),
            Field::new("q2", FieldKind::Text),
        ])
        .unwrap();
        let issues = graph.check();
        assert!(issues.contains(&GraphIssue::DanglingBranch {
            field_id: "q1".into(),
            answer: "Yes".into(),
            target: "ghost".into(),
        }));
        assert!(issues.contains(&GraphIssue::DanglingDefault {
            field_id: "q1".into(),
            target: "nowhere".into(),
        }));
        assert!(issues.contains(&GraphIssue::UnknownBranchOption {
            field_id: "q1".into(),
            answer: "Maybe".into(),
        }));
    }

    #[test]
    fn test_reports_unreachable() {
        let graph = FieldGraph::new(vec![
            Field::new("q1", FieldKind::Text).with_default_next("q3"),
            Field::new("q2", FieldKind::Text),
            Field::new("q3", FieldKind::Text),
        ])
        .unwrap();
        assert_eq!(
            graph.check(),
            vec![GraphIssue::Unreachable {
                field_id: "q2".into()
            }]
        );
    }
}
