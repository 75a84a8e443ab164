use formflow_core::config::AppConfig;
use formflow_core::types::{ActionTarget, HttpTarget, SubmissionAction};
use formflow_flow::{Condition, FieldGraph};

#[derive(Debug, PartialEq)]
enum Level {
    Ok,
    Warn,
    Error,
}

struct CheckResult {
    label: String,
    level: Level,
    detail: String,
}

impl CheckResult {
    fn new(label: impl Into<String>, level: Level, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            level,
            detail: detail.into(),
        }
    }
}

/// Print every check and return the number of errors.
pub fn run_check(config: &AppConfig) -> usize {
    let checks = collect(config);

    let mut warn_count = 0;
    let mut error_count = 0;
    for check in &checks {
        let icon = match check.level {
            Level::Ok => "[OK]",
            Level::Warn => "[--]",
            Level::Error => "[!!]",
        };
        println!("  {} {}: {}", icon, check.label, check.detail);
        match check.level {
            Level::Ok => {}
            Level::Warn => warn_count += 1,
            Level::Error => error_count += 1,
        }
    }

    println!();
    println!("  {} errors, {} warnings", error_count, warn_count);
    error_count
}

fn collect(config: &AppConfig) -> Vec<CheckResult> {
    let mut checks = Vec::new();
    checks.extend(check_form(config));
    for action in &config.submission.actions {
        checks.extend(check_action(action));
    }
    if config.submission.actions.is_empty() {
        checks.push(CheckResult::new(
            "Actions",
            Level::Ok,
            "None configured, submissions always succeed",
        ));
    }
    checks
}

fn check_form(config: &AppConfig) -> Vec<CheckResult> {
    let graph = match FieldGraph::new(config.form.fields.clone()) {
        Ok(graph) => graph,
        Err(e) => return vec![CheckResult::new("Form", Level::Error, e.to_string())],
    };

    let issues = graph.check();
    if issues.is_empty() {
        return vec![CheckResult::new(
            "Form",
            Level::Ok,
            format!("{} fields, every field reachable", graph.len()),
        )];
    }
    issues
        .into_iter()
        .map(|issue| CheckResult::new("Form", Level::Warn, issue.to_string()))
        .collect()
}

fn check_action(action: &SubmissionAction) -> Vec<CheckResult> {
    let label = format!("Action '{}'", action.label());
    let mut checks = Vec::new();

    if let Some(expr) = action.condition.as_deref().filter(|c| !c.trim().is_empty()) {
        if let Err(e) = Condition::parse(expr) {
            checks.push(CheckResult::new(&label, Level::Error, e.to_string()));
        }
    }

    let endpoint_error = |target: &HttpTarget| {
        (!target.url.starts_with("http://") && !target.url.starts_with("https://"))
            .then(|| format!("endpoint '{}' is not an http(s) URL", target.url))
    };
    let problem = match &action.target {
        ActionTarget::Webhook { endpoint, .. }
        | ActionTarget::Spreadsheet { endpoint, .. }
        | ActionTarget::Chat { endpoint, .. } => endpoint_error(endpoint),
        ActionTarget::Email { to, relay, .. } => {
            if to.is_empty() {
                Some("no recipients".to_string())
            } else {
                relay.as_ref().and_then(endpoint_error)
            }
        }
        ActionTarget::Custom { endpoint, .. } => endpoint.as_ref().and_then(endpoint_error),
    };
    if let Some(problem) = problem {
        checks.push(CheckResult::new(&label, Level::Error, problem));
    }

    if !action.enabled {
        checks.push(CheckResult::new(&label, Level::Warn, "disabled"));
    } else if checks.is_empty() {
        checks.push(CheckResult::new(&label, Level::Ok, action.kind().to_string()));
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use formflow_core::types::{Field, FieldKind};

    #[test]
    fn test_reports_broken_condition_and_url() {
        let action = SubmissionAction::new("crm", ActionTarget::webhook("ftp://nope"))
            .with_condition("plan ==");
        let checks = check_action(&action);
        assert_eq!(checks.iter().filter(|c| c.level == Level::Error).count(), 2);
    }

    #[test]
    fn test_clean_config() {
        let mut config = AppConfig::default();
        config.form.fields = vec![
            Field::new("a", FieldKind::Text),
            Field::new("b", FieldKind::Text),
        ];
        config.submission.actions =
            vec![SubmissionAction::new("crm", ActionTarget::webhook("https://example.com"))];
        let checks = collect(&config);
        assert!(checks.iter().all(|c| c.level == Level::Ok));
    }

    #[test]
    fn test_empty_form_is_error() {
        let checks = collect(&AppConfig::default());
        assert_eq!(checks[0].level, Level::Error);
    }
}
