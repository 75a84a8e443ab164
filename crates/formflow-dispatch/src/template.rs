//! `{{field_id}}` placeholder rendering for bodies and messages.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use formflow_core::types::SubmissionPayload;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid placeholder pattern")
    })
}

/// Value substituted for `name`. `session_id` and `timestamp` are built in;
/// everything else is looked up in the answers. Unknown names render empty.
fn lookup(name: &str, payload: &SubmissionPayload) -> String {
    let name = name
        .strip_prefix("answers.")
        .or_else(|| name.strip_prefix("formData."))
        .unwrap_or(name);
    match name {
        "session_id" | "sessionId" => payload.session_id.to_string(),
        "timestamp" => payload.timestamp.to_rfc3339(),
        field => payload
            .form_data
            .get(field)
            .map(|v| v.to_string())
            .unwrap_or_default(),
    }
}

/// Render a plain-text template.
pub fn render(template: &str, payload: &SubmissionPayload) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| lookup(&caps[1], payload))
        .into_owned()
}

/// Render a template meant to produce JSON. Substituted values are escaped
/// for use inside a JSON string literal.
pub fn render_json(template: &str, payload: &SubmissionPayload) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            let value = lookup(&caps[1], payload);
            let quoted = serde_json::Value::String(value).to_string();
            quoted[1..quoted.len() - 1].to_string()
        })
        .into_owned()
}

/// Multi-line summary of a submission, one answer per line in field order.
pub fn summary(payload: &SubmissionPayload) -> String {
    let mut text = format!("New form submission ({})", payload.session_id);
    for field_id in &payload.navigation_path {
        if let Some(answer) = payload.form_data.get(field_id) {
            text.push_str(&format!("\n• {}: {}", field_id, answer));
        }
    }
    text
}
