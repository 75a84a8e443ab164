use anyhow::Result;
use dialoguer::{Confirm, Input, MultiSelect, Select};

use formflow_core::types::{AnswerValue, Field, FieldKind};

/// Typed into a text prompt to go to the previous question.
const BACK_COMMAND: &str = ":back";
const BACK_ITEM: &str = "<- Back";

/// What the user did at one prompt.
pub enum Step {
    Answer(AnswerValue),
    /// Acknowledged a display-only field.
    Continue,
    Back,
}

pub fn ask(field: &Field, current: Option<&AnswerValue>, can_go_back: bool) -> Result<Step> {
    let prompt = if field.required {
        format!("{} *", field.prompt())
    } else {
        field.prompt().to_string()
    };

    match field.kind {
        FieldKind::Informational | FieldKind::ProcessStep => {
            println!("{}", field.prompt());
            let mut items = vec!["Continue"];
            if can_go_back {
                items.push(BACK_ITEM);
            }
            let choice = Select::new().items(&items).default(0).interact()?;
            Ok(if choice == 0 { Step::Continue } else { Step::Back })
        }
        FieldKind::SingleSelect | FieldKind::ChoiceList if !field.options.is_empty() => {
            let mut items: Vec<&str> = field.options.iter().map(String::as_str).collect();
            if can_go_back {
                items.push(BACK_ITEM);
            }
            let default = current
                .and_then(|c| field.options.iter().position(|o| *o == c.stringify()))
                .unwrap_or(0);
            let choice = Select::new()
                .with_prompt(prompt)
                .items(&items)
                .default(default)
                .interact()?;
            if choice >= field.options.len() {
                return Ok(Step::Back);
            }
            Ok(Step::Answer(AnswerValue::from(field.options[choice].clone())))
        }
        FieldKind::MultiSelect if !field.options.is_empty() => {
            let selected = current.map(|c| c.parts()).unwrap_or_default();
            let defaults: Vec<bool> = field
                .options
                .iter()
                .map(|o| selected.contains(o))
                .collect();
            let picked = MultiSelect::new()
                .with_prompt(format!("{} (space to toggle)", prompt))
                .items(&field.options)
                .defaults(&defaults)
                .interact()?;
            if picked.is_empty() && can_go_back && confirm("Go back to the previous question?")? {
                return Ok(Step::Back);
            }
            Ok(Step::Answer(AnswerValue::Many(
                picked.into_iter().map(|i| field.options[i].clone()).collect(),
            )))
        }
        _ => {
            let hint = if can_go_back {
                format!("{} ({} to go back)", prompt, BACK_COMMAND)
            } else {
                prompt
            };
            let text: String = Input::new()
                .with_prompt(hint)
                .with_initial_text(current.map(|c| c.to_string()).unwrap_or_default())
                .allow_empty(true)
                .interact_text()?;
            if can_go_back && text.trim() == BACK_COMMAND {
                return Ok(Step::Back);
            }
            Ok(Step::Answer(text_answer(field.kind, text)))
        }
    }
}

/// Number fields keep a numeric answer when the text parses.
fn text_answer(kind: FieldKind, text: String) -> AnswerValue {
    if kind == FieldKind::Number {
        if let Ok(n) = text.trim().parse::<f64>() {
            return AnswerValue::Number(n);
        }
    }
    AnswerValue::from(text)
}

pub fn confirm(prompt: &str) -> Result<bool> {
    Ok(Confirm::new().with_prompt(prompt).default(true).interact()?)
}
