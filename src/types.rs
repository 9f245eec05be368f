use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::CommandError;

/// A single browser instruction executed by the session owner.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Goto { url: String },
    GetFullPageHtml,
    KeyboardType { text: String },
    KeyboardPress { key: String },
    GetActiveElementHtml,
    ClickActiveElement,
    ClickElement { selector: String },
    TypeInElement { selector: String, text: String },
}

impl Command {
    /// Wire name of the action, used in results and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Goto { .. } => "goto",
            Command::GetFullPageHtml => "get_full_page_html",
            Command::KeyboardType { .. } => "keyboard_type",
            Command::KeyboardPress { .. } => "keyboard_press",
            Command::GetActiveElementHtml => "get_active_element_html",
            Command::ClickActiveElement => "click_active_element",
            Command::ClickElement { .. } => "click_element",
            Command::TypeInElement { .. } => "type_in_element",
        }
    }

    /// Build a command from a string action name and a JSON params object.
    pub fn from_parts(action: &str, params: &Value) -> Result<Self, CommandError> {
        let command = match action {
            "goto" => Command::Goto {
                url: param(action, params, "url")?,
            },
            "get_full_page_html" => Command::GetFullPageHtml,
            "keyboard_type" => Command::KeyboardType {
                text: param(action, params, "text")?,
            },
            "keyboard_press" => Command::KeyboardPress {
                key: param(action, params, "key")?,
            },
            "get_active_element_html" => Command::GetActiveElementHtml,
            "click_active_element" => Command::ClickActiveElement,
            "click_element" => Command::ClickElement {
                selector: param(action, params, "selector")?,
            },
            "type_in_element" => Command::TypeInElement {
                selector: param(action, params, "selector")?,
                text: param(action, params, "text")?,
            },
            other => return Err(CommandError::UnknownAction(other.to_string())),
        };
        Ok(command)
    }
}

fn param(action: &str, params: &Value, key: &'static str) -> Result<String, CommandError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| CommandError::MissingParam {
            action: action.to_string(),
            param: key,
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Outcome of one command, paired with the action that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub action: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn success(action: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            action: action.into(),
            status: Status::Success,
            data,
            error: None,
        }
    }

    pub fn failure(action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: Status::Error,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// The payload as text, when the command returned a string (page markup, element html).
    pub fn text(&self) -> Option<&str> {
        self.data.as_ref().and_then(Value::as_str)
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

/// One step of the agent's vocabulary, as emitted by the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionStep {
    Goto { url: String },
    FindAndType { description: String, text: String },
    FindAndClick { description: String },
    Finish {
        #[serde(default)]
        reason: String,
    },
}

impl ActionStep {
    pub fn name(&self) -> &'static str {
        match self {
            ActionStep::Goto { .. } => "goto",
            ActionStep::FindAndType { .. } => "find_and_type",
            ActionStep::FindAndClick { .. } => "find_and_click",
            ActionStep::Finish { .. } => "finish",
        }
    }

    /// What the step acts on, for history entries and logs.
    pub fn target(&self) -> &str {
        match self {
            ActionStep::Goto { url } => url,
            ActionStep::FindAndType { description, .. }
            | ActionStep::FindAndClick { description } => description,
            ActionStep::Finish { reason } => reason,
        }
    }
}

/// Ordered steps generated once per goal and executed strictly in order.
pub type ActionPlan = Vec<ActionStep>;

/// Fixed-capacity log of recent step outcomes. Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct ActionHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ActionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, entry: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

pub const MAX_STEPS_PER_TASK: usize = 50;
pub const HISTORY_CAPACITY: usize = 6;
pub const SAMPLE_LIMIT: usize = 20;
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

pub const MAX_MODEL_RETRIES: u32 = 4;
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
pub const MODEL_REQUEST_TIMEOUT: Duration = Duration::from_secs(150);

pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const ELEMENT_TIMEOUT: Duration = Duration::from_secs(15);

pub const PLAN_STEP_PAUSE: Duration = Duration::from_secs(2);
pub const REACTIVE_STEP_PAUSE: Duration = Duration::from_secs(4);
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_evicts_oldest_first() {
        let mut history = ActionHistory::new(3);
        for i in 0..5 {
            history.record(format!("step {i}"));
        }
        let entries: Vec<&str> = history.iter().collect();
        assert_eq!(entries, vec!["step 2", "step 3", "step 4"]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn command_from_parts_reads_params() {
        let cmd = Command::from_parts(
            "type_in_element",
            &json!({"selector": "#q", "text": "rust"}),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::TypeInElement {
                selector: "#q".into(),
                text: "rust".into()
            }
        );
        assert_eq!(cmd.name(), "type_in_element");
    }

    #[test]
    fn command_from_parts_rejects_unknown_action() {
        let err = Command::from_parts("scroll_down", &json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Unknown action: scroll_down");
    }

    #[test]
    fn command_from_parts_reports_missing_param() {
        let err = Command::from_parts("goto", &json!({"href": "x"})).unwrap_err();
        assert_eq!(err.to_string(), "goto failed: missing parameter 'url'");
    }

    #[test]
    fn action_step_rejects_unknown_tag_and_missing_fields() {
        let unknown = serde_json::from_value::<ActionStep>(json!({"action": "scroll"}));
        assert!(unknown.is_err());

        let missing = serde_json::from_value::<ActionStep>(json!({"action": "find_and_type", "description": "box"}));
        assert!(missing.is_err());

        let finish: ActionStep = serde_json::from_value(json!({"action": "finish"})).unwrap();
        assert_eq!(finish, ActionStep::Finish { reason: String::new() });
    }

    #[test]
    fn failed_result_omits_data() {
        let result = CommandResult::failure("goto", "goto failed: timeout");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"action": "goto", "status": "error", "error": "goto failed: timeout"})
        );
    }
}
