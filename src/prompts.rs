use crate::dom::{InteractiveElements, PageSummary};
use crate::types::ActionHistory;

const BLANK_PAGE: &str = "The browser is on a blank page.";
const NO_HISTORY: &str = "No actions performed yet.";

pub fn action_plan(goal: &str) -> String {
    format!(
        r#"Convert the user request into a JSON action plan for a web browser.
USER REQUEST: "{goal}"
ACTIONS:
- goto: {{"action": "goto", "url": "https://..."}}
- find_and_type: {{"action": "find_and_type", "description": "...", "text": "..."}}
- find_and_click: {{"action": "find_and_click", "description": "..."}}
- finish: {{"action": "finish", "reason": "..."}}
Your response MUST be ONLY the JSON list, with no other text.
JSON PLAN:"#
    )
}

pub fn next_step(goal: &str, context: Option<&PageSummary>, history: &ActionHistory) -> String {
    let context = match context {
        Some(summary) if !summary.is_empty() => format!(
            "Current page context:\n{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        ),
        _ => BLANK_PAGE.to_string(),
    };

    let history = if history.is_empty() {
        NO_HISTORY.to_string()
    } else {
        let lines: Vec<String> = history.iter().map(|entry| format!("- {entry}")).collect();
        format!("Recent actions:\n{}", lines.join("\n"))
    };

    format!(
        r#"You are a precise web automation agent. Decide the single next action that moves toward the objective.
OBJECTIVE: "{goal}"
RULES:
1. If the browser is already on the right website, choose 'find_and_type' or 'find_and_click'.
2. Never 'goto' the site the browser is already on.
{history}
{context}
ALLOWED ACTIONS:
- Open a page: {{"action": "goto", "url": "https://www.example.com"}}
- Type into a field: {{"action": "find_and_type", "description": "a clear description of the input", "text": "text to type"}}
- Click an element: {{"action": "find_and_click", "description": "a clear description of the button or link"}}
- Finish the task: {{"action": "finish", "reason": "why the objective is met"}}
Respond with ONLY one JSON object and nothing else.
JSON RESPONSE:"#
    )
}

pub fn selector(description: &str) -> String {
    format!(
        r#"Convert this description of a web page element into the single most precise CSS or XPath selector.
ELEMENT: "{description}"
Respond with ONLY the selector string. No explanation, no markdown. Example: [aria-label="Search"]
SELECTOR:"#
    )
}

pub fn classify_element(elements: &InteractiveElements, description: &str) -> String {
    let elements = serde_json::to_string_pretty(elements).unwrap_or_default();
    format!(
        r#"Below are the interactive elements found on a web page, as JSON.
Find the single element that best matches the description and classify it.
DESCRIPTION: "{description}"
ELEMENTS:
{elements}
Respond ONLY with a JSON object:
- "classification": "TEXT_INPUT", "CLICKABLE_BUTTON" or "IGNORE" (links and buttons are CLICKABLE_BUTTON, inputs are TEXT_INPUT)
- "reason": a short explanation
- "confidence": a number from 0.0 to 1.0
JSON RESPONSE:"#
    )
}
