use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::dom::{InteractiveElements, PageSummary};
use crate::error::{GatewayError, ModelError};
use crate::parse::{self, JsonShape};
use crate::prompts;
use crate::types::{
    ActionHistory, ActionPlan, ActionStep, INITIAL_BACKOFF, MAX_MODEL_RETRIES, MODEL_REQUEST_TIMEOUT,
};

pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o";

/// Request/response format spoken by the model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Dialect {
    /// `messages` in, `choices[0].message.content` out.
    Chat,
    /// `prompt` in, `choices[0].text` out.
    Completion,
}

impl Dialect {
    fn request_body(self, settings: &GatewaySettings, prompt: &str) -> Value {
        let mut body = json!({
            "model": settings.model,
            "temperature": settings.temperature,
            "max_tokens": settings.max_tokens,
            "stream": false,
        });
        match self {
            Dialect::Chat => body["messages"] = json!([{"role": "user", "content": prompt}]),
            Dialect::Completion => body["prompt"] = json!(prompt),
        }
        body
    }

    fn response_text(self, payload: &Value) -> Option<String> {
        let choice = payload.get("choices")?.get(0)?;
        let text = match self {
            Dialect::Chat => choice.get("message")?.get("content")?.as_str()?,
            Dialect::Completion => choice.get("text")?.as_str()?,
        };
        Some(text.trim().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dialect: Dialect,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            dialect: Dialect::Chat,
            temperature: 0.0,
            max_tokens: 1024,
            max_retries: MAX_MODEL_RETRIES,
            initial_backoff: INITIAL_BACKOFF,
            request_timeout: MODEL_REQUEST_TIMEOUT,
        }
    }
}

/// Anything that turns a prompt into generated text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// `None` when the call could not be completed at all; `Some("")` when
    /// the model answered with nothing.
    async fn complete(&self, prompt: &str) -> Option<String>;
}

/// Doubling wait sequence used between throttled attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration) -> Self {
        Self { next: initial }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2);
        delay
    }
}

/// HTTP client for an OpenAI-compatible completion endpoint.
pub struct ModelGateway {
    client: Client,
    settings: GatewaySettings,
}

impl ModelGateway {
    pub fn new(settings: GatewaySettings) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    async fn send_once(&self, body: &Value) -> Result<String, GatewayError> {
        let mut request = self.client.post(&self.settings.endpoint).json(body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
            return Err(GatewayError::Throttled(status));
        }

        let text = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Http {
                status,
                body: text.chars().take(500).collect(),
            });
        }

        let payload: Value = serde_json::from_str(&text).map_err(GatewayError::Body)?;
        match self.settings.dialect.response_text(&payload) {
            Some(content) => Ok(content),
            None => {
                warn!("model response has no choices: {}", payload);
                Ok(String::new())
            }
        }
    }
}

#[async_trait]
impl LanguageModel for ModelGateway {
    async fn complete(&self, prompt: &str) -> Option<String> {
        let body = self.settings.dialect.request_body(&self.settings, prompt);
        let attempts = self.settings.max_retries.max(1);
        let mut backoff = Backoff::new(self.settings.initial_backoff);

        for attempt in 1..=attempts {
            match self.send_once(&body).await {
                Ok(content) => {
                    debug!(attempt, chars = content.len(), "model replied");
                    return Some(content);
                }
                Err(e) if e.is_transient() => {
                    if attempt == attempts {
                        warn!(attempt, max = attempts, "{e}");
                        break;
                    }
                    let wait = backoff.next_delay();
                    warn!(
                        attempt,
                        max = attempts,
                        wait_secs = wait.as_secs_f64(),
                        "{e}, backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    error!(attempt, "model call failed: {e}");
                    return None;
                }
            }
        }

        error!("no response from the model after {attempts} attempts");
        None
    }
}

/// Kind of control the model believes a description refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    TextInput,
    ClickableButton,
    Ignore,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::TextInput => "TEXT_INPUT",
            ElementKind::ClickableButton => "CLICKABLE_BUTTON",
            ElementKind::Ignore => "IGNORE",
        }
    }

    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "TEXT_INPUT" => ElementKind::TextInput,
            "CLICKABLE_BUTTON" => ElementKind::ClickableButton,
            _ => ElementKind::Ignore,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: ElementKind,
    pub reason: String,
    pub confidence: f64,
}

impl Classification {
    fn ignored(reason: impl Into<String>) -> Self {
        Self {
            kind: ElementKind::Ignore,
            reason: reason.into(),
            confidence: 0.0,
        }
    }

    /// Read a classification object, defaulting every missing field.
    pub fn from_value(value: &Value) -> Self {
        let kind = value
            .get("classification")
            .and_then(Value::as_str)
            .map(ElementKind::from_label)
            .unwrap_or(ElementKind::Ignore);
        let reason = value
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("No reason.")
            .to_string();
        let confidence = value
            .get("confidence")
            .and_then(|c| c.as_f64().or_else(|| c.as_str()?.trim().parse().ok()))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        Self {
            kind,
            reason,
            confidence,
        }
    }

    /// Whether the model confirmed a target of the wanted kind with enough confidence.
    pub fn confirms(&self, wanted: ElementKind, threshold: f64) -> bool {
        self.kind == wanted && self.confidence >= threshold
    }
}

async fn ask(model: &dyn LanguageModel, prompt: &str) -> Result<String, ModelError> {
    match model.complete(prompt).await {
        None => Err(ModelError::Unavailable),
        Some(text) if text.trim().is_empty() => Err(ModelError::Declined),
        Some(text) => Ok(text),
    }
}

/// Ask for a complete plan for `goal`.
pub async fn request_plan(model: &dyn LanguageModel, goal: &str) -> Result<ActionPlan, ModelError> {
    let response = ask(model, &prompts::action_plan(goal)).await?;
    let plan: ActionPlan = parse::parse_typed(&response, JsonShape::List).inspect_err(|e| {
        warn!("could not parse action plan: {e}");
    })?;
    if plan.is_empty() {
        return Err(ModelError::Declined);
    }
    info!(steps = plan.len(), "action plan generated");
    Ok(plan)
}

/// Ask for the single next step given the current page and recent outcomes.
pub async fn request_next_step(
    model: &dyn LanguageModel,
    goal: &str,
    context: Option<&PageSummary>,
    history: &ActionHistory,
) -> Result<ActionStep, ModelError> {
    let response = ask(model, &prompts::next_step(goal, context, history)).await?;
    let step = parse::parse_typed(&response, JsonShape::Object).inspect_err(|e| {
        warn!("model did not produce a valid action: {e}");
    })?;
    Ok(step)
}

/// Ask for one selector matching a natural-language element description.
pub async fn request_selector(model: &dyn LanguageModel, description: &str) -> Result<String, ModelError> {
    let response = ask(model, &prompts::selector(description)).await?;
    let selector = parse::clean_selector(&response).ok_or(ModelError::Declined)?;
    info!(%selector, "model generated selector");
    Ok(selector)
}

/// Ask which extracted element matches `description`. Failures classify as `IGNORE`.
pub async fn request_classification(
    model: &dyn LanguageModel,
    elements: &InteractiveElements,
    description: &str,
) -> Classification {
    let response = match ask(model, &prompts::classify_element(elements, description)).await {
        Ok(response) => response,
        Err(e) => return Classification::ignored(e.to_string()),
    };
    match parse::locate_json(&response, JsonShape::Object) {
        Ok(value) => Classification::from_value(&value),
        Err(e) => {
            debug!("classification parse failed: {e}");
            Classification::ignored(format!("JSON error: {e}"))
        }
    }
}
