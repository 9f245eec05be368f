use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

use crate::brain::{self, ElementKind, LanguageModel};
use crate::channel::SessionHandle;
use crate::dom::{self, PageSummary};
use crate::error::ModelError;
use crate::snapshot::SnapshotSink;
use crate::types::{
    ActionHistory, ActionPlan, ActionStep, CONFIDENCE_THRESHOLD, Command, CommandResult, HISTORY_CAPACITY,
    MAX_STEPS_PER_TASK, PLAN_STEP_PAUSE, REACTIVE_STEP_PAUSE,
};

/// How a natural-language element description is turned into a browser action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ElementStrategy {
    /// Ask the model for a selector and act on that element.
    Selector,
    /// Have the model classify the page's controls, then act on the focused element.
    Classify,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_steps: usize,
    pub history_capacity: usize,
    pub confidence_threshold: f64,
    pub plan_step_pause: Duration,
    pub reactive_step_pause: Duration,
    pub strategy: ElementStrategy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: MAX_STEPS_PER_TASK,
            history_capacity: HISTORY_CAPACITY,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            plan_step_pause: PLAN_STEP_PAUSE,
            reactive_step_pause: REACTIVE_STEP_PAUSE,
            strategy: ElementStrategy::Selector,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
    Finished(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Every plan step ran, or the model emitted `finish`.
    Completed {
        steps: usize,
        elapsed: Duration,
        reason: Option<String>,
    },
    /// A plan step failed; `index` is zero-based.
    StepFailed {
        index: usize,
        action: &'static str,
        reason: String,
    },
    StepLimit { steps: usize },
    /// The model produced no usable step.
    Aborted { steps: usize, reason: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
enum Interaction<'a> {
    Click,
    Type(&'a str),
}

impl Interaction<'_> {
    fn element_kind(self) -> ElementKind {
        match self {
            Interaction::Click => ElementKind::ClickableButton,
            Interaction::Type(_) => ElementKind::TextInput,
        }
    }
}

/// Closed-loop controller: asks the model what to do, does it through the
/// session owner, and feeds the resulting page back into the next request.
pub struct Agent {
    model: Box<dyn LanguageModel>,
    session: SessionHandle,
    settings: AgentSettings,
    snapshots: Option<SnapshotSink>,
}

impl Agent {
    pub fn new(model: Box<dyn LanguageModel>, session: SessionHandle, settings: AgentSettings) -> Self {
        Self {
            model,
            session,
            settings,
            snapshots: None,
        }
    }

    /// Save the page context observed after every reactive step.
    pub fn with_snapshots(mut self, sink: SnapshotSink) -> Self {
        self.snapshots = Some(sink);
        self
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub async fn plan(&self, goal: &str) -> Result<ActionPlan, ModelError> {
        brain::request_plan(self.model.as_ref(), goal).await
    }

    /// Generate a plan for `goal` and execute it without confirmation.
    pub async fn run_plan(&self, goal: &str) -> TaskOutcome {
        match self.plan(goal).await {
            Ok(plan) => self.execute_plan(&plan).await,
            Err(e) => {
                warn!("could not generate a valid action plan: {e}");
                TaskOutcome::Aborted {
                    steps: 0,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Run plan steps in order, stopping at the first failure.
    pub async fn execute_plan(&self, plan: &[ActionStep]) -> TaskOutcome {
        let started = Instant::now();

        for (index, step) in plan.iter().enumerate() {
            info!(step = index + 1, total = plan.len(), action = step.name(), subject = step.target(), "executing plan step");
            match self.execute_step(step).await {
                StepOutcome::Succeeded => info!(step = index + 1, "step completed"),
                StepOutcome::Finished(reason) => {
                    return TaskOutcome::Completed {
                        steps: index + 1,
                        elapsed: started.elapsed(),
                        reason: Some(reason),
                    };
                }
                StepOutcome::Failed(reason) => {
                    warn!(step = index + 1, action = step.name(), "step failed: {reason}");
                    return TaskOutcome::StepFailed {
                        index,
                        action: step.name(),
                        reason,
                    };
                }
            }
            pause(self.settings.plan_step_pause).await;
        }

        TaskOutcome::Completed {
            steps: plan.len(),
            elapsed: started.elapsed(),
            reason: None,
        }
    }

    /// Ask for one step at a time until the model finishes, produces nothing
    /// usable, or the step ceiling is reached.
    pub async fn run_reactive(&self, goal: &str) -> TaskOutcome {
        let started = Instant::now();
        let mut history = ActionHistory::new(self.settings.history_capacity);
        let mut context = self.observe().await;

        for step_number in 1..=self.settings.max_steps {
            info!(step = step_number, max = self.settings.max_steps, "asking the model for the next step");
            let step = match brain::request_next_step(self.model.as_ref(), goal, context.as_ref(), &history).await {
                Ok(step) => step,
                Err(e) => {
                    warn!("model failed to provide a valid action, aborting task: {e}");
                    return TaskOutcome::Aborted {
                        steps: step_number - 1,
                        reason: e.to_string(),
                    };
                }
            };

            match self.execute_step(&step).await {
                StepOutcome::Finished(reason) => {
                    return TaskOutcome::Completed {
                        steps: step_number,
                        elapsed: started.elapsed(),
                        reason: Some(reason),
                    };
                }
                StepOutcome::Succeeded => {
                    info!(step = step_number, "step completed");
                    history.record(format!("Action '{}' on '{}' succeeded.", step.name(), step.target()));
                }
                StepOutcome::Failed(reason) => {
                    warn!(step = step_number, "step failed, the model will re-evaluate: {reason}");
                    history.record(format!(
                        "Action '{}' on '{}' failed ({reason}). Must try something else.",
                        step.name(),
                        step.target()
                    ));
                }
            }

            pause(self.settings.reactive_step_pause).await;
            context = self.observe().await;
        }

        warn!(max = self.settings.max_steps, "reached the step limit, aborting task");
        TaskOutcome::StepLimit {
            steps: self.settings.max_steps,
        }
    }

    pub async fn execute_step(&self, step: &ActionStep) -> StepOutcome {
        match step {
            ActionStep::Goto { url } => self.goto(url).await,
            ActionStep::FindAndType { description, text } => {
                self.find_and_interact(description, Interaction::Type(text)).await
            }
            ActionStep::FindAndClick { description } => self.find_and_interact(description, Interaction::Click).await,
            ActionStep::Finish { reason } => {
                info!(%reason, "model finished the task");
                StepOutcome::Finished(reason.clone())
            }
        }
    }

    async fn goto(&self, url: &str) -> StepOutcome {
        if url.trim().is_empty() {
            return StepOutcome::Failed("goto is missing a URL".into());
        }
        if let Some(domain) = same_site(&self.session.current_url(), url) {
            warn!(%url, "loop detected, refusing to open the same site again");
            return StepOutcome::Failed(format!("already on {domain}, navigation refused"));
        }
        outcome_of(self.session.submit(Command::Goto { url: url.to_string() }).await)
    }

    async fn find_and_interact(&self, description: &str, interaction: Interaction<'_>) -> StepOutcome {
        if description.trim().is_empty() {
            return StepOutcome::Failed("missing element description".into());
        }
        match self.settings.strategy {
            ElementStrategy::Selector => self.interact_by_selector(description, interaction).await,
            ElementStrategy::Classify => self.interact_by_classification(description, interaction).await,
        }
    }

    async fn interact_by_selector(&self, description: &str, interaction: Interaction<'_>) -> StepOutcome {
        let selector = match brain::request_selector(self.model.as_ref(), description).await {
            Ok(selector) => selector,
            Err(e) => return StepOutcome::Failed(format!("no selector for '{description}': {e}")),
        };
        let command = match interaction {
            Interaction::Click => Command::ClickElement { selector },
            Interaction::Type(text) => Command::TypeInElement {
                selector,
                text: text.to_string(),
            },
        };
        outcome_of(self.session.submit(command).await)
    }

    async fn interact_by_classification(&self, description: &str, interaction: Interaction<'_>) -> StepOutcome {
        let page = self.session.submit(Command::GetFullPageHtml).await;
        if !page.is_success() {
            return StepOutcome::Failed(format!("could not read the page: {}", page.error_message()));
        }
        let elements = dom::classify(page.text());
        if elements.is_empty() {
            return StepOutcome::Failed("no interactive elements found on the page".into());
        }

        let verdict = brain::request_classification(self.model.as_ref(), &elements, description).await;
        info!(
            classification = verdict.kind.as_str(),
            confidence = verdict.confidence,
            reason = %verdict.reason,
            "model classified the target"
        );
        if !verdict.confirms(interaction.element_kind(), self.settings.confidence_threshold) {
            return StepOutcome::Failed(format!(
                "target not confirmed by model ({} at {:.2})",
                verdict.kind.as_str(),
                verdict.confidence
            ));
        }

        let command = match interaction {
            Interaction::Click => Command::ClickActiveElement,
            Interaction::Type(text) => Command::KeyboardType { text: text.to_string() },
        };
        outcome_of(self.session.submit(command).await)
    }

    /// Read the page and reduce it to prompt context. `None` for a blank or unreadable page.
    async fn observe(&self) -> Option<PageSummary> {
        let result = self.session.submit(Command::GetFullPageHtml).await;
        if !result.is_success() {
            warn!("could not read page state: {}", result.error_message());
            return None;
        }
        let summary = dom::summarize(result.text());
        if summary.is_empty() {
            return None;
        }
        if let Some(sink) = &self.snapshots {
            sink.write("context", &summary);
        }
        Some(summary)
    }
}

/// The host both URLs share, if any. Unparseable or host-less URLs never match.
pub fn same_site(current: &str, destination: &str) -> Option<String> {
    let current = Url::parse(current).ok()?;
    let destination = Url::parse(destination).ok()?;
    let host = current.host_str()?;
    destination
        .host_str()
        .filter(|other| other.eq_ignore_ascii_case(host))
        .map(String::from)
}

fn outcome_of(result: CommandResult) -> StepOutcome {
    if result.is_success() {
        StepOutcome::Succeeded
    } else {
        StepOutcome::Failed(result.error_message().to_string())
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_host_is_a_loop() {
        assert_eq!(
            same_site("https://a.example.com/y", "https://a.example.com/x").as_deref(),
            Some("a.example.com")
        );
        assert_eq!(
            same_site("https://A.Example.com/", "http://a.example.com/login").as_deref(),
            Some("a.example.com")
        );
    }

    #[test]
    fn different_host_is_allowed() {
        assert_eq!(same_site("https://a.example.com/y", "https://b.example.com"), None);
        assert_eq!(same_site("https://example.com", "https://www.example.com"), None);
    }

    #[test]
    fn malformed_urls_never_block() {
        assert_eq!(same_site("", "https://example.com"), None);
        assert_eq!(same_site("about:blank", "https://example.com"), None);
        assert_eq!(same_site("https://example.com", "example.com/path"), None);
        assert_eq!(same_site("not a url", "also not"), None);
    }

    #[test]
    fn task_outcome_success() {
        let done = TaskOutcome::Completed {
            steps: 2,
            elapsed: Duration::from_secs(1),
            reason: None,
        };
        assert!(done.is_success());
        assert!(!TaskOutcome::StepLimit { steps: 50 }.is_success());
    }
}
