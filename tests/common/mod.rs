#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use goal_browser_agent::agent::{AgentSettings, ElementStrategy};
use goal_browser_agent::brain::LanguageModel;
use goal_browser_agent::channel::SessionHandle;
use goal_browser_agent::hands::{AutomationEngine, BrowserSession};
use goal_browser_agent::owner::{SessionOwner, SessionSettings};

pub const PAGE: &str = r#"<html>
  <head><title>Example Domain</title></head>
  <body>
    <a href="/about">About</a>
    <input type="search" placeholder="Search the site">
    <button id="login">Login</button>
  </body>
</html>"#;

/// Everything the fake browser was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Launch,
    Navigate(String),
    ReadMarkup,
    Click(String),
    Fill(String, String),
    KeyboardType(String),
    KeyboardPress(String),
    ActiveElementMarkup,
    ClickActiveElement,
    Close,
}

impl Call {
    fn name(&self) -> &'static str {
        match self {
            Call::Launch => "launch",
            Call::Navigate(_) => "navigate",
            Call::ReadMarkup => "read_markup",
            Call::Click(_) => "click",
            Call::Fill(..) => "fill",
            Call::KeyboardType(_) => "keyboard_type",
            Call::KeyboardPress(_) => "keyboard_press",
            Call::ActiveElementMarkup => "active_element_markup",
            Call::ClickActiveElement => "click_active_element",
            Call::Close => "close",
        }
    }
}

/// How the fake browser behaves. `fail_on` and `panic_on` name a [`Call`].
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub initial_url: String,
    pub markup: String,
    pub fail_on: Option<&'static str>,
    pub panic_on: Option<&'static str>,
    pub delay: Duration,
    /// URL the page moves to after a successful click.
    pub click_leads_to: Option<String>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            initial_url: "about:blank".into(),
            markup: PAGE.into(),
            fail_on: None,
            panic_on: None,
            delay: Duration::ZERO,
            click_leads_to: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.name() == name).count()
    }

    /// Highest number of browser calls that were ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self, call: Call) -> InFlight<'_> {
        self.calls.lock().unwrap().push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

struct InFlight<'a>(&'a Recorder);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn perform<'a>(recorder: &'a Recorder, behaviour: &Behaviour, call: Call) -> Result<InFlight<'a>> {
    let name = call.name();
    let guard = recorder.enter(call);
    if !behaviour.delay.is_zero() {
        std::thread::sleep(behaviour.delay);
    }
    if behaviour.panic_on == Some(name) {
        panic!("{name} exploded");
    }
    if behaviour.fail_on == Some(name) {
        bail!("{name} exploded\n  at some internal frame");
    }
    Ok(guard)
}

pub struct FakeEngine {
    behaviour: Behaviour,
    recorder: Arc<Recorder>,
}

impl FakeEngine {
    pub fn new(behaviour: Behaviour) -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let engine = Self {
            behaviour,
            recorder: recorder.clone(),
        };
        (engine, recorder)
    }
}

impl AutomationEngine for FakeEngine {
    type Session = FakeSession;

    fn open_persistent_session(&mut self, _profile_dir: &Path, _headless: bool) -> Result<FakeSession> {
        perform(&self.recorder, &self.behaviour, Call::Launch)?;
        Ok(FakeSession {
            url: self.behaviour.initial_url.clone(),
            behaviour: self.behaviour.clone(),
            recorder: self.recorder.clone(),
        })
    }
}

pub struct FakeSession {
    url: String,
    behaviour: Behaviour,
    recorder: Arc<Recorder>,
}

impl FakeSession {
    fn perform(&self, call: Call) -> Result<InFlight<'_>> {
        perform(&self.recorder, &self.behaviour, call)
    }

    fn follow_click(&mut self) {
        if let Some(url) = &self.behaviour.click_leads_to {
            self.url = url.clone();
        }
    }
}

impl BrowserSession for FakeSession {
    fn current_url(&self) -> String {
        self.url.clone()
    }

    fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        drop(self.perform(Call::Navigate(url.to_string()))?);
        self.url = url.to_string();
        Ok(())
    }

    fn read_markup(&mut self) -> Result<String> {
        self.perform(Call::ReadMarkup)?;
        Ok(self.behaviour.markup.clone())
    }

    fn click(&mut self, selector: &str, _timeout: Duration) -> Result<()> {
        drop(self.perform(Call::Click(selector.to_string()))?);
        self.follow_click();
        Ok(())
    }

    fn fill(&mut self, selector: &str, text: &str, _timeout: Duration) -> Result<()> {
        self.perform(Call::Fill(selector.to_string(), text.to_string()))?;
        Ok(())
    }

    fn keyboard_type(&mut self, text: &str) -> Result<()> {
        self.perform(Call::KeyboardType(text.to_string()))?;
        Ok(())
    }

    fn keyboard_press(&mut self, key: &str) -> Result<()> {
        self.perform(Call::KeyboardPress(key.to_string()))?;
        Ok(())
    }

    fn active_element_markup(&mut self) -> Result<String> {
        self.perform(Call::ActiveElementMarkup)?;
        Ok(r#"<button id="login">Login</button>"#.into())
    }

    fn click_active_element(&mut self) -> Result<()> {
        drop(self.perform(Call::ClickActiveElement)?);
        self.follow_click();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.perform(Call::Close)?;
        Ok(())
    }
}

/// Start a session owner over a fake browser.
pub fn start(behaviour: Behaviour) -> (SessionHandle, JoinHandle<()>, Arc<Recorder>) {
    let (engine, recorder) = FakeEngine::new(behaviour);
    let settings = SessionSettings {
        profile_dir: std::env::temp_dir().join("goal-browser-agent-tests"),
        ..SessionSettings::default()
    };
    let (handle, thread) = SessionOwner::spawn(engine, settings).unwrap();
    (handle, thread, recorder)
}

/// Agent settings with no pauses between steps.
pub fn quick_settings() -> AgentSettings {
    AgentSettings {
        plan_step_pause: Duration::ZERO,
        reactive_step_pause: Duration::ZERO,
        ..AgentSettings::default()
    }
}

pub fn classify_settings(threshold: f64) -> AgentSettings {
    AgentSettings {
        strategy: ElementStrategy::Classify,
        confidence_threshold: threshold,
        ..quick_settings()
    }
}

/// Answers prompts from a queue, then with `fallback` once the queue is empty.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Option<String>>>,
    fallback: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Some(r.into())).collect::<VecDeque<_>>()),
            fallback: None,
            prompts: Arc::default(),
        }
    }

    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::new(Vec::<String>::new())
        }
    }

    /// A model whose calls always fail.
    pub fn unavailable() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Option<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
