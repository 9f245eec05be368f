use anyhow::{Result, bail};
use serde_json::{Value, json};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::{CommandInbox, Lifecycle, Request, SessionHandle, SessionStatus, command_channel};
use crate::hands::{AutomationEngine, BrowserSession};
use crate::types::{Command, CommandResult, ELEMENT_TIMEOUT, NAVIGATION_TIMEOUT};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub navigation_timeout: Duration,
    pub element_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            headless: false,
            navigation_timeout: NAVIGATION_TIMEOUT,
            element_timeout: ELEMENT_TIMEOUT,
        }
    }
}

/// Persistent profile location, so logins survive between runs.
pub fn default_profile_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("goal-browser-agent").join("profile"))
        .unwrap_or_else(|| PathBuf::from("agent_profile"))
}

enum State<S> {
    Uninitialized,
    Running(S),
    Stopped,
}

/// Sole owner of the browser session. Runs on a dedicated thread and executes
/// one command at a time, in the order they were queued.
pub struct SessionOwner<E: AutomationEngine> {
    engine: E,
    settings: SessionSettings,
    state: State<E::Session>,
    status: watch::Sender<SessionStatus>,
}

impl<E: AutomationEngine> SessionOwner<E> {
    /// Start the owner thread. The browser itself is not launched until the
    /// first command arrives.
    pub fn spawn(engine: E, settings: SessionSettings) -> std::io::Result<(SessionHandle, JoinHandle<()>)> {
        let (handle, inbox) = command_channel();
        let thread = std::thread::Builder::new()
            .name("session-owner".into())
            .spawn(move || {
                let CommandInbox { requests, status } = inbox;
                let owner = SessionOwner {
                    engine,
                    settings,
                    state: State::Uninitialized,
                    status,
                };
                owner.run(requests);
            })?;
        Ok((handle, thread))
    }

    fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        debug!("session owner waiting for commands");
        while let Some(request) = requests.blocking_recv() {
            match request {
                Request::Run { command, reply } => {
                    let result = self.execute(&command);
                    let _ = reply.send(result);
                }
                Request::Shutdown { reply } => {
                    requests.close();
                    self.stop();
                    let _ = reply.send(CommandResult::success("shutdown", None));
                    return;
                }
            }
        }
        // every handle is gone
        self.stop();
    }

    /// Run one command inside a failure boundary: engine errors and panics
    /// become error results instead of ending the thread.
    fn execute(&mut self, command: &Command) -> CommandResult {
        let action = command.name();
        debug!(action, "executing command");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.try_execute(command)));
        let message = match outcome {
            Ok(Ok(data)) => return CommandResult::success(action, data),
            Ok(Err(e)) => first_line(&format!("{e:#}")),
            Err(payload) => format!("engine panicked: {}", panic_message(payload.as_ref())),
        };

        let error = format!("{action} failed: {message}");
        warn!(action, "{error}");
        CommandResult::failure(action, error)
    }

    fn try_execute(&mut self, command: &Command) -> Result<Option<Value>> {
        let navigation_timeout = self.settings.navigation_timeout;
        let element_timeout = self.settings.element_timeout;

        let session = self.session()?;
        let data = match command {
            Command::Goto { url } => {
                session.navigate(url, navigation_timeout)?;
                None
            }
            Command::GetFullPageHtml => Some(Value::String(session.read_markup()?)),
            Command::KeyboardType { text } => {
                session.keyboard_type(text)?;
                None
            }
            Command::KeyboardPress { key } => {
                session.keyboard_press(key)?;
                None
            }
            Command::GetActiveElementHtml => Some(Value::String(session.active_element_markup()?)),
            Command::ClickActiveElement => {
                session.click_active_element()?;
                None
            }
            Command::ClickElement { selector } => {
                session.click(selector, element_timeout)?;
                None
            }
            Command::TypeInElement { selector, text } => {
                session.fill(selector, text, element_timeout)?;
                None
            }
        };

        // clicks and key presses can navigate too
        let current = session.current_url();
        let data = match command {
            Command::Goto { .. } => {
                info!(url = %current, "navigation complete");
                Some(json!({ "url": current }))
            }
            _ => data,
        };
        self.publish(Lifecycle::Running, Some(current));
        Ok(data)
    }

    fn session(&mut self) -> Result<&mut E::Session> {
        if matches!(self.state, State::Uninitialized) {
            info!(profile = %self.settings.profile_dir.display(), "launching browser session");
            let session = self
                .engine
                .open_persistent_session(&self.settings.profile_dir, self.settings.headless)?;
            let url = session.current_url();
            self.state = State::Running(session);
            self.publish(Lifecycle::Running, Some(url));
            info!("browser is now running");
        }
        match &mut self.state {
            State::Running(session) => Ok(session),
            State::Stopped => bail!("browser session has been shut down"),
            State::Uninitialized => bail!("browser session is not running"),
        }
    }

    fn stop(&mut self) {
        if let State::Running(mut session) = std::mem::replace(&mut self.state, State::Stopped) {
            if let Err(e) = session.close() {
                warn!("closing the browser failed: {e:#}");
            }
            drop(session);
            info!("browser session closed");
        }
        self.publish(Lifecycle::Stopped, None);
    }

    fn publish(&self, lifecycle: Lifecycle, url: Option<String>) {
        self.status.send_modify(|status| {
            status.lifecycle = lifecycle;
            if let Some(url) = url {
                status.current_url = url;
            }
        });
    }
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
