use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::types::{Command, CommandResult};

/// Where the session owner is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Running,
    Stopped,
}

/// State the owner publishes for readers that must not touch the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub lifecycle: Lifecycle,
    pub current_url: String,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            current_url: String::new(),
        }
    }
}

/// A message to the session owner. Every request carries its own reply slot,
/// so a result can only ever reach the caller that submitted the command.
pub(crate) enum Request {
    Run {
        command: Command,
        reply: oneshot::Sender<CommandResult>,
    },
    Shutdown {
        reply: oneshot::Sender<CommandResult>,
    },
}

/// Owner side of the channel: the request queue plus the status publisher.
pub struct CommandInbox {
    pub(crate) requests: mpsc::UnboundedReceiver<Request>,
    pub(crate) status: watch::Sender<SessionStatus>,
}

/// Cloneable submitter. All browser access goes through [`SessionHandle::submit`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<SessionStatus>,
}

/// Create a connected handle/inbox pair.
pub fn command_channel() -> (SessionHandle, CommandInbox) {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());
    (
        SessionHandle {
            requests: requests_tx,
            status: status_rx,
        },
        CommandInbox {
            requests: requests_rx,
            status: status_tx,
        },
    )
}

impl SessionHandle {
    /// Queue `command` and wait for its result.
    pub async fn submit(&self, command: Command) -> CommandResult {
        let action = command.name();
        let (reply, result) = oneshot::channel();
        if self.requests.send(Request::Run { command, reply }).is_err() {
            return CommandResult::failure(action, "session owner is not running");
        }
        result
            .await
            .unwrap_or_else(|_| CommandResult::failure(action, "session owner stopped before answering"))
    }

    /// Submit a command given by name, e.g. from a script or a debugging prompt.
    pub async fn submit_raw(&self, action: &str, params: &Value) -> CommandResult {
        if action == "shutdown" {
            return self.shutdown().await;
        }
        match Command::from_parts(action, params) {
            Ok(command) => self.submit(command).await,
            Err(e) => CommandResult::failure(action, e.to_string()),
        }
    }

    /// Ask the owner to release the browser and exit. Commands queued after
    /// this one are answered with an error.
    pub async fn shutdown(&self) -> CommandResult {
        let (reply, result) = oneshot::channel();
        if self.requests.send(Request::Shutdown { reply }).is_err() {
            return CommandResult::success("shutdown", None);
        }
        result
            .await
            .unwrap_or_else(|_| CommandResult::success("shutdown", None))
    }

    /// URL recorded after the most recent navigation (empty before launch).
    pub fn current_url(&self) -> String {
        self.status.borrow().current_url.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.status.borrow().lifecycle
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn submit_without_owner_reports_error() {
        let (handle, inbox) = command_channel();
        drop(inbox);

        let result = handle.submit(Command::GetFullPageHtml).await;

        assert!(!result.is_success());
        assert_eq!(result.action, "get_full_page_html");
        assert_eq!(result.error_message(), "session owner is not running");
    }

    #[tokio::test]
    async fn unknown_raw_action_never_reaches_the_owner() {
        let (handle, mut inbox) = command_channel();

        let result = handle.submit_raw("teleport", &json!({})).await;

        assert_eq!(result.error.as_deref(), Some("Unknown action: teleport"));
        assert!(inbox.requests.try_recv().is_err());
    }

    #[test]
    fn status_starts_uninitialized() {
        let (handle, _inbox) = command_channel();
        assert_eq!(handle.lifecycle(), Lifecycle::Uninitialized);
        assert_eq!(handle.current_url(), "");
    }
}
