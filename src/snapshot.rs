use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Lifecycle, SessionHandle};
use crate::dom;
use crate::types::Command;

/// Best-effort writer of page contexts as pretty JSON files named by timestamp.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `value` to `<dir>/<prefix>_<timestamp>.json`. Failures are logged
    /// and reported as `None`; they never reach the caller as errors.
    pub fn write<T: Serialize>(&self, prefix: &str, value: &T) -> Option<PathBuf> {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S%.3f");
        let path = self.dir.join(format!("{prefix}_{timestamp}.json"));

        match write_json(&self.dir, &path, value) {
            Ok(()) => {
                debug!(path = %path.display(), "snapshot saved");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), "could not save snapshot: {e:#}");
                None
            }
        }
    }
}

fn write_json<T: Serialize>(dir: &Path, path: &Path, value: &T) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Periodically save the interactive elements of the current page.
///
/// Reads only through the command channel and skips ticks while the browser
/// has not been launched. Abort the returned handle to stop it.
pub fn spawn_periodic(session: SessionHandle, sink: SnapshotSink, every: Duration) -> JoinHandle<()> {
    info!(dir = %sink.dir().display(), every_secs = every.as_secs(), "periodic page snapshots enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        // first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match session.lifecycle() {
                Lifecycle::Uninitialized => continue,
                Lifecycle::Stopped => break,
                Lifecycle::Running => {}
            }
            let result = session.submit(Command::GetFullPageHtml).await;
            if !result.is_success() {
                debug!("periodic snapshot skipped: {}", result.error_message());
                continue;
            }
            let elements = dom::classify(result.text());
            sink.write("page_snapshot", &elements);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::PageSummary;

    #[test]
    fn writes_pretty_json_named_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SnapshotSink::new(dir.path().join("snapshots"));
        let summary = PageSummary {
            page_title: "مرحبا".into(),
            links_sample: vec!["Home".into()],
            buttons_sample: vec![],
        };

        let path = sink.write("context", &summary).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("context_") && name.ends_with(".json"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("\n  \"page_title\": \"مرحبا\""));
        let back: PageSummary = serde_json::from_str(&body).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn unwritable_directory_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let sink = SnapshotSink::new(blocker.join("nested"));

        assert_eq!(sink.write("context", &PageSummary::default()), None);
    }
}
