use anyhow::{Context, Result, anyhow, bail};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Keep the DevTools connection alive while the user sits at the prompt.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Launches browser sessions. Lives on the session owner's thread.
pub trait AutomationEngine: Send + 'static {
    type Session: BrowserSession;

    fn open_persistent_session(&mut self, profile_dir: &Path, headless: bool) -> Result<Self::Session>;
}

/// One live page driven synchronously. Every call blocks until the browser
/// answers or the given timeout elapses.
pub trait BrowserSession {
    fn current_url(&self) -> String;
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;
    fn read_markup(&mut self) -> Result<String>;
    fn click(&mut self, selector: &str, timeout: Duration) -> Result<()>;
    fn fill(&mut self, selector: &str, text: &str, timeout: Duration) -> Result<()>;
    fn keyboard_type(&mut self, text: &str) -> Result<()>;
    fn keyboard_press(&mut self, key: &str) -> Result<()>;
    fn active_element_markup(&mut self) -> Result<String>;
    fn click_active_element(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Chrome over the DevTools protocol, either launched with a persistent
/// profile or attached to an already running instance.
#[derive(Debug, Clone, Default)]
pub struct ChromeEngine {
    chrome_path: Option<PathBuf>,
    connect_url: Option<String>,
}

impl ChromeEngine {
    pub fn new(chrome_path: Option<PathBuf>, connect_url: Option<String>) -> Self {
        Self {
            chrome_path,
            connect_url,
        }
    }

    fn attach(&self, ws_url: &str) -> Result<ChromeSession> {
        info!(%ws_url, "attaching to running Chrome");
        let browser = Browser::connect(ws_url.to_string())
            .with_context(|| format!("could not attach to Chrome at {ws_url}"))?;

        let existing = {
            let tabs = browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow!("Chrome tab list lock poisoned"))?;
            tabs.first().cloned()
        };
        let (tab, tab_owner) = match existing {
            Some(tab) => (tab, TabOwner::User),
            None => (browser.new_tab()?, TabOwner::Agent),
        };
        Ok(ChromeSession {
            _browser: browser,
            tab,
            tab_owner,
        })
    }
}

impl AutomationEngine for ChromeEngine {
    type Session = ChromeSession;

    fn open_persistent_session(&mut self, profile_dir: &Path, headless: bool) -> Result<ChromeSession> {
        if let Some(url) = self.connect_url.clone() {
            return self.attach(&url);
        }

        std::fs::create_dir_all(profile_dir)
            .with_context(|| format!("could not create profile directory {}", profile_dir.display()))?;

        let path = self.chrome_path.clone().or_else(find_chrome);
        if path.is_none() {
            warn!("no Chrome found in the usual locations, relying on autodetection");
        }

        let options = LaunchOptions {
            headless,
            path,
            user_data_dir: Some(profile_dir.to_path_buf()),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--start-maximized"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: BROWSER_IDLE_TIMEOUT,
            ..Default::default()
        };

        info!(profile = %profile_dir.display(), headless, "starting Chrome");
        let browser = Browser::new(options).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        Ok(ChromeSession {
            _browser: browser,
            tab,
            tab_owner: TabOwner::Agent,
        })
    }
}

/// Who opened the tab being driven. Only tabs the agent opened are closed on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TabOwner {
    Agent,
    User,
}

impl TabOwner {
    fn closes_on_shutdown(self) -> bool {
        self == TabOwner::Agent
    }
}

pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
    tab_owner: TabOwner,
}

impl ChromeSession {
    fn find(&self, selector: &str, timeout: Duration) -> Result<Element<'_>> {
        match xpath_of(selector) {
            Some(xpath) => self.tab.wait_for_xpath_with_custom_timeout(xpath, timeout),
            None => self.tab.wait_for_element_with_custom_timeout(selector, timeout),
        }
    }

    fn evaluate_string(&self, expression: &str) -> Result<String> {
        let result = self.tab.evaluate(expression, false)?;
        Ok(result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }
}

impl BrowserSession for ChromeSession {
    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    fn read_markup(&mut self) -> Result<String> {
        self.tab.get_content()
    }

    fn click(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        self.find(selector, timeout)?.click()?;
        Ok(())
    }

    fn fill(&mut self, selector: &str, text: &str, timeout: Duration) -> Result<()> {
        let element = self.find(selector, timeout)?;
        element.click()?;
        element.call_js_fn(
            "function () { if ('value' in this) { this.value = ''; } }",
            vec![],
            false,
        )?;
        element.type_into(text)?;
        Ok(())
    }

    fn keyboard_type(&mut self, text: &str) -> Result<()> {
        self.tab.type_str(text)?;
        Ok(())
    }

    fn keyboard_press(&mut self, key: &str) -> Result<()> {
        self.tab.press_key(key)?;
        Ok(())
    }

    fn active_element_markup(&mut self) -> Result<String> {
        self.evaluate_string("document.activeElement ? document.activeElement.outerHTML : ''")
    }

    fn click_active_element(&mut self) -> Result<()> {
        let clicked = self.tab.evaluate(
            r#"(() => {
                const el = document.activeElement;
                if (!el || el === document.body) return false;
                el.click();
                return true;
            })()"#,
            false,
        )?;
        if clicked.value.and_then(|v| v.as_bool()) != Some(true) {
            bail!("no focused element to click");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.tab_owner.closes_on_shutdown() {
            debug!("leaving the attached tab open");
            return Ok(());
        }
        self.tab.close(true)?;
        Ok(())
    }
}

fn xpath_of(selector: &str) -> Option<&str> {
    let selector = selector.trim();
    if let Some(xpath) = selector.strip_prefix("xpath=") {
        return Some(xpath);
    }
    (selector.starts_with("//") || selector.starts_with("(//")).then_some(selector)
}

/// Well-known Chrome install locations for the current platform.
fn find_chrome() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if cfg!(target_os = "windows") {
        candidates.push(r"C:\Program Files\Google\Chrome\Application\chrome.exe".into());
        candidates.push(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe".into());
        if let Some(local) = dirs::data_local_dir() {
            candidates.push(local.join(r"Google\Chrome\Application\chrome.exe"));
        }
    } else if cfg!(target_os = "macos") {
        candidates.push("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".into());
    } else {
        candidates.push("/usr/bin/google-chrome".into());
        candidates.push("/usr/bin/chromium".into());
        candidates.push("/usr/bin/chromium-browser".into());
    }
    candidates.into_iter().find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_selectors_are_recognised() {
        assert_eq!(xpath_of("//button[text()='Go']"), Some("//button[text()='Go']"));
        assert_eq!(xpath_of("xpath=//input"), Some("//input"));
        assert_eq!(xpath_of("(//a)[1]"), Some("(//a)[1]"));
        assert_eq!(xpath_of("button.primary"), None);
        assert_eq!(xpath_of("[aria-label=\"Search\"]"), None);
    }

    #[test]
    fn only_agent_opened_tabs_are_closed() {
        assert!(TabOwner::Agent.closes_on_shutdown());
        assert!(!TabOwner::User.closes_on_shutdown());
    }
}
