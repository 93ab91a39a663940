//! Browser automation sessions.
//!
//! A [`Session`] navigates to a URL and hands back rendered markup. The pool
//! only sees the traits; [`BrowserFactory`] is the chromiumoxide backend.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CrawlConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("{url} not ready after {waited:?}")]
    Timeout { url: String, waited: Duration },
    #[error("failed to read page content: {0}")]
    Content(String),
}

#[async_trait]
pub trait Session: Send + Sized + 'static {
    /// Navigate and wait (bounded) until the page is ready; returns the markup.
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError>;

    /// Cheap liveness probe used when the session is returned to the pool.
    async fn is_alive(&mut self) -> bool;

    async fn close(self);
}

#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    async fn create(&self) -> Result<Self::Session, FetchError>;
}

// ── chromiumoxide backend ──

#[derive(Debug, Clone)]
pub struct BrowserFactory {
    chrome_executable: Option<PathBuf>,
    user_agent: String,
    ready_selector: String,
    timeout: Duration,
}

impl BrowserFactory {
    pub fn new(config: &CrawlConfig) -> Self {
        Self {
            chrome_executable: config.chrome_executable.clone(),
            user_agent: config.user_agent.clone(),
            ready_selector: config.ready_selector.clone(),
            timeout: config.page_timeout(),
        }
    }
}

#[async_trait]
impl SessionFactory for BrowserFactory {
    type Session = BrowserSession;

    async fn create(&self) -> Result<BrowserSession, FetchError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-webgl")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--mute-audio")
            .arg("--log-level=3")
            .arg("--disable-logging")
            .arg("--silent")
            .arg(format!("--user-agent={}", self.user_agent));
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(FetchError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Launch(e.to_string()))?;

        // The handler drives the CDP connection and must be polled for the browser to work.
        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(FetchError::Launch(e.to_string()));
            }
        };

        debug!("browser session started");
        Ok(BrowserSession {
            browser,
            page,
            handler,
            ready_selector: self.ready_selector.clone(),
            timeout: self.timeout,
        })
    }
}

/// One headless Chrome with a single reusable tab.
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    handler: tokio::task::JoinHandle<()>,
    ready_selector: String,
    timeout: Duration,
}

async fn navigate_until_ready(page: &Page, ready_selector: &str, url: &str) -> Result<(), FetchError> {
    page.goto(url).await.map_err(|e| FetchError::Navigation {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    while page.find_element(ready_selector).await.is_err() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(())
}

#[async_trait]
impl Session for BrowserSession {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let ready = navigate_until_ready(&self.page, &self.ready_selector, url);
        tokio::time::timeout(self.timeout, ready)
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                waited: self.timeout,
            })??;

        self.page
            .content()
            .await
            .map_err(|e| FetchError::Content(e.to_string()))
    }

    async fn is_alive(&mut self) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, self.page.get_title()).await,
            Ok(Ok(_))
        )
    }

    async fn close(mut self) {
        let exited = match self.browser.close().await {
            Ok(_) => matches!(
                tokio::time::timeout(EXIT_TIMEOUT, self.browser.wait()).await,
                Ok(Ok(_))
            ),
            Err(e) => {
                warn!("browser close failed: {}", e);
                false
            }
        };
        if !exited {
            warn!("killing browser process");
            if let Some(Err(e)) = self.browser.kill().await {
                warn!("failed to kill browser: {}", e);
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
