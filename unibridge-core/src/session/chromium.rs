use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, SetUserAgentOverrideParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::{thread_rng, Rng};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::error::{SessionError, SessionResult};
use super::{PageElement, PageSession};

const FIND_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cookie export entry, one object per cookie in a JSON array. Matches the
/// export format produced by common cookie-dump browser extensions.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub expires: Option<f64>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Real Chromium-backed page session. One page per session; the CDP event
/// handler is drained by a spawned task for the session's lifetime.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    typing_delay_ms: [u32; 2],
}

impl ChromiumSession {
    pub async fn launch(config: &BrowserSection) -> SessionResult<Self> {
        let chromium_config = build_chromium_config(config)?;
        info!(
            headless = config.headless,
            width = config.viewport[0],
            height = config.viewport[1],
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| SessionError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        if let Some(agent) = &config.user_agent {
            let params = SetUserAgentOverrideParams::builder()
                .user_agent(agent.clone())
                .build()
                .map_err(SessionError::Configuration)?;
            page.set_user_agent(params).await?;
        }

        Ok(Self {
            browser,
            page,
            handler_task: Some(handler_task),
            typing_delay_ms: config.typing_delay_ms,
        })
    }

    /// Loads a JSON cookie export and applies it to the session. Called
    /// before the first navigation so the platform sees a logged-in state.
    pub async fn inject_cookies<P: AsRef<Path>>(&self, path: P) -> SessionResult<()> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let stored: Vec<StoredCookie> = serde_json::from_str(&raw)
            .map_err(|err| SessionError::Cookies(format!("{}: {err}", path.display())))?;

        let mut params = Vec::with_capacity(stored.len());
        for cookie in stored {
            let mut builder = CookieParam::builder()
                .name(cookie.name)
                .value(cookie.value)
                .domain(cookie.domain)
                .path(cookie.path)
                .secure(cookie.secure)
                .http_only(cookie.http_only);
            if let Some(expires) = cookie.expires {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            params.push(builder.build().map_err(SessionError::Cookies)?);
        }

        let count = params.len();
        self.page.set_cookies(params).await?;
        info!(count, path = %path.display(), "Injected session cookies");
        Ok(())
    }

    pub async fn shutdown(mut self) -> SessionResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("ChromiumSession dropped without explicit shutdown");
            }
        }
    }
}

fn build_chromium_config(config: &BrowserSection) -> SessionResult<ChromiumConfig> {
    let [width, height] = config.viewport;
    let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
        width,
        height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: width >= height,
        has_touch: false,
    });

    if let Some(path) = &config.executable_path {
        builder = builder.chrome_executable(path);
    }
    if !config.headless {
        builder = builder.with_head();
    }
    if !config.sandbox {
        builder = builder.no_sandbox();
    }

    let mut args = vec![format!("--window-size={width},{height}")];
    if let Some(agent) = &config.user_agent {
        args.push(format!("--user-agent={agent}"));
    }
    args.push("--disable-background-timer-throttling".to_string());
    args.push("--password-store=basic".to_string());
    builder = builder.args(args);

    builder.build().map_err(SessionError::Configuration)
}

#[async_trait(?Send)]
impl PageSession for ChromiumSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> SessionResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(SessionError::Configuration)?;
        let load = async {
            self.page.goto(params).await?;
            self.page.wait_for_navigation().await?;
            Ok::<(), SessionError>(())
        };
        match tokio::time::timeout(timeout, load).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(format!("navigation to {url}"))),
        }
    }

    async fn find(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> SessionResult<Option<Box<dyn PageElement>>> {
        // find_element has no built-in wait, so poll until the deadline.
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Ok(Some(Box::new(ChromiumElement {
                    element,
                    typing_delay_ms: self.typing_delay_ms,
                })));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(FIND_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn read_text(&self) -> SessionResult<String> {
        self.page
            .evaluate("document.body ? document.body.innerText : ''")
            .await?
            .into_value::<String>()
            .map_err(|err| SessionError::Unexpected(format!("failed to read page text: {err}")))
    }

    async fn current_url(&self) -> SessionResult<Option<String>> {
        Ok(self.page.url().await?)
    }
}

struct ChromiumElement {
    element: Element,
    typing_delay_ms: [u32; 2],
}

#[async_trait(?Send)]
impl PageElement for ChromiumElement {
    async fn click(&self) -> SessionResult<()> {
        self.element.click().await?;
        Ok(())
    }

    async fn fill(&self, text: &str) -> SessionResult<()> {
        // Focus first, then type character by character with a randomized
        // cadence so the input events look human-paced.
        self.element.click().await?;
        let [low, high] = self.typing_delay_ms;
        for ch in text.chars() {
            self.element.type_str(ch.to_string()).await?;
            if high > 0 {
                let millis = thread_rng().gen_range(low.min(high)..=high) as u64;
                tokio::time::sleep(Duration::from_millis(millis)).await;
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> SessionResult<()> {
        self.element.press_key(key).await?;
        Ok(())
    }

    async fn is_visible(&self) -> SessionResult<bool> {
        // A detached or display:none element has no box model.
        match self.element.bounding_box().await {
            Ok(bbox) => Ok(bbox.width > 0.0 && bbox.height > 0.0),
            Err(_) => Ok(false),
        }
    }

    async fn text(&self) -> SessionResult<String> {
        Ok(self.element.inner_text().await?.unwrap_or_default())
    }
}
