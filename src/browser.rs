use crate::TrackerError;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use std::ffi::{OsStr, OsString};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One page load: where to go, what to wait for and how long to let it settle.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub url: &'a str,
    pub ready_selector: Option<&'a str>,
    /// Scrolls to the bottom up to this many times, stopping once the height is stable.
    pub scrolls: usize,
    pub settle: Duration,
}

#[async_trait::async_trait]
pub trait PageRenderer: Send + Sync {
    /// Loads `req.url` and returns the rendered document.
    async fn render(&self, req: &RenderRequest<'_>) -> Result<String, TrackerError>;

    /// Types `query` into the search box on `req.url`, submits it and returns the results page.
    async fn search_input(
        &self,
        _req: &RenderRequest<'_>,
        _input_selector: &str,
        _query: &str,
    ) -> Result<String, TrackerError> {
        Err(TrackerError::Unsupported("typed search needs a browser"))
    }
}

fn browser_error(e: impl Display) -> TrackerError {
    TrackerError::BrowserError(e.to_string())
}

/// Headless Chrome session. The browser process lives exactly as long as this value.
pub struct ChromeRenderer {
    tab: Arc<Tab>,
    _browser: Browser,
}

impl ChromeRenderer {
    pub fn launch(user_agent: &str, wait_timeout: Duration) -> Result<Self, TrackerError> {
        let user_agent = OsString::from(format!("--user-agent={}", user_agent));
        let options = LaunchOptionsBuilder::default()
            .headless(true)
            .sandbox(false)
            .window_size(Some((1920, 1080)))
            .args(vec![
                user_agent.as_os_str(),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
            ])
            .build()
            .map_err(browser_error)?;

        let browser = Browser::new(options).map_err(browser_error)?;
        let tab = browser.new_tab().map_err(browser_error)?;
        tab.set_default_timeout(wait_timeout);
        info!("Browser session started");

        Ok(Self {
            tab,
            _browser: browser,
        })
    }
}

impl Drop for ChromeRenderer {
    fn drop(&mut self) {
        info!("Browser session closed");
    }
}

fn page_height(tab: &Tab) -> Result<u64, TrackerError> {
    let height = tab
        .evaluate("document.body.scrollHeight", false)
        .map_err(browser_error)?;
    Ok(height.value.and_then(|v| v.as_u64()).unwrap_or(0))
}

fn scroll_to_end(tab: &Tab, max_scrolls: usize, pause: Duration) -> Result<(), TrackerError> {
    let mut last = page_height(tab)?;
    for _ in 0..max_scrolls {
        tab.evaluate("window.scrollTo(0, document.body.scrollHeight)", false)
            .map_err(browser_error)?;
        std::thread::sleep(pause);
        let height = page_height(tab)?;
        if height == last {
            break;
        }
        last = height;
    }
    Ok(())
}

fn settle(
    tab: &Tab,
    ready_selector: Option<&str>,
    scrolls: usize,
    pause: Duration,
) -> Result<String, TrackerError> {
    if let Some(selector) = ready_selector {
        tab.wait_for_element(selector).map_err(browser_error)?;
    }
    std::thread::sleep(pause);
    if scrolls > 0 {
        scroll_to_end(tab, scrolls, pause)?;
    }
    tab.get_content().map_err(browser_error)
}

fn navigate(tab: &Tab, url: &str) -> Result<(), TrackerError> {
    tab.navigate_to(url)
        .map_err(browser_error)?
        .wait_until_navigated()
        .map_err(browser_error)?;
    Ok(())
}

struct OwnedRequest {
    url: String,
    ready_selector: Option<String>,
    scrolls: usize,
    settle: Duration,
}

impl From<&RenderRequest<'_>> for OwnedRequest {
    fn from(req: &RenderRequest<'_>) -> Self {
        Self {
            url: req.url.to_string(),
            ready_selector: req.ready_selector.map(ToString::to_string),
            scrolls: req.scrolls,
            settle: req.settle,
        }
    }
}

#[async_trait::async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, req: &RenderRequest<'_>) -> Result<String, TrackerError> {
        let tab = Arc::clone(&self.tab);
        let req = OwnedRequest::from(req);
        debug!("Visit {}", req.url);

        tokio::task::spawn_blocking(move || {
            navigate(&tab, &req.url)?;
            settle(&tab, req.ready_selector.as_deref(), req.scrolls, req.settle)
        })
        .await?
    }

    async fn search_input(
        &self,
        req: &RenderRequest<'_>,
        input_selector: &str,
        query: &str,
    ) -> Result<String, TrackerError> {
        let tab = Arc::clone(&self.tab);
        let req = OwnedRequest::from(req);
        let input_selector = input_selector.to_string();
        let query = query.to_string();
        debug!("Search {} on {}", query, req.url);

        tokio::task::spawn_blocking(move || {
            navigate(&tab, &req.url)?;
            tab.wait_for_element(&input_selector)
                .map_err(browser_error)?
                .click()
                .map_err(browser_error)?;
            let clear = format!(
                "document.querySelector({}).value = ''",
                serde_json::to_string(&input_selector)?
            );
            tab.evaluate(&clear, false).map_err(browser_error)?;
            tab.type_str(&query)
                .map_err(browser_error)?
                .press_key("Enter")
                .map_err(browser_error)?;
            settle(&tab, req.ready_selector.as_deref(), req.scrolls, req.settle)
        })
        .await?
    }
}

/// Plain HTTP fetch for pages that render server-side.
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, req: &RenderRequest<'_>) -> Result<String, TrackerError> {
        debug!("Visit {}", req.url);
        let html = self
            .client
            .get(req.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        if !req.settle.is_zero() {
            tokio::time::sleep(req.settle).await;
        }
        Ok(html)
    }
}
