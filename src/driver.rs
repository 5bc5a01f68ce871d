use async_trait::async_trait;
use fantoccini::error::{CmdError, NewSessionError};
use fantoccini::{Client, ClientBuilder};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Locator;
use crate::error::ScrapeError;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("cannot start browser session: {0}")]
    Launch(#[from] NewSessionError),
    #[error(transparent)]
    Command(#[from] CmdError),
    #[error("unexpected script result: {0}")]
    Script(String),
}

/// The browser operations the login and extraction steps rely on.
///
/// Lookups report absence as `Ok(false)`; `Err` is reserved for a broken
/// driver, so waits built on these do not spin on a dead browser.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), DriverError>;
    async fn current_url(&self) -> Result<String, DriverError>;
    async fn is_present(&self, locator: &Locator) -> Result<bool, DriverError>;
    /// Present, displayed and enabled.
    async fn is_interactable(&self, locator: &Locator) -> Result<bool, DriverError>;
    async fn click(&self, locator: &Locator) -> Result<(), DriverError>;
    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), DriverError>;
    /// Scroll `region` (the document when `None`) to its bottom and return
    /// its scroll height afterwards.
    async fn scroll_to_bottom(&self, region: Option<&str>) -> Result<u64, DriverError>;
    async fn page_source(&self) -> Result<String, DriverError>;
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;
    async fn close(&self) -> Result<(), DriverError>;
}

/// Opens a fresh browser for each fetch.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScrapeError>;
}

// ── WebDriver ──

const SCROLL_SCRIPT: &str = r#"
const el = arguments[0] ? document.querySelector(arguments[0]) : document.scrollingElement;
if (!el) { return -1; }
el.scrollTop = el.scrollHeight;
return el.scrollHeight;
"#;

/// A page in a WebDriver-controlled browser (chromedriver, geckodriver, Selenium).
pub struct WebDriverPage {
    client: Client,
}

impl WebDriverPage {
    pub fn new(client: Client) -> Self {
        WebDriverPage { client }
    }

    async fn find(&self, locator: &Locator) -> Result<Option<fantoccini::elements::Element>, DriverError> {
        let label_xpath = locator.label_xpath();
        let found = match locator {
            Locator::Css(s) => self.client.find(fantoccini::Locator::Css(s)).await,
            Locator::Id(s) => self.client.find(fantoccini::Locator::Id(s)).await,
            Locator::XPath(s) => self.client.find(fantoccini::Locator::XPath(s)).await,
            Locator::LabelText(_) => {
                let xpath = label_xpath.as_deref().unwrap_or_default();
                self.client.find(fantoccini::Locator::XPath(xpath)).await
            }
        };
        match found {
            Ok(el) => Ok(Some(el)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn require(&self, locator: &Locator) -> Result<fantoccini::elements::Element, DriverError> {
        self.find(locator)
            .await?
            .ok_or_else(|| DriverError::Script(format!("element {} disappeared", locator)))
    }
}

/// The element was never there or was replaced since it was looked up.
fn is_gone(e: &CmdError) -> bool {
    e.is_no_such_element() || e.is_stale_element_reference()
}

#[async_trait]
impl PageDriver for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        debug!("goto {}", url);
        Ok(self.client.goto(url).await?)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.client.current_url().await?.to_string())
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool, DriverError> {
        Ok(self.find(locator).await?.is_some())
    }

    async fn is_interactable(&self, locator: &Locator) -> Result<bool, DriverError> {
        let Some(el) = self.find(locator).await? else {
            return Ok(false);
        };
        // Re-rendering can swap the node out between lookup and query.
        let displayed = match el.is_displayed().await {
            Ok(v) => v,
            Err(e) if is_gone(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if !displayed {
            return Ok(false);
        }
        match el.is_enabled().await {
            Ok(v) => Ok(v),
            Err(e) if is_gone(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn click(&self, locator: &Locator) -> Result<(), DriverError> {
        Ok(self.require(locator).await?.click().await?)
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        let el = self.require(locator).await?;
        el.clear().await?;
        Ok(el.send_keys(text).await?)
    }

    async fn scroll_to_bottom(&self, region: Option<&str>) -> Result<u64, DriverError> {
        let arg = region.map(Value::from).unwrap_or(Value::Null);
        let v = self.client.execute(SCROLL_SCRIPT, vec![arg]).await?;
        match v.as_i64() {
            Some(h) if h >= 0 => Ok(h as u64),
            Some(_) => Err(DriverError::Script(format!(
                "scroll region {} not found",
                region.unwrap_or("document")
            ))),
            None => Err(DriverError::Script(v.to_string())),
        }
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        Ok(self.client.source().await?)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Ok(self.client.screenshot().await?)
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(self.client.clone().close().await?)
    }
}

/// Connects to a running WebDriver server and opens a Chrome session.
pub struct WebDriverFactory {
    webdriver_url: String,
    headless: bool,
}

impl WebDriverFactory {
    pub fn new(webdriver_url: impl Into<String>, headless: bool) -> Self {
        WebDriverFactory {
            webdriver_url: webdriver_url.into(),
            headless,
        }
    }

    fn capabilities(&self) -> serde_json::Map<String, Value> {
        let mut args = vec!["--no-sandbox", "--disable-gpu"];
        if self.headless {
            args.insert(0, "--headless");
        }
        let mut caps = serde_json::Map::new();
        caps.insert("browserName".into(), json!("chrome"));
        caps.insert("goog:chromeOptions".into(), json!({ "args": args }));
        caps
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScrapeError> {
        info!("Starting browser via {}", self.webdriver_url);
        let client = ClientBuilder::native()
            .capabilities(self.capabilities())
            .connect(&self.webdriver_url)
            .await
            .map_err(DriverError::from)?;
        Ok(Box::new(WebDriverPage::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fantoccini::error::{ErrorStatus, WebDriver};

    fn webdriver_error(status: ErrorStatus) -> CmdError {
        CmdError::Standard(WebDriver::new(status, "test"))
    }

    #[test]
    fn missing_and_stale_elements_count_as_gone() {
        assert!(is_gone(&webdriver_error(ErrorStatus::NoSuchElement)));
        assert!(is_gone(&webdriver_error(ErrorStatus::StaleElementReference)));
        assert!(!is_gone(&webdriver_error(ErrorStatus::InvalidSessionId)));
        assert!(!is_gone(&webdriver_error(ErrorStatus::UnknownError)));
        assert!(!is_gone(&CmdError::NotJson("<html>".into())));
    }

    #[test]
    fn headless_flag_controls_chrome_args() {
        let caps = WebDriverFactory::new("http://localhost:4444", true).capabilities();
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert_eq!(args[0], "--headless");
        assert!(args.contains(&json!("--no-sandbox")));

        let caps = WebDriverFactory::new("http://localhost:4444", false).capabilities();
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.contains(&json!("--headless")));
    }
}
