//! Scripted in-memory browser for exercising login and extraction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ExtractConfig, LoginConfig, LoginStrategy, Locator};
use crate::driver::{DriverError, DriverFactory, PageDriver};
use crate::error::ScrapeError;

pub const LOGIN_URL: &str = "https://login.test/form";
pub const LISTING_URL: &str = "https://app.test/Scheduler";
pub const USER: &str = "operator";
pub const PASSWORD: &str = "s3cret";

#[derive(Debug, Clone)]
pub enum Effect {
    /// Element becomes present and interactable.
    Show(String),
    /// Element becomes present but stays hidden.
    Present(String),
    Navigate(String),
    SetHtml(String),
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub url: String,
    pub present: HashSet<String>,
    pub interactable: HashSet<String>,
    pub on_goto: HashMap<String, Vec<Effect>>,
    pub on_click: HashMap<String, Vec<Effect>>,
    pub filled: HashMap<String, String>,
    /// Submit only navigates when these were typed in.
    pub expected_login: Option<(String, String)>,
    pub html: String,
    /// Each scroll pops one (height, html) round; empty means settled.
    pub scroll_rounds: VecDeque<(u64, String)>,
    pub height: u64,
    pub scrolls: u32,
    pub clicks: Vec<String>,
    pub closes: u32,
    pub broken: bool,
}

#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub state: Arc<Mutex<FakeState>>,
    open: Option<Arc<AtomicUsize>>,
}

impl FakeBrowser {
    /// A login page at [`LOGIN_URL`] whose form (behind `strategy`) leads to
    /// [`LISTING_URL`] showing `listing_html`.
    pub fn site(strategy: &LoginStrategy, listing_html: &str) -> Self {
        let login = test_login_config(strategy.clone());
        let mut st = FakeState {
            expected_login: Some((USER.into(), PASSWORD.into())),
            ..Default::default()
        };

        let form = vec![
            Effect::Show(login.username.to_string()),
            Effect::Show(login.password.to_string()),
            Effect::Show(login.submit.to_string()),
        ];
        match strategy {
            LoginStrategy::Direct => {
                st.on_goto.insert(LOGIN_URL.into(), form);
            }
            LoginStrategy::ExternalUserLabel { text } => {
                let choice = Locator::LabelText(text.clone()).to_string();
                st.on_goto.insert(LOGIN_URL.into(), vec![Effect::Show(choice.clone())]);
                st.on_click.insert(choice, form);
            }
            LoginStrategy::ExternalUserButton { button } => {
                st.on_goto.insert(LOGIN_URL.into(), vec![Effect::Show(button.to_string())]);
                st.on_click.insert(button.to_string(), form);
            }
        }
        st.on_click.insert(
            login.submit.to_string(),
            vec![Effect::Navigate(LISTING_URL.into())],
        );
        st.on_goto.insert(
            LISTING_URL.into(),
            vec![
                Effect::SetHtml(listing_html.into()),
                Effect::Show("#dps".into()),
            ],
        );

        FakeBrowser {
            state: Arc::new(Mutex::new(st)),
            open: None,
        }
    }

    /// Already logged in and looking at `html`.
    pub fn on_listing(html: &str) -> Self {
        let b = FakeBrowser::default();
        {
            let mut st = b.lock();
            st.url = LISTING_URL.into();
            st.html = html.into();
            st.present.insert("#dps".into());
        }
        b
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn closes(&self) -> u32 {
        self.lock().closes
    }

    fn apply(st: &mut FakeState, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Show(sel) => {
                    st.present.insert(sel.clone());
                    st.interactable.insert(sel);
                }
                Effect::Present(sel) => {
                    st.present.insert(sel);
                }
                Effect::Navigate(url) => {
                    st.url = url.clone();
                    let next = st.on_goto.get(&url).cloned().unwrap_or_default();
                    FakeBrowser::apply(st, next);
                }
                Effect::SetHtml(html) => st.html = html,
            }
        }
    }

    fn check(st: &FakeState) -> Result<(), DriverError> {
        if st.broken {
            Err(DriverError::Script("browser crashed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PageDriver for FakeBrowser {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        let mut st = self.lock();
        FakeBrowser::check(&st)?;
        FakeBrowser::apply(&mut st, vec![Effect::Navigate(url.to_string())]);
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let st = self.lock();
        FakeBrowser::check(&st)?;
        Ok(st.url.clone())
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool, DriverError> {
        let st = self.lock();
        FakeBrowser::check(&st)?;
        Ok(st.present.contains(&locator.to_string()))
    }

    async fn is_interactable(&self, locator: &Locator) -> Result<bool, DriverError> {
        let st = self.lock();
        FakeBrowser::check(&st)?;
        Ok(st.interactable.contains(&locator.to_string()))
    }

    async fn click(&self, locator: &Locator) -> Result<(), DriverError> {
        let mut st = self.lock();
        FakeBrowser::check(&st)?;
        let key = locator.to_string();
        st.clicks.push(key.clone());
        let mut effects = st.on_click.get(&key).cloned().unwrap_or_default();
        let is_navigation = effects.iter().any(|e| matches!(e, Effect::Navigate(_)));
        if is_navigation {
            if let Some((user, pw)) = st.expected_login.clone() {
                let typed: HashSet<&String> = st.filled.values().collect();
                if !(typed.contains(&user) && typed.contains(&pw)) {
                    effects.clear();
                }
            }
        }
        FakeBrowser::apply(&mut st, effects);
        Ok(())
    }

    async fn fill(&self, locator: &Locator, text: &str) -> Result<(), DriverError> {
        let mut st = self.lock();
        FakeBrowser::check(&st)?;
        st.filled.insert(locator.to_string(), text.to_string());
        Ok(())
    }

    async fn scroll_to_bottom(&self, _region: Option<&str>) -> Result<u64, DriverError> {
        let mut st = self.lock();
        FakeBrowser::check(&st)?;
        st.scrolls += 1;
        if let Some((height, html)) = st.scroll_rounds.pop_front() {
            st.height = height;
            st.html = html;
        }
        Ok(st.height)
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        let st = self.lock();
        FakeBrowser::check(&st)?;
        Ok(st.html.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.lock().closes += 1;
        if let Some(open) = &self.open {
            open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out clones of scripted browsers and tracks how many are open at once.
#[derive(Clone)]
pub struct FakeFactory {
    make: Arc<dyn Fn() -> FakeBrowser + Send + Sync>,
    pub launched: Arc<Mutex<Vec<FakeBrowser>>>,
    open: Arc<AtomicUsize>,
    pub max_open: Arc<AtomicUsize>,
    pub launch_delay: Duration,
}

impl FakeFactory {
    pub fn new(make: impl Fn() -> FakeBrowser + Send + Sync + 'static) -> Self {
        FakeFactory {
            make: Arc::new(make),
            launched: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(AtomicUsize::new(0)),
            max_open: Arc::new(AtomicUsize::new(0)),
            launch_delay: Duration::ZERO,
        }
    }

    pub fn browsers(&self) -> Vec<FakeBrowser> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriverFactory for FakeFactory {
    async fn launch(&self) -> Result<Box<dyn PageDriver>, ScrapeError> {
        let mut browser = (self.make)();
        browser.open = Some(Arc::clone(&self.open));
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        self.launched.lock().unwrap().push(browser.clone());
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        Ok(Box::new(browser))
    }
}

pub fn test_login_config(strategy: LoginStrategy) -> LoginConfig {
    LoginConfig {
        login_url: LOGIN_URL.into(),
        listing_url: None,
        success_url_fragment: "/Scheduler".into(),
        success_element: None,
        strategy,
        step_timeout_secs: 1,
        poll_interval_ms: 5,
        ..LoginConfig::default()
    }
}

pub fn test_extract_config() -> ExtractConfig {
    ExtractConfig {
        container_timeout_secs: 1,
        settle_ms: 1,
        max_scroll_rounds: 10,
        ..ExtractConfig::default()
    }
}

/// Listing markup in the shape the scheduler renders.
pub fn listing(entries: &[(&str, &str)]) -> String {
    let items: String = entries
        .iter()
        .map(|(title, text)| {
            format!(
                "<div class=\"ciem_theme_event\"><div class=\"ciem_theme_event_inner\" title=\"{}\">{}</div></div>",
                title, text
            )
        })
        .collect();
    format!("<html><body><div id=\"dps\">{}</div></body></html>", items)
}
