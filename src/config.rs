use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};

const LOGIN_URL: &str = "https://loginseguro.petrobras.com.br/fwca/pages/AuthenticationForm.jsp?\
    successfulUrl=https%3a%2f%2fex-ciem2.petrobras.com.br%3a443%2f\
    &ssoEnabled=False&applicationCatalogId=CIE2\
    &appEnvUid=5013&integratedAuthenticationEnabled=False\
    &logonPage=&hxid=f47309d2917dbf0c#";
const CONFIG_FILE: &str = "ciem_watch";
const ENV_PREFIX: &str = "CIEM";

// ── Credential ──

/// Login identifier and secret. Never persisted, never logged.
#[derive(Clone)]
pub struct Credential {
    identifier: String,
    secret: String,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        let secret = secret.into();
        if identifier.trim().is_empty() || secret.is_empty() {
            return Err(ScrapeError::Configuration(
                "credential identifier and secret must both be set (CIEM_USER / CIEM_PW)".into(),
            ));
        }
        Ok(Credential { identifier, secret })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential { .. }")
    }
}

// ── Locator ──

/// Opaque element selector: `id:foo`, `xpath://div`, `label:Some text`, or plain CSS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Locator {
    Css(String),
    Id(String),
    XPath(String),
    /// A `<label>` whose normalized text equals the given string.
    LabelText(String),
}

impl Locator {
    pub fn css(s: impl Into<String>) -> Self {
        Locator::Css(s.into())
    }

    /// XPath equivalent for label lookups; `None` for the other variants.
    pub fn label_xpath(&self) -> Option<String> {
        match self {
            Locator::LabelText(text) => Some(format!(
                "//label[normalize-space()={}]",
                xpath_literal(text)
            )),
            _ => None,
        }
    }
}

fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{}'", s)
    } else if !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

impl From<&str> for Locator {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("id:") {
            Locator::Id(rest.to_string())
        } else if let Some(rest) = s.strip_prefix("xpath:") {
            Locator::XPath(rest.to_string())
        } else if let Some(rest) = s.strip_prefix("label:") {
            Locator::LabelText(rest.to_string())
        } else {
            Locator::Css(s.to_string())
        }
    }
}

impl From<String> for Locator {
    fn from(s: String) -> Self {
        Locator::from(s.as_str())
    }
}

impl From<Locator> for String {
    fn from(l: Locator) -> Self {
        l.to_string()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "{}", s),
            Locator::Id(s) => write!(f, "id:{}", s),
            Locator::XPath(s) => write!(f, "xpath:{}", s),
            Locator::LabelText(s) => write!(f, "label:{}", s),
        }
    }
}

// ── Login ──

/// What has to happen before the username/password form shows up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoginStrategy {
    /// The form is on the entry page.
    Direct,
    /// Pick the "external user" radio through its label.
    ExternalUserLabel { text: String },
    /// Press an "external user" button.
    ExternalUserButton { button: Locator },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub login_url: String,
    /// Navigated to after login if the redirect did not land on it.
    pub listing_url: Option<String>,
    /// Login succeeded once the current URL contains this.
    pub success_url_fragment: String,
    /// Alternative success signal: this element appears.
    pub success_element: Option<Locator>,
    pub strategy: LoginStrategy,
    pub username: Locator,
    pub password: Locator,
    pub submit: Locator,
    pub step_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LoginConfig {
    fn default() -> Self {
        LoginConfig {
            login_url: LOGIN_URL.to_string(),
            listing_url: None,
            success_url_fragment: "/Scheduler".to_string(),
            success_element: None,
            strategy: LoginStrategy::Direct,
            username: Locator::Id("txt_user_login".into()),
            password: Locator::Id("pwd_user_password".into()),
            submit: Locator::Id("button-verify".into()),
            step_timeout_secs: 15,
            poll_interval_ms: 250,
        }
    }
}

impl LoginConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.login_url.trim().is_empty() {
            return Err(ScrapeError::Configuration("login.login_url is empty".into()));
        }
        if self.success_url_fragment.is_empty() && self.success_element.is_none() {
            return Err(ScrapeError::Configuration(
                "login needs a success_url_fragment or a success_element".into(),
            ));
        }
        if self.step_timeout_secs == 0 {
            return Err(ScrapeError::Configuration("login.step_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

// ── Extraction ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractStrategy {
    /// Read the page once the container is present.
    SinglePass,
    /// Scroll until the content stops growing, then read.
    Scrolling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub strategy: ExtractStrategy,
    /// CSS selector of the listing container.
    pub container: String,
    /// CSS selector of one entry, relative to the container.
    pub entry: String,
    /// Regex whose first capture group (or whole match) is the record id.
    pub id_pattern: String,
    /// Attribute holding `Key: value` metadata lines, e.g. a tooltip.
    pub metadata_attribute: Option<String>,
    /// Metadata keys tried in order for the start date.
    pub start_date_fields: Vec<String>,
    /// Scrollable region; the document itself when unset.
    pub scroll_region: Option<String>,
    pub container_timeout_secs: u64,
    pub max_scroll_rounds: u32,
    pub settle_ms: u64,
    /// Only keep records starting within today..=today+N days.
    pub window_days: Option<u32>,
    /// Fail instead of committing when the listing never settled.
    pub reject_partial: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig {
            strategy: ExtractStrategy::SinglePass,
            container: "#dps".to_string(),
            entry: ".ciem_theme_event_inner".to_string(),
            id_pattern: r"(006000\d+)".to_string(),
            metadata_attribute: Some("title".to_string()),
            start_date_fields: vec![
                "Início".to_string(),
                "Inicio".to_string(),
                "Start".to_string(),
            ],
            scroll_region: None,
            container_timeout_secs: 15,
            max_scroll_rounds: 20,
            settle_ms: 750,
            window_days: None,
            reject_partial: false,
        }
    }
}

impl ExtractConfig {
    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

// ── Retry ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 2,
            base_backoff_ms: 2000,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(2u64.saturating_pow(attempt)))
    }
}

// ── Settings ──

// Values stay strings here; numeric and boolean fields are coerced on
// deserialize, so a secret like `007123` keeps its leading zeros.
fn env_source() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

// No Debug: it would print the password.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// CIEM_USER
    pub user: Option<String>,
    /// CIEM_PW
    #[serde(skip_serializing)]
    pub pw: Option<String>,
    pub webdriver_url: String,
    pub headless: bool,
    pub snapshot_path: PathBuf,
    pub diagnostics_dir: PathBuf,
    pub track_removals: bool,
    pub login: LoginConfig,
    pub extract: ExtractConfig,
    pub retry: RetryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            user: None,
            pw: None,
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            snapshot_path: PathBuf::from("data/last_snapshot.json"),
            diagnostics_dir: PathBuf::from("data/diagnostics"),
            track_removals: false,
            login: LoginConfig::default(),
            extract: ExtractConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Settings {
    /// `ciem_watch.toml` (optional) overlaid with `CIEM_*` environment variables.
    pub fn load() -> Result<Self> {
        Settings::load_with(env_source())
    }

    fn load_with(env: ::config::Environment) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(CONFIG_FILE).required(false))
            .add_source(env)
            .build()?;
        let settings: Settings = settings.try_deserialize()?;
        settings.login.validate()?;
        Ok(settings)
    }

    pub fn credential(&self) -> Result<Credential> {
        match (self.user.as_deref(), self.pw.as_deref()) {
            (Some(user), Some(pw)) => Credential::new(user, pw),
            _ => Err(ScrapeError::Configuration(
                "CIEM_USER or CIEM_PW is not set".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_prefixes() {
        assert_eq!(Locator::from("id:txt_user_login"), Locator::Id("txt_user_login".into()));
        assert_eq!(Locator::from("xpath://a[1]"), Locator::XPath("//a[1]".into()));
        assert_eq!(Locator::from("label:Usuário externo"), Locator::LabelText("Usuário externo".into()));
        assert_eq!(Locator::from("#dps .x"), Locator::Css("#dps .x".into()));
        assert_eq!(Locator::from("id:a").to_string(), "id:a");
    }

    #[test]
    fn label_xpath_quotes() {
        let l = Locator::LabelText("Usuário externo".into());
        assert_eq!(l.label_xpath().unwrap(), "//label[normalize-space()='Usuário externo']");
        let l = Locator::LabelText("it's".into());
        assert_eq!(l.label_xpath().unwrap(), "//label[normalize-space()=\"it's\"]");
        assert!(Locator::css("#x").label_xpath().is_none());
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let e = Credential::new("", "pw").unwrap_err();
        assert_eq!(e.kind(), crate::error::ErrorKind::Configuration);
        assert!(Credential::new("user", "").is_err());
        assert!(Settings::default().credential().is_err());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::new("someone", "hunter2").unwrap();
        let shown = format!("{:?}", c);
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("someone"));
    }

    #[test]
    fn strategy_from_toml_shape() {
        let v: LoginStrategy = serde_json::from_str(
            r#"{"kind":"external_user_button","button":"id:btn-external"}"#,
        )
        .unwrap();
        assert_eq!(
            v,
            LoginStrategy::ExternalUserButton {
                button: Locator::Id("btn-external".into())
            }
        );
    }

    fn load_env(vars: &[(&str, &str)]) -> Result<Settings> {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::load_with(env_source().source(Some(map)))
    }

    #[test]
    fn env_overrides_keep_secrets_verbatim() {
        let s = load_env(&[
            ("CIEM_USER", "0042"),
            ("CIEM_PW", "007123"),
            ("CIEM_LOGIN__STEP_TIMEOUT_SECS", "3"),
            ("CIEM_HEADLESS", "false"),
            ("CIEM_EXTRACT__WINDOW_DAYS", "7"),
        ])
        .unwrap();
        assert_eq!(s.pw.as_deref(), Some("007123"));
        assert_eq!(s.user.as_deref(), Some("0042"));
        assert_eq!(s.login.step_timeout_secs, 3);
        assert!(!s.headless);
        assert_eq!(s.extract.window_days, Some(7));
        assert_eq!(s.credential().unwrap().secret(), "007123");
        // untouched fields keep their defaults
        assert_eq!(s.extract.container, "#dps");
        assert_eq!(s.login.success_url_fragment, "/Scheduler");
    }

    #[test]
    fn env_rejects_invalid_login_config() {
        let e = load_env(&[("CIEM_LOGIN__STEP_TIMEOUT_SECS", "0")]).err().unwrap();
        assert_eq!(e.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn backoff_doubles() {
        let r = RetryConfig { max_attempts: 3, base_backoff_ms: 100 };
        assert_eq!(r.backoff(0), Duration::from_millis(100));
        assert_eq!(r.backoff(2), Duration::from_millis(400));
    }
}
