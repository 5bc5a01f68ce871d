use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{Credential, LoginConfig, LoginStrategy, Locator};
use crate::diagnostics;
use crate::driver::{DriverError, PageDriver};
use crate::error::{LoginStep, Result, ScrapeError};
use crate::wait::{await_condition, WaitError};

/// An authenticated browser page. Closed exactly once via [`Session::close`].
pub struct Session {
    driver: Option<Box<dyn PageDriver>>,
}

impl Session {
    pub fn new(driver: Box<dyn PageDriver>) -> Self {
        Session {
            driver: Some(driver),
        }
    }

    pub fn driver(&self) -> &dyn PageDriver {
        // Only `close` takes the driver, and it consumes the session.
        match &self.driver {
            Some(d) => d.as_ref(),
            None => unreachable!("session used after close"),
        }
    }

    /// Shut the browser down. Errors are logged, not returned: there is
    /// nothing a caller could do about a browser that refuses to quit.
    pub async fn close(mut self) {
        if let Some(driver) = self.driver.take() {
            match driver.close().await {
                Ok(()) => debug!("Browser session closed"),
                Err(e) => warn!("Closing browser session failed: {}", e),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.driver.is_some() {
            warn!("Session dropped without close; the browser may still be running");
        }
    }
}

/// Turns a fresh browser into an authenticated [`Session`].
///
/// On failure the browser has already been closed.
#[async_trait]
pub trait SessionAcquirer: Send + Sync {
    async fn acquire(&self, driver: Box<dyn PageDriver>, credential: &Credential) -> Result<Session>;
}

/// Drives the site's login form, optionally behind an "external user" choice.
pub struct BrowserLogin {
    config: LoginConfig,
    diagnostics_dir: PathBuf,
}

enum StepFailure {
    Timeout(LoginStep),
    Driver(DriverError),
}

impl From<DriverError> for StepFailure {
    fn from(e: DriverError) -> Self {
        StepFailure::Driver(e)
    }
}

impl BrowserLogin {
    pub fn new(config: LoginConfig, diagnostics_dir: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        Ok(BrowserLogin {
            config,
            diagnostics_dir: diagnostics_dir.into(),
        })
    }

    async fn wait_interactable(
        &self,
        driver: &dyn PageDriver,
        locator: &Locator,
        step: LoginStep,
    ) -> Result<(), StepFailure> {
        let res = await_condition(
            || interactable(driver, locator),
            self.config.step_timeout(),
            self.config.poll_interval(),
        )
        .await;
        self.step_result(res, step)
    }

    fn step_result(&self, res: Result<(), WaitError<DriverError>>, step: LoginStep) -> Result<(), StepFailure> {
        match res {
            Ok(()) => Ok(()),
            Err(WaitError::TimedOut { waited, attempts }) => {
                warn!(
                    "Timed out after {:.1}s ({} checks) waiting for {}",
                    waited.as_secs_f64(),
                    attempts,
                    step
                );
                Err(StepFailure::Timeout(step))
            }
            Err(WaitError::Failed(e)) => Err(StepFailure::Driver(e)),
        }
    }

    async fn login(&self, driver: &dyn PageDriver, credential: &Credential) -> Result<(), StepFailure> {
        let cfg = &self.config;
        driver.goto(&cfg.login_url).await?;

        match &cfg.strategy {
            LoginStrategy::Direct => {}
            LoginStrategy::ExternalUserLabel { text } => {
                let choice = Locator::LabelText(text.clone());
                self.wait_interactable(driver, &choice, LoginStep::ExternalUserChoice).await?;
                driver.click(&choice).await?;
            }
            LoginStrategy::ExternalUserButton { button } => {
                self.wait_interactable(driver, button, LoginStep::ExternalUserChoice).await?;
                driver.click(button).await?;
            }
        }

        self.wait_interactable(driver, &cfg.username, LoginStep::LoginForm).await?;
        self.wait_interactable(driver, &cfg.password, LoginStep::LoginForm).await?;
        driver.fill(&cfg.username, credential.identifier()).await?;
        driver.fill(&cfg.password, credential.secret()).await?;
        self.wait_interactable(driver, &cfg.submit, LoginStep::LoginForm).await?;
        driver.click(&cfg.submit).await?;
        debug!("Credentials submitted");

        let fragment = cfg.success_url_fragment.as_str();
        let marker = cfg.success_element.as_ref();
        let res = await_condition(
            || logged_in(driver, fragment, marker),
            cfg.step_timeout(),
            cfg.poll_interval(),
        )
        .await;
        self.step_result(res, LoginStep::PostLoginRedirect)?;

        if let Some(listing) = &cfg.listing_url {
            let here = driver.current_url().await?;
            if !here.starts_with(listing.as_str()) {
                debug!("Landed on {}, moving to listing", here);
                driver.goto(listing).await?;
            }
        }
        Ok(())
    }
}

async fn interactable(driver: &dyn PageDriver, locator: &Locator) -> Result<Option<()>, DriverError> {
    Ok(driver.is_interactable(locator).await?.then_some(()))
}

async fn logged_in(
    driver: &dyn PageDriver,
    fragment: &str,
    marker: Option<&Locator>,
) -> Result<Option<()>, DriverError> {
    if !fragment.is_empty() && driver.current_url().await?.contains(fragment) {
        return Ok(Some(()));
    }
    if let Some(marker) = marker {
        if driver.is_present(marker).await? {
            return Ok(Some(()));
        }
    }
    Ok(None)
}

#[async_trait]
impl SessionAcquirer for BrowserLogin {
    async fn acquire(&self, driver: Box<dyn PageDriver>, credential: &Credential) -> Result<Session> {
        let session = Session::new(driver);
        info!("Logging in ({:?})", self.config.strategy);

        match self.login(session.driver(), credential).await {
            Ok(()) => {
                info!("Login complete");
                Ok(session)
            }
            Err(StepFailure::Timeout(step)) => {
                let label = format!("login-{}", step).replace(' ', "-");
                let diagnostics =
                    diagnostics::capture(session.driver(), &self.diagnostics_dir, &label).await;
                session.close().await;
                Err(ScrapeError::SessionTimeout { step, diagnostics })
            }
            Err(StepFailure::Driver(e)) => {
                session.close().await;
                Err(e.into())
            }
        }
    }
}
