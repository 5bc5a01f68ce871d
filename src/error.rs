use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostics::Diagnostics;

pub type Result<T, E = ScrapeError> = std::result::Result<T, E>;

/// Login step that was being waited on when a session timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    /// The "external user" choice never became clickable.
    ExternalUserChoice,
    /// Username/password form never appeared.
    LoginForm,
    /// Credentials were submitted but the listing page was never reached.
    PostLoginRedirect,
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoginStep::ExternalUserChoice => "external user option",
            LoginStep::LoginForm => "login form",
            LoginStep::PostLoginRedirect => "post-login redirect",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("session timed out waiting for {step}{}", fmt_diag(.diagnostics))]
    SessionTimeout {
        step: LoginStep,
        diagnostics: Option<Diagnostics>,
    },

    #[error("listing container `{selector}` not found{}", fmt_diag(.diagnostics))]
    ContainerNotFound {
        selector: String,
        diagnostics: Option<Diagnostics>,
    },

    #[error("listing did not settle after {rounds} load rounds ({records} records parsed)")]
    ExtractionTimeout { rounds: u32, records: usize },

    #[error("snapshot store {}: {reason}", .path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("fetch aborted: {0}")]
    Internal(String),
}

fn fmt_diag(diagnostics: &Option<Diagnostics>) -> String {
    match diagnostics {
        Some(d) => format!(" (diagnostics: {})", d),
        None => String::new(),
    }
}

/// Coarse classification a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    SessionTimeout,
    ContainerNotFound,
    ExtractionTimeout,
    Persistence,
    Browser,
    Internal,
}

impl ErrorKind {
    /// Whether a caller may reasonably try again.
    ///
    /// `ContainerNotFound` is retryable, but usually points at a layout
    /// change on the site, so it is never retried automatically.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::SessionTimeout
                | ErrorKind::ContainerNotFound
                | ErrorKind::ExtractionTimeout
                | ErrorKind::Browser
        )
    }

    /// Failures the orchestrator retries on its own.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::SessionTimeout | ErrorKind::Browser)
    }
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::Configuration(_) => ErrorKind::Configuration,
            ScrapeError::SessionTimeout { .. } => ErrorKind::SessionTimeout,
            ScrapeError::ContainerNotFound { .. } => ErrorKind::ContainerNotFound,
            ScrapeError::ExtractionTimeout { .. } => ErrorKind::ExtractionTimeout,
            ScrapeError::Persistence { .. } => ErrorKind::Persistence,
            ScrapeError::Browser(_) => ErrorKind::Browser,
            ScrapeError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            ScrapeError::SessionTimeout { diagnostics, .. }
            | ScrapeError::ContainerNotFound { diagnostics, .. } => diagnostics.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        ScrapeError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<crate::driver::DriverError> for ScrapeError {
    fn from(e: crate::driver::DriverError) -> Self {
        ScrapeError::Browser(e.to_string())
    }
}

impl From<::config::ConfigError> for ScrapeError {
    fn from(e: ::config::ConfigError) -> Self {
        ScrapeError::Configuration(e.to_string())
    }
}
