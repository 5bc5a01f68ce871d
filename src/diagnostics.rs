use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::driver::PageDriver;

/// Artifacts written when a page did not look the way we expected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub markup: Option<PathBuf>,
    pub screenshot: Option<PathBuf>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.markup.is_none() && self.screenshot.is_none()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = [&self.markup, &self.screenshot]
            .into_iter()
            .flatten()
            .map(|p| p.display().to_string())
            .collect();
        f.write_str(&paths.join(", "))
    }
}

/// Dump the current page source and a screenshot into `dir`.
///
/// Never fails: every problem is logged and the artifact is left out.
pub async fn capture(driver: &dyn PageDriver, dir: &Path, label: &str) -> Option<Diagnostics> {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Cannot create diagnostics dir {}: {}", dir.display(), e);
        return None;
    }

    let stem = format!("{}-{}", Local::now().format("%Y%m%d-%H%M%S"), label);
    let mut diag = Diagnostics::default();

    match driver.page_source().await {
        Ok(html) => {
            let path = dir.join(format!("{}.html", stem));
            match tokio::fs::write(&path, html).await {
                Ok(()) => diag.markup = Some(path),
                Err(e) => warn!("Cannot write {}: {}", path.display(), e),
            }
        }
        Err(e) => warn!("Cannot read page source for diagnostics: {}", e),
    }

    match driver.screenshot().await {
        Ok(png) => {
            let path = dir.join(format!("{}.png", stem));
            match tokio::fs::write(&path, png).await {
                Ok(()) => diag.screenshot = Some(path),
                Err(e) => warn!("Cannot write {}: {}", path.display(), e),
            }
        }
        Err(e) => warn!("Cannot take screenshot for diagnostics: {}", e),
    }

    if diag.is_empty() {
        None
    } else {
        info!("Diagnostics saved: {}", diag);
        Some(diag)
    }
}
