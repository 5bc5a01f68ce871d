use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{ExtractConfig, ExtractStrategy, Locator};
use crate::diagnostics;
use crate::driver::{DriverError, PageDriver};
use crate::error::{Result, ScrapeError};
use crate::model::Extraction;
use crate::parser::dates::DateWindow;
use crate::parser::{parse_listing, ParseRules};
use crate::session::Session;
use crate::wait::{await_condition, WaitError};

const CONTAINER_POLL: Duration = Duration::from_millis(250);

/// Reads the listing off an authenticated page.
#[async_trait]
pub trait RecordExtractor: Send + Sync {
    async fn extract(&self, session: &Session) -> Result<Extraction>;
}

/// Build the extractor selected by `cfg.strategy`.
pub fn from_config(
    cfg: &ExtractConfig,
    window: Option<DateWindow>,
    diagnostics_dir: impl Into<PathBuf>,
) -> Result<Box<dyn RecordExtractor>> {
    let listing = ListingReader {
        rules: ParseRules::new(cfg, window)?,
        container_timeout: cfg.container_timeout(),
        poll: CONTAINER_POLL.min(cfg.container_timeout().max(Duration::from_millis(1))),
        diagnostics_dir: diagnostics_dir.into(),
    };
    Ok(match cfg.strategy {
        ExtractStrategy::SinglePass => Box::new(SinglePassExtractor { listing }),
        ExtractStrategy::Scrolling => Box::new(ScrollingExtractor {
            listing,
            region: cfg.scroll_region.clone(),
            max_rounds: cfg.max_scroll_rounds.max(1),
            settle: cfg.settle_interval(),
        }),
    })
}

/// Shared part of both strategies: container wait and markup parsing.
struct ListingReader {
    rules: ParseRules,
    container_timeout: Duration,
    poll: Duration,
    diagnostics_dir: PathBuf,
}

impl ListingReader {
    async fn container_missing(&self, driver: &dyn PageDriver) -> ScrapeError {
        let diagnostics = diagnostics::capture(driver, &self.diagnostics_dir, "container").await;
        ScrapeError::ContainerNotFound {
            selector: self.rules.container_css().to_string(),
            diagnostics,
        }
    }

    async fn wait_for_container(&self, driver: &dyn PageDriver) -> Result<()> {
        let container = Locator::css(self.rules.container_css());
        let res = await_condition(
            || present(driver, &container),
            self.container_timeout,
            self.poll,
        )
        .await;
        match res {
            Ok(()) => Ok(()),
            Err(WaitError::TimedOut { waited, .. }) => {
                warn!(
                    "Container {} absent after {:.1}s",
                    self.rules.container_css(),
                    waited.as_secs_f64()
                );
                Err(self.container_missing(driver).await)
            }
            Err(WaitError::Failed(e)) => Err(e.into()),
        }
    }

    async fn read(&self, driver: &dyn PageDriver, unsettled_after: Option<u32>) -> Result<Extraction> {
        let html = driver.page_source().await?;
        match parse_listing(&html, &self.rules) {
            Some(records) => {
                info!("Extracted {} records", records.len());
                Ok(Extraction {
                    records,
                    unsettled_after,
                })
            }
            // Present a moment ago, gone now: treat like never found.
            None => Err(self.container_missing(driver).await),
        }
    }
}

async fn present(driver: &dyn PageDriver, locator: &Locator) -> Result<Option<()>, DriverError> {
    Ok(driver.is_present(locator).await?.then_some(()))
}

/// Reads the page as soon as the container shows up.
pub struct SinglePassExtractor {
    listing: ListingReader,
}

#[async_trait]
impl RecordExtractor for SinglePassExtractor {
    async fn extract(&self, session: &Session) -> Result<Extraction> {
        let driver = session.driver();
        self.listing.wait_for_container(driver).await?;
        self.listing.read(driver, None).await
    }
}

/// Scrolls the listing until its height stops changing, for pages that
/// load entries lazily. Gives up after `max_rounds` and returns what loaded.
pub struct ScrollingExtractor {
    listing: ListingReader,
    region: Option<String>,
    max_rounds: u32,
    settle: Duration,
}

impl ScrollingExtractor {
    /// Number of rounds it took to settle, or `None` if it never did.
    async fn settle(&self, driver: &dyn PageDriver) -> Result<Option<u32>> {
        let region = self.region.as_deref();
        let mut last = driver.scroll_to_bottom(region).await?;
        for round in 1..=self.max_rounds {
            tokio::time::sleep(self.settle).await;
            let height = driver.scroll_to_bottom(region).await?;
            debug!(round, height, last, "scroll");
            if height == last {
                return Ok(Some(round));
            }
            last = height;
        }
        Ok(None)
    }
}

#[async_trait]
impl RecordExtractor for ScrollingExtractor {
    async fn extract(&self, session: &Session) -> Result<Extraction> {
        let driver = session.driver();
        self.listing.wait_for_container(driver).await?;

        let unsettled_after = match self.settle(driver).await? {
            Some(rounds) => {
                debug!("Listing settled after {} rounds", rounds);
                None
            }
            None => {
                warn!(
                    "Listing still growing after {} rounds, keeping what loaded",
                    self.max_rounds
                );
                Some(self.max_rounds)
            }
        };
        self.listing.read(driver, unsettled_after).await
    }
}
