use std::sync::LazyLock;

use chrono::{Days, Local, NaiveDate};
use regex::Regex;

use crate::error::{Result, ScrapeError};

static DMY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap());
static ISO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})").unwrap());

/// First calendar date found in `s`: `dd/mm/yyyy` (site format) or ISO `yyyy-mm-dd`.
/// Any time of day after it is ignored.
pub fn find_date(s: &str) -> Option<NaiveDate> {
    let dmy = DMY_RE.captures(s).map(|c| (c.get(0).map_or(0, |m| m.start()), c));
    let iso = ISO_RE.captures(s).map(|c| (c.get(0).map_or(0, |m| m.start()), c));

    let (is_dmy, caps) = match (dmy, iso) {
        (Some(d), Some(i)) if i.0 < d.0 => (false, i.1),
        (Some(d), _) => (true, d.1),
        (None, Some(i)) => (false, i.1),
        (None, None) => return None,
    };
    let n = |i: usize| caps[i].parse::<u32>().ok();
    if is_dmy {
        NaiveDate::from_ymd_opt(n(3)? as i32, n(2)?, n(1)?)
    } else {
        NaiveDate::from_ymd_opt(n(1)? as i32, n(2)?, n(3)?)
    }
}

/// Inclusive range of start dates to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(ScrapeError::Configuration(format!(
                "date window ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(DateWindow { start, end })
    }

    /// `today ..= today + days`.
    pub fn starting(today: NaiveDate, days: u32) -> Self {
        let end = today
            .checked_add_days(Days::new(days as u64))
            .unwrap_or(NaiveDate::MAX);
        DateWindow { start: today, end }
    }

    pub fn next_days(days: u32) -> Self {
        DateWindow::starting(Local::now().date_naive(), days)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}
