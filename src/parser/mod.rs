pub mod dates;

use std::collections::BTreeMap;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::config::ExtractConfig;
use crate::error::{Result, ScrapeError};
use crate::model::{Record, Records};
use dates::{find_date, DateWindow};

/// Compiled form of the extraction settings, plus the optional date filter.
#[derive(Debug, Clone)]
pub struct ParseRules {
    container_css: String,
    container: Selector,
    entry: Selector,
    id_re: Regex,
    metadata_attribute: Option<String>,
    start_date_fields: Vec<String>,
    window: Option<DateWindow>,
}

impl ParseRules {
    pub fn new(cfg: &ExtractConfig, window: Option<DateWindow>) -> Result<Self> {
        let selector = |css: &str, what: &str| {
            Selector::parse(css).map_err(|e| {
                ScrapeError::Configuration(format!("invalid {} selector `{}`: {}", what, css, e))
            })
        };
        let id_re = Regex::new(&cfg.id_pattern).map_err(|e| {
            ScrapeError::Configuration(format!("invalid id pattern `{}`: {}", cfg.id_pattern, e))
        })?;

        Ok(ParseRules {
            container_css: cfg.container.clone(),
            container: selector(&cfg.container, "container")?,
            entry: selector(&cfg.entry, "entry")?,
            id_re,
            metadata_attribute: cfg.metadata_attribute.clone(),
            start_date_fields: cfg.start_date_fields.iter().map(|f| f.to_lowercase()).collect(),
            window,
        })
    }

    pub fn container_css(&self) -> &str {
        &self.container_css
    }

    pub fn window(&self) -> Option<DateWindow> {
        self.window
    }
}

/// Parse the listing out of a page. `None` means the container is absent;
/// a container without matching entries gives an empty map.
///
/// Entries without an id, or outside the date window, are skipped.
/// A repeated id keeps the entry that comes last on the page.
pub fn parse_listing(html: &str, rules: &ParseRules) -> Option<Records> {
    let doc = Html::parse_document(html);
    let container = doc.select(&rules.container).next()?;

    let mut records = Records::new();
    let mut skipped = 0usize;
    for el in container.select(&rules.entry) {
        match parse_entry(el, rules) {
            Some(rec) => {
                records.insert(rec.id.clone(), rec);
            }
            None => skipped += 1,
        }
    }

    debug!(kept = records.len(), skipped, "parsed listing");
    Some(records)
}

fn parse_entry(el: ElementRef<'_>, rules: &ParseRules) -> Option<Record> {
    let text = normalize_text(el);
    let meta = rules
        .metadata_attribute
        .as_deref()
        .and_then(|attr| el.value().attr(attr));
    let fields = meta.map(parse_fields).unwrap_or_default();

    let id = find_id(&rules.id_re, &text).or_else(|| meta.and_then(|m| find_id(&rules.id_re, m)));
    let Some(id) = id else {
        debug!("No id in entry: {:?}", text);
        return None;
    };

    let start_date = rules
        .start_date_fields
        .iter()
        .find_map(|key| fields.get(key).and_then(|v| find_date(v)))
        .or_else(|| find_date(&text));

    if let Some(window) = rules.window {
        match start_date {
            Some(d) if window.contains(d) => {}
            Some(d) => {
                debug!("{} starts {} outside {}..={}", id, d, window.start, window.end);
                return None;
            }
            None => {
                debug!("{} has no start date, dropped by date filter", id);
                return None;
            }
        }
    }

    Some(Record {
        id,
        text,
        start_date,
        fields,
    })
}

/// Each text node trimmed, empty ones dropped, the rest concatenated.
/// Matches the text stored by earlier versions of the tool, so their
/// snapshots diff cleanly.
fn normalize_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).collect()
}

fn find_id(re: &Regex, s: &str) -> Option<String> {
    let caps = re.captures(s)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().to_string())
}

/// `Key: value` lines; keys lowercased. Lines without a colon are ignored.
pub fn parse_fields(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_lowercase(), v.trim().to_string()))
        })
        .collect()
}

// ── Tests ──
