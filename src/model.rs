use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

/// Record id → display text, as last observed.
pub type Snapshot = BTreeMap<String, String>;

/// One work order read off the scheduler listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: String,
    /// Entry text, each text node trimmed and concatenated.
    pub text: String,
    pub start_date: Option<NaiveDate>,
    /// `Key: value` pairs from the entry's metadata attribute.
    pub fields: BTreeMap<String, String>,
}

pub type Records = BTreeMap<String, Record>;

pub fn to_snapshot(records: &Records) -> Snapshot {
    records
        .iter()
        .map(|(id, r)| (id.clone(), r.text.clone()))
        .collect()
}

/// What an extractor produced for one fetch.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Records,
    /// Set when the listing never stopped growing within the round cap;
    /// `records` then holds whatever had loaded by then.
    pub unsettled_after: Option<u32>,
}

impl Extraction {
    pub fn is_partial(&self) -> bool {
        self.unsettled_after.is_some()
    }
}
