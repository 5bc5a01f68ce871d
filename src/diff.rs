use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::model::Snapshot;
use crate::store::SnapshotStore;

/// Whether ids that disappeared from the listing are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    #[default]
    Ignore,
    Report,
}

impl RemovalPolicy {
    pub fn from_flag(track_removals: bool) -> Self {
        if track_removals {
            RemovalPolicy::Report
        } else {
            RemovalPolicy::Ignore
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One record that differs from the previous snapshot.
/// `current` is only `None` for removals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    pub id: String,
    pub previous: Option<String>,
    pub current: Option<String>,
}

impl ChangeEntry {
    pub fn kind(&self) -> ChangeKind {
        match (&self.previous, &self.current) {
            (None, _) => ChangeKind::Added,
            (Some(_), Some(_)) => ChangeKind::Modified,
            (Some(_), None) => ChangeKind::Removed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<String, ChangeEntry>);

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, id: &str) -> Option<&ChangeEntry> {
        self.0.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.0.values()
    }

    pub fn count_kind(&self, kind: ChangeKind) -> usize {
        self.iter().filter(|e| e.kind() == kind).count()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a ChangeEntry;
    type IntoIter = std::collections::btree_map::Values<'a, String, ChangeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.values()
    }
}

/// Records in `current` that are new or whose text changed, plus removals
/// when the policy asks for them.
pub fn diff(previous: &Snapshot, current: &Snapshot, policy: RemovalPolicy) -> ChangeSet {
    let mut changes = BTreeMap::new();

    for (id, text) in current {
        let old = previous.get(id);
        if old != Some(text) {
            changes.insert(
                id.clone(),
                ChangeEntry {
                    id: id.clone(),
                    previous: old.cloned(),
                    current: Some(text.clone()),
                },
            );
        }
    }

    if policy == RemovalPolicy::Report {
        for (id, text) in previous {
            if !current.contains_key(id) {
                changes.insert(
                    id.clone(),
                    ChangeEntry {
                        id: id.clone(),
                        previous: Some(text.clone()),
                        current: None,
                    },
                );
            }
        }
    }

    ChangeSet(changes)
}

/// Compares fresh extractions against the stored snapshot and commits them.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    store: SnapshotStore,
    policy: RemovalPolicy,
}

impl ChangeDetector {
    pub fn new(store: SnapshotStore, policy: RemovalPolicy) -> Self {
        ChangeDetector { store, policy }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Diff against the committed snapshot without writing anything.
    pub fn preview(&self, current: &Snapshot) -> Result<ChangeSet> {
        let previous = self.store.load()?;
        Ok(diff(&previous, current, self.policy))
    }

    /// Overwrite the committed snapshot with `current`.
    pub fn commit(&self, current: &Snapshot) -> Result<()> {
        self.store.save(current)
    }

    /// Diff, then commit. Nothing is written if the diff could not be computed.
    pub fn detect(&self, current: &Snapshot) -> Result<ChangeSet> {
        let changes = self.preview(current)?;
        self.commit(current)?;
        info!(
            "{} changes ({} new, {} modified, {} removed)",
            changes.len(),
            changes.count_kind(ChangeKind::Added),
            changes.count_kind(ChangeKind::Modified),
            changes.count_kind(ChangeKind::Removed)
        );
        Ok(changes)
    }
}
