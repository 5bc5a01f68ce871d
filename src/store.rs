use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Result, ScrapeError};
use crate::model::Snapshot;

const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotFileOut<'a> {
    version: u32,
    records: &'a Snapshot,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFileIn {
    Versioned { version: u32, records: Snapshot },
    /// Flat map written before the version field existed.
    Legacy(Snapshot),
}

/// The last committed snapshot, as one pretty-printed UTF-8 JSON document.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empty snapshot when the file does not exist yet.
    pub fn load(&self) -> Result<Snapshot> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {}, starting empty", self.path.display());
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(ScrapeError::persistence(&self.path, e)),
        };

        let parsed: SnapshotFileIn =
            serde_json::from_str(&raw).map_err(|e| ScrapeError::persistence(&self.path, e))?;
        match parsed {
            SnapshotFileIn::Versioned { version, records } if version <= SCHEMA_VERSION => Ok(records),
            SnapshotFileIn::Versioned { version, .. } => Err(ScrapeError::persistence(
                &self.path,
                format!("written by a newer version (schema {})", version),
            )),
            SnapshotFileIn::Legacy(records) => Ok(records),
        }
    }

    /// Replace the stored snapshot. Written to a temp file next to the
    /// target and renamed over it, so a failed save leaves the old one intact.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| ScrapeError::persistence(&dir, e))?;

        let doc = SnapshotFileOut {
            version: SCHEMA_VERSION,
            records: snapshot,
        };
        let json =
            serde_json::to_string_pretty(&doc).map_err(|e| ScrapeError::persistence(&self.path, e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| ScrapeError::persistence(&dir, e))?;
        write_synced(&mut tmp, json.as_bytes()).map_err(|e| ScrapeError::persistence(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| ScrapeError::persistence(&self.path, e.error))?;

        info!("Snapshot saved: {} records -> {}", snapshot.len(), self.path.display());
        Ok(())
    }
}

fn write_synced(tmp: &mut NamedTempFile, bytes: &[u8]) -> std::io::Result<()> {
    tmp.write_all(bytes)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()
}
