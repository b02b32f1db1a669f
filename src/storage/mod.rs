//! Snapshot persistence
//!
//! One versioned JSON document per graph. Writes go to a temp file in the
//! destination directory and are renamed over the target, so a crash
//! mid-write leaves the previous snapshot intact.

mod snapshot;

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

pub use snapshot::{SnapshotEnvelope, SNAPSHOT_VERSION};

use crate::error::{GraphError, Result};

/// What [`WorldGraph::load`](crate::graph::WorldGraph::load) did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// No snapshot path configured or no file yet
    NoSnapshot,
    Restored {
        turn: u64,
        entities: usize,
        actions: usize,
    },
    /// The snapshot could not be used; the graph starts empty
    StartedFresh { reason: String },
}

/// Reads and atomically writes the snapshot file
#[derive(Debug, Clone, Default)]
pub struct PersistenceManager {
    path: Option<PathBuf>,
}

impl PersistenceManager {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write `envelope` via temp file + rename; no-op without a path
    pub fn write(&self, envelope: &SnapshotEnvelope) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        // Dropped (and removed) on any early return below
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, envelope)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;

        tmp.persist(path).map_err(|e| {
            GraphError::Persistence(format!("Cannot replace {}: {}", path.display(), e.error))
        })?;

        tracing::debug!(
            path = %path.display(),
            entities = envelope.entities.len(),
            actions = envelope.actions.len(),
            "Saved world graph"
        );
        Ok(())
    }

    /// Read the snapshot.
    ///
    /// `Ok(None)` when there is nothing to load. The version is checked before
    /// the rest of the document is interpreted.
    pub fn read(&self) -> Result<Option<SnapshotEnvelope>> {
        let Some(path) = self.path.as_deref() else {
            return Ok(None);
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let document: serde_json::Value = serde_json::from_str(&raw)?;
        let found = match document.get("version") {
            Some(serde_json::Value::String(v)) => v.clone(),
            Some(other) => other.to_string(),
            None => "<missing>".to_string(),
        };
        if found != SNAPSHOT_VERSION {
            return Err(GraphError::VersionMismatch {
                expected: SNAPSHOT_VERSION.to_string(),
                found,
            });
        }

        Ok(Some(serde_json::from_value(document)?))
    }

    /// Remove the snapshot file; `Ok(false)` if there was none
    pub fn delete(&self) -> Result<bool> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphConfig, IdentityConfig};
    use crate::graph::actions::ActionLog;
    use crate::graph::entities::EntityStore;
    use crate::lifecycle::TurnClock;
    use tempfile::TempDir;

    fn envelope() -> SnapshotEnvelope {
        let config = GraphConfig::default();
        SnapshotEnvelope::capture(
            &EntityStore::new(&IdentityConfig::default()),
            &ActionLog::new(),
            &TurnClock::new(chrono::Utc::now()),
            config.persisted_action_limit,
        )
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let manager = PersistenceManager::new(Some(dir.path().join("nested").join("graph.json")));
        let env = envelope();
        manager.write(&env).unwrap();

        let back = manager.read().unwrap().unwrap();
        assert_eq!(back, env);
        // Only the target remains in the directory
        let files: Vec<_> = std::fs::read_dir(dir.path().join("nested")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_missing_and_in_memory() {
        let dir = TempDir::new().unwrap();
        let manager = PersistenceManager::new(Some(dir.path().join("none.json")));
        assert!(manager.read().unwrap().is_none());
        assert!(!manager.delete().unwrap());

        let memory = PersistenceManager::default();
        memory.write(&envelope()).unwrap();
        assert!(memory.read().unwrap().is_none());
    }

    #[test]
    fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(&path, r#"{"version": "v6", "entities": {}}"#).unwrap();
        let manager = PersistenceManager::new(Some(path));
        assert!(matches!(
            manager.read(),
            Err(GraphError::VersionMismatch { found, .. }) if found == "v6"
        ));
    }

    #[test]
    fn test_failed_write_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.json");
        let manager = PersistenceManager::new(Some(path.clone()));
        manager.write(&envelope()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        // A directory squatting on the target makes the rename fail
        let blocked = PersistenceManager::new(Some(dir.path().to_path_buf()));
        assert!(blocked.write(&envelope()).is_err());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }
}
