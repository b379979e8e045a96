//! # quorum-storage
//!
//! why: a node's term, vote, log and snapshot must survive a crash
//! relations: implements quorum_core::Persistence, used by quorum-server for each node
//! what: FileStorage (json files in a directory), InMemoryStorage for testing

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use quorum_core::{
    Cluster, Index, LogEntry, Metadata, NodeId, Persistence, Result, Snapshot, StoredLog,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

const META_FILE: &str = "meta.json";
const LOG_FILE: &str = "log.json";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Metadata for a node that has never run: term 0, no vote, alone in its cluster.
pub fn initial_metadata(node_id: NodeId, address: impl Into<String>) -> Metadata {
    Metadata {
        current_term: 0,
        voted_for: None,
        cluster: Cluster::from([(node_id, address.into())]),
        snapshot_cluster: None,
    }
}

// -- file storage implementation --

/// File-based storage using std::fs
///
/// Keeps one node's state in a directory:
/// - meta.json: term, vote and membership
/// - log.json: the log suffix after the snapshot, with its first index
/// - snapshot.json: the latest snapshot
///
/// Every file is replaced atomically by writing a temp file, syncing it and
/// renaming it over the old one.
pub struct FileStorage {
    dir: PathBuf,
    initial: Metadata,
}

impl FileStorage {
    /// Open storage in `dir`, creating the directory if needed.
    ///
    /// `initial` is what `read_metadata` returns until metadata is first saved.
    pub fn new(dir: impl Into<PathBuf>, initial: Metadata) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, initial })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T> {
        let path = self.dir.join(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(default),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_atomic<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;

        let temp_path = self.dir.join(format!("{name}.tmp"));
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.dir.join(name))?;

        debug!(dir = %self.dir.display(), file = name, bytes = json.len(), "persisted");
        Ok(())
    }
}

impl Persistence for FileStorage {
    fn read_metadata(&self) -> Result<Metadata> {
        self.read_or(META_FILE, self.initial.clone())
    }

    fn read_log_entries(&self) -> Result<StoredLog> {
        self.read_or(LOG_FILE, StoredLog::default())
    }

    fn read_snapshot(&self) -> Result<Snapshot> {
        self.read_or(SNAPSHOT_FILE, Snapshot::default())
    }

    fn save_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        self.write_atomic(META_FILE, metadata)
    }

    fn save_log_entries(&mut self, first_index: Index, entries: &[LogEntry]) -> Result<()> {
        let log = StoredLog {
            first_index,
            entries: entries.to_vec(),
        };
        self.write_atomic(LOG_FILE, &log)
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.write_atomic(SNAPSHOT_FILE, snapshot)
    }
}

// -- in-memory storage implementation --

/// In-memory storage for testing
///
/// Stores all state in memory, no persistence across restarts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    metadata: Metadata,
    log: StoredLog,
    snapshot: Snapshot,
}

impl InMemoryStorage {
    pub fn new(initial: Metadata) -> Self {
        Self {
            metadata: initial,
            ..Self::default()
        }
    }
}

impl Persistence for InMemoryStorage {
    fn read_metadata(&self) -> Result<Metadata> {
        Ok(self.metadata.clone())
    }

    fn read_log_entries(&self) -> Result<StoredLog> {
        Ok(self.log.clone())
    }

    fn read_snapshot(&self) -> Result<Snapshot> {
        Ok(self.snapshot.clone())
    }

    fn save_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        self.metadata = metadata.clone();
        Ok(())
    }

    fn save_log_entries(&mut self, first_index: Index, entries: &[LogEntry]) -> Result<()> {
        self.log = StoredLog {
            first_index,
            entries: entries.to_vec(),
        };
        Ok(())
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.snapshot = snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn initial() -> Metadata {
        initial_metadata(1, "127.0.0.1:2361")
    }

    #[test]
    fn in_memory_storage_starts_from_initial_metadata() {
        let storage = InMemoryStorage::new(initial());
        let metadata = storage.read_metadata().unwrap();

        assert_eq!(metadata.current_term, 0);
        assert_eq!(metadata.voted_for, None);
        assert_eq!(metadata.cluster.get(&1).map(String::as_str), Some("127.0.0.1:2361"));
    }

    #[test]
    fn in_memory_storage_replaces_log() {
        let mut storage = InMemoryStorage::new(initial());
        storage
            .save_log_entries(1, &[LogEntry::noop(1), LogEntry::command(1, "set a=1", "c")])
            .unwrap();
        storage.save_log_entries(3, &[LogEntry::noop(2)]).unwrap();

        let log = storage.read_log_entries().unwrap();
        assert_eq!(log.first_index, 3);
        assert_eq!(log.entries, vec![LogEntry::noop(2)]);
    }

    #[test]
    fn file_storage_persists_term_and_vote() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path(), initial()).unwrap();

        let metadata = Metadata {
            current_term: 7,
            voted_for: Some(3),
            ..initial()
        };
        storage.save_metadata(&metadata).unwrap();

        assert_eq!(storage.read_metadata().unwrap(), metadata);
    }

    #[test]
    fn file_storage_missing_files_read_as_defaults() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), initial()).unwrap();

        assert_eq!(storage.read_metadata().unwrap(), initial());
        assert_eq!(storage.read_log_entries().unwrap(), StoredLog::default());
        assert_eq!(storage.read_snapshot().unwrap(), Snapshot::default());
    }

    #[test]
    fn metadata_without_snapshot_cluster_still_loads() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(META_FILE),
            r#"{"current_term":2,"voted_for":null,"cluster":{"1":"127.0.0.1:2361"}}"#,
        )
        .unwrap();
        let mut storage = FileStorage::new(dir.path(), initial()).unwrap();

        let mut metadata = storage.read_metadata().unwrap();
        assert_eq!(metadata.current_term, 2);
        assert_eq!(metadata.snapshot_cluster, None);

        metadata.snapshot_cluster = Some(Cluster::from([(1, "127.0.0.1:2361".to_string())]));
        storage.save_metadata(&metadata).unwrap();
        assert_eq!(storage.read_metadata().unwrap(), metadata);
    }

    #[test]
    fn file_storage_rejects_corrupt_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(META_FILE), "{ not json").unwrap();
        let storage = FileStorage::new(dir.path(), initial()).unwrap();

        assert!(storage.read_metadata().is_err());
    }
}
