//! # comprehensive storage tests
//!
//! why: verify persisted state is exactly what a restarting node reads back
//! relations: tests quorum-storage, and quorum-core nodes running on top of it
//! what: in-memory and file persistence, atomic writes, crash recovery, edge cases

use std::fs;

use quorum_core::message::ClientCommand;
use quorum_core::{
    Collaborators, Envelope, Handler, LogEntry, Metadata, Node, NodeState, Outbox, Outcome,
    Persistence, RaftConfig, RaftMessage, RandomTimer, Snapshot, SnapshotMeta, StoredLog,
};
use quorum_storage::{initial_metadata, FileStorage, InMemoryStorage};
use tempfile::tempdir;

fn initial() -> Metadata {
    initial_metadata(1, "127.0.0.1:2361")
}

fn snapshot(index: u64, term: u64, data: &[u8]) -> Snapshot {
    Snapshot {
        last_included_index: index,
        last_included_term: term,
        data: data.to_vec(),
    }
}

// =============================================================================
// SECTION 1: IN-MEMORY STORAGE TESTS
// =============================================================================

mod in_memory {
    use super::*;

    #[test]
    fn new_storage_has_default_values() {
        let storage = InMemoryStorage::new(initial());

        assert_eq!(storage.read_metadata().unwrap(), initial());
        assert_eq!(storage.read_log_entries().unwrap(), StoredLog::default());
        assert_eq!(storage.read_snapshot().unwrap().last_included_index, 0);
    }

    #[test]
    fn overwrite_metadata() {
        let mut storage = InMemoryStorage::new(initial());
        let mut metadata = initial();

        metadata.current_term = 1;
        metadata.voted_for = Some(1);
        storage.save_metadata(&metadata).unwrap();
        metadata.current_term = 5;
        metadata.voted_for = None;
        storage.save_metadata(&metadata).unwrap();

        let read = storage.read_metadata().unwrap();
        assert_eq!(read.current_term, 5);
        assert_eq!(read.voted_for, None);
    }

    #[test]
    fn snapshot_round_trips() {
        let mut storage = InMemoryStorage::new(initial());
        storage.save_snapshot(&snapshot(4, 2, b"state")).unwrap();

        assert_eq!(storage.read_snapshot().unwrap(), snapshot(4, 2, b"state"));
    }
}

// =============================================================================
// SECTION 2: FILE STORAGE TESTS
// =============================================================================

mod file_storage {
    use super::*;

    #[test]
    fn create_storage_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node-1");

        let storage = FileStorage::new(&path, initial()).unwrap();

        assert!(path.exists());
        assert_eq!(storage.dir(), path.as_path());
    }

    #[test]
    fn save_creates_meta_file() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path(), initial()).unwrap();

        storage.save_metadata(&initial()).unwrap();

        assert!(dir.path().join("meta.json").exists());
    }

    #[test]
    fn log_keeps_its_first_index() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path(), initial()).unwrap();
        let entries = vec![
            LogEntry::command(2, "set a=1", "127.0.0.1:9000"),
            LogEntry::config(2, initial().cluster),
        ];

        storage.save_log_entries(6, &entries).unwrap();

        let log = storage.read_log_entries().unwrap();
        assert_eq!(log.first_index, 6);
        assert_eq!(log.entries, entries);
    }

    #[test]
    fn saving_a_shorter_log_replaces_the_old_one() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path(), initial()).unwrap();
        storage
            .save_log_entries(1, &[LogEntry::noop(1), LogEntry::noop(1), LogEntry::noop(1)])
            .unwrap();

        storage.save_log_entries(1, &[LogEntry::noop(1)]).unwrap();

        assert_eq!(storage.read_log_entries().unwrap().entries.len(), 1);
    }

    #[test]
    fn snapshot_round_trips_binary_data() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path(), initial()).unwrap();
        let data: Vec<u8> = (0..=255).collect();

        storage.save_snapshot(&snapshot(9, 3, &data)).unwrap();

        assert_eq!(storage.read_snapshot().unwrap(), snapshot(9, 3, &data));
    }
}

// =============================================================================
// SECTION 3: ATOMIC WRITE TESTS
// =============================================================================

mod atomic_writes {
    use super::*;

    #[test]
    fn files_are_valid_json() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path(), initial()).unwrap();
        storage.save_metadata(&initial()).unwrap();
        storage.save_log_entries(1, &[LogEntry::noop(1)]).unwrap();
        storage.save_snapshot(&snapshot(0, 0, b"")).unwrap();

        for name in ["meta.json", "log.json", "snapshot.json"] {
            let contents = fs::read_to_string(dir.path().join(name)).unwrap();
            let parsed: Result<serde_json::Value, _> = serde_json::from_str(&contents);
            assert!(parsed.is_ok(), "{name} is not json");
        }
    }

    #[test]
    fn no_temp_files_remain() {
        let dir = tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path(), initial()).unwrap();
        for term in 1..5 {
            let metadata = Metadata {
                current_term: term,
                ..initial()
            };
            storage.save_metadata(&metadata).unwrap();
            storage.save_log_entries(1, &[LogEntry::noop(term)]).unwrap();
        }

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}

// =============================================================================
// SECTION 4: CRASH RECOVERY TESTS
// =============================================================================

mod crash_recovery {
    use super::*;

    /// Counts applied commands; snapshots are the count.
    #[derive(Default)]
    struct Counter {
        applied: u64,
        boundary: SnapshotMeta,
    }

    impl Handler for Counter {
        fn on_command(&mut self, _command: &str) -> Outcome {
            self.applied += 1;
            Outcome::ok(self.applied)
        }

        fn on_query(&mut self, _query: &str) -> Outcome {
            Outcome::ok(self.applied)
        }

        fn take_snapshot(&mut self, meta: SnapshotMeta) -> quorum_core::Result<Vec<u8>> {
            self.boundary = meta;
            Ok(serde_json::to_vec(&self.applied)?)
        }

        fn restore(&mut self, snapshot: &Snapshot) -> quorum_core::Result<()> {
            self.applied = serde_json::from_slice(&snapshot.data)?;
            self.boundary = snapshot.meta();
            Ok(())
        }

        fn last_included(&self) -> SnapshotMeta {
            self.boundary
        }
    }

    fn start(storage: FileStorage, config: RaftConfig) -> Node {
        Node::new(
            1,
            config.clone(),
            Collaborators {
                transmitter: Box::new(Outbox::new()),
                timer: Box::new(RandomTimer::from_config(&config)),
                persistence: Box::new(storage),
                handler: Box::new(Counter::default()),
            },
        )
        .unwrap()
    }

    #[test]
    fn term_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let mut storage = FileStorage::new(dir.path(), initial()).unwrap();
            let metadata = Metadata {
                current_term: 10,
                voted_for: Some(1),
                ..initial()
            };
            storage.save_metadata(&metadata).unwrap();
        }

        let storage = FileStorage::new(dir.path(), initial()).unwrap();
        let metadata = storage.read_metadata().unwrap();
        assert_eq!(metadata.current_term, 10);
        assert_eq!(metadata.voted_for, Some(1));
    }

    #[test]
    fn single_node_leader_resumes_after_restart() {
        let dir = tempdir().unwrap();
        let config = RaftConfig {
            election_timeout_min: 0,
            election_timeout_max: 0,
            ..RaftConfig::default()
        };

        {
            let mut node = start(FileStorage::new(dir.path(), initial()).unwrap(), config.clone());
            std::thread::sleep(std::time::Duration::from_millis(5));
            node.dispatch(Envelope::tick()).unwrap();
            assert_eq!(node.state(), NodeState::Leader);

            let command = ClientCommand::new("incr", "127.0.0.1:9000");
            node.dispatch(Envelope::anonymous(RaftMessage::Command(command))).unwrap();
            assert_eq!(node.log().last_commit(), 2);
        }

        let node = start(FileStorage::new(dir.path(), initial()).unwrap(), config);
        assert_eq!(node.state(), NodeState::Follower);
        assert_eq!(node.current_term(), 1);
        assert_eq!(node.voted_for(), Some(1));
        assert_eq!(node.log().last_index(), 2);
    }

    #[test]
    fn compacted_node_restarts_from_snapshot() {
        let dir = tempdir().unwrap();
        let config = RaftConfig {
            election_timeout_min: 0,
            election_timeout_max: 0,
            max_log_entries: 2,
            ..RaftConfig::default()
        };

        {
            let mut node = start(FileStorage::new(dir.path(), initial()).unwrap(), config.clone());
            std::thread::sleep(std::time::Duration::from_millis(5));
            node.dispatch(Envelope::tick()).unwrap();
            for _ in 0..4 {
                let command = ClientCommand::new("incr", "127.0.0.1:9000");
                node.dispatch(Envelope::anonymous(RaftMessage::Command(command))).unwrap();
            }
            assert!(node.log().first_index() > 1);
        }

        let storage = FileStorage::new(dir.path(), initial()).unwrap();
        let snapshot = storage.read_snapshot().unwrap();
        let stored = storage.read_log_entries().unwrap();
        assert_eq!(stored.first_index, snapshot.last_included_index + 1);

        let node = start(storage, config);
        assert_eq!(node.log().first_index(), snapshot.last_included_index + 1);
        assert_eq!(node.log().last_index(), 5);
        assert_eq!(node.log().last_commit(), snapshot.last_included_index);
    }

    #[test]
    fn untrimmed_log_is_lined_up_with_snapshot() {
        // crash after the snapshot was written but before the log was trimmed
        let dir = tempdir().unwrap();
        {
            let mut storage = FileStorage::new(dir.path(), initial()).unwrap();
            storage
                .save_log_entries(1, &[LogEntry::noop(1), LogEntry::noop(1), LogEntry::noop(1)])
                .unwrap();
            storage
                .save_snapshot(&snapshot(2, 1, &serde_json::to_vec(&0u64).unwrap()))
                .unwrap();
        }

        let node = start(
            FileStorage::new(dir.path(), initial()).unwrap(),
            RaftConfig::default(),
        );
        assert_eq!(node.log().first_index(), 3);
        assert_eq!(node.log().last_index(), 3);
    }
}

// =============================================================================
// SECTION 5: TRAIT POLYMORPHISM TESTS
// =============================================================================

mod trait_polymorphism {
    use super::*;

    fn exercise(storage: &mut dyn Persistence) {
        let metadata = Metadata {
            current_term: 3,
            voted_for: Some(2),
            ..initial()
        };
        storage.save_metadata(&metadata).unwrap();
        storage.save_log_entries(4, &[LogEntry::noop(3)]).unwrap();
        storage.save_snapshot(&snapshot(3, 2, b"s")).unwrap();

        assert_eq!(storage.read_metadata().unwrap(), metadata);
        assert_eq!(storage.read_log_entries().unwrap().first_index, 4);
        assert_eq!(storage.read_snapshot().unwrap().last_included_index, 3);
    }

    #[test]
    fn in_memory_implements_trait() {
        exercise(&mut InMemoryStorage::new(initial()));
    }

    #[test]
    fn file_storage_implements_trait() {
        let dir = tempdir().unwrap();
        exercise(&mut FileStorage::new(dir.path(), initial()).unwrap());
    }
}
