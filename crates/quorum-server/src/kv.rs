//! # kv
//!
//! why: give the replicated log something to drive, and clients something to read
//! relations: implements quorum_core::Handler; built per node by server.rs
//! what: KeyValueStore applying `set k=v` commands and answering `get k` queries

use std::collections::BTreeMap;

use quorum_core::{Error, Handler, Outcome, Result, Snapshot, SnapshotMeta};
use serde_json::{Map, Value};
use tracing::debug;

/// An ordered string map replicated through the log.
///
/// Commands are `set <key>=<value>`, queries are `get <key>`. Anything else
/// is answered with `success: false` and leaves the map untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValueStore {
    data: BTreeMap<String, String>,
    boundary: SnapshotMeta,
}

impl KeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Handler for KeyValueStore {
    fn on_command(&mut self, command: &str) -> Outcome {
        let Some(("set", args)) = split_verb(command) else {
            debug!(command, "unknown command");
            return Outcome::failed();
        };
        match args.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                debug!(key, value, "set");
                self.data.insert(key.to_string(), value.to_string());
                Outcome {
                    success: true,
                    data: None,
                }
            }
            _ => Outcome::failed(),
        }
    }

    fn on_query(&mut self, query: &str) -> Outcome {
        match split_verb(query) {
            Some(("get", key)) => {
                let value = self.get(key).map_or(Value::Null, Value::from);
                let mut reply = Map::new();
                reply.insert(key.to_string(), value);
                Outcome::ok(reply)
            }
            _ => Outcome::failed(),
        }
    }

    fn take_snapshot(&mut self, meta: SnapshotMeta) -> Result<Vec<u8>> {
        let data = serde_json::to_vec(&self.data)?;
        self.boundary = meta;
        Ok(data)
    }

    fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.data = serde_json::from_slice(&snapshot.data)
            .map_err(|e| Error::Snapshot(format!("key-value snapshot: {e}")))?;
        self.boundary = snapshot.meta();
        debug!(
            keys = self.data.len(),
            last_included_index = self.boundary.last_included_index,
            "restored key-value store"
        );
        Ok(())
    }

    fn last_included(&self) -> SnapshotMeta {
        self.boundary
    }
}

/// Split `verb args` on the first run of whitespace.
fn split_verb(input: &str) -> Option<(&str, &str)> {
    let (verb, args) = input.trim().split_once(char::is_whitespace)?;
    Some((verb, args.trim()))
}
