//! # comprehensive server tests
//!
//! why: the key-value handler, sockets and threads only prove themselves with a node behind them
//! relations: tests quorum-server on top of quorum-core and quorum-storage
//! what: key-value store driven by a node, udp servers, membership through join

use std::net::UdpSocket;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use quorum_core::message::{ClientCommand, ClientQuery, CommandResponse, QueryResponse};
use quorum_core::{
    Collaborators, Envelope, LogEntry, Node, NodeId, NodeState, Outbox, Persistence, RaftConfig,
    RaftMessage, RandomTimer,
};
use quorum_server::{Client, KeyValueStore, Server, ServerConfig, ServerError, ServerHandle};
use quorum_storage::{initial_metadata, FileStorage, InMemoryStorage};
use serde_json::json;
use tempfile::tempdir;

const CLIENT: &str = "127.0.0.1:9999";

fn memory() -> Box<dyn Persistence> {
    Box::new(InMemoryStorage::new(initial_metadata(1, "127.0.0.1:2361")))
}

fn start_node(persistence: Box<dyn Persistence>, config: RaftConfig) -> (Node, Outbox) {
    let outbox = Outbox::new();
    let node = Node::new(
        1,
        config,
        Collaborators {
            transmitter: Box::new(outbox.clone()),
            timer: Box::new(RandomTimer::new(0, 0)),
            persistence,
            handler: Box::new(KeyValueStore::new()),
        },
    )
    .unwrap();
    (node, outbox)
}

/// A lone node wins its election on the first tick after its timeout.
fn elect(node: &mut Node) {
    thread::sleep(Duration::from_millis(5));
    node.dispatch(Envelope::tick()).unwrap();
    assert_eq!(node.state(), NodeState::Leader);
}

fn command(node: &mut Node, outbox: &Outbox, command: &str) -> CommandResponse {
    node.dispatch(Envelope::anonymous(RaftMessage::Command(ClientCommand::new(
        command, CLIENT,
    ))))
    .unwrap();
    outbox
        .drain()
        .into_iter()
        .filter(|outgoing| outgoing.to == CLIENT)
        .find_map(|outgoing| match outgoing.envelope.message {
            RaftMessage::CommandResponse(response) => Some(response),
            _ => None,
        })
        .expect("command response")
}

fn query(node: &mut Node, outbox: &Outbox, query: &str) -> QueryResponse {
    node.dispatch(Envelope::anonymous(RaftMessage::Query(ClientQuery::new(
        query, CLIENT,
    ))))
    .unwrap();
    outbox
        .drain()
        .into_iter()
        .filter(|outgoing| outgoing.to == CLIENT)
        .find_map(|outgoing| match outgoing.envelope.message {
            RaftMessage::QueryResponse(response) => Some(response),
            _ => None,
        })
        .expect("query response")
}

// =============================================================================
// SECTION 1: KEY-VALUE STORE BEHIND A NODE
// =============================================================================

mod key_value_node {
    use super::*;

    #[test]
    fn committed_set_is_visible_to_get() {
        let (mut node, outbox) = start_node(memory(), RaftConfig::default());
        elect(&mut node);

        let response = command(&mut node, &outbox, "set color=blue");
        assert!(response.success);
        assert_eq!(response.applied_index, Some(2));

        let response = query(&mut node, &outbox, "get color");
        assert!(response.success);
        assert_eq!(response.data, Some(json!({ "color": "blue" })));
    }

    #[test]
    fn rejected_command_still_takes_a_log_slot() {
        let (mut node, outbox) = start_node(memory(), RaftConfig::default());
        elect(&mut node);

        let response = command(&mut node, &outbox, "delete color");

        assert!(!response.success);
        assert_eq!(node.log().last_commit(), 2);
    }

    #[test]
    fn linearizable_get_goes_through_the_log() {
        let config = RaftConfig {
            linearizable_reads: true,
            ..RaftConfig::default()
        };
        let (mut node, outbox) = start_node(memory(), config);
        elect(&mut node);
        command(&mut node, &outbox, "set a=1");

        let response = query(&mut node, &outbox, "get a");

        assert_eq!(response.data, Some(json!({ "a": "1" })));
        assert_eq!(response.applied_index, Some(3));
        assert_eq!(node.log().last_index(), 3);
    }

    #[test]
    fn restarted_node_rebuilds_the_store() {
        let dir = tempdir().unwrap();
        let config = RaftConfig {
            max_log_entries: 2,
            ..RaftConfig::default()
        };
        let storage = || {
            FileStorage::new(dir.path(), initial_metadata(1, "127.0.0.1:2361")).unwrap()
        };

        {
            let (mut node, outbox) = start_node(Box::new(storage()), config.clone());
            elect(&mut node);
            for entry in ["set a=1", "set b=2", "set c=3", "set a=4"] {
                assert!(command(&mut node, &outbox, entry).success);
            }
            assert!(node.log().first_index() > 1);
        }

        // snapshot restores part of the map, the new leader's commit replays the rest
        let (mut node, outbox) = start_node(Box::new(storage()), config);
        elect(&mut node);

        let response = query(&mut node, &outbox, "get a");
        assert_eq!(response.data, Some(json!({ "a": "4" })));
        let response = query(&mut node, &outbox, "get c");
        assert_eq!(response.data, Some(json!({ "c": "3" })));
    }
}

// =============================================================================
// SECTION 2: UDP SERVER TESTS
// =============================================================================

fn fast_config() -> RaftConfig {
    RaftConfig {
        election_timeout_min: 100,
        election_timeout_max: 200,
        heartbeat_interval: 20,
        ..RaftConfig::default()
    }
}

fn server_config(id: NodeId, dir: &Path) -> ServerConfig {
    ServerConfig {
        node_id: id,
        address: "127.0.0.1:0".to_string(),
        data_dir: dir.join(format!("node-{id}")),
        raft: fast_config(),
    }
}

fn start_server(id: NodeId, dir: &Path) -> ServerHandle {
    Server::bind(server_config(id, dir)).unwrap().spawn().unwrap()
}

fn wait_for_leader(client: &Client) -> (NodeId, String) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match client.leader() {
            Ok(leader) => return leader,
            Err(_) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Err(e) => panic!("no leader elected: {e}"),
        }
    }
}

/// Retry `op` until it succeeds or ten seconds pass.
fn eventually<T>(mut op: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(value) = op() {
            return value;
        }
        assert!(Instant::now() < deadline, "gave up waiting");
        thread::sleep(Duration::from_millis(50));
    }
}

mod udp_server {
    use super::*;

    #[test]
    fn single_node_serves_commands_and_queries() {
        let dir = tempdir().unwrap();
        let handle = start_server(1, dir.path());
        let client = Client::new([handle.address()]).with_timeout(Duration::from_secs(1));

        let (leader_id, leader_addr) = wait_for_leader(&client);
        assert_eq!(leader_id, 1);
        assert_eq!(leader_addr, handle.address());

        let response = client.command("set greeting=hello").unwrap();
        assert!(response.success);

        let response = client.query("get greeting").unwrap();
        assert_eq!(response.data, Some(json!({ "greeting": "hello" })));

        handle.shutdown().unwrap();
    }

    #[test]
    fn unknown_message_kinds_are_ignored() {
        let dir = tempdir().unwrap();
        let handle = start_server(1, dir.path());
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();

        socket
            .send_to(
                br#"{"peer":7,"message":{"message_type":"pre_vote","term":9}}"#,
                handle.address(),
            )
            .unwrap();

        let client = Client::new([handle.address()]).with_timeout(Duration::from_secs(1));
        assert_eq!(wait_for_leader(&client).0, 1);
        handle.shutdown().unwrap();
    }

    #[test]
    fn malformed_datagram_stops_the_node() {
        let dir = tempdir().unwrap();
        let handle = start_server(1, dir.path());
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();

        socket.send_to(b"definitely not json", handle.address()).unwrap();

        let err = handle.wait().unwrap_err();
        assert!(matches!(err, ServerError::Core(quorum_core::Error::Malformed(_))));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn shutdown_is_clean() {
        let dir = tempdir().unwrap();
        let handle = start_server(1, dir.path());
        thread::sleep(Duration::from_millis(50));

        assert!(handle.shutdown().is_ok());
    }
}

// =============================================================================
// SECTION 3: MEMBERSHIP THROUGH JOIN
// =============================================================================

mod membership {
    use super::*;

    #[test]
    fn joined_node_receives_replicated_commands() {
        let dir = tempdir().unwrap();
        let first = start_server(1, dir.path());
        let seeds = vec![first.address().to_string()];
        wait_for_leader(&Client::new(seeds.clone()).with_timeout(Duration::from_secs(1)));

        let second = Server::bind(server_config(2, dir.path())).unwrap();
        let cluster = second.join(&seeds).unwrap();
        assert_eq!(cluster.len(), 2);
        assert_eq!(cluster.get(&2).map(String::as_str), Some(second.address()));
        let second_address = second.address().to_string();
        let second = second.spawn().unwrap();

        let client = Client::new([first.address().to_string(), second_address.clone()])
            .with_timeout(Duration::from_secs(1));
        eventually(|| client.command("set shared=yes").ok().filter(|r| r.success));
        let response = client.query("get shared").unwrap();
        assert_eq!(response.data, Some(json!({ "shared": "yes" })));

        first.shutdown().unwrap();
        second.shutdown().unwrap();

        let initial = initial_metadata(2, second_address);
        let storage = FileStorage::new(dir.path().join("node-2"), initial).unwrap();
        assert_eq!(storage.read_metadata().unwrap().cluster, cluster);
        let replicated = storage.read_log_entries().unwrap().entries.into_iter().any(|entry| {
            matches!(
                entry,
                LogEntry::Command { command: Some(command), .. } if command == "set shared=yes"
            )
        });
        assert!(replicated);
    }

    #[test]
    fn leave_of_an_unknown_member_is_rejected() {
        let dir = tempdir().unwrap();
        let handle = start_server(1, dir.path());
        let client = Client::new([handle.address()]).with_timeout(Duration::from_secs(1));
        wait_for_leader(&client);

        let response = client.leave(42, "127.0.0.1:1").unwrap();

        assert!(!response.success);
        assert_eq!(response.cluster.map(|cluster| cluster.len()), Some(1));
        handle.shutdown().unwrap();
    }
}
