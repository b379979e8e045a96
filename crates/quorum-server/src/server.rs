//! # server
//!
//! why: a node needs a clock, a socket and a single thread that owns its state
//! relations: owns a quorum_core::Node, feeds it from transport.rs queues, stores through FileStorage
//! what: ServerConfig, Server (bind, join, spawn), ServerHandle and the four worker loops

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use quorum_core::message::CommandResponse;
use quorum_core::{
    Cluster, Collaborators, Envelope, Node, NodeId, Outgoing, Persistence, RaftConfig,
    RaftMessage, RandomTimer,
};
use quorum_storage::{initial_metadata, FileStorage};
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::error::{Result, ServerError};
use crate::kv::KeyValueStore;
use crate::transport::ChannelTransmitter;
use crate::{is_timeout, is_unreachable, MAX_DATAGRAM_LEN};

/// How often blocked workers wake up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to start one node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub node_id: NodeId,
    /// Address to bind. Peers and clients reach the node here, so it must not
    /// be a wildcard address.
    pub address: String,
    /// Directory holding this node's metadata, log and snapshot.
    pub data_dir: PathBuf,
    pub raft: RaftConfig,
}

/// A node with its socket bound but no threads running yet.
pub struct Server {
    config: ServerConfig,
    socket: UdpSocket,
    address: String,
}

impl Server {
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.address.as_str())?;
        let address = socket.local_addr()?.to_string();
        info!(node_id = config.node_id, %address, data_dir = %config.data_dir.display(), "bound");
        Ok(Self {
            config,
            socket,
            address,
        })
    }

    /// The address the node advertises to its cluster.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Ask the leader reachable through `seeds` to add this node, and record
    /// the membership it answers with so the node starts out knowing its peers.
    pub fn join(&self, seeds: &[String]) -> Result<Cluster> {
        let response = Client::new(seeds.iter().cloned()).join(self.config.node_id, &self.address)?;
        let cluster = match response {
            CommandResponse {
                success: true,
                cluster: Some(cluster),
                ..
            } => cluster,
            _ => return Err(ServerError::Rejected("join".to_string())),
        };

        info!(node_id = self.config.node_id, members = cluster.len(), "joined cluster");
        let mut storage = self.storage()?;
        let mut metadata = storage.read_metadata()?;
        metadata.cluster = cluster.clone();
        metadata.snapshot_cluster = Some(cluster.clone());
        storage.save_metadata(&metadata)?;
        Ok(cluster)
    }

    /// Start the timer, receiver, sender and processor threads.
    pub fn spawn(self) -> Result<ServerHandle> {
        let storage = self.storage()?;
        let Self {
            config,
            socket,
            address,
        } = self;

        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let send_socket = socket.try_clone()?;
        let (inbound_tx, inbound_rx) = unbounded::<Envelope>();
        let (outbound_tx, outbound_rx) = unbounded::<Outgoing>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis(config.raft.heartbeat_interval.max(1));

        let transmitter = ChannelTransmitter::new(address.clone(), inbound_tx.clone(), outbound_tx);
        let mut threads = Vec::with_capacity(4);

        threads.push(spawn_worker("timer", &shutdown, {
            let inbound = inbound_tx.clone();
            let shutdown = Arc::clone(&shutdown);
            move || timer_loop(interval, inbound, shutdown)
        })?);
        threads.push(spawn_worker("receiver", &shutdown, {
            let shutdown = Arc::clone(&shutdown);
            move || receiver_loop(socket, inbound_tx, shutdown)
        })?);
        threads.push(spawn_worker("sender", &shutdown, {
            let shutdown = Arc::clone(&shutdown);
            move || sender_loop(send_socket, outbound_rx, shutdown)
        })?);
        threads.push(spawn_worker("processor", &shutdown, {
            let shutdown = Arc::clone(&shutdown);
            let node_id = config.node_id;
            let raft = config.raft.clone();
            move || processor_loop(node_id, raft, transmitter, storage, inbound_rx, shutdown)
        })?);

        Ok(ServerHandle {
            address,
            shutdown,
            threads,
        })
    }

    /// Run until a worker fails.
    pub fn run(self) -> Result<()> {
        self.spawn()?.wait()
    }

    fn storage(&self) -> Result<FileStorage> {
        let initial = initial_metadata(self.config.node_id, self.address.as_str());
        Ok(FileStorage::new(&self.config.data_dir, initial)?)
    }
}

/// Running worker threads of one node.
pub struct ServerHandle {
    address: String,
    shutdown: Arc<AtomicBool>,
    threads: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl ServerHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Stop every worker and wait for them.
    pub fn shutdown(self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.wait()
    }

    /// Block until all workers have stopped, returning the first failure.
    pub fn wait(self) -> Result<()> {
        let mut failure = None;
        for (name, thread) in self.threads {
            let result = thread
                .join()
                .map_err(|_| ServerError::ThreadPanicked(name))
                .and_then(|result| result);
            if let Err(e) = result {
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

/// Spawn a named worker. Whichever worker stops first, for any reason, stops
/// the rest.
fn spawn_worker<F>(
    name: &'static str,
    shutdown: &Arc<AtomicBool>,
    body: F,
) -> Result<(&'static str, JoinHandle<Result<()>>)>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let shutdown = Arc::clone(shutdown);
    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = body();
            if let Err(e) = &result {
                error!(thread = name, error = %e, "worker failed, stopping server");
            }
            shutdown.store(true, Ordering::Relaxed);
            result
        })?;
    Ok((name, thread))
}

fn stopping(shutdown: &AtomicBool) -> bool {
    shutdown.load(Ordering::Relaxed)
}

fn timer_loop(interval: Duration, inbound: Sender<Envelope>, shutdown: Arc<AtomicBool>) -> Result<()> {
    while !stopping(&shutdown) {
        thread::sleep(interval);
        if inbound.send(Envelope::tick()).is_err() {
            break;
        }
    }
    Ok(())
}

fn receiver_loop(
    socket: UdpSocket,
    inbound: Sender<Envelope>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    while !stopping(&shutdown) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) => continue,
            Err(e) if is_unreachable(&e) => {
                debug!(error = %e, "peer unreachable");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        // a datagram that is not a message at all is fatal
        let Some(mut envelope) = Envelope::decode(&buf[..len])? else {
            continue;
        };
        stamp_client(&mut envelope, from);
        debug!(kind = envelope.message.kind(), %from, "received");

        if inbound.send(envelope).is_err() {
            break;
        }
    }
    Ok(())
}

/// Replace the reply address of a client request with where it actually came from.
pub fn stamp_client(envelope: &mut Envelope, from: SocketAddr) {
    match &mut envelope.message {
        RaftMessage::Command(command) => command.client = from.to_string(),
        RaftMessage::Query(query) => query.client = from.to_string(),
        _ => {}
    }
}

fn sender_loop(
    socket: UdpSocket,
    outbound: Receiver<Outgoing>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    while !stopping(&shutdown) {
        let Outgoing { to, envelope } = match outbound.recv_timeout(POLL_INTERVAL) {
            Ok(outgoing) => outgoing,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let kind = envelope.message.kind();

        let Some(target) = resolve(&to) else {
            warn!(kind, to = %to, "unknown destination, dropping");
            continue;
        };
        let raw = envelope.encode()?;
        match socket.send_to(&raw, target) {
            Ok(_) => debug!(kind, to = %to, bytes = raw.len(), "sent"),
            Err(e) => warn!(kind, to = %to, error = %e, "send failed, dropping"),
        }
    }
    Ok(())
}

fn resolve(address: &str) -> Option<SocketAddr> {
    address.to_socket_addrs().ok()?.next()
}

fn processor_loop(
    node_id: NodeId,
    raft: RaftConfig,
    transmitter: ChannelTransmitter,
    storage: FileStorage,
    inbound: Receiver<Envelope>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    // collaborators are not Send, so the node is built on the thread that owns it
    let timer = RandomTimer::from_config(&raft);
    let mut node = Node::new(
        node_id,
        raft,
        Collaborators {
            transmitter: Box::new(transmitter),
            timer: Box::new(timer),
            persistence: Box::new(storage),
            handler: Box::new(KeyValueStore::new()),
        },
    )?;

    while !stopping(&shutdown) {
        let envelope = match inbound.recv_timeout(POLL_INTERVAL) {
            Ok(envelope) => envelope,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let kind = envelope.message.kind();
        let from = envelope.peer;

        node.dispatch(envelope)?;

        debug!(
            kind,
            ?from,
            state = ?node.state(),
            term = node.current_term(),
            commit_index = node.log().last_commit(),
            expires_in_ms = node.time_until_timeout().as_millis() as u64,
            "processed"
        );
    }
    info!(node_id, "processor stopped");
    Ok(())
}
