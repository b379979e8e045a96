//! # quorum
//!
//! why: run a node, or talk to a running cluster, from the shell
//! relations: thin wrapper over quorum_server::{Server, Client}
//! what: clap command line, tracing setup, exit codes

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use quorum_core::{NodeId, RaftConfig};
use quorum_server::{Client, Result, Server, ServerConfig, ServerError, DEFAULT_UDP_PORT};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Replicated key-value store over raft
#[derive(Debug, Parser)]
#[command(name = "quorum", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a node
    Serve {
        /// Node id, unique in the cluster
        #[arg(long)]
        id: NodeId,

        /// Address to listen on and advertise to peers
        #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_UDP_PORT}"))]
        address: String,

        /// State directory [default: data/node-<id>]
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Join an existing cluster through these nodes before serving
        #[arg(long, value_name = "ADDR", value_delimiter = ',')]
        join: Vec<String>,

        #[command(flatten)]
        raft: RaftArgs,
    },

    /// Ask the cluster to remove a node
    Leave {
        /// Id of the node leaving
        #[arg(long)]
        id: NodeId,

        /// Address of the node leaving
        #[arg(long)]
        address: String,

        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Replicate a command, e.g. "set color=blue"
    Command {
        command: String,

        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Read from the leader, e.g. "get color"
    Query {
        query: String,

        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Print the current leader
    Leader {
        #[command(flatten)]
        cluster: ClusterArgs,
    },
}

#[derive(Debug, Args)]
struct ClusterArgs {
    /// Known node addresses
    #[arg(long = "node", value_name = "ADDR", value_delimiter = ',', required = true)]
    nodes: Vec<String>,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

impl ClusterArgs {
    fn client(&self) -> Client {
        Client::new(self.nodes.iter().cloned())
            .with_timeout(std::time::Duration::from_secs(self.timeout))
    }
}

#[derive(Debug, Args)]
struct RaftArgs {
    /// Tick and heartbeat interval in milliseconds
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Lower bound of the election timeout in milliseconds
    #[arg(long, default_value_t = 150)]
    election_timeout_min: u64,

    /// Upper bound of the election timeout in milliseconds
    #[arg(long, default_value_t = 300)]
    election_timeout_max: u64,

    /// Applied entries kept before compacting into a snapshot
    #[arg(long, default_value_t = 128)]
    max_log_entries: u64,

    /// Serve queries through the log
    #[arg(long)]
    linearizable_reads: bool,
}

impl From<RaftArgs> for RaftConfig {
    fn from(args: RaftArgs) -> Self {
        Self {
            election_timeout_min: args.election_timeout_min,
            election_timeout_max: args.election_timeout_max,
            heartbeat_interval: args.tick_ms,
            max_log_entries: args.max_log_entries,
            linearizable_reads: args.linearizable_reads,
            ..RaftConfig::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli) {
        error!(error = %e, "quorum failed");
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            id,
            address,
            data_dir,
            join,
            raft,
        } => {
            let config = ServerConfig {
                node_id: id,
                address,
                data_dir: data_dir.unwrap_or_else(|| PathBuf::from(format!("data/node-{id}"))),
                raft: raft.into(),
            };
            let server = Server::bind(config)?;
            if !join.is_empty() {
                server.join(&join)?;
            }
            info!(node_id = id, address = server.address(), "serving");
            server.run()
        }
        Commands::Leave {
            id,
            address,
            cluster,
        } => {
            let response = cluster.client().leave(id, &address)?;
            print_json(&response)?;
            if !response.success {
                return Err(ServerError::Rejected("leave".to_string()));
            }
            Ok(())
        }
        Commands::Command { command, cluster } => print_json(&cluster.client().command(&command)?),
        Commands::Query { query, cluster } => print_json(&cluster.client().query(&query)?),
        Commands::Leader { cluster } => {
            let (leader_id, leader_addr) = cluster.client().leader()?;
            println!("{leader_id} {leader_addr}");
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["quorum", "serve", "--id", "1"]).unwrap();
        let Commands::Serve {
            id,
            address,
            data_dir,
            join,
            raft,
        } = cli.command
        else {
            panic!("expected serve");
        };

        assert_eq!(id, 1);
        assert_eq!(address, "127.0.0.1:2358");
        assert_eq!(data_dir, None);
        assert!(join.is_empty());
        assert_eq!(RaftConfig::from(raft), RaftConfig::default());
    }

    #[test]
    fn join_accepts_a_list() {
        let cli = Cli::try_parse_from([
            "quorum",
            "serve",
            "--id",
            "3",
            "--address",
            "127.0.0.1:2360",
            "--join",
            "127.0.0.1:2358,127.0.0.1:2359",
        ])
        .unwrap();
        let Commands::Serve { join, .. } = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(join, vec!["127.0.0.1:2358", "127.0.0.1:2359"]);
    }

    #[test]
    fn command_needs_a_node() {
        assert!(Cli::try_parse_from(["quorum", "command", "set a=1"]).is_err());

        let cli =
            Cli::try_parse_from(["quorum", "command", "set a=1", "--node", "127.0.0.1:2358"])
                .unwrap();
        let Commands::Command { command, cluster } = cli.command else {
            panic!("expected command");
        };
        assert_eq!(command, "set a=1");
        assert_eq!(cluster.nodes, vec!["127.0.0.1:2358"]);
        assert_eq!(cluster.timeout, 5);
    }

    #[test]
    fn raft_flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "quorum",
            "serve",
            "--id",
            "2",
            "--tick-ms",
            "20",
            "--max-log-entries",
            "8",
            "--linearizable-reads",
        ])
        .unwrap();
        let Commands::Serve { raft, .. } = cli.command else {
            panic!("expected serve");
        };
        let config = RaftConfig::from(raft);

        assert_eq!(config.heartbeat_interval, 20);
        assert_eq!(config.max_log_entries, 8);
        assert!(config.linearizable_reads);
    }
}
