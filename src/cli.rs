//! Command line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rcctl::topology::NodeAddress;

/// rcctl: create, grow, shrink, reshard and check a Redis Cluster.
#[derive(Parser, Debug)]
#[command(name = "rcctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// User to authenticate as (overrides config).
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Password to authenticate with (overrides config).
    #[arg(short = 'a', long, global = true)]
    pub password: Option<String>,

    /// Log level (overrides config; RUST_LOG takes precedence).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format (text, json).
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bootstrap a new cluster from empty nodes.
    Create(CreateArgs),
    /// Add a node to a running cluster.
    AddNode(AddNodeArgs),
    /// Move slots from one master to another.
    Reshard(ReshardArgs),
    /// Remove a node from the cluster.
    DelNode(DelNodeArgs),
    /// Check slot coverage, link health and cross-node agreement.
    Check(CheckArgs),
    /// Write numbered test keys into the cluster.
    PopulateTestData(PopulateArgs),
}

/// Arguments for the create command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Replicas per master.
    #[arg(short, long, default_value_t = 0)]
    pub replicas: usize,

    /// Nodes to build the cluster from (host:port). The first ones become
    /// masters.
    #[arg(required = true, num_args = 1..)]
    pub nodes: Vec<NodeAddress>,
}

/// Arguments for the add-node command.
#[derive(Args, Debug)]
pub struct AddNodeArgs {
    /// Node to add (host:port).
    pub new_node: NodeAddress,

    /// Any node already in the cluster (host:port).
    pub existing_node: NodeAddress,

    /// Attach the new node as a replica of this master.
    #[arg(long)]
    pub master_id: Option<String>,

    /// Poll the new node's listing until it has joined instead of waiting a
    /// fixed delay.
    #[arg(long)]
    pub wait_for_join: bool,
}

/// Arguments for the reshard command.
#[derive(Args, Debug)]
pub struct ReshardArgs {
    /// Source master node id.
    #[arg(long = "from")]
    pub from_id: String,

    /// Destination master node id.
    #[arg(long = "to")]
    pub to_id: String,

    /// Number of slots to move.
    #[arg(long)]
    pub slots: usize,

    /// Keys fetched per drain round (defaults to cluster.default_batch_size).
    #[arg(long)]
    pub pipeline: Option<usize>,

    /// Any node of the cluster (host:port).
    pub entry: NodeAddress,
}

/// Arguments for the del-node command.
#[derive(Args, Debug)]
pub struct DelNodeArgs {
    /// Any node of the cluster (host:port).
    pub entry: NodeAddress,

    /// Id of the node to remove.
    pub node_id: String,
}

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Node whose view is the reference (host:port).
    pub entry: NodeAddress,
}

/// Arguments for the populate-test-data command.
#[derive(Args, Debug)]
pub struct PopulateArgs {
    /// Number of keys to write (1 to 10,000,000).
    #[arg(long = "num-of-keys", default_value_t = 1000)]
    pub num_of_keys: u64,

    /// Any node of the cluster (host:port).
    pub entry: NodeAddress,
}

/// Output format for summaries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
