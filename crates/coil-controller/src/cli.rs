//! Command-line interface of the `coil` binary

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use coil_common::telemetry::LogFormat;
use coil_common::{DEFAULT_KEY_PREFIX, DEFAULT_POOL};
use coil_store::config::DEFAULT_ENDPOINT;
use coil_store::{StoreBackend, StoreConfig};
use ipnet::IpNet;

/// Coil - IP address management for Kubernetes nodes
#[derive(Parser, Debug)]
#[command(name = "coil", version, about, long_about = None)]
pub struct Cli {
    /// Store connection settings
    #[command(flatten)]
    pub store: StoreArgs,

    /// Log output format (json or text)
    #[arg(long, env = "COIL_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the BlockRequest CRD manifest and exit
    Crd,

    /// Manage address pools
    #[command(subcommand)]
    Pool(PoolCommand),

    /// Grant and release blocks
    #[command(subcommand)]
    Block(BlockCommand),
}

/// Store connection arguments, shared by every command
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Store backend (etcd or memory)
    #[arg(long = "store-backend", env = "COIL_STORE_BACKEND", default_value = "etcd", global = true)]
    pub backend: StoreBackend,

    /// Comma-separated etcd endpoints
    #[arg(
        long = "etcd-endpoints",
        env = "COIL_ETCD_ENDPOINTS",
        value_delimiter = ',',
        default_value = DEFAULT_ENDPOINT,
        global = true
    )]
    pub endpoints: Vec<String>,

    /// Prefix of every key Coil writes
    #[arg(long = "etcd-prefix", env = "COIL_ETCD_PREFIX", default_value = DEFAULT_KEY_PREFIX, global = true)]
    pub prefix: String,

    /// etcd user name
    #[arg(long = "etcd-username", env = "COIL_ETCD_USERNAME", global = true)]
    pub username: Option<String>,

    /// etcd password
    #[arg(long = "etcd-password", env = "COIL_ETCD_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Deadline for each store request in seconds
    #[arg(long, env = "COIL_REQUEST_TIMEOUT_SECS", default_value = "10", global = true)]
    pub request_timeout_secs: u64,
}

impl StoreArgs {
    /// Build the store configuration from the arguments
    pub fn to_config(&self) -> StoreConfig {
        StoreConfig {
            backend: self.backend,
            endpoints: self.endpoints.clone(),
            key_prefix: self.prefix.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            username: self.username.clone(),
            password: self.password.clone(),
            ..Default::default()
        }
    }
}

/// Pool administration
#[derive(Subcommand, Debug, Clone)]
pub enum PoolCommand {
    /// Create a pool with its first subnet
    Create {
        /// Pool name
        name: String,

        /// First subnet of the pool, in network form (e.g. 10.0.0.0/16)
        #[arg(long)]
        subnet: IpNet,

        /// Number of addresses per block (a power of two)
        #[arg(long, default_value = "32")]
        block_size: u32,
    },

    /// Append a subnet to a pool
    AddSubnet {
        /// Pool name
        name: String,

        /// Subnet to add, in network form
        subnet: IpNet,
    },

    /// Print a pool as JSON
    Show {
        /// Pool name
        name: String,
    },

    /// List every pool
    List,

    /// Delete a pool with all its subnets and blocks
    Remove {
        /// Pool name
        name: String,
    },
}

/// Block administration
#[derive(Subcommand, Debug, Clone)]
pub enum BlockCommand {
    /// Grant a free block of a pool to a node
    Acquire {
        /// Node receiving the block
        #[arg(long)]
        node: String,

        /// Pool to allocate from
        #[arg(long, default_value = DEFAULT_POOL)]
        pool: String,

        /// Wait up to this many seconds for capacity if the pool is exhausted
        #[arg(long)]
        wait_secs: Option<u64>,

        /// While waiting, reconcile BlockRequests so that processed requests
        /// for the pool wake the wait
        #[arg(long, env = "COIL_WATCH_BLOCK_REQUESTS", requires = "wait_secs")]
        watch_requests: bool,

        /// Interval in seconds after which a waiting allocation retries unprompted
        #[arg(long, env = "COIL_RESYNC_SECS", default_value = "30")]
        resync_secs: u64,
    },

    /// Return a block held by a node
    Release {
        /// Node holding the block
        #[arg(long)]
        node: String,

        /// Pool the block belongs to
        #[arg(long, default_value = DEFAULT_POOL)]
        pool: String,

        /// Block to release (e.g. 10.0.0.32/27)
        block: IpNet,
    },

    /// List the blocks a node holds
    List {
        /// Node to inspect
        #[arg(long)]
        node: String,

        /// Pool to inspect
        #[arg(long, default_value = DEFAULT_POOL)]
        pool: String,
    },
}
