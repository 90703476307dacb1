use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Queue offline mutations and sync them when the network allows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local queue database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation exactly as given
    Enqueue(OperationArgs),
    /// Apply a local edit to the cached entity and queue it with the expected version
    Record(OperationArgs),
    /// Show queue counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued operations by status
    List {
        /// Status to list (pending, in-progress, completed, conflict, failed)
        #[arg(short, long, default_value = "pending")]
        status: String,
        /// Number of operations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one operation in full
    Show {
        /// Operation ID
        id: String,
    },
    /// Drain the queue until nothing is due
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep draining in the background until interrupted
    Watch,
    /// List unresolved conflicts, or past resolutions with --history
    Conflicts {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Show the resolution log instead
        #[arg(long)]
        history: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflict (keep-server, keep-local, merge)
    Resolve {
        /// Operation ID in CONFLICT
        id: String,
        /// Resolution strategy
        strategy: String,
        /// Merged JSON body (required for merge)
        #[arg(long, value_name = "JSON")]
        body: Option<String>,
    },
    /// Queue a failed operation again
    Retry {
        /// Operation ID in FAILED
        id: String,
    },
    /// Drop a failed operation
    Discard {
        /// Operation ID in FAILED
        id: String,
    },
    /// Delete completed operations older than the given age
    Prune {
        /// Minimum age in hours
        #[arg(long, default_value = "24")]
        older_than_hours: u32,
    },
    /// Inspect or seed the offline entity cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Manage the client config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct OperationArgs {
    /// HTTP method (POST, PUT, PATCH, DELETE)
    pub method: String,
    /// Target URL, relative to the API base URL unless absolute
    pub url: String,
    /// Target entity ID
    #[arg(long, value_name = "ID")]
    pub entity_id: String,
    /// Target entity type (defaults to "order")
    #[arg(long, value_name = "TYPE", default_value = "")]
    pub entity_type: String,
    /// JSON request body
    #[arg(long, value_name = "JSON")]
    pub body: Option<String>,
    /// Higher drains first
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub priority: i32,
    /// Override the global retry limit for this operation
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show one cached entity
    Show {
        /// Entity ID
        entity_id: String,
        /// Entity type
        #[arg(long, default_value = "order")]
        entity_type: String,
    },
    /// List cached entities
    List {
        /// Number of entities to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Store server state for an entity (must carry an integer version)
    Put {
        /// Entity ID
        entity_id: String,
        /// Entity JSON
        data: String,
        /// Entity type
        #[arg(long, default_value = "order")]
        entity_type: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a config file
    Init {
        /// API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Health endpoint used for connectivity probes
        #[arg(long, value_name = "URL")]
        health_url: Option<String>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config (file plus environment)
    Show,
}
