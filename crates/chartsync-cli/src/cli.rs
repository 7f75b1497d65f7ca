use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "chartsync")]
#[command(about = "Inspect and maintain a local chartsync store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local store (defaults to CHARTSYNC_DB_PATH, then the data dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional engine configuration file (defaults to CHARTSYNC_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show queue counts, last sync time and recent errors
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued changes
    Queue {
        /// Show terminal failures instead of active items
        #[arg(long)]
        failed: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List sync conflicts
    Conflicts {
        /// Show resolved conflicts instead of open ones
        #[arg(long)]
        resolved: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle an open conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// Which copy to keep
        #[arg(long, value_enum)]
        keep: KeepSide,
        /// Name recorded as the resolver
        #[arg(long, value_name = "NAME")]
        by: Option<String>,
    },
    /// Put a failed queue item back into the queue
    Retry {
        /// Queue item ID
        id: String,
    },
    /// Drop a failed queue item
    Discard {
        /// Queue item ID
        id: String,
    },
    /// Export queue, versions, conflicts and cached resources
    Export {
        /// Output file or directory (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Replace local state with an export
    Import {
        /// Export file
        input: PathBuf,
    },
    /// Remove old resolved conflicts and error records
    Cleanup {
        /// Keep records newer than this many days
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Delete all local sync data
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Print the effective engine configuration
    Config,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepSide {
    Local,
    Remote,
}
