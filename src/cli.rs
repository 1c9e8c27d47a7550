/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser)]
#[command(name = "homedash")]
#[command(author, version = VERSION_WITH_BUILD, about = "Home-server dashboard backend", long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/homedash/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Enable CORS for cross-origin requests
        #[arg(long)]
        cors: bool,
    },

    /// Show current host metrics
    Status {
        /// Refresh every N seconds until Ctrl-C
        #[arg(short, long)]
        watch: Option<u64>,
    },

    /// List containers
    Containers {
        /// Check the engine is reachable before listing
        #[arg(short, long)]
        refresh: bool,
    },

    /// Start a container
    Start {
        /// Container id or name
        id: String,
    },

    /// Stop a container
    Stop {
        /// Container id or name
        id: String,
    },

    /// Restart a container
    Restart {
        /// Container id or name
        id: String,
    },

    /// Pull the latest image and recreate a container
    Update {
        /// Container id or name
        id: String,
    },

    /// Notes management
    Notes {
        #[command(subcommand)]
        command: NotesCommands,
    },

    /// Show the weather, or change its location
    Weather {
        /// New location name to geocode and save
        #[arg(long)]
        set: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate a random API key
    GenerateKey,
}

#[derive(Subcommand)]
pub enum NotesCommands {
    /// List all notes
    List,

    /// Show one note
    Show {
        id: String,
    },

    /// Add a note
    Add {
        title: String,

        #[arg(default_value = "")]
        content: String,
    },

    /// Edit a note; omitted fields stay unchanged
    Edit {
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        content: Option<String>,
    },

    /// Delete a note
    Rm {
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Validate the configuration
    Validate,

    /// Print the config file path
    Path,
}
