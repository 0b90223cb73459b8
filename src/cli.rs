//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for AutoGLM UI.

use clap::{Args, Parser, Subcommand};

/// AutoGLM UI - web and terminal front-ends for the AutoGLM API
///
/// Forwards tasks to the AutoGLM developer endpoint over a reconnecting
/// WebSocket and displays the streamed responses.
#[derive(Parser, Debug)]
#[command(name = "autoglm-ui")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by commands that talk to AutoGLM
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Path to configuration file
    #[arg(short, long, env = "AUTOGLM_CONFIG")]
    pub config: Option<String>,

    /// AutoGLM API token (overrides config and environment)
    #[arg(long)]
    pub token: Option<String>,

    /// AutoGLM WebSocket endpoint (overrides config and environment)
    #[arg(long)]
    pub api_url: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the web UI and HTTP API
    Serve {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Bind port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Interactive terminal session
    Chat {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration (token redacted)
    Show {
        /// Path to configuration file
        #[arg(short, long, env = "AUTOGLM_CONFIG")]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long, env = "AUTOGLM_CONFIG")]
        config: Option<String>,
    },
}
