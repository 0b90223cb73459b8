//! AutoGLM UI
//!
//! Entry point for the `autoglm-ui` binary. `serve` runs the web UI and
//! HTTP API, `chat` runs an interactive terminal session. Both keep one
//! reconnecting WebSocket open to the AutoGLM API.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use autoglm_ui::chat;
use autoglm_ui::cli::{Cli, Commands, ConfigSubcommand, ConnectionArgs};
use autoglm_ui::client::{AutoGlmClient, ClientConfig};
use autoglm_ui::config::{self, AppConfig};
use autoglm_ui::error::{Error, Result};
use autoglm_ui::logging;
use autoglm_ui::server;
use autoglm_ui::version::{self, BuildInfo};

/// Grace period for the blocking stdin reader when chat ends
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

fn main() {
    // A .env file is optional
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    // Commands that need neither logging nor a connection
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => return handle_config_command(subcommand.clone()),
        _ => {}
    }

    let (connection, host, port) = match &cli.command {
        Commands::Serve {
            connection,
            host,
            port,
        } => (connection, host.clone(), *port),
        Commands::Chat { connection } => (connection, None, None),
        Commands::Version | Commands::Config { .. } => unreachable!(),
    };

    let config = load_config(connection, host, port)?;

    // The guards must be kept alive for the lifetime of the program
    let _log_guards =
        logging::init_logging(&config.logging, cli.verbose, cli.quiet, config.server.debug)?;

    let build = BuildInfo::current();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting AutoGLM UI"
    );

    match cli.command {
        Commands::Serve { .. } => run_server(config),
        Commands::Chat { .. } => run_chat(config),
        Commands::Version | Commands::Config { .. } => unreachable!(),
    }
}

/// Load the config file, then apply command line overrides on top of the
/// environment and validate the result
fn load_config(
    connection: &ConnectionArgs,
    host: Option<String>,
    port: Option<u16>,
) -> Result<AppConfig> {
    let mut config = AppConfig::load(connection.config.as_deref())?;

    if let Some(token) = &connection.token {
        config.api.token = Some(token.clone());
    }
    if let Some(url) = &connection.api_url {
        config.api.url = url.clone();
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    config.validate()?;
    config.require_token()?;
    Ok(config)
}

fn run_server(config: AppConfig) -> Result<()> {
    let client_config = ClientConfig::from_app(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().min(8))
        .thread_name("autoglm-ui")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async move {
        let client = std::sync::Arc::new(AutoGlmClient::new(client_config));
        server::serve(&config, client).await
    })
}

fn run_chat(config: AppConfig) -> Result<()> {
    let client_config = ClientConfig::from_app(&config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    let result = runtime.block_on(async move {
        let client = AutoGlmClient::new(client_config);
        chat::run(&client).await
    });

    // tokio's stdin reader sits on a blocking thread that never returns
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = AppConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg.redacted())?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => match AppConfig::load(config.as_deref()) {
            Ok(_) => {
                println!("Configuration is valid.");
            }
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
