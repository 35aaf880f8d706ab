mod broker;
mod broker_paths;
mod build_info;
mod config;
mod daemon;
mod daemon_log;
mod identity;
mod rpc;
mod service;

use anyhow::{Context, Result};
use broker_paths::BrokerPaths;
use clap::{Parser, Subcommand};
use config::{BrokerConfig, BusScope};
use daemon::{BrokerClient, PrivateBrokerClient};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the tracing filter directive.
const LOG_ENV: &str = "SESSION_BROKER_LOG";

#[derive(Parser)]
#[command(name = "session-broker")]
#[command(about = "Keeps a background service running while clients hold a session")]
#[command(version)]
struct Cli {
    /// Use the per-user broker (default)
    #[arg(long, global = true, conflicts_with = "system")]
    session: bool,

    /// Use the system-wide broker
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker daemon in the foreground
    Daemon {
        /// Seconds to keep the service running after the last client leaves
        #[arg(long)]
        stop_timeout: Option<u64>,

        /// Configuration file (defaults to <config dir>/session-broker/config.yaml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Hold the session until interrupted
    Hold,
    /// Start the managed service
    Start,
    /// Stop the managed service immediately
    Stop,
    /// Print the broker properties
    Status,
    /// Print a single-use login token for the current user
    LoginToken,
    /// Redeem a login token and print the user it was issued to
    CheckToken {
        /// Token key as printed by `login-token`
        key: String,
    },
}

fn init_tracing() {
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let scope = BusScope::from_flags(cli.session, cli.system);
    let paths = BrokerPaths::for_scope(scope)?;

    match cli.command {
        Command::Daemon {
            stop_timeout,
            config,
        } => {
            let mut config = BrokerConfig::load_or_default(config.as_deref())?;
            config.apply_overrides(stop_timeout)?;
            daemon::run_daemon(scope, config, paths).await
        }
        Command::Hold => {
            let client = BrokerClient::connect_or_spawn(&paths, scope).await?;
            client.hold().await?;
            eprintln!("Holding session; press Ctrl-C to release");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            client.release().await
        }
        Command::Start => {
            BrokerClient::connect_or_spawn(&paths, scope)
                .await?
                .start()
                .await
        }
        Command::Stop => {
            BrokerClient::connect(&paths.public_socket())
                .await?
                .stop()
                .await
        }
        Command::Status => {
            let client = BrokerClient::connect(&paths.public_socket()).await?;
            let properties = client.properties().await?;
            let build = client.build_info().await?;
            println!("{}", serde_json::to_string_pretty(&properties)?);
            if !build.matches_current() {
                eprintln!(
                    "Note: daemon build {} differs from this binary ({})",
                    build.git_sha,
                    build_info::BUILD_SHA
                );
            }
            Ok(())
        }
        Command::LoginToken => {
            let client = BrokerClient::connect_or_spawn(&paths, scope).await?;
            println!("{}", client.get_login_token().await?);
            Ok(())
        }
        Command::CheckToken { key } => {
            let client = PrivateBrokerClient::connect(&paths.private_socket()).await?;
            match client.check_login_token(&key).await? {
                Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                None => println!("{{}}"),
            }
            Ok(())
        }
    }
}
