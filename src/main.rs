//! promptgate CLI - serve the proxy or inspect its configuration.

use clap::{Parser, Subcommand};
use promptgate::api::{create_router, AppState};
use promptgate::config::{Config, LogFormat, LoggingConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "promptgate")]
#[command(about = "Secret-gated proxy for the OpenAI Responses API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Log level or filter directive (RUST_LOG still wins)
        #[arg(short, long)]
        log_level: Option<String>,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show current configuration with secrets redacted
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve {
            port,
            log_level,
            config,
        }) => {
            run_server(port, log_level, config).await?;
        }
        Some(Commands::Config { path, config }) => {
            show_config(path, config)?;
        }
        None => {
            // Default: run server
            run_server(None, None, None).await?;
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config.with_env_overrides())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(false)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}

async fn run_server(
    port_override: Option<u16>,
    log_level: Option<String>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(level) = log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);
    config.validate()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    let state = AppState::from_config(&config)?;
    let app = create_router(state);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.dispatcher.worker_count,
        queue_size = config.dispatcher.queue_size,
        default_model = %config.upstream.default_model,
        "promptgate starting"
    );

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

fn show_config(show_path: bool, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    if show_path {
        let path = config_path.unwrap_or_else(Config::default_path);
        println!("{}", path.display());
        return Ok(());
    }

    let config = load_config(config_path)?;
    println!("{}", toml::to_string_pretty(&config.redacted())?);
    Ok(())
}
