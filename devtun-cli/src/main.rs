//! devtun CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use devtun_config::{load_config, validate_config, Config, LogFormat};
use devtun_core::DevToolsLocal;
use devtun_runtime::{DevToolsTunnel, DevToolsTunnelOptions, ShutdownSignal, SignalHandler};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "devtun")]
#[command(about = "Expose a browser's remote-debugging endpoint through a public tunnel", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a public tunnel to the debug endpoint
    Tunnel(TunnelArgs),

    /// Print local inspector URLs for every page
    Local {
        /// WebSocket debugger URL, e.g. ws://127.0.0.1:9222/devtools/browser/<id>
        #[arg(long, env = "DEVTUN_WS_URL")]
        ws_url: String,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "devtun.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[derive(Args, Debug, Default)]
struct TunnelArgs {
    /// WebSocket debugger URL, e.g. ws://127.0.0.1:9222/devtools/browser/<id>
    #[arg(long, env = "DEVTUN_WS_URL")]
    ws_url: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fixed subdomain
    #[arg(long)]
    subdomain: Option<String>,

    /// Prefix of the generated subdomain
    #[arg(long)]
    prefix: Option<String>,

    /// Basic-auth user
    #[arg(long, env = "DEVTUN_USER", requires = "pass")]
    user: Option<String>,

    /// Basic-auth password
    #[arg(long, env = "DEVTUN_PASS", requires = "user")]
    pass: Option<String>,

    /// Preferred local port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl TunnelArgs {
    /// Configuration file (or defaults) with the flags applied on top
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => load_config(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(ref ws_url) = self.ws_url {
            config.endpoint.ws_url = Some(ws_url.clone());
        }
        if let Some(ref subdomain) = self.subdomain {
            config.tunnel.subdomain = Some(subdomain.clone());
        }
        if let Some(ref prefix) = self.prefix {
            config.tunnel.prefix = prefix.clone();
        }
        if let (Some(user), Some(pass)) = (&self.user, &self.pass) {
            config.tunnel.user = Some(user.clone());
            config.tunnel.pass = Some(pass.clone());
        }
        if self.port.is_some() {
            config.server.port = self.port;
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.to_lowercase();
        }

        validate_config(&config)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Tunnel(args) => {
            let config = args.resolve_config()?;
            init_tracing(&config.logging.level, config.logging.format)?;
            run_tunnel(config).await
        }

        Commands::Local { ws_url } => {
            init_tracing("warn", LogFormat::Text)?;

            let local = DevToolsLocal::new(ws_url)?;
            println!("DevTools: {}", local.url());
            for page in local.fetch_list().await? {
                println!(
                    "  {} {}",
                    page.title.as_deref().unwrap_or("(untitled)"),
                    local.url_for_page_id(&page.id)
                );
            }
            Ok(())
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    tracing::info!(
                        "  Endpoint: {}",
                        cfg.endpoint.ws_url.as_deref().unwrap_or("(from --ws-url)")
                    );
                    tracing::info!("  Provider: {}", cfg.tunnel.provider);
                    tracing::info!(
                        "  Auth: {}",
                        if cfg.tunnel.credentials().is_some() { "basic" } else { "none" }
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("devtun");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

async fn run_tunnel(config: Config) -> Result<()> {
    let ws_url = config
        .endpoint
        .ws_url
        .clone()
        .context("A debugger URL is required (--ws-url or endpoint.ws_url)")?;

    let mut tunnel = DevToolsTunnel::new(ws_url, DevToolsTunnelOptions::from(&config))?;
    tunnel.create().await?;

    println!("Tunnel: {}", tunnel.url().unwrap_or_default());
    match tunnel.fetch_list().await {
        Ok(pages) => {
            for page in pages {
                if let Some(url) = tunnel.url_for_page_id(&page.id) {
                    println!(
                        "  {} {}",
                        page.title.as_deref().unwrap_or("(untitled)"),
                        url
                    );
                }
            }
        }
        Err(e) => tracing::warn!("Could not list pages: {}", e),
    }

    let shutdown_signal = ShutdownSignal::new();
    tokio::spawn(SignalHandler::new(shutdown_signal.clone()).run());
    shutdown_signal.wait().await;

    tunnel.close().await;
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(filter.into())
            .add_directive("hyper=warn".parse()?)
            .add_directive("reqwest=warn".parse()?),
    );

    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init()?,
    }

    Ok(())
}
