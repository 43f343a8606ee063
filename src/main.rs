// ABOUTME: Main entry point for the LINE webhook coalescing service
// ABOUTME: Initializes logging, config, the LINE client, the intake loop, and the HTTP server

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use confab::config::Config;
use confab::dispatcher::Dispatcher;
use confab::line::LineClient;
use confab::orchestrator::Orchestrator;
use confab::runner::ProcessBackend;
use confab::traits::{ExecutionBackend, MessagingClient};
use confab::webhook::{self, AppState};
use confab_core::access::AccessPolicy;
use confab_core::metrics::init_metrics;

#[derive(Parser, Debug)]
#[command(name = "confab", about = "Coalesces chat webhooks into agent turns")]
struct Cli {
    /// Path to the config file (defaults to ./config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen port from config
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n╔══════════════════════════════════════════════════════════╗");
        eprintln!("║ PANIC! Service crashed with the following error:        ║");
        eprintln!("╚══════════════════════════════════════════════════════════╝\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting confab");

    // Load configuration
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load_from(Some(path.as_path()))?,
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        dispatch_mode = ?config.backend.dispatch_mode,
        backend = %config.backend.command,
        projects = config.access.projects.len(),
        "Configuration loaded"
    );

    let metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    // Resolving our own identity up front also proves the credentials work
    let client: Arc<dyn MessagingClient> = Arc::new(LineClient::new(
        config.line.api_base.clone(),
        config.line.channel_access_token.clone(),
    )?);
    let identity = client
        .resolve_self_identity()
        .await
        .context("failed to resolve bot identity")?;
    tracing::info!(
        user_id = %identity.user_id,
        display_name = %identity.display_name,
        "Bot identity resolved"
    );

    let policy = AccessPolicy::from_config(&config.access);
    let backend: Arc<dyn ExecutionBackend> = Arc::new(ProcessBackend::new(
        config.backend.command.clone(),
        config.backend.args.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&client),
        backend,
        policy.clone(),
        &config,
    ));

    // Webhook handlers feed this channel; the orchestrator is its sole consumer
    let (intake_tx, intake_rx) = mpsc::channel(256);
    let orchestrator = Orchestrator::new(Arc::clone(&client), dispatcher, policy, &config);
    tokio::spawn(orchestrator.run(intake_rx));

    let state = Arc::new(AppState {
        intake: intake_tx,
        identity,
        metrics: metrics_handle,
    });
    webhook::serve(state, &config.server.host, config.server.port).await
}
