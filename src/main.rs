use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use canopy::config::AppConfig;
use canopy::pipeline::PipelineRequest;
use canopy::server::{create_router, AppState};
use canopy::shutdown::{graceful_shutdown, wait_for_shutdown};
use canopy::terraform::apply::destroy;
use canopy::terraform::command::ToolCommand;

#[derive(Parser)]
#[command(name = "canopy", about = "Natural-language requests to deployed Terraform")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept runs over HTTP and process them in the background
    Serve,
    /// Run a single request in the foreground
    Run {
        /// What to build, e.g. "An S3 bucket with versioning for build logs"
        request: String,
        /// Extra guidance for the planner
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Destroy the infrastructure deployed from a kept run directory
    Destroy {
        run_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Run { request, feedback } => run_once(config, request, feedback).await,
        Command::Destroy { run_dir } => {
            let terraform = ToolCommand::new(
                &config.terraform.terraform_bin,
                config.terraform.plugin_cache_dir.clone(),
            );
            let output = destroy(&run_dir, &terraform).await?;
            println!("{output}");
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting Canopy server"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config));

    // Start the run queue processor
    let queue_state = Arc::clone(&state);
    tokio::spawn(async move {
        canopy::queue::run_queue_processor(queue_state).await;
    });

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    // Perform graceful shutdown cleanup
    graceful_shutdown(&state).await;

    Ok(())
}

async fn run_once(
    config: AppConfig,
    request: String,
    feedback: Option<String>,
) -> anyhow::Result<()> {
    let request = PipelineRequest::new(request).with_feedback(feedback);
    let summary = canopy::workflow::run_request(&config, Uuid::new_v4(), request).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let Some(cost) = &summary.cost {
        println!("\n{cost}");
    }

    let attempts = summary.retry_count + 1;
    summary.outcome.into_result(attempts)?;
    Ok(())
}
