mod analysis;
mod config;
mod embedding;
mod jobs;
mod scholar;
mod web;

use std::{env, net::SocketAddr};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{analysis::Method, jobs::JobState, web::AppState};

#[derive(Parser)]
#[command(name = "course-expertise", about = "Scores scholar expertise against a course list")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the web interface (the default).
    Serve {
        /// Port to listen on; falls back to the PORT env var, then 8080.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a single analysis in the foreground and exit.
    Run {
        /// Aggregation method for publication scores.
        #[arg(long, value_enum, default_value_t = Method::Sum)]
        method: Method,
    },
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Command::Run { method }) => run_once(method).await,
        Some(Command::Serve { port }) => serve(port).await,
        None => serve(None).await,
    };

    if let Err(err) = result {
        error!(?err, "application error");
        std::process::exit(1);
    }
}

async fn serve(port: Option<u16>) -> Result<()> {
    let state = AppState::from_env()?;
    let app = web::build_router(state);

    let port = port
        .or_else(|| env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "listening");

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Foreground run: launches the same job the web form would, then joins the
/// background task and reports the terminal status.
async fn run_once(method: Method) -> Result<()> {
    let state = AppState::from_env()?;
    let config = state.config_store().load().await?;

    state
        .runner()
        .launch(config.courses, config.scholar_ids, method)
        .await
        .context("failed to launch analysis")?;
    state.runner().join_active().await;

    let status = state.runner().poll().await;
    match status.state {
        JobState::Completed => {
            let files = status.result_paths.unwrap_or_default();
            info!(?files, "analysis completed");
            Ok(())
        }
        JobState::Failed => {
            anyhow::bail!(
                "analysis failed: {}",
                status.error_detail.or(status.error).unwrap_or_default()
            );
        }
        other => anyhow::bail!("analysis ended in unexpected state '{}'", other.as_str()),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
