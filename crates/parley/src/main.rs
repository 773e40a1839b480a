//! Parley - WebSocket chat backend.
//!
//! Main entry point for the Parley CLI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use parley_server::{Server, ServerConfig};
use parley_store::ChatStore;

mod supervisor;

use supervisor::EchoSupervisor;

/// Parley - WebSocket chat backend
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Parley server
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1:8080", env = "PARLEY_BIND")]
    bind: SocketAddr,

    /// Path to the chat database. Omit for an in-memory store.
    #[arg(long, env = "PARLEY_DB")]
    db: Option<PathBuf>,

    /// Authentication token. Omit to disable auth (localhost mode).
    #[arg(long, env = "PARLEY_AUTH_TOKEN")]
    auth_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "parley=debug,parley_server=debug,parley_dispatch=debug,parley_store=debug,info"
    } else {
        "parley=info,parley_server=info,parley_dispatch=info,parley_store=info,warn"
    };
    tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let store = match &args.db {
        Some(path) => ChatStore::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?,
        None => {
            info!("No database path given; using in-memory store");
            ChatStore::open_in_memory().context("Failed to open in-memory store")?
        }
    };

    let config = ServerConfig::new(args.auth_token).with_bind_address(args.bind);
    let server = Server::new(config, Arc::new(store), Arc::new(EchoSupervisor));
    let addr = server.bind_address();

    server
        .run_until(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
