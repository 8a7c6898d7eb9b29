use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast;

use argus_core::BroadcastMessage;
use argus_server::ServerConfig;
use argus_store::Database;

/// Tool-call telemetry server: HTTP ingestion, on-demand metrics, and
/// real-time fan-out to WebSocket live-viewers.
#[derive(Parser, Debug)]
#[command(name = "argus", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Path to the SQLite database file. Defaults to ~/.argus/argus.db.
    #[arg(long, env = "ARGUS_DB")]
    db: Option<PathBuf>,

    /// Per-subscriber outbound queue capacity.
    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!("starting argus server");

    let db_path = cli.db.unwrap_or_else(default_db_path);
    let db = Database::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "database opened");

    // Event broadcast channel: the ingestion path publishes here, the hub's
    // event bridge fans out to connected viewers.
    let (event_tx, _) = broadcast::channel::<BroadcastMessage>(1024);

    let config = ServerConfig {
        port: cli.port,
        max_send_queue: cli.max_send_queue,
        ..Default::default()
    };
    let handle = argus_server::start(config, db, event_tx).await?;

    tracing::info!(port = handle.port, "argus server ready");

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    Ok(())
}

fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".argus")
        .join("argus.db")
}
