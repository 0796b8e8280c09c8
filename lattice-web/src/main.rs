use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use lattice_protocol::client::LocalClient;
use lattice_web::auth::AuthGate;
use lattice_web::platform::Platform;
use lattice_web::server::{self, AppState};

/// Web control surface for the latticed daemon
#[derive(Parser, Debug)]
#[command(name = "lattice-web", about = "Run a web server for controlling latticed")]
struct Args {
    /// Listen address; use port 0 for automatic
    #[arg(long, default_value = "localhost:8088")]
    listen: String,

    /// Path to the latticed control socket
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let platform = Platform::detect();
    info!(%platform, "platform detected");

    let socket = args
        .socket
        .unwrap_or_else(lattice_protocol::default_socket_path);
    let client = LocalClient::connect(&socket)
        .await
        .with_context(|| format!("connecting to latticed at {}", socket.display()))?;

    let gate = AuthGate::for_platform(platform).context("initializing authorization gate")?;

    let app = server::router(AppState {
        client: Arc::new(client),
        gate: Arc::new(gate),
    });

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!("web control surface running on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
