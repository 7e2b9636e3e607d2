//! Photosync peer daemon
//!
//! Serves one directory of maintenance photos to nearby devices on the LAN
//! until interrupted.

use clap::Parser;
use photosync_core::{default_config_path, LocalPhotoStore, PeerServer, PhotoSyncConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "photosync-peerd", about = "Serve maintenance photos to LAN peers")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory to serve
    #[arg(short, long, conflicts_with_all = ["machine", "maintenance"])]
    base_dir: Option<PathBuf>,

    /// Serve this machine's visit directory (requires --maintenance)
    #[arg(long, requires = "maintenance")]
    machine: Option<String>,

    /// Maintenance visit to serve (requires --machine)
    #[arg(long, requires = "machine")]
    maintenance: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = PhotoSyncConfig::load_or_default(&cli.config)?;
    if let Some(listen) = cli.listen {
        cfg.peer_listen_addr = listen;
    }
    if let Some(base_dir) = cli.base_dir {
        cfg.peer_base_dir = Some(base_dir);
    }

    let base_dir = match (cli.machine, cli.maintenance) {
        (Some(machine), Some(maintenance)) => {
            LocalPhotoStore::new(cfg.storage_root.clone())
                .resolve_directory(&machine, &maintenance)
                .await?
        }
        _ => cfg.peer_base_dir().to_path_buf(),
    };

    let server = PeerServer::new(cfg.peer_listen_addr.clone(), base_dir);
    let addr = server.start().await?;
    tracing::info!("photosync-peerd ready on {}", addr);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    server.stop().await?;

    Ok(())
}
