use anyhow::Result;
use clap::{Parser, Subcommand};
use photosync_core::store::{compute_missing, list_files};
use photosync_core::{
    default_config_path, ContentHandle, LocalPhotoStore, PeerEndpoint, PhotoSyncConfig,
    ReconcileEngine,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Photosync CLI - capture and reconcile maintenance visit photos
#[derive(Parser)]
#[command(name = "photosync")]
#[command(about = "Capture and reconcile maintenance visit photos", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Local photo storage root override
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies one maintenance visit.
#[derive(clap::Args)]
struct Visit {
    /// Machine identifier
    #[arg(long)]
    machine: String,

    /// Maintenance visit identifier
    #[arg(long)]
    maintenance: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill the visit from peers and the durable store, then reclaim
    Reconcile {
        #[command(flatten)]
        visit: Visit,

        /// Expected photo file name (repeatable)
        #[arg(long = "expected", required = true)]
        expected: Vec<String>,

        /// Peer as host:port, tried in the order given (repeatable)
        #[arg(long = "peer")]
        peers: Vec<PeerEndpoint>,
    },

    /// Print the expected photos not present locally
    Missing {
        #[command(flatten)]
        visit: Visit,

        /// Expected photo file name (repeatable)
        #[arg(long = "expected", required = true)]
        expected: Vec<String>,
    },

    /// Store captured files in the visit directory
    Save {
        #[command(flatten)]
        visit: Visit,

        /// Files to store
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Keep the saved photos local only
        #[arg(long)]
        no_publish: bool,
    },

    /// Upload local photos to the durable store
    Publish {
        #[command(flatten)]
        visit: Visit,

        /// Photo file names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// List the photos stored for a visit
    List {
        #[command(flatten)]
        visit: Visit,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = PhotoSyncConfig::load_or_default(&cli.config)?;
    if let Some(storage_root) = cli.storage_root {
        cfg.storage_root = storage_root;
    }

    match cli.command {
        Commands::Reconcile {
            visit,
            expected,
            peers,
        } => {
            let expected: BTreeSet<String> = expected.into_iter().collect();
            let engine = ReconcileEngine::from_config(&cfg)?;
            engine
                .reconcile(&visit.machine, &visit.maintenance, &expected, &peers)
                .await?;

            let dir = engine.store().visit_dir(&visit.machine, &visit.maintenance)?;
            let missing = compute_missing(&expected, &dir).await?;
            if missing.is_empty() {
                println!("Complete: {} photos", expected.len());
            } else {
                println!("Incomplete, {} missing:", missing.len());
                for name in missing {
                    println!("  {}", name);
                }
            }
        }
        Commands::Missing { visit, expected } => {
            let expected: BTreeSet<String> = expected.into_iter().collect();
            let dir = LocalPhotoStore::new(cfg.storage_root.clone())
                .visit_dir(&visit.machine, &visit.maintenance)?;
            for name in compute_missing(&expected, &dir).await? {
                println!("{}", name);
            }
        }
        Commands::Save {
            visit,
            files,
            no_publish,
        } => {
            let store = LocalPhotoStore::new(cfg.storage_root.clone());
            let sources: Vec<ContentHandle> = files.into_iter().map(ContentHandle::Path).collect();
            let stored = store
                .save_incoming_files(&sources, &visit.machine, &visit.maintenance)
                .await?;
            info!("Saved {} of {} captures", stored.len(), sources.len());
            for file in &stored {
                println!("{}\t{} bytes", file.file_name, file.size);
            }

            if !no_publish && !stored.is_empty() {
                let names: Vec<String> = stored.into_iter().map(|f| f.file_name).collect();
                let engine = ReconcileEngine::from_config(&cfg)?;
                engine
                    .publish(&visit.machine, &visit.maintenance, &names)
                    .await?;
            }
        }
        Commands::Publish { visit, names } => {
            let engine = ReconcileEngine::from_config(&cfg)?;
            let uploaded = engine
                .publish(&visit.machine, &visit.maintenance, &names)
                .await?;
            println!("Uploaded {} of {} photos", uploaded, names.len());
        }
        Commands::List { visit } => {
            let dir = LocalPhotoStore::new(cfg.storage_root.clone())
                .visit_dir(&visit.machine, &visit.maintenance)?;
            for name in list_files(&dir).await? {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
