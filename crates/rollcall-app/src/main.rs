use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use rollcall_core::{Config, EncodingFile, KnownFace};
use rollcall_store::{ClassSession, SnapshotDir, Store};
use tracing_subscriber::EnvFilter;

mod attendance;
mod auth;
mod console;
mod engine;

use attendance::{AttendanceManager, MarkPolicy};

#[derive(Parser)]
#[command(name = "rollcall-app", about = "Face recognition attendance console", version)]
struct Args {
    /// Scan continuously and record every recognised student once, without login.
    #[arg(long)]
    live: bool,

    /// Class session to record attendance against.
    #[arg(long)]
    session: Option<i64>,

    /// Config file (defaults to $ROLLCALL_CONFIG or the XDG config path).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the console.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_from(args.config.as_deref()).context("failed to load configuration")?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        camera = %config.camera_device,
        threshold = config.confidence_threshold,
        "rollcall-app starting"
    );

    let store = Store::open(&config.db_path)
        .with_context(|| format!("failed to open attendance database {}", config.db_path.display()))?;

    let session = match args.session {
        Some(id) => Some(
            store
                .get_session(id)?
                .with_context(|| format!("no class session with id {id}; create one with `rollcall session create`"))?,
        ),
        None => None,
    };

    let snapshots = SnapshotDir::new(&config.snapshot_dir);
    snapshots
        .ensure()
        .with_context(|| format!("failed to create snapshot directory {}", config.snapshot_dir.display()))?;
    tracing::debug!(path = %snapshots.root().display(), "snapshot directory ready");

    let gallery = load_gallery(&config);
    let manager = AttendanceManager::new(gallery, snapshots, MarkPolicy::from_config(&config));

    if args.live {
        run_live(config, store, manager, session).await
    } else {
        console::Console::new(config, store, manager, session).run().await
    }
}

/// Known faces for matching. A missing or broken file leaves the gallery
/// empty so students can still register and log in.
fn load_gallery(config: &Config) -> Arc<[KnownFace]> {
    match EncodingFile::load(&config.encodings_path) {
        Ok(file) => {
            tracing::info!(
                path = %config.encodings_path.display(),
                faces = file.faces.len(),
                model = %file.model_version,
                "loaded face encodings"
            );
            Arc::from(file.faces)
        }
        Err(e) => {
            tracing::warn!(error = %e, "no face encodings available");
            Arc::from(Vec::new())
        }
    }
}

async fn run_live(
    config: Config,
    store: Store,
    manager: AttendanceManager,
    session: Option<ClassSession>,
) -> Result<()> {
    if manager.known_faces() == 0 {
        bail!(
            "no face encodings in {}; run `rollcall encode` first",
            config.encodings_path.display()
        );
    }

    let engine_config = config.clone();
    let engine = tokio::task::spawn_blocking(move || engine::spawn_engine(&engine_config))
        .await
        .context("engine start-up task panicked")?
        .context("failed to start camera engine")?;

    println!("Scanning for known faces. Press Ctrl+C to stop.");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let recorded = manager
        .scan_live(&engine, &store, session.as_ref(), shutdown, |event| {
            println!(
                "{}  {} ({}%){}",
                event.recorded_at.with_timezone(&Local).format("%H:%M:%S"),
                event.student_name,
                event.confidence,
                if event.is_late { " late" } else { "" }
            );
        })
        .await
        .context("live scan failed")?;

    println!("Recorded {} student(s).", recorded.len());
    Ok(())
}
