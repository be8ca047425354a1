//! Offtrack - offline acquisition and look-ahead buffering
//!
//! Command line front end: resolves streamable sources, downloads tracks for
//! offline playback and exercises the look-ahead buffer.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Result, bail},
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::EnvFilter,
};

use offtrack::{
    audio::{
        acquisition::{AcquisitionOutcome, AcquisitionPipeline},
        backend::HttpConversionBackend,
        loader::HttpMediaLoader,
        prebuffer::{BufferBudget, BufferManager},
        resolver::{HttpProbe, SourceResolver},
        transcoder::Mp3Transcoder,
    },
    config::{SettingsManager, UserSettings, get_artifact_db_path},
    error::ResultExt,
    library::{
        models::Track,
        store::{ArtifactStore, SqliteArtifactStore},
    },
};

#[derive(Parser, Debug)]
#[command(name = "offtrack", version)]
#[command(about = "Offline acquisition and look-ahead buffering of streamed tracks")]
struct Cli {
    /// Settings file (defaults to the XDG config location)
    #[arg(long, env = "OFFTRACK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Artifact database (defaults to the XDG cache location)
    #[arg(long, env = "OFFTRACK_DB", value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find a live mirror URL for a track
    Resolve { id: String },
    /// Download a track for offline playback
    Acquire {
        id: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// List tracks available offline
    List,
    /// Delete an offline track
    Delete { id: String },
    /// Buffer the first track and look ahead through the rest
    Buffer {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let settings_manager = match &cli.config {
        Some(path) => SettingsManager::with_config_path(path.clone()),
        None => SettingsManager::new(),
    }
    .add_context("Failed to load settings")?;
    let settings = settings_manager.get_settings().clone();

    let db_path = cli.database.clone().unwrap_or_else(get_artifact_db_path);

    match cli.command {
        Command::Resolve { id } => {
            let url = resolver(&settings)?
                .resolve(&id)
                .await
                .add_contextf(format!("Failed to resolve {id}"))?;
            println!("{url}");
        }
        Command::Acquire { id, title } => {
            let store = open_store(&db_path).await?;
            let backend = HttpConversionBackend::new(&settings.backend_url)
                .add_context("Invalid backend URL")?;
            let transcoder = Mp3Transcoder::new(
                settings.transcode_bitrate_kbps,
                settings.transcode_sample_rate,
            )
            .add_context("Invalid transcoder settings")?;
            let pipeline =
                AcquisitionPipeline::new(Arc::new(backend), Arc::new(transcoder), store);

            let track = Track::new(id.clone(), title.unwrap_or_else(|| id.clone()));
            match pipeline
                .acquire(&track)
                .await
                .add_contextf(format!("Failed to acquire {id}"))?
            {
                AcquisitionOutcome::Acquired(metadata) => {
                    println!("{} ({} bytes)", metadata.track_id, metadata.byte_size);
                }
                AcquisitionOutcome::AlreadyPresent => println!("{id} is already offline"),
            }
        }
        Command::List => {
            let store = open_store(&db_path).await?;
            for metadata in store
                .list_metadata()
                .await
                .add_context("Failed to list artifacts")?
            {
                println!(
                    "{}\t{}\t{}\t{}",
                    metadata.track_id, metadata.download_date, metadata.byte_size, metadata.title
                );
            }
        }
        Command::Delete { id } => {
            let store = open_store(&db_path).await?;
            if !store.contains(&id).await.add_context("Failed to query store")? {
                bail!("{id} is not stored offline");
            }
            store
                .delete(&id)
                .await
                .add_contextf(format!("Failed to delete {id}"))?;
            info!("Deleted {id}");
        }
        Command::Buffer { ids } => {
            let store = open_store(&db_path).await?;
            let loader = HttpMediaLoader::new().add_context("Failed to create HTTP client")?;
            let buffer = BufferManager::with_store(
                resolver(&settings)?,
                Arc::new(loader),
                BufferBudget::from_settings(&settings),
                store,
            );

            let queue: Vec<Track> = ids
                .iter()
                .map(|id| Track::new(id.clone(), id.clone()))
                .collect();
            let Some(current) = queue.first() else {
                bail!("No track ids given");
            };
            let look_ahead = buffer.ensure_buffered(current, &queue).await;
            look_ahead
                .foreground
                .clone()
                .add_contextf(format!("Failed to buffer {}", current.id))?;
            look_ahead.finished().await;

            let summary = buffer.info();
            println!(
                "buffered {} of {} tracks, {:.0}s of {:.0}s",
                summary.buffered_track_ids.len(),
                queue.len(),
                summary.total_buffered_secs,
                summary.budget_secs
            );
            for id in summary.buffered_track_ids {
                println!("{id}");
            }
        }
    }

    Ok(())
}

fn resolver(settings: &UserSettings) -> Result<SourceResolver> {
    let probe = HttpProbe::new().add_context("Failed to create HTTP client")?;
    Ok(SourceResolver::from_settings(settings, Arc::new(probe)))
}

async fn open_store(path: &Path) -> Result<Arc<dyn ArtifactStore>> {
    let store = SqliteArtifactStore::open(path)
        .await
        .add_contextf(format!("Failed to open artifact database {}", path.display()))?;
    Ok(Arc::new(store))
}
