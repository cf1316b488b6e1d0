//! Operator CLI for the dgrep object store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dgrep_core::{AppConfig, LogFile};
use dgrep_storage::{ByteStream, Error as StoreError, JobStore, StorageError};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::Dispatch;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dgrep-store")]
#[command(about = "Operator CLI for the dgrep object store")]
#[command(version)]
struct Cli {
    /// Config file path (TOML); DGREP_ environment variables override it
    #[arg(long, global = true, env = "DGREP_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create missing buckets and check they are reachable
    Provision,
    /// Upload a log file into the logs bucket
    Upload {
        /// Local file to upload
        file: PathBuf,
        /// Object path (default: the file name)
        #[arg(long)]
        key: Option<String>,
    },
    /// List log files in the logs bucket
    ListLogs,
    /// Fetch a chunk payload
    GetChunk {
        job_id: String,
        chunk_id: String,
        /// Write the payload here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print every stored result of a job as JSON
    Results { job_id: String },
    /// Delete all chunks and results of a job
    DeleteJob { job_id: String },
}

/// Install the process subscriber and return it for injection into the store.
fn init_tracing(format: LogFormat) -> Dispatch {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output, so logs go to stderr.
    let dispatch = match format {
        LogFormat::Text => Dispatch::new(registry.with(fmt::layer().with_writer(std::io::stderr))),
        LogFormat::Json => {
            Dispatch::new(registry.with(fmt::layer().json().with_writer(std::io::stderr)))
        }
    };
    dispatch.clone().init();
    dispatch
}

/// Merge the optional config file with `DGREP_` environment variables.
fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DGREP_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn open_store(
    config: &AppConfig,
    dispatch: Dispatch,
    cancel: CancellationToken,
) -> Result<JobStore> {
    let gateway = dgrep_storage::gateway_from_config(&config.object_store)
        .await
        .context("failed to initialize object store")?;

    let span = tracing::dispatcher::with_default(&dispatch, || {
        tracing::info_span!("job_store", backend = gateway.backend_name())
    });
    JobStore::builder(gateway, &config.storage)
        .context("invalid storage configuration")?
        .dispatch(dispatch)
        .span(span)
        .cancellation(cancel)
        .instantiate()
        .await
        .context("failed to provision buckets")
}

async fn upload(store: &JobStore, file: &Path, key: Option<String>) -> Result<()> {
    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let size = handle.metadata().await?.len();

    let key = match key {
        Some(key) => key,
        None => file
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .with_context(|| format!("cannot derive object path from {}", file.display()))?,
    };

    let payload: ByteStream =
        Box::pin(ReaderStream::new(handle).map(|piece| piece.map_err(StorageError::Io)));
    let log = LogFile::for_path(key, size);
    store
        .upload_log_file(&log, payload)
        .await
        .with_context(|| format!("failed to upload {}", file.display()))?;

    println!("{}\t{}", log.path, size);
    Ok(())
}

async fn list_logs(store: &JobStore) -> Result<()> {
    let listing = store
        .list_log_files()
        .await
        .context("failed to list log files")?;

    for file in &listing.items {
        let updated_at = file
            .updated_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        println!("{}\t{}\t{}", file.path, file.size, updated_at);
    }
    for skipped in &listing.skipped {
        eprintln!(
            "skipped {}: {}",
            skipped.key.as_deref().unwrap_or("<listing>"),
            skipped.reason
        );
    }
    Ok(())
}

async fn get_chunk(
    store: &JobStore,
    job_id: &str,
    chunk_id: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let (chunk, mut body) = store
        .get_chunk(job_id, chunk_id)
        .await
        .with_context(|| format!("failed to open chunk {chunk_id} of job {job_id}"))?;
    eprintln!("{}", serde_json::to_string(&chunk)?);

    let mut out: Box<dyn AsyncWrite + Unpin + Send> = match &output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    while let Some(piece) = body.next().await {
        out.write_all(&piece.context("chunk download interrupted")?)
            .await?;
    }
    out.flush().await?;
    Ok(())
}

async fn results(store: &JobStore, job_id: &str) -> Result<()> {
    let listing = store
        .get_job_results(job_id)
        .await
        .with_context(|| format!("failed to read results of job {job_id}"))?;

    for skipped in &listing.skipped {
        tracing::warn!(key = ?skipped.key, reason = %skipped.reason, "result skipped");
    }
    println!("{}", serde_json::to_string_pretty(&listing.items)?);
    Ok(())
}

async fn delete_job(store: &JobStore, job_id: &str) -> Result<()> {
    match store.delete_job(job_id).await {
        Ok(()) => {
            println!("deleted job {job_id}");
            Ok(())
        }
        Err(StoreError::PartialDeleteFailure { job_id, failed }) => {
            for object in &failed {
                eprintln!("{}/{}: {}", object.bucket, object.key, object.error);
            }
            anyhow::bail!(
                "{} object(s) of job {job_id} could not be deleted; re-run to retry",
                failed.len()
            )
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("failed to delete job {job_id}"))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dispatch = init_tracing(cli.log_format);

    let config = load_config(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling storage operations");
            on_interrupt.cancel();
        }
    });

    let store = open_store(&config, dispatch, cancel).await?;

    match cli.command {
        Commands::Provision => {
            store.health_check().await.context("health check failed")?;
            for bucket in store.registry().buckets() {
                println!(
                    "{}\t{}\t{}",
                    bucket.category,
                    bucket.name,
                    bucket.content_type.mime()
                );
            }
            Ok(())
        }
        Commands::Upload { file, key } => upload(&store, &file, key).await,
        Commands::ListLogs => list_logs(&store).await,
        Commands::GetChunk {
            job_id,
            chunk_id,
            output,
        } => get_chunk(&store, &job_id, &chunk_id, output).await,
        Commands::Results { job_id } => results(&store, &job_id).await,
        Commands::DeleteJob { job_id } => delete_job(&store, &job_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dgrep_core::{ObjectStoreConfig, StorageCategory};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_config_reads_buckets_and_backend() {
        let file = write_config(
            r#"
            [object_store]
            type = "s3"
            endpoint = "minio:9000"
            access_key_id = "access"
            secret_access_key = "secret"

            [storage]
            operation_timeout_secs = 30

            [[storage.buckets]]
            name = "LogStorage"
            type = "text"
            category = "logs"

            [[storage.buckets]]
            name = "ResultStorage"
            type = "json"
            category = "results"
            "#,
        );

        let config = load_config(Some(file.path())).unwrap();
        assert!(matches!(
            config.object_store,
            ObjectStoreConfig::S3 { ref endpoint, force_path_style: true, .. }
                if endpoint.as_deref() == Some("minio:9000")
        ));
        assert_eq!(config.storage.operation_timeout_secs, Some(30));
        assert_eq!(config.storage.delete_queue_depth, 1000);

        let registry = config.storage.validate().unwrap();
        assert_eq!(
            registry.resolve(StorageCategory::Results).unwrap().name,
            "ResultStorage"
        );
    }

    #[test]
    fn load_config_rejects_unknown_bucket_type() {
        let file = write_config(
            r#"
            [[storage.buckets]]
            name = "LogStorage"
            type = "xml"
            category = "logs"
            "#,
        );

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("buckets[0].type"), "{err:#}");
    }

    #[test]
    fn load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/dgrep.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
