//! Command dispatch: wires configuration into the engine and runs one command.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::bail;
use bush_transfer::JsonFileStateStore;
use bush_upload::{
    FileSource, HttpChunkTransport, HttpControlPlane, TransferSession, UploadError,
    UploadOptions, UploadProgress, UploadSession,
};
use tracing::{info, warn};

use crate::cli::{Command, ConfigAction};
use crate::config::Config;

/// Minimum spacing between progress log lines.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Runs one command to completion.
pub async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    if let Command::Config {
        action: ConfigAction::Show,
    } = command
    {
        print!("{}", config.redacted()?);
        return Ok(());
    }

    let engine = build_engine(&config)?;

    match command {
        Command::Upload {
            file,
            namespace,
            id,
        } => {
            let namespace = namespace.unwrap_or_else(|| config.namespace.clone());
            if namespace.is_empty() {
                bail!("no namespace given and none configured");
            }
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let source = Arc::new(FileSource::open(&file)?);
            let options = UploadOptions::new(namespace)
                .with_upload_id(id.clone())
                .on_progress(progress_logger());

            info!(upload_id = %id, file = %file.display(), "uploading");
            let upload = engine.start(source, options);
            run_interruptible(&engine, &id, upload).await
        }
        Command::Resume { id, file } => {
            let source = Arc::new(FileSource::open(&file)?);
            let options = UploadOptions::default().on_progress(progress_logger());

            info!(upload_id = %id, file = %file.display(), "resuming");
            let upload = engine.resume(&id, source, options);
            run_interruptible(&engine, &id, upload).await
        }
        Command::Cancel { id } => {
            engine.cancel(&id).await?;
            info!(upload_id = %id, "cancelled");
            Ok(())
        }
        Command::List => {
            for session in engine.get_all_uploads().await? {
                println!("{}", describe(&session));
            }
            Ok(())
        }
        Command::Clear => {
            let removed = engine.clear_completed().await?;
            println!("removed {removed} finished upload(s)");
            Ok(())
        }
        Command::Recover => {
            let recovered = engine.recover_orphans().await?;
            for session in &recovered {
                println!("{}", describe(session));
            }
            println!("{} upload(s) ready to resume", recovered.len());
            Ok(())
        }
        Command::Config { .. } => Ok(()),
    }
}

fn build_engine(config: &Config) -> anyhow::Result<TransferSession> {
    let engine_config = config.engine_config();
    engine_config.validate()?;

    let store = JsonFileStateStore::new(&config.state_dir)?;
    let control_plane =
        HttpControlPlane::new(&config.api_url, &config.api_token, config.request_timeout())?;
    let transport = HttpChunkTransport::new(config.part_timeout(), config.send_checksum)?;

    Ok(TransferSession::new(
        engine_config,
        Arc::new(control_plane),
        Arc::new(transport),
        Arc::new(store),
    ))
}

/// Drives an upload, pausing it on Ctrl-C.
///
/// The pause is awaited alongside the upload future because the run only
/// settles while it is being polled.
async fn run_interruptible(
    engine: &TransferSession,
    id: &str,
    upload: impl Future<Output = Result<UploadSession, UploadError>>,
) -> anyhow::Result<()> {
    tokio::pin!(upload);

    let outcome = tokio::select! {
        outcome = &mut upload => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!(upload_id = %id, "interrupt received, pausing");
            let (paused, outcome) = tokio::join!(engine.pause(id), &mut upload);
            if let Err(e) = paused {
                warn!(upload_id = %id, error = %e, "pause failed");
            }
            outcome
        }
    };

    match outcome {
        Ok(session) => {
            info!(
                upload_id = %session.id,
                size = session.file_size,
                storage_key = session.remote_storage_key.as_deref().unwrap_or("-"),
                "upload completed"
            );
            Ok(())
        }
        Err(UploadError::Paused) => {
            info!(upload_id = %id, "upload paused; run `bush-uploader resume {id} <file>` to continue");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Returns a progress callback that logs at most every [`PROGRESS_INTERVAL`]
/// plus once on completion.
fn progress_logger() -> impl Fn(&UploadProgress) + Send + Sync + 'static {
    let last = Mutex::new(None::<Instant>);
    move |p: &UploadProgress| {
        let now = Instant::now();
        let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
        let due = last.is_none_or(|t| now.duration_since(t) >= PROGRESS_INTERVAL);
        if !due && p.uploaded_bytes < p.total_bytes {
            return;
        }
        *last = Some(now);
        info!(
            upload_id = %p.upload_id,
            percent = format_args!("{:.1}", p.percentage),
            chunks = format_args!("{}/{}", p.completed_chunks, p.total_chunks),
            rate = %human_rate(p.bytes_per_second),
            eta_secs = p.eta.as_secs(),
            "progress"
        );
    }
}

fn human_rate(bytes_per_second: f64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    if bytes_per_second >= MIB {
        format!("{:.1} MiB/s", bytes_per_second / MIB)
    } else {
        format!("{:.1} KiB/s", bytes_per_second / 1024.0)
    }
}

fn describe(session: &UploadSession) -> String {
    let percent = if session.file_size == 0 {
        0.0
    } else {
        session.uploaded_bytes as f64 / session.file_size as f64 * 100.0
    };
    let mut line = format!(
        "{}  {:<9}  {:>5.1}%  {}/{} chunks  {}",
        session.id,
        session.status.as_str(),
        percent,
        session.completed_chunks(),
        session.total_chunks,
        session.file_name
    );
    if let Some(err) = &session.error {
        line.push_str("  error: ");
        line.push_str(err);
    }
    line
}
