//! Demo owner for the recorder
//!
//! Records from the synthetic capture source, holding "record" for two
//! seconds, pausing for one, then resuming until the time limit is reached.
//! The finished file is imported into a library directory.
//!
//! Usage: `concat-recorder [config.json] [library-dir]`

use anyhow::{Context, Result};
use concat_recorder::capture::SyntheticSource;
use concat_recorder::library::{persist_finished, DirectoryLibrary};
use concat_recorder::recorder::{RecorderConfig, RecordingEvent, SampleRouter};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    concat_recorder::init_tracing();
    tracing::info!("Starting Concat Recorder v{}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => RecorderConfig::load(&PathBuf::from(&path))
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => RecorderConfig::default(),
    };
    config.validate().context("Invalid recorder configuration")?;
    let library = DirectoryLibrary::new(args.next().unwrap_or_else(|| "recordings".to_string()));

    let mut router = SampleRouter::with_file_output(config.clone());
    let mut events = router.subscribe();
    let handle = router.handle();

    router
        .configure_source(
            Box::new(SyntheticSource::default()),
            None,
            config.recording_time_limit(),
        )
        .await
        .context("Failed to configure capture source")?;

    let router_task = tokio::spawn(async move {
        if let Err(e) = router.run().await {
            tracing::error!("Router stopped: {}", e);
        }
    });

    // Press: keep trying until the first audio sample has built the engine.
    while !handle.start().await {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tracing::info!("Recording");

    let owner = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        owner.pause().await;
        tracing::info!("Paused");
        tokio::time::sleep(Duration::from_secs(1)).await;
        owner.start().await;
        tracing::info!("Resumed");
    });

    let mut last_decile = 0u32;
    let saved = loop {
        match events.recv().await {
            Ok(RecordingEvent::TimeChanged { elapsed, progress }) => {
                let decile = (progress * 10.0) as u32;
                if decile > last_decile {
                    last_decile = decile;
                    tracing::info!("Recorded {} ({:.0}%)", elapsed, progress * 100.0);
                }
            }
            Ok(RecordingEvent::Finished {
                location,
                error,
                completion,
            }) => {
                break persist_finished(&library, &location, error.as_ref(), &completion).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Skipped {} progress events", skipped);
            }
            Err(RecvError::Closed) => anyhow::bail!("Recorder stopped before finishing"),
        }
    };

    router_task.abort();
    let saved = saved.context("Failed to save recording")?;
    println!("{}", saved.display());
    Ok(())
}
