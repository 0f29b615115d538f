use ms_agent::HttpCorrectionAgent;
use ms_core::config::PipelineConfig;
use ms_core::heartbeat::HeartbeatTracker;
use ms_core::notify::Notifier;
use ms_core::store::MeetingStore;
use ms_pipeline::{
    ChannelIndexingQueue, CorrectionService, PipelineRunner, ReattachController, StuckDetector,
};
use ms_store::JsonMeetingStore;
use ms_stt::ProgressReporter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn load_config() -> PipelineConfig {
    // An explicit path wins; otherwise the default location, if present
    let path = std::env::args().nth(1).map(std::path::PathBuf::from).or_else(|| {
        PipelineConfig::default_config_file()
            .ok()
            .filter(|p| p.exists())
    });

    match path {
        Some(path) => match PipelineConfig::load_from_file(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => {
            tracing::info!("No config file found, using defaults");
            PipelineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ms_core=debug,ms_agent=debug,ms_stt=debug,ms_store=debug,ms_pipeline=debug,info".into()
            }),
        )
        .init();

    let config = load_config();

    let notifier = Notifier::default();
    let heartbeats = Arc::new(HeartbeatTracker::new());
    let store: Arc<dyn MeetingStore> = Arc::new(JsonMeetingStore::new(&config.data_dir)?);
    let agent = Arc::new(HttpCorrectionAgent::new(config.correction_agent_url.clone()));

    let reporter = ProgressReporter::new(notifier.clone(), heartbeats.clone(), store.clone());
    let backend = ms_stt::build_backend(&config, agent.clone(), reporter).await?;
    if !backend.is_available().await {
        tracing::warn!("Transcription backend is not reachable yet; meetings will wait");
    }

    let correction = Arc::new(CorrectionService::new(
        store.clone(),
        agent.clone(),
        backend.clone(),
        notifier.clone(),
        heartbeats.clone(),
        config.clone(),
    ));

    // Indexing hand-off: drain the queue into the log until a downstream
    // indexer consumes it
    let (queue, mut indexing_rx) = ChannelIndexingQueue::new(64);
    tokio::spawn(async move {
        while let Some(task) = indexing_rx.recv().await {
            tracing::info!(
                "Indexing task ready: {} ({} bytes)",
                task.correlation_id,
                task.content.len()
            );
        }
    });

    // Notification subscribers are external; mirror events into the log
    let mut notifications = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = notifications.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!("notification {}", json),
                Err(e) => tracing::warn!("Unserializable notification: {}", e),
            }
        }
    });

    // Re-bind running jobs before the pipelines start polling
    let reattach = ReattachController::new(
        store.clone(),
        backend.clone(),
        correction.clone(),
        notifier.clone(),
        config.clone(),
    );
    let reattach_handles = reattach.run().await?;
    if !reattach_handles.is_empty() {
        tracing::info!("Re-attached {} running transcription jobs", reattach_handles.len());
    }

    let shutdown = CancellationToken::new();

    let detector = Arc::new(StuckDetector::new(
        store.clone(),
        backend.clone(),
        heartbeats.clone(),
        notifier.clone(),
        config.clone(),
    ));
    let detector_handle = detector.spawn(&shutdown);

    let runner = Arc::new(PipelineRunner::new(
        store,
        backend,
        correction,
        Arc::new(queue),
        notifier,
        config,
    ));
    let worker_handles = runner.spawn(&shutdown);

    tracing::info!("meetscribed running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    shutdown.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = detector_handle.await;
    for handle in reattach_handles {
        handle.abort();
    }

    Ok(())
}
