use ms_core::backend::TranscriptionBackend;
use ms_core::config::PipelineConfig;
use ms_core::error::Result;
use ms_core::heartbeat::HeartbeatTracker;
use ms_core::meeting::{now_ms, MeetingState};
use ms_core::notify::Notifier;
use ms_core::store::MeetingStore;
use ms_stt::options::{audio_duration_seconds, dynamic_timeout};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Periodic sweep reverting meetings whose work was lost.
///
/// A CORRECTING meeting is stuck when its state is old and no heartbeat
/// proves progress; a TRANSCRIBING meeting is stuck when its wall-clock
/// budget is spent and no external job carries its label. Heartbeats are
/// process-local, so no reverting sweep runs until one stuck-threshold
/// after startup.
pub struct StuckDetector {
    store: Arc<dyn MeetingStore>,
    backend: Arc<dyn TranscriptionBackend>,
    heartbeats: Arc<HeartbeatTracker>,
    notifier: Notifier,
    config: PipelineConfig,
    started_at: Instant,
}

impl StuckDetector {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        backend: Arc<dyn TranscriptionBackend>,
        heartbeats: Arc<HeartbeatTracker>,
        notifier: Notifier,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            backend,
            heartbeats,
            notifier,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: &CancellationToken) -> JoinHandle<()> {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(self.config.sweep_interval_seconds));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!("Stuck-detector sweep failed: {}", e);
                        }
                    }
                }
            }
            info!("Stuck detector stopped");
        })
    }

    /// One sweep over both transient states
    pub async fn sweep(&self) -> Result<()> {
        if self.started_at.elapsed() < Duration::from_secs(self.config.stuck_threshold_seconds) {
            // Startup grace: heartbeats from the previous process are gone
            return Ok(());
        }
        self.sweep_correcting().await?;
        self.sweep_transcribing().await
    }

    async fn sweep_correcting(&self) -> Result<()> {
        let stuck_threshold_ms = self.config.stuck_threshold_seconds * 1000;
        let heartbeat_threshold = Duration::from_secs(self.config.heartbeat_threshold_seconds);

        for meeting in self.store.list_by_state(MeetingState::Correcting).await? {
            let age_ms = now_ms().saturating_sub(meeting.state_changed_at);
            if age_ms < stuck_threshold_ms {
                continue;
            }
            let heartbeat_fresh = self
                .heartbeats
                .last(&meeting.id)
                .is_some_and(|at| at.elapsed() < heartbeat_threshold);
            if heartbeat_fresh {
                continue;
            }

            let Some(mut reverted) = self
                .store
                .compare_and_set_state(&meeting.id, MeetingState::Correcting, MeetingState::Transcribed)
                .await?
            else {
                continue;
            };
            reverted.error_message = Some("Stuck in CORRECTING".to_string());
            self.store.save(&reverted).await?;
            self.notifier.state_changed(&reverted);
            self.heartbeats.clear(&reverted.id);
            warn!(
                "Meeting {} was stuck in CORRECTING for {}s, reverted to TRANSCRIBED",
                reverted.id,
                age_ms / 1000
            );
        }
        Ok(())
    }

    async fn sweep_transcribing(&self) -> Result<()> {
        for meeting in self.store.list_by_state(MeetingState::Transcribing).await? {
            let budget = dynamic_timeout(
                audio_duration_seconds(Path::new(&meeting.audio_file_path)),
                &self.config,
            );
            let age_ms = now_ms().saturating_sub(meeting.state_changed_at);
            if Duration::from_millis(age_ms) < budget {
                continue;
            }

            // A live job means the re-attach path still owns this meeting
            match self.backend.find_active_job_for_meeting(&meeting.id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    warn!("Could not check jobs for meeting {}: {}", meeting.id, e);
                    continue;
                }
            }

            let Some(mut reverted) = self
                .store
                .compare_and_set_state(&meeting.id, MeetingState::Transcribing, MeetingState::Uploaded)
                .await?
            else {
                continue;
            };
            reverted.error_message = Some("Stuck in TRANSCRIBING".to_string());
            self.store.save(&reverted).await?;
            self.notifier.state_changed(&reverted);
            warn!(
                "Meeting {} was stuck in TRANSCRIBING past its {}s budget, reverted to UPLOADED",
                reverted.id,
                budget.as_secs()
            );
        }
        Ok(())
    }
}
