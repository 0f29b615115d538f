use ms_core::backend::{TranscribeRequest, TranscriptionBackend, TranscriptionResult};
use ms_core::config::PipelineConfig;
use ms_core::error::{MeetscribeError, Result};
use ms_core::meeting::MeetingState;
use ms_core::notify::Notifier;
use ms_core::store::MeetingStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::correction::CorrectionService;
use crate::indexing::{self, IndexingQueue};

#[derive(Debug, Clone, Copy)]
enum Stage {
    Transcribe,
    Correct,
    Index,
}

impl Stage {
    fn source_state(self) -> MeetingState {
        match self {
            Self::Transcribe => MeetingState::Uploaded,
            Self::Correct => MeetingState::Transcribed,
            Self::Index => MeetingState::Corrected,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Transcribe => "transcription",
            Self::Correct => "correction",
            Self::Index => "indexing",
        }
    }
}

/// Three cooperative pollers moving meetings through the pipeline.
///
/// Each worker drains its source state oldest-first, then either loops
/// immediately (work was found) or sleeps for the idle interval. A failure
/// on one meeting marks it FAILED and never stalls the rest of the queue.
pub struct PipelineRunner {
    store: Arc<dyn MeetingStore>,
    backend: Arc<dyn TranscriptionBackend>,
    correction: Arc<CorrectionService>,
    queue: Arc<dyn IndexingQueue>,
    notifier: Notifier,
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        backend: Arc<dyn TranscriptionBackend>,
        correction: Arc<CorrectionService>,
        queue: Arc<dyn IndexingQueue>,
        notifier: Notifier,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            backend,
            correction,
            queue,
            notifier,
            config,
        }
    }

    /// Spawn the three workers; they stop when `shutdown` is cancelled.
    pub fn spawn(self: &Arc<Self>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        [Stage::Transcribe, Stage::Correct, Stage::Index]
            .into_iter()
            .map(|stage| {
                let runner = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    runner.worker_loop(stage, shutdown).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, stage: Stage, shutdown: CancellationToken) {
        info!("{} worker started", stage.name());
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let drained_any = self.drain(stage, Some(&shutdown)).await;
            if !drained_any {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(self.config.idle_poll_seconds)) => {}
                }
            }
        }
        info!("{} worker stopped", stage.name());
    }

    /// One drain pass over a stage; returns whether any meeting was handled
    async fn drain(&self, stage: Stage, shutdown: Option<&CancellationToken>) -> bool {
        let meetings = match self.store.list_by_state(stage.source_state()).await {
            Ok(meetings) => meetings,
            Err(e) => {
                error!("{} worker failed to poll the store: {}", stage.name(), e);
                return false;
            }
        };

        let mut drained_any = false;
        for meeting in meetings {
            if shutdown.is_some_and(|token| token.is_cancelled()) {
                break;
            }
            drained_any = true;
            let meeting_id = meeting.id.clone();

            let outcome = match stage {
                Stage::Transcribe => self.handle_transcription(&meeting.id).await,
                Stage::Correct => self.correction.correct(&meeting).await,
                Stage::Index => self.handle_indexing(&meeting.id).await,
            };

            if let Err(e) = outcome {
                error!("{} of meeting {} failed: {}", stage.name(), meeting_id, e);
                self.mark_failed(&meeting_id, &e).await;
            }
        }
        drained_any
    }

    /// Single poll pass over all three stages, for callers that drive the
    /// pipeline manually; returns whether any stage found work.
    pub async fn tick(&self) -> bool {
        let mut drained_any = false;
        for stage in [Stage::Transcribe, Stage::Correct, Stage::Index] {
            drained_any |= self.drain(stage, None).await;
        }
        drained_any
    }

    async fn handle_transcription(&self, meeting_id: &str) -> Result<()> {
        let Some(meeting) = self
            .store
            .compare_and_set_state(meeting_id, MeetingState::Uploaded, MeetingState::Transcribing)
            .await?
        else {
            debug!("Meeting {} was taken by another worker, skipping", meeting_id);
            return Ok(());
        };
        self.notifier.state_changed(&meeting);

        if !Path::new(&meeting.audio_file_path).exists() {
            return Err(MeetscribeError::Transcription(format!(
                "Missing audio file: {}",
                meeting.audio_file_path
            )));
        }

        let mut request = TranscribeRequest::new(&meeting.audio_file_path, &self.config.audio_root);
        request.meeting_id = Some(meeting.id.clone());
        request.client_id = Some(meeting.client_id.clone());
        request.project_id = meeting.project_id.clone();

        let result = self.backend.transcribe(&request).await?;
        complete_transcription(&self.store, &self.notifier, &meeting.id, result).await
    }

    async fn handle_indexing(&self, meeting_id: &str) -> Result<()> {
        let Some(meeting) = self.store.find_by_id(meeting_id).await? else {
            return Ok(());
        };
        if meeting.state != MeetingState::Corrected {
            return Ok(());
        }

        self.queue.enqueue(indexing::build_task(&meeting)).await?;

        let Some(updated) = self
            .store
            .compare_and_set_state(meeting_id, MeetingState::Corrected, MeetingState::Indexed)
            .await?
        else {
            return Ok(());
        };
        self.notifier.state_changed(&updated);
        info!("Meeting {} queued for indexing", meeting_id);
        Ok(())
    }

    /// Persist FAILED with the error's message and keep the pipeline moving
    async fn mark_failed(&self, meeting_id: &str, err: &MeetscribeError) {
        let loaded = match self.store.find_by_id(meeting_id).await {
            Ok(Some(meeting)) => meeting,
            Ok(None) => return,
            Err(e) => {
                error!("Could not load meeting {} to mark it failed: {}", meeting_id, e);
                return;
            }
        };

        let mut meeting = loaded;
        if meeting.state.is_terminal() {
            return;
        }
        meeting.error_message = Some(err.to_string());
        if let Err(e) = meeting.transition(MeetingState::Failed) {
            error!("Could not fail meeting {}: {}", meeting_id, e);
            return;
        }
        if let Err(e) = self.store.save(&meeting).await {
            error!("Could not persist failure of meeting {}: {}", meeting_id, e);
            return;
        }
        self.notifier.state_changed(&meeting);
    }
}

/// Persist a finished transcription and move the meeting to TRANSCRIBED.
/// Shared between the pipeline worker and the re-attach controller.
pub(crate) async fn complete_transcription(
    store: &Arc<dyn MeetingStore>,
    notifier: &Notifier,
    meeting_id: &str,
    result: TranscriptionResult,
) -> Result<()> {
    let Some(mut meeting) = store.find_by_id(meeting_id).await? else {
        return Err(MeetscribeError::Store(format!(
            "Meeting {} disappeared during transcription",
            meeting_id
        )));
    };

    meeting.transcript_text = Some(result.text.clone());
    if meeting.duration_seconds.is_none() {
        meeting.duration_seconds = result.duration;
    }
    meeting.transcript_segments = result.into_transcript_segments();
    meeting.error_message = None;
    meeting.transition(MeetingState::Transcribed)?;

    store.save(&meeting).await?;
    notifier.state_changed(&meeting);
    info!(
        "Meeting {} transcribed ({} segments)",
        meeting_id,
        meeting.transcript_segments.len()
    );
    Ok(())
}
