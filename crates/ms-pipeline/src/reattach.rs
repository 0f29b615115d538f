use ms_core::backend::{TranscribeRequest, TranscriptionBackend};
use ms_core::config::PipelineConfig;
use ms_core::error::Result;
use ms_core::meeting::{Meeting, MeetingState};
use ms_core::notify::Notifier;
use ms_core::store::MeetingStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::correction::CorrectionService;
use crate::runner::complete_transcription;

/// Startup reconciliation: re-binds still-running external jobs to the
/// state machine, and reverts meetings whose work did not survive the
/// restart. Runs once, before the pipeline workers start.
pub struct ReattachController {
    store: Arc<dyn MeetingStore>,
    backend: Arc<dyn TranscriptionBackend>,
    correction: Arc<CorrectionService>,
    notifier: Notifier,
    config: PipelineConfig,
}

impl ReattachController {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        backend: Arc<dyn TranscriptionBackend>,
        correction: Arc<CorrectionService>,
        notifier: Notifier,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            backend,
            correction,
            notifier,
            config,
        }
    }

    /// Scan both transient states; returns the wait-tasks spawned for
    /// adopted jobs so the caller can track them.
    pub async fn run(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        for state in [MeetingState::Transcribing, MeetingState::Correcting] {
            for meeting in self.store.list_by_state(state).await? {
                match self.backend.find_active_job_for_meeting(&meeting.id).await {
                    Ok(Some(job_name)) => {
                        info!(
                            "Re-attaching meeting {} ({}) to job {}",
                            meeting.id, state, job_name
                        );
                        handles.push(self.spawn_wait(meeting, job_name));
                    }
                    Ok(None) => self.revert_orphan(meeting).await?,
                    Err(e) => {
                        // Leave it alone; the stuck detector gets another look
                        warn!("Could not look up jobs for meeting {}: {}", meeting.id, e);
                    }
                }
            }
        }
        Ok(handles)
    }

    fn spawn_wait(&self, meeting: Meeting, job_name: String) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let backend = Arc::clone(&self.backend);
        let correction = Arc::clone(&self.correction);
        let notifier = self.notifier.clone();
        let workspace = self.config.audio_root.clone();

        tokio::spawn(async move {
            let mut request = TranscribeRequest::new(&meeting.audio_file_path, &workspace);
            request.meeting_id = Some(meeting.id.clone());
            request.client_id = Some(meeting.client_id.clone());
            request.project_id = meeting.project_id.clone();

            let outcome = match backend.wait_for_existing_job(&job_name, &request).await {
                Ok(result) => match meeting.state {
                    MeetingState::Transcribing => {
                        complete_transcription(&store, &notifier, &meeting.id, result).await
                    }
                    // A job behind a CORRECTING meeting is a re-transcription;
                    // resume the targeted correction from its result
                    _ => correction.resume_after_retranscription(meeting.clone(), result).await,
                },
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                if e.is_connection() {
                    // The control plane went away, not the work itself;
                    // step back so the pipeline retries from scratch
                    let (from, to) = match meeting.state {
                        MeetingState::Transcribing => (MeetingState::Transcribing, MeetingState::Uploaded),
                        _ => (MeetingState::Correcting, MeetingState::Transcribed),
                    };
                    warn!(
                        "Lost connection while awaiting job {} for meeting {}: {}",
                        job_name, meeting.id, e
                    );
                    if let Ok(Some(mut reverted)) = store.compare_and_set_state(&meeting.id, from, to).await {
                        reverted.error_message = None;
                        if store.save(&reverted).await.is_ok() {
                            notifier.state_changed(&reverted);
                        }
                    }
                } else {
                    error!("Re-attached job {} for meeting {} failed: {}", job_name, meeting.id, e);
                    fail_meeting(&store, &notifier, &meeting.id, &e.to_string()).await;
                }
            }
        })
    }

    /// No live job survived the restart: step the meeting back so the
    /// pipeline redoes the lost work.
    async fn revert_orphan(&self, meeting: Meeting) -> Result<()> {
        let (from, to) = match meeting.state {
            MeetingState::Transcribing => (MeetingState::Transcribing, MeetingState::Uploaded),
            _ => (MeetingState::Correcting, MeetingState::Transcribed),
        };
        let Some(mut reverted) = self.store.compare_and_set_state(&meeting.id, from, to).await? else {
            return Ok(());
        };
        reverted.error_message = None;
        self.store.save(&reverted).await?;
        self.notifier.state_changed(&reverted);
        info!(
            "Meeting {} had no surviving job, reverted {} -> {}",
            reverted.id, from, to
        );
        Ok(())
    }
}

async fn fail_meeting(
    store: &Arc<dyn MeetingStore>,
    notifier: &Notifier,
    meeting_id: &str,
    message: &str,
) {
    let Ok(Some(mut meeting)) = store.find_by_id(meeting_id).await else {
        return;
    };
    if meeting.state.is_terminal() {
        return;
    }
    meeting.error_message = Some(message.to_string());
    if meeting.transition(MeetingState::Failed).is_err() {
        return;
    }
    if store.save(&meeting).await.is_ok() {
        notifier.state_changed(&meeting);
    }
}
