use ms_core::agent::{
    AgentSegment, AnswerQuestionsRequest, CorrectTargetedRequest, CorrectTranscriptRequest,
    CorrectionAgent, CorrectionAnswer, CorrectionResponse,
};
use ms_core::backend::{TranscribeRequest, TranscriptionBackend, TranscriptionResult};
use ms_core::config::PipelineConfig;
use ms_core::error::{MeetscribeError, Result};
use ms_core::heartbeat::HeartbeatTracker;
use ms_core::meeting::{CorrectionQuestion, ExtractionRange, Meeting, MeetingState, TranscriptSegment};
use ms_core::notify::Notifier;
use ms_core::store::MeetingStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One user answer to a correction question. A blank `corrected` means
/// "I don't know, please re-transcribe".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnswer {
    pub question_id: String,
    pub original: String,
    pub corrected: String,
    pub category: String,
}

impl QuestionAnswer {
    fn is_known(&self) -> bool {
        !self.corrected.trim().is_empty()
    }
}

/// Orchestrates the correction loop: full correction, answer handling,
/// and targeted re-transcription of ambiguous segments.
pub struct CorrectionService {
    store: Arc<dyn MeetingStore>,
    agent: Arc<dyn CorrectionAgent>,
    backend: Arc<dyn TranscriptionBackend>,
    notifier: Notifier,
    heartbeats: Arc<HeartbeatTracker>,
    config: PipelineConfig,
}

/// Inner message of an error, without the variant prefix
fn error_detail(err: &MeetscribeError) -> String {
    match err {
        MeetscribeError::Transcription(m)
        | MeetscribeError::Agent(m)
        | MeetscribeError::Connection(m)
        | MeetscribeError::Store(m)
        | MeetscribeError::Config(m)
        | MeetscribeError::InvalidState(m) => m.clone(),
        other => other.to_string(),
    }
}

impl CorrectionService {
    pub fn new(
        store: Arc<dyn MeetingStore>,
        agent: Arc<dyn CorrectionAgent>,
        backend: Arc<dyn TranscriptionBackend>,
        notifier: Notifier,
        heartbeats: Arc<HeartbeatTracker>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            agent,
            backend,
            notifier,
            heartbeats,
            config,
        }
    }

    /// Run the full correction loop for a meeting in TRANSCRIBED or
    /// CORRECTION_REVIEW. The outcome (CORRECTED, CORRECTION_REVIEW,
    /// reverted, or FAILED) is persisted here; only store-level failures
    /// propagate to the caller.
    pub async fn correct(&self, meeting: &Meeting) -> Result<()> {
        if !matches!(
            meeting.state,
            MeetingState::Transcribed | MeetingState::CorrectionReview
        ) {
            return Err(MeetscribeError::InvalidState(format!(
                "Cannot correct meeting {} in state {}",
                meeting.id, meeting.state
            )));
        }

        let Some(mut meeting) = self
            .store
            .compare_and_set_state(&meeting.id, meeting.state, MeetingState::Correcting)
            .await?
        else {
            debug!("Meeting {} was taken by another worker, skipping", meeting.id);
            return Ok(());
        };
        self.notifier.state_changed(&meeting);

        // Nothing to correct: write through as CORRECTED
        if meeting.raw_transcript_is_empty() {
            meeting.corrected_transcript_text = Some(String::new());
            meeting.corrected_transcript_segments.clear();
            meeting.correction_questions.clear();
            meeting.error_message = None;
            meeting.transition(MeetingState::Corrected)?;
            self.store.save(&meeting).await?;
            self.notifier.state_changed(&meeting);
            self.heartbeats.clear(&meeting.id);
            info!("Meeting {} has an empty transcript, corrected as-is", meeting.id);
            return Ok(());
        }

        let request = CorrectTranscriptRequest {
            client_id: meeting.client_id.clone(),
            project_id: meeting.project_id.clone(),
            meeting_id: meeting.id.clone(),
            segments: meeting
                .transcript_segments
                .iter()
                .enumerate()
                .map(|(i, segment)| AgentSegment::from_transcript(i, segment))
                .collect(),
        };

        match self.agent.correct_transcript(&request).await {
            Ok(response) => {
                let base = meeting.transcript_segments.clone();
                self.finish_correction(meeting, &base, response).await
            }
            Err(err) => {
                self.fail_or_revert(meeting, MeetingState::Transcribed, err)
                    .await
            }
        }
    }

    /// Apply user answers to a meeting in CORRECTION_REVIEW.
    ///
    /// Known answers become persistent correction rules; if any answer is
    /// unknown, the ambiguous segments are re-transcribed in-line.
    /// All-known answers revert the meeting to TRANSCRIBED so the pipeline
    /// re-runs a full correction with the fresh rules.
    pub async fn answer_questions(&self, meeting_id: &str, answers: &[QuestionAnswer]) -> Result<()> {
        let Some(meeting) = self.store.find_by_id(meeting_id).await? else {
            return Err(MeetscribeError::InvalidState(format!(
                "Unknown meeting {}",
                meeting_id
            )));
        };
        if meeting.state != MeetingState::CorrectionReview {
            return Err(MeetscribeError::InvalidState(format!(
                "Meeting {} is in {}, not CORRECTION_REVIEW",
                meeting_id, meeting.state
            )));
        }

        let (known, unknown): (Vec<_>, Vec<_>) =
            answers.iter().cloned().partition(QuestionAnswer::is_known);

        if !known.is_empty() {
            let request = AnswerQuestionsRequest {
                client_id: meeting.client_id.clone(),
                project_id: meeting.project_id.clone(),
                answers: known
                    .iter()
                    .map(|answer| CorrectionAnswer {
                        original: answer.original.clone(),
                        corrected: answer.corrected.clone(),
                        category: answer.category.clone(),
                    })
                    .collect(),
            };
            // The meeting stays in CORRECTION_REVIEW on failure so the
            // user can simply retry
            self.agent.answer_questions(&request).await?;
            info!(
                "Stored {} correction rules for client {}",
                known.len(),
                meeting.client_id
            );
        }

        if unknown.is_empty() {
            let Some(mut meeting) = self
                .store
                .compare_and_set_state(meeting_id, MeetingState::CorrectionReview, MeetingState::Transcribed)
                .await?
            else {
                return Ok(());
            };
            meeting.correction_questions.clear();
            meeting.error_message = None;
            self.store.save(&meeting).await?;
            self.notifier.state_changed(&meeting);
            return Ok(());
        }

        self.retranscribe_and_correct(&meeting, &unknown, &known).await
    }

    /// Re-transcribe the segments behind unknown answers with high-accuracy
    /// settings, then run a targeted correction over the merged transcript.
    pub async fn retranscribe_and_correct(
        &self,
        meeting: &Meeting,
        unknown: &[QuestionAnswer],
        known: &[QuestionAnswer],
    ) -> Result<()> {
        let revert_to = meeting.state;
        let Some(taken) = self
            .store
            .compare_and_set_state(&meeting.id, meeting.state, MeetingState::Correcting)
            .await?
        else {
            debug!("Meeting {} was taken by another worker, skipping", meeting.id);
            return Ok(());
        };
        self.notifier.state_changed(&taken);

        let indices: Vec<usize> = unknown
            .iter()
            .filter_map(|answer| self.segment_index_for(&taken, &answer.question_id))
            .collect();

        let known_by_segment: BTreeMap<usize, String> = known
            .iter()
            .filter_map(|answer| {
                self.segment_index_for(&taken, &answer.question_id)
                    .map(|i| (i, answer.corrected.clone()))
            })
            .collect();

        self.run_targeted(taken, &indices, known_by_segment, revert_to).await
    }

    /// User-initiated re-transcription of arbitrary segments
    pub async fn retranscribe_selected_segments(&self, meeting_id: &str, indices: &[usize]) -> Result<()> {
        let Some(meeting) = self.store.find_by_id(meeting_id).await? else {
            return Err(MeetscribeError::InvalidState(format!(
                "Unknown meeting {}",
                meeting_id
            )));
        };
        if !matches!(
            meeting.state,
            MeetingState::Transcribed | MeetingState::Corrected | MeetingState::CorrectionReview
        ) {
            return Err(MeetscribeError::InvalidState(format!(
                "Cannot re-transcribe meeting {} in state {}",
                meeting_id, meeting.state
            )));
        }

        let revert_to = meeting.state;
        let Some(taken) = self
            .store
            .compare_and_set_state(meeting_id, meeting.state, MeetingState::Correcting)
            .await?
        else {
            return Ok(());
        };
        self.notifier.state_changed(&taken);

        self.run_targeted(taken, indices, BTreeMap::new(), revert_to).await
    }

    /// Finish a correction pass that was interrupted by a restart: the
    /// re-attach controller hands over the completed re-transcription
    /// result and this picks up where the original call would have.
    pub async fn resume_after_retranscription(
        &self,
        meeting: Meeting,
        result: TranscriptionResult,
    ) -> Result<()> {
        let indices: Vec<usize> = result.text_by_segment.keys().copied().collect();
        self.finish_targeted(meeting, result, &indices, BTreeMap::new(), MeetingState::CorrectionReview)
            .await
    }

    fn segment_index_for(&self, meeting: &Meeting, question_id: &str) -> Option<usize> {
        let found = meeting
            .correction_questions
            .iter()
            .find(|question| question.question_id == question_id)
            .map(|question| question.segment_index);
        if found.is_none() {
            warn!(
                "Answer references unknown question {} on meeting {}",
                question_id, meeting.id
            );
        }
        found
    }

    /// Extraction windows around the given segments, padded and clamped
    fn extraction_ranges(&self, meeting: &Meeting, indices: &[usize]) -> Vec<ExtractionRange> {
        let padding = self.config.padding_seconds;
        indices
            .iter()
            .filter_map(|&i| {
                meeting.transcript_segments.get(i).map(|segment| ExtractionRange {
                    start: (segment.start_sec - padding).max(0.0),
                    end: segment.end_sec + padding,
                    segment_index: i,
                })
            })
            .collect()
    }

    fn transcribe_request(&self, meeting: &Meeting) -> TranscribeRequest {
        let mut request = TranscribeRequest::new(&meeting.audio_file_path, &self.config.audio_root);
        request.meeting_id = Some(meeting.id.clone());
        request.client_id = Some(meeting.client_id.clone());
        request.project_id = meeting.project_id.clone();
        request
    }

    /// Re-transcribe, then hand the merged transcript to the agent.
    /// `meeting` is already in CORRECTING.
    async fn run_targeted(
        &self,
        meeting: Meeting,
        indices: &[usize],
        known_by_segment: BTreeMap<usize, String>,
        revert_to: MeetingState,
    ) -> Result<()> {
        let ranges = self.extraction_ranges(&meeting, indices);
        if ranges.is_empty() && known_by_segment.is_empty() {
            return self
                .fail_or_revert(
                    meeting,
                    revert_to,
                    MeetscribeError::InvalidState("No segments resolved for re-transcription".to_string()),
                )
                .await;
        }

        let result = if ranges.is_empty() {
            TranscriptionResult::default()
        } else {
            let request = self.transcribe_request(&meeting);
            match self.backend.retranscribe(&request, &ranges).await {
                Ok(result) => result,
                Err(err) => return self.fail_or_revert(meeting, revert_to, err).await,
            }
        };

        self.finish_targeted(meeting, result, indices, known_by_segment, revert_to)
            .await
    }

    async fn finish_targeted(
        &self,
        meeting: Meeting,
        result: TranscriptionResult,
        indices: &[usize],
        known_by_segment: BTreeMap<usize, String>,
        revert_to: MeetingState,
    ) -> Result<()> {
        // Merged transcript: re-transcribed text wins, then user answers,
        // then the original segment text
        let merged: Vec<TranscriptSegment> = meeting
            .transcript_segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let mut merged = segment.clone();
                if let Some(text) = result.text_by_segment.get(&i) {
                    merged.text = text.clone();
                } else if let Some(text) = known_by_segment.get(&i) {
                    merged.text = text.clone();
                }
                merged
            })
            .collect();

        let retranscribed_indices: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|i| result.text_by_segment.contains_key(i))
            .collect();

        let request = CorrectTargetedRequest {
            client_id: meeting.client_id.clone(),
            project_id: meeting.project_id.clone(),
            meeting_id: meeting.id.clone(),
            segments: merged
                .iter()
                .enumerate()
                .map(|(i, segment)| AgentSegment::from_transcript(i, segment))
                .collect(),
            retranscribed_indices,
            user_corrected_indices: known_by_segment
                .iter()
                .map(|(i, text)| (i.to_string(), text.clone()))
                .collect(),
        };

        match self.agent.correct_targeted(&request).await {
            Ok(response) => self.finish_correction(meeting, &merged, response).await,
            Err(err) => self.fail_or_revert(meeting, revert_to, err).await,
        }
    }

    /// Overlay the agent response onto `base`, persist the outcome, and
    /// transition to CORRECTED or CORRECTION_REVIEW.
    async fn finish_correction(
        &self,
        mut meeting: Meeting,
        base: &[TranscriptSegment],
        response: CorrectionResponse,
    ) -> Result<()> {
        let mut corrected = base.to_vec();
        for segment in &response.segments {
            if let Some(target) = corrected.get_mut(segment.i) {
                target.text = segment.text.clone();
                // Original timing and speaker win where present
                if target.speaker.is_none() {
                    target.speaker = segment.speaker.clone();
                }
            }
        }

        let corrected_text = corrected
            .iter()
            .map(|segment| segment.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if corrected_text.is_empty() && !meeting.raw_transcript_is_empty() {
            meeting.error_message = Some("No transcript text after correction".to_string());
            meeting.transition(MeetingState::Failed)?;
            self.store.save(&meeting).await?;
            self.notifier.state_changed(&meeting);
            self.heartbeats.clear(&meeting.id);
            return Ok(());
        }

        meeting.corrected_transcript_text = Some(corrected_text);
        meeting.corrected_transcript_segments = corrected;
        meeting.error_message = None;

        let questions: Vec<CorrectionQuestion> = response
            .questions
            .into_iter()
            .map(|question| CorrectionQuestion {
                question_id: question.id,
                segment_index: question.i,
                original_text: question.original,
                correction_options: question.options,
                question: question.question,
                context: question.context,
            })
            .collect();

        if questions.is_empty() {
            meeting.correction_questions.clear();
            meeting.transition(MeetingState::Corrected)?;
        } else {
            info!(
                "Correction of meeting {} raised {} questions",
                meeting.id,
                questions.len()
            );
            meeting.correction_questions = questions;
            meeting.transition(MeetingState::CorrectionReview)?;
        }

        self.store.save(&meeting).await?;
        self.notifier.state_changed(&meeting);
        self.heartbeats.clear(&meeting.id);
        Ok(())
    }

    /// Connection errors revert so the pipeline (or the user) retries;
    /// everything else fails the meeting.
    async fn fail_or_revert(
        &self,
        mut meeting: Meeting,
        revert_to: MeetingState,
        err: MeetscribeError,
    ) -> Result<()> {
        if err.is_connection() {
            info!(
                "Correction of meeting {} hit a connection error, reverting to {} for retry: {}",
                meeting.id, revert_to, err
            );
            meeting.transition(revert_to)?;
            meeting.error_message = None;
        } else {
            warn!("Correction of meeting {} failed: {}", meeting.id, err);
            meeting.error_message = Some(format!("Correction error: {}", error_detail(&err)));
            meeting.transition(MeetingState::Failed)?;
        }
        self.store.save(&meeting).await?;
        self.notifier.state_changed(&meeting);
        self.heartbeats.clear(&meeting.id);
        Ok(())
    }
}
