use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::meeting::{ExtractionRange, TranscriptSegment};

/// One transcription request handed to a backend
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio_path: PathBuf,
    pub workspace_path: PathBuf,
    pub meeting_id: Option<String>,
    pub client_id: Option<String>,
    pub project_id: Option<String>,
}

impl TranscribeRequest {
    pub fn new(audio_path: impl Into<PathBuf>, workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            audio_path: audio_path.into(),
            workspace_path: workspace_path.into(),
            meeting_id: None,
            client_id: None,
            project_id: None,
        }
    }
}

/// Segment as the speech engine reports it (result file / stdout / stream)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl RawSegment {
    pub fn into_transcript_segment(self) -> TranscriptSegment {
        TranscriptSegment {
            start_sec: self.start,
            end_sec: self.end,
            text: self.text,
            speaker: self.speaker,
        }
    }
}

/// Result payload shared by all execution modes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionResult {
    pub text: String,
    pub segments: Vec<RawSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Re-transcribed text per segment index (targeted runs only)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub text_by_segment: BTreeMap<usize, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionResult {
    pub fn into_transcript_segments(self) -> Vec<TranscriptSegment> {
        self.segments
            .into_iter()
            .map(RawSegment::into_transcript_segment)
            .collect()
    }
}

/// Progress telemetry emitted while a transcription runs.
///
/// Written continuously to `<audio>_progress.json` by the batch and
/// subprocess modes, streamed as SSE `progress` events by the remote mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptionProgress {
    pub percent: f64,
    pub segments_done: u64,
    pub elapsed_seconds: f64,
    pub updated_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_segment_text: Option<String>,
}

/// Unified transcription backend capability set.
///
/// One implementation per deployment mode; all share the options payload
/// and the progress contract.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe a full recording
    async fn transcribe(&self, req: &TranscribeRequest) -> Result<TranscriptionResult>;

    /// Re-transcribe selected time windows with high-accuracy settings;
    /// the result carries `text_by_segment` instead of a full transcript
    async fn retranscribe(
        &self,
        req: &TranscribeRequest,
        ranges: &[ExtractionRange],
    ) -> Result<TranscriptionResult>;

    /// Liveness check for the execution substrate
    async fn is_available(&self) -> bool;

    /// Delete any jobs labeled with this meeting; returns whether one existed
    async fn delete_jobs_for_meeting(&self, meeting_id: &str) -> Result<bool>;

    /// Name of a still-running job for this meeting, if any
    async fn find_active_job_for_meeting(&self, meeting_id: &str) -> Result<Option<String>>;

    /// Adopt a job created by a previous process and wait for its result
    async fn wait_for_existing_job(
        &self,
        job_name: &str,
        req: &TranscribeRequest,
    ) -> Result<TranscriptionResult>;
}
