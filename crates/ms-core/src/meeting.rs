use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{MeetscribeError, Result};

/// Meeting lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeetingState {
    Uploaded,
    Transcribing,
    Transcribed,
    Correcting,
    Corrected,
    CorrectionReview,
    Indexed,
    Failed,
}

/// Valid state transitions, as data.
///
/// Reverting edges (TRANSCRIBING -> UPLOADED, CORRECTING -> TRANSCRIBED,
/// CORRECTING -> CORRECTION_REVIEW) exist for connection-error retries and
/// stuck recovery; CORRECTED -> CORRECTING re-enters the loop for
/// user-initiated re-transcription.
const TRANSITIONS: &[(MeetingState, MeetingState)] = &[
    (MeetingState::Uploaded, MeetingState::Transcribing),
    (MeetingState::Uploaded, MeetingState::Failed),
    (MeetingState::Transcribing, MeetingState::Transcribed),
    (MeetingState::Transcribing, MeetingState::Uploaded),
    (MeetingState::Transcribing, MeetingState::Failed),
    (MeetingState::Transcribed, MeetingState::Correcting),
    (MeetingState::Transcribed, MeetingState::Failed),
    (MeetingState::Correcting, MeetingState::Corrected),
    (MeetingState::Correcting, MeetingState::CorrectionReview),
    (MeetingState::Correcting, MeetingState::Transcribed),
    (MeetingState::Correcting, MeetingState::Failed),
    (MeetingState::CorrectionReview, MeetingState::Transcribed),
    (MeetingState::CorrectionReview, MeetingState::Correcting),
    (MeetingState::CorrectionReview, MeetingState::Failed),
    (MeetingState::Corrected, MeetingState::Correcting),
    (MeetingState::Corrected, MeetingState::Indexed),
    (MeetingState::Corrected, MeetingState::Failed),
];

impl MeetingState {
    /// Whether `self -> next` appears in the transition table
    pub fn can_transition(self, next: MeetingState) -> bool {
        TRANSITIONS.iter().any(|&(from, to)| from == self && to == next)
    }

    /// Transient states held by exactly one pipeline worker at a time
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Transcribing | Self::Correcting)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Indexed | Self::Failed)
    }
}

impl std::fmt::Display for MeetingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uploaded => "UPLOADED",
            Self::Transcribing => "TRANSCRIBING",
            Self::Transcribed => "TRANSCRIBED",
            Self::Correcting => "CORRECTING",
            Self::Corrected => "CORRECTED",
            Self::CorrectionReview => "CORRECTION_REVIEW",
            Self::Indexed => "INDEXED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Time-bounded piece of transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// Agent-raised disambiguation item tied to a segment index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionQuestion {
    pub question_id: String,
    pub segment_index: usize,
    pub original_text: String,
    pub correction_options: Vec<String>,
    pub question: String,
    pub context: String,
}

/// Audio window to re-transcribe, plus the segment it replaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRange {
    pub start: f64,
    pub end: f64,
    pub segment_index: usize,
}

/// Current unix time in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A recording plus its derived transcript and metadata.
///
/// This is also the persisted document format; keys follow the wire
/// contract (camelCase).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Meeting {
    pub id: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_type: Option<String>,
    pub audio_file_path: String,

    pub state: MeetingState,
    pub state_changed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_text: Option<String>,
    pub transcript_segments: Vec<TranscriptSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_transcript_text: Option<String>,
    pub corrected_transcript_segments: Vec<TranscriptSegment>,

    pub correction_questions: Vec<CorrectionQuestion>,
}

impl Default for Meeting {
    fn default() -> Self {
        Self {
            id: String::new(),
            client_id: String::new(),
            project_id: None,
            title: None,
            started_at: None,
            stopped_at: None,
            duration_seconds: None,
            meeting_type: None,
            audio_input_type: None,
            audio_file_path: String::new(),
            state: MeetingState::Uploaded,
            state_changed_at: 0,
            error_message: None,
            transcript_text: None,
            transcript_segments: Vec::new(),
            corrected_transcript_text: None,
            corrected_transcript_segments: Vec::new(),
            correction_questions: Vec::new(),
        }
    }
}

impl Meeting {
    /// Create a freshly uploaded meeting
    pub fn new(id: impl Into<String>, client_id: impl Into<String>, audio_file_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            audio_file_path: audio_file_path.into(),
            state: MeetingState::Uploaded,
            state_changed_at: now_ms(),
            ..Self::default()
        }
    }

    /// Move to `next`, validating against the transition table.
    ///
    /// `state_changed_at` stays strictly monotonic even when two
    /// transitions land within the same millisecond.
    pub fn transition(&mut self, next: MeetingState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(MeetscribeError::InvalidState(format!(
                "Invalid transition {} -> {} for meeting {}",
                self.state, next, self.id
            )));
        }
        self.state = next;
        self.state_changed_at = now_ms().max(self.state_changed_at + 1);
        Ok(())
    }

    /// Whether the raw transcript is effectively empty
    pub fn raw_transcript_is_empty(&self) -> bool {
        self.transcript_segments.is_empty()
            && self
                .transcript_text
                .as_deref()
                .map_or(true, |t| t.trim().is_empty())
    }

    /// Segments for downstream rendering, preferring the corrected ones
    pub fn best_segments(&self) -> &[TranscriptSegment] {
        if self.corrected_transcript_segments.is_empty() {
            &self.transcript_segments
        } else {
            &self.corrected_transcript_segments
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&MeetingState::CorrectionReview).unwrap(),
            "\"CORRECTION_REVIEW\""
        );
        let state: MeetingState = serde_json::from_str("\"TRANSCRIBING\"").unwrap();
        assert_eq!(state, MeetingState::Transcribing);
    }

    #[test]
    fn test_happy_path_is_a_valid_walk() {
        let path = [
            MeetingState::Uploaded,
            MeetingState::Transcribing,
            MeetingState::Transcribed,
            MeetingState::Correcting,
            MeetingState::Corrected,
            MeetingState::Indexed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_review_loop_edges() {
        assert!(MeetingState::Correcting.can_transition(MeetingState::CorrectionReview));
        assert!(MeetingState::CorrectionReview.can_transition(MeetingState::Transcribed));
        assert!(MeetingState::CorrectionReview.can_transition(MeetingState::Correcting));
        assert!(!MeetingState::CorrectionReview.can_transition(MeetingState::Indexed));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut meeting = Meeting::new("m1", "c1", "/audio/m1.wav");
        let err = meeting.transition(MeetingState::Corrected).unwrap_err();
        assert!(matches!(err, MeetscribeError::InvalidState(_)));
        assert_eq!(meeting.state, MeetingState::Uploaded);
    }

    #[test]
    fn test_state_changed_at_monotonic() {
        let mut meeting = Meeting::new("m1", "c1", "/audio/m1.wav");
        let mut seen = vec![meeting.state_changed_at];
        meeting.transition(MeetingState::Transcribing).unwrap();
        seen.push(meeting.state_changed_at);
        meeting.transition(MeetingState::Transcribed).unwrap();
        seen.push(meeting.state_changed_at);
        meeting.transition(MeetingState::Correcting).unwrap();
        seen.push(meeting.state_changed_at);
        for pair in seen.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_document_roundtrip() {
        let mut meeting = Meeting::new("m1", "c1", "/audio/m1.wav");
        meeting.transcript_segments = vec![TranscriptSegment {
            start_sec: 0.0,
            end_sec: 5.0,
            text: "hello world".to_string(),
            speaker: Some("alice".to_string()),
        }];
        meeting.transcript_text = Some("hello world".to_string());

        let json = serde_json::to_string(&meeting).unwrap();
        assert!(json.contains("\"audioFilePath\""));
        assert!(json.contains("\"stateChangedAt\""));

        let parsed: Meeting = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, meeting.id);
        assert_eq!(parsed.transcript_segments, meeting.transcript_segments);
        assert_eq!(parsed.state, meeting.state);
    }

    #[test]
    fn test_best_segments_prefers_corrected() {
        let mut meeting = Meeting::new("m1", "c1", "/audio/m1.wav");
        meeting.transcript_segments = vec![TranscriptSegment {
            start_sec: 0.0,
            end_sec: 1.0,
            text: "raw".to_string(),
            speaker: None,
        }];
        assert_eq!(meeting.best_segments()[0].text, "raw");

        meeting.corrected_transcript_segments = vec![TranscriptSegment {
            start_sec: 0.0,
            end_sec: 1.0,
            text: "corrected".to_string(),
            speaker: None,
        }];
        assert_eq!(meeting.best_segments()[0].text, "corrected");
    }
}
