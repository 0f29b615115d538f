use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::meeting::TranscriptSegment;

/// Segment on the correction agent wire (`i`-indexed into the request list)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSegment {
    pub i: usize,
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl AgentSegment {
    /// Index a document segment for the agent request
    pub fn from_transcript(i: usize, segment: &TranscriptSegment) -> Self {
        Self {
            i,
            start_sec: segment.start_sec,
            end_sec: segment.end_sec,
            text: segment.text.clone(),
            speaker: segment.speaker.clone(),
        }
    }
}

/// Disambiguation question returned by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentQuestion {
    pub id: String,
    pub i: usize,
    pub original: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub question: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectTranscriptRequest {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub meeting_id: String,
    pub segments: Vec<AgentSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectTargetedRequest {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub meeting_id: String,
    pub segments: Vec<AgentSegment>,
    pub retranscribed_indices: Vec<usize>,
    /// Keys are stringified segment indices, per the agent contract
    pub user_corrected_indices: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrectionResponse {
    pub segments: Vec<AgentSegment>,
    pub questions: Vec<AgentQuestion>,
}

/// One user answer persisted as a correction rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionAnswer {
    pub original: String,
    pub corrected: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerQuestionsRequest {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub answers: Vec<CorrectionAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCorrectionsRequest {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub max_results: u32,
}

/// Stored correction rule (`{original, corrected, category}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRule {
    pub original: String,
    pub corrected: String,
    #[serde(default)]
    pub category: String,
}

/// Client over the external LLM correction agent
#[async_trait]
pub trait CorrectionAgent: Send + Sync {
    /// Full-transcript correction; may return follow-up questions
    async fn correct_transcript(&self, req: &CorrectTranscriptRequest) -> Result<CorrectionResponse>;

    /// Targeted correction after re-transcription and/or user answers
    async fn correct_targeted(&self, req: &CorrectTargetedRequest) -> Result<CorrectionResponse>;

    /// Persist user answers as correction rules server-side
    async fn answer_questions(&self, req: &AnswerQuestionsRequest) -> Result<()>;

    /// Known corrections for a client (and optionally project)
    async fn list_corrections(&self, req: &ListCorrectionsRequest) -> Result<Vec<CorrectionRule>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targeted_request_wire_shape() {
        let mut user_corrected = BTreeMap::new();
        user_corrected.insert("2".to_string(), "meeting notes".to_string());

        let req = CorrectTargetedRequest {
            client_id: "c1".to_string(),
            project_id: None,
            meeting_id: "m1".to_string(),
            segments: vec![AgentSegment {
                i: 0,
                start_sec: 0.0,
                end_sec: 5.0,
                text: "hello".to_string(),
                speaker: None,
            }],
            retranscribed_indices: vec![1],
            user_corrected_indices: user_corrected,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["retranscribedIndices"], serde_json::json!([1]));
        assert_eq!(json["userCorrectedIndices"]["2"], "meeting notes");
        assert_eq!(json["segments"][0]["startSec"], 0.0);
        assert!(json.get("projectId").is_none());
    }

    #[test]
    fn test_empty_user_corrected_indices_serializes_as_object() {
        let req = CorrectTargetedRequest {
            client_id: "c1".to_string(),
            project_id: None,
            meeting_id: "m1".to_string(),
            segments: vec![],
            retranscribed_indices: vec![0, 1],
            user_corrected_indices: BTreeMap::new(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"userCorrectedIndices\":{}"));
    }

    #[test]
    fn test_response_defaults_questions_empty() {
        let response: CorrectionResponse = serde_json::from_str(
            r#"{"segments": [{"i": 0, "startSec": 0.0, "endSec": 1.0, "text": "hi"}]}"#,
        )
        .unwrap();
        assert_eq!(response.segments.len(), 1);
        assert!(response.questions.is_empty());
    }
}
