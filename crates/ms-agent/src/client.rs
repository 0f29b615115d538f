use async_trait::async_trait;
use ms_core::agent::{
    AnswerQuestionsRequest, CorrectTargetedRequest, CorrectTranscriptRequest, CorrectionAgent,
    CorrectionResponse, CorrectionRule, ListCorrectionsRequest,
};
use ms_core::error::{MeetscribeError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Wrapper shape of the list-corrections response:
/// `{corrections: [{metadata: {original, corrected, category}}]}`
#[derive(Debug, Deserialize)]
struct ListCorrectionsResponse {
    #[serde(default)]
    corrections: Vec<CorrectionEntry>,
}

#[derive(Debug, Deserialize)]
struct CorrectionEntry {
    metadata: CorrectionRule,
}

/// HTTP client over the external LLM correction agent
pub struct HttpCorrectionAgent {
    client: Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpCorrectionAgent {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            timeout_secs,
        }
    }

    /// POST a JSON body and decode a JSON response.
    ///
    /// Transport failures map to `Connection` so callers can distinguish
    /// retryable outages from agent-side errors.
    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    MeetscribeError::Connection(format!("{}: {}", url, e))
                } else {
                    MeetscribeError::Agent(format!("Request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!("Correction agent error (HTTP {}): {}", status, text);
            return Err(Self::map_http_error(status, &text));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MeetscribeError::Agent(format!("Failed to parse agent response: {}", e)))
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> MeetscribeError {
        match status.as_u16() {
            401 | 403 => MeetscribeError::Agent("Authentication failed at correction agent".to_string()),
            429 => MeetscribeError::Agent("Correction agent rate limited".to_string()),
            500..=599 => MeetscribeError::Agent(format!("Correction agent server error (HTTP {})", status)),
            _ => MeetscribeError::Agent(format!(
                "Correction agent request failed (HTTP {}): {}",
                status,
                body.chars().take(200).collect::<String>()
            )),
        }
    }
}

#[async_trait]
impl CorrectionAgent for HttpCorrectionAgent {
    async fn correct_transcript(&self, req: &CorrectTranscriptRequest) -> Result<CorrectionResponse> {
        tracing::debug!(
            "Requesting transcript correction for meeting {} ({} segments)",
            req.meeting_id,
            req.segments.len()
        );
        self.post_json("/v1/correct-transcript", req).await
    }

    async fn correct_targeted(&self, req: &CorrectTargetedRequest) -> Result<CorrectionResponse> {
        tracing::debug!(
            "Requesting targeted correction for meeting {} ({} retranscribed, {} user-corrected)",
            req.meeting_id,
            req.retranscribed_indices.len(),
            req.user_corrected_indices.len()
        );
        self.post_json("/v1/correct-targeted", req).await
    }

    async fn answer_questions(&self, req: &AnswerQuestionsRequest) -> Result<()> {
        tracing::debug!(
            "Submitting {} correction answers for client {}",
            req.answers.len(),
            req.client_id
        );
        let _: serde_json::Value = self.post_json("/v1/answer-questions", req).await?;
        Ok(())
    }

    async fn list_corrections(&self, req: &ListCorrectionsRequest) -> Result<Vec<CorrectionRule>> {
        let response: ListCorrectionsResponse = self.post_json("/v1/list-corrections", req).await?;
        Ok(response.corrections.into_iter().map(|c| c.metadata).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_defaults() {
        let agent = HttpCorrectionAgent::new("http://localhost:8700");
        assert_eq!(agent.base_url, "http://localhost:8700");
        assert_eq!(agent.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_timeout_override() {
        let agent = HttpCorrectionAgent::with_timeout("http://agent", 5);
        assert_eq!(agent.timeout_secs, 5);
    }

    #[test]
    fn test_list_corrections_response_shape() {
        let json = r#"{
            "corrections": [
                {"metadata": {"original": "Nevim", "corrected": "meeting notes", "category": "term"}},
                {"metadata": {"original": "kubernetis", "corrected": "Kubernetes"}}
            ]
        }"#;
        let response: ListCorrectionsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.corrections.len(), 2);
        assert_eq!(response.corrections[0].metadata.corrected, "meeting notes");
        assert_eq!(response.corrections[1].metadata.category, "");
    }

    #[test]
    fn test_http_error_mapping_is_hard() {
        let err = HttpCorrectionAgent::map_http_error(reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(!err.is_connection());
        let err = HttpCorrectionAgent::map_http_error(reqwest::StatusCode::UNPROCESSABLE_ENTITY, "bad");
        assert!(matches!(err, MeetscribeError::Agent(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_classified_transient() {
        // Port 1 is never listening; the send must fail at connect time.
        let agent = HttpCorrectionAgent::with_timeout("http://127.0.0.1:1", 2);
        let req = ListCorrectionsRequest {
            client_id: "c1".to_string(),
            project_id: None,
            max_results: 10,
        };
        let err = agent.list_corrections(&req).await.unwrap_err();
        assert!(err.is_connection(), "expected Connection, got {err}");
    }
}
