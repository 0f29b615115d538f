use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::StreamExt;
use ms_core::agent::CorrectionAgent;
use ms_core::backend::{TranscribeRequest, TranscriptionBackend, TranscriptionProgress, TranscriptionResult};
use ms_core::config::PipelineConfig;
use ms_core::error::{MeetscribeError, Result};
use ms_core::meeting::ExtractionRange;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::options::{
    self, audio_duration_seconds, dynamic_timeout, progress_file_path, retranscribe_timeout,
    WhisperOptions,
};
use crate::progress::ProgressReporter;
use crate::prompt::build_initial_prompt;

/// Options travel in this header as base64-encoded JSON (terms in the
/// initial prompt are not header-safe); the audio is the request body.
const OPTIONS_HEADER: &str = "x-transcribe-options";

/// One server-sent event frame
#[derive(Debug, PartialEq)]
struct SseFrame {
    event: String,
    data: String,
}

/// Parse one `event:`/`data:` frame. Comment lines and unknown fields are
/// ignored; multiple data lines concatenate with newlines.
fn parse_sse_frame(frame: &str) -> Option<SseFrame> {
    let mut event = String::new();
    let mut data_lines = Vec::new();
    for line in frame.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start().to_string());
        }
    }
    if event.is_empty() && data_lines.is_empty() {
        None
    } else {
        Some(SseFrame {
            event,
            data: data_lines.join("\n"),
        })
    }
}

/// Remote streaming HTTP backend.
///
/// Uploads the audio as a chunked POST body and consumes the server-sent
/// event stream: `progress` events are mirrored to subscribers, the final
/// `result` or `error` event terminates the call.
pub struct RestRemoteBackend {
    client: Client,
    base_url: String,
    config: PipelineConfig,
    agent: Arc<dyn CorrectionAgent>,
    reporter: ProgressReporter,
}

impl RestRemoteBackend {
    pub fn new(
        base_url: impl Into<String>,
        config: PipelineConfig,
        agent: Arc<dyn CorrectionAgent>,
        reporter: ProgressReporter,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            config,
            agent,
            reporter,
        }
    }

    async fn stream_transcription(
        &self,
        req: &TranscribeRequest,
        options: &WhisperOptions,
        timeout: Duration,
    ) -> Result<TranscriptionResult> {
        let file = tokio::fs::File::open(&req.audio_path).await.map_err(|e| {
            MeetscribeError::Transcription(format!(
                "Missing audio file: {} ({})",
                req.audio_path.display(),
                e
            ))
        })?;

        let options_json = serde_json::to_string(options)?;
        let url = format!("{}/v1/transcribe", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .header(OPTIONS_HEADER, BASE64.encode(&options_json))
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    MeetscribeError::Connection(format!("{}: {}", url, e))
                } else {
                    MeetscribeError::Transcription(format!("Upload to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeetscribeError::Transcription(format!(
                "Remote transcription failed (HTTP {}): {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        tokio::time::timeout(timeout, self.consume_events(req, response))
            .await
            .map_err(|_| {
                MeetscribeError::Transcription(format!(
                    "Remote transcription timed out after {}s",
                    timeout.as_secs()
                ))
            })?
    }

    async fn consume_events(
        &self,
        req: &TranscribeRequest,
        response: reqwest::Response,
    ) -> Result<TranscriptionResult> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| MeetscribeError::Connection(format!("Event stream interrupted: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find("\n\n") {
                let frame: String = buffer.drain(..pos + 2).collect();
                let Some(frame) = parse_sse_frame(&frame) else {
                    continue;
                };

                match frame.event.as_str() {
                    "progress" => {
                        if let Ok(progress) = serde_json::from_str::<TranscriptionProgress>(&frame.data) {
                            self.reporter
                                .report(req.meeting_id.as_deref(), req.client_id.as_deref(), &progress)
                                .await;
                        }
                    }
                    "result" => {
                        let result: TranscriptionResult = serde_json::from_str(&frame.data).map_err(|e| {
                            MeetscribeError::Transcription(format!("Malformed result event: {}", e))
                        })?;
                        if let Some(error) = &result.error {
                            return Err(MeetscribeError::Transcription(error.clone()));
                        }
                        return Ok(result);
                    }
                    "error" => {
                        let message = serde_json::from_str::<serde_json::Value>(&frame.data)
                            .ok()
                            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                            .unwrap_or_else(|| frame.data.clone());
                        return Err(MeetscribeError::Transcription(message));
                    }
                    other => debug!("Ignoring unknown stream event {:?}", other),
                }
            }
        }

        Err(MeetscribeError::Connection(
            "Event stream ended without a result".to_string(),
        ))
    }
}

#[async_trait]
impl TranscriptionBackend for RestRemoteBackend {
    async fn transcribe(&self, req: &TranscribeRequest) -> Result<TranscriptionResult> {
        let prompt = build_initial_prompt(self.agent.as_ref(), req).await;
        let options = options::transcribe_options(&self.config, &progress_file_path(&req.audio_path), prompt);
        let timeout = dynamic_timeout(audio_duration_seconds(&req.audio_path), &self.config);
        info!(
            "Streaming transcription of {} to {} (timeout {}s)",
            req.audio_path.display(),
            self.base_url,
            timeout.as_secs()
        );
        self.stream_transcription(req, &options, timeout).await
    }

    async fn retranscribe(
        &self,
        req: &TranscribeRequest,
        ranges: &[ExtractionRange],
    ) -> Result<TranscriptionResult> {
        let prompt = build_initial_prompt(self.agent.as_ref(), req).await;
        let options =
            options::retranscribe_options(&self.config, &progress_file_path(&req.audio_path), prompt, ranges);
        self.stream_transcription(req, &options, retranscribe_timeout(ranges)).await
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn delete_jobs_for_meeting(&self, _meeting_id: &str) -> Result<bool> {
        // The remote service owns no durable jobs on our behalf
        Ok(false)
    }

    async fn find_active_job_for_meeting(&self, _meeting_id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn wait_for_existing_job(
        &self,
        job_name: &str,
        _req: &TranscribeRequest,
    ) -> Result<TranscriptionResult> {
        Err(MeetscribeError::InvalidState(format!(
            "Remote streaming jobs cannot be re-attached (job {})",
            job_name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_frame() {
        let frame = parse_sse_frame("event: progress\ndata: {\"percent\": 12.0}").unwrap();
        assert_eq!(frame.event, "progress");
        assert_eq!(frame.data, "{\"percent\": 12.0}");
    }

    #[test]
    fn test_parse_sse_frame_multiline_data() {
        let frame = parse_sse_frame("event: result\ndata: {\"text\":\ndata: \"hi\"}").unwrap();
        assert_eq!(frame.data, "{\"text\":\n\"hi\"}");
    }

    #[test]
    fn test_parse_sse_frame_empty() {
        assert!(parse_sse_frame("").is_none());
        assert!(parse_sse_frame(": keep-alive comment").is_none());
    }

    #[test]
    fn test_progress_event_payload_parses() {
        let data = r#"{"percent": 30.0, "segmentsDone": 5, "elapsedSeconds": 12.0, "lastSegmentText": "hello"}"#;
        let progress: TranscriptionProgress = serde_json::from_str(data).unwrap();
        assert_eq!(progress.last_segment_text.as_deref(), Some("hello"));
    }
}
