use async_trait::async_trait;
use ms_core::agent::CorrectionAgent;
use ms_core::backend::{TranscribeRequest, TranscriptionBackend, TranscriptionResult};
use ms_core::config::PipelineConfig;
use ms_core::error::{MeetscribeError, Result};
use ms_core::meeting::ExtractionRange;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::options::{
    self, audio_duration_seconds, dynamic_timeout, progress_file_path, retranscribe_timeout,
    ScratchFiles, WhisperOptions,
};
use crate::progress::{read_progress_file, ProgressReporter};
use crate::prompt::build_initial_prompt;

/// Local subprocess backend.
///
/// Spawns the transcriber binary with `(audioPath, optionsJson)`, captures
/// stdout as the result JSON and logs stderr. The progress file is polled
/// on the configured cadence while the child runs.
pub struct LocalProcessBackend {
    config: PipelineConfig,
    agent: Arc<dyn CorrectionAgent>,
    reporter: ProgressReporter,
}

impl LocalProcessBackend {
    pub fn new(config: PipelineConfig, agent: Arc<dyn CorrectionAgent>, reporter: ProgressReporter) -> Self {
        Self {
            config,
            agent,
            reporter,
        }
    }

    async fn run(
        &self,
        req: &TranscribeRequest,
        options: &WhisperOptions,
        timeout: Duration,
    ) -> Result<TranscriptionResult> {
        if !req.audio_path.exists() {
            return Err(MeetscribeError::Transcription(format!(
                "Missing audio file: {}",
                req.audio_path.display()
            )));
        }

        let _scratch = ScratchFiles::for_audio(&req.audio_path);
        let progress_path = progress_file_path(&req.audio_path);
        let options_json = serde_json::to_string(options)?;

        let mut child = Command::new(&self.config.transcriber_binary)
            .arg(&req.audio_path)
            .arg(&options_json)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                MeetscribeError::Transcription(format!(
                    "Failed to spawn transcriber {}: {}",
                    self.config.transcriber_binary.display(),
                    e
                ))
            })?;

        // Drain both pipes concurrently so the child never blocks on a
        // full pipe buffer.
        let mut stdout_pipe = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let started = Instant::now();
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| {
                        MeetscribeError::Transcription(format!("Failed to await transcriber: {}", e))
                    })?;
                }
                _ = interval.tick() => {
                    if let Some(progress) = read_progress_file(&progress_path).await {
                        self.reporter
                            .report(req.meeting_id.as_deref(), req.client_id.as_deref(), &progress)
                            .await;
                    }
                    if started.elapsed() >= timeout {
                        let _ = child.kill().await;
                        return Err(MeetscribeError::Transcription(format!(
                            "Transcriber timed out after {}s",
                            timeout.as_secs()
                        )));
                    }
                }
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        if !stderr.trim().is_empty() {
            for line in stderr.lines() {
                info!(target: "transcriber", "{}", line);
            }
        }

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            warn!("Transcriber exited with code {}", code);
            return Err(MeetscribeError::Transcription(format!(
                "Transcriber exited with code {}: {}",
                code,
                stderr.lines().last().unwrap_or("").trim()
            )));
        }

        let result: TranscriptionResult = serde_json::from_str(stdout.trim())
            .map_err(|e| MeetscribeError::Transcription(format!("Malformed transcriber output: {}", e)))?;
        if let Some(error) = &result.error {
            return Err(MeetscribeError::Transcription(error.clone()));
        }
        Ok(result)
    }
}

#[async_trait]
impl TranscriptionBackend for LocalProcessBackend {
    async fn transcribe(&self, req: &TranscribeRequest) -> Result<TranscriptionResult> {
        let prompt = build_initial_prompt(self.agent.as_ref(), req).await;
        let options = options::transcribe_options(&self.config, &progress_file_path(&req.audio_path), prompt);
        let timeout = dynamic_timeout(audio_duration_seconds(&req.audio_path), &self.config);
        self.run(req, &options, timeout).await
    }

    async fn retranscribe(
        &self,
        req: &TranscribeRequest,
        ranges: &[ExtractionRange],
    ) -> Result<TranscriptionResult> {
        let prompt = build_initial_prompt(self.agent.as_ref(), req).await;
        let options =
            options::retranscribe_options(&self.config, &progress_file_path(&req.audio_path), prompt, ranges);
        self.run(req, &options, retranscribe_timeout(ranges)).await
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.config.transcriber_binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok()
    }

    async fn delete_jobs_for_meeting(&self, _meeting_id: &str) -> Result<bool> {
        // Subprocesses die with this process; there is nothing to delete
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
            "Local subprocess jobs do not survive restarts (job {})",
            job_name
        )))
    }
}
