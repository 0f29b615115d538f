use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::ResourceExt;
use ms_core::agent::CorrectionAgent;
use ms_core::backend::{TranscribeRequest, TranscriptionBackend, TranscriptionResult};
use ms_core::config::PipelineConfig;
use ms_core::error::{MeetscribeError, Result};
use ms_core::meeting::ExtractionRange;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::options::{
    self, audio_duration_seconds, dynamic_timeout, progress_file_path, result_file_path,
    retranscribe_timeout, ScratchFiles, WhisperOptions,
};
use crate::progress::{read_progress_file, ProgressReporter};
use crate::prompt::build_initial_prompt;

const MEETING_ID_LABEL: &str = "meeting-id";

/// In-cluster batch-job backend.
///
/// Each transcription becomes a single-attempt Job labeled with the
/// meeting id; the transcription container communicates through the shared
/// workspace mount (result and progress files) and is polled on a fixed
/// cadence until it terminates or the wall-clock budget runs out.
pub struct KubernetesBackend {
    client: kube::Client,
    jobs: Api<Job>,
    config: PipelineConfig,
    agent: Arc<dyn CorrectionAgent>,
    reporter: ProgressReporter,
}

impl KubernetesBackend {
    pub async fn new(
        config: PipelineConfig,
        agent: Arc<dyn CorrectionAgent>,
        reporter: ProgressReporter,
    ) -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| MeetscribeError::Config(format!("Failed to build Kubernetes client: {}", e)))?;
        let jobs = Api::namespaced(client.clone(), &config.kube_namespace);
        Ok(Self {
            client,
            jobs,
            config,
            agent,
            reporter,
        })
    }

    /// Memory request/limit per whisper model size
    fn memory_for_model(model: &str) -> (&'static str, &'static str) {
        match model {
            "tiny" | "base" => ("512Mi", "2Gi"),
            "small" => ("1Gi", "3Gi"),
            "medium" => ("2Gi", "6Gi"),
            "large-v3" => ("4Gi", "12Gi"),
            _ => ("512Mi", "2Gi"),
        }
    }

    /// DNS-1123-safe label value / name fragment from an opaque id
    fn sanitize(id: &str) -> String {
        let mut out: String = id
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        out.truncate(40);
        out.trim_matches('-').to_string()
    }

    fn job_name(&self, meeting_id: Option<&str>) -> String {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let fragment = meeting_id.map(Self::sanitize).unwrap_or_else(|| "adhoc".to_string());
        let mut name = format!("{}-stt-{}-{}", self.config.service_name, fragment, epoch);
        name.truncate(63);
        name.trim_matches('-').to_string()
    }

    fn build_job(&self, name: &str, req: &TranscribeRequest, options: &WhisperOptions) -> Result<Job> {
        let (memory_request, memory_limit) = Self::memory_for_model(&options.model);
        let options_json = serde_json::to_string(options)?;
        let workspace = req.workspace_path.display().to_string();
        let audio = req.audio_path.display().to_string();
        let result_file = result_file_path(&req.audio_path).display().to_string();
        let meeting_label = req
            .meeting_id
            .as_deref()
            .map(Self::sanitize)
            .unwrap_or_else(|| "adhoc".to_string());

        let job: Job = serde_json::from_value(serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "labels": {
                    "app": self.config.service_name,
                    "meeting-id": meeting_label,
                }
            },
            "spec": {
                "backoffLimit": 0,
                "ttlSecondsAfterFinished": 3600,
                "template": {
                    "metadata": {
                        "labels": {
                            "app": self.config.service_name,
                            "meeting-id": meeting_label,
                        }
                    },
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "whisper",
                            "image": self.config.job_image,
                            "env": [
                                {"name": "WORKSPACE", "value": workspace},
                                {"name": "AUDIO_FILE", "value": audio},
                                {"name": "RESULT_FILE", "value": result_file},
                                {"name": "PROGRESS_FILE", "value": options.progress_file},
                                {"name": "WHISPER_OPTIONS", "value": options_json},
                            ],
                            "resources": {
                                "requests": {"cpu": "500m", "memory": memory_request},
                                "limits": {"cpu": "2", "memory": memory_limit},
                            },
                            "volumeMounts": [{"name": "workspace", "mountPath": workspace}],
                        }],
                        "volumes": [{
                            "name": "workspace",
                            "hostPath": {"path": workspace},
                        }],
                    }
                }
            }
        }))?;
        Ok(job)
    }

    async fn read_result(&self, audio_path: &Path) -> Result<TranscriptionResult> {
        let path = result_file_path(audio_path);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            MeetscribeError::Transcription(format!(
                "Job succeeded but result file {} is unreadable: {}",
                path.display(),
                e
            ))
        })?;
        let result: TranscriptionResult = serde_json::from_str(&content)
            .map_err(|e| MeetscribeError::Transcription(format!("Malformed result file: {}", e)))?;
        if let Some(error) = &result.error {
            return Err(MeetscribeError::Transcription(error.clone()));
        }
        Ok(result)
    }

    /// Poll a job until it terminates, mirroring progress on every tick.
    async fn poll_job(
        &self,
        job_name: &str,
        req: &TranscribeRequest,
        timeout: Duration,
    ) -> Result<TranscriptionResult> {
        let progress_path = progress_file_path(&req.audio_path);
        let started = Instant::now();
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Some(progress) = read_progress_file(&progress_path).await {
                self.reporter
                    .report(req.meeting_id.as_deref(), req.client_id.as_deref(), &progress)
                    .await;
            }

            let job = self
                .jobs
                .get(job_name)
                .await
                .map_err(|e| MeetscribeError::Transcription(format!("Failed to poll job {}: {}", job_name, e)))?;

            let status = job.status.unwrap_or_default();
            if status.succeeded.unwrap_or(0) > 0 {
                info!("Transcription job {} succeeded", job_name);
                return self.read_result(&req.audio_path).await;
            }
            if status.failed.unwrap_or(0) > 0 {
                return Err(MeetscribeError::Transcription(format!(
                    "Transcription job {} failed",
                    job_name
                )));
            }

            if started.elapsed() >= timeout {
                warn!("Transcription job {} timed out after {:?}", job_name, timeout);
                let _ = self.jobs.delete(job_name, &DeleteParams::background()).await;
                return Err(MeetscribeError::Transcription(format!(
                    "Transcription job {} timed out after {}s",
                    job_name,
                    timeout.as_secs()
                )));
            }
        }
    }

    async fn submit_and_wait(
        &self,
        req: &TranscribeRequest,
        options: WhisperOptions,
        timeout: Duration,
    ) -> Result<TranscriptionResult> {
        if !req.audio_path.exists() {
            return Err(MeetscribeError::Transcription(format!(
                "Missing audio file: {}",
                req.audio_path.display()
            )));
        }

        let _scratch = ScratchFiles::for_audio(&req.audio_path);
        let name = self.job_name(req.meeting_id.as_deref());
        let job = self.build_job(&name, req, &options)?;

        self.jobs
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| MeetscribeError::Transcription(format!("Failed to create job {}: {}", name, e)))?;
        info!(
            "Created transcription job {} (model {}, timeout {}s)",
            name,
            options.model,
            timeout.as_secs()
        );

        self.poll_job(&name, req, timeout).await
    }
}

#[async_trait]
impl TranscriptionBackend for KubernetesBackend {
    async fn transcribe(&self, req: &TranscribeRequest) -> Result<TranscriptionResult> {
        let prompt = build_initial_prompt(self.agent.as_ref(), req).await;
        let progress_path = progress_file_path(&req.audio_path);
        let options = options::transcribe_options(&self.config, &progress_path, prompt);
        let timeout = dynamic_timeout(audio_duration_seconds(&req.audio_path), &self.config);
        self.submit_and_wait(req, options, timeout).await
    }

    async fn retranscribe(
        &self,
        req: &TranscribeRequest,
        ranges: &[ExtractionRange],
    ) -> Result<TranscriptionResult> {
        let prompt = build_initial_prompt(self.agent.as_ref(), req).await;
        let progress_path = progress_file_path(&req.audio_path);
        let options = options::retranscribe_options(&self.config, &progress_path, prompt, ranges);
        self.submit_and_wait(req, options, retranscribe_timeout(ranges)).await
    }

    async fn is_available(&self) -> bool {
        self.client.apiserver_version().await.is_ok()
    }

    async fn delete_jobs_for_meeting(&self, meeting_id: &str) -> Result<bool> {
        let lp = ListParams::default().labels(&format!("{}={}", MEETING_ID_LABEL, Self::sanitize(meeting_id)));
        let found = self
            .jobs
            .list(&lp)
            .await
            .map_err(|e| MeetscribeError::Transcription(format!("Failed to list jobs: {}", e)))?;

        if found.items.is_empty() {
            return Ok(false);
        }
        for job in &found.items {
            let name = job.name_any();
            debug!("Deleting transcription job {} for meeting {}", name, meeting_id);
            let _ = self.jobs.delete(&name, &DeleteParams::background()).await;
        }
        Ok(true)
    }

    async fn find_active_job_for_meeting(&self, meeting_id: &str) -> Result<Option<String>> {
        let lp = ListParams::default().labels(&format!("{}={}", MEETING_ID_LABEL, Self::sanitize(meeting_id)));
        let found = self
            .jobs
            .list(&lp)
            .await
            .map_err(|e| MeetscribeError::Transcription(format!("Failed to list jobs: {}", e)))?;

        Ok(found
            .items
            .into_iter()
            .find(|job| {
                let status = job.status.clone().unwrap_or_default();
                status.succeeded.unwrap_or(0) == 0 && status.failed.unwrap_or(0) == 0
            })
            .map(|job| job.name_any()))
    }

    async fn wait_for_existing_job(
        &self,
        job_name: &str,
        req: &TranscribeRequest,
    ) -> Result<TranscriptionResult> {
        info!("Re-attaching to transcription job {}", job_name);
        let _scratch = ScratchFiles::for_audio(&req.audio_path);
        let timeout = dynamic_timeout(audio_duration_seconds(&req.audio_path), &self.config);
        self.poll_job(job_name, req, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_table() {
        assert_eq!(KubernetesBackend::memory_for_model("tiny"), ("512Mi", "2Gi"));
        assert_eq!(KubernetesBackend::memory_for_model("base"), ("512Mi", "2Gi"));
        assert_eq!(KubernetesBackend::memory_for_model("small"), ("1Gi", "3Gi"));
        assert_eq!(KubernetesBackend::memory_for_model("medium"), ("2Gi", "6Gi"));
        assert_eq!(KubernetesBackend::memory_for_model("large-v3"), ("4Gi", "12Gi"));
        assert_eq!(KubernetesBackend::memory_for_model("unknown"), ("512Mi", "2Gi"));
    }

    #[test]
    fn test_sanitize_label_values() {
        assert_eq!(KubernetesBackend::sanitize("Meeting_42"), "meeting-42");
        assert_eq!(KubernetesBackend::sanitize("a:b/c"), "a-b-c");
        let long = "x".repeat(100);
        assert!(KubernetesBackend::sanitize(&long).len() <= 40);
    }
}
