use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MeetscribeError, Result};

/// Transcription execution mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// In-cluster batch job per transcription
    KubernetesJob,
    /// Remote streaming HTTP service
    RestRemote,
    /// Local subprocess
    LocalSubprocess,
}

impl Default for DeploymentMode {
    fn default() -> Self {
        Self::LocalSubprocess
    }
}

/// Pipeline configuration
///
/// Every tunable of the transcription and correction pipeline lives here;
/// nothing reads ambient environment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Selected transcription execution mode
    pub deployment_mode: DeploymentMode,

    /// Whisper model for regular transcription
    pub model: String,
    /// Fixed transcription language (auto-detect when unset)
    pub language: Option<String>,
    pub beam_size: u32,
    pub vad_filter: bool,
    pub word_timestamps: bool,
    pub condition_on_previous_text: bool,
    pub no_speech_threshold: f64,

    /// Model forced for targeted re-transcription
    pub large_retranscribe_model: String,
    pub large_retranscribe_beam: u32,

    /// Wall-clock timeout = max(audio duration x multiplier, min seconds)
    pub timeout_multiplier: f64,
    pub min_timeout_seconds: u64,

    /// Job/progress poll cadence
    pub poll_interval_seconds: u64,
    /// Pipeline sleep when a poll pass found no work
    pub idle_poll_seconds: u64,

    /// Stuck detection
    pub stuck_threshold_seconds: u64,
    pub heartbeat_threshold_seconds: u64,
    pub sweep_interval_seconds: u64,

    /// Seconds of audio padded around each re-transcribed segment
    pub padding_seconds: f64,

    /// Base URL of the remote transcription service (mode `rest_remote`)
    pub rest_remote_url: Option<String>,
    /// Transcriber binary (mode `local_subprocess`)
    pub transcriber_binary: PathBuf,

    /// Kubernetes settings (mode `kubernetes_job`)
    pub kube_namespace: String,
    pub job_image: String,
    pub service_name: String,

    /// Mount point for meeting audio files
    pub audio_root: PathBuf,
    /// Directory holding persisted meeting documents
    pub data_dir: PathBuf,
    /// Base URL of the correction agent
    pub correction_agent_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deployment_mode: DeploymentMode::default(),
            model: "base".to_string(),
            language: None,
            beam_size: 5,
            vad_filter: true,
            word_timestamps: true,
            condition_on_previous_text: false,
            no_speech_threshold: 0.6,
            large_retranscribe_model: "large-v3".to_string(),
            large_retranscribe_beam: 10,
            timeout_multiplier: 1.0,
            min_timeout_seconds: 600,
            poll_interval_seconds: 10,
            idle_poll_seconds: 30,
            stuck_threshold_seconds: 600,
            heartbeat_threshold_seconds: 120,
            sweep_interval_seconds: 60,
            padding_seconds: 10.0,
            rest_remote_url: None,
            transcriber_binary: PathBuf::from("meetscribe-whisper"),
            kube_namespace: "default".to_string(),
            job_image: "meetscribe/whisper-batch:latest".to_string(),
            service_name: "meetscribe".to_string(),
            audio_root: PathBuf::from("/data/audio"),
            data_dir: PathBuf::from("/data/meetings"),
            correction_agent_url: "http://localhost:8700".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Get the default config directory path
    pub fn default_config_dir() -> Result<PathBuf> {
        directories::ProjectDirs::from("io", "meetscribe", "Meetscribe")
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
            .ok_or_else(|| MeetscribeError::Config("Failed to get config directory".to_string()))
    }

    /// Get the default config file path
    pub fn default_config_file() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MeetscribeError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_timeout_contract() {
        let config = PipelineConfig::default();
        assert_eq!(config.timeout_multiplier, 1.0);
        assert_eq!(config.min_timeout_seconds, 600);
        assert_eq!(config.large_retranscribe_model, "large-v3");
        assert_eq!(config.large_retranscribe_beam, 10);
        assert_eq!(config.padding_seconds, 10.0);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PipelineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.deployment_mode, config.deployment_mode);
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.stuck_threshold_seconds, config.stuck_threshold_seconds);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: PipelineConfig =
            toml::from_str("deployment_mode = \"kubernetes_job\"\nmodel = \"medium\"").unwrap();
        assert_eq!(parsed.deployment_mode, DeploymentMode::KubernetesJob);
        assert_eq!(parsed.model, "medium");
        assert_eq!(parsed.min_timeout_seconds, 600);
    }
}
