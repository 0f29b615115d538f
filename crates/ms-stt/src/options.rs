use ms_core::config::PipelineConfig;
use ms_core::meeting::ExtractionRange;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bytes per second of 16 kHz / 16-bit / mono PCM
const PCM_BYTES_PER_SECOND: f64 = 32_000.0;
/// WAV header size assumed by the duration heuristic
const WAV_HEADER_BYTES: u64 = 44;
/// Time-budget multiplier for targeted re-transcription windows
const RETRANSCRIBE_MULTIPLIER: f64 = 15.0;
const RETRANSCRIBE_MIN_TIMEOUT_SECS: f64 = 600.0;

/// Options payload handed to the speech engine, uniform across all
/// execution modes (`WHISPER_OPTIONS` env var, subprocess argument,
/// remote request header).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhisperOptions {
    pub task: String,
    pub model: String,
    pub beam_size: u32,
    pub vad_filter: bool,
    pub word_timestamps: bool,
    pub condition_on_previous_text: bool,
    pub no_speech_threshold: f64,
    pub progress_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_ranges: Option<Vec<ExtractionRange>>,
}

/// Options for a full transcription, from the configured defaults
pub fn transcribe_options(
    config: &PipelineConfig,
    progress_file: &Path,
    initial_prompt: Option<String>,
) -> WhisperOptions {
    WhisperOptions {
        task: "transcribe".to_string(),
        model: config.model.clone(),
        beam_size: config.beam_size,
        vad_filter: config.vad_filter,
        word_timestamps: config.word_timestamps,
        condition_on_previous_text: config.condition_on_previous_text,
        no_speech_threshold: config.no_speech_threshold,
        progress_file: progress_file.display().to_string(),
        language: config.language.clone(),
        initial_prompt,
        extraction_ranges: None,
    }
}

/// Options for targeted re-transcription: forces the high-accuracy model,
/// a wide beam, and a low no-speech threshold, and attaches the ranges.
pub fn retranscribe_options(
    config: &PipelineConfig,
    progress_file: &Path,
    initial_prompt: Option<String>,
    ranges: &[ExtractionRange],
) -> WhisperOptions {
    WhisperOptions {
        task: "transcribe".to_string(),
        model: config.large_retranscribe_model.clone(),
        beam_size: config.large_retranscribe_beam,
        vad_filter: config.vad_filter,
        word_timestamps: config.word_timestamps,
        condition_on_previous_text: config.condition_on_previous_text,
        no_speech_threshold: 0.3,
        progress_file: progress_file.display().to_string(),
        language: config.language.clone(),
        initial_prompt,
        extraction_ranges: Some(ranges.to_vec()),
    }
}

/// Audio duration estimated from file size, assuming 16 kHz / 16-bit mono
/// PCM after a 44-byte header. Never negative; a missing file counts as
/// zero seconds (the caller surfaces the missing-file error itself).
pub fn audio_duration_seconds(audio_path: &Path) -> f64 {
    let size = std::fs::metadata(audio_path).map(|m| m.len()).unwrap_or(0);
    size.saturating_sub(WAV_HEADER_BYTES) as f64 / PCM_BYTES_PER_SECOND
}

/// Wall-clock budget for a full transcription
pub fn dynamic_timeout(audio_duration_secs: f64, config: &PipelineConfig) -> Duration {
    let secs = (audio_duration_secs * config.timeout_multiplier).max(config.min_timeout_seconds as f64);
    Duration::from_secs_f64(secs)
}

/// Wall-clock budget for targeted re-transcription
pub fn retranscribe_timeout(ranges: &[ExtractionRange]) -> Duration {
    let total: f64 = ranges.iter().map(|r| (r.end - r.start).max(0.0)).sum();
    Duration::from_secs_f64((total * RETRANSCRIBE_MULTIPLIER).max(RETRANSCRIBE_MIN_TIMEOUT_SECS))
}

/// `<audio>_transcript.json`, written by the engine on success
pub fn result_file_path(audio_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}_transcript.json", audio_path.display()))
}

/// `<audio>_progress.json`, written continuously while the engine runs
pub fn progress_file_path(audio_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}_progress.json", audio_path.display()))
}

/// Removes scratch files on drop, success or failure alike.
pub struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    /// Guard for the standard result + progress pair of an audio file
    pub fn for_audio(audio_path: &Path) -> Self {
        Self::new([result_file_path(audio_path), progress_file_path(audio_path)])
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove scratch file {}: {}", path.display(), e);
                }
            }
        }
    }
}
