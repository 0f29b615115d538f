use async_trait::async_trait;
use ms_core::agent::{
    AnswerQuestionsRequest, CorrectTargetedRequest, CorrectTranscriptRequest, CorrectionAgent,
    CorrectionResponse, CorrectionRule, ListCorrectionsRequest,
};
use ms_core::backend::{TranscribeRequest, TranscriptionBackend};
use ms_core::config::PipelineConfig;
use ms_core::error::Result;
use ms_core::heartbeat::HeartbeatTracker;
use ms_core::meeting::ExtractionRange;
use ms_core::notify::Notifier;
use ms_store::MemoryStore;
use ms_stt::{LocalProcessBackend, ProgressReporter};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

struct NoRulesAgent;

#[async_trait]
impl CorrectionAgent for NoRulesAgent {
    async fn correct_transcript(&self, _req: &CorrectTranscriptRequest) -> Result<CorrectionResponse> {
        unimplemented!()
    }
    async fn correct_targeted(&self, _req: &CorrectTargetedRequest) -> Result<CorrectionResponse> {
        unimplemented!()
    }
    async fn answer_questions(&self, _req: &AnswerQuestionsRequest) -> Result<()> {
        unimplemented!()
    }
    async fn list_corrections(&self, _req: &ListCorrectionsRequest) -> Result<Vec<CorrectionRule>> {
        Ok(Vec::new())
    }
}

fn write_script(path: &Path, script: &str) {
    fs::write(path, script).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

fn backend_with(binary: &Path, workspace: &Path) -> LocalProcessBackend {
    let config = PipelineConfig {
        transcriber_binary: binary.to_path_buf(),
        audio_root: workspace.to_path_buf(),
        poll_interval_seconds: 1,
        ..PipelineConfig::default()
    };
    let reporter = ProgressReporter::new(
        Notifier::new(8),
        Arc::new(HeartbeatTracker::new()),
        Arc::new(MemoryStore::new()),
    );
    LocalProcessBackend::new(config, Arc::new(NoRulesAgent), reporter)
}

#[tokio::test]
async fn test_local_transcribe_success() {
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("m1.wav");
    fs::write(&audio, vec![0u8; 44 + 32_000]).unwrap();

    let script = dir.path().join("mock_transcriber");
    write_script(
        &script,
        r#"#!/bin/bash
echo '{"text": "hello world", "segments": [{"start": 0.0, "end": 1.0, "text": "hello world"}], "language": "en", "duration": 1.0}'
"#,
    );

    let backend = backend_with(&script, dir.path());
    let req = TranscribeRequest::new(&audio, dir.path());
    let result = backend.transcribe(&req).await.unwrap();

    assert_eq!(result.text, "hello world");
    assert_eq!(result.segments.len(), 1);
    assert_eq!(result.language.as_deref(), Some("en"));
}

#[tokio::test]
async fn test_local_transcribe_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("m1.wav");
    fs::write(&audio, vec![0u8; 44]).unwrap();

    let script = dir.path().join("mock_transcriber");
    write_script(
        &script,
        r#"#!/bin/bash
echo "model load failed" >&2
exit 3
"#,
    );

    let backend = backend_with(&script, dir.path());
    let req = TranscribeRequest::new(&audio, dir.path());
    let err = backend.transcribe(&req).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("code 3"), "{}", message);
    assert!(message.contains("model load failed"), "{}", message);
}

#[tokio::test]
async fn test_local_transcribe_missing_audio() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("mock_transcriber");
    write_script(&script, "#!/bin/bash\necho unused\n");

    let backend = backend_with(&script, dir.path());
    let req = TranscribeRequest::new(dir.path().join("absent.wav"), dir.path());
    let err = backend.transcribe(&req).await.unwrap_err();
    assert!(err.to_string().contains("Missing audio file"));
}

#[tokio::test]
async fn test_local_retranscribe_returns_text_by_segment() {
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("m1.wav");
    fs::write(&audio, vec![0u8; 44 + 32_000]).unwrap();

    // The mock asserts the high-accuracy overrides arrived in its options
    let script = dir.path().join("mock_transcriber");
    write_script(
        &script,
        r#"#!/bin/bash
case "$2" in
  *'"model":"large-v3"'*) ;;
  *) echo '{"text": "", "segments": [], "error": "expected large-v3 options"}'; exit 0 ;;
esac
echo '{"text": "", "segments": [], "textBySegment": {"1": "board meeting"}}'
"#,
    );

    let backend = backend_with(&script, dir.path());
    let req = TranscribeRequest::new(&audio, dir.path());
    let ranges = vec![ExtractionRange {
        start: 10.0,
        end: 35.0,
        segment_index: 1,
    }];
    let result = backend.retranscribe(&req, &ranges).await.unwrap();
    assert_eq!(
        result.text_by_segment.get(&1).map(String::as_str),
        Some("board meeting")
    );
}

#[tokio::test]
async fn test_local_cleans_scratch_files() {
    let dir = tempfile::tempdir().unwrap();
    let audio = dir.path().join("m1.wav");
    fs::write(&audio, vec![0u8; 44]).unwrap();

    // Child writes a progress file; the backend must remove it afterwards
    let script = dir.path().join("mock_transcriber");
    write_script(
        &script,
        r#"#!/bin/bash
echo '{"percent": 50.0, "segmentsDone": 1, "elapsedSeconds": 0.5, "updatedAt": 0}' > "$1_progress.json"
echo '{"text": "done", "segments": []}'
"#,
    );

    let backend = backend_with(&script, dir.path());
    let req = TranscribeRequest::new(&audio, dir.path());
    backend.transcribe(&req).await.unwrap();

    assert!(!dir.path().join("m1.wav_progress.json").exists());
    assert!(!dir.path().join("m1.wav_transcript.json").exists());
}
