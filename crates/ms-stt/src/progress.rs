use ms_core::backend::TranscriptionProgress;
use ms_core::heartbeat::HeartbeatTracker;
use ms_core::meeting::MeetingState;
use ms_core::notify::Notifier;
use ms_core::store::MeetingStore;
use std::path::Path;
use std::sync::Arc;

/// Read and parse a progress file; absent or malformed means "no tick".
pub async fn read_progress_file(path: &Path) -> Option<TranscriptionProgress> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(progress) => Some(progress),
        Err(e) => {
            // A partially written file shows up as malformed JSON; the next
            // poll tick will see the complete write.
            tracing::debug!("Skipping unreadable progress file {}: {}", path.display(), e);
            None
        }
    }
}

/// Adapts engine progress ticks to the notification and heartbeat contracts.
///
/// Shared by all execution modes: every tick is mirrored to subscribers,
/// and the meeting's heartbeat is touched while its persisted state is
/// CORRECTING so the stuck detector sees live work.
#[derive(Clone)]
pub struct ProgressReporter {
    notifier: Notifier,
    heartbeats: Arc<HeartbeatTracker>,
    store: Arc<dyn MeetingStore>,
}

impl ProgressReporter {
    pub fn new(notifier: Notifier, heartbeats: Arc<HeartbeatTracker>, store: Arc<dyn MeetingStore>) -> Self {
        Self {
            notifier,
            heartbeats,
            store,
        }
    }

    pub async fn report(
        &self,
        meeting_id: Option<&str>,
        client_id: Option<&str>,
        progress: &TranscriptionProgress,
    ) {
        let Some(meeting_id) = meeting_id else {
            return;
        };

        let stored = self.store.find_by_id(meeting_id).await.ok().flatten();

        let client_id = client_id
            .map(String::from)
            .or_else(|| stored.as_ref().map(|m| m.client_id.clone()))
            .unwrap_or_default();

        self.notifier.progress(
            meeting_id,
            &client_id,
            progress.percent,
            progress.segments_done,
            progress.elapsed_seconds,
            progress.last_segment_text.clone(),
        );

        if stored.map(|m| m.state) == Some(MeetingState::Correcting) {
            self.heartbeats.touch(meeting_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ms_core::error::Result;
    use ms_core::meeting::Meeting;
    use ms_core::notify::Notification;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FixedStore {
        meetings: Mutex<HashMap<String, Meeting>>,
    }

    #[async_trait]
    impl MeetingStore for FixedStore {
        async fn find_by_id(&self, id: &str) -> Result<Option<Meeting>> {
            Ok(self.meetings.lock().unwrap().get(id).cloned())
        }
        async fn save(&self, meeting: &Meeting) -> Result<()> {
            self.meetings
                .lock()
                .unwrap()
                .insert(meeting.id.clone(), meeting.clone());
            Ok(())
        }
        async fn list_by_state(&self, _state: MeetingState) -> Result<Vec<Meeting>> {
            Ok(Vec::new())
        }
        async fn compare_and_set_state(
            &self,
            _id: &str,
            _expected: MeetingState,
            _next: MeetingState,
        ) -> Result<Option<Meeting>> {
            Ok(None)
        }
    }

    fn progress(percent: f64) -> TranscriptionProgress {
        TranscriptionProgress {
            percent,
            segments_done: 3,
            elapsed_seconds: 12.5,
            updated_at: 0.0,
            last_segment_text: None,
        }
    }

    #[tokio::test]
    async fn test_report_emits_and_touches_while_correcting() {
        let mut meeting = Meeting::new("m1", "c1", "/audio/m1.wav");
        meeting.state = MeetingState::Correcting;
        let store = Arc::new(FixedStore {
            meetings: Mutex::new(HashMap::from([("m1".to_string(), meeting)])),
        });
        let heartbeats = Arc::new(HeartbeatTracker::new());
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();

        let reporter = ProgressReporter::new(notifier, heartbeats.clone(), store);
        reporter.report(Some("m1"), None, &progress(42.0)).await;

        match rx.recv().await.unwrap() {
            Notification::MeetingTranscriptionProgress {
                meeting_id,
                client_id,
                percent,
                ..
            } => {
                assert_eq!(meeting_id, "m1");
                assert_eq!(client_id, "c1");
                assert_eq!(percent, 42.0);
            }
            _ => panic!("Unexpected event type"),
        }
        assert!(heartbeats.last("m1").is_some());
    }

    #[tokio::test]
    async fn test_report_no_heartbeat_while_transcribing() {
        let mut meeting = Meeting::new("m1", "c1", "/audio/m1.wav");
        meeting.state = MeetingState::Transcribing;
        let store = Arc::new(FixedStore {
            meetings: Mutex::new(HashMap::from([("m1".to_string(), meeting)])),
        });
        let heartbeats = Arc::new(HeartbeatTracker::new());
        let reporter = ProgressReporter::new(Notifier::new(8), heartbeats.clone(), store);

        reporter.report(Some("m1"), Some("c1"), &progress(10.0)).await;
        assert!(heartbeats.last("m1").is_none());
    }

    #[tokio::test]
    async fn test_read_progress_file_absent() {
        assert!(read_progress_file(Path::new("/nonexistent/progress.json"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_read_progress_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        tokio::fs::write(
            &path,
            r#"{"percent": 55.0, "segmentsDone": 9, "elapsedSeconds": 81.2, "updatedAt": 1700000000.0}"#,
        )
        .await
        .unwrap();
        let progress = read_progress_file(&path).await.unwrap();
        assert_eq!(progress.percent, 55.0);
        assert_eq!(progress.segments_done, 9);
    }
}
