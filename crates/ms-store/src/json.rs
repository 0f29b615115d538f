use async_trait::async_trait;
use ms_core::error::{MeetscribeError, Result};
use ms_core::meeting::{Meeting, MeetingState};
use ms_core::store::MeetingStore;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Document store keeping one pretty-printed JSON file per meeting.
///
/// Writes are serialized through an internal lock so the CAS primitive
/// reads and replaces a document atomically with respect to other workers
/// in this process.
pub struct JsonMeetingStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonMeetingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        // Ids are opaque; escape path separators so they stay one file name
        let safe: String = id
            .chars()
            .map(|c| if c == '/' || c == '\\' || c == '.' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    async fn read_document(&self, path: &Path) -> Result<Option<Meeting>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let meeting = serde_json::from_str(&content).map_err(|e| {
                    MeetscribeError::Store(format!("Corrupt meeting document {}: {}", path.display(), e))
                })?;
                Ok(Some(meeting))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(&self, meeting: &Meeting) -> Result<()> {
        let path = self.path_for(&meeting.id);
        let content = serde_json::to_string_pretty(meeting)?;
        tokio::fs::write(&path, content).await?;
        debug!("Persisted meeting {} in state {}", meeting.id, meeting.state);
        Ok(())
    }
}

#[async_trait]
impl MeetingStore for JsonMeetingStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Meeting>> {
        self.read_document(&self.path_for(id)).await
    }

    async fn save(&self, meeting: &Meeting) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_document(meeting).await
    }

    async fn list_by_state(&self, state: MeetingState) -> Result<Vec<Meeting>> {
        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match self.read_document(&path).await {
                Ok(Some(meeting)) if meeting.state == state => found.push(meeting),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable document {}: {}", path.display(), e),
            }
        }
        // Oldest stoppedAt first; meetings without one sort last
        found.sort_by_key(|m| (m.stopped_at.unwrap_or(u64::MAX), m.id.clone()));
        Ok(found)
    }

    async fn compare_and_set_state(
        &self,
        id: &str,
        expected: MeetingState,
        next: MeetingState,
    ) -> Result<Option<Meeting>> {
        let _guard = self.write_lock.lock().await;

        let Some(mut meeting) = self.read_document(&self.path_for(id)).await? else {
            return Ok(None);
        };
        if meeting.state != expected {
            debug!(
                "CAS skipped for meeting {}: expected {}, found {}",
                id, expected, meeting.state
            );
            return Ok(None);
        }
        meeting.transition(next)?;
        self.write_document(&meeting).await?;
        Ok(Some(meeting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meeting_with_stop(id: &str, stopped_at: Option<u64>) -> Meeting {
        let mut meeting = Meeting::new(id, "c1", format!("/audio/{}.wav", id));
        meeting.stopped_at = stopped_at;
        meeting
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMeetingStore::new(dir.path()).unwrap();

        let mut meeting = meeting_with_stop("m1", Some(1000));
        meeting.title = Some("Weekly sync".to_string());
        store.save(&meeting).await.unwrap();

        let loaded = store.find_by_id("m1").await.unwrap().unwrap();
        assert_eq!(loaded.title.as_deref(), Some("Weekly sync"));
        assert_eq!(loaded.stopped_at, Some(1000));
        assert_eq!(loaded.state, MeetingState::Uploaded);

        // Saving the loaded document reproduces it exactly
        store.save(&loaded).await.unwrap();
        let reloaded = store.find_by_id("m1").await.unwrap().unwrap();
        assert_eq!(
            serde_json::to_value(&loaded).unwrap(),
            serde_json::to_value(&reloaded).unwrap()
        );
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMeetingStore::new(dir.path()).unwrap();
        assert!(store.find_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_state_ordered_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMeetingStore::new(dir.path()).unwrap();

        store.save(&meeting_with_stop("late", Some(3000))).await.unwrap();
        store.save(&meeting_with_stop("early", Some(1000))).await.unwrap();
        store.save(&meeting_with_stop("nostop", None)).await.unwrap();

        let mut other = meeting_with_stop("other-state", Some(500));
        other.state = MeetingState::Transcribed;
        store.save(&other).await.unwrap();

        let uploaded = store.list_by_state(MeetingState::Uploaded).await.unwrap();
        let ids: Vec<_> = uploaded.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late", "nostop"]);
    }

    #[tokio::test]
    async fn test_cas_succeeds_then_blocks_second_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMeetingStore::new(dir.path()).unwrap();
        store.save(&meeting_with_stop("m1", Some(1000))).await.unwrap();

        let taken = store
            .compare_and_set_state("m1", MeetingState::Uploaded, MeetingState::Transcribing)
            .await
            .unwrap();
        assert_eq!(taken.unwrap().state, MeetingState::Transcribing);

        // A second worker expecting UPLOADED must be refused
        let second = store
            .compare_and_set_state("m1", MeetingState::Uploaded, MeetingState::Transcribing)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_cas_on_missing_meeting() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMeetingStore::new(dir.path()).unwrap();
        let result = store
            .compare_and_set_state("ghost", MeetingState::Uploaded, MeetingState::Transcribing)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_cas_advances_state_changed_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMeetingStore::new(dir.path()).unwrap();
        let meeting = meeting_with_stop("m1", Some(1000));
        let before = meeting.state_changed_at;
        store.save(&meeting).await.unwrap();

        let updated = store
            .compare_and_set_state("m1", MeetingState::Uploaded, MeetingState::Transcribing)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.state_changed_at > before);
    }
}
