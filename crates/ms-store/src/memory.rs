use async_trait::async_trait;
use ms_core::error::Result;
use ms_core::meeting::{Meeting, MeetingState};
use ms_core::store::MeetingStore;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory store with the same CAS semantics as the document store.
/// Used by tests and by ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    meetings: Mutex<HashMap<String, Meeting>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MeetingStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Meeting>> {
        Ok(self.meetings.lock().await.get(id).cloned())
    }

    async fn save(&self, meeting: &Meeting) -> Result<()> {
        self.meetings
            .lock()
            .await
            .insert(meeting.id.clone(), meeting.clone());
        Ok(())
    }

    async fn list_by_state(&self, state: MeetingState) -> Result<Vec<Meeting>> {
        let mut found: Vec<Meeting> = self
            .meetings
            .lock()
            .await
            .values()
            .filter(|m| m.state == state)
            .cloned()
            .collect();
        found.sort_by_key(|m| (m.stopped_at.unwrap_or(u64::MAX), m.id.clone()));
        Ok(found)
    }

    async fn compare_and_set_state(
        &self,
        id: &str,
        expected: MeetingState,
        next: MeetingState,
    ) -> Result<Option<Meeting>> {
        let mut meetings = self.meetings.lock().await;
        let Some(meeting) = meetings.get_mut(id) else {
            return Ok(None);
        };
        if meeting.state != expected {
            return Ok(None);
        }
        meeting.transition(next)?;
        Ok(Some(meeting.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cas_single_winner_under_contention() {
        let store = Arc::new(MemoryStore::new());
        store.save(&Meeting::new("m1", "c1", "/audio/m1.wav")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_set_state("m1", MeetingState::Uploaded, MeetingState::Transcribing)
                    .await
                    .unwrap()
                    .is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_list_orders_by_stopped_at() {
        let store = MemoryStore::new();
        let mut a = Meeting::new("a", "c1", "/audio/a.wav");
        a.stopped_at = Some(200);
        let mut b = Meeting::new("b", "c1", "/audio/b.wav");
        b.stopped_at = Some(100);
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let listed = store.list_by_state(MeetingState::Uploaded).await.unwrap();
        assert_eq!(listed[0].id, "b");
        assert_eq!(listed[1].id, "a");
    }
}
