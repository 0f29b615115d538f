use async_trait::async_trait;

use crate::error::Result;
use crate::meeting::{Meeting, MeetingState};

/// Persistent home of meeting documents.
///
/// `compare_and_set_state` is the only primitive that moves a meeting into
/// a transient state: the write happens only if the persisted state still
/// matches `expected`, which keeps a meeting owned by at most one worker.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Meeting>>;

    /// Full replacement of the persisted document
    async fn save(&self, meeting: &Meeting) -> Result<()>;

    /// Meetings in `state`, oldest `stoppedAt` first
    async fn list_by_state(&self, state: MeetingState) -> Result<Vec<Meeting>>;

    /// Atomically transition `expected -> next`; returns the updated
    /// document, or `None` when the persisted state no longer matches
    async fn compare_and_set_state(
        &self,
        id: &str,
        expected: MeetingState,
        next: MeetingState,
    ) -> Result<Option<Meeting>>;
}
