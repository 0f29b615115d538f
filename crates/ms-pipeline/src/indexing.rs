use async_trait::async_trait;
use ms_core::error::{MeetscribeError, Result};
use ms_core::meeting::Meeting;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Task handed to the external indexing queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingTask {
    pub meeting_id: String,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub correlation_id: String,
    pub content: String,
}

/// Hand-off point to the downstream indexer
#[async_trait]
pub trait IndexingQueue: Send + Sync {
    async fn enqueue(&self, task: IndexingTask) -> Result<()>;
}

/// Queue backed by an in-process channel; the receiving half belongs to
/// whatever consumes indexing tasks.
pub struct ChannelIndexingQueue {
    tx: mpsc::Sender<IndexingTask>,
}

impl ChannelIndexingQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<IndexingTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl IndexingQueue for ChannelIndexingQueue {
    async fn enqueue(&self, task: IndexingTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|e| MeetscribeError::Store(format!("Indexing queue closed: {}", e)))
    }
}

/// `3661 -> "1:01:01"`, `61 -> "01:01"`
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// `3661 -> "1h1m1s"`, `330 -> "5m30s"`
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, secs)
    } else {
        format!("{}m{}s", minutes, secs)
    }
}

/// Render the content blob fed to the indexer: metadata header, transcript
/// (preferring corrected segments), and source metadata. Deterministic for
/// a given meeting document.
pub fn render_markdown(meeting: &Meeting) -> String {
    let mut out = String::new();

    let title = meeting.title.as_deref().unwrap_or("Untitled meeting");
    out.push_str(&format!("# {}\n\n", title));

    if let Some(started_at) = meeting.started_at {
        if let Some(date) = chrono::DateTime::from_timestamp_millis(started_at as i64) {
            out.push_str(&format!("**Date:** {}\n", date.format("%Y-%m-%d %H:%M UTC")));
        }
    }
    if let Some(duration) = meeting.duration_seconds {
        out.push_str(&format!("**Duration:** {}\n", format_duration(duration)));
    }
    if let Some(meeting_type) = meeting.meeting_type.as_deref() {
        out.push_str(&format!("**Type:** {}\n", meeting_type));
    }
    if let Some(audio_input) = meeting.audio_input_type.as_deref() {
        out.push_str(&format!("**Audio Input:** {}\n", audio_input));
    }

    out.push_str("\n---\n\n## Transcript\n\n");
    for segment in meeting.best_segments() {
        let stamp = format_timestamp(segment.start_sec);
        match segment.speaker.as_deref() {
            Some(speaker) => out.push_str(&format!("[{}] **{}:** {}\n", stamp, speaker, segment.text)),
            None => out.push_str(&format!("[{}] {}\n", stamp, segment.text)),
        }
    }

    out.push_str("\n## Source Metadata\n\n");
    out.push_str(&format!("- Meeting ID: {}\n", meeting.id));
    out.push_str(&format!("- Client ID: {}\n", meeting.client_id));
    if let Some(project_id) = meeting.project_id.as_deref() {
        out.push_str(&format!("- Project ID: {}\n", project_id));
    }
    out.push_str(&format!("- Audio file: {}\n", meeting.audio_file_path));

    out
}

/// Indexing task for a meeting, with the rendered blob as content
pub fn build_task(meeting: &Meeting) -> IndexingTask {
    IndexingTask {
        meeting_id: meeting.id.clone(),
        client_id: meeting.client_id.clone(),
        project_id: meeting.project_id.clone(),
        title: meeting.title.clone(),
        correlation_id: format!("meeting:{}", meeting.id),
        content: render_markdown(meeting),
    }
}
