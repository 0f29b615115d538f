use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::meeting::{Meeting, MeetingState};

/// Events pushed to subscribers on state transitions and progress ticks.
///
/// Event names and payload keys are part of the notification contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    MeetingStateChanged {
        meeting_id: String,
        client_id: String,
        state: MeetingState,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MeetingTranscriptionProgress {
        meeting_id: String,
        client_id: String,
        percent: f64,
        segments_done: u64,
        elapsed_seconds: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_segment_text: Option<String>,
    },
}

/// Fire-and-forget notification fan-out.
///
/// Best effort only: sends to a broadcast channel and ignores the absence
/// of subscribers.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn emit(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    /// Emit a state-change event for the meeting's current state
    pub fn state_changed(&self, meeting: &Meeting) {
        self.emit(Notification::MeetingStateChanged {
            meeting_id: meeting.id.clone(),
            client_id: meeting.client_id.clone(),
            state: meeting.state,
            title: meeting.title.clone(),
            error_message: meeting.error_message.clone(),
        });
    }

    pub fn progress(
        &self,
        meeting_id: &str,
        client_id: &str,
        percent: f64,
        segments_done: u64,
        elapsed_seconds: f64,
        last_segment_text: Option<String>,
    ) {
        self.emit(Notification::MeetingTranscriptionProgress {
            meeting_id: meeting_id.to_string(),
            client_id: client_id.to_string(),
            percent,
            segments_done,
            elapsed_seconds,
            last_segment_text,
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_stable() {
        let event = Notification::MeetingStateChanged {
            meeting_id: "m1".to_string(),
            client_id: "c1".to_string(),
            state: MeetingState::Transcribed,
            title: None,
            error_message: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "meetingStateChanged");
        assert_eq!(json["meetingId"], "m1");
        assert_eq!(json["state"], "TRANSCRIBED");

        let event = Notification::MeetingTranscriptionProgress {
            meeting_id: "m1".to_string(),
            client_id: "c1".to_string(),
            percent: 50.0,
            segments_done: 4,
            elapsed_seconds: 12.0,
            last_segment_text: Some("hello".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "meetingTranscriptionProgress");
        assert_eq!(json["segmentsDone"], 4);
        assert_eq!(json["lastSegmentText"], "hello");
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let notifier = Notifier::new(8);
        let mut rx = notifier.subscribe();

        let meeting = Meeting::new("m1", "c1", "/audio/m1.wav");
        notifier.state_changed(&meeting);

        let event = rx.recv().await.unwrap();
        match event {
            Notification::MeetingStateChanged { meeting_id, state, .. } => {
                assert_eq!(meeting_id, "m1");
                assert_eq!(state, MeetingState::Uploaded);
            }
            _ => panic!("Unexpected event type"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let notifier = Notifier::new(8);
        let meeting = Meeting::new("m1", "c1", "/audio/m1.wav");
        notifier.state_changed(&meeting);
    }
}
