use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// In-memory map of meeting id to last progress instant.
///
/// Process-local: a fresh process starts empty, which is why the stuck
/// detector honors a startup grace period.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    inner: Mutex<HashMap<String, Instant>>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record progress for a meeting
    pub fn touch(&self, meeting_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(meeting_id.to_string(), Instant::now());
    }

    /// Last recorded progress instant, if any
    pub fn last(&self, meeting_id: &str) -> Option<Instant> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(meeting_id).copied()
    }

    /// Forget a meeting (called on every transition out of CORRECTING)
    pub fn clear(&self, meeting_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(meeting_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_touch_then_last() {
        let tracker = HeartbeatTracker::new();
        assert!(tracker.last("m1").is_none());

        tracker.touch("m1");
        let first = tracker.last("m1").unwrap();

        tracker.touch("m1");
        let second = tracker.last("m1").unwrap();
        assert!(second >= first);
    }

    #[test]
    fn test_clear_removes_entry() {
        let tracker = HeartbeatTracker::new();
        tracker.touch("m1");
        tracker.clear("m1");
        assert!(tracker.last("m1").is_none());
    }

    #[test]
    fn test_concurrent_touches() {
        let tracker = Arc::new(HeartbeatTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.touch(&format!("m{}", i % 4));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..4 {
            assert!(tracker.last(&format!("m{}", i)).is_some());
        }
    }
}
