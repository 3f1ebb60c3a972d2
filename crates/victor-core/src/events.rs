//! Upward events — the operator-visible record of what the pairing layer
//! reported via its upward interface (`updated_pin`, `completed_pairing`,
//! `stop_pairing_event`, `ota_update_request`). The control API's
//! `GET /api/pairing/events` drains this, oldest first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Bound on retained events — old ones are dropped, not the new ones.
const MAX_EVENTS: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum UpwardEvent {
    /// A fresh PIN was generated for display during first-time pairing.
    UpdatedPin { pin: String },
    /// A session reached `ConfirmedSharedSecret`.
    CompletedPairing { peer_pubkey: String, reconnection: bool },
    /// The pairing session restarted or was dropped.
    StopPairing { reason: String },
    /// An OTA progress update passed through the upward interface.
    OtaUpdateRequest { percent: u8 },
}

/// Shared, clonable handle onto the daemon's event log.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<Mutex<VecDeque<UpwardEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_EVENTS))),
        }
    }

    pub fn push(&self, event: UpwardEvent) {
        let mut events = self.events.lock().expect("event log poisoned");
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of currently retained events, oldest first.
    pub fn snapshot(&self) -> Vec<UpwardEvent> {
        self.events.lock().expect("event log poisoned").iter().cloned().collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_preserves_insertion_order() {
        let log = EventLog::new();
        log.push(UpwardEvent::StopPairing { reason: "a".into() });
        log.push(UpwardEvent::StopPairing { reason: "b".into() });
        let snap = log.snapshot();
        assert_eq!(snap.len(), 2);
        match (&snap[0], &snap[1]) {
            (UpwardEvent::StopPairing { reason: a }, UpwardEvent::StopPairing { reason: b }) => {
                assert_eq!(a, "a");
                assert_eq!(b, "b");
            }
            _ => panic!("wrong variants"),
        }
    }

    #[test]
    fn old_events_are_dropped_once_full() {
        let log = EventLog::new();
        for i in 0..MAX_EVENTS + 10 {
            log.push(UpwardEvent::OtaUpdateRequest { percent: (i % 100) as u8 });
        }
        assert_eq!(log.snapshot().len(), MAX_EVENTS);
    }
}
