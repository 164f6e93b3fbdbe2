//! Best-effort live event delivery

use mps_common::events::{EventBus, ScanEvent};

/// Push events to live observers
///
/// Publishing never fails and never blocks.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ScanEvent);
}

impl EventSink for EventBus {
    fn publish(&self, event: ScanEvent) {
        tracing::trace!(event_type = event.event_type(), task_id = event.task_id(), "Publishing event");
        self.emit_lossy(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_event_bus_is_a_sink() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let sink: &dyn EventSink = &bus;
        sink.publish(ScanEvent::ScanFailed {
            task_id: 2,
            error: "profile gone".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(rx.try_recv().unwrap().event_type(), "ScanFailed");
    }
}
