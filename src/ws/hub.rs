//! Broadcast hub decoupling registry mutations from event observers.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

/// Size of the broadcast channel; clients lagging further than this are
/// disconnected rather than allowed to slow publication down.
const EVENT_BUFFER_SIZE: usize = 256;

/// One lifecycle event as delivered on the wire: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub event: &'static str,
    pub data: Value,
}

/// Fanout for session lifecycle events.
///
/// Publishing never blocks and never fails: without subscribers the event is
/// simply dropped, and slow subscribers only ever hurt themselves.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    pub fn publish(&self, event: &'static str, data: impl Serialize) {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(err) => {
                warn!(event, error = %err, "failed to serialize lifecycle event");
                return;
            }
        };
        let _ = self.tx.send(LifecycleEvent { event, data });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish("session:created", json!({ "name": "s1" }));

        let event = a.recv().await.unwrap();
        assert_eq!(event.event, "session:created");
        assert_eq!(event.data["name"], "s1");
        assert_eq!(b.recv().await.unwrap().event, "session:created");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let hub = EventHub::new();
        hub.publish("session:deleted", json!({ "name": "gone" }));
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let hub = EventHub::new();
        hub.publish("session:created", json!({ "name": "s1" }));
        let mut rx = hub.subscribe();
        hub.publish("session:stopped", json!({ "name": "s1" }));
        assert_eq!(rx.recv().await.unwrap().event, "session:stopped");
    }
}
