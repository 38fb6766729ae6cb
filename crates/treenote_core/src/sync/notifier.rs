//! Change notifier contract and in-process broadcast bus.

use crate::model::node::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Message published after a successful persist.
///
/// Serialized as `{"type": "data-changed", "timestamp": <epoch ms>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangeEvent {
    DataChanged { timestamp: i64 },
}

impl ChangeEvent {
    pub fn data_changed() -> Self {
        Self::DataChanged {
            timestamp: now_epoch_ms(),
        }
    }
}

/// Publisher side of cross-context change notification.
pub trait ChangeNotifier {
    fn publish(&self, event: ChangeEvent);
}

/// In-process broadcast bus. Cloned handles share subscribers.
#[derive(Debug, Clone, Default)]
pub struct ChangeBus {
    subscribers: Arc<Mutex<Vec<Sender<ChangeEvent>>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new receiver for all future events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(sender);
        }
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

impl ChangeNotifier for ChangeBus {
    fn publish(&self, event: ChangeEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            // Dropped receivers are pruned on the next publish.
            subscribers.retain(|sender| sender.send(event).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeBus, ChangeEvent, ChangeNotifier};

    #[test]
    fn event_serializes_with_kebab_case_type() {
        let value = serde_json::to_value(ChangeEvent::DataChanged { timestamp: 42 }).unwrap();
        assert_eq!(value["type"], "data-changed");
        assert_eq!(value["timestamp"], 42);
    }

    #[test]
    fn publish_reaches_live_subscribers_and_prunes_dropped_ones() {
        let bus = ChangeBus::new();
        let live = bus.subscribe();
        let dropped = bus.subscribe();
        drop(dropped);

        bus.publish(ChangeEvent::DataChanged { timestamp: 7 });
        assert_eq!(
            live.try_recv().unwrap(),
            ChangeEvent::DataChanged { timestamp: 7 }
        );
        assert_eq!(bus.subscriber_count(), 1);
    }
}
