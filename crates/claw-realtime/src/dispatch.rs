//! Session update dispatch.
//!
//! The [`EventDispatcher`] is a structural router: it validates the tag and
//! the session correlator, then republishes the whole event on the channel
//! named after its tag. Malformed input is logged and dropped.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::session::{MalformedEvent, SessionUpdateEvent};

/// What happened to a dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Emitted on `channel`.
    Routed {
        /// Bus channel the event went to.
        channel: &'static str,
    },
    /// Dropped: not a routable session update.
    Dropped(MalformedEvent),
}

impl DispatchOutcome {
    /// Whether the event reached the bus.
    #[must_use]
    pub const fn is_routed(&self) -> bool {
        matches!(self, Self::Routed { .. })
    }
}

/// Routes session updates onto an [`EventBus`].
#[derive(Clone)]
pub struct EventDispatcher {
    bus: Arc<dyn EventBus>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Create a dispatcher publishing to `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Classify a raw decoded payload and route it.
    pub fn dispatch_value(&self, value: Value) -> DispatchOutcome {
        match SessionUpdateEvent::from_value(value) {
            Ok(event) => self.dispatch(event),
            Err(reason) => Self::drop_event(reason),
        }
    }

    /// Route an already typed event.
    pub fn dispatch(&self, event: SessionUpdateEvent) -> DispatchOutcome {
        if event.session_id.is_empty() {
            return Self::drop_event(MalformedEvent::MissingSessionId { kind: event.kind });
        }

        let channel = event.channel();
        debug!(channel, session_id = %event.session_id, "routing session update");
        self.bus.emit(channel, event);
        DispatchOutcome::Routed { channel }
    }

    fn drop_event(reason: MalformedEvent) -> DispatchOutcome {
        warn!(%reason, "dropping session update");
        DispatchOutcome::Dropped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEventKind;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingBus {
        emitted: Mutex<Vec<(String, SessionUpdateEvent)>>,
    }

    impl EventBus for RecordingBus {
        fn emit(&self, channel: &str, event: SessionUpdateEvent) {
            self.emitted.lock().push((channel.to_string(), event));
        }
    }

    fn dispatcher() -> (EventDispatcher, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::default());
        (EventDispatcher::new(bus.clone()), bus)
    }

    #[test]
    fn test_image_generated_routed_once_with_full_event() {
        let (dispatcher, bus) = dispatcher();
        let raw = json!({
            "type": "ImageGenerated",
            "sessionId": "sess-42",
            "imageUrl": "https://cdn.example.com/out.png",
        });

        let outcome = dispatcher.dispatch_value(raw.clone());

        assert_eq!(
            outcome,
            DispatchOutcome::Routed {
                channel: "Session::ImageGenerated"
            }
        );
        let emitted = bus.emitted.lock();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, "Session::ImageGenerated");
        assert_eq!(serde_json::to_value(&emitted[0].1).expect("serialize"), raw);
    }

    #[test]
    fn test_unknown_tag_not_emitted() {
        let (dispatcher, bus) = dispatcher();
        let outcome = dispatcher.dispatch_value(json!({ "type": "Hologram", "sessionId": "s" }));

        assert!(!outcome.is_routed());
        assert!(bus.emitted.lock().is_empty());
    }

    #[test]
    fn test_missing_session_not_emitted() {
        let (dispatcher, bus) = dispatcher();
        let outcome = dispatcher.dispatch_value(json!({ "type": "Delta", "delta": "x" }));

        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(MalformedEvent::MissingSessionId {
                kind: SessionEventKind::Delta
            })
        );
        assert!(bus.emitted.lock().is_empty());
    }

    #[test]
    fn test_typed_event_with_empty_session_dropped() {
        let (dispatcher, bus) = dispatcher();
        let outcome = dispatcher.dispatch(SessionUpdateEvent::new(SessionEventKind::Info, ""));
        assert!(!outcome.is_routed());
        assert!(bus.emitted.lock().is_empty());
    }

    #[test]
    fn test_every_kind_routes_to_its_channel() {
        let (dispatcher, bus) = dispatcher();
        for kind in SessionEventKind::ALL {
            dispatcher.dispatch(SessionUpdateEvent::new(kind, "s-1"));
        }

        let emitted = bus.emitted.lock();
        assert_eq!(emitted.len(), SessionEventKind::ALL.len());
        for ((channel, event), kind) in emitted.iter().zip(SessionEventKind::ALL) {
            assert_eq!(channel, kind.channel());
            assert_eq!(event.kind, kind);
        }
    }
}
