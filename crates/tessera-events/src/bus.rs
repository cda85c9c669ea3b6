#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::Event;

/// Broadcast bus carrying controller decisions to observers.
///
/// Events of one controller arrive in decision order. A receiver that falls
/// behind loses the oldest events and is told how many.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Sync, so timer handlers can call it. Dropped when nobody listens.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    /// Receiver for events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    use super::*;
    use crate::{AbrEvent, ProbeEvent, SwitchReason, VerdictReason};

    /// Events of a stall on rendition 2 that interrupts a running chain.
    fn stall_sequence(bus: &EventBus) {
        bus.publish(AbrEvent::Stall {
            low_buffer_count: 10,
            buffer_level: Duration::from_millis(80),
        });
        bus.publish(ProbeEvent::Aborted { stream: 9 });
        bus.publish(AbrEvent::Verdict {
            index: 2,
            reason: VerdictReason::Aborted,
        });
        bus.publish(AbrEvent::SwitchRequested {
            from: 2,
            to: 0,
            reason: SwitchReason::Stall,
            accepted: true,
        });
        bus.publish(AbrEvent::MaxPhasesRaised { max_phases: 4 });
    }

    fn label(event: &Event) -> &'static str {
        match event {
            Event::Abr(AbrEvent::Stall { .. }) => "stall",
            Event::Probe(ProbeEvent::Aborted { .. }) => "probe-aborted",
            Event::Abr(AbrEvent::Verdict { .. }) => "verdict",
            Event::Abr(AbrEvent::SwitchRequested { .. }) => "switch",
            Event::Abr(AbrEvent::MaxPhasesRaised { .. }) => "max-phases",
            _ => "other",
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<&'static str> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(label(&event));
        }
        seen
    }

    #[test]
    fn decisions_without_observers_are_dropped() {
        let bus = EventBus::default();
        stall_sequence(&bus);
        let mut late = bus.subscribe();
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn every_observer_sees_decision_order() {
        let bus = EventBus::new(16);
        let mut ui = bus.subscribe();
        let mut stats = bus.clone().subscribe();
        stall_sequence(&bus);

        let expected = ["stall", "probe-aborted", "verdict", "switch", "max-phases"];
        assert_eq!(drain(&mut ui), expected);
        assert_eq!(drain(&mut stats), expected);
    }

    #[tokio::test]
    async fn slow_observer_skips_to_latest_decisions() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        stall_sequence(&bus);

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(drain(&mut rx), ["switch", "max-phases"]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(AbrEvent::Started { rendition: 1 });
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::Abr(AbrEvent::Started { rendition: 1 }))
        ));
    }
}
