#![forbid(unsafe_code)]

use crate::{AbrEvent, ProbeEvent};

/// Unified event for the ABR engine.
///
/// Hierarchical: the control loop and the probe chain each have a sub-enum.
#[derive(Clone, Debug)]
pub enum Event {
    /// Control loop event.
    Abr(AbrEvent),
    /// Probe chain event.
    Probe(ProbeEvent),
}

impl From<AbrEvent> for Event {
    fn from(e: AbrEvent) -> Self {
        Self::Abr(e)
    }
}

impl From<ProbeEvent> for Event {
    fn from(e: ProbeEvent) -> Self {
        Self::Probe(e)
    }
}
