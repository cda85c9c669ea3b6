#![forbid(unsafe_code)]

//! Unified event bus for the tessera ABR engine.

mod abr;
mod bus;
mod event;
mod probe;

pub use abr::{AbrEvent, SwitchReason, VerdictReason};
pub use bus::EventBus;
pub use event::Event;
pub use probe::ProbeEvent;
