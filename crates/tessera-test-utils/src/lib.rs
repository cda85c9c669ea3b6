#![forbid(unsafe_code)]
#![expect(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "test utility crate, simulation arithmetic mixes media time and float rates"
)]

//! Shared test utilities for the tessera workspace.
//!
//! Re-exports the collaborator fakes of `tessera_abr::testing` next to rstest
//! fixtures, a deterministic PRNG and [`Playback`], a step-driven playback
//! simulation around a [`tessera_abr::Controller`].

pub mod fixtures;
pub mod rng;
pub mod sim;

pub use fixtures::*;
pub use rng::Xorshift64;
pub use sim::{Playback, SimController};
pub use tessera_abr::testing::*;
