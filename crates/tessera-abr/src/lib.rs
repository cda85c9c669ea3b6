//! Probe-driven adaptive bitrate (ABR) decision engine.
//!
//! The engine decides which rendition of a live stream the player should
//! consume. It never fetches or decodes media itself; the host plugs in
//! through four traits:
//!
//! - [`RenditionCatalog`]: the ordered set of eligible renditions.
//! - [`MetricsSource`]: rolling per-stream bandwidth and buffer counters.
//! - [`RenditionSwitcher`]: receives switch requests.
//! - [`ProbeTransport`]: starts and cancels parallel probe fetches.
//!
//! [`Controller`] runs the control loop. Each eval tick checks for stalls
//! (forced drop to the lowest rendition), for a draining buffer that the
//! current bandwidth cannot refill (step-down), and, after a stability bar
//! of quiet ticks, opens a probe chain that fetches the next rendition in
//! parallel with playback to measure whether it is sustainable. Up-switches
//! go through per-rendition trials that demand a number of consecutive
//! favorable verdicts.
//!
//! Time is supplied by the caller. Drive the controller with
//! [`Controller::advance`], or spawn an [`AbrDriver`] (feature `runtime`)
//! that follows the tokio clock.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use tessera_abr::{
//!     AbrOptions, Controller, ProbeTransport, Rendition, RenditionSwitcher, StreamId,
//!     MetricsSource,
//! };
//! use web_time::Instant;
//!
//! struct Player;
//!
//! impl RenditionSwitcher for Player {
//!     fn switch_rendition(&mut self, index: usize) -> bool {
//!         println!("switch to {index}");
//!         true
//!     }
//!     fn is_switch_in_progress(&self) -> bool {
//!         false
//!     }
//! }
//!
//! impl ProbeTransport for Player {
//!     fn probe_stream(&mut self, _index: usize, _duration: Duration) -> Option<StreamId> {
//!         None
//!     }
//!     fn cancel_probe(&mut self, _stream: StreamId, _issue_network_cancel: bool) {}
//! }
//!
//! struct Stalled;
//!
//! impl MetricsSource for Stalled {
//!     fn avg_bandwidth(&self, _: StreamId) -> f64 { 0.0 }
//!     fn avg_rate(&self, _: StreamId) -> f64 { 0.0 }
//!     fn latest_bandwidth(&self, _: StreamId) -> f64 { 0.0 }
//!     fn latest_rate(&self, _: StreamId) -> f64 { 0.0 }
//!     fn avg_3sec_buf_level(&self, _: StreamId) -> Duration { Duration::ZERO }
//!     fn latest_buf_level(&self, _: StreamId) -> Duration { Duration::ZERO }
//!     fn latest_low_buffer_count(&self, _: StreamId) -> u32 { 10 }
//!     fn start_custom_window(&mut self, _: StreamId) {}
//!     fn stop_custom_window(&mut self, _: StreamId) {}
//!     fn custom_window_bandwidth(&self, _: StreamId) -> f64 { 0.0 }
//!     fn open_accumulator(&mut self, _: StreamId) {}
//!     fn halt_accumulator(&mut self, _: StreamId) {}
//!     fn record_low_buffer(&mut self, _: StreamId) {}
//! }
//!
//! let renditions: Vec<Rendition> = [400_000_u64, 1_200_000]
//!     .iter()
//!     .zip(0_u32..)
//!     .map(|(&bw, i)| Rendition {
//!         ordered_index: i as usize,
//!         raw_stream_id: StreamId(i),
//!         required_bandwidth: bw,
//!         height: 360,
//!         name: format!("r{i}"),
//!         codec: "avc1.64001f".into(),
//!         has_paired_audio: true,
//!     })
//!     .collect();
//!
//! let opts = AbrOptions::default().with_initial_rendition(1);
//! let mut abr = Controller::new(renditions, Stalled, Player, Player, opts).unwrap();
//!
//! let t0 = Instant::now();
//! assert!(abr.start(t0));
//! // First eval tick sees the stall and asks for rendition 0.
//! abr.advance(t0 + Duration::from_secs(1));
//! assert_eq!(abr.max_phases(), 4);
//! ```

#![forbid(unsafe_code)]

mod controller;
#[cfg(feature = "runtime")]
mod driver;
mod error;
mod evaluator;
mod host;
mod options;
mod prober;
mod source;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod timer;
mod trial;
mod types;

pub use controller::Controller;
#[cfg(feature = "runtime")]
pub use driver::{AbrCommand, AbrDriver, AbrHandle};
pub use error::{AbrError, AbrResult};
pub use host::{ProbeTransport, RenditionSwitcher};
pub use options::{AbrOptions, BufferThresholds, ProbeCancelPolicy};
pub use source::{MetricsSource, RenditionCatalog};
pub use tessera_events::SwitchReason;
pub use trial::Trial;
pub use types::{Rendition, StreamId, StreamIdentity, StreamInfo, Verdict, VerdictReason};
