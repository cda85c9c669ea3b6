use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::StreamId;

/// Switch requests issued to the playback host.
///
/// Requests are fire-and-forget: the host reports the outcome later through
/// [`Controller::on_rendition_applied`](crate::Controller::on_rendition_applied).
#[cfg_attr(test, automock)]
pub trait RenditionSwitcher {
    /// Ask the host to switch to `index`. Returns whether the request was accepted.
    fn switch_rendition(&mut self, index: usize) -> bool;

    /// Whether a previously accepted switch is still in flight.
    fn is_switch_in_progress(&self) -> bool;
}

/// Parallel probe fetches issued to the transport.
#[cfg_attr(test, automock)]
pub trait ProbeTransport {
    /// Start delivering `duration` worth of the rendition at `index`.
    ///
    /// Returns the probe stream id, or `None` if the transport refuses.
    fn probe_stream(&mut self, index: usize, duration: Duration) -> Option<StreamId>;

    /// Stop a probe. `issue_network_cancel` asks for the in-flight request to
    /// be cancelled on the wire rather than only ignored locally.
    fn cancel_probe(&mut self, stream: StreamId, issue_network_cancel: bool);
}
