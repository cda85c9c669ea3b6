use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use tracing::warn;

use crate::{AbrError, AbrResult, Rendition, StreamId, StreamIdentity, StreamInfo};

/// Ordered rendition catalog.
///
/// Abstracts the catalog builder (codec filtering, resolution and bandwidth
/// ordering) away from the ABR engine. Indices are ordered indices into the
/// *actual* rendition set: dense, ascending by quality, 0 is the safest.
pub trait RenditionCatalog {
    /// Number of actual (currently eligible) renditions.
    fn rendition_count(&self) -> usize;

    /// Rendition at `index`, or `None` past the actual set.
    fn rendition(&self, index: usize) -> Option<Rendition>;

    /// All actual renditions, lowest first.
    fn actual_renditions(&self) -> Vec<Rendition>;

    /// Whether nothing above `index` is available.
    fn is_top_available(&self, index: usize) -> bool;

    /// Whether `index` belongs to the actual set.
    fn is_rendition_actual(&self, index: usize) -> bool;

    /// Stream metadata for a raw stream id.
    fn stream(&self, raw: StreamId) -> Option<StreamInfo>;

    /// Whether a video track is active.
    fn has_video(&self) -> bool;
}

/// Bounds-checked rendition lookup.
///
/// Out-of-range indices are logged and reported instead of falling back to
/// the unfiltered list.
pub(crate) fn rendition_at<C>(catalog: &C, index: usize) -> AbrResult<Rendition>
where
    C: RenditionCatalog + ?Sized,
{
    let out_of_range = || {
        let count = catalog.rendition_count();
        warn!(index, count, "rendition index out of range");
        AbrError::RenditionOutOfRange { index, count }
    };
    if !catalog.is_rendition_actual(index) {
        return Err(out_of_range());
    }
    catalog.rendition(index).ok_or_else(out_of_range)
}

/// Rolling per-stream counters maintained outside the engine.
///
/// Bandwidths and rates are bits per second. The controller writes nothing
/// here; the prober owns the accumulator of its probe stream.
#[cfg_attr(test, automock)]
pub trait MetricsSource {
    /// Average download throughput of the stream.
    fn avg_bandwidth(&self, stream: StreamId) -> f64;

    /// Average encoded media rate actually delivered.
    fn avg_rate(&self, stream: StreamId) -> f64;

    fn latest_bandwidth(&self, stream: StreamId) -> f64;

    fn latest_rate(&self, stream: StreamId) -> f64;

    /// Buffer level smoothed over the last three seconds.
    fn avg_3sec_buf_level(&self, stream: StreamId) -> Duration;

    /// Short-window buffer level.
    fn latest_buf_level(&self, stream: StreamId) -> Duration;

    /// Low-buffer events in the current window.
    fn latest_low_buffer_count(&self, stream: StreamId) -> u32;

    /// Begin an isolated measurement window.
    fn start_custom_window(&mut self, stream: StreamId);

    fn stop_custom_window(&mut self, stream: StreamId);

    /// Throughput measured inside the custom window.
    fn custom_window_bandwidth(&self, stream: StreamId) -> f64;

    /// Create the accumulator for a probe stream.
    fn open_accumulator(&mut self, stream: StreamId);

    /// Stop counting for a probe stream; collected values stay readable.
    fn halt_accumulator(&mut self, stream: StreamId);

    /// Flag a low-buffer event on the stream.
    fn record_low_buffer(&mut self, stream: StreamId);
}

// Slices of renditions act as a static catalog (tests and simple hosts).
impl RenditionCatalog for [Rendition] {
    fn rendition_count(&self) -> usize {
        self.len()
    }

    fn rendition(&self, index: usize) -> Option<Rendition> {
        self.get(index).cloned()
    }

    fn actual_renditions(&self) -> Vec<Rendition> {
        self.to_vec()
    }

    fn is_top_available(&self, index: usize) -> bool {
        index + 1 >= self.len()
    }

    fn is_rendition_actual(&self, index: usize) -> bool {
        index < self.len()
    }

    fn stream(&self, raw: StreamId) -> Option<StreamInfo> {
        self.iter()
            .find(|r| r.raw_stream_id == raw)
            .map(|r| StreamInfo {
                identity: StreamIdentity(u64::from(r.raw_stream_id.0)),
                timescale: 90_000,
            })
    }

    fn has_video(&self) -> bool {
        !self.is_empty()
    }
}

impl RenditionCatalog for Vec<Rendition> {
    fn rendition_count(&self) -> usize {
        self.as_slice().rendition_count()
    }

    fn rendition(&self, index: usize) -> Option<Rendition> {
        self.as_slice().rendition(index)
    }

    fn actual_renditions(&self) -> Vec<Rendition> {
        self.as_slice().actual_renditions()
    }

    fn is_top_available(&self, index: usize) -> bool {
        self.as_slice().is_top_available(index)
    }

    fn is_rendition_actual(&self, index: usize) -> bool {
        self.as_slice().is_rendition_actual(index)
    }

    fn stream(&self, raw: StreamId) -> Option<StreamInfo> {
        self.as_slice().stream(raw)
    }

    fn has_video(&self) -> bool {
        self.as_slice().has_video()
    }
}
