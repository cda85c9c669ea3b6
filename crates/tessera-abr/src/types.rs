use std::fmt;

pub use tessera_events::VerdictReason;

/// Identifier of a media stream as seen by the transport and metrics layers.
///
/// Raw rendition streams and probe streams share this id space.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Catalog-assigned identity of a raw stream.
///
/// Two catalog snapshots describe the same rendition set only if every raw
/// stream keeps its identity.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamIdentity(pub u64);

/// One selectable quality variant of the live stream.
///
/// Owned by the rendition catalog; read-only to the ABR engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Rendition {
    /// Rank by ascending quality; 0 is the lowest and safest rendition.
    pub ordered_index: usize,
    /// Stream carrying this rendition.
    pub raw_stream_id: StreamId,
    /// Advertised bitrate in bits per second.
    pub required_bandwidth: u64,
    pub height: u32,
    pub name: String,
    /// Codec string (e.g. "avc1.64001f").
    pub codec: String,
    /// Whether an audio stream is muxed alongside the video.
    pub has_paired_audio: bool,
}

impl Rendition {
    /// Advertised bitrate as a float, for ratio arithmetic.
    #[expect(clippy::cast_precision_loss)] // bitrate precision loss is negligible for ABR
    pub fn required_bps(&self) -> f64 {
        self.required_bandwidth as f64
    }
}

/// Stream metadata exposed by the catalog for a raw stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamInfo {
    pub identity: StreamIdentity,
    /// Ticks per second of the stream's timestamps.
    pub timescale: u32,
}

/// Terminal result of a probe chain: the rendition to use next.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Verdict {
    pub index: usize,
    pub reason: VerdictReason,
}

impl Verdict {
    pub(crate) fn new(index: usize, reason: VerdictReason) -> Self {
        Self { index, reason }
    }
}
