//! Manual fakes of the engine's external collaborators.
//!
//! `automock` mocks are used where a test asserts exact call sequences; these
//! fakes cover the scenario-style tests that need a stateful metrics source
//! and a transport that hands out probe stream ids.

use std::{collections::HashMap, time::Duration};

use crate::{MetricsSource, ProbeTransport, Rendition, RenditionSwitcher, StreamId};

/// Build a catalog with one rendition per bandwidth, raw ids starting at 1.
pub fn ladder(bandwidths: &[u64]) -> Vec<Rendition> {
    bandwidths
        .iter()
        .zip(1_u32..)
        .enumerate()
        .map(|(i, (&bw, raw))| Rendition {
            ordered_index: i,
            raw_stream_id: StreamId(raw),
            required_bandwidth: bw,
            height: 180 * raw,
            name: format!("{}p", 180 * raw),
            codec: "avc1.64001f".to_string(),
            has_paired_audio: true,
        })
        .collect()
}

/// Counters of one stream.
#[derive(Clone, Debug, Default)]
pub struct StreamStats {
    pub avg_bandwidth: f64,
    pub avg_rate: f64,
    pub latest_bandwidth: f64,
    pub latest_rate: f64,
    pub avg_3sec_buf_level: Duration,
    pub latest_buf_level: Duration,
    pub low_buffer_count: u32,
    pub custom_window_bandwidth: f64,
    pub window_open: bool,
    pub accumulator_open: bool,
    /// Low-buffer events flagged through [`MetricsSource::record_low_buffer`].
    pub flagged_low_buffer: u32,
}

/// Metrics source whose counters are set directly by the test.
#[derive(Clone, Debug, Default)]
pub struct FakeMetrics {
    streams: HashMap<StreamId, StreamStats>,
    /// Values a probe stream reports once its accumulator is opened.
    probe_template: StreamStats,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, stream: StreamId) -> StreamStats {
        self.streams.get(&stream).cloned().unwrap_or_default()
    }

    pub fn stats_mut(&mut self, stream: StreamId) -> &mut StreamStats {
        self.streams.entry(stream).or_default()
    }

    /// Set both the smoothed and the short-window buffer level.
    pub fn set_buffer(&mut self, stream: StreamId, level: Duration) {
        let s = self.stats_mut(stream);
        s.avg_3sec_buf_level = level;
        s.latest_buf_level = level;
    }

    /// Set throughput and delivered media rate of a live stream.
    pub fn set_bandwidth(&mut self, stream: StreamId, bandwidth: f64, rate: f64) {
        let s = self.stats_mut(stream);
        s.avg_bandwidth = bandwidth;
        s.latest_bandwidth = bandwidth;
        s.avg_rate = rate;
        s.latest_rate = rate;
    }

    pub fn set_low_buffer_count(&mut self, stream: StreamId, count: u32) {
        self.stats_mut(stream).low_buffer_count = count;
    }

    /// Bandwidth every subsequently opened probe accumulator reports.
    pub fn set_probe_bandwidth(&mut self, window: f64, latest: f64) {
        self.probe_template.custom_window_bandwidth = window;
        self.probe_template.latest_bandwidth = latest;
    }
}

impl MetricsSource for FakeMetrics {
    fn avg_bandwidth(&self, stream: StreamId) -> f64 {
        self.stats(stream).avg_bandwidth
    }

    fn avg_rate(&self, stream: StreamId) -> f64 {
        self.stats(stream).avg_rate
    }

    fn latest_bandwidth(&self, stream: StreamId) -> f64 {
        self.stats(stream).latest_bandwidth
    }

    fn latest_rate(&self, stream: StreamId) -> f64 {
        self.stats(stream).latest_rate
    }

    fn avg_3sec_buf_level(&self, stream: StreamId) -> Duration {
        self.stats(stream).avg_3sec_buf_level
    }

    fn latest_buf_level(&self, stream: StreamId) -> Duration {
        self.stats(stream).latest_buf_level
    }

    fn latest_low_buffer_count(&self, stream: StreamId) -> u32 {
        self.stats(stream).low_buffer_count
    }

    fn start_custom_window(&mut self, stream: StreamId) {
        self.stats_mut(stream).window_open = true;
    }

    fn stop_custom_window(&mut self, stream: StreamId) {
        self.stats_mut(stream).window_open = false;
    }

    fn custom_window_bandwidth(&self, stream: StreamId) -> f64 {
        self.stats(stream).custom_window_bandwidth
    }

    fn open_accumulator(&mut self, stream: StreamId) {
        let mut stats = self.probe_template.clone();
        stats.accumulator_open = true;
        self.streams.insert(stream, stats);
    }

    fn halt_accumulator(&mut self, stream: StreamId) {
        self.stats_mut(stream).accumulator_open = false;
    }

    fn record_low_buffer(&mut self, stream: StreamId) {
        let s = self.stats_mut(stream);
        s.flagged_low_buffer += 1;
        s.low_buffer_count += 1;
    }
}

/// Switcher that records every request.
#[derive(Clone, Debug)]
pub struct FakeSwitcher {
    pub requests: Vec<usize>,
    pub accept: bool,
    pub in_progress: bool,
}

impl Default for FakeSwitcher {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            accept: true,
            in_progress: false,
        }
    }
}

impl RenditionSwitcher for FakeSwitcher {
    fn switch_rendition(&mut self, index: usize) -> bool {
        self.requests.push(index);
        self.accept
    }

    fn is_switch_in_progress(&self) -> bool {
        self.in_progress
    }
}

/// A probe fetch requested from [`FakeTransport`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeRequest {
    pub index: usize,
    pub duration: Duration,
    pub stream: StreamId,
}

/// Transport handing out probe stream ids from 1000 upwards.
#[derive(Clone, Debug)]
pub struct FakeTransport {
    pub probes: Vec<ProbeRequest>,
    pub cancels: Vec<(StreamId, bool)>,
    pub refuse: bool,
    next_stream: u32,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            probes: Vec::new(),
            cancels: Vec::new(),
            refuse: false,
            next_stream: 1000,
        }
    }
}

impl FakeTransport {
    pub fn last_probe(&self) -> Option<ProbeRequest> {
        self.probes.last().copied()
    }
}

impl ProbeTransport for FakeTransport {
    fn probe_stream(&mut self, index: usize, duration: Duration) -> Option<StreamId> {
        if self.refuse {
            return None;
        }
        let stream = StreamId(self.next_stream);
        self.next_stream += 1;
        self.probes.push(ProbeRequest {
            index,
            duration,
            stream,
        });
        Some(stream)
    }

    fn cancel_probe(&mut self, stream: StreamId, issue_network_cancel: bool) {
        self.cancels.push((stream, issue_network_cancel));
    }
}
