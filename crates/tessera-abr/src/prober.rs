use std::time::Duration;

use tracing::{debug, trace};
use web_time::Instant;

use crate::{MetricsSource, ProbeTransport, StreamId, options::AbrOptions, timer::Timer};

/// Outcome of feeding a frame to the prober.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ProbeProgress {
    Pending,
    Finished(ProbeReport),
}

/// Summary of a completed probe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ProbeReport {
    pub(crate) stream: StreamId,
    /// Media time the probe actually covered.
    pub(crate) elapsed: Duration,
}

/// One bounded parallel fetch of a candidate rendition.
///
/// Turns frame arrival timestamps into low-buffer flags on the probe's own
/// accumulator; the evaluator reads the accumulated bandwidth afterwards.
#[derive(Debug)]
pub(crate) struct Prober {
    stream: StreamId,
    target: usize,
    period: Duration,
    enabled: bool,
    started_at: Instant,
    init_at: Option<Instant>,
    first_ts_us: Option<u64>,
    last_ts_us: Option<u64>,
    frame_duration_us: u64,
    integrity: Timer,
    integrity_interval: Duration,
    integrity_min_period: Duration,
}

impl Prober {
    /// Ask the transport for `period` (plus one millisecond) of the rendition at
    /// `target` and open the accumulator of the returned stream.
    ///
    /// Returns `None` if the transport refused.
    pub(crate) fn start(
        transport: &mut dyn ProbeTransport,
        metrics: &mut dyn MetricsSource,
        target: usize,
        period: Duration,
        now: Instant,
        opts: &AbrOptions,
    ) -> Option<Self> {
        let Some(stream) = transport.probe_stream(target, period + Duration::from_millis(1)) else {
            debug!(index = target, ?period, "probe refused by transport");
            return None;
        };
        metrics.open_accumulator(stream);
        debug!(index = target, %stream, ?period, "probe started");

        Some(Self {
            stream,
            target,
            period,
            enabled: true,
            started_at: now,
            init_at: None,
            first_ts_us: None,
            last_ts_us: None,
            frame_duration_us: 0,
            integrity: Timer::default(),
            integrity_interval: opts.integrity_interval,
            integrity_min_period: opts.integrity_min_period,
        })
    }

    pub(crate) fn stream(&self) -> StreamId {
        self.stream
    }

    pub(crate) fn target(&self) -> usize {
        self.target
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Next integrity check, if armed.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.integrity.deadline()
    }

    /// Codec data of the probe stream arrived.
    pub(crate) fn receive_init(&mut self, now: Instant) {
        if !self.enabled || self.init_at.is_some() {
            return;
        }
        self.init_at = Some(now);
        if self.period >= self.integrity_min_period {
            self.integrity = Timer::periodic(now, self.integrity_interval);
        }
        trace!(stream = %self.stream, "probe init received");
    }

    /// Account one probe frame; completes the probe once the next frame
    /// would run past the requested period.
    pub(crate) fn receive_frame(
        &mut self,
        transport: &mut dyn ProbeTransport,
        metrics: &mut dyn MetricsSource,
        ts_us: u64,
        now: Instant,
        issue_network_cancel: bool,
    ) -> ProbeProgress {
        if !self.enabled {
            return ProbeProgress::Pending;
        }

        let first = *self.first_ts_us.get_or_insert(ts_us);
        if let Some(last) = self.last_ts_us
            && ts_us > last
        {
            self.frame_duration_us = ts_us - last;
        }
        let last = self.last_ts_us.map_or(ts_us, |l| l.max(ts_us));
        self.last_ts_us = Some(last);

        let period_us = u64::try_from(self.period.as_micros()).unwrap_or(u64::MAX);
        let expected_end = first.saturating_add(period_us);
        trace!(stream = %self.stream, ts_us, expected_end, "probe frame");

        if ts_us.saturating_add(self.frame_duration_us) <= expected_end {
            return ProbeProgress::Pending;
        }

        if self.buffered_lead_us(now) < 0 {
            metrics.record_low_buffer(self.stream);
        }
        let elapsed =
            Duration::from_micros(last.saturating_add(self.frame_duration_us) - first);
        debug!(
            stream = %self.stream,
            ?elapsed,
            wall = ?now.saturating_duration_since(self.started_at),
            "probe complete"
        );
        self.stop(transport, metrics, issue_network_cancel);

        ProbeProgress::Finished(ProbeReport {
            stream: self.stream,
            elapsed,
        })
    }

    /// Periodic check that probe data keeps ahead of real time.
    ///
    /// Returns whether a low-buffer event was flagged.
    pub(crate) fn check_integrity(&mut self, metrics: &mut dyn MetricsSource) -> bool {
        let Some(at) = self.integrity.deadline() else {
            return false;
        };
        self.integrity.fire();
        if !self.enabled {
            return false;
        }
        if self.first_ts_us.is_none() || self.buffered_lead_us(at) <= 0 {
            debug!(stream = %self.stream, "probe data behind real time");
            metrics.record_low_buffer(self.stream);
            return true;
        }
        false
    }

    /// Idempotent. Returns whether this call actually stopped the probe.
    pub(crate) fn stop(
        &mut self,
        transport: &mut dyn ProbeTransport,
        metrics: &mut dyn MetricsSource,
        issue_network_cancel: bool,
    ) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        transport.cancel_probe(self.stream, issue_network_cancel);
        metrics.halt_accumulator(self.stream);
        self.integrity.cancel();
        true
    }

    /// Media received minus wall time since init, in microseconds.
    fn buffered_lead_us(&self, now: Instant) -> i128 {
        let buffered = match (self.first_ts_us, self.last_ts_us) {
            (Some(first), Some(last)) => i128::from(last - first),
            _ => 0,
        };
        let since = self.init_at.unwrap_or(self.started_at);
        let wall = i128::try_from(now.saturating_duration_since(since).as_micros())
            .unwrap_or(i128::MAX);
        buffered - wall
    }
}
