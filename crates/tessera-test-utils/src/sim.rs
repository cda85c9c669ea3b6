//! Step-driven playback simulation.
//!
//! A single link of fixed capacity feeds the playing rendition and, while a
//! probe chain runs, the probe stream. Each step moves the clock, refills or
//! drains the buffer, delivers probe frames in 40 ms units, applies accepted
//! switches one step late, writes the resulting counters into
//! [`FakeMetrics`] and lets the controller fire its timers.

use std::{collections::VecDeque, time::Duration};

use tessera_abr::{AbrOptions, AbrResult, Controller, Rendition, StreamId};
use web_time::Instant;

use crate::{FakeMetrics, FakeSwitcher, FakeTransport, ladder};

pub type SimController = Controller<Vec<Rendition>, FakeMetrics, FakeSwitcher, FakeTransport>;

const FRAME_US: u64 = 40_000;
/// Steps remembered for the low-buffer count.
const LOW_BUFFER_WINDOW: usize = 10;

#[derive(Debug)]
struct ProbeFeed {
    stream: StreamId,
    /// Media bitrate of the probed rendition.
    required_bps: f64,
    delivered_us: f64,
    next_ts_us: u64,
    init_sent: bool,
}

#[derive(Debug)]
pub struct Playback {
    ctl: SimController,
    now: Instant,
    network_bps: f64,
    buffer: Duration,
    max_buffer: Duration,
    empty_steps: VecDeque<bool>,
    seen_requests: usize,
    applied: Vec<usize>,
    probe: Option<ProbeFeed>,
}

impl Playback {
    /// Simulation over a ladder of `bandwidths`, starting with `buffer` of media.
    ///
    /// # Errors
    ///
    /// Propagates option validation errors.
    pub fn new(bandwidths: &[u64], opts: AbrOptions, network_bps: f64, buffer: Duration) -> AbrResult<Self> {
        let ctl = Controller::new(
            ladder(bandwidths),
            FakeMetrics::new(),
            FakeSwitcher::default(),
            FakeTransport::default(),
            opts,
        )?;
        let mut sim = Self {
            ctl,
            now: Instant::now(),
            network_bps,
            buffer,
            max_buffer: Duration::from_secs(10),
            empty_steps: VecDeque::with_capacity(LOW_BUFFER_WINDOW),
            seen_requests: 0,
            applied: Vec::new(),
            probe: None,
        };
        sim.publish_metrics(network_bps);
        Ok(sim)
    }

    /// Start the controller at the current simulated time.
    pub fn start(&mut self) -> bool {
        self.ctl.start(self.now)
    }

    pub fn set_network(&mut self, bps: f64) {
        self.network_bps = bps.max(0.0);
    }

    pub fn network(&self) -> f64 {
        self.network_bps
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// Renditions the player switched to, in order.
    pub fn applied(&self) -> &[usize] {
        &self.applied
    }

    pub fn controller(&self) -> &SimController {
        &self.ctl
    }

    pub fn controller_mut(&mut self) -> &mut SimController {
        &mut self.ctl
    }

    /// Run `steps` steps of `dt`.
    pub fn run(&mut self, steps: usize, dt: Duration) {
        for _ in 0..steps {
            self.step(dt);
        }
    }

    pub fn step(&mut self, dt: Duration) {
        self.now += dt;
        self.apply_switches();
        self.track_probe();

        let required = self
            .ctl
            .current_rendition()
            .map_or(0.0, Rendition::required_bps);
        let probe_required = self.probe.as_ref().map_or(0.0, |p| p.required_bps);
        let demand = required + probe_required;
        let live_share = if demand > 0.0 {
            self.network_bps * required / demand
        } else {
            self.network_bps
        };
        let probe_share = self.network_bps - live_share;

        let dt_secs = dt.as_secs_f64();
        let filled = if required > 0.0 {
            live_share / required * dt_secs
        } else {
            0.0
        };
        let level = (self.buffer.as_secs_f64() + filled - dt_secs)
            .clamp(0.0, self.max_buffer.as_secs_f64());
        self.buffer = Duration::from_secs_f64(level);

        if self.empty_steps.len() == LOW_BUFFER_WINDOW {
            self.empty_steps.pop_front();
        }
        self.empty_steps.push_back(self.buffer.is_zero());

        self.publish_metrics(live_share);
        self.deliver_probe(probe_share, dt_secs);
        self.ctl.advance(self.now);
    }

    fn publish_metrics(&mut self, live_share: f64) {
        let Some(current) = self.ctl.current_rendition().cloned() else {
            return;
        };
        let low = self.empty_steps.iter().filter(|e| **e).count() as u32;
        let buffer = self.buffer;
        let m = self.ctl.metrics_mut();
        m.set_bandwidth(current.raw_stream_id, live_share, current.required_bps());
        m.set_buffer(current.raw_stream_id, buffer);
        m.set_low_buffer_count(current.raw_stream_id, low);
    }

    fn apply_switches(&mut self) {
        let requests = &self.ctl.switcher().requests;
        let accepted = self.ctl.switcher().accept;
        let latest = requests.get(self.seen_requests..).and_then(|r| r.last().copied());
        self.seen_requests = requests.len();

        // Re-requesting the playing rendition is a no-op for the player.
        let current = self.ctl.current_index();
        if let Some(index) = latest.filter(|&i| accepted && i != current)
            && self.ctl.on_rendition_applied(index, self.now).is_ok()
        {
            self.applied.push(index);
        }
    }

    fn track_probe(&mut self) {
        if let Some(feed) = &self.probe
            && self.ctl.is_probe_owned_by(feed.stream)
        {
            return;
        }
        self.probe = self
            .ctl
            .transport()
            .last_probe()
            .filter(|p| self.ctl.is_probe_owned_by(p.stream))
            .and_then(|p| {
                let rendition = self.ctl.catalog().get(p.index)?;
                Some(ProbeFeed {
                    stream: p.stream,
                    required_bps: rendition.required_bps(),
                    delivered_us: 0.0,
                    next_ts_us: 0,
                    init_sent: false,
                })
            });
    }

    fn deliver_probe(&mut self, share: f64, dt_secs: f64) {
        let Some(feed) = self.probe.as_mut() else {
            return;
        };
        let stream = feed.stream;
        if feed.required_bps > 0.0 {
            feed.delivered_us += share / feed.required_bps * dt_secs * 1_000_000.0;
        }
        let stats = self.ctl.metrics_mut().stats_mut(stream);
        stats.custom_window_bandwidth = share;
        stats.latest_bandwidth = share;

        let Some(feed) = self.probe.as_mut() else {
            return;
        };
        if !feed.init_sent {
            feed.init_sent = true;
            let _ = self.ctl.on_probe_init(stream, self.now);
        }
        loop {
            let Some(feed) = self.probe.as_mut() else {
                return;
            };
            if (feed.next_ts_us + FRAME_US) as f64 > feed.delivered_us {
                return;
            }
            let ts = feed.next_ts_us;
            feed.next_ts_us += FRAME_US;
            if self.ctl.on_probe_frame(stream, ts, self.now).is_err()
                || !self.ctl.is_probe_owned_by(stream)
            {
                self.probe = None;
                return;
            }
        }
    }
}
