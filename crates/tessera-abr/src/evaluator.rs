use std::time::Duration;

use tessera_events::{Event, EventBus, ProbeEvent};
use tracing::debug;
use web_time::Instant;

use crate::{
    MetricsSource, ProbeTransport, RenditionCatalog, StreamId, Verdict, VerdictReason,
    options::{AbrOptions, BufferThresholds},
    prober::{ProbeProgress, ProbeReport, Prober},
    source::rendition_at,
};

/// Collaborators borrowed from the controller for the duration of one call.
pub(crate) struct Env<'a> {
    pub(crate) catalog: &'a dyn RenditionCatalog,
    pub(crate) metrics: &'a mut dyn MetricsSource,
    pub(crate) transport: &'a mut dyn ProbeTransport,
    pub(crate) bus: Option<&'a EventBus>,
}

impl Env<'_> {
    pub(crate) fn publish<E: Into<Event>>(&self, event: E) {
        if let Some(bus) = self.bus {
            bus.publish(event);
        }
    }
}

/// State of one probe chain.
#[derive(Clone, Debug)]
struct ProbeContext {
    generation: u64,
    /// Rendition playing when the chain started.
    start_index: usize,
    playing_stream: StreamId,
    /// Highest rendition proven sustainable so far.
    target: usize,
    /// Running bandwidth estimate, bits per second.
    estimate: f64,
    /// Delivered rate over nominal bitrate of the playing rendition.
    corrector: f64,
    runs_in_chain: u32,
}

#[derive(Debug)]
struct ActiveProbe {
    generation: u64,
    prober: Prober,
}

/// Owner of the probe chain.
///
/// Never switches renditions itself; a chain ends with exactly one
/// [`Verdict`] returned to the caller, or silently when it cannot start.
#[derive(Debug)]
pub(crate) struct Evaluator {
    opts: AbrOptions,
    thresholds: BufferThresholds,
    ctx: Option<ProbeContext>,
    probe: Option<ActiveProbe>,
    generation: u64,
}

impl Evaluator {
    pub(crate) fn new(opts: AbrOptions) -> Self {
        let thresholds = opts.thresholds();
        Self {
            opts,
            thresholds,
            ctx: None,
            probe: None,
            generation: 0,
        }
    }

    pub(crate) fn set_thresholds(&mut self, thresholds: BufferThresholds) {
        self.thresholds = thresholds;
    }

    /// Whether a probe chain is open.
    pub(crate) fn is_running(&self) -> bool {
        self.ctx.is_some()
    }

    pub(crate) fn is_probe_owned_by(&self, stream: StreamId) -> bool {
        self.probe
            .as_ref()
            .is_some_and(|p| p.prober.is_enabled() && p.prober.stream() == stream)
    }

    /// Latest throughput of the running probe stream, 0 without a probe.
    pub(crate) fn active_probe_bandwidth(&self, metrics: &dyn MetricsSource) -> f64 {
        self.probe
            .as_ref()
            .map_or(0.0, |p| metrics.latest_bandwidth(p.prober.stream()))
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.probe.as_ref().and_then(|p| p.prober.next_deadline())
    }

    /// Open a probe chain from the playing rendition.
    pub(crate) fn run(&mut self, env: &mut Env<'_>, playing: usize, now: Instant) -> Option<Verdict> {
        let rendition = rendition_at(env.catalog, playing).ok()?;
        let estimate = env.metrics.avg_bandwidth(rendition.raw_stream_id);

        self.generation += 1;
        self.ctx = Some(ProbeContext {
            generation: self.generation,
            start_index: playing,
            playing_stream: rendition.raw_stream_id,
            target: playing,
            estimate,
            corrector: 1.0,
            runs_in_chain: 0,
        });
        debug!(playing, estimate, "probe chain opened");
        self.do_run(env, now)
    }

    fn do_run(&mut self, env: &mut Env<'_>, now: Instant) -> Option<Verdict> {
        let ctx = self.ctx.as_mut()?;

        if ctx.estimate <= 0.0 {
            debug!(estimate = ctx.estimate, "no bandwidth estimate, chain dropped");
            self.ctx = None;
            return None;
        }
        if ctx.runs_in_chain >= self.opts.max_runs_in_chain {
            return self.finish(env, VerdictReason::ChainExhausted);
        }
        if env.catalog.is_top_available(ctx.target) {
            return self.finish(env, VerdictReason::TopReached);
        }

        let (Ok(playing), Ok(next)) = (
            rendition_at(env.catalog, ctx.start_index),
            rendition_at(env.catalog, ctx.target + 1),
        ) else {
            return self.finish(env, VerdictReason::TopReached);
        };

        let rate = env.metrics.avg_rate(playing.raw_stream_id);
        ctx.corrector = if rate > 0.0 && playing.required_bandwidth > 0 {
            rate / playing.required_bps()
        } else {
            1.0
        };
        let predicted = rate + next.required_bps() * ctx.corrector;
        let buffer = env.metrics.latest_buf_level(ctx.playing_stream);
        let duration = probe_duration(
            ctx.estimate,
            predicted,
            buffer,
            self.thresholds.min_buffering(),
            ctx.runs_in_chain == 0,
            &self.opts,
        );
        debug!(
            next = next.ordered_index,
            estimate = ctx.estimate,
            predicted,
            corrector = ctx.corrector,
            ?buffer,
            ?duration,
            run = ctx.runs_in_chain,
            "probing next rendition"
        );

        let generation = ctx.generation;
        let Some(prober) = Prober::start(
            &mut *env.transport,
            &mut *env.metrics,
            next.ordered_index,
            duration,
            now,
            &self.opts,
        ) else {
            return self.finish(env, VerdictReason::ProbeRefused);
        };
        env.metrics.start_custom_window(prober.stream());
        env.publish(ProbeEvent::Started {
            target: prober.target(),
            stream: prober.stream().0,
            duration,
        });
        self.probe = Some(ActiveProbe { generation, prober });
        None
    }

    /// Codec data of a probe stream arrived.
    pub(crate) fn on_init(&mut self, stream: StreamId, now: Instant) {
        if let Some(p) = self.probe.as_mut()
            && p.prober.stream() == stream
        {
            p.prober.receive_init(now);
        }
    }

    /// Frame of a probe stream arrived. Frames of streams this chain does not
    /// own are ignored.
    pub(crate) fn on_frame(
        &mut self,
        env: &mut Env<'_>,
        stream: StreamId,
        ts_us: u64,
        now: Instant,
    ) -> Option<Verdict> {
        let active = self.probe.as_mut().filter(|p| p.prober.stream() == stream)?;
        let progress = active.prober.receive_frame(
            &mut *env.transport,
            &mut *env.metrics,
            ts_us,
            now,
            self.opts.cancel_policy.on_complete,
        );
        let ProbeProgress::Finished(report) = progress else {
            return None;
        };
        let generation = active.generation;
        self.probe = None;
        self.on_probe_finished(env, generation, report, now)
    }

    fn on_probe_finished(
        &mut self,
        env: &mut Env<'_>,
        generation: u64,
        report: ProbeReport,
        now: Instant,
    ) -> Option<Verdict> {
        let ctx = self.ctx.as_mut().filter(|c| c.generation == generation)?;
        ctx.runs_in_chain += 1;

        env.metrics.stop_custom_window(report.stream);
        let probe_bw = env
            .metrics
            .custom_window_bandwidth(report.stream)
            .max(env.metrics.latest_bandwidth(report.stream));
        let prior = ctx.estimate;
        let total = prior + probe_bw;
        let buffer = env.metrics.latest_buf_level(ctx.playing_stream);
        let healthy = buffer >= self.thresholds.enough;
        let reliable = report.elapsed >= self.opts.reliable_probe_duration;

        env.publish(ProbeEvent::Finished {
            stream: report.stream.0,
            elapsed: report.elapsed,
            bandwidth_bps: probe_bw,
        });
        debug!(
            stream = %report.stream,
            prior,
            probe_bw,
            total,
            ?buffer,
            healthy,
            reliable,
            "probe finished"
        );

        if healthy && reliable {
            ctx.estimate = total;
            let mut index = ctx.target + 1;
            while let Some(r) = env.catalog.rendition(index) {
                if r.required_bps() * ctx.corrector * self.opts.up_walk_margin > ctx.estimate {
                    break;
                }
                ctx.target = index;
                index += 1;
            }
            debug!(rung = ctx.target, estimate = ctx.estimate, "chain advanced");
            self.do_run(env, now)
        } else if healthy {
            let normalized = if total < prior {
                total / ctx.corrector
            } else {
                total
            };
            ctx.estimate = normalized.max(prior);
            self.do_run(env, now)
        } else {
            self.finish(env, VerdictReason::BufferUnhealthy)
        }
    }

    /// Integrity check of the running probe is due.
    pub(crate) fn on_integrity_check(&mut self, env: &mut Env<'_>) {
        if let Some(p) = self.probe.as_mut()
            && p.prober.check_integrity(&mut *env.metrics)
        {
            env.publish(ProbeEvent::LowBuffer {
                stream: p.prober.stream().0,
            });
        }
    }

    /// Stop the chain now and dispose of the prober.
    ///
    /// Returns a verdict to stay on the rendition the chain started from, or
    /// `None` if no chain was open. A frame of the aborted probe arriving
    /// later is ignored.
    pub(crate) fn abort(&mut self, env: &mut Env<'_>) -> Option<Verdict> {
        let ctx = self.ctx.take()?;
        self.dispose_probe(env, self.opts.cancel_policy.on_abort);
        debug!(start = ctx.start_index, "probe chain aborted");
        Some(Verdict::new(ctx.start_index, VerdictReason::Aborted))
    }

    fn finish(&mut self, env: &mut Env<'_>, reason: VerdictReason) -> Option<Verdict> {
        let ctx = self.ctx.take()?;
        self.dispose_probe(env, self.opts.cancel_policy.on_abort);
        debug!(rung = ctx.target, ?reason, runs = ctx.runs_in_chain, "probe chain verdict");
        Some(Verdict::new(ctx.target, reason))
    }

    fn dispose_probe(&mut self, env: &mut Env<'_>, issue_network_cancel: bool) {
        let Some(mut active) = self.probe.take() else {
            return;
        };
        let stream = active.prober.stream();
        if active
            .prober
            .stop(&mut *env.transport, &mut *env.metrics, issue_network_cancel)
        {
            env.metrics.stop_custom_window(stream);
            env.publish(ProbeEvent::Aborted { stream: stream.0 });
        }
    }
}

/// Length of the next probe.
///
/// When the estimate cannot carry playback plus the probe, the probe gets the
/// time it takes the buffer to drain down to `min_buffering`, but never less
/// than the minimum. Otherwise, or past the maximum, the maximum is used. The
/// first probe of a chain is additionally capped.
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // clamped to a small positive range
pub(crate) fn probe_duration(
    estimate: f64,
    predicted: f64,
    buffer: Duration,
    min_buffering: Duration,
    first_in_chain: bool,
    opts: &AbrOptions,
) -> Duration {
    let min_ms = opts.min_probe_duration.as_secs_f64() * 1000.0;
    let max_ms = opts.max_probe_duration.as_secs_f64() * 1000.0;

    let mut ms = if estimate < predicted {
        let budget_ms = (buffer.as_secs_f64() - min_buffering.as_secs_f64()) * 1000.0;
        (estimate * budget_ms / (predicted - estimate)).round().max(min_ms)
    } else {
        0.0
    };
    if ms <= 0.0 || ms > max_ms || !ms.is_finite() {
        ms = max_ms;
    }
    if first_in_chain {
        ms = ms.min(opts.first_probe_duration.as_secs_f64() * 1000.0);
    }
    Duration::from_millis(ms.round() as u64)
}
