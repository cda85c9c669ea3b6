use std::time::Duration;

use tessera_events::{AbrEvent, Event, EventBus, SwitchReason};
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::{
    AbrError, AbrResult, MetricsSource, ProbeTransport, Rendition, RenditionCatalog,
    RenditionSwitcher, StreamId, Verdict,
    evaluator::{Env, Evaluator},
    options::{AbrOptions, BufferThresholds},
    source::rendition_at,
    timer::Timer,
    trial::{Trial, TrialBook},
};

/// Timer slots in firing order for equal deadlines.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum TimerKind {
    Restart,
    Watchdog,
    Integrity,
    Eval,
    Decay(StreamId),
}

/// Session state of one playback session.
#[derive(Debug)]
struct Session {
    active: bool,
    current_index: usize,
    /// Snapshot of the playing rendition, taken on start and on every applied switch.
    current: Option<Rendition>,
    /// Ticks since the last action.
    phase_count: u32,
    /// Stability bar between probe chains. Never shrinks within a session.
    max_phases: u32,
    thresholds: BufferThresholds,
    eval: Timer,
    watchdog: Timer,
    restart: Timer,
}

/// Top-level ABR control loop.
///
/// The only component that asks the host for a rendition switch. Owns the
/// timers, the stall and step-down checks, and the per-rendition trial
/// hysteresis; up-switch candidates come from probe chains run by the
/// evaluator.
///
/// Time is external: hosts call [`advance`](Self::advance) with the current
/// instant (or use [`AbrDriver`](crate::AbrDriver)), and every due timer fires
/// in deadline order.
pub struct Controller<C, M, S, T> {
    catalog: C,
    metrics: M,
    switcher: S,
    transport: T,
    opts: AbrOptions,
    bus: Option<EventBus>,
    session: Session,
    evaluator: Evaluator,
    trials: TrialBook,
}

impl<C, M, S, T> Controller<C, M, S, T>
where
    C: RenditionCatalog,
    M: MetricsSource,
    S: RenditionSwitcher,
    T: ProbeTransport,
{
    /// Create an idle controller.
    ///
    /// # Errors
    ///
    /// Returns [`AbrError::InvalidOptions`] if `opts` fail validation.
    pub fn new(catalog: C, metrics: M, switcher: S, transport: T, opts: AbrOptions) -> AbrResult<Self> {
        opts.validate()?;
        let current = catalog.rendition(opts.initial_rendition);
        Ok(Self {
            catalog,
            metrics,
            switcher,
            transport,
            session: Session {
                active: false,
                current_index: opts.initial_rendition,
                current,
                phase_count: 0,
                max_phases: opts.initial_max_phases,
                thresholds: opts.thresholds(),
                eval: Timer::default(),
                watchdog: Timer::default(),
                restart: Timer::default(),
            },
            evaluator: Evaluator::new(opts.clone()),
            trials: TrialBook::new(&opts),
            bus: None,
            opts,
        })
    }

    /// Publish controller and probe events on `bus`.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn publish<E: Into<Event>>(&self, event: E) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    fn split(&mut self) -> (&mut Evaluator, Env<'_>) {
        (
            &mut self.evaluator,
            Env {
                catalog: &self.catalog,
                metrics: &mut self.metrics,
                transport: &mut self.transport,
                bus: self.bus.as_ref(),
            },
        )
    }

    // Control surface

    /// Arm the control loop.
    ///
    /// Does nothing and returns `false` with fewer than two renditions or
    /// without an active video track.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.session.active {
            debug!("start ignored, already active");
            return true;
        }
        let count = self.catalog.rendition_count();
        if count < 2 || !self.catalog.has_video() {
            debug!(count, has_video = self.catalog.has_video(), "start skipped");
            return false;
        }

        let Ok(current) = rendition_at(&self.catalog, self.session.current_index)
            .or_else(|_| rendition_at(&self.catalog, 0))
        else {
            return false;
        };

        if self.trials.sync(&self.catalog) {
            debug!(count = self.trials.len(), "trials rebuilt");
            self.publish(AbrEvent::TrialsRebuilt {
                count: self.trials.len(),
            });
        }
        self.trials
            .arm_decay(current.raw_stream_id, now + self.opts.decay_delay);

        let s = &mut self.session;
        s.current_index = current.ordered_index;
        s.current = Some(current);
        s.phase_count = 0;
        s.restart.cancel();
        s.eval = Timer::periodic(now, self.opts.eval_interval);
        s.watchdog = Timer::periodic(now, self.opts.watchdog_interval);
        s.active = true;

        info!(
            rendition = s.current_index,
            max_phases = s.max_phases,
            "ABR started"
        );
        self.publish(AbrEvent::Started {
            rendition: self.session.current_index,
        });
        true
    }

    /// Disarm the control loop and drop any probe chain.
    ///
    /// A hard stop also discards the trials and the stability bar, so the
    /// next start begins a new session. Stopping twice is the same as
    /// stopping once.
    pub fn stop(&mut self, hard: bool) {
        let was_active = self.session.active;
        let s = &mut self.session;
        s.active = false;
        s.eval.cancel();
        s.watchdog.cancel();
        s.restart.cancel();
        s.phase_count = 0;

        let (evaluator, mut env) = self.split();
        if evaluator.abort(&mut env).is_some() {
            debug!("probe chain dropped on stop");
        }
        self.trials.cancel_all_decays();

        if hard {
            self.trials.clear();
            self.session.max_phases = self.opts.initial_max_phases;
        }
        if was_active {
            info!(hard, "ABR stopped");
            self.publish(AbrEvent::Stopped { hard });
        }
    }

    /// Soft stop, then start again now or after the restart delay.
    ///
    /// Trials survive with their votes zeroed. Returns what `start` returned,
    /// or `true` for a delayed restart.
    pub fn restart(&mut self, delayed: bool, now: Instant) -> bool {
        self.stop(false);
        if delayed {
            self.session.restart = Timer::once(now + self.opts.restart_delay);
            debug!(delay = ?self.opts.restart_delay, "restart scheduled");
            true
        } else {
            self.start(now)
        }
    }

    /// Recompute buffer thresholds for a new buffering target.
    pub fn set_buffering_target(&mut self, target: Duration) {
        let thresholds = BufferThresholds::for_target(target, &self.opts);
        self.opts.buffering_target = target;
        self.session.thresholds = thresholds;
        self.evaluator.set_thresholds(thresholds);
        debug!(?target, ?thresholds, "buffering target changed");
    }

    /// Make the next eval tick due at `now`; it runs on the next
    /// [`advance`](Self::advance).
    pub fn schedule_immediate_evaluation(&mut self, now: Instant) {
        if self.session.active {
            self.session.eval.fire_at(now);
        }
    }

    /// Whether `stream` is the stream of the running probe.
    pub fn is_probe_owned_by(&self, stream: StreamId) -> bool {
        self.evaluator.is_probe_owned_by(stream)
    }

    /// The host finished switching to `index`.
    ///
    /// Resets the phase count and restarts residency decay for the new
    /// rendition. A probe chain started from another rendition is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AbrError::RenditionOutOfRange`] for an index outside the
    /// actual renditions.
    pub fn on_rendition_applied(&mut self, index: usize, now: Instant) -> AbrResult<()> {
        let rendition = rendition_at(&self.catalog, index)?;
        let previous = self.session.current.as_ref().map(|r| r.raw_stream_id);

        if previous != Some(rendition.raw_stream_id) && self.evaluator.is_running() {
            let (evaluator, mut env) = self.split();
            evaluator.abort(&mut env);
            debug!("playing rendition changed, probe chain dropped");
        }
        if self.session.active && previous != Some(rendition.raw_stream_id) {
            if let Some(raw) = previous {
                self.trials.cancel_decay(raw);
            }
            self.trials
                .arm_decay(rendition.raw_stream_id, now + self.opts.decay_delay);
        }

        info!(
            from = self.session.current_index,
            to = index,
            height = rendition.height,
            "rendition applied"
        );
        self.session.current_index = index;
        self.session.current = Some(rendition);
        self.session.phase_count = 0;
        Ok(())
    }

    /// Codec data of a probe stream arrived.
    ///
    /// # Errors
    ///
    /// Returns [`AbrError::UnknownStream`] if no running probe owns `stream`.
    pub fn on_probe_init(&mut self, stream: StreamId, now: Instant) -> AbrResult<()> {
        if !self.is_probe_owned_by(stream) {
            return Err(AbrError::UnknownStream(stream));
        }
        self.evaluator.on_init(stream, now);
        Ok(())
    }

    /// A frame of a probe stream arrived, `ts_us` in microseconds.
    ///
    /// # Errors
    ///
    /// Returns [`AbrError::UnknownStream`] if no running probe owns `stream`.
    pub fn on_probe_frame(&mut self, stream: StreamId, ts_us: u64, now: Instant) -> AbrResult<()> {
        if !self.is_probe_owned_by(stream) {
            return Err(AbrError::UnknownStream(stream));
        }
        let (evaluator, mut env) = self.split();
        if let Some(verdict) = evaluator.on_frame(&mut env, stream, ts_us, now) {
            self.on_verdict(verdict);
        }
        Ok(())
    }

    // Timers

    /// Fire every timer due at `now`, earliest first.
    ///
    /// Each handler sees its own deadline as the current time, so a caller
    /// that falls behind replays the missed ticks in order.
    pub fn advance(&mut self, now: Instant) {
        while let Some((at, kind)) = self.next_timer().filter(|(at, _)| *at <= now) {
            match kind {
                TimerKind::Restart => {
                    self.session.restart.fire();
                    self.start(at);
                }
                TimerKind::Watchdog => {
                    self.session.watchdog.fire();
                    self.on_watchdog();
                }
                TimerKind::Integrity => {
                    let (evaluator, mut env) = self.split();
                    evaluator.on_integrity_check(&mut env);
                }
                TimerKind::Eval => {
                    self.session.eval.fire();
                    self.on_eval_tick(at);
                }
                TimerKind::Decay(raw) => self.on_decay(raw),
            }
        }
    }

    /// Earliest armed deadline, for an external scheduler.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_timer().map(|(at, _)| at)
    }

    fn next_timer(&self) -> Option<(Instant, TimerKind)> {
        let s = &self.session;
        [
            s.restart.deadline().map(|d| (d, TimerKind::Restart)),
            s.watchdog.deadline().map(|d| (d, TimerKind::Watchdog)),
            self.evaluator
                .next_deadline()
                .map(|d| (d, TimerKind::Integrity)),
            s.eval.deadline().map(|d| (d, TimerKind::Eval)),
            self.trials
                .next_decay()
                .map(|(raw, d)| (d, TimerKind::Decay(raw))),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn on_watchdog(&mut self) {
        let Some(stream) = self.current_stream() else {
            return;
        };
        if !self.evaluator.is_running() {
            return;
        }
        let level = self.metrics.latest_buf_level(stream);
        if level >= self.session.thresholds.step_down {
            return;
        }

        warn!(?level, step_down = ?self.session.thresholds.step_down, "watchdog aborting probe");
        let (evaluator, mut env) = self.split();
        if let Some(verdict) = evaluator.abort(&mut env) {
            self.on_verdict(verdict);
        }
    }

    fn on_eval_tick(&mut self, now: Instant) {
        if self.switcher.is_switch_in_progress() {
            debug!("eval tick skipped, switch in progress");
            return;
        }
        let Some(current) = self.session.current.clone() else {
            return;
        };
        let stream = current.raw_stream_id;
        let low_buffer_count = self.metrics.latest_low_buffer_count(stream);
        let level = self.metrics.avg_3sec_buf_level(stream);

        if low_buffer_count >= self.opts.stall_low_buffer_count
            || level <= self.opts.stall_buffer_level
        {
            self.on_stall(&current, low_buffer_count, level);
            return;
        }

        let phase_count = self.session.phase_count;
        if phase_count >= self.opts.min_phases {
            let available = self.metrics.avg_bandwidth(stream)
                + self.evaluator.active_probe_bandwidth(&self.metrics);
            let thresholds = self.session.thresholds;

            if level < thresholds.step_down && current.required_bps() > available {
                self.step_down(&current, available);
            } else if level > thresholds.safe_run
                && low_buffer_count == 0
                && available > 0.0
                && !self.catalog.is_top_available(current.ordered_index)
                && !self.evaluator.is_running()
                && phase_count >= self.session.max_phases
            {
                debug!(
                    rendition = current.ordered_index,
                    available,
                    ?level,
                    phase_count,
                    "starting probe chain"
                );
                self.session.phase_count = 0;
                let (evaluator, mut env) = self.split();
                if let Some(verdict) = evaluator.run(&mut env, current.ordered_index, now) {
                    self.on_verdict(verdict);
                }
            } else {
                debug!(
                    rendition = current.ordered_index,
                    available,
                    ?level,
                    phase_count,
                    max_phases = self.session.max_phases,
                    "eval tick, no action"
                );
            }
        }

        if !self.evaluator.is_running() && self.session.phase_count < self.session.max_phases {
            self.session.phase_count += 1;
        }
    }

    fn on_stall(&mut self, current: &Rendition, low_buffer_count: u32, level: Duration) {
        warn!(
            rendition = current.ordered_index,
            low_buffer_count,
            ?level,
            "stall detected"
        );
        self.publish(AbrEvent::Stall {
            low_buffer_count,
            buffer_level: level,
        });

        let (evaluator, mut env) = self.split();
        evaluator.abort(&mut env);
        if current.ordered_index == 0 {
            // Same-index request: the host decides whether to flush and rebuffer.
            self.request_switch(0, 0, SwitchReason::Stall);
        } else {
            self.switch_to(0, SwitchReason::Stall);
        }
        self.raise_max_phases();
        self.session.phase_count = 0;
    }

    fn step_down(&mut self, current: &Rendition, available: f64) {
        let (evaluator, mut env) = self.split();
        let aborted = evaluator.abort(&mut env).is_some();

        let rate = self.metrics.latest_rate(current.raw_stream_id);
        let corrector = if rate > 0.0 && current.required_bandwidth > 0 {
            rate / current.required_bps()
        } else {
            1.0
        };
        let target = (0..current.ordered_index)
            .rev()
            .find(|&i| {
                self.catalog.rendition(i).is_some_and(|r| {
                    r.required_bps() * corrector * self.opts.down_switch_margin <= available
                })
            })
            .unwrap_or(0);

        debug!(
            rendition = current.ordered_index,
            target,
            available,
            corrector,
            aborted,
            "step-down check"
        );
        if target != current.ordered_index {
            self.switch_to(target, SwitchReason::StepDown);
        }
        if aborted || target != current.ordered_index {
            self.session.phase_count = 0;
        }
    }

    fn on_decay(&mut self, raw: StreamId) {
        if let Some(required) = self.trials.fire_decay(raw) {
            debug!(stream = %raw, required, "residency decay");
        }
    }

    fn on_verdict(&mut self, verdict: Verdict) {
        let current = self.session.current_index;
        debug!(
            index = verdict.index,
            reason = ?verdict.reason,
            current,
            "probe chain verdict"
        );
        self.publish(AbrEvent::Verdict {
            index: verdict.index,
            reason: verdict.reason,
        });

        if verdict.index == current {
            self.trials.reset_votes();
            self.raise_max_phases();
        } else {
            let reason = if verdict.index > current {
                SwitchReason::UpSwitch
            } else {
                SwitchReason::StepDown
            };
            self.switch_to(verdict.index, reason);
        }
        self.session.phase_count = 0;
    }

    /// Switch hysteresis: downs go out at once and penalize a rendition left
    /// early; ups need the target's trial to collect its votes.
    fn switch_to(&mut self, target: usize, reason: SwitchReason) -> bool {
        let from = self.session.current_index;
        if target == from {
            return false;
        }

        if target < from {
            let accepted = self.request_switch(from, target, reason);
            // A refused request leaves the rendition playing, so it keeps its decay.
            if accepted
                && let Some(raw) = self.current_stream()
                && let Some(required) = self.trials.penalize_if_pending(raw)
            {
                debug!(stream = %raw, required, "rendition abandoned before decay");
            }
            return accepted;
        }

        let Ok(rendition) = rendition_at(&self.catalog, target) else {
            return false;
        };
        let raw = rendition.raw_stream_id;
        let Some((votes, required)) = self.trials.vote_up(raw) else {
            warn!(stream = %raw, "no trial for up-switch target");
            return false;
        };
        if votes < required {
            debug!(target, votes, required, "up-switch vote");
            self.publish(AbrEvent::UpVote {
                target,
                votes,
                required,
            });
            return false;
        }

        let accepted = self.request_switch(from, target, reason);
        if accepted {
            self.trials.clear_votes(raw);
        }
        accepted
    }

    fn request_switch(&mut self, from: usize, to: usize, reason: SwitchReason) -> bool {
        let accepted = self.switcher.switch_rendition(to);
        info!(from, to, ?reason, accepted, "rendition switch requested");
        self.publish(AbrEvent::SwitchRequested {
            from,
            to,
            reason,
            accepted,
        });
        accepted
    }

    fn raise_max_phases(&mut self) {
        let s = &mut self.session;
        if s.max_phases < self.opts.max_phases_cap {
            s.max_phases += 1;
            let max_phases = s.max_phases;
            debug!(max_phases, "stability bar raised");
            self.publish(AbrEvent::MaxPhasesRaised { max_phases });
        }
    }

    fn current_stream(&self) -> Option<StreamId> {
        self.session.current.as_ref().map(|r| r.raw_stream_id)
    }

    // Observation

    pub fn is_active(&self) -> bool {
        self.session.active
    }

    /// Rendition the controller believes is playing.
    pub fn current_rendition(&self) -> Option<&Rendition> {
        self.session.current.as_ref()
    }

    pub fn current_index(&self) -> usize {
        self.session.current_index
    }

    pub fn phase_count(&self) -> u32 {
        self.session.phase_count
    }

    pub fn max_phases(&self) -> u32 {
        self.session.max_phases
    }

    pub fn trial(&self, raw: StreamId) -> Option<&Trial> {
        self.trials.get(raw)
    }

    pub fn trials(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter()
    }

    pub fn step_down_level(&self) -> Duration {
        self.session.thresholds.step_down
    }

    pub fn safe_run_level(&self) -> Duration {
        self.session.thresholds.safe_run
    }

    /// Whether a probe chain is open.
    pub fn is_probe_running(&self) -> bool {
        self.evaluator.is_running()
    }

    pub fn options(&self) -> &AbrOptions {
        &self.opts
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Mutable catalog access. A changed rendition set takes effect on the
    /// next start.
    pub fn catalog_mut(&mut self) -> &mut C {
        &mut self.catalog
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut M {
        &mut self.metrics
    }

    pub fn switcher(&self) -> &S {
        &self.switcher
    }

    pub fn switcher_mut(&mut self) -> &mut S {
        &mut self.switcher
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<C, M, S, T> std::fmt::Debug for Controller<C, M, S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("session", &self.session)
            .field("evaluator", &self.evaluator)
            .field("trials", &self.trials)
            .finish_non_exhaustive()
    }
}
