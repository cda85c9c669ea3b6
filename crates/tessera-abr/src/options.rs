use std::time::Duration;

use derive_setters::Setters;

use crate::{AbrError, AbrResult};

/// Which probe stops also cancel the in-flight request on the wire.
///
/// When a network-level cancel is warranted is a transport concern, so the
/// choice is left to the host per stop cause.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeCancelPolicy {
    /// Probe covered its full period.
    pub on_complete: bool,
    /// Probe cut short by the watchdog, a stall, a step-down or `stop()`.
    pub on_abort: bool,
}

impl Default for ProbeCancelPolicy {
    fn default() -> Self {
        Self {
            on_complete: false,
            on_abort: true,
        }
    }
}

/// ABR engine configuration.
#[derive(Clone, Setters)]
#[setters(prefix = "with_")]
pub struct AbrOptions {
    /// Rendition playing when the controller is created.
    pub initial_rendition: usize,
    /// Period of the evaluation tick.
    pub eval_interval: Duration,
    /// Period of the probe watchdog.
    pub watchdog_interval: Duration,
    /// Residency on a rendition after which its trial gets easier.
    pub decay_delay: Duration,
    /// Delay of `restart(delayed = true)`.
    pub restart_delay: Duration,
    /// Period of the probe integrity check.
    pub integrity_interval: Duration,
    /// Probes shorter than this skip the integrity check.
    pub integrity_min_period: Duration,
    /// Ticks since the last action before step-down/step-up checks run.
    pub min_phases: u32,
    /// Initial stability bar between probe chains.
    pub initial_max_phases: u32,
    /// Ceiling of the stability bar.
    pub max_phases_cap: u32,
    /// Low-buffer events per window that count as a stall.
    pub stall_low_buffer_count: u32,
    /// Smoothed buffer level at or under which playback counts as stalled.
    pub stall_buffer_level: Duration,
    pub initial_required_up_votes: u32,
    pub max_required_up_votes: u32,
    /// Extra up-votes demanded from a rendition abandoned before its decay.
    pub abandon_penalty: u32,
    /// Bandwidth headroom a step-down target must leave.
    pub down_switch_margin: f64,
    /// Bandwidth headroom a rung must leave for the probe chain to walk past it.
    pub up_walk_margin: f64,
    pub min_probe_duration: Duration,
    pub max_probe_duration: Duration,
    /// Cap on the first probe of a chain.
    pub first_probe_duration: Duration,
    /// Probes at least this long are trusted as a final measurement.
    pub reliable_probe_duration: Duration,
    /// Probe runs after which a chain settles on its current target.
    pub max_runs_in_chain: u32,
    /// Playback buffering target the thresholds derive from.
    pub buffering_target: Duration,
    pub step_down_ratio: f64,
    pub safe_run_ratio: f64,
    pub enough_buffer_ratio: f64,
    pub cancel_policy: ProbeCancelPolicy,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            initial_rendition: 0,
            eval_interval: Duration::from_secs(1),
            watchdog_interval: Duration::from_millis(100),
            decay_delay: Duration::from_secs(60),
            restart_delay: Duration::from_secs(5),
            integrity_interval: Duration::from_millis(500),
            integrity_min_period: Duration::from_millis(1000),
            min_phases: 3,
            initial_max_phases: 3,
            max_phases_cap: 30,
            stall_low_buffer_count: 10,
            stall_buffer_level: Duration::from_millis(100),
            initial_required_up_votes: 1,
            max_required_up_votes: 15,
            abandon_penalty: 2,
            down_switch_margin: 1.1,
            up_walk_margin: 1.2,
            min_probe_duration: Duration::from_millis(100),
            max_probe_duration: Duration::from_millis(3000),
            first_probe_duration: Duration::from_millis(600),
            reliable_probe_duration: Duration::from_millis(3000),
            max_runs_in_chain: 8,
            buffering_target: Duration::from_secs(3),
            step_down_ratio: 0.5,
            safe_run_ratio: 1.0,
            enough_buffer_ratio: 0.75,
            cancel_policy: ProbeCancelPolicy::default(),
        }
    }
}

impl std::fmt::Debug for AbrOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbrOptions")
            .field("initial_rendition", &self.initial_rendition)
            .field("eval_interval", &self.eval_interval)
            .field("watchdog_interval", &self.watchdog_interval)
            .field("decay_delay", &self.decay_delay)
            .field("max_phases", &(self.initial_max_phases, self.max_phases_cap))
            .field(
                "up_votes",
                &(self.initial_required_up_votes, self.max_required_up_votes),
            )
            .field(
                "probe_duration",
                &(self.min_probe_duration, self.max_probe_duration),
            )
            .field("buffering_target", &self.buffering_target)
            .field("cancel_policy", &self.cancel_policy)
            .finish_non_exhaustive()
    }
}

impl AbrOptions {
    /// Reject values the control loop cannot work with.
    pub fn validate(&self) -> AbrResult<()> {
        let invalid = |msg: &str| Err(AbrError::InvalidOptions(msg.to_string()));

        if self.eval_interval.is_zero()
            || self.watchdog_interval.is_zero()
            || self.integrity_interval.is_zero()
        {
            return invalid("timer periods must be non-zero");
        }
        if self.initial_max_phases == 0 || self.initial_max_phases > self.max_phases_cap {
            return invalid("initial_max_phases must be in 1..=max_phases_cap");
        }
        if self.max_required_up_votes == 0
            || self.initial_required_up_votes == 0
            || self.initial_required_up_votes > self.max_required_up_votes
        {
            return invalid("initial_required_up_votes must be in 1..=max_required_up_votes");
        }
        if self.min_probe_duration > self.max_probe_duration
            || self.first_probe_duration < self.min_probe_duration
        {
            return invalid("probe durations must satisfy min <= first and min <= max");
        }
        if self.max_runs_in_chain == 0 {
            return invalid("max_runs_in_chain must be non-zero");
        }
        let ratios = [
            self.step_down_ratio,
            self.safe_run_ratio,
            self.enough_buffer_ratio,
            self.down_switch_margin,
            self.up_walk_margin,
        ];
        if ratios.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return invalid("ratios and margins must be positive");
        }
        Ok(())
    }

    /// Buffer thresholds for the configured buffering target.
    pub fn thresholds(&self) -> BufferThresholds {
        BufferThresholds::for_target(self.buffering_target, self)
    }
}

/// Buffer levels derived from the buffering target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BufferThresholds {
    /// Under this the watchdog aborts probes and the controller may step down.
    pub step_down: Duration,
    /// Over this the controller may start a probe chain.
    pub safe_run: Duration,
    /// After a probe, at least this much buffer counts as healthy.
    pub enough: Duration,
}

impl BufferThresholds {
    pub fn for_target(target: Duration, opts: &AbrOptions) -> Self {
        Self {
            step_down: target.mul_f64(opts.step_down_ratio),
            safe_run: target.mul_f64(opts.safe_run_ratio),
            enough: target.mul_f64(opts.enough_buffer_ratio),
        }
    }

    /// Level the probe duration budget drains the buffer down to.
    pub fn min_buffering(&self) -> Duration {
        self.step_down
    }
}
