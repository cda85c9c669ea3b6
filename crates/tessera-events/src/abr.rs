#![forbid(unsafe_code)]

use std::time::Duration;

/// Why the controller asked the host for a rendition switch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SwitchReason {
    /// Playback stalled; forced drop to the lowest rendition.
    Stall,
    /// Buffer draining and the current rendition no longer fits the bandwidth.
    StepDown,
    /// A probe chain proved a higher rendition sustainable and its trial passed.
    UpSwitch,
}

/// How a probe chain reached its terminal rendition index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerdictReason {
    /// The chain walked up to the highest available rendition.
    TopReached,
    /// The buffer fell under the healthy threshold after a probe.
    BufferUnhealthy,
    /// The probe was cut short by the watchdog.
    Aborted,
    /// The chain hit its run limit without settling.
    ChainExhausted,
    /// The transport refused to start the probe fetch.
    ProbeRefused,
}

/// Events emitted by the ABR controller.
#[derive(Clone, Debug)]
pub enum AbrEvent {
    /// Control loop armed.
    Started { rendition: usize },
    /// Control loop disarmed.
    Stopped { hard: bool },
    /// Trial records were discarded and rebuilt for a new rendition set.
    TrialsRebuilt { count: usize },
    /// Stall detected on the playing stream.
    Stall {
        low_buffer_count: u32,
        buffer_level: Duration,
    },
    /// A switch was requested from the host.
    SwitchRequested {
        from: usize,
        to: usize,
        reason: SwitchReason,
        accepted: bool,
    },
    /// An up-switch vote was recorded without reaching the trial bar.
    UpVote {
        target: usize,
        votes: u32,
        required: u32,
    },
    /// A probe chain delivered its terminal verdict.
    Verdict { index: usize, reason: VerdictReason },
    /// The stability bar between probe chains was raised.
    MaxPhasesRaised { max_phases: u32 },
}
