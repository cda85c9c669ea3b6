#![forbid(unsafe_code)]

use std::time::Duration;

/// Events emitted by the probe chain.
#[derive(Clone, Debug)]
pub enum ProbeEvent {
    /// Parallel fetch of a higher rendition requested.
    Started {
        target: usize,
        stream: u32,
        duration: Duration,
    },
    /// Probe stream delivered data slower than real time.
    LowBuffer { stream: u32 },
    /// Probe covered its full period.
    Finished {
        stream: u32,
        elapsed: Duration,
        bandwidth_bps: f64,
    },
    /// Probe was cancelled before completion.
    Aborted { stream: u32 },
}
