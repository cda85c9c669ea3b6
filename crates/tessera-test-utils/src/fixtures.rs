use rstest::fixture;
use tessera_abr::{AbrOptions, Rendition};
use web_time::Instant;

use crate::ladder;

/// Four-rung ladder: 500 kbps, 1, 2 and 4 Mbps on raw streams 1..=4.
#[fixture]
pub fn renditions() -> Vec<Rendition> {
    ladder(&[500_000, 1_000_000, 2_000_000, 4_000_000])
}

#[fixture]
pub fn options() -> AbrOptions {
    AbrOptions::default()
}

#[fixture]
pub fn t0() -> Instant {
    Instant::now()
}

#[fixture]
pub fn tracing_setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[fixture]
pub fn debug_tracing_setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("tessera_abr=debug"))
        .with_test_writer()
        .try_init();
}
