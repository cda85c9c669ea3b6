//! End-to-end control loop scenarios.

use std::time::Duration;

use rstest::rstest;
use tessera_abr::{AbrOptions, Controller, StreamId};
use tessera_test_utils::{
    FakeMetrics, FakeSwitcher, FakeTransport, Playback, ladder, t0, tracing_setup,
};
use web_time::Instant;

const STEP: Duration = Duration::from_millis(100);

fn ladder4() -> [u64; 4] {
    [500_000, 1_000_000, 2_000_000, 4_000_000]
}

#[rstest]
fn stall_on_two_renditions_drops_to_lowest(_tracing_setup: (), t0: Instant) {
    let mut metrics = FakeMetrics::new();
    metrics.set_buffer(StreamId(2), Duration::from_secs(2));
    metrics.set_low_buffer_count(StreamId(2), 10);
    let mut abr = Controller::new(
        ladder(&[800_000, 2_400_000]),
        metrics,
        FakeSwitcher::default(),
        FakeTransport::default(),
        AbrOptions::default().with_initial_rendition(1),
    )
    .unwrap();

    assert!(abr.start(t0));
    abr.advance(t0 + Duration::from_secs(1));

    assert_eq!(abr.switcher().requests, vec![0]);
    assert_eq!(abr.max_phases(), 4);
    assert_eq!(abr.phase_count(), 0);
}

#[rstest]
fn fast_network_climbs_to_top(_tracing_setup: ()) {
    let mut sim = Playback::new(
        &ladder4(),
        AbrOptions::default(),
        20_000_000.0,
        Duration::from_secs(4),
    )
    .unwrap();
    assert!(sim.start());

    sim.run(40, STEP);
    assert!(sim.applied().is_empty());
    assert_eq!(sim.controller().transport().probes.len(), 1);

    sim.run(10, STEP);
    assert_eq!(sim.applied(), &[3]);
    assert_eq!(sim.controller().current_index(), 3);
    assert!(!sim.controller().is_probe_running());
}

#[rstest]
fn collapsing_network_steps_down_to_affordable_rendition(_tracing_setup: ()) {
    let mut sim = Playback::new(
        &ladder4(),
        AbrOptions::default().with_initial_rendition(3),
        1_500_000.0,
        Duration::from_secs(10),
    )
    .unwrap();
    assert!(sim.start());

    sim.run(130, STEP);
    assert!(sim.applied().is_empty());

    sim.run(30, STEP);
    assert_eq!(sim.applied(), &[1]);
    assert!(sim.buffer() > Duration::from_millis(1200));
    // Left rendition 3 before its decay fired.
    let trial = sim.controller().trial(StreamId(4)).unwrap();
    assert_eq!(trial.required_up_votes(), 3);
}

#[rstest]
fn empty_buffer_forces_lowest(_tracing_setup: ()) {
    let mut sim = Playback::new(
        &ladder4(),
        AbrOptions::default().with_initial_rendition(2),
        100_000.0,
        Duration::from_millis(500),
    )
    .unwrap();
    assert!(sim.start());

    sim.run(11, STEP);
    assert_eq!(sim.applied(), &[0]);
    assert_eq!(sim.controller().max_phases(), 4);
}

#[rstest]
fn no_network_without_chain(_tracing_setup: ()) {
    // A healthy buffer but no measured bandwidth never opens a probe chain.
    let mut sim = Playback::new(
        &ladder4(),
        AbrOptions::default(),
        0.0,
        Duration::from_secs(10),
    )
    .unwrap();
    assert!(sim.start());
    sim.run(50, STEP);
    assert!(sim.controller().transport().probes.is_empty());
}
