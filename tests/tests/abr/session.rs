//! Session lifetime: stop, restart and catalog changes.

use std::time::Duration;

use rstest::{fixture, rstest};
use tessera_abr::{AbrOptions, Controller, Rendition, StreamId};
use tessera_test_utils::{FakeMetrics, FakeSwitcher, FakeTransport, Playback, renditions, t0};
use web_time::Instant;

type Abr = Controller<Vec<Rendition>, FakeMetrics, FakeSwitcher, FakeTransport>;

/// Playing rendition 2 on a draining buffer with no bandwidth: the fourth
/// eval tick steps down and penalizes rendition 2.
#[fixture]
fn stepped_down(renditions: Vec<Rendition>, t0: Instant) -> (Abr, Instant) {
    let mut metrics = FakeMetrics::new();
    metrics.set_buffer(StreamId(3), Duration::from_secs(1));
    let mut abr = Controller::new(
        renditions,
        metrics,
        FakeSwitcher::default(),
        FakeTransport::default(),
        AbrOptions::default().with_initial_rendition(2),
    )
    .unwrap();
    assert!(abr.start(t0));
    abr.advance(t0 + Duration::from_secs(4));
    assert_eq!(abr.switcher().requests, vec![0]);
    (abr, t0 + Duration::from_secs(4))
}

#[rstest]
fn soft_stop_keeps_trials(stepped_down: (Abr, Instant)) {
    let (mut abr, now) = stepped_down;
    assert_eq!(abr.trial(StreamId(3)).unwrap().required_up_votes(), 3);

    abr.stop(false);
    assert!(!abr.is_active());
    assert_eq!(abr.next_deadline(), None);
    assert!(abr.start(now));
    assert_eq!(abr.trial(StreamId(3)).unwrap().required_up_votes(), 3);
}

#[rstest]
fn hard_stop_discards_trials(stepped_down: (Abr, Instant)) {
    let (mut abr, now) = stepped_down;
    abr.stop(true);
    assert_eq!(abr.trials().count(), 0);
    assert!(abr.start(now));
    assert_eq!(abr.trial(StreamId(3)).unwrap().required_up_votes(), 1);
    assert_eq!(abr.max_phases(), 3);
}

#[rstest]
fn changed_rendition_set_rebuilds_trials(stepped_down: (Abr, Instant)) {
    let (mut abr, now) = stepped_down;
    abr.stop(false);
    for r in abr.catalog_mut() {
        r.raw_stream_id = StreamId(r.raw_stream_id.0 + 10);
    }
    assert!(abr.start(now));

    assert!(abr.trial(StreamId(3)).is_none());
    let rebuilt = abr.trial(StreamId(13)).unwrap();
    assert_eq!(rebuilt.required_up_votes(), 1);
    assert_eq!(abr.trials().count(), 4);
}

#[rstest]
fn stop_twice_is_stop_once() {
    let mut sim = Playback::new(
        &[500_000, 1_000_000, 2_000_000],
        AbrOptions::default(),
        10_000_000.0,
        Duration::from_secs(5),
    )
    .unwrap();
    assert!(sim.start());
    sim.run(40, Duration::from_millis(100));
    assert!(sim.controller().is_probe_running());

    let observe = |sim: &Playback| {
        let ctl = sim.controller();
        (
            ctl.is_active(),
            ctl.is_probe_running(),
            ctl.max_phases(),
            ctl.phase_count(),
            ctl.next_deadline(),
            ctl.transport().cancels.clone(),
            ctl.switcher().requests.clone(),
            ctl.trials()
                .map(|t| (t.required_up_votes(), t.consecutive_up_votes(), t.is_decay_pending()))
                .collect::<Vec<_>>(),
        )
    };

    sim.controller_mut().stop(false);
    let once = observe(&sim);
    sim.controller_mut().stop(false);
    assert_eq!(once, observe(&sim));
    assert_eq!(once.5.len(), 1);
}

#[rstest]
fn delayed_restart_resumes_control(t0: Instant, renditions: Vec<Rendition>) {
    let mut metrics = FakeMetrics::new();
    metrics.set_buffer(StreamId(1), Duration::from_secs(2));
    let mut abr = Controller::new(
        renditions,
        metrics,
        FakeSwitcher::default(),
        FakeTransport::default(),
        AbrOptions::default(),
    )
    .unwrap();
    abr.start(t0);

    abr.restart(true, t0 + Duration::from_secs(1));
    abr.advance(t0 + Duration::from_secs(5));
    assert!(!abr.is_active());
    abr.advance(t0 + Duration::from_secs(6));
    assert!(abr.is_active());
}
