//! Events published by the controller.

use std::time::Duration;

use rstest::rstest;
use tessera_abr::{AbrOptions, Controller, StreamId, SwitchReason, VerdictReason};
use tessera_events::{AbrEvent, Event, EventBus, ProbeEvent};
use tessera_test_utils::{FakeMetrics, FakeSwitcher, FakeTransport, ladder, t0};
use web_time::Instant;

#[rstest]
fn watchdog_abort_is_reported(t0: Instant) {
    let mut metrics = FakeMetrics::new();
    metrics.set_bandwidth(StreamId(1), 2_000_000.0, 500_000.0);
    metrics.set_buffer(StreamId(1), Duration::from_secs(10));

    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let mut abr = Controller::new(
        ladder(&[500_000, 1_000_000, 2_000_000]),
        metrics,
        FakeSwitcher::default(),
        FakeTransport::default(),
        AbrOptions::default(),
    )
    .unwrap()
    .with_events(bus);

    abr.start(t0);
    abr.advance(t0 + Duration::from_secs(4));
    abr.metrics_mut().stats_mut(StreamId(1)).latest_buf_level = Duration::from_millis(800);
    abr.advance(t0 + Duration::from_millis(4100));

    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    let tail: Vec<_> = events.iter().skip_while(|e| !matches!(e, Event::Probe(ProbeEvent::Started { .. }))).collect();
    assert!(matches!(tail[0], Event::Probe(ProbeEvent::Started { target: 1, .. })));
    assert!(matches!(tail[1], Event::Probe(ProbeEvent::Aborted { .. })));
    assert!(matches!(
        tail[2],
        Event::Abr(AbrEvent::Verdict {
            index: 0,
            reason: VerdictReason::Aborted
        })
    ));
    assert!(matches!(tail[3], Event::Abr(AbrEvent::MaxPhasesRaised { max_phases: 4 })));
}

#[rstest]
fn up_vote_is_reported_before_switch(t0: Instant) {
    // Each completed chain votes once; two votes are needed.
    let mut metrics = FakeMetrics::new();
    metrics.set_bandwidth(StreamId(1), 2_000_000.0, 500_000.0);
    metrics.set_buffer(StreamId(1), Duration::from_secs(10));
    metrics.set_probe_bandwidth(3_000_000.0, 3_000_000.0);

    let bus = EventBus::new(256);
    let mut rx = bus.subscribe();
    let mut abr = Controller::new(
        ladder(&[500_000, 1_000_000, 2_000_000]),
        metrics,
        FakeSwitcher::default(),
        FakeTransport::default(),
        AbrOptions::default().with_initial_required_up_votes(2),
    )
    .unwrap()
    .with_events(bus);
    abr.start(t0);

    let mut now = t0;
    for _ in 0..2 {
        // Let a chain open, then complete its probes.
        while !abr.is_probe_running() {
            now += Duration::from_millis(100);
            abr.advance(now);
        }
        while abr.is_probe_running() {
            let stream = abr.transport().last_probe().unwrap().stream;
            abr.on_probe_init(stream, now).unwrap();
            let mut ts = 0;
            while abr.is_probe_owned_by(stream) {
                abr.on_probe_frame(stream, ts, now).unwrap();
                ts += 40_000;
            }
        }
    }

    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    let vote = events
        .iter()
        .position(|e| matches!(e, Event::Abr(AbrEvent::UpVote { target: 2, votes: 1, required: 2 })))
        .unwrap();
    let switch = events
        .iter()
        .position(|e| {
            matches!(
                e,
                Event::Abr(AbrEvent::SwitchRequested {
                    from: 0,
                    to: 2,
                    reason: SwitchReason::UpSwitch,
                    accepted: true
                })
            )
        })
        .unwrap();
    assert!(vote < switch);
    assert_eq!(abr.switcher().requests, vec![2]);
}
