//! The tokio driver on a paused clock.

use std::time::Duration;

use tessera_abr::{AbrDriver, AbrOptions, Controller, StreamId};
use tessera_events::{AbrEvent, Event, EventBus, ProbeEvent};
use tessera_test_utils::{FakeMetrics, FakeSwitcher, FakeTransport, ladder};
use tokio::sync::broadcast;

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn probe_frames_flow_through_handle() {
    let mut metrics = FakeMetrics::new();
    metrics.set_bandwidth(StreamId(1), 2_000_000.0, 500_000.0);
    metrics.set_buffer(StreamId(1), Duration::from_secs(10));
    metrics.set_probe_bandwidth(3_000_000.0, 3_000_000.0);

    let bus = EventBus::new(256);
    let mut rx = bus.subscribe();
    let abr = Controller::new(
        ladder(&[500_000, 1_000_000, 2_000_000]),
        metrics,
        FakeSwitcher::default(),
        FakeTransport::default(),
        AbrOptions::default(),
    )
    .unwrap()
    .with_events(bus);

    let driver = AbrDriver::spawn(abr);
    let handle = driver.handle();
    handle.start().await.unwrap();

    // Fourth eval tick opens the chain.
    tokio::time::sleep(Duration::from_millis(4050)).await;
    let stream = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            Event::Probe(ProbeEvent::Started { target: 1, stream, .. }) => Some(StreamId(stream)),
            _ => None,
        })
        .unwrap();

    handle.probe_init(stream).await.unwrap();
    for i in 0..17_u64 {
        handle.probe_frame(stream, i * 40_000).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Probe(ProbeEvent::Finished { stream: s, .. }) if StreamId(*s) == stream
    )));
    // Too short to be trusted: the chain retries the same rung.
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Probe(ProbeEvent::Started { target: 1, stream: s, .. }) if StreamId(*s) != stream
    )));

    let abr = driver.shutdown().await.unwrap();
    assert!(abr.is_probe_running());
    assert_eq!(abr.transport().probes.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_returns_stopped_controller() {
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let abr = Controller::new(
        ladder(&[500_000, 1_000_000]),
        FakeMetrics::new(),
        FakeSwitcher::default(),
        FakeTransport::default(),
        AbrOptions::default(),
    )
    .unwrap()
    .with_events(bus);

    let driver = AbrDriver::spawn(abr);
    let handle = driver.handle();
    handle.start().await.unwrap();
    handle.stop(false).await.unwrap();
    handle.stop(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let abr = driver.shutdown().await.unwrap();
    assert!(!abr.is_active());
    let stops = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, Event::Abr(AbrEvent::Stopped { hard: false })))
        .count();
    assert_eq!(stops, 1);
    assert!(handle.start().await.is_err());
}
