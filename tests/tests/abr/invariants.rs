//! Randomized runs checking the control loop invariants after every step.

use std::time::Duration;

use rstest::rstest;
use tessera_abr::AbrOptions;
use tessera_test_utils::{Playback, Xorshift64};

const STEP: Duration = Duration::from_millis(100);

fn random_ladder(rng: &mut Xorshift64) -> Vec<u64> {
    let rungs = rng.range_u64(2, 7);
    let mut bw = rng.range_u64(150_000, 600_000);
    (0..rungs)
        .map(|_| {
            let rung = bw;
            bw += bw * rng.range_u64(40, 120) / 100;
            rung
        })
        .collect()
}

fn check(sim: &Playback, opts: &AbrOptions, last_max_phases: &mut u32, seed: u64) {
    let ctl = sim.controller();
    for trial in ctl.trials() {
        let required = trial.required_up_votes();
        assert!(
            (1..=opts.max_required_up_votes).contains(&required),
            "seed {seed}: required up-votes {required} out of bounds"
        );
    }

    let max_phases = ctl.max_phases();
    assert!(max_phases <= opts.max_phases_cap, "seed {seed}: max_phases {max_phases}");
    assert!(
        max_phases >= *last_max_phases,
        "seed {seed}: max_phases shrank from {last_max_phases} to {max_phases}"
    );
    *last_max_phases = max_phases;

    for probe in &ctl.transport().probes {
        // Requests ask for one millisecond over the probe period.
        let period = probe.duration - Duration::from_millis(1);
        assert!(
            period >= opts.min_probe_duration && period <= opts.max_probe_duration,
            "seed {seed}: probe period {period:?}"
        );
    }
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(42)]
#[case(1_234)]
#[case(99_991)]
#[case(0xDEAD_BEEF)]
fn random_network_keeps_invariants(#[case] seed: u64) {
    let mut rng = Xorshift64::new(seed);
    let ladder = random_ladder(&mut rng);
    let top = *ladder.last().unwrap();
    let initial = usize::try_from(rng.range_u64(0, ladder.len() as u64)).unwrap();
    let opts = AbrOptions::default().with_initial_rendition(initial);
    let mut sim = Playback::new(
        &ladder,
        opts.clone(),
        rng.range_f64(0.0, 3.0 * top as f64),
        Duration::from_secs(rng.range_u64(0, 10)),
    )
    .unwrap();
    assert!(sim.start());

    let mut last_max_phases = sim.controller().max_phases();
    for step in 0..3_000 {
        if step % 50 == 0 {
            sim.set_network(rng.range_f64(0.0, 3.0 * top as f64));
        }
        if rng.chance(0.002) {
            let now = sim.now();
            sim.controller_mut().restart(false, now);
        }
        sim.step(STEP);
        check(&sim, &opts, &mut last_max_phases, seed);
    }
    assert!(sim.controller().is_active());
}

#[rstest]
#[case(3)]
#[case(11)]
#[case(2_024)]
fn first_probe_of_chain_is_short(#[case] seed: u64) {
    let mut rng = Xorshift64::new(seed);
    let mut sim = Playback::new(
        &[400_000, 900_000, 2_000_000, 4_500_000],
        AbrOptions::default(),
        rng.range_f64(2_000_000.0, 20_000_000.0),
        Duration::from_secs(6),
    )
    .unwrap();
    assert!(sim.start());

    let mut was_running = false;
    let mut seen = 0;
    for _ in 0..1_200 {
        sim.step(STEP);
        let ctl = sim.controller();
        let probes = &ctl.transport().probes;
        if !was_running && ctl.is_probe_running() {
            // A chain opened during this step; its first request comes first.
            let first = probes[seen];
            assert!(first.duration <= Duration::from_millis(601), "seed {seed}: {first:?}");
        }
        was_running = ctl.is_probe_running();
        seen = probes.len();
    }
}
