//! Property-based tests for load shapes, population planning and signing.

use proptest::prelude::*;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use url::Url;

use inference_loadgen::loadtest::scheduler::{plan_adjustment, Adjustment};
use inference_loadgen::loadtest::shape::{LoadPhase, ShapeConfig, ShapeStrategy, ShapeTick};
use inference_loadgen::loadtest::signer::{Credentials, RequestSigner};

fn signer() -> RequestSigner {
    RequestSigner::new(
        Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
        &Url::parse("https://runtime.example.com/endpoints/model/invocations").unwrap(),
        "us-east-1",
        "sagemaker",
        "application/octet-stream",
    )
    .unwrap()
}

/// Apply one planned adjustment to a population count.
fn step(active: u32, phase: LoadPhase) -> u32 {
    match plan_adjustment(active, phase) {
        Adjustment::Spawn(n) => active + n,
        Adjustment::Retire(n) => active - n,
        Adjustment::Hold => active,
    }
}

fn any_shape() -> impl Strategy<Value = ShapeConfig> {
    prop_oneof![
        (1i64..600, 0i64..200).prop_map(|(t, r)| ShapeConfig::Constant {
            time_limit_secs: t,
            spawn_rate: r,
        }),
        (1i64..600, 0i64..200).prop_map(|(t, m)| ShapeConfig::Ramp {
            time_limit_secs: t,
            max_users: m,
        }),
        (1i64..600, any::<u64>(), 0i64..50, 0i64..50, 0i64..200).prop_map(
            |(t, seed, a, b, r)| ShapeConfig::Random {
                time_limit_secs: t,
                seed,
                min_users: a.min(b),
                max_users: a.max(b),
                spawn_rate: r,
            }
        ),
        (1i64..600, 0i64..30, 1i64..60, 0i64..100, 0i64..100).prop_map(
            |(t, s, p, n, k)| ShapeConfig::Spike {
                time_limit_secs: t,
                spike_duration_secs: s,
                pattern_duration_secs: p,
                normal_users: n,
                spike_users: k,
            }
        ),
    ]
}

proptest! {
    /// Every valid shape answers with a phase bounded by its peak before the
    /// time limit, and with stop from the time limit on.
    #[test]
    fn shape_phases_bounded_and_stop_at_limit(
        config in any_shape(),
        offsets in prop::collection::vec(0u64..1_200_000, 1..50),
    ) {
        let mut shape = config.build().unwrap();
        let limit = shape.time_limit();
        let peak = shape.peak_users();
        for ms in offsets {
            let elapsed = Duration::from_millis(ms);
            match shape.next(elapsed) {
                ShapeTick::Phase(phase) => {
                    prop_assert!(elapsed < limit);
                    prop_assert!(phase.target_concurrency <= peak);
                }
                ShapeTick::Stop => prop_assert!(elapsed >= limit),
            }
        }
    }

    /// Ramp population never decreases and never passes `max_users`.
    #[test]
    fn ramp_population_monotonic(max_users in 0u32..100, ticks in 1u64..200) {
        let mut shape = ShapeStrategy::ramp(Duration::from_secs(ticks), max_users);
        let mut active = 0u32;
        for t in 0..ticks {
            let phase = shape.next(Duration::from_secs(t)).phase().unwrap();
            let next = step(active, phase);
            prop_assert!(next >= active);
            prop_assert!(next <= max_users);
            active = next;
        }
        prop_assert_eq!(active, max_users.min(ticks as u32));
    }

    /// Population moves at most `spawn_rate` per step and reaches the target
    /// within ceil(|delta| / rate) steps.
    #[test]
    fn plan_adjustment_converges_at_rate(
        start in 0u32..500,
        target in 0u32..500,
        rate in 1u32..100,
    ) {
        let phase = LoadPhase::new(target, rate);
        let delta = start.abs_diff(target);
        let expected_steps = delta.div_ceil(rate);

        let mut active = start;
        for _ in 0..expected_steps {
            let next = step(active, phase);
            prop_assert!(next.abs_diff(active) <= rate);
            active = next;
        }
        prop_assert_eq!(active, target);
        prop_assert_eq!(plan_adjustment(active, phase), Adjustment::Hold);
    }

    /// A zero spawn rate freezes the population.
    #[test]
    fn zero_rate_holds(active in 0u32..500, target in 0u32..500) {
        prop_assert_eq!(
            plan_adjustment(active, LoadPhase::new(target, 0)),
            Adjustment::Hold
        );
    }

    /// Spike level is chosen by the position inside the repeating pattern.
    #[test]
    fn spike_level_follows_pattern(
        spike_secs in 0u64..20,
        pattern_secs in 1u64..40,
        at_ms in 0u64..600_000,
    ) {
        let mut shape = ShapeStrategy::periodic_spike(
            Duration::from_secs(600),
            Duration::from_secs(spike_secs),
            Duration::from_secs(pattern_secs),
            20,
            40,
        );
        let phase = shape.next(Duration::from_millis(at_ms)).phase().unwrap();
        let in_spike = at_ms % (pattern_secs * 1_000) < spike_secs * 1_000;
        let expected = if in_spike { 40 } else { 20 };
        prop_assert_eq!(phase, LoadPhase::new(expected, expected));
    }

    /// Two random walks with the same seed produce the same targets.
    #[test]
    fn random_walk_reproducible(seed in any::<u64>(), ticks in 1u64..100) {
        let mut a = ShapeStrategy::random_walk(Duration::from_secs(ticks), seed);
        let mut b = ShapeStrategy::random_walk(Duration::from_secs(ticks), seed);
        for t in 0..ticks {
            let elapsed = Duration::from_secs(t);
            let pa = a.next(elapsed).phase().unwrap();
            let pb = b.next(elapsed).phase().unwrap();
            prop_assert_eq!(pa, pb);
            prop_assert!((10..=40).contains(&pa.target_concurrency));
            prop_assert_eq!(pa.spawn_rate, 100);
        }
    }

    /// Signing the same bytes at the same instant is deterministic.
    #[test]
    fn signing_deterministic(
        payload in prop::collection::vec(any::<u8>(), 0..256),
        secs in 0i64..4_000_000_000,
    ) {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        let signer = signer();
        prop_assert_eq!(
            signer.sign(&payload, ts).unwrap(),
            signer.sign(&payload, ts).unwrap()
        );
    }

    /// Flipping any payload byte changes the signature.
    #[test]
    fn signing_detects_payload_change(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
    ) {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let signer = signer();
        let mut flipped = payload.clone();
        let i = index.index(flipped.len());
        flipped[i] ^= 0xff;
        let original = signer.signing_context(&payload, ts).unwrap();
        let changed = signer.signing_context(&flipped, ts).unwrap();
        prop_assert_ne!(original.signature, changed.signature);
        prop_assert_eq!(original.credential_scope, changed.credential_scope);
    }
}
