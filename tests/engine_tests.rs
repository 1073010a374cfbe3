//! End-to-end engine runs against an in-process target, on paused time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use url::Url;

use inference_loadgen::loadtest::config::RunConfig;
use inference_loadgen::loadtest::engine::{LoadTestEngine, RunStatus};
use inference_loadgen::loadtest::error::RequestError;
use inference_loadgen::loadtest::shape::ShapeConfig;
use inference_loadgen::loadtest::signer::Credentials;
use inference_loadgen::loadtest::target::{InvokeResponse, SignedRequest, Target};

/// Answers instantly and remembers when each request arrived.
#[derive(Default)]
struct RecordingTarget {
    invocations: Mutex<Vec<Instant>>,
    fail_every: Option<usize>,
}

#[async_trait]
impl Target for RecordingTarget {
    async fn invoke(&self, request: SignedRequest) -> Result<InvokeResponse, RequestError> {
        assert!(request.headers.authorization.starts_with("AWS4-HMAC-SHA256 "));
        let count = {
            let mut calls = self.invocations.lock();
            calls.push(Instant::now());
            calls.len()
        };
        match self.fail_every {
            Some(n) if count % n == 0 => Err(RequestError::Http {
                status: 503,
                body: "overloaded".to_string(),
            }),
            _ => Ok(InvokeResponse {
                status: 200,
                prediction_latency: Duration::from_millis(7),
            }),
        }
    }
}

fn run_config(shape: ShapeConfig) -> RunConfig {
    RunConfig::new(
        Url::parse("https://runtime.example.com/endpoints/model/invocations").unwrap(),
        Bytes::from_static(b"\x89PNG fake image"),
        shape,
        Credentials::new("AKIDEXAMPLE", "secret"),
    )
}

#[tokio::test(start_paused = true)]
async fn constant_forty_users_for_five_minutes() {
    let target = Arc::new(RecordingTarget::default());
    let engine = LoadTestEngine::new(run_config(ShapeConfig::Constant {
        time_limit_secs: 300,
        spawn_rate: 40,
    }))
    .with_target(target.clone())
    .with_user_seed(11);

    let t0 = Instant::now();
    let result = engine.run().await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.ticks, 301);
    assert_eq!(result.drain_started_at, Duration::from_secs(300));
    assert_eq!(result.aborted_users, 0);

    assert_eq!(result.timeline.len(), 300);
    assert_eq!(result.timeline[0].elapsed, Duration::ZERO);
    assert_eq!(result.timeline[0].active, 40);
    assert!(result
        .timeline
        .iter()
        .all(|sample| sample.target == 40 && sample.active == 40));
    assert_eq!(result.timeline[299].tick, 299);

    let invocations = target.invocations.lock().clone();
    assert!(!invocations.is_empty());
    let drain_at = t0 + result.drain_started_at;
    assert!(invocations.iter().all(|at| *at <= drain_at));

    assert_eq!(result.records.len(), invocations.len());
    assert_eq!(result.summary.total_requests, invocations.len() as u64);
    assert_eq!(result.summary.failures, 0);
    assert_eq!(
        result.summary.status_codes.get("200"),
        Some(&(invocations.len() as u64))
    );
    assert!((result.summary.prediction_latency.mean_ms - 7.0).abs() < 0.01);
}

#[tokio::test(start_paused = true)]
async fn spike_alternates_between_levels() {
    let target = Arc::new(RecordingTarget::default());
    let engine = LoadTestEngine::new(run_config(ShapeConfig::Spike {
        time_limit_secs: 60,
        spike_duration_secs: 5,
        pattern_duration_secs: 20,
        normal_users: 20,
        spike_users: 40,
    }))
    .with_target(target);

    let result = engine.run().await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.ticks, 61);
    let at = |secs: usize| result.timeline[secs];
    assert_eq!(at(0).target, 40);
    assert_eq!(at(4).target, 40);
    assert_eq!(at(5).target, 20);
    assert_eq!(at(23).target, 40);
    assert_eq!(at(23).active, 40);
    assert_eq!(at(27).target, 20);
    assert_eq!(at(27).active, 20);
}

#[tokio::test(start_paused = true)]
async fn ramp_adds_one_user_per_tick() {
    let target = Arc::new(RecordingTarget::default());
    let engine = LoadTestEngine::new(run_config(ShapeConfig::Ramp {
        time_limit_secs: 30,
        max_users: 10,
    }))
    .with_target(target);

    let result = engine.run().await.unwrap();

    let active: Vec<u32> = result.timeline.iter().map(|s| s.active).collect();
    assert_eq!(&active[..10], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    assert!(active[10..].iter().all(|a| *a == 10));
}

#[tokio::test(start_paused = true)]
async fn failures_are_recorded_not_fatal() {
    let target = Arc::new(RecordingTarget {
        fail_every: Some(2),
        ..Default::default()
    });
    let engine = LoadTestEngine::new(run_config(ShapeConfig::Constant {
        time_limit_secs: 20,
        spawn_rate: 5,
    }))
    .with_target(target.clone());

    let result = engine.run().await.unwrap();

    let calls = target.invocations.lock().len() as u64;
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.summary.total_requests, calls);
    assert_eq!(result.summary.failures, calls / 2);
    assert_eq!(result.summary.status_codes.get("503"), Some(&(calls / 2)));
    assert!(result
        .records
        .iter()
        .filter(|r| !r.success)
        .all(|r| r.status_code == Some(503)));
}

#[tokio::test(start_paused = true)]
async fn random_walk_stays_within_bounds() {
    let target = Arc::new(RecordingTarget::default());
    let engine = LoadTestEngine::new(run_config(ShapeConfig::Random {
        time_limit_secs: 30,
        seed: 42,
        min_users: 10,
        max_users: 40,
        spawn_rate: 100,
    }))
    .with_target(target);

    let result = engine.run().await.unwrap();

    assert_eq!(result.timeline.len(), 30);
    for sample in &result.timeline {
        assert!((10..=40).contains(&sample.target));
        assert_eq!(sample.active, sample.target);
    }
}
