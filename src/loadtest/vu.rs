//! Virtual user (VU) task loop.
//!
//! Each VU repeatedly waits a random think time, signs the run's payload with
//! a fresh timestamp, sends it to the [`Target`] and appends a
//! [`RequestRecord`] to the shared [`MetricsCollector`].
//!
//! The scheduler steers a VU through its [`VuControl`]: an atomic status flag
//! plus a [`CancellationToken`] that interrupts the think-time sleep. A request
//! already in flight is never cancelled; the VU finishes it, records it and
//! only then observes the stop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::RngExt;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::loadtest::metrics::{MetricsCollector, RequestRecord};
use crate::loadtest::signer::RequestSigner;
use crate::loadtest::target::{SignedRequest, Target};

/// Lifecycle of a virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum VuStatus {
    Starting = 0,
    Active = 1,
    Stopping = 2,
    Stopped = 3,
}

impl VuStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Active,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Uniform think-time bounds, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min: Duration,
    pub max: Duration,
}

impl ThinkTime {
    /// Bounds are swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

/// Start of the request a VU is currently waiting on.
#[derive(Debug, Clone, Copy)]
pub struct InFlight {
    pub timestamp: DateTime<Utc>,
    pub started: Instant,
}

/// Scheduler-side handle on one VU.
///
/// The scheduler is the only writer of `Starting`, `Active` and `Stopping`;
/// the VU writes `Stopped` when its loop exits.
#[derive(Debug)]
pub struct VuControl {
    id: u32,
    status: AtomicU8,
    cancel: CancellationToken,
    in_flight: Mutex<Option<InFlight>>,
}

impl VuControl {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            status: AtomicU8::new(VuStatus::Starting as u8),
            cancel: CancellationToken::new(),
            in_flight: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> VuStatus {
        VuStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn mark_active(&self) {
        // A stop that raced ahead of activation wins.
        let _ = self.status.compare_exchange(
            VuStatus::Starting as u8,
            VuStatus::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Ask the VU to stop after its current iteration and wake it if sleeping.
    pub fn request_stop(&self) {
        if self.status() != VuStatus::Stopped {
            self.status
                .store(VuStatus::Stopping as u8, Ordering::Release);
        }
        self.cancel.cancel();
    }

    fn mark_stopped(&self) {
        self.status.store(VuStatus::Stopped as u8, Ordering::Release);
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled()
            || matches!(self.status(), VuStatus::Stopping | VuStatus::Stopped)
    }

    fn begin_request(&self, timestamp: DateTime<Utc>, started: Instant) {
        *self.in_flight.lock() = Some(InFlight { timestamp, started });
    }

    /// Claim the in-flight request, if any.
    ///
    /// Whoever claims it owns its record: the VU when the response arrives,
    /// or the scheduler when it force-terminates a straggler.
    pub fn take_in_flight(&self) -> Option<InFlight> {
        self.in_flight.lock().take()
    }
}

/// Everything a VU needs, shared read-only across all VUs of a run.
pub struct VuContext {
    pub signer: RequestSigner,
    pub target: Arc<dyn Target>,
    pub payload: Bytes,
    pub metrics: MetricsCollector,
    pub think_time: ThinkTime,
}

/// Main virtual user loop. Returns once the VU is `Stopped`.
pub async fn vu_loop(control: Arc<VuControl>, ctx: Arc<VuContext>, mut rng: StdRng) {
    debug!(vu = control.id(), "virtual user started");

    loop {
        if control.should_stop() {
            break;
        }

        let wait = ctx.think_time.sample(&mut rng);
        tokio::select! {
            biased;
            _ = control.cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        if control.should_stop() {
            break;
        }

        match run_iteration(&control, &ctx).await {
            Ok(Some(record)) => ctx.metrics.append(record),
            // Claimed by the scheduler as aborted.
            Ok(None) => {}
            Err(()) => break,
        }
    }

    control.mark_stopped();
    debug!(vu = control.id(), "virtual user stopped");
}

/// One sign-send-record cycle. `Err(())` means the VU cannot continue.
async fn run_iteration(control: &VuControl, ctx: &VuContext) -> Result<Option<RequestRecord>, ()> {
    let timestamp = Utc::now();
    let started = Instant::now();
    control.begin_request(timestamp, started);

    let headers = match ctx.signer.sign(&ctx.payload, timestamp) {
        Ok(headers) => headers,
        Err(err) => {
            control.take_in_flight();
            warn!(vu = control.id(), error = %err, "signing failed, stopping virtual user");
            return Err(());
        }
    };

    let result = ctx
        .target
        .invoke(SignedRequest {
            headers,
            body: ctx.payload.clone(),
        })
        .await;
    let latency = started.elapsed();

    if control.take_in_flight().is_none() {
        return Ok(None);
    }

    Ok(Some(match result {
        Ok(response) => RequestRecord::success(timestamp, latency, &response),
        Err(err) => {
            debug!(vu = control.id(), category = err.error_category(), error = %err, "request failed");
            RequestRecord::failure(timestamp, latency, err)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::error::RequestError;
    use crate::loadtest::signer::Credentials;
    use crate::loadtest::target::InvokeResponse;
    use async_trait::async_trait;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicU32;
    use url::Url;

    /// Answers after `delay`, failing every `fail_every`-th call.
    struct ScriptedTarget {
        delay: Duration,
        fail_every: u32,
        calls: AtomicU32,
    }

    impl ScriptedTarget {
        fn new(delay: Duration, fail_every: u32) -> Self {
            Self {
                delay,
                fail_every,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Target for ScriptedTarget {
        async fn invoke(&self, _request: SignedRequest) -> Result<InvokeResponse, RequestError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(RequestError::Http {
                    status: 503,
                    body: "busy".to_string(),
                });
            }
            Ok(InvokeResponse {
                status: 200,
                prediction_latency: Duration::from_millis(3),
            })
        }
    }

    fn context(target: Arc<dyn Target>, think: Duration) -> Arc<VuContext> {
        let endpoint = Url::parse("http://127.0.0.1:8080/invocations").unwrap();
        Arc::new(VuContext {
            signer: RequestSigner::new(
                Credentials::new("AKID", "secret"),
                &endpoint,
                "us-east-1",
                "sagemaker",
                "application/octet-stream",
            )
            .unwrap(),
            target,
            payload: Bytes::from_static(b"payload"),
            metrics: MetricsCollector::new(),
            think_time: ThinkTime::new(think, think),
        })
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(1)
    }

    #[test]
    fn test_think_time_bounds() {
        let think = ThinkTime::new(Duration::from_millis(30), Duration::from_millis(1));
        assert_eq!(think.min, Duration::from_millis(1));
        let mut rng = rng();
        for _ in 0..1000 {
            let d = think.sample(&mut rng);
            assert!(d >= think.min && d <= think.max);
        }
    }

    #[test]
    fn test_status_transitions() {
        let control = VuControl::new(7);
        assert_eq!(control.status(), VuStatus::Starting);
        control.mark_active();
        assert_eq!(control.status(), VuStatus::Active);
        control.request_stop();
        assert_eq!(control.status(), VuStatus::Stopping);
        control.mark_active();
        assert_eq!(control.status(), VuStatus::Stopping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vu_records_until_stopped() {
        let target = Arc::new(ScriptedTarget::new(Duration::from_millis(100), 0));
        let ctx = context(target.clone(), Duration::from_millis(900));
        let control = Arc::new(VuControl::new(1));
        control.mark_active();

        let handle = tokio::spawn(vu_loop(control.clone(), ctx.clone(), rng()));
        // One iteration takes 900ms think + 100ms request.
        tokio::time::sleep(Duration::from_millis(5_050)).await;
        control.request_stop();
        handle.await.unwrap();

        assert_eq!(control.status(), VuStatus::Stopped);
        let records = ctx.metrics.snapshot();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.success));
        assert_eq!(records[0].request_latency, Duration::from_millis(100));
        assert_eq!(records[0].prediction_latency, Duration::from_millis(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_wakes_sleeping_vu() {
        let target = Arc::new(ScriptedTarget::new(Duration::from_millis(1), 0));
        let ctx = context(target.clone(), Duration::from_secs(30));
        let control = Arc::new(VuControl::new(1));
        control.mark_active();

        let handle = tokio::spawn(vu_loop(control.clone(), ctx.clone(), rng()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = Instant::now();
        control.request_stop();
        handle.await.unwrap();

        assert!(before.elapsed() < Duration::from_secs(1));
        assert!(ctx.metrics.is_empty());
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_request_finishes_after_stop() {
        let target = Arc::new(ScriptedTarget::new(Duration::from_secs(5), 0));
        let ctx = context(target.clone(), Duration::from_millis(10));
        let control = Arc::new(VuControl::new(1));
        control.mark_active();

        let handle = tokio::spawn(vu_loop(control.clone(), ctx.clone(), rng()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        control.request_stop();
        assert_eq!(control.status(), VuStatus::Stopping);
        handle.await.unwrap();

        let records = ctx.metrics.snapshot();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_and_loop_continues() {
        let target = Arc::new(ScriptedTarget::new(Duration::from_millis(10), 2));
        let ctx = context(target.clone(), Duration::from_millis(90));
        let control = Arc::new(VuControl::new(1));
        control.mark_active();

        let handle = tokio::spawn(vu_loop(control.clone(), ctx.clone(), rng()));
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        control.request_stop();
        handle.await.unwrap();

        let records = ctx.metrics.snapshot();
        assert_eq!(records.len(), 10);
        let failures: Vec<_> = records.iter().filter(|r| !r.success).collect();
        assert_eq!(failures.len(), 5);
        assert!(failures.iter().all(|r| r.status_code == Some(503)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claimed_in_flight_request_is_not_recorded_twice() {
        let target = Arc::new(ScriptedTarget::new(Duration::from_secs(10), 0));
        let ctx = context(target.clone(), Duration::from_millis(1));
        let control = Arc::new(VuControl::new(1));
        control.mark_active();

        let handle = tokio::spawn(vu_loop(control.clone(), ctx.clone(), rng()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        control.request_stop();
        let in_flight = control.take_in_flight();
        assert!(in_flight.is_some());
        handle.await.unwrap();

        assert!(ctx.metrics.is_empty());
    }
}
