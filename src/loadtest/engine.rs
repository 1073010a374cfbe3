//! Load test execution engine.
//!
//! [`LoadTestEngine`] owns one run end to end:
//! - validates the shape and preflights request signing before any user exists
//! - drives the [`UserPoolScheduler`] from a fixed-cadence tick loop
//! - drains the population when the shape stops or a [`StopHandle`] fires
//! - returns every recorded request plus an aggregate [`MetricsSummary`]
//!
//! Fatal problems (bad shape, missing credentials) are returned as
//! [`LoadTestError`] before the first request is sent. Per-request failures
//! only show up in the recorded metrics.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::loadtest::config::RunConfig;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::{MetricsCollector, MetricsSummary, RequestRecord};
use crate::loadtest::scheduler::{TickOutcome, UserPoolScheduler};
use crate::loadtest::signer::RequestSigner;
use crate::loadtest::target::{HttpTarget, Target};
use crate::loadtest::vu::VuContext;

/// Log a progress line every this many ticks.
const PROGRESS_EVERY_TICKS: u64 = 10;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The shape reached its time limit.
    Completed,
    /// A [`StopHandle`] requested an early drain.
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }
}

/// Population at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PopulationSample {
    pub tick: u64,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Target requested by the shape.
    pub target: u32,
    /// Active users after this tick's adjustment.
    pub active: u32,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Result of a finished run.
#[derive(Debug)]
pub struct LoadTestResult {
    /// Every request attempt, in the order it was recorded.
    pub records: Vec<RequestRecord>,
    pub summary: MetricsSummary,
    /// Run start to end of drain.
    pub elapsed: Duration,
    /// Ticks evaluated, including the one that answered stop.
    pub ticks: u64,
    pub status: RunStatus,
    /// Offset from run start at which draining began.
    pub drain_started_at: Duration,
    /// Users force-terminated by the drain timeout.
    pub aborted_users: u32,
    pub timeline: Vec<PopulationSample>,
}

/// Cloneable handle that asks a running engine to drain early.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Top-level load test engine.
pub struct LoadTestEngine {
    config: RunConfig,
    target: Option<Arc<dyn Target>>,
    stop: StopHandle,
    user_seed: Option<u64>,
}

impl LoadTestEngine {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            target: None,
            stop: StopHandle::default(),
            user_seed: None,
        }
    }

    /// Send requests to `target` instead of an [`HttpTarget`] built from the
    /// config.
    pub fn with_target(mut self, target: Arc<dyn Target>) -> Self {
        self.target = Some(target);
        self
    }

    /// Make per-user think times reproducible.
    pub fn with_user_seed(mut self, seed: u64) -> Self {
        self.user_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run the load test to completion.
    pub async fn run(&self) -> Result<LoadTestResult, LoadTestError> {
        let config = &self.config;
        let shape = config.shape.build()?;

        let signer = RequestSigner::new(
            config.credentials.clone(),
            &config.endpoint,
            config.region.clone(),
            config.service.clone(),
            config.content_type.clone(),
        )?;
        // Surfaces timestamp problems before any user is spawned.
        signer.sign(&config.payload, Utc::now())?;

        let target: Arc<dyn Target> = match &self.target {
            Some(target) => target.clone(),
            None => Arc::new(HttpTarget::new(config.endpoint.clone(), config.timeout)?),
        };

        let metrics = MetricsCollector::new();
        let ctx = Arc::new(VuContext {
            signer,
            target,
            payload: config.payload.clone(),
            metrics: metrics.clone(),
            think_time: config.think_time,
        });

        info!(
            shape = shape.name(),
            endpoint = %config.endpoint,
            time_limit_secs = shape.time_limit().as_secs(),
            peak_users = shape.peak_users(),
            "starting load test"
        );

        let mut scheduler = UserPoolScheduler::new(shape, ctx, config.drain_timeout);
        if let Some(seed) = self.user_seed {
            scheduler = scheduler.with_user_seed(seed);
        }

        let start = Instant::now();
        let mut interval = tokio::time::interval(config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks: u64 = 0;
        let mut timeline = Vec::new();

        let status = loop {
            tokio::select! {
                biased;
                _ = self.stop.token.cancelled() => break RunStatus::Stopped,
                _ = interval.tick() => {}
            }

            let tick = ticks;
            ticks += 1;
            let elapsed = start.elapsed();

            match scheduler.tick(elapsed) {
                TickOutcome::Stop => break RunStatus::Completed,
                TickOutcome::Adjusted(change) => {
                    timeline.push(PopulationSample {
                        tick,
                        elapsed,
                        target: change.target,
                        active: change.active,
                    });
                    if tick % PROGRESS_EVERY_TICKS == 0 {
                        info!(
                            tick,
                            elapsed_secs = elapsed.as_secs(),
                            target_users = change.target,
                            active = change.active,
                            requests = metrics.len(),
                            "progress"
                        );
                    }
                }
            }
        };

        let drain_started_at = start.elapsed();
        info!(
            status = status.as_str(),
            ticks,
            elapsed_secs = drain_started_at.as_secs_f64(),
            "load test ending"
        );
        let drain = scheduler.drain().await;
        debug!(?drain, "drain finished");

        let records = metrics.snapshot();
        let summary = MetricsSummary::from_records(&records);
        let elapsed = start.elapsed();
        info!(
            requests = summary.total_requests,
            failures = summary.failures,
            elapsed_secs = elapsed.as_secs_f64(),
            "load test finished"
        );

        Ok(LoadTestResult {
            records,
            summary,
            elapsed,
            ticks,
            status,
            drain_started_at,
            aborted_users: drain.aborted_users,
            timeline,
        })
    }
}
