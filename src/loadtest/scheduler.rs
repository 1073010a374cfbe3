//! Population control: turns shape ticks into spawned and retired VUs.
//!
//! Every tick the [`UserPoolScheduler`] asks its [`ShapeStrategy`] for the
//! current [`LoadPhase`] and moves the active population towards the target
//! by at most `spawn_rate` users. Retired users are asked to stop and finish
//! their current request in the background. When the shape answers
//! [`ShapeTick::Stop`], the engine calls [`UserPoolScheduler::drain`] to stop
//! everyone within a bounded timeout.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::loadtest::metrics::RequestRecord;
use crate::loadtest::shape::{LoadPhase, ShapeStrategy, ShapeTick};
use crate::loadtest::vu::{vu_loop, VuContext, VuControl, VuStatus};

/// Population change decided for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Spawn(u32),
    Retire(u32),
    Hold,
}

/// Decide how many users to add or remove to move `active` towards
/// `phase.target_concurrency`, never by more than `phase.spawn_rate`.
pub fn plan_adjustment(active: u32, phase: LoadPhase) -> Adjustment {
    let target = phase.target_concurrency;
    let step = match target.cmp(&active) {
        Ordering::Greater => Adjustment::Spawn(phase.spawn_rate.min(target - active)),
        Ordering::Less => Adjustment::Retire(phase.spawn_rate.min(active - target)),
        Ordering::Equal => Adjustment::Hold,
    };
    match step {
        Adjustment::Spawn(0) | Adjustment::Retire(0) => Adjustment::Hold,
        other => other,
    }
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Adjusted(PopulationChange),
    /// The shape reached its time limit. Call [`UserPoolScheduler::drain`].
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PopulationChange {
    pub target: u32,
    pub spawned: u32,
    pub retired: u32,
    /// Active users after the adjustment.
    pub active: u32,
}

/// What happened while draining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Users asked to stop, including those already retiring.
    pub stopped_users: u32,
    /// Users force-terminated after the drain timeout.
    pub aborted_users: u32,
    /// In-flight requests recorded as aborted.
    pub aborted_requests: u32,
    pub timed_out: bool,
}

struct VuHandle {
    control: Arc<VuControl>,
    join: JoinHandle<()>,
}

/// Owns the VU population of one run.
pub struct UserPoolScheduler {
    shape: ShapeStrategy,
    ctx: Arc<VuContext>,
    tracker: TaskTracker,
    /// Active users, newest last. Retirement pops from the end.
    active: Vec<VuHandle>,
    /// Users told to stop that have not exited yet.
    retiring: Vec<VuHandle>,
    drain_timeout: Duration,
    user_rng: StdRng,
    next_id: u32,
}

impl UserPoolScheduler {
    pub fn new(shape: ShapeStrategy, ctx: Arc<VuContext>, drain_timeout: Duration) -> Self {
        Self {
            shape,
            ctx,
            tracker: TaskTracker::new(),
            active: Vec::new(),
            retiring: Vec::new(),
            drain_timeout,
            user_rng: StdRng::from_rng(&mut rand::rng()),
            next_id: 0,
        }
    }

    /// Seed the generator that hands each new user its think-time RNG.
    pub fn with_user_seed(mut self, seed: u64) -> Self {
        self.user_rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Users currently counted towards the target.
    pub fn active_count(&self) -> u32 {
        self.active.len() as u32
    }

    /// Retired users still finishing their last request.
    pub fn retiring_count(&self) -> u32 {
        self.retiring.len() as u32
    }

    /// Evaluate the shape at `elapsed` and adjust the population.
    pub fn tick(&mut self, elapsed: Duration) -> TickOutcome {
        self.retiring.retain(|vu| !vu.join.is_finished());

        // Users that exited without being retired no longer count as active.
        let before = self.active.len();
        self.active.retain(|vu| !vu.join.is_finished());
        let exited = before - self.active.len();
        if exited > 0 {
            warn!(exited, "virtual users exited unexpectedly, replacing them");
        }

        match self.shape.next(elapsed) {
            ShapeTick::Stop => TickOutcome::Stop,
            ShapeTick::Phase(phase) => TickOutcome::Adjusted(self.apply(phase)),
        }
    }

    /// Move the population one step towards `phase`.
    pub fn apply(&mut self, phase: LoadPhase) -> PopulationChange {
        let (spawned, retired) = match plan_adjustment(self.active_count(), phase) {
            Adjustment::Spawn(n) => {
                for _ in 0..n {
                    self.spawn_user();
                }
                (n, 0)
            }
            Adjustment::Retire(n) => {
                for _ in 0..n {
                    self.retire_user();
                }
                (0, n)
            }
            Adjustment::Hold => (0, 0),
        };

        let change = PopulationChange {
            target: phase.target_concurrency,
            spawned,
            retired,
            active: self.active_count(),
        };
        if spawned > 0 || retired > 0 {
            debug!(
                target_users = change.target,
                spawned,
                retired,
                active = change.active,
                "population adjusted"
            );
        }
        change
    }

    fn spawn_user(&mut self) {
        self.next_id += 1;
        let control = Arc::new(VuControl::new(self.next_id));
        let rng = StdRng::from_rng(&mut self.user_rng);
        let join = self
            .tracker
            .spawn(vu_loop(control.clone(), self.ctx.clone(), rng));
        control.mark_active();
        self.active.push(VuHandle { control, join });
    }

    fn retire_user(&mut self) {
        if let Some(vu) = self.active.pop() {
            vu.control.request_stop();
            self.retiring.push(vu);
        }
    }

    /// Stop every user and wait up to the drain timeout for them to exit.
    ///
    /// Users still running afterwards are force-terminated. A request such a
    /// user was waiting on is recorded as aborted.
    pub async fn drain(&mut self) -> DrainReport {
        let users: Vec<VuHandle> = self
            .active
            .drain(..)
            .chain(self.retiring.drain(..))
            .collect();
        for vu in &users {
            vu.control.request_stop();
        }
        self.tracker.close();

        let mut report = DrainReport {
            stopped_users: users.len() as u32,
            ..DrainReport::default()
        };
        info!(users = report.stopped_users, "draining virtual users");

        if tokio::time::timeout(self.drain_timeout, self.tracker.wait())
            .await
            .is_ok()
        {
            return report;
        }

        report.timed_out = true;
        for vu in users.iter().filter(|vu| !vu.join.is_finished()) {
            report.aborted_users += 1;
            if let Some(in_flight) = vu.control.take_in_flight() {
                self.ctx.metrics.append(RequestRecord::aborted(
                    in_flight.timestamp,
                    in_flight.started.elapsed(),
                ));
                report.aborted_requests += 1;
            }
            vu.join.abort();
        }
        self.tracker.wait().await;

        warn!(
            aborted_users = report.aborted_users,
            aborted_requests = report.aborted_requests,
            timeout_secs = self.drain_timeout.as_secs_f64(),
            "drain timed out, force-terminated remaining users"
        );
        report
    }

    /// Status of every user the scheduler still tracks.
    pub fn statuses(&self) -> Vec<VuStatus> {
        self.active
            .iter()
            .chain(self.retiring.iter())
            .map(|vu| vu.control.status())
            .collect()
    }
}
