//! Load shapes: pure policies mapping elapsed run time to a population target.
//!
//! A [`ShapeStrategy`] is evaluated once per scheduler tick. It answers with
//! either a [`LoadPhase`] (how many virtual users should be active and how
//! many may be added or removed this tick) or [`ShapeTick::Stop`] once the
//! run's time limit is reached.
//!
//! Four variants are supported:
//!
//! | Variant         | Phase while `elapsed < time_limit`                     |
//! |-----------------|--------------------------------------------------------|
//! | `Constant`      | `{spawn_rate, spawn_rate}`                             |
//! | `Ramp`          | `{max_users, 1}`                                       |
//! | `RandomWalk`    | `{uniform(min_users..=max_users), spawn_rate}` (seeded) |
//! | `PeriodicSpike` | spike or normal level depending on `elapsed mod pattern` |
//!
//! Shapes are parsed from the `[shape]` table of the config file as a
//! [`ShapeConfig`] and validated into a [`ShapeStrategy`] with
//! [`ShapeConfig::build`].

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::loadtest::error::LoadTestError;

/// Default seed for the random walk shape.
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Desired population for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadPhase {
    /// Number of virtual users that should be active.
    pub target_concurrency: u32,
    /// Maximum population change permitted in this tick.
    pub spawn_rate: u32,
}

impl LoadPhase {
    pub fn new(target_concurrency: u32, spawn_rate: u32) -> Self {
        Self {
            target_concurrency,
            spawn_rate,
        }
    }
}

/// Output of one shape evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeTick {
    /// Keep running with this phase.
    Phase(LoadPhase),
    /// The time limit was reached; drain all users.
    Stop,
}

impl ShapeTick {
    /// Returns the phase, or `None` for [`ShapeTick::Stop`].
    pub fn phase(self) -> Option<LoadPhase> {
        match self {
            Self::Phase(phase) => Some(phase),
            Self::Stop => None,
        }
    }
}

/// Seeded random population walk.
///
/// The generator belongs to this shape instance, so two shapes built with the
/// same seed yield the same target sequence regardless of any other
/// randomness in the process.
pub struct RandomWalk {
    time_limit: Duration,
    seed: u64,
    min_users: u32,
    max_users: u32,
    spawn_rate: u32,
    rng: StdRng,
}

impl RandomWalk {
    fn new(time_limit: Duration, seed: u64, min_users: u32, max_users: u32, spawn_rate: u32) -> Self {
        Self {
            time_limit,
            seed,
            min_users,
            max_users,
            spawn_rate,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The seed the generator was initialized with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn next(&mut self, elapsed: Duration) -> ShapeTick {
        if elapsed >= self.time_limit {
            return ShapeTick::Stop;
        }
        let target = self.rng.random_range(self.min_users..=self.max_users);
        ShapeTick::Phase(LoadPhase::new(target, self.spawn_rate))
    }
}

impl fmt::Debug for RandomWalk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomWalk")
            .field("time_limit", &self.time_limit)
            .field("seed", &self.seed)
            .field("min_users", &self.min_users)
            .field("max_users", &self.max_users)
            .field("spawn_rate", &self.spawn_rate)
            .finish_non_exhaustive()
    }
}

/// A validated load shape.
///
/// Construct through [`ShapeConfig::build`] or the typed constructors below;
/// both guarantee a positive time limit.
#[derive(Debug)]
pub enum ShapeStrategy {
    /// Jump straight to `spawn_rate` users and hold.
    Constant { time_limit: Duration, spawn_rate: u32 },
    /// Climb towards `max_users` one user per tick.
    Ramp { time_limit: Duration, max_users: u32 },
    /// Redraw the target every tick from a seeded generator.
    RandomWalk(RandomWalk),
    /// Alternate between a spike level and a normal level on a fixed pattern.
    PeriodicSpike {
        time_limit: Duration,
        spike_duration: Duration,
        pattern_duration: Duration,
        normal_users: u32,
        spike_users: u32,
    },
}

impl ShapeStrategy {
    pub fn constant(time_limit: Duration, spawn_rate: u32) -> Self {
        Self::Constant {
            time_limit,
            spawn_rate,
        }
    }

    pub fn ramp(time_limit: Duration, max_users: u32) -> Self {
        Self::Ramp {
            time_limit,
            max_users,
        }
    }

    /// Random walk over `[10, 40]` with an immediate-jump rate of 100.
    pub fn random_walk(time_limit: Duration, seed: u64) -> Self {
        Self::RandomWalk(RandomWalk::new(time_limit, seed, 10, 40, 100))
    }

    pub fn periodic_spike(
        time_limit: Duration,
        spike_duration: Duration,
        pattern_duration: Duration,
        normal_users: u32,
        spike_users: u32,
    ) -> Self {
        Self::PeriodicSpike {
            time_limit,
            spike_duration,
            pattern_duration,
            normal_users,
            spike_users,
        }
    }

    /// Evaluate the shape at `elapsed` run time.
    pub fn next(&mut self, elapsed: Duration) -> ShapeTick {
        match self {
            Self::Constant {
                time_limit,
                spawn_rate,
            } => {
                if elapsed >= *time_limit {
                    return ShapeTick::Stop;
                }
                ShapeTick::Phase(LoadPhase::new(*spawn_rate, *spawn_rate))
            }
            Self::Ramp {
                time_limit,
                max_users,
            } => {
                if elapsed >= *time_limit {
                    return ShapeTick::Stop;
                }
                ShapeTick::Phase(LoadPhase::new(*max_users, 1))
            }
            Self::RandomWalk(walk) => walk.next(elapsed),
            Self::PeriodicSpike {
                time_limit,
                spike_duration,
                pattern_duration,
                normal_users,
                spike_users,
            } => {
                if elapsed >= *time_limit {
                    return ShapeTick::Stop;
                }
                let phase = pattern_phase(elapsed, *pattern_duration);
                let users = if phase < *spike_duration {
                    *spike_users
                } else {
                    *normal_users
                };
                ShapeTick::Phase(LoadPhase::new(users, users))
            }
        }
    }

    /// The run time after which the shape answers [`ShapeTick::Stop`].
    pub fn time_limit(&self) -> Duration {
        match self {
            Self::Constant { time_limit, .. }
            | Self::Ramp { time_limit, .. }
            | Self::PeriodicSpike { time_limit, .. } => *time_limit,
            Self::RandomWalk(walk) => walk.time_limit,
        }
    }

    /// Short variant name used in logs, summaries and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "constant",
            Self::Ramp { .. } => "ramp",
            Self::RandomWalk(_) => "random",
            Self::PeriodicSpike { .. } => "spike",
        }
    }

    /// Largest target this shape can ever ask for.
    pub fn peak_users(&self) -> u32 {
        match self {
            Self::Constant { spawn_rate, .. } => *spawn_rate,
            Self::Ramp { max_users, .. } => *max_users,
            Self::RandomWalk(walk) => walk.max_users,
            Self::PeriodicSpike {
                normal_users,
                spike_users,
                ..
            } => (*normal_users).max(*spike_users),
        }
    }
}

/// `elapsed mod pattern`, with a zero pattern treated as "always phase zero".
fn pattern_phase(elapsed: Duration, pattern: Duration) -> Duration {
    let pattern_nanos = pattern.as_nanos();
    if pattern_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((elapsed.as_nanos() % pattern_nanos) as u64)
}

fn default_seed() -> u64 {
    DEFAULT_RANDOM_SEED
}

fn default_min_users() -> i64 {
    10
}

fn default_max_users() -> i64 {
    40
}

fn default_random_spawn_rate() -> i64 {
    100
}

/// The `[shape]` table of the config file, before validation.
///
/// Counts are parsed as signed integers so a negative value is reported as a
/// [`LoadTestError::ShapeConfig`] error instead of a TOML type mismatch.
///
/// # Example TOML
///
/// ```toml
/// [shape]
/// type = "spike"
/// time_limit_secs = 300
/// spike_duration_secs = 5
/// pattern_duration_secs = 20
/// normal_users = 20
/// spike_users = 40
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeConfig {
    Constant {
        time_limit_secs: i64,
        spawn_rate: i64,
    },
    Ramp {
        time_limit_secs: i64,
        max_users: i64,
    },
    Random {
        time_limit_secs: i64,
        #[serde(default = "default_seed")]
        seed: u64,
        #[serde(default = "default_min_users")]
        min_users: i64,
        #[serde(default = "default_max_users")]
        max_users: i64,
        #[serde(default = "default_random_spawn_rate")]
        spawn_rate: i64,
    },
    Spike {
        time_limit_secs: i64,
        spike_duration_secs: i64,
        pattern_duration_secs: i64,
        normal_users: i64,
        spike_users: i64,
    },
}

impl ShapeConfig {
    /// Validate the parameters and build the runtime shape.
    ///
    /// Fails with [`LoadTestError::ShapeConfig`] when a count or rate is
    /// negative, the time limit is not positive, or the spike pattern is
    /// degenerate.
    pub fn build(&self) -> Result<ShapeStrategy, LoadTestError> {
        match self {
            Self::Constant {
                time_limit_secs,
                spawn_rate,
            } => Ok(ShapeStrategy::constant(
                time_limit(*time_limit_secs)?,
                non_negative("spawn_rate", *spawn_rate)?,
            )),
            Self::Ramp {
                time_limit_secs,
                max_users,
            } => Ok(ShapeStrategy::ramp(
                time_limit(*time_limit_secs)?,
                non_negative("max_users", *max_users)?,
            )),
            Self::Random {
                time_limit_secs,
                seed,
                min_users,
                max_users,
                spawn_rate,
            } => {
                let limit = time_limit(*time_limit_secs)?;
                let min = non_negative("min_users", *min_users)?;
                let max = non_negative("max_users", *max_users)?;
                if min > max {
                    return Err(LoadTestError::shape(format!(
                        "min_users ({min}) must not exceed max_users ({max})"
                    )));
                }
                let rate = non_negative("spawn_rate", *spawn_rate)?;
                Ok(ShapeStrategy::RandomWalk(RandomWalk::new(
                    limit, *seed, min, max, rate,
                )))
            }
            Self::Spike {
                time_limit_secs,
                spike_duration_secs,
                pattern_duration_secs,
                normal_users,
                spike_users,
            } => {
                let limit = time_limit(*time_limit_secs)?;
                let spike = non_negative("spike_duration_secs", *spike_duration_secs)?;
                if *pattern_duration_secs <= 0 {
                    return Err(LoadTestError::shape(format!(
                        "pattern_duration_secs must be > 0, got {pattern_duration_secs}"
                    )));
                }
                Ok(ShapeStrategy::periodic_spike(
                    limit,
                    Duration::from_secs(u64::from(spike)),
                    Duration::from_secs(*pattern_duration_secs as u64),
                    non_negative("normal_users", *normal_users)?,
                    non_negative("spike_users", *spike_users)?,
                ))
            }
        }
    }

    /// Replace the time limit (CLI `--time-limit` override).
    pub fn set_time_limit_secs(&mut self, secs: i64) {
        match self {
            Self::Constant {
                time_limit_secs, ..
            }
            | Self::Ramp {
                time_limit_secs, ..
            }
            | Self::Random {
                time_limit_secs, ..
            }
            | Self::Spike {
                time_limit_secs, ..
            } => *time_limit_secs = secs,
        }
    }

    /// Replace the random walk seed. Returns `false` for other variants.
    pub fn set_seed(&mut self, new_seed: u64) -> bool {
        match self {
            Self::Random { seed, .. } => {
                *seed = new_seed;
                true
            }
            _ => false,
        }
    }
}

fn time_limit(secs: i64) -> Result<Duration, LoadTestError> {
    if secs <= 0 {
        return Err(LoadTestError::shape(format!(
            "time_limit_secs must be > 0, got {secs}"
        )));
    }
    Ok(Duration::from_secs(secs as u64))
}

fn non_negative(field: &str, value: i64) -> Result<u32, LoadTestError> {
    if value < 0 {
        return Err(LoadTestError::shape(format!(
            "{field} must be >= 0, got {value}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| LoadTestError::shape(format!("{field} is too large: {value}")))
}
