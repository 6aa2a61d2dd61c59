//! Retry policy for batch transmission.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{Rng as _, RngCore};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tally_common::{
    deser::PermissiveBool,
    time::{duration_from_secs, MAX_CONFIGURED_DURATION},
};

use crate::sink::TransportError;

#[derive(Clone)]
enum BackoffRng {
    /// The thread-local CSPRNG seeded by the operating system.
    SecureDefault,

    /// A shared random number generator.
    Shared(Arc<Mutex<Box<dyn RngCore + Send + Sync>>>),
}

impl fmt::Debug for BackoffRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffRng::SecureDefault => f.debug_tuple("SecureDefault").finish(),
            BackoffRng::Shared(_) => f.debug_tuple("Shared").finish(),
        }
    }
}

impl BackoffRng {
    fn sample_between(&self, low: Duration, high: Duration) -> Duration {
        match self {
            BackoffRng::SecureDefault => rand::rng().random_range(low..=high),
            BackoffRng::Shared(rng) => {
                let mut rng = rng.lock().unwrap_or_else(|e| e.into_inner());
                rng.random_range(low..=high)
            }
        }
    }
}

/// An exponential backoff strategy.
///
/// The backoff after the `n`th consecutive failure is `base * multiplier^(n - 1)`, clamped to `[base, max]`. Jitter,
/// when enabled, spreads each duration `D` uniformly over `[D / jitter_factor, D]` so that many reporters recovering
/// from the same outage don't retry in lockstep.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter_factor: f64,
    rng: BackoffRng,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` without jitter.
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self::with_jitter(base, max, multiplier, 1.0)
    }

    /// Creates a new `ExponentialBackoff` with jitter.
    ///
    /// A jitter factor of 1.0 or less disables jitter.
    pub fn with_jitter(base: Duration, max: Duration, multiplier: f64, jitter_factor: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            multiplier: multiplier.max(1.0),
            jitter_factor: jitter_factor.max(1.0),
            rng: BackoffRng::SecureDefault,
        }
    }

    /// Sets the random number generator used for jitter.
    ///
    /// Only meant for tests, where the RNG must be overridden to add determinism.
    pub fn with_rng<R>(mut self, rng: R) -> Self
    where
        R: RngCore + Send + Sync + 'static,
    {
        self.rng = BackoffRng::Shared(Arc::new(Mutex::new(Box::new(rng))));
        self
    }

    /// Calculates the backoff duration after the given number of consecutive failures.
    pub fn get_backoff_duration(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return self.base;
        }

        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let scaled_secs = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let mut backoff = if scaled_secs.is_finite() && scaled_secs < self.max.as_secs_f64() {
            Duration::from_secs_f64(scaled_secs)
        } else {
            self.max
        };

        if self.jitter_factor > 1.0 {
            let lower = backoff.div_f64(self.jitter_factor);
            backoff = self.rng.sample_between(lower, backoff);
        }

        backoff.clamp(self.base, self.max)
    }
}

/// Retry configuration.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RetryConfiguration {
    /// Delay before the first retry, in seconds.
    ///
    /// Defaults to 0.5 seconds.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: f64,

    /// Factor each successive delay grows by.
    ///
    /// Defaults to 2.0.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on any single delay, in seconds.
    ///
    /// Defaults to 30 seconds.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: f64,

    /// Total number of transmission attempts per batch, including the first.
    ///
    /// Defaults to 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Jitter spread. Each delay `D` is drawn from `[D / jitter_factor, D]`; 1.0 disables jitter.
    ///
    /// Defaults to 1.0.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Whether client errors drop a batch on the spot instead of being retried.
    ///
    /// Client errors are 4xx responses other than 408 and 429, and payloads the sink rejects outright.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub drop_client_errors: bool,
}

const fn default_backoff_base_secs() -> f64 {
    0.5
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_backoff_max_secs() -> f64 {
    30.0
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_jitter_factor() -> f64 {
    1.0
}

impl Default for RetryConfiguration {
    fn default() -> Self {
        Self {
            backoff_base_secs: default_backoff_base_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_secs: default_backoff_max_secs(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
            drop_client_errors: false,
        }
    }
}

impl RetryConfiguration {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        let limit = MAX_CONFIGURED_DURATION.as_secs();
        if duration_from_secs(self.backoff_base_secs).is_none() {
            return Err(format!(
                "retry.backoff_base_secs must be between 0 and {} (got {})",
                limit, self.backoff_base_secs
            ));
        }
        if duration_from_secs(self.backoff_max_secs).is_none() || self.backoff_max_secs < self.backoff_base_secs {
            return Err(format!(
                "retry.backoff_max_secs must be at least retry.backoff_base_secs and at most {} (got {})",
                limit, self.backoff_max_secs
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0) {
            return Err("retry.backoff_multiplier must be at least 1.0".to_string());
        }
        if !(self.jitter_factor.is_finite() && self.jitter_factor >= 1.0) {
            return Err("retry.jitter_factor must be at least 1.0".to_string());
        }
        Ok(())
    }

    /// Builds the retry policy described by this configuration.
    ///
    /// Out-of-range delays, which `validate` rejects, saturate at the longest configurable duration.
    pub fn to_policy(&self) -> RetryPolicy {
        let secs = |value| duration_from_secs(value).unwrap_or(MAX_CONFIGURED_DURATION);
        let backoff = ExponentialBackoff::with_jitter(
            secs(self.backoff_base_secs),
            secs(self.backoff_max_secs),
            self.backoff_multiplier,
            self.jitter_factor,
        );
        RetryPolicy::new(backoff, self.max_attempts).with_drop_client_errors(self.drop_client_errors)
    }
}

/// Bounded retry policy.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
    max_attempts: u32,
    drop_client_errors: bool,
}

impl RetryPolicy {
    /// Creates a new `RetryPolicy`.
    ///
    /// `max_attempts` counts every attempt, including the first, and is at least one.
    pub fn new(backoff: ExponentialBackoff, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts: max_attempts.max(1),
            drop_client_errors: false,
        }
    }

    /// Sets whether client errors drop a batch without retrying.
    pub fn with_drop_client_errors(mut self, drop_client_errors: bool) -> Self {
        self.drop_client_errors = drop_client_errors;
        self
    }

    /// Returns `true` if the given failure ends delivery regardless of the attempts left.
    pub fn drops(&self, error: &TransportError) -> bool {
        self.drop_client_errors && error.is_client_error()
    }

    /// Returns the total number of attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns how long to wait before the next attempt, given how many attempts have failed so far.
    ///
    /// Returns `None` once every attempt is used up.
    pub fn next_delay(&self, failed_attempts: u32) -> Option<Duration> {
        (failed_attempts < self.max_attempts).then(|| self.backoff.get_backoff_duration(failed_attempts))
    }
}
