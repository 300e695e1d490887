//! Bounded polling for background processes that need a warm-up
//!
//! Tunnel clients and friends take a moment before their status endpoints
//! answer. Rather than sleeping a fixed amount, probes are retried with
//! exponential backoff until they succeed or a hard timeout passes.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::serde_utils::duration_millis;
use crate::error::ConfigError;

/// How long, and how often, to poll for readiness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessPolicy {
    /// Delay after the first failed probe
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Upper bound for a single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor between delays
    pub multiplier: f64,

    /// Total time budget before giving up
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(2))
    }
}

impl ReadinessPolicy {
    /// Default backoff shape with the given total budget
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            initial: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            timeout,
        }
    }

    /// Check the backoff shape; `name` is the config key used in the error
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "{}.multiplier must be a finite number >= 1.0, got {}",
                name, self.multiplier
            )));
        }
        if self.initial.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "{}.initial must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}

/// Exponential backoff without jitter
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            current: initial,
            max,
            multiplier,
        }
    }

    pub fn from_policy(policy: &ReadinessPolicy) -> Self {
        Self::new(policy.initial, policy.max_delay, policy.multiplier)
    }

    /// Get the next delay and advance the backoff.
    ///
    /// A product that is not a valid duration (overflow, negative or NaN
    /// multiplier) saturates at `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }
}

/// Poll `probe` until it yields a value, fails, or the policy's budget runs out.
///
/// `Ok(Some(v))` from the probe means ready, `Ok(None)` means try again,
/// `Err(e)` aborts immediately. Returns `Ok(None)` on timeout. The probe is
/// always tried one last time when the deadline is reached, so a zero budget
/// still gets a single attempt.
pub async fn poll_until<T, E, F, Fut>(policy: &ReadinessPolicy, mut probe: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut backoff = Backoff::from_policy(policy);

    loop {
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }

        let delay = std::cmp::min(backoff.next_delay(), deadline - now);
        tracing::trace!("Not ready yet, retrying in {:?}", delay);
        sleep(delay).await;
    }
}
