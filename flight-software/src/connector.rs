//! Connection establishment with an explicit retry policy.
//!
//! Every worker connects to its dependencies (message broker, metrics sink,
//! flight controller) through a [`Connector`]. The default policy retries
//! forever without backoff, so a worker started before its dependencies
//! simply waits for them.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownSignal;

/// How many times an operation is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until success
    pub max_attempts: Option<u32>,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Retry until success, without delay.
    pub const fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::ZERO,
        }
    }

    pub const fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether the 1-based `attempt` may be made.
    pub fn allows(&self, attempt: u64) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= u64::from(max.max(1)),
            None => true,
        }
    }

    /// Run `operation` until it succeeds or the policy is exhausted.
    ///
    /// `on_failure` sees every failed attempt (1-based) before the backoff.
    pub fn run<T, E>(
        &self,
        mut operation: impl FnMut() -> Result<T, E>,
        mut on_failure: impl FnMut(u64, &E),
    ) -> Result<T, RetryExhausted<E>> {
        let mut attempt: u64 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) => {
                    on_failure(attempt, &error);
                    if !self.allows(attempt.saturating_add(1)) {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: error,
                        });
                    }
                    if !self.backoff.is_zero() {
                        std::thread::sleep(self.backoff);
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// The last error of an operation that ran out of attempts.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u64,
    pub last_error: E,
}

/// External systems a worker connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    MessageBroker,
    MetricsSink,
    FlightActuator,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dependency::MessageBroker => "message broker",
            Dependency::MetricsSink => "metrics sink",
            Dependency::FlightActuator => "flight actuator",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("{dependency} unreachable after {attempts} attempts: {last_error}")]
    Exhausted {
        dependency: Dependency,
        attempts: u64,
        last_error: String,
    },

    #[error("Stopped connecting to {0}: shutdown requested")]
    Cancelled(Dependency),
}

/// Obtains connected clients according to a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Connector {
    policy: RetryPolicy,
    shutdown: Option<ShutdownSignal>,
}

impl Connector {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            shutdown: None,
        }
    }

    /// Give up between attempts once `shutdown` is triggered.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `factory` until it yields a connected client.
    ///
    /// The first failure is logged as a warning, later ones only at debug
    /// level so an absent dependency does not flood the log.
    pub fn connect<T, E, F>(&self, dependency: Dependency, mut factory: F) -> Result<T, ConnectError>
    where
        E: fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt: u64 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match factory() {
                Ok(client) => {
                    if attempt > 1 {
                        info!("Connected to {dependency} after {attempt} attempts");
                    } else {
                        info!("Connected to {dependency}");
                    }
                    return Ok(client);
                }
                Err(e) => {
                    if attempt == 1 {
                        warn!("Can't connect to {dependency}: {e}; retrying");
                    } else {
                        debug!("Connection attempt {attempt} to {dependency} failed: {e}");
                    }

                    if !self.policy.allows(attempt.saturating_add(1)) {
                        return Err(ConnectError::Exhausted {
                            dependency,
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    if self.is_cancelled() {
                        return Err(ConnectError::Cancelled(dependency));
                    }
                    if !self.policy.backoff.is_zero() {
                        std::thread::sleep(self.policy.backoff);
                    }
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(ShutdownSignal::is_triggered)
            .unwrap_or(false)
    }
}
